use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, FixedOffset, Utc};

use crate::Result;

const HEADER: &str = "epoch,training_loss,monotonic_training_loss,test_loss,monotonic_test_loss,learning_rate,timestamp";

/// One epoch of the training log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub epoch: usize,
    pub training_loss: f32,
    /// The lowest training loss seen up to this epoch.
    pub monotonic_training_loss: f32,
    pub test_loss: f32,
    /// The lowest test loss seen up to this epoch.
    pub monotonic_test_loss: f32,
    pub learning_rate: f32,
    pub timestamp: DateTime<FixedOffset>,
}

impl LogRow {
    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.epoch,
            self.training_loss,
            self.monotonic_training_loss,
            self.test_loss,
            self.monotonic_test_loss,
            self.learning_rate,
            self.timestamp.to_rfc3339()
        )
    }

    fn parse(line: &str) -> io::Result<Self> {
        let invalid = |what: &str| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid {what} in training log row {line:?}"),
            )
        };

        let fields: Vec<&str> = line.split(',').collect();
        let &[epoch, tl, mtl, vl, mvl, lr, ts] = fields.as_slice() else {
            return Err(invalid("field count"));
        };
        let loss = |s: &str, what| s.parse::<f32>().map_err(|_| invalid(what));

        Ok(Self {
            epoch: epoch.parse().map_err(|_| invalid("epoch"))?,
            training_loss: loss(tl, "training loss")?,
            monotonic_training_loss: loss(mtl, "monotonic training loss")?,
            test_loss: loss(vl, "test loss")?,
            monotonic_test_loss: loss(mvl, "monotonic test loss")?,
            learning_rate: loss(lr, "learning rate")?,
            timestamp: DateTime::parse_from_rfc3339(ts).map_err(|_| invalid("timestamp"))?,
        })
    }
}

/// The per-epoch CSV log of a training run, flushed after every row.
#[derive(Debug)]
pub struct TrainingLog {
    path: PathBuf,
    writer: BufWriter<File>,
    best_training_loss: f32,
    best_test_loss: f32,
}

impl TrainingLog {
    /// Starts a new log at `path`, replacing any previous one.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{HEADER}")?;
        writer.flush()?;

        Ok(Self {
            path,
            writer,
            best_training_loss: f32::INFINITY,
            best_test_loss: f32::INFINITY,
        })
    }

    /// Reopens the log at `path` to continue a run from `epoch`.
    ///
    /// Rows past `epoch` belong to an aborted attempt and are dropped.
    pub fn resume<P: AsRef<Path>>(path: P, epoch: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Self::create(path);
        }

        let rows: Vec<LogRow> = Self::rows(path)?
            .into_iter()
            .filter(|row| row.epoch <= epoch)
            .collect();

        let mut log = Self::create(path)?;
        for row in &rows {
            writeln!(log.writer, "{}", row.to_csv())?;
            log.best_training_loss = log.best_training_loss.min(row.training_loss);
            log.best_test_loss = log.best_test_loss.min(row.test_loss);
        }
        log.writer.flush()?;

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lowest test loss logged so far, infinite while the log is empty.
    pub fn best_test_loss(&self) -> f32 {
        self.best_test_loss
    }

    /// Appends the row of an epoch.
    pub fn append(
        &mut self,
        epoch: usize,
        training_loss: f32,
        test_loss: f32,
        learning_rate: f32,
    ) -> Result<LogRow> {
        self.best_training_loss = self.best_training_loss.min(training_loss);
        self.best_test_loss = self.best_test_loss.min(test_loss);

        let row = LogRow {
            epoch,
            training_loss,
            monotonic_training_loss: self.best_training_loss,
            test_loss,
            monotonic_test_loss: self.best_test_loss,
            learning_rate,
            timestamp: Utc::now().fixed_offset(),
        };

        writeln!(self.writer, "{}", row.to_csv())?;
        self.writer.flush()?;

        Ok(row)
    }

    /// Reads back every row of the log at `path`.
    pub fn rows<P: AsRef<Path>>(path: P) -> Result<Vec<LogRow>> {
        let reader = BufReader::new(OpenOptions::new().read(true).open(path)?);
        let mut rows = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if i == 0 {
                if line != HEADER {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected training log header {line:?}"),
                    )
                    .into());
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }

            rows.push(LogRow::parse(&line)?);
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn rows_are_flushed_as_they_are_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = TrainingLog::create(&path).unwrap();

        log.append(1, 2.0, 2.5, 0.1).unwrap();
        log.append(2, 2.2, 2.1, 0.1).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(HEADER));

        let rows = TrainingLog::rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].epoch, 2);
        assert_eq!(rows[1].training_loss, 2.2);
        assert_eq!(rows[1].monotonic_training_loss, 2.0);
        assert_eq!(rows[1].monotonic_test_loss, 2.1);
    }

    #[test]
    fn resuming_drops_the_rows_of_the_aborted_attempt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = TrainingLog::create(&path).unwrap();
        for epoch in 1..=4 {
            log.append(epoch, 3. - epoch as f32 * 0.5, 1., 0.1).unwrap();
        }
        drop(log);

        let mut log = TrainingLog::resume(&path, 2).unwrap();
        assert_eq!(log.best_test_loss(), 1.);
        let row = log.append(3, 2.5, 1., 0.1).unwrap();
        assert_eq!(row.monotonic_training_loss, 2.);

        let epochs: Vec<_> = TrainingLog::rows(&path)
            .unwrap()
            .iter()
            .map(|r| r.epoch)
            .collect();
        assert_eq!(epochs, [1, 2, 3]);
    }

    #[test]
    fn the_best_test_loss_survives_a_resume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = TrainingLog::create(&path).unwrap();
        assert_eq!(log.best_test_loss(), f32::INFINITY);

        for (epoch, test_loss) in [(1, 0.9), (2, 0.24241164), (3, 0.7), (4, 0.1)] {
            log.append(epoch, 1., test_loss, 0.1).unwrap();
        }
        drop(log);

        // Rows past the resume epoch don't count.
        let log = TrainingLog::resume(&path, 3).unwrap();
        assert_eq!(log.best_test_loss(), 0.24241164);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, format!("{HEADER}\n1,2,3\n")).unwrap();

        assert!(TrainingLog::rows(&path).is_err());
    }
}
