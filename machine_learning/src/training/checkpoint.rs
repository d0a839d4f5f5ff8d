use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use super::TrainingParameters;
use crate::{MlErr, Result, arch::Sequential};

const MODEL_FILE: &str = "checkpoint.json";
const PARAMETERS_FILE: &str = "training_parameters.json";
const LOG_FILE: &str = "training_log.csv";

/// The directory a training run persists its state to.
///
/// Every file is written to a temporary sibling first and then renamed into place, so a reader
/// never sees a half written checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens the run directory at `dir`, creating it if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn parameters_path(&self) -> PathBuf {
        self.dir.join(PARAMETERS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Saves `model` as the run's checkpoint.
    ///
    /// # Returns
    /// The path of the checkpoint.
    pub fn save_model(&self, model: &Sequential) -> Result<PathBuf> {
        let path = self.model_path();
        write_atomically(&path, |w| model.dump(w))?;
        debug!(path:% = path.display(); "checkpoint saved");
        Ok(path)
    }

    /// Loads the model saved at `path`.
    pub fn load_model(path: &Path) -> Result<Sequential> {
        if !path.is_file() {
            return Err(MlErr::MissingCheckpoint(path.to_path_buf()));
        }

        Sequential::load(BufReader::new(File::open(path)?))
    }

    /// Binds the run to its training parameters.
    ///
    /// The first call persists `params`. Once a copy exists it is read back and takes
    /// precedence, so every attempt of a run trains with the same configuration.
    pub fn bind_parameters(&self, params: TrainingParameters) -> Result<TrainingParameters> {
        let path = self.parameters_path();

        if path.is_file() {
            let persisted = TrainingParameters::read(&path)?;
            if persisted != params {
                warn!(path:% = path.display(); "using the training parameters persisted by the run");
            }
            persisted.validate()?;
            return Ok(persisted);
        }

        write_atomically(&path, |w| Ok(serde_json::to_writer_pretty(w, &params)?))?;
        Ok(params)
    }
}

fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut writer = BufWriter::new(File::create(&tmp)?);
    write(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp, path)?;
    Ok(())
}
