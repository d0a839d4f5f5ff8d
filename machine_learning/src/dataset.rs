use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis, Ix2};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// A labelled in-memory dataset.
///
/// `x` holds one example per row of its first axis and `y` the matching one-hot labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: ArrayD<f32>,
    y: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The examples, shaped `(n, *example_dims)`.
    /// * `y` - The one-hot labels, shaped `(n, num_classes)`.
    ///
    /// # Returns
    /// A new `Dataset` or an error if the amount of examples and labels differ.
    pub fn new(x: ArrayD<f32>, y: Array2<f32>) -> Result<Self> {
        if x.ndim() < 2 {
            return Err(MlErr::InvalidConfig(format!(
                "examples must have at least one dimension besides the batch axis, got shape {:?}",
                x.shape()
            )));
        }

        let n = x.len_of(Axis(0));
        if y.nrows() != n {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: y.nrows(),
                expected: n,
            });
        }

        Ok(Self { x, y })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.y.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x(&self) -> ArrayViewD<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    /// Returns the examples as a matrix, failing if they aren't flat vectors.
    pub fn x_flat(&self) -> Result<ArrayView2<'_, f32>> {
        Ok(self.x.view().into_dimensionality::<Ix2>()?)
    }

    /// The shape of a single example.
    pub fn example_dims(&self) -> &[usize] {
        &self.x.shape()[1..]
    }

    pub fn num_classes(&self) -> usize {
        self.y.ncols()
    }

    /// Returns the examples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Result<Dataset> {
        if let Some(&i) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(MlErr::InvalidConfig(format!(
                "index {i} out of range for a dataset of {} examples",
                self.len()
            )));
        }

        Ok(Self {
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
        })
    }

    /// Returns a copy with the examples in a random order drawn from `rng`.
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Dataset {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);

        Self {
            x: self.x.select(Axis(0), &indices),
            y: self.y.select(Axis(0), &indices),
        }
    }

    /// Iterates over consecutive batches of `batch_size` examples, the last one possibly smaller.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> Result<impl Iterator<Item = (ArrayViewD<'_, f32>, ArrayView2<'_, f32>)>> {
        if batch_size == 0 {
            return Err(MlErr::InvalidConfig("batch size must be positive".into()));
        }

        let xs = self.x.axis_chunks_iter(Axis(0), batch_size);
        let ys = self.y.axis_chunks_iter(Axis(0), batch_size);

        Ok(xs.zip(ys))
    }

    /// Splits the dataset in two, the first part holding the first `at` examples.
    pub fn split(&self, at: usize) -> Result<(Dataset, Dataset)> {
        if at > self.len() {
            return Err(MlErr::InvalidConfig(format!(
                "can't split a dataset of {} examples at {at}",
                self.len()
            )));
        }

        let (xa, xb) = self.x.view().split_at(Axis(0), at);
        let (ya, yb) = self.y.view().split_at(Axis(0), at);

        Ok((
            Self {
                x: xa.to_owned(),
                y: ya.to_owned(),
            },
            Self {
                x: xb.to_owned(),
                y: yb.to_owned(),
            },
        ))
    }
}

/// Encodes class labels as one-hot rows.
///
/// # Arguments
/// * `labels` - The class of each example.
/// * `num_classes` - The amount of classes.
///
/// # Returns
/// A `(labels.len(), num_classes)` matrix or an error if a label is out of range.
pub fn one_hot(labels: &[usize], num_classes: usize) -> Result<Array2<f32>> {
    let mut y = Array2::zeros((labels.len(), num_classes));

    for (row, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(MlErr::InvalidConfig(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
        y[[row, label]] = 1.;
    }

    Ok(y)
}

/// Decodes one-hot rows back into class labels.
pub fn classes(y: ArrayView2<'_, f32>) -> Vec<usize> {
    y.axis_iter(Axis(0))
        .map(|row| row.iter().position(|&v| v > 0.5).unwrap_or(0))
        .collect()
}

/// Reshapes a flat `(n, features)` matrix into examples of the given dimensions.
pub fn reshape_examples(x: Array2<f32>, example_dims: &[usize]) -> Result<ArrayD<f32>> {
    let mut shape = vec![x.nrows()];
    shape.extend_from_slice(example_dims);

    Ok(x.into_shape_clone(shape)?)
}

impl TryFrom<(Array2<f32>, Array2<f32>)> for Dataset {
    type Error = MlErr;

    fn try_from((x, y): (Array2<f32>, Array2<f32>)) -> Result<Self> {
        Self::new(x.into_dyn(), y)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn dataset(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32);
        let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
        Dataset::try_from((x, one_hot(&labels, 3).unwrap())).unwrap()
    }

    #[test]
    fn one_hot_and_back() {
        let y = one_hot(&[2, 0, 1], 3).unwrap();
        assert_eq!(y, array![[0., 0., 1.], [1., 0., 0.], [0., 1., 0.]]);
        assert_eq!(classes(y.view()), [2, 0, 1]);
        assert!(one_hot(&[3], 3).is_err());
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let res = Dataset::new(ArrayD::zeros(vec![3, 2]), Array2::zeros((2, 3)));
        assert!(matches!(res, Err(MlErr::SizeMismatch { .. })));
    }

    #[test]
    fn batches_include_the_last_partial_one() {
        let data = dataset(7);
        let sizes: Vec<_> = data.batches(3).unwrap().map(|(x, _)| x.shape()[0]).collect();

        assert_eq!(sizes, [3, 3, 1]);
        assert!(data.batches(0).is_err());
    }

    #[test]
    fn shuffling_keeps_pairs_together() {
        let data = dataset(20);
        let mut rng = StdRng::seed_from_u64(3);
        let shuffled = data.shuffled(&mut rng);

        assert_ne!(shuffled, data);
        for (x, y) in shuffled.x_flat().unwrap().rows().into_iter().zip(classes(shuffled.y())) {
            let i = (x[0] / 2.) as usize;
            assert_eq!(y, i % 3);
        }
    }

    #[test]
    fn same_seed_same_order() {
        let data = dataset(20);
        let a = data.shuffled(&mut StdRng::seed_from_u64(9));
        let b = data.shuffled(&mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn split_and_select() {
        let data = dataset(5);
        let (a, b) = data.split(3).unwrap();
        assert_eq!((a.len(), b.len()), (3, 2));
        assert_eq!(b.select(&[1]).unwrap(), data.select(&[4]).unwrap());
        assert!(data.split(6).is_err());
        assert!(data.select(&[5]).is_err());
    }

    #[test]
    fn reshape_into_images() {
        let x = reshape_examples(Array2::zeros((2, 12)), &[3, 2, 2]).unwrap();
        assert_eq!(x.shape(), &[2, 3, 2, 2]);
        assert!(reshape_examples(Array2::zeros((2, 12)), &[5]).is_err());
    }
}
