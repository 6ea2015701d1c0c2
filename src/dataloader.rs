//! Data loader

use std::collections::HashSet;

use rand::{Rng, seq::SliceRandom};
use thiserror::Error;

use crate::graph::{GraphError, HostTensor};

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error(
        "All input vectors must have the same dimension. Received different sizes: {input_dims:?}"
    )]
    InputDimensionMismatch { input_dims: HashSet<usize> },
    #[error("Labels must have the same length as the data")]
    LabelLengthMismatch { label_len: usize, data_len: usize },
    #[error("All labels must have the same dimension. Received different sizes: {label_dims:?}")]
    LabelDimensionMismatch { label_dims: HashSet<usize> },
    #[error("Cannot load an empty dataset")]
    Empty,
    #[error("Batch size must be positive")]
    ZeroBatchSize,
}

/// Rows of features and labels, served in random mini batches
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
#[derive(Debug, Clone)]
pub struct DataLoader {
    data: Vec<Vec<f32>>,
    labels: Vec<Vec<f32>>,
    batch_size: usize,
}

/// A mini batch of rows borrowed from a [`DataLoader`]
pub type Batch<'a> = (Vec<&'a [f32]>, Vec<&'a [f32]>);

impl DataLoader {
    pub fn new(
        data: Vec<Vec<f32>>,
        labels: Vec<Vec<f32>>,
        batch_size: usize,
    ) -> Result<Self, DataLoaderError> {
        if data.len() != labels.len() {
            return Err(DataLoaderError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: data.len(),
            });
        }
        if data.is_empty() {
            return Err(DataLoaderError::Empty);
        }
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        let input_dims = data.iter().map(|d| d.len()).collect::<HashSet<_>>();
        if input_dims.len() > 1 {
            return Err(DataLoaderError::InputDimensionMismatch { input_dims });
        }
        let label_dims = labels.iter().map(|l| l.len()).collect::<HashSet<_>>();
        if label_dims.len() > 1 {
            return Err(DataLoaderError::LabelDimensionMismatch { label_dims });
        }
        Ok(Self {
            data,
            labels,
            batch_size,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.data[0].len()
    }

    pub fn n_outputs(&self) -> usize {
        self.labels[0].len()
    }

    /// `batch_size` distinct rows drawn at random, or every row in random order when
    /// the dataset is smaller than a batch
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Batch<'_> {
        let amount = self.batch_size.min(self.data.len());
        let indices = rand::seq::index::sample(rng, self.data.len(), amount).into_vec();
        self.gather(indices.into_iter())
    }

    /// One pass over the data in mini batches, the last one possibly shorter
    pub fn epoch<R: Rng + ?Sized>(&self, rng: &mut R) -> DataLoaderIterator<'_> {
        let mut indices = (0..self.data.len()).collect::<Vec<_>>();
        indices.shuffle(rng);
        DataLoaderIterator {
            loader: self,
            indices,
            curr_iter: 0,
        }
    }

    fn gather(&self, indices: impl Iterator<Item = usize> + Clone) -> Batch<'_> {
        let batch_data = indices
            .clone()
            .map(|i| self.data[i].as_slice())
            .collect::<Vec<_>>();
        let batch_labels = indices.map(|i| self.labels[i].as_slice()).collect::<Vec<_>>();
        (batch_data, batch_labels)
    }
}

/// An iterator which returns mini batches of data and labels until the end of the dataset
pub struct DataLoaderIterator<'a> {
    loader: &'a DataLoader,
    // shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl<'a> Iterator for DataLoaderIterator<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_iter >= self.indices.len() {
            return None;
        }
        let end = (self.curr_iter + self.loader.batch_size).min(self.indices.len());
        let batch = self
            .loader
            .gather(self.indices[self.curr_iter..end].iter().copied());
        self.curr_iter = end;
        Some(batch)
    }
}

/// Stacks rows into a tensor of shape `[rows, inner...]`, `inner` multiplying out to
/// the row length
pub fn stack_rows(rows: &[&[f32]], inner: &[usize]) -> Result<HostTensor, GraphError> {
    let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    let mut shape = vec![rows.len()];
    shape.extend_from_slice(inner);
    HostTensor::new(data, &shape)
}
