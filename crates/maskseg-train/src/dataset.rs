//! Sample sources for the data generator.

use crate::error::{DatasetError, DatasetResult};

/// An image in `[height, width, channels]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub data: Vec<f32>,
    pub shape: [usize; 3],
}

/// Binary masks in `[height, width, classes]` layout, one channel per class.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskItem {
    pub data: Vec<f32>,
    pub shape: [usize; 3],
}

impl ImageItem {
    /// # Errors
    ///
    /// Returns [`DatasetError::ShapeMismatch`] if `data` does not hold `shape` values.
    pub fn new(data: Vec<f32>, shape: [usize; 3]) -> DatasetResult<Self> {
        check_len("image", data.len(), shape)?;
        Ok(Self { data, shape })
    }
}

impl MaskItem {
    /// # Errors
    ///
    /// Returns [`DatasetError::ShapeMismatch`] if `data` does not hold `shape` values.
    pub fn new(data: Vec<f32>, shape: [usize; 3]) -> DatasetResult<Self> {
        check_len("mask", data.len(), shape)?;
        Ok(Self { data, shape })
    }
}

fn check_len(what: &str, len: usize, shape: [usize; 3]) -> DatasetResult<()> {
    let expected = shape.iter().product::<usize>();
    if len != expected {
        return Err(DatasetError::ShapeMismatch {
            id: what.to_string(),
            expected: format!("{expected} values for {shape:?}"),
            actual: format!("{len} values"),
        });
    }
    Ok(())
}

/// A collection of images with per-class masks.
///
/// Implementations are shared between feeder threads, so they must be `Send + Sync`.
pub trait SegmentationDataset: Send + Sync {
    /// Ids of every sample, in dataset order.
    fn image_ids(&self) -> Vec<usize>;

    fn load_image(&self, id: usize) -> DatasetResult<ImageItem>;

    fn load_mask(&self, id: usize) -> DatasetResult<MaskItem>;

    /// Name of the source a sample comes from; used to exclude sources from augmentation.
    fn source(&self, id: usize) -> String {
        id.to_string()
    }

    fn len(&self) -> usize {
        self.image_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Sample {
    image: ImageItem,
    mask: MaskItem,
    source: Option<String>,
}

/// Samples held in memory, for synthetic data and tests.
#[derive(Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sample and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ShapeMismatch`] if image and mask sizes differ.
    pub fn push(&mut self, image: ImageItem, mask: MaskItem) -> DatasetResult<usize> {
        self.push_sample(image, mask, None)
    }

    /// Adds a sample tagged with a source name and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::ShapeMismatch`] if image and mask sizes differ.
    pub fn push_with_source(
        &mut self,
        image: ImageItem,
        mask: MaskItem,
        source: impl Into<String>,
    ) -> DatasetResult<usize> {
        self.push_sample(image, mask, Some(source.into()))
    }

    fn push_sample(
        &mut self,
        image: ImageItem,
        mask: MaskItem,
        source: Option<String>,
    ) -> DatasetResult<usize> {
        let id = self.samples.len();
        if image.shape[..2] != mask.shape[..2] {
            return Err(DatasetError::ShapeMismatch {
                id: id.to_string(),
                expected: format!("mask of {}x{}", image.shape[0], image.shape[1]),
                actual: format!("{}x{}", mask.shape[0], mask.shape[1]),
            });
        }
        self.samples.push(Sample {
            image,
            mask,
            source,
        });
        Ok(id)
    }

    fn sample(&self, id: usize) -> DatasetResult<&Sample> {
        self.samples.get(id).ok_or(DatasetError::SampleNotFound {
            id,
            len: self.samples.len(),
        })
    }
}

impl SegmentationDataset for InMemoryDataset {
    fn image_ids(&self) -> Vec<usize> {
        (0..self.samples.len()).collect()
    }

    fn load_image(&self, id: usize) -> DatasetResult<ImageItem> {
        Ok(self.sample(id)?.image.clone())
    }

    fn load_mask(&self, id: usize) -> DatasetResult<MaskItem> {
        Ok(self.sample(id)?.mask.clone())
    }

    fn source(&self, id: usize) -> String {
        match self.samples.get(id).and_then(|sample| sample.source.clone()) {
            Some(source) => source,
            None => id.to_string(),
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
