//! Endless batch generation over a [`SegmentationDataset`].

use std::{collections::HashSet, sync::Arc};

use burn::prelude::*;
use maskseg_model::MaskModelConfig;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    augmentation::{AugmentationConfig, ImageAugmentor},
    dataset::{ImageItem, MaskItem, SegmentationDataset},
    error::{DatasetError, DatasetResult},
};

/// Settings of a [`DataGenerator`].
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 2)]
    pub batch_size: usize,

    /// Per-channel mean subtracted from every image.
    #[config(default = "vec![123.7, 116.8, 103.9]")]
    pub mean_pixel: Vec<f32>,

    /// Reshuffle the sample order each time the generator wraps around.
    #[config(default = true)]
    pub shuffle: bool,

    #[config(default = "AugmentationConfig::none()")]
    pub augmentation: AugmentationConfig,

    /// Sources whose samples are never augmented.
    #[config(default = "Vec::new()")]
    pub no_augmentation_sources: Vec<String>,

    #[config(default = 0)]
    pub seed: u64,

    /// Generation aborts once more samples than this fail in a row.
    #[config(default = 5)]
    pub max_consecutive_errors: usize,
}

impl GeneratorConfig {
    /// Shuffled, augmented generation for training `model`.
    pub fn training(model: &MaskModelConfig, augmentation: AugmentationConfig) -> Self {
        Self::new()
            .with_batch_size(model.batch_size)
            .with_mean_pixel(model.mean_pixel.clone())
            .with_augmentation(augmentation)
            .with_seed(model.seed)
    }

    /// Generation in dataset order without augmentation, for validating `model`.
    pub fn validation(model: &MaskModelConfig) -> Self {
        Self::new()
            .with_batch_size(model.batch_size)
            .with_mean_pixel(model.mean_pixel.clone())
            .with_shuffle(false)
            .with_seed(model.seed)
    }
}

/// One molded image with its masks.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskSample {
    pub id: usize,
    pub image: ImageItem,
    pub mask: MaskItem,
}

/// `batch_size` samples of equal size, still on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub samples: Vec<MaskSample>,
}

impl RawBatch {
    pub fn ids(&self) -> Vec<usize> {
        self.samples.iter().map(|sample| sample.id).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Cycles through a dataset forever, producing [`RawBatch`]es.
///
/// The first pass follows dataset order. Each later pass is reshuffled when
/// shuffling is enabled. A sample that fails to load is logged and skipped; more
/// than `max_consecutive_errors` failures in a row end the generation with
/// [`DatasetError::TooManyErrors`].
pub struct DataGenerator<D: SegmentationDataset + ?Sized> {
    dataset: Arc<D>,
    image_ids: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    mean_pixel: Vec<f32>,
    augmentor: ImageAugmentor,
    no_augmentation_sources: HashSet<String>,
    max_consecutive_errors: usize,
    error_count: usize,
    rng: StdRng,
    aborted: bool,
}

impl<D: SegmentationDataset + ?Sized> DataGenerator<D> {
    /// # Errors
    ///
    /// Returns [`DatasetError::EmptyDataset`] if the dataset has no samples, and
    /// [`DatasetError::ShapeMismatch`] for a zero batch size.
    pub fn new(dataset: Arc<D>, config: &GeneratorConfig) -> DatasetResult<Self> {
        let image_ids = dataset.image_ids();
        if image_ids.is_empty() {
            return Err(DatasetError::EmptyDataset);
        }
        if config.batch_size == 0 {
            return Err(DatasetError::ShapeMismatch {
                id: "batch".to_string(),
                expected: "at least one sample per batch".to_string(),
                actual: "0".to_string(),
            });
        }

        Ok(Self {
            dataset,
            image_ids,
            cursor: 0,
            batch_size: config.batch_size,
            shuffle: config.shuffle,
            mean_pixel: config.mean_pixel.clone(),
            augmentor: ImageAugmentor::new(config.augmentation.clone(), config.seed),
            no_augmentation_sources: config.no_augmentation_sources.iter().cloned().collect(),
            max_consecutive_errors: config.max_consecutive_errors,
            error_count: 0,
            rng: StdRng::seed_from_u64(config.seed),
            aborted: false,
        })
    }

    /// Start the first pass at position `offset` of the dataset order.
    #[must_use]
    pub fn starting_at(mut self, offset: usize) -> Self {
        self.cursor = offset % self.image_ids.len();
        self
    }

    /// Number of samples in one pass.
    pub fn epoch_len(&self) -> usize {
        self.image_ids.len()
    }

    /// Collect the next `batch_size` samples.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::TooManyErrors`] once more than `max_consecutive_errors`
    /// samples failed in a row.
    pub fn next_batch(&mut self) -> DatasetResult<RawBatch> {
        let mut samples: Vec<MaskSample> = Vec::with_capacity(self.batch_size);

        while samples.len() < self.batch_size {
            let id = self.next_id();
            let loaded = self.load_sample(id).and_then(|sample| {
                match samples.first() {
                    Some(first) if first.image.shape != sample.image.shape => {
                        Err(DatasetError::ShapeMismatch {
                            id: id.to_string(),
                            expected: format!("{:?} like the rest of the batch", first.image.shape),
                            actual: format!("{:?}", sample.image.shape),
                        })
                    }
                    _ => Ok(sample),
                }
            });

            match loaded {
                Ok(sample) => {
                    self.error_count = 0;
                    samples.push(sample);
                }
                Err(err) => {
                    self.error_count += 1;
                    tracing::error!(image_id = id, error = %err, "Error processing sample");
                    if self.error_count > self.max_consecutive_errors {
                        return Err(DatasetError::TooManyErrors {
                            count: self.error_count,
                            source: Box::new(err),
                        });
                    }
                }
            }
        }

        Ok(RawBatch { samples })
    }

    fn next_id(&mut self) -> usize {
        if self.cursor >= self.image_ids.len() {
            self.cursor = 0;
            if self.shuffle {
                self.image_ids.shuffle(&mut self.rng);
            }
        }
        let id = self.image_ids[self.cursor];
        self.cursor += 1;
        id
    }

    fn load_sample(&mut self, id: usize) -> DatasetResult<MaskSample> {
        let image = self.dataset.load_image(id)?;
        let mask = self.dataset.load_mask(id)?;
        if image.shape[..2] != mask.shape[..2] {
            return Err(DatasetError::ShapeMismatch {
                id: id.to_string(),
                expected: format!("mask of {}x{}", image.shape[0], image.shape[1]),
                actual: format!("{}x{}", mask.shape[0], mask.shape[1]),
            });
        }

        let (image, mask) = if self.augmentor.is_enabled()
            && !self.no_augmentation_sources.contains(&self.dataset.source(id))
        {
            self.augmentor.augment(image, mask)
        } else {
            (image, mask)
        };

        Ok(MaskSample {
            id,
            image: mold_image(image, &self.mean_pixel)?,
            mask,
        })
    }
}

impl<D: SegmentationDataset + ?Sized> Iterator for DataGenerator<D> {
    type Item = DatasetResult<RawBatch>;

    /// Never ends unless generation aborted.
    fn next(&mut self) -> Option<Self::Item> {
        if self.aborted {
            return None;
        }
        let batch = self.next_batch();
        if matches!(batch, Err(DatasetError::TooManyErrors { .. })) {
            self.aborted = true;
        }
        Some(batch)
    }
}

/// Subtract the per-channel mean from every pixel.
///
/// # Errors
///
/// Returns [`DatasetError::ShapeMismatch`] if `mean_pixel` does not have one value
/// per channel.
pub fn mold_image(mut image: ImageItem, mean_pixel: &[f32]) -> DatasetResult<ImageItem> {
    let channels = image.shape[2];
    if mean_pixel.len() != channels {
        return Err(DatasetError::ShapeMismatch {
            id: "mean_pixel".to_string(),
            expected: format!("{channels} values"),
            actual: format!("{} values", mean_pixel.len()),
        });
    }
    for pixel in image.data.chunks_exact_mut(channels) {
        pixel
            .iter_mut()
            .zip(mean_pixel)
            .for_each(|(value, mean)| *value -= mean);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{augmentation::AugmentationMethod, dataset::tests::constant_dataset};

    fn config(batch_size: usize) -> GeneratorConfig {
        GeneratorConfig::new()
            .with_batch_size(batch_size)
            .with_mean_pixel(vec![0.0; 3])
            .with_shuffle(false)
    }

    #[test]
    fn batches_follow_dataset_order_and_wrap() {
        let dataset = Arc::new(constant_dataset(5, 2, 1));
        let mut generator = DataGenerator::new(dataset, &config(2)).unwrap();

        assert_eq!(generator.next_batch().unwrap().ids(), vec![0, 1]);
        assert_eq!(generator.next_batch().unwrap().ids(), vec![2, 3]);
        assert_eq!(generator.next_batch().unwrap().ids(), vec![4, 0]);
    }

    #[test]
    fn shuffling_keeps_first_pass_ordered_then_permutes() {
        let dataset = Arc::new(constant_dataset(6, 1, 1));
        let mut generator =
            DataGenerator::new(dataset, &config(6).with_shuffle(true).with_seed(9)).unwrap();

        assert_eq!(generator.next_batch().unwrap().ids(), vec![0, 1, 2, 3, 4, 5]);
        let mut second = generator.next_batch().unwrap().ids();
        second.sort_unstable();
        assert_eq!(second, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn shuffled_wrap_completes_batch_from_new_order() {
        for seed in 0..5 {
            let dataset = Arc::new(constant_dataset(5, 1, 1));
            let mut generator =
                DataGenerator::new(dataset, &config(2).with_shuffle(true).with_seed(seed))
                    .unwrap();
            let mut order: Vec<usize> = (0..5).collect();
            order.shuffle(&mut StdRng::seed_from_u64(seed));

            assert_eq!(generator.next_batch().unwrap().ids(), vec![0, 1]);
            assert_eq!(generator.next_batch().unwrap().ids(), vec![2, 3]);
            assert_eq!(generator.next_batch().unwrap().ids(), vec![4, order[0]]);
            assert_eq!(generator.next_batch().unwrap().ids(), vec![order[1], order[2]]);
        }
    }

    #[test]
    fn images_are_molded() {
        let dataset = Arc::new(constant_dataset(2, 1, 1));
        let mut generator =
            DataGenerator::new(dataset, &config(1).with_mean_pixel(vec![1.0, 2.0, 3.0])).unwrap();

        generator.next_batch().unwrap();
        let batch = generator.next_batch().unwrap();

        assert_eq!(batch.samples[0].image.data, vec![0.0, -1.0, -2.0]);
    }

    #[test]
    fn mold_rejects_wrong_mean_length() {
        let image = ImageItem::new(vec![0.0; 3], [1, 1, 3]).unwrap();
        assert!(mold_image(image, &[1.0]).is_err());
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let dataset = Arc::new(constant_dataset(0, 1, 1));
        let result = DataGenerator::new(dataset, &config(1));
        assert!(matches!(result, Err(DatasetError::EmptyDataset)));
    }

    #[test]
    fn excluded_sources_are_not_augmented() {
        let mut dataset = constant_dataset(0, 2, 1);
        let ramp = ImageItem::new((0..12).map(|v| v as f32).collect(), [2, 2, 3]).unwrap();
        let mask = MaskItem::new(vec![1.0, 0.0, 0.0, 0.0], [2, 2, 1]).unwrap();
        dataset.push_with_source(ramp.clone(), mask, "real").unwrap();

        let flip = AugmentationConfig {
            methods: vec![AugmentationMethod::HorizontalFlip { probability: 1.0 }],
        };
        let mut augmented = DataGenerator::new(
            Arc::new(dataset),
            &config(1).with_augmentation(flip.clone()),
        )
        .unwrap();
        assert_ne!(augmented.next_batch().unwrap().samples[0].image, ramp);

        let mut dataset = constant_dataset(0, 2, 1);
        let mask = MaskItem::new(vec![1.0, 0.0, 0.0, 0.0], [2, 2, 1]).unwrap();
        dataset.push_with_source(ramp.clone(), mask, "real").unwrap();
        let mut excluded = DataGenerator::new(
            Arc::new(dataset),
            &config(1)
                .with_augmentation(flip)
                .with_no_augmentation_sources(vec!["real".to_string()]),
        )
        .unwrap();
        assert_eq!(excluded.next_batch().unwrap().samples[0].image, ramp);
    }

    /// Fails every sample whose id is in `failing`.
    struct FlakyDataset {
        inner: crate::dataset::InMemoryDataset,
        failing: Vec<usize>,
        loads: AtomicUsize,
    }

    impl SegmentationDataset for FlakyDataset {
        fn image_ids(&self) -> Vec<usize> {
            self.inner.image_ids()
        }

        fn load_image(&self, id: usize) -> DatasetResult<ImageItem> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&id) {
                return Err(DatasetError::SampleNotFound { id, len: 0 });
            }
            self.inner.load_image(id)
        }

        fn load_mask(&self, id: usize) -> DatasetResult<MaskItem> {
            self.inner.load_mask(id)
        }
    }

    #[test]
    fn failing_samples_are_skipped() {
        let dataset = Arc::new(FlakyDataset {
            inner: constant_dataset(4, 1, 1),
            failing: vec![1],
            loads: AtomicUsize::new(0),
        });
        let mut generator = DataGenerator::new(dataset, &config(2)).unwrap();

        assert_eq!(generator.next_batch().unwrap().ids(), vec![0, 2]);
    }

    #[test]
    fn too_many_consecutive_errors_abort() {
        let dataset = Arc::new(FlakyDataset {
            inner: constant_dataset(3, 1, 1),
            failing: vec![0, 1, 2],
            loads: AtomicUsize::new(0),
        });
        let mut generator = DataGenerator::new(dataset.clone(), &config(1)).unwrap();

        let first = generator.next();
        assert!(matches!(
            first,
            Some(Err(DatasetError::TooManyErrors { count: 6, .. }))
        ));
        assert!(generator.next().is_none());
        assert_eq!(dataset.loads.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn starting_offset_rotates_first_pass() {
        let dataset = Arc::new(constant_dataset(3, 1, 1));
        let mut generator = DataGenerator::new(dataset, &config(3))
            .unwrap()
            .starting_at(4);

        assert_eq!(generator.next_batch().unwrap().ids(), vec![1, 2, 0]);
    }
}
