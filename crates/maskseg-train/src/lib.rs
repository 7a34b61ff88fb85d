//! Data pipeline for training maskseg models: datasets, augmentation, batch
//! generation and background feeding.

pub mod augmentation;
pub mod batcher;
pub mod dataset;
pub mod error;
pub mod feeder;
pub mod generator;
pub mod rle;
pub mod rle_dataset;

pub use augmentation::{AugmentationConfig, AugmentationMethod, ImageAugmentor};
pub use batcher::MaskBatcher;
pub use dataset::{ImageItem, InMemoryDataset, MaskItem, SegmentationDataset};
pub use error::{DatasetError, DatasetResult};
pub use feeder::{ParallelFeeder, QUEUE_CAPACITY};
pub use generator::{mold_image, DataGenerator, GeneratorConfig, MaskSample, RawBatch};
pub use rle::{rle_decode, rle_encode};
pub use rle_dataset::RleCsvDataset;
