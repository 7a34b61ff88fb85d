//! # maskseg
//!
//! Mask segmentation with residual and dense backbones on Burn.
//!
//! This crate assembles the [`SegmentationNet`](maskseg_model::SegmentationNet) with
//! its run directory and checkpoints ([`MaskModel`]), drives training from the
//! data pipeline in [`train`], and selects the compute backend from feature flags.
//!
//! ```no_run
//! use maskseg::{
//!     backend::{create_device, TrainingBackend},
//!     model::{MaskModelConfig, ModelMode},
//!     MaskModel,
//! };
//!
//! # fn main() -> maskseg::MaskModelResult<()> {
//! let mut model = MaskModel::<TrainingBackend>::new(
//!     ModelMode::Training,
//!     MaskModelConfig::new(),
//!     "logs",
//!     &create_device(),
//! )?;
//! let last = model.find_last()?;
//! model.load_weights(&last, true, &[])?;
//! # Ok(())
//! # }
//! ```

mod assembler;
pub mod backend;
pub mod callback;
pub mod checkpoint;
mod error;
pub mod training;

#[doc(inline)]
pub use assembler::{CheckpointRecorder, MaskModel, WEIGHT_COMPONENTS};
#[doc(inline)]
pub use callback::{EpochSummary, History, TrainingCallback};
#[doc(inline)]
pub use checkpoint::CheckpointLayout;
#[doc(inline)]
pub use error::{MaskModelError, MaskModelResult};
#[doc(inline)]
pub use maskseg_loss as loss;
#[doc(inline)]
pub use maskseg_metric as metric;
#[doc(inline)]
pub use maskseg_model as model;
#[doc(inline)]
pub use maskseg_train as train;
#[doc(inline)]
pub use training::{layer_regex, TrainOptions};
