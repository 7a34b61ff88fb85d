//! # maskseg model
//!
//! The segmentation network and everything needed to build it from a configuration.
//!
//! ## Modules
//!
//! - `config`: [`MaskModelConfig`], the model and training hyperparameters, and
//!   [`ModelMode`].
//! - `error`: [`ModelError`] and [`ModelResult`].
//! - `layers`: parameter-free graph layers ([`PoiLayer`], [`SplitConcatLayer`], ...).
//! - `decoder`: the upsampling mask decoder.
//! - `network`: [`SegmentationNet`], backbone plus decoder plus training objective.
//! - `training`: [`MaskBatch`] and [`MaskOutput`], shared with the data pipeline.
//!
//! ## Example
//!
//! ```no_run
//! use burn::backend::NdArray;
//! use maskseg_model::{MaskModelConfig, ModelMode};
//!
//! let config = MaskModelConfig::new();
//! let _net = config
//!     .init::<NdArray<f32>>(ModelMode::Inference, &Default::default())
//!     .expect("default configuration is valid");
//! ```

mod config;
mod decoder;
mod error;
pub mod layers;
mod network;
mod training;

#[doc(inline)]
pub use config::{MaskModelConfig, ModelMode, MASK_LOSS_KEY};
#[doc(inline)]
pub use decoder::{Decoder, DecoderConfig, DecoderStage};
#[doc(inline)]
pub use error::{ModelError, ModelResult};
#[doc(inline)]
pub use layers::{
    generate_boxes_by_scale, ConcatFeatureLayer, FeatureTransformLayer, FlatConvLayer, PoiLayer,
    PoiLayerConfig, SplitConcatLayer,
};
#[doc(inline)]
pub use network::{SegmentationNet, SegmentationNetRecord};
#[doc(inline)]
pub use training::{MaskBatch, MaskOutput};

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    pub type TestBackend = NdArray<f32>;

    pub type TestAutodiffBackend = Autodiff<TestBackend>;
}
