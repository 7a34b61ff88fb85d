//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the operations the maskseg backbones need that are not
//! available in the core Burn framework: batch normalization with an explicit
//! statistics mode, bilinear crop-and-resize from normalized boxes, and the
//! named-layer traits used for weight decay and layer freezing.

mod batch_norm;
mod crop_and_resize;
mod layers;

// Convenient re-exports
#[doc(inline)]
pub use batch_norm::{BatchNorm2d, BatchNorm2dConfig, BatchNormMode};
#[doc(inline)]
pub use crop_and_resize::{crop_and_resize, zero_pad2d};
#[doc(inline)]
pub use layers::{l2_penalty, train_if, ConvLayers, SelectTrainable};
