//! Parameter-free graph layers that rearrange feature maps.
//!
//! - [`PoiLayer`]: pools a fixed pyramid of boxes out of a feature map.
//! - [`ConcatFeatureLayer`]: channel concatenation.
//! - [`SplitConcatLayer`]: folds spatial quadrants into channels.
//! - [`FeatureTransformLayer`] and [`FlatConvLayer`]: stack feature maps on a new
//!   axis, then sum and flatten the stack.

mod concat;
mod feature_transform;
mod poi;
mod split_concat;

pub use concat::ConcatFeatureLayer;
pub use feature_transform::{FeatureTransformLayer, FlatConvLayer};
pub use poi::{generate_boxes_by_scale, PoiLayer, PoiLayerConfig};
pub use split_concat::SplitConcatLayer;
