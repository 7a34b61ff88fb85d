//! Backbone graphs for maskseg.
//!
//! Four interchangeable feature extractors share one output contract: a fixed
//! array of five feature levels, deepest last, with `None` for stages that are
//! disabled. Each enabled level has half the resolution of the previous one, or
//! the same resolution when the level only adds blocks without downsampling.
//!
//! - [`ResNetGraph`]: shallow residual network with a full resolution `C0` level.
//! - [`DenseGraph`]: deep densely connected network.
//! - [`DenseSimpleGraph`]: short and long variants with one dense stage per level.

pub mod blocks;
mod dense;
mod dense_simple;
mod resnet;

use burn::prelude::*;
use burn::nn::conv::Conv2d;
use maskseg_extra_ops::{BatchNormMode, ConvLayers, SelectTrainable};
use serde::{Deserialize, Serialize};

pub use dense::{DenseGraph, DenseGraphConfig};
pub use dense_simple::{DenseSimpleGraph, DenseSimpleLongConfig, DenseSimpleShortConfig};
pub use resnet::{ResNetGraph, ResNetGraphConfig};

/// Feature levels produced by a backbone, shallowest first.
pub type BackboneFeatures<B> = [Option<Tensor<B, 4>>; 5];

/// Available backbone strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneKind {
    /// Residual graph.
    #[serde(rename = "resnet")]
    ResNet,
    /// Deep dense graph.
    #[serde(rename = "dense")]
    Dense,
    /// Short simple dense graph, `dense_res_s`.
    #[serde(rename = "dense_res_s")]
    DenseSimpleShort,
    /// Long simple dense graph, `dense_res_l`.
    #[serde(rename = "dense_res_l")]
    DenseSimpleLong,
}

impl BackboneKind {
    /// Short name used in configuration files and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResNet => "resnet",
            Self::Dense => "dense",
            Self::DenseSimpleShort => "dense_res_s",
            Self::DenseSimpleLong => "dense_res_l",
        }
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backbone selection and the flags the graphs understand.
///
/// Flags that do not apply to the selected [`BackboneKind`] are ignored.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Backbone strategy.
    #[config(default = "BackboneKind::ResNet")]
    pub kind: BackboneKind,
    /// Channels of the input image.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Kernel size of the residual graph.
    #[config(default = 5)]
    pub kernel_size: usize,
    /// Dropout after each conv block of the residual graph.
    #[config(default = false)]
    pub dropout: bool,
    /// Build the last stage of the residual graph and the short dense graph.
    #[config(default = true)]
    pub stage4: bool,
    /// Build the fifth stage of the deep dense graph.
    #[config(default = false)]
    pub stage5: bool,
}

impl BackboneConfig {
    /// Initialize the selected [`Backbone`].
    pub fn init<B: Backend>(&self, mode: BatchNormMode, device: &B::Device) -> Backbone<B> {
        match self.kind {
            BackboneKind::ResNet => Backbone::ResNet(
                ResNetGraphConfig::new()
                    .with_in_channels(self.in_channels)
                    .with_kernel_size(self.kernel_size)
                    .with_dropout(self.dropout)
                    .with_stage4(self.stage4)
                    .init(mode, device),
            ),
            BackboneKind::Dense => Backbone::Dense(
                DenseGraphConfig::new()
                    .with_in_channels(self.in_channels)
                    .with_stage5(self.stage5)
                    .init(mode, device),
            ),
            BackboneKind::DenseSimpleShort => Backbone::DenseSimple(
                DenseSimpleShortConfig::new()
                    .with_in_channels(self.in_channels)
                    .with_stage4(self.stage4)
                    .init(mode, device),
            ),
            BackboneKind::DenseSimpleLong => Backbone::DenseSimple(
                DenseSimpleLongConfig::new()
                    .with_in_channels(self.in_channels)
                    .init(mode, device),
            ),
        }
    }
}

/// A backbone graph.
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    /// Residual graph.
    ResNet(ResNetGraph<B>),
    /// Deep dense graph.
    Dense(DenseGraph<B>),
    /// Short or long simple dense graph.
    DenseSimple(DenseSimpleGraph<B>),
}

impl<B: Backend> Backbone<B> {
    /// Extract the feature levels of `input`.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, in_channels, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        match self {
            Self::ResNet(graph) => graph.forward(input),
            Self::Dense(graph) => graph.forward(input),
            Self::DenseSimple(graph) => graph.forward(input),
        }
    }

    /// Channels of each feature level, `None` for disabled levels.
    pub fn out_channels(&self) -> [Option<usize>; 5] {
        match self {
            Self::ResNet(graph) => graph.out_channels(),
            Self::Dense(graph) => graph.out_channels(),
            Self::DenseSimple(graph) => graph.out_channels(),
        }
    }
}

impl<B: Backend> ConvLayers<B> for Backbone<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        match self {
            Self::ResNet(graph) => graph.conv_layers(),
            Self::Dense(graph) => graph.conv_layers(),
            Self::DenseSimple(graph) => graph.conv_layers(),
        }
    }
}

impl<B: Backend> SelectTrainable for Backbone<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        match self {
            Self::ResNet(graph) => Self::ResNet(graph.select_trainable(is_trainable)),
            Self::Dense(graph) => Self::Dense(graph.select_trainable(is_trainable)),
            Self::DenseSimple(graph) => Self::DenseSimple(graph.select_trainable(is_trainable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn backbone_config_selects_strategy() {
        let device = Default::default();
        let config = BackboneConfig::new().with_kind(BackboneKind::DenseSimpleLong);

        let backbone = config.init::<TestBackend>(BatchNormMode::Train, &device);

        assert!(matches!(backbone, Backbone::DenseSimple(_)));
        assert_eq!(backbone.out_channels()[4], None);
    }

    #[test]
    fn backbone_forward_matches_reported_channels() {
        let device = Default::default();
        let backbone = BackboneConfig::new()
            .with_kernel_size(3)
            .init::<TestBackend>(BatchNormMode::Train, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);

        let features = backbone.forward(input);

        for (feature, channels) in features.iter().zip(backbone.out_channels()) {
            assert_eq!(feature.as_ref().map(|t| t.dims()[1]), channels);
        }
    }

    #[test]
    fn backbone_kind_uses_net_names() {
        let kind: BackboneKind = serde_json::from_str("\"dense_res_s\"").unwrap();
        assert_eq!(kind, BackboneKind::DenseSimpleShort);
        assert_eq!(BackboneKind::DenseSimpleLong.to_string(), "dense_res_l");
    }
}
