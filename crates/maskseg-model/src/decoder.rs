//! # Mask decoder
//!
//! Walks the backbone feature levels from the deepest to the shallowest. Every
//! stage brings the running tensor to the resolution of the next skip level with
//! nearest-neighbour upsampling (a no-op when the resolutions already match),
//! concatenates the skip on the channel axis and refines the result with two
//! `conv -> batch norm -> relu` units. Stage `i` uses `32 << i` filters, so the
//! residual graph gets 256, 128, 64 and 32 channels for levels 3 to 0.
//!
//! A final convolution projects to one channel per class, followed by a sigmoid.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        activation::sigmoid,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use maskseg_backbones::BackboneFeatures;
use maskseg_extra_ops::{
    train_if, BatchNorm2d, BatchNorm2dConfig, BatchNormMode, ConvLayers, SelectTrainable,
};

use crate::{
    error::{ModelError, ModelResult},
    layers::ConcatFeatureLayer,
};

/// Nearest-neighbour resize of the spatial dimensions, skipped when they already match.
fn resize_nearest<B: Backend>(tensor: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = tensor.dims();
    if [height, width] == size {
        return tensor;
    }
    interpolate(tensor, size, InterpolateOptions::new(InterpolateMode::Nearest))
}

fn conv<B: Backend>(channels: [usize; 2], kernel_size: usize, device: &B::Device) -> Conv2d<B> {
    let padding = (kernel_size - 1) / 2;
    Conv2dConfig::new(channels, [kernel_size, kernel_size])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

/// Configuration for the [decoder](Decoder).
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Channels of each backbone level, `None` for disabled levels.
    pub channels: [Option<usize>; 5],
    /// Output channels of the final projection.
    pub num_classes: usize,
    /// Kernel size of every decoder convolution.
    #[config(default = 5)]
    pub kernel_size: usize,
    /// Epsilon of the decoder normalizations.
    #[config(default = 1.1e-5)]
    pub epsilon: f64,
}

impl DecoderConfig {
    /// Initialize a [decoder](Decoder).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] when no backbone level is enabled.
    pub fn init<B: Backend>(
        &self,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> ModelResult<Decoder<B>> {
        let levels: Vec<(usize, usize)> = self
            .channels
            .iter()
            .enumerate()
            .filter_map(|(level, channels)| channels.map(|c| (level, c)))
            .collect();

        let Some((&(_, deepest_channels), skips)) = levels.split_last() else {
            return Err(ModelError::InvalidConfiguration {
                reason: "the decoder needs at least one backbone level".to_string(),
            });
        };

        let mut channels = deepest_channels;
        let stages = skips
            .iter()
            .rev()
            .map(|&(level, skip_channels)| {
                let stage = DecoderStage::new(
                    channels + skip_channels,
                    32 << level,
                    level,
                    self,
                    mode,
                    device,
                );
                channels = stage.out_channels;
                stage
            })
            .collect();

        Ok(Decoder {
            stages,
            final_conv: conv([channels, self.num_classes], self.kernel_size, device),
        })
    }
}

/// Upsample, concatenate one skip level and refine.
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    concat: ConcatFeatureLayer,
    conv_1: Conv2d<B>,
    bn_1: BatchNorm2d<B>,
    conv_2: Conv2d<B>,
    bn_2: BatchNorm2d<B>,
    relu: Relu,
    out_channels: usize,
    level: Ignored<usize>,
}

impl<B: Backend> DecoderStage<B> {
    fn new(
        in_channels: usize,
        filters: usize,
        level: usize,
        config: &DecoderConfig,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let batch_norm = || {
            BatchNorm2dConfig::new(filters)
                .with_epsilon(config.epsilon)
                .with_mode(mode)
                .init(device)
        };

        Self {
            concat: ConcatFeatureLayer::new(),
            conv_1: conv([in_channels, filters], config.kernel_size, device),
            bn_1: batch_norm(),
            conv_2: conv([filters, filters], config.kernel_size, device),
            bn_2: batch_norm(),
            relu: Relu::new(),
            out_channels: filters,
            level: Ignored(level),
        }
    }

    /// Backbone level this stage merges.
    pub fn level(&self) -> usize {
        *self.level
    }

    /// Channels of the stage output.
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, input: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = skip.dims();
        let x = resize_nearest(input, [height, width]);
        let x = self.concat.forward(vec![x, skip]);

        let x = self.relu.forward(self.bn_1.forward(self.conv_1.forward(x)));
        self.relu.forward(self.bn_2.forward(self.conv_2.forward(x)))
    }
}

/// Decoder turning backbone features into per-class mask probabilities.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    stages: Vec<DecoderStage<B>>,
    final_conv: Conv2d<B>,
}

impl<B: Backend> Decoder<B> {
    /// Decoder stages, deepest first.
    pub fn stages(&self) -> &[DecoderStage<B>] {
        &self.stages
    }

    /// Decode the backbone features into masks of `output_size`.
    ///
    /// # Shapes
    ///
    /// - output: `[batch_size, num_classes, output_size[0], output_size[1]]`, in `(0, 1)`
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTensorShape`] when the enabled feature levels do
    /// not match the levels the decoder was built for.
    pub fn forward(
        &self,
        features: BackboneFeatures<B>,
        output_size: [usize; 2],
    ) -> ModelResult<Tensor<B, 4>> {
        let mut levels: Vec<Tensor<B, 4>> = features.into_iter().flatten().collect();
        let found = levels.len();
        let deepest = levels.pop();

        let (Some(mut x), true) = (deepest, found == self.stages.len() + 1) else {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("{} feature levels", self.stages.len() + 1),
                actual: format!("{found} feature levels"),
            });
        };
        for (stage, skip) in self.stages.iter().zip(levels.into_iter().rev()) {
            x = stage.forward(x, skip);
        }

        let x = resize_nearest(x, output_size);
        Ok(sigmoid(self.final_conv.forward(x)))
    }
}

impl<B: Backend> ConvLayers<B> for Decoder<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        let mut convs: Vec<&Conv2d<B>> = self
            .stages
            .iter()
            .flat_map(|stage| [&stage.conv_1, &stage.conv_2])
            .collect();
        convs.push(&self.final_conv);
        convs
    }
}

impl<B: Backend> SelectTrainable for DecoderStage<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let level = *self.level;

        Self {
            conv_1: train_if(self.conv_1, &format!("final_conv_f_{level}_1"), is_trainable),
            bn_1: train_if(self.bn_1, &format!("final_bn_f_{level}_1"), is_trainable),
            conv_2: train_if(self.conv_2, &format!("final_conv_f_{level}_2"), is_trainable),
            bn_2: train_if(self.bn_2, &format!("final_bn_f_{level}_2"), is_trainable),
            ..self
        }
    }
}

impl<B: Backend> SelectTrainable for Decoder<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        Self {
            stages: self
                .stages
                .into_iter()
                .map(|stage| stage.select_trainable(is_trainable))
                .collect(),
            final_conv: train_if(self.final_conv, "final_conv_f_final", is_trainable),
        }
    }
}
