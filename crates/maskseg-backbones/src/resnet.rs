//! Shallow residual graph producing five feature levels.

use burn::{
    nn::{
        conv::Conv2d,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use maskseg_extra_ops::{train_if, BatchNorm2d, BatchNormMode, ConvLayers, SelectTrainable};

use crate::{
    blocks::{batch_norm, conv2d, BlockName, ConvBlock, IdentityBlock, DENSE_DROPOUT},
    BackboneFeatures,
};

/// Configuration for the [residual graph](ResNetGraph).
#[derive(Config, Debug)]
pub struct ResNetGraphConfig {
    /// Channels of the input image.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Kernel size of the stem convolution, the stem pooling and every block.
    #[config(default = 5)]
    pub kernel_size: usize,
    /// Insert dropout after every conv block.
    #[config(default = false)]
    pub dropout: bool,
    /// Build the last downsampling stage.
    #[config(default = true)]
    pub stage4: bool,
}

impl ResNetGraphConfig {
    /// Initialize a [residual graph](ResNetGraph).
    pub fn init<B: Backend>(&self, mode: BatchNormMode, device: &B::Device) -> ResNetGraph<B> {
        let k = self.kernel_size;
        let stage = |stage: usize, block: char| BlockName::new("res", stage, block);

        let res2a = ConvBlock::new(64, k, [64, 64, 128], 1, &stage(2, 'a'), mode, device);
        let res2b = IdentityBlock::new(k, [128, 128, 128], &stage(2, 'b'), mode, device);
        let res3a = ConvBlock::new(128, k, [128, 128, 256], 2, &stage(3, 'a'), mode, device);
        let res3b = IdentityBlock::new(k, [256, 256, 256], &stage(3, 'b'), mode, device);

        // The last stage keeps the stage-5 layer names.
        let (res5a, res5b) = if self.stage4 {
            (
                Some(ConvBlock::new(256, k, [256, 256, 512], 2, &stage(5, 'a'), mode, device)),
                Some(IdentityBlock::new(k, [512, 512, 512], &stage(5, 'b'), mode, device)),
            )
        } else {
            (None, None)
        };

        ResNetGraph {
            bn_0: batch_norm(self.in_channels, mode, device),
            conv1: conv2d([self.in_channels, 64], k, 1, true, device),
            bn_conv1: batch_norm(64, mode, device),
            pool1: MaxPool2dConfig::new([k, k])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit((k - 1) / 2, (k - 1) / 2))
                .init(),
            res2a,
            res2b,
            res3a,
            res3b,
            res5a,
            res5b,
            dropout: self
                .dropout
                .then(|| DropoutConfig::new(DENSE_DROPOUT).init()),
            relu: Relu::new(),
        }
    }
}

/// Residual backbone.
///
/// Levels: `C0` full resolution after the stem convolution, `C1` and `C2` at 1/2,
/// `C3` at 1/4 and the optional `C4` at 1/8.
#[derive(Module, Debug)]
pub struct ResNetGraph<B: Backend> {
    bn_0: BatchNorm2d<B>,
    conv1: Conv2d<B>,
    bn_conv1: BatchNorm2d<B>,
    pool1: MaxPool2d,
    res2a: ConvBlock<B>,
    res2b: IdentityBlock<B>,
    res3a: ConvBlock<B>,
    res3b: IdentityBlock<B>,
    res5a: Option<ConvBlock<B>>,
    res5b: Option<IdentityBlock<B>>,
    dropout: Option<Dropout>,
    relu: Relu,
}

impl<B: Backend> ResNetGraph<B> {
    /// Channels of each feature level.
    pub fn out_channels(&self) -> [Option<usize>; 5] {
        let c4 = self.res5b.as_ref().map(|_| 512);
        [Some(64), Some(64), Some(128), Some(256), c4]
    }

    fn maybe_dropout(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        let x = self.bn_0.forward(input);
        let c0 = self.conv1.forward(x);
        let x = self.relu.forward(self.bn_conv1.forward(c0.clone()));
        let c1 = self.pool1.forward(x);

        let x = self.maybe_dropout(self.res2a.forward(c1.clone()));
        let c2 = self.res2b.forward(x);

        let x = self.maybe_dropout(self.res3a.forward(c2.clone()));
        let c3 = self.res3b.forward(x);

        let c4 = match (&self.res5a, &self.res5b) {
            (Some(conv), Some(identity)) => {
                let x = self.maybe_dropout(conv.forward(c3.clone()));
                Some(identity.forward(x))
            }
            _ => None,
        };

        [Some(c0), Some(c1), Some(c2), Some(c3), c4]
    }
}

impl<B: Backend> ConvLayers<B> for ResNetGraph<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        let mut convs = vec![&self.conv1];
        convs.extend(self.res2a.conv_layers());
        convs.extend(self.res2b.conv_layers());
        convs.extend(self.res3a.conv_layers());
        convs.extend(self.res3b.conv_layers());
        if let Some(block) = &self.res5a {
            convs.extend(block.conv_layers());
        }
        if let Some(block) = &self.res5b {
            convs.extend(block.conv_layers());
        }
        convs
    }
}

impl<B: Backend> SelectTrainable for ResNetGraph<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        Self {
            bn_0: train_if(self.bn_0, "bn_0", is_trainable),
            conv1: train_if(self.conv1, "conv1", is_trainable),
            bn_conv1: train_if(self.bn_conv1, "bn_conv1", is_trainable),
            res2a: self.res2a.select_trainable(is_trainable),
            res2b: self.res2b.select_trainable(is_trainable),
            res3a: self.res3a.select_trainable(is_trainable),
            res3b: self.res3b.select_trainable(is_trainable),
            res5a: self.res5a.map(|block| block.select_trainable(is_trainable)),
            res5b: self.res5b.map(|block| block.select_trainable(is_trainable)),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, tensor::Distribution};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn resnet_graph_halves_resolution_per_stage() {
        let device = Default::default();
        let graph = ResNetGraphConfig::new()
            .with_kernel_size(3)
            .init::<TestBackend>(BatchNormMode::Train, &device);
        let input =
            Tensor::<TestBackend, 4>::random([1, 3, 16, 24], Distribution::Default, &device);

        let features = graph.forward(input);

        let dims: Vec<_> = features
            .iter()
            .map(|f| f.as_ref().map(|t| t.dims()))
            .collect();
        assert_eq!(dims[0], Some([1, 64, 16, 24]));
        assert_eq!(dims[1], Some([1, 64, 8, 12]));
        assert_eq!(dims[2], Some([1, 128, 8, 12]));
        assert_eq!(dims[3], Some([1, 256, 4, 6]));
        assert_eq!(dims[4], Some([1, 512, 2, 3]));
    }

    #[test]
    fn resnet_graph_without_stage4_leaves_placeholder() {
        let device = Default::default();
        let graph = ResNetGraphConfig::new()
            .with_kernel_size(3)
            .with_stage4(false)
            .with_dropout(true)
            .init::<TestBackend>(BatchNormMode::Frozen, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device);

        let features = graph.forward(input);

        assert!(features[4].is_none());
        assert_eq!(graph.out_channels()[4], None);
        assert_eq!(features[3].as_ref().map(|t| t.dims()), Some([1, 256, 2, 2]));
        // stem, two conv blocks and two identity blocks
        assert_eq!(graph.conv_layers().len(), 1 + 4 + 3 + 4 + 3);
    }
}
