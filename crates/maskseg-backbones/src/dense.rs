//! Deep densely connected graph.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use maskseg_extra_ops::{
    train_if, zero_pad2d, BatchNorm2d, BatchNormMode, ConvLayers, SelectTrainable,
};

use crate::{
    blocks::{batch_norm, BlockName, DenseConvBlock, DenseIdentityStack},
    BackboneFeatures,
};

const NET_NAME: &str = "dense_res";

/// Configuration for the [dense graph](DenseGraph).
#[derive(Config, Debug)]
pub struct DenseGraphConfig {
    /// Channels of the input image.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Build the fifth stage.
    #[config(default = false)]
    pub stage5: bool,
}

impl DenseGraphConfig {
    /// Initialize a [dense graph](DenseGraph).
    pub fn init<B: Backend>(&self, mode: BatchNormMode, device: &B::Device) -> DenseGraph<B> {
        let conv1 = Conv2dConfig::new([self.in_channels, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Valid)
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device);

        let stage2_conv = DenseConvBlock::new(
            64,
            3,
            [16, 16, 64],
            1,
            &BlockName::new(NET_NAME, 2, 'a'),
            mode,
            device,
        );
        let stage2 = DenseIdentityStack::new(
            stage2_conv.out_channels(),
            3,
            [16, 16, 64],
            2,
            NET_NAME,
            2,
            'b',
            mode,
            device,
        );

        let stage3_conv = DenseConvBlock::new(
            stage2.out_channels(),
            3,
            [32, 32, 128],
            2,
            &BlockName::new(NET_NAME, 3, 'a'),
            mode,
            device,
        );
        let stage3 = DenseIdentityStack::new(
            stage3_conv.out_channels(),
            3,
            [32, 32, 128],
            2,
            NET_NAME,
            3,
            'b',
            mode,
            device,
        );

        let stage4_conv = DenseConvBlock::new(
            stage3.out_channels(),
            3,
            [128, 128, 512],
            2,
            &BlockName::new(NET_NAME, 4, 'a'),
            mode,
            device,
        );
        let stage4 = DenseIdentityStack::new(
            stage4_conv.out_channels(),
            3,
            [128, 128, 512],
            5,
            NET_NAME,
            4,
            'b',
            mode,
            device,
        );

        let (stage5_conv, stage5) = if self.stage5 {
            let conv = DenseConvBlock::new(
                stage4.out_channels(),
                3,
                [512, 512, 2048],
                2,
                &BlockName::new(NET_NAME, 5, 'a'),
                mode,
                device,
            );
            let identity = DenseIdentityStack::new(
                conv.out_channels(),
                3,
                [512, 512, 2048],
                2,
                NET_NAME,
                5,
                'b',
                mode,
                device,
            );
            (Some(conv), Some(identity))
        } else {
            (None, None)
        };

        DenseGraph {
            conv1,
            bn_conv1: batch_norm(64, mode, device),
            pool1: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            stage2_conv,
            stage2,
            stage3_conv,
            stage3,
            stage4_conv,
            stage4,
            stage5_conv,
            stage5,
            relu: Relu::new(),
        }
    }
}

/// Densely connected backbone.
///
/// Levels: `C1` and `C2` at 1/4, `C3` at 1/8, `C4` at 1/16 and the optional `C5` at 1/32.
#[derive(Module, Debug)]
pub struct DenseGraph<B: Backend> {
    conv1: Conv2d<B>,
    bn_conv1: BatchNorm2d<B>,
    pool1: MaxPool2d,
    stage2_conv: DenseConvBlock<B>,
    stage2: DenseIdentityStack<B>,
    stage3_conv: DenseConvBlock<B>,
    stage3: DenseIdentityStack<B>,
    stage4_conv: DenseConvBlock<B>,
    stage4: DenseIdentityStack<B>,
    stage5_conv: Option<DenseConvBlock<B>>,
    stage5: Option<DenseIdentityStack<B>>,
    relu: Relu,
}

impl<B: Backend> DenseGraph<B> {
    /// Channels of each feature level.
    pub fn out_channels(&self) -> [Option<usize>; 5] {
        [
            Some(64),
            Some(self.stage2.out_channels()),
            Some(self.stage3.out_channels()),
            Some(self.stage4.out_channels()),
            self.stage5.as_ref().map(DenseIdentityStack::out_channels),
        ]
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        let x = self.conv1.forward(zero_pad2d(input, 3));
        let x = self.relu.forward(self.bn_conv1.forward(x));
        let c1 = self.pool1.forward(x);

        let c2 = self.stage2.forward(self.stage2_conv.forward(c1.clone()));
        let c3 = self.stage3.forward(self.stage3_conv.forward(c2.clone()));
        let c4 = self.stage4.forward(self.stage4_conv.forward(c3.clone()));

        let c5 = match (&self.stage5_conv, &self.stage5) {
            (Some(conv), Some(identity)) => Some(identity.forward(conv.forward(c4.clone()))),
            _ => None,
        };

        [Some(c1), Some(c2), Some(c3), Some(c4), c5]
    }
}

impl<B: Backend> ConvLayers<B> for DenseGraph<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        let mut convs = vec![&self.conv1];
        convs.extend(self.stage2_conv.conv_layers());
        convs.extend(self.stage2.conv_layers());
        convs.extend(self.stage3_conv.conv_layers());
        convs.extend(self.stage3.conv_layers());
        convs.extend(self.stage4_conv.conv_layers());
        convs.extend(self.stage4.conv_layers());
        if let Some(block) = &self.stage5_conv {
            convs.extend(block.conv_layers());
        }
        if let Some(stack) = &self.stage5 {
            convs.extend(stack.conv_layers());
        }
        convs
    }
}

impl<B: Backend> SelectTrainable for DenseGraph<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        Self {
            conv1: train_if(self.conv1, "conv1", is_trainable),
            bn_conv1: train_if(self.bn_conv1, "bn_conv1", is_trainable),
            stage2_conv: self.stage2_conv.select_trainable(is_trainable),
            stage2: self.stage2.select_trainable(is_trainable),
            stage3_conv: self.stage3_conv.select_trainable(is_trainable),
            stage3: self.stage3.select_trainable(is_trainable),
            stage4_conv: self.stage4_conv.select_trainable(is_trainable),
            stage4: self.stage4.select_trainable(is_trainable),
            stage5_conv: self
                .stage5_conv
                .map(|block| block.select_trainable(is_trainable)),
            stage5: self.stage5.map(|stack| stack.select_trainable(is_trainable)),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn dense_graph_channels_grow_with_each_block() {
        let device = Default::default();
        let graph = DenseGraphConfig::new().init::<TestBackend>(BatchNormMode::Train, &device);

        // 64 + 64 * 3, then + 128 * 3, then + 512 * 6
        assert_eq!(
            graph.out_channels(),
            [Some(64), Some(256), Some(640), Some(3712), None]
        );
    }

    #[test]
    fn dense_graph_forward_shapes() {
        let device = Default::default();
        let graph = DenseGraphConfig::new().init::<TestBackend>(BatchNormMode::Train, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);

        let features = graph.forward(input);

        let dims: Vec<_> = features
            .iter()
            .map(|f| f.as_ref().map(|t| t.dims()))
            .collect();
        assert_eq!(dims[0], Some([1, 64, 8, 8]));
        assert_eq!(dims[1], Some([1, 256, 8, 8]));
        assert_eq!(dims[2], Some([1, 640, 4, 4]));
        assert_eq!(dims[3], Some([1, 3712, 2, 2]));
        assert_eq!(dims[4], None);
    }
}
