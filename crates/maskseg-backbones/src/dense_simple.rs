//! Lightweight dense graphs with one conv and one identity block per stage.

use burn::{
    module::Ignored,
    nn::{
        conv::Conv2d,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use maskseg_extra_ops::{train_if, BatchNorm2d, BatchNormMode, ConvLayers, SelectTrainable};

use crate::{
    blocks::{
        batch_norm, conv2d, BlockName, DenseConvBlock, DenseIdentityBlock, DENSE_DROPOUT,
    },
    BackboneFeatures,
};

/// Configuration for the short variant of the [simple dense graph](DenseSimpleGraph).
///
/// Small 3x3 kernels, a strided stem and dropout between the blocks of every stage.
#[derive(Config, Debug)]
pub struct DenseSimpleShortConfig {
    /// Channels of the input image.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Build the fourth stage.
    #[config(default = true)]
    pub stage4: bool,
    /// Prefix of every layer name.
    #[config(default = "String::from(\"dense_res_s\")")]
    pub net_name: String,
}

impl DenseSimpleShortConfig {
    /// Initialize the short [simple dense graph](DenseSimpleGraph).
    pub fn init<B: Backend>(&self, mode: BatchNormMode, device: &B::Device) -> DenseSimpleGraph<B> {
        let stem = Stem::new(self.in_channels, 3, 2, 3, &self.net_name, mode, device);

        let mut specs = vec![
            StageSpec::new(2, 3, 3, [16, 16, 64], 1),
            StageSpec::new(3, 3, 3, [32, 32, 128], 2),
        ];
        if self.stage4 {
            specs.push(StageSpec::new(4, 3, 3, [64, 64, 256], 2));
        }

        DenseSimpleGraph::new(stem, &specs, true, &self.net_name, mode, device)
    }
}

/// Configuration for the long variant of the [simple dense graph](DenseSimpleGraph).
///
/// Large 7x7 and 9x9 kernels, a full resolution stem and no dropout between blocks.
#[derive(Config, Debug)]
pub struct DenseSimpleLongConfig {
    /// Channels of the input image.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Prefix of every layer name.
    #[config(default = "String::from(\"dense_res_l\")")]
    pub net_name: String,
}

impl DenseSimpleLongConfig {
    /// Initialize the long [simple dense graph](DenseSimpleGraph).
    pub fn init<B: Backend>(&self, mode: BatchNormMode, device: &B::Device) -> DenseSimpleGraph<B> {
        let stem = Stem::new(self.in_channels, 7, 1, 7, &self.net_name, mode, device);

        let specs = [
            StageSpec::new(2, 7, 9, [16, 16, 64], 1),
            StageSpec::new(3, 7, 7, [32, 32, 128], 2),
            StageSpec::new(4, 7, 7, [64, 64, 256], 2),
        ];

        DenseSimpleGraph::new(stem, &specs, false, &self.net_name, mode, device)
    }
}

struct StageSpec {
    stage: usize,
    conv_kernel: usize,
    identity_kernel: usize,
    filters: [usize; 3],
    stride: usize,
}

impl StageSpec {
    const fn new(
        stage: usize,
        conv_kernel: usize,
        identity_kernel: usize,
        filters: [usize; 3],
        stride: usize,
    ) -> Self {
        Self {
            stage,
            conv_kernel,
            identity_kernel,
            filters,
            stride,
        }
    }
}

/// Stem convolution followed by a strided max pool.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    conv1: Conv2d<B>,
    bn_conv1: BatchNorm2d<B>,
    pool1: MaxPool2d,
    relu: Relu,
    net_name: Ignored<String>,
}

impl<B: Backend> Stem<B> {
    fn new(
        in_channels: usize,
        kernel_size: usize,
        stride: usize,
        pool_size: usize,
        net_name: &str,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let pool_padding = (pool_size - 1) / 2;
        Self {
            conv1: conv2d([in_channels, 16], kernel_size, stride, true, device),
            bn_conv1: batch_norm(16, mode, device),
            pool1: MaxPool2dConfig::new([pool_size, pool_size])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(pool_padding, pool_padding))
                .init(),
            relu: Relu::new(),
            net_name: Ignored(net_name.to_string()),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(input);
        let x = self.relu.forward(self.bn_conv1.forward(x));
        self.pool1.forward(x)
    }
}

/// One stage: a dense conv block, optional dropout and a dense identity block.
#[derive(Module, Debug)]
pub struct DenseStage<B: Backend> {
    conv: DenseConvBlock<B>,
    dropout: Option<Dropout>,
    identity: DenseIdentityBlock<B>,
}

impl<B: Backend> DenseStage<B> {
    /// Channels of the stage output.
    pub const fn out_channels(&self) -> usize {
        self.identity.out_channels()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        };
        self.identity.forward(x)
    }
}

/// Simple dense backbone.
///
/// Level `C1` comes from the stem, `C2..C4` from the stages; the fifth level is
/// always empty.
#[derive(Module, Debug)]
pub struct DenseSimpleGraph<B: Backend> {
    stem: Stem<B>,
    stages: Vec<DenseStage<B>>,
}

impl<B: Backend> DenseSimpleGraph<B> {
    fn new(
        stem: Stem<B>,
        specs: &[StageSpec],
        dropout: bool,
        net_name: &str,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let mut channels = 16;
        let stages = specs
            .iter()
            .map(|spec| {
                let conv = DenseConvBlock::new(
                    channels,
                    spec.conv_kernel,
                    spec.filters,
                    spec.stride,
                    &BlockName::new(net_name, spec.stage, 'a'),
                    mode,
                    device,
                );
                let identity = DenseIdentityBlock::new(
                    conv.out_channels(),
                    spec.identity_kernel,
                    spec.filters,
                    &BlockName::new(net_name, spec.stage, 'b'),
                    mode,
                    device,
                );
                channels = identity.out_channels();

                DenseStage {
                    conv,
                    dropout: dropout.then(|| DropoutConfig::new(DENSE_DROPOUT).init()),
                    identity,
                }
            })
            .collect();

        Self { stem, stages }
    }

    /// Channels of each feature level.
    pub fn out_channels(&self) -> [Option<usize>; 5] {
        let mut channels = [None; 5];
        channels[0] = Some(16);
        for (slot, stage) in channels[1..].iter_mut().zip(&self.stages) {
            *slot = Some(stage.out_channels());
        }
        channels
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> BackboneFeatures<B> {
        let mut features: BackboneFeatures<B> = [None, None, None, None, None];

        let mut x = self.stem.forward(input);
        features[0] = Some(x.clone());

        for (slot, stage) in features[1..].iter_mut().zip(&self.stages) {
            x = stage.forward(x);
            *slot = Some(x.clone());
        }

        features
    }
}

impl<B: Backend> SelectTrainable for Stem<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let net_name = self.net_name.0.clone();
        Self {
            conv1: train_if(self.conv1, &format!("{net_name}conv1"), is_trainable),
            bn_conv1: train_if(self.bn_conv1, &format!("{net_name}bn_conv1"), is_trainable),
            ..self
        }
    }
}

impl<B: Backend> ConvLayers<B> for DenseStage<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        let mut convs = self.conv.conv_layers();
        convs.extend(self.identity.conv_layers());
        convs
    }
}

impl<B: Backend> SelectTrainable for DenseStage<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        Self {
            conv: self.conv.select_trainable(is_trainable),
            identity: self.identity.select_trainable(is_trainable),
            ..self
        }
    }
}

impl<B: Backend> ConvLayers<B> for DenseSimpleGraph<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        let mut convs = vec![&self.stem.conv1];
        convs.extend(self.stages.iter().flat_map(|stage| stage.conv_layers()));
        convs
    }
}

impl<B: Backend> SelectTrainable for DenseSimpleGraph<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        Self {
            stem: self.stem.select_trainable(is_trainable),
            stages: self
                .stages
                .into_iter()
                .map(|stage| stage.select_trainable(is_trainable))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray<f32>;

    fn dims(features: &BackboneFeatures<TestBackend>) -> Vec<Option<[usize; 4]>> {
        features
            .iter()
            .map(|f| f.as_ref().map(|t| t.dims()))
            .collect()
    }

    #[test]
    fn short_graph_shapes() {
        let device = Default::default();
        let graph =
            DenseSimpleShortConfig::new().init::<TestBackend>(BatchNormMode::Train, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);

        let features = graph.forward(input);

        assert_eq!(
            dims(&features),
            vec![
                Some([1, 16, 8, 8]),
                Some([1, 144, 8, 8]),
                Some([1, 400, 4, 4]),
                Some([1, 912, 2, 2]),
                None,
            ]
        );
        assert_eq!(
            graph.out_channels(),
            [Some(16), Some(144), Some(400), Some(912), None]
        );
    }

    #[test]
    fn short_graph_without_stage4() {
        let device = Default::default();
        let graph = DenseSimpleShortConfig::new()
            .with_stage4(false)
            .init::<TestBackend>(BatchNormMode::Train, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);

        let features = graph.forward(input);

        assert!(features[3].is_none());
        assert!(features[4].is_none());
    }

    #[test]
    fn stem_names_carry_net_prefix() {
        type AutodiffBackend = burn::backend::Autodiff<TestBackend>;
        let device = Default::default();
        let graph = DenseSimpleShortConfig::new()
            .with_stage4(false)
            .init::<AutodiffBackend>(BatchNormMode::Train, &device)
            .select_trainable(&|name| name.starts_with("dense_res_sconv"));

        assert!(graph.stem.conv1.weight.val().is_require_grad());
        assert!(!graph.stem.bn_conv1.gamma.val().is_require_grad());
        let convs = graph.conv_layers();
        assert_eq!(convs.len(), 1 + 2 * (4 + 3));
        assert!(!convs[1].weight.val().is_require_grad());
    }

    #[test]
    fn long_graph_shapes() {
        let device = Default::default();
        let graph = DenseSimpleLongConfig::new().init::<TestBackend>(BatchNormMode::Train, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);

        let features = graph.forward(input);

        assert_eq!(
            dims(&features),
            vec![
                Some([1, 16, 8, 8]),
                Some([1, 144, 8, 8]),
                Some([1, 400, 4, 4]),
                Some([1, 912, 2, 2]),
                None,
            ]
        );
    }
}
