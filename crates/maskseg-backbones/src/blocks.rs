//! Residual and densely connected block implementations.
//!
//! Every block is a bottleneck of two 1x1 projections around one kxk convolution,
//! each followed by a [`BatchNorm2d`]. The residual variants add a skip connection;
//! the dense variants concatenate their input with the branch output instead, so
//! their output depth is `in_channels + filters[2]`.

use burn::{
    module::Ignored,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Dropout, DropoutConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use maskseg_extra_ops::{
    train_if, BatchNorm2d, BatchNorm2dConfig, BatchNormMode, ConvLayers, SelectTrainable,
};

/// Dropout rate used inside the dense blocks and between dense stages.
pub const DENSE_DROPOUT: f64 = 0.2;

/// Position of a block inside a backbone, used to derive its layer names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockName {
    /// Network prefix, `res` for the residual graph or the dense net name.
    pub prefix: String,
    /// Stage number.
    pub stage: usize,
    /// Block letter within the stage.
    pub block: char,
}

impl BlockName {
    /// Create a block name from its parts.
    pub fn new(prefix: impl Into<String>, stage: usize, block: char) -> Self {
        Self {
            prefix: prefix.into(),
            stage,
            block,
        }
    }

    /// Base name of the branch convolutions, e.g. `res2a_branch`.
    pub fn conv_base(&self) -> String {
        format!("{}{}{}_branch", self.prefix, self.stage, self.block)
    }

    /// Base name of the branch normalizations, e.g. `bn2a_branch` or
    /// `dense_res_bn2a_branch`.
    pub fn bn_base(&self) -> String {
        if self.prefix == "res" {
            format!("bn{}{}_branch", self.stage, self.block)
        } else {
            format!("{}_bn{}{}_branch", self.prefix, self.stage, self.block)
        }
    }

    /// Name of the block output, e.g. `res2a_out`.
    pub fn output(&self) -> String {
        format!("{}{}{}_out", self.prefix, self.stage, self.block)
    }
}

/// A "same" padded convolution with the glorot initialization used across the backbones.
pub(crate) fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel_size: usize,
    stride: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = (kernel_size - 1) / 2;
    Conv2dConfig::new(channels, [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(bias)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

pub(crate) fn batch_norm<B: Backend>(
    channels: usize,
    mode: BatchNormMode,
    device: &B::Device,
) -> BatchNorm2d<B> {
    BatchNorm2dConfig::new(channels)
        .with_mode(mode)
        .init(device)
}

/// Residual block whose skip connection is the raw input.
#[derive(Module, Debug)]
pub struct IdentityBlock<B: Backend> {
    branch2a: Conv2d<B>,
    bn2a: BatchNorm2d<B>,
    branch2b: Conv2d<B>,
    bn2b: BatchNorm2d<B>,
    branch2c: Conv2d<B>,
    bn2c: BatchNorm2d<B>,
    relu: Relu,
    name: Ignored<BlockName>,
}

impl<B: Backend> IdentityBlock<B> {
    /// Create a new identity block.
    ///
    /// The skip addition needs equal depths, so the block takes `filters[2]` input
    /// channels.
    pub fn new(
        kernel_size: usize,
        filters: [usize; 3],
        name: &BlockName,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let [f1, f2, f3] = filters;
        let in_channels = f3;

        Self {
            branch2a: conv2d([in_channels, f1], 1, 1, true, device),
            bn2a: batch_norm(f1, mode, device),
            branch2b: conv2d([f1, f2], kernel_size, 1, true, device),
            bn2b: batch_norm(f2, mode, device),
            branch2c: conv2d([f2, f3], 1, 1, true, device),
            bn2c: batch_norm(f3, mode, device),
            relu: Relu::new(),
            name: Ignored(name.clone()),
        }
    }

    /// Name of the block output.
    pub fn name(&self) -> String {
        self.name.output()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        let x = self.branch2a.forward(input);
        let x = self.relu.forward(self.bn2a.forward(x));
        let x = self.branch2b.forward(x);
        let x = self.relu.forward(self.bn2b.forward(x));
        let x = self.bn2c.forward(self.branch2c.forward(x));

        self.relu.forward(x + identity)
    }
}

/// Residual block with a strided, projected shortcut.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    branch2a: Conv2d<B>,
    bn2a: BatchNorm2d<B>,
    branch2b: Conv2d<B>,
    bn2b: BatchNorm2d<B>,
    branch2c: Conv2d<B>,
    bn2c: BatchNorm2d<B>,
    branch1: Conv2d<B>,
    bn1: BatchNorm2d<B>,
    relu: Relu,
    name: Ignored<BlockName>,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new conv block. The stride applies to the first 1x1 and to the shortcut.
    pub fn new(
        in_channels: usize,
        kernel_size: usize,
        filters: [usize; 3],
        stride: usize,
        name: &BlockName,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let [f1, f2, f3] = filters;

        Self {
            branch2a: conv2d([in_channels, f1], 1, stride, true, device),
            bn2a: batch_norm(f1, mode, device),
            branch2b: conv2d([f1, f2], kernel_size, 1, true, device),
            bn2b: batch_norm(f2, mode, device),
            branch2c: conv2d([f2, f3], 1, 1, true, device),
            bn2c: batch_norm(f3, mode, device),
            branch1: conv2d([in_channels, f3], 1, stride, true, device),
            bn1: batch_norm(f3, mode, device),
            relu: Relu::new(),
            name: Ignored(name.clone()),
        }
    }

    /// Name of the block output.
    pub fn name(&self) -> String {
        self.name.output()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = self.bn1.forward(self.branch1.forward(input.clone()));

        let x = self.branch2a.forward(input);
        let x = self.relu.forward(self.bn2a.forward(x));
        let x = self.branch2b.forward(x);
        let x = self.relu.forward(self.bn2b.forward(x));
        let x = self.bn2c.forward(self.branch2c.forward(x));

        self.relu.forward(x + shortcut)
    }
}

/// Densely connected block ending in a strided fusing convolution.
#[derive(Module, Debug)]
pub struct DenseConvBlock<B: Backend> {
    branch2a: Conv2d<B>,
    bn2a: BatchNorm2d<B>,
    branch2b: Conv2d<B>,
    bn2b: BatchNorm2d<B>,
    branch2c: Conv2d<B>,
    dropout: Dropout,
    bn2c: BatchNorm2d<B>,
    fuse: Conv2d<B>,
    bn_fuse: BatchNorm2d<B>,
    relu: Relu,
    out_channels: usize,
    name: Ignored<BlockName>,
}

impl<B: Backend> DenseConvBlock<B> {
    /// Create a new dense conv block. The stride applies to the fusing convolution.
    pub fn new(
        in_channels: usize,
        kernel_size: usize,
        filters: [usize; 3],
        stride: usize,
        name: &BlockName,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let [f1, f2, f3] = filters;
        let out_channels = in_channels + f3;

        Self {
            branch2a: conv2d([in_channels, f1], 1, 1, true, device),
            bn2a: batch_norm(f1, mode, device),
            branch2b: conv2d([f1, f2], kernel_size, 1, true, device),
            bn2b: batch_norm(f2, mode, device),
            branch2c: conv2d([f2, f3], 1, 1, true, device),
            dropout: DropoutConfig::new(DENSE_DROPOUT).init(),
            bn2c: batch_norm(f3, mode, device),
            fuse: conv2d([out_channels, out_channels], kernel_size, stride, true, device),
            bn_fuse: batch_norm(out_channels, mode, device),
            relu: Relu::new(),
            out_channels,
            name: Ignored(name.clone()),
        }
    }

    /// Channels of the block output.
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Name of the block output.
    pub fn name(&self) -> String {
        self.name.output()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.branch2a.forward(input.clone());
        let x = self.relu.forward(self.bn2a.forward(x));
        let x = self.branch2b.forward(x);
        let x = self.relu.forward(self.bn2b.forward(x));
        let x = self.dropout.forward(self.branch2c.forward(x));
        let x = self.relu.forward(self.bn2c.forward(x));

        let dense = Tensor::cat(vec![input, x], 1);
        let dense = self.bn_fuse.forward(self.fuse.forward(dense));

        self.relu.forward(dense)
    }
}

/// Densely connected block without downsampling.
#[derive(Module, Debug)]
pub struct DenseIdentityBlock<B: Backend> {
    branch2a: Conv2d<B>,
    bn2a: BatchNorm2d<B>,
    branch2b: Conv2d<B>,
    bn2b: BatchNorm2d<B>,
    dropout: Dropout,
    branch2c: Conv2d<B>,
    bn2c: BatchNorm2d<B>,
    relu: Relu,
    out_channels: usize,
    name: Ignored<BlockName>,
}

impl<B: Backend> DenseIdentityBlock<B> {
    /// Create a new dense identity block.
    pub fn new(
        in_channels: usize,
        kernel_size: usize,
        filters: [usize; 3],
        name: &BlockName,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let [f1, f2, f3] = filters;

        Self {
            branch2a: conv2d([in_channels, f1], 1, 1, true, device),
            bn2a: batch_norm(f1, mode, device),
            branch2b: conv2d([f1, f2], kernel_size, 1, true, device),
            bn2b: batch_norm(f2, mode, device),
            dropout: DropoutConfig::new(DENSE_DROPOUT).init(),
            branch2c: conv2d([f2, f3], 1, 1, true, device),
            bn2c: batch_norm(f3, mode, device),
            relu: Relu::new(),
            out_channels: in_channels + f3,
            name: Ignored(name.clone()),
        }
    }

    /// Channels of the block output.
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Name of the block output.
    pub fn name(&self) -> String {
        self.name.output()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.branch2a.forward(input.clone());
        let x = self.relu.forward(self.bn2a.forward(x));
        let x = self.branch2b.forward(x);
        let x = self.relu.forward(self.bn2b.forward(x));
        let x = self.dropout.forward(x);
        let x = self.bn2c.forward(self.branch2c.forward(x));

        self.relu.forward(Tensor::cat(vec![input, x], 1))
    }
}

/// A stack of dense identity blocks that tracks the growing channel count.
#[derive(Module, Debug)]
pub struct DenseIdentityStack<B: Backend> {
    blocks: Vec<DenseIdentityBlock<B>>,
    out_channels: usize,
}

impl<B: Backend> DenseIdentityStack<B> {
    /// Create `count` dense identity blocks named with consecutive letters from `first_block`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        kernel_size: usize,
        filters: [usize; 3],
        count: usize,
        prefix: &str,
        stage: usize,
        first_block: char,
        mode: BatchNormMode,
        device: &B::Device,
    ) -> Self {
        let mut channels = in_channels;
        let blocks = (0..count)
            .map(|i| {
                let letter = char::from(first_block as u8 + i as u8);
                let block = DenseIdentityBlock::new(
                    channels,
                    kernel_size,
                    filters,
                    &BlockName::new(prefix, stage, letter),
                    mode,
                    device,
                );
                channels = block.out_channels();
                block
            })
            .collect();

        Self {
            blocks,
            out_channels: channels,
        }
    }

    /// Channels of the stack output.
    pub const fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

impl<B: Backend> ConvLayers<B> for IdentityBlock<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        vec![&self.branch2a, &self.branch2b, &self.branch2c]
    }
}

impl<B: Backend> SelectTrainable for IdentityBlock<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let conv = self.name.conv_base();
        let bn = self.name.bn_base();

        Self {
            branch2a: train_if(self.branch2a, &format!("{conv}2a"), is_trainable),
            bn2a: train_if(self.bn2a, &format!("{bn}2a"), is_trainable),
            branch2b: train_if(self.branch2b, &format!("{conv}2b"), is_trainable),
            bn2b: train_if(self.bn2b, &format!("{bn}2b"), is_trainable),
            branch2c: train_if(self.branch2c, &format!("{conv}2c"), is_trainable),
            bn2c: train_if(self.bn2c, &format!("{bn}2c"), is_trainable),
            ..self
        }
    }
}

impl<B: Backend> ConvLayers<B> for ConvBlock<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        vec![&self.branch2a, &self.branch2b, &self.branch2c, &self.branch1]
    }
}

impl<B: Backend> SelectTrainable for ConvBlock<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let conv = self.name.conv_base();
        let bn = self.name.bn_base();

        Self {
            branch2a: train_if(self.branch2a, &format!("{conv}2a"), is_trainable),
            bn2a: train_if(self.bn2a, &format!("{bn}2a"), is_trainable),
            branch2b: train_if(self.branch2b, &format!("{conv}2b"), is_trainable),
            bn2b: train_if(self.bn2b, &format!("{bn}2b"), is_trainable),
            branch2c: train_if(self.branch2c, &format!("{conv}2c"), is_trainable),
            bn2c: train_if(self.bn2c, &format!("{bn}2c"), is_trainable),
            branch1: train_if(self.branch1, &format!("{conv}1"), is_trainable),
            bn1: train_if(self.bn1, &format!("{bn}1"), is_trainable),
            ..self
        }
    }
}

impl<B: Backend> ConvLayers<B> for DenseConvBlock<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        vec![&self.branch2a, &self.branch2b, &self.branch2c, &self.fuse]
    }
}

impl<B: Backend> SelectTrainable for DenseConvBlock<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let conv = self.name.conv_base();
        let bn = self.name.bn_base();

        Self {
            branch2a: train_if(self.branch2a, &format!("{conv}2a"), is_trainable),
            bn2a: train_if(self.bn2a, &format!("{bn}2a"), is_trainable),
            branch2b: train_if(self.branch2b, &format!("{conv}2b"), is_trainable),
            bn2b: train_if(self.bn2b, &format!("{bn}2b"), is_trainable),
            branch2c: train_if(self.branch2c, &format!("{conv}2c"), is_trainable),
            bn2c: train_if(self.bn2c, &format!("{bn}2c"), is_trainable),
            fuse: train_if(self.fuse, &format!("{conv}_final"), is_trainable),
            bn_fuse: train_if(self.bn_fuse, &format!("{bn}_final"), is_trainable),
            ..self
        }
    }
}

impl<B: Backend> ConvLayers<B> for DenseIdentityBlock<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        vec![&self.branch2a, &self.branch2b, &self.branch2c]
    }
}

impl<B: Backend> SelectTrainable for DenseIdentityBlock<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let conv = self.name.conv_base();
        let bn = self.name.bn_base();

        Self {
            branch2a: train_if(self.branch2a, &format!("{conv}2a"), is_trainable),
            bn2a: train_if(self.bn2a, &format!("{bn}2a"), is_trainable),
            branch2b: train_if(self.branch2b, &format!("{conv}2b"), is_trainable),
            bn2b: train_if(self.bn2b, &format!("{bn}2b"), is_trainable),
            branch2c: train_if(self.branch2c, &format!("{conv}2c"), is_trainable),
            bn2c: train_if(self.bn2c, &format!("{bn}2c"), is_trainable),
            ..self
        }
    }
}

impl<B: Backend> ConvLayers<B> for DenseIdentityStack<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        self.blocks.iter().flat_map(|block| block.conv_layers()).collect()
    }
}

impl<B: Backend> SelectTrainable for DenseIdentityStack<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.select_trainable(is_trainable))
                .collect(),
            ..self
        }
    }
}
