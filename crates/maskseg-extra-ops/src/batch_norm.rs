//! Batch normalization with an explicit training/inference mode.
//!
//! Burn's stock `BatchNorm` picks batch statistics whenever the backend tracks
//! gradients. The backbones here also need a frozen variant (running statistics even
//! while training the rest of the graph) and a forced-training variant, so the
//! choice is carried as a [`BatchNormMode`] on every layer.

use burn::{
    config::Config,
    module::{Ignored, Module, Param, RunningState},
    prelude::*,
};
use serde::{Deserialize, Serialize};

/// How a [`BatchNorm2d`] layer chooses between batch and running statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchNormMode {
    /// Batch statistics while gradients are tracked, running statistics otherwise.
    #[default]
    Train,
    /// Always running statistics. Used for inference and for frozen layers.
    Frozen,
    /// Batch statistics even at inference time.
    ///
    /// Outputs then depend on the other samples in the batch. Avoid unless the
    /// running statistics are known to be unusable.
    ForceTrain,
}

impl BatchNormMode {
    /// Whether a forward pass on backend `B` normalizes with batch statistics.
    pub fn uses_batch_stats<B: Backend>(self) -> bool {
        match self {
            Self::Train => B::ad_enabled(),
            Self::Frozen => false,
            Self::ForceTrain => true,
        }
    }
}

/// Configuration to create a [`BatchNorm2d`] layer.
#[derive(Config, Debug)]
pub struct BatchNorm2dConfig {
    /// Number of channels of the normalized input.
    pub num_features: usize,
    /// Value added to the variance for numerical stability.
    #[config(default = 1e-3)]
    pub epsilon: f64,
    /// Weight kept by the running averages at every update.
    #[config(default = 0.99)]
    pub momentum: f64,
    /// Statistics selection mode.
    #[config(default = "BatchNormMode::Train")]
    pub mode: BatchNormMode,
}

impl BatchNorm2dConfig {
    /// Initialize a new [`BatchNorm2d`] module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BatchNorm2d<B> {
        let gamma = Tensor::ones([self.num_features], device);
        let beta = Tensor::zeros([self.num_features], device);

        BatchNorm2d {
            gamma: Param::from_tensor(gamma),
            beta: Param::from_tensor(beta),
            running_mean: RunningState::new(Tensor::zeros([self.num_features], device)),
            running_var: RunningState::new(Tensor::ones([self.num_features], device)),
            momentum: self.momentum,
            epsilon: self.epsilon,
            mode: Ignored(self.mode),
        }
    }
}

/// 2-D batch normalization over `[batch, channels, height, width]` inputs.
#[derive(Module, Debug)]
pub struct BatchNorm2d<B: Backend> {
    /// Learnable scale.
    pub gamma: Param<Tensor<B, 1>>,
    /// Learnable shift.
    pub beta: Param<Tensor<B, 1>>,
    /// Running mean.
    pub running_mean: RunningState<Tensor<B, 1>>,
    /// Running variance.
    pub running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
    mode: Ignored<BatchNormMode>,
}

impl<B: Backend> BatchNorm2d<B> {
    /// Current statistics selection mode.
    pub fn mode(&self) -> BatchNormMode {
        self.mode.0
    }

    /// Return the layer with a different statistics selection mode.
    pub fn with_mode(mut self, mode: BatchNormMode) -> Self {
        self.mode = Ignored(mode);
        self
    }

    /// Applies the forward pass.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.mode.0.uses_batch_stats::<B>() {
            self.forward_batch_stats(input)
        } else {
            self.forward_running_stats(input)
        }
    }

    fn forward_running_stats(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = input.device();
        let [_, channels, _, _] = input.dims();

        let mean = self.running_mean.value().to_device(&device);
        let var = self.running_var.value().to_device(&device);

        self.normalize(
            input,
            mean.reshape([1, channels, 1, 1]),
            var.reshape([1, channels, 1, 1]),
        )
    }

    fn forward_batch_stats(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = input.device();
        let [batch_size, channels, height, width] = input.dims();
        let flatten_size = batch_size * height * width;

        let mean = input
            .clone()
            .swap_dims(0, 1)
            .reshape([channels, flatten_size])
            .mean_dim(1)
            .reshape([1, channels, 1, 1]);

        let var = input
            .clone()
            .sub(mean.clone())
            .powi_scalar(2)
            .swap_dims(0, 1)
            .reshape([channels, flatten_size])
            .mean_dim(1)
            .reshape([1, channels, 1, 1]);

        let running_mean = self.running_mean.value_sync().to_device(&device);
        let running_var = self.running_var.value_sync().to_device(&device);

        let running_mean = running_mean.mul_scalar(self.momentum).add(
            mean.clone()
                .detach()
                .mul_scalar(1.0 - self.momentum)
                .reshape([channels]),
        );
        let running_var = running_var.mul_scalar(self.momentum).add(
            var.clone()
                .detach()
                .mul_scalar(1.0 - self.momentum)
                .reshape([channels]),
        );

        self.running_mean.update(running_mean.detach());
        self.running_var.update(running_var.detach());

        self.normalize(input, mean, var)
    }

    fn normalize(&self, input: Tensor<B, 4>, mean: Tensor<B, 4>, var: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = input.dims();
        let std = var.add_scalar(self.epsilon).sqrt();

        let x = input.sub(mean).div(std);
        let x = x.mul(self.gamma.val().reshape([1, channels, 1, 1]));

        x.add(self.beta.val().reshape([1, channels, 1, 1]))
    }
}
