//! Named-layer utilities: weight decay over convolutions and trainable-layer selection.
//!
//! Layers are addressed by the same names their records are reported under in logs
//! (`res2a_branch2a`, `bn2a_branch2a`, `conv1`, ...), so a single pattern can select
//! layers across the backbone and the decoder.

use burn::{module::Module, nn::conv::Conv2d, prelude::*};

/// Access to every convolution of a module, the parameters that carry weight decay.
pub trait ConvLayers<B: Backend> {
    /// Every convolution of the module, in forward order.
    fn conv_layers(&self) -> Vec<&Conv2d<B>>;
}

/// Freeze every named layer the predicate rejects.
pub trait SelectTrainable: Sized {
    /// Return the module with the layers whose name fails `is_trainable` excluded from
    /// gradient computation.
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self;
}

/// Keep `module` trainable when `name` passes the predicate, freeze it otherwise.
pub fn train_if<B: Backend, M: Module<B>>(
    module: M,
    name: &str,
    is_trainable: &dyn Fn(&str) -> bool,
) -> M {
    if is_trainable(name) {
        module
    } else {
        module.no_grad()
    }
}

/// L2 penalty of a set of convolutions.
///
/// Each kernel and bias contributes `weight_decay * sum(w^2) / numel(w)`, so large
/// layers are not penalized more than small ones. Normalization parameters are not
/// convolutions and never contribute.
///
/// # Shapes
///
/// - output: `[1]`
pub fn l2_penalty<B: Backend>(
    convs: &[&Conv2d<B>],
    weight_decay: f64,
    device: &B::Device,
) -> Tensor<B, 1> {
    let mut penalty = Tensor::<B, 1>::zeros([1], device);

    for conv in convs {
        let weight = conv.weight.val();
        let numel = weight.shape().num_elements() as f64;
        penalty = penalty.add(weight.powi_scalar(2).sum().mul_scalar(weight_decay / numel));

        if let Some(bias) = &conv.bias {
            let bias = bias.val();
            let numel = bias.shape().num_elements() as f64;
            penalty = penalty.add(bias.powi_scalar(2).sum().mul_scalar(weight_decay / numel));
        }
    }

    penalty
}
