//! Loss functions for segmentation mask training.
//!
//! All losses take sigmoid probabilities and float binary targets laid out as
//! `[batch_size, classes, height, width]`.
//!
//! - **[`BinaryCrossEntropy`]**: element-wise cross-entropy with an additive epsilon
//! - **[`DiceLoss`]** and [`dice_coefficient`]: soft overlap with a smoothing constant
//! - **[`MaskLoss`]**: cross-entropy plus a weighted Dice term, the training loss of the
//!   segmentation network
//!
//! ## Usage Example
//!
//! ```rust
//! use maskseg_loss::MaskLossConfig;
//!
//! let loss = MaskLossConfig::new().with_dice_weight(4.0).init();
//! assert_eq!(loss.dice_weight, 4.0);
//! ```

mod bce;
mod dice;
mod mask;

pub use bce::{BinaryCrossEntropy, BinaryCrossEntropyConfig};
pub use dice::{dice_coefficient, DiceLoss, DiceLossConfig};
pub use mask::{MaskLoss, MaskLossConfig};

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    pub type TestBackend = NdArray<f32>;
    pub type TestAutodiffBackend = Autodiff<TestBackend>;
}
