//! Hard-thresholded mask accuracy.
//!
//! Both masks are binarized (targets: any non-zero value, predictions: above 0.5)
//! and compared with a smoothed Dice overlap:
//!
//! ```text
//! acc = (2 * |t & q| + smooth) / (|t| + |q| + smooth)
//! ```
//!
//! Two empty masks score exactly 1.0 whatever the smoothing, so the metric never
//! produces NaN.

use std::marker::PhantomData;

use burn::{
    tensor::{backend::Backend, cast::ToElement, Tensor},
    train::metric::{
        state::{FormatOptions, NumericMetricState},
        Metric, MetricEntry, MetricMetadata, Numeric,
    },
};

use crate::input::MaskMetricInput;

/// Default smoothing constant of [`mask_accuracy`].
pub const DEFAULT_ACCURACY_SMOOTH: f64 = 1.0;

/// Mask accuracy of a whole batch.
///
/// # Shapes
///
/// - predictions: `[batch_size, classes, height, width]`, probabilities
/// - targets: `[batch_size, classes, height, width]`
/// - output: `[1]`
pub fn mask_accuracy<B: Backend>(
    predictions: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    smooth: f64,
) -> Tensor<B, 1> {
    assert_eq!(
        predictions.dims(),
        targets.dims(),
        "Shape of predictions ({:?}) must match targets ({:?})",
        predictions.dims(),
        targets.dims()
    );

    let truth = targets.not_equal_elem(0.0).float();
    let predicted = predictions.greater_elem(0.5).float();

    let intersection = truth.clone().mul(predicted.clone()).sum();
    let total = truth.sum().add(predicted.sum());
    let empty = total.clone().equal_elem(0.0);

    let denominator = total.mask_fill(empty.clone(), 1.0).add_scalar(smooth);
    let score = intersection
        .mul_scalar(2.0)
        .add_scalar(smooth)
        .div(denominator);

    score.mask_fill(empty, 1.0)
}

/// [`mask_accuracy`] of each batch.
pub struct MaskAccuracyMetric<B: Backend> {
    smooth: f64,
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> Default for MaskAccuracyMetric<B> {
    fn default() -> Self {
        Self::new(DEFAULT_ACCURACY_SMOOTH)
    }
}

impl<B: Backend> MaskAccuracyMetric<B> {
    pub fn new(smooth: f64) -> Self {
        Self {
            smooth,
            state: NumericMetricState::default(),
            _b: PhantomData,
        }
    }
}

impl<B: Backend> Metric for MaskAccuracyMetric<B> {
    type Input = MaskMetricInput<B>;

    fn name(&self) -> String {
        "mask_accuracy".to_string()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let value = mask_accuracy(item.predictions.clone(), item.targets.clone(), self.smooth)
            .into_scalar()
            .to_f64();
        self.state.update(
            value,
            item.batch_size(),
            FormatOptions::new(self.name()).precision(5),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for MaskAccuracyMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
