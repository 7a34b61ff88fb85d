//! Soft Dice coefficient as a metric.

use std::marker::PhantomData;

use burn::{
    tensor::{backend::Backend, cast::ToElement},
    train::metric::{
        state::{FormatOptions, NumericMetricState},
        Metric, MetricEntry, MetricMetadata, Numeric,
    },
};

use crate::input::MaskMetricInput;

pub struct DiceMetric<B: Backend> {
    smooth: f64,
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> Default for DiceMetric<B> {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl<B: Backend> DiceMetric<B> {
    pub fn new(smooth: f64) -> Self {
        Self {
            smooth,
            state: NumericMetricState::default(),
            _b: PhantomData,
        }
    }
}

impl<B: Backend> Metric for DiceMetric<B> {
    type Input = MaskMetricInput<B>;

    fn name(&self) -> String {
        "dice_coef".to_string()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let value = maskseg_loss::dice_coefficient(
            item.predictions.clone(),
            item.targets.clone(),
            self.smooth,
        )
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

impl<B: Backend> Numeric for DiceMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
