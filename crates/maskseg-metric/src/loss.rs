//! Loss values reported as a metric.

use std::marker::PhantomData;

use burn::{
    tensor::{backend::Backend, ElementConversion},
    train::metric::{
        state::{FormatOptions, NumericMetricState},
        Metric, MetricEntry, MetricMetadata, Numeric,
    },
};

use crate::input::MaskLossInput;

/// Reports a scalar loss under `name`.
pub struct LossMetric<B: Backend> {
    name: String,
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> Default for LossMetric<B> {
    fn default() -> Self {
        Self::new("loss")
    }
}

impl<B: Backend> LossMetric<B> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: NumericMetricState::default(),
            _b: PhantomData,
        }
    }
}

impl<B: Backend> Metric for LossMetric<B> {
    type Input = MaskLossInput<B>;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let loss = item.loss.clone().into_scalar().elem::<f64>();
        self.state.update(
            loss,
            item.batch_size,
            FormatOptions::new(self.name()).precision(5),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for LossMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
