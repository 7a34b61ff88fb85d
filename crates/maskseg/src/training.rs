//! The training loop of [`MaskModel`].

use std::sync::Arc;

use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, Optimizer, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{Adaptor, Metric, MetricMetadata, Numeric},
        TrainStep, ValidStep,
    },
};
use maskseg_extra_ops::SelectTrainable;
use maskseg_metric::{step_metadata, DiceMetric, LossMetric, MaskAccuracyMetric};
use maskseg_model::{MaskOutput, ModelMode, SegmentationNet};
use maskseg_train::{
    AugmentationConfig, GeneratorConfig, MaskBatcher, ParallelFeeder, SegmentationDataset,
};
use regex::Regex;

use crate::{
    assembler::MaskModel,
    callback::{EpochSummary, TrainingCallback},
    error::{MaskModelError, MaskModelResult},
};

/// Layer selection presets accepted by [`TrainOptions::layers`].
pub const LAYER_PRESETS: [(&str, &str); 1] = [("all", ".*")];

/// Arguments of one [`MaskModel::train`] call.
#[derive(Config, Debug)]
pub struct TrainOptions {
    pub learning_rate: f64,

    /// Train until this many epochs are completed.
    pub epochs: usize,

    /// A preset from [`LAYER_PRESETS`] or a regex that must match a whole layer name.
    #[config(default = "String::from(\"all\")")]
    pub layers: String,

    #[config(default = "AugmentationConfig::none()")]
    pub augmentation: AugmentationConfig,

    /// Dataset sources that are never augmented.
    #[config(default = "Vec::new()")]
    pub no_augmentation_sources: Vec<String>,

    /// Feeder threads per generator; `None` uses one per CPU.
    #[config(default = "None")]
    pub workers: Option<usize>,
}

/// Compile a layer selection into a whole-name matcher.
///
/// # Errors
///
/// Returns [`MaskModelError::InvalidPattern`] if the regex does not compile.
pub fn layer_regex(layers: &str) -> MaskModelResult<Regex> {
    let pattern = LAYER_PRESETS
        .iter()
        .find(|(preset, _)| *preset == layers)
        .map_or(layers, |(_, pattern)| *pattern);
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| MaskModelError::InvalidPattern {
        pattern: layers.to_string(),
        source,
    })
}

/// Feeder threads used when none are requested: one per CPU, none on Windows.
pub fn default_workers() -> usize {
    if cfg!(windows) {
        0
    } else {
        num_cpus::get()
    }
}

/// The metrics of one pass over the feeder, averaged over the epoch by batch size.
struct EpochMetrics<B: Backend> {
    loss: LossMetric<B>,
    mask_loss: LossMetric<B>,
    mask_accuracy: MaskAccuracyMetric<B>,
    dice: DiceMetric<B>,
    /// Weighted sums of loss, mask loss, accuracy and Dice.
    sums: [f64; 4],
    items: usize,
}

impl<B: Backend> EpochMetrics<B> {
    fn new(accuracy_smooth: f64, dice_smooth: f64) -> Self {
        Self {
            loss: LossMetric::new("loss"),
            mask_loss: LossMetric::new("mask_loss"),
            mask_accuracy: MaskAccuracyMetric::new(accuracy_smooth),
            dice: DiceMetric::new(dice_smooth),
            sums: [0.0; 4],
            items: 0,
        }
    }

    fn update(&mut self, output: &MaskOutput<B>, metadata: &MetricMetadata) {
        self.loss.update(&output.adapt(), metadata);
        self.mask_loss.update(&output.mask_loss_input(), metadata);
        self.mask_accuracy.update(&output.adapt(), metadata);
        self.dice.update(&output.adapt(), metadata);

        let batch_size = output.batch_size();
        let values = [
            self.loss.value(),
            self.mask_loss.value(),
            self.mask_accuracy.value(),
            self.dice.value(),
        ];
        for (sum, value) in self.sums.iter_mut().zip(values) {
            *sum += value * batch_size as f64;
        }
        self.items += batch_size;
    }

    /// Epoch means of loss, mask loss, accuracy and Dice.
    fn means(&self) -> [f64; 4] {
        let items = self.items.max(1) as f64;
        self.sums.map(|sum| sum / items)
    }
}

impl<B: AutodiffBackend> MaskModel<B> {
    /// Train the layers selected by `options.layers` until `options.epochs` epochs
    /// are completed, starting from the current epoch.
    ///
    /// Each epoch runs `steps_per_epoch` SGD steps on `train_dataset`, evaluates
    /// `validation_steps` batches of `val_dataset`, writes a checkpoint and then calls
    /// every callback.
    ///
    /// # Errors
    ///
    /// Returns [`MaskModelError::NotTrainable`] in inference mode, and any data,
    /// model or checkpoint error raised on the way.
    pub fn train<D, V>(
        &mut self,
        train_dataset: Arc<D>,
        val_dataset: Arc<V>,
        options: &TrainOptions,
        callbacks: &mut [&mut dyn TrainingCallback],
    ) -> MaskModelResult<()>
    where
        D: SegmentationDataset + ?Sized + 'static,
        V: SegmentationDataset + ?Sized + 'static,
    {
        if self.mode != ModelMode::Training {
            return Err(MaskModelError::NotTrainable);
        }
        let layers = layer_regex(&options.layers)?;
        let workers = options.workers.unwrap_or_else(default_workers);

        let train_config = GeneratorConfig::training(&self.config, options.augmentation.clone())
            .with_no_augmentation_sources(options.no_augmentation_sources.clone());
        let val_config = GeneratorConfig::validation(&self.config);
        let mut train_feed = ParallelFeeder::spawn(train_dataset, &train_config, workers)?;
        let mut val_feed = ParallelFeeder::spawn(val_dataset, &val_config, workers)?;

        let log_dir = self.log_dir();
        std::fs::create_dir_all(&log_dir).map_err(|source| MaskModelError::Io {
            path: log_dir.clone(),
            source,
        })?;
        tracing::info!(
            start_epoch = self.epoch(),
            learning_rate = options.learning_rate,
            checkpoint = %self.checkpoint_path(self.epoch() + 1).display(),
            "Starting training"
        );

        B::seed(self.config.seed);
        // Parameters keep their trainability here; the working copy gets frozen.
        let template = self.net.clone();
        let mut net = self
            .net
            .clone()
            .select_trainable(&|name: &str| layers.is_match(name));
        let mut optimizer = SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.config.learning_momentum)
                    .with_dampening(0.0),
            ))
            .with_gradient_clipping(Some(GradientClippingConfig::Norm(
                self.config.gradient_clip_norm as f32,
            )))
            .init::<B, SegmentationNet<B>>();
        let batcher = MaskBatcher::<B>::new();
        let val_batcher = MaskBatcher::<B::InnerBackend>::new();

        let accuracy_smooth = self.config.accuracy_smooth;
        let dice_smooth = self.config.mask_loss.smooth;
        let steps = self.config.steps_per_epoch;
        let validation_steps = self.config.validation_steps;

        for epoch in self.epoch()..options.epochs {
            let mut train_metrics = EpochMetrics::new(accuracy_smooth, dice_smooth);
            for step in 0..steps {
                let batch = batcher.batch_raw(train_feed.next_batch()?, &self.device);
                net.validate_batch(&batch)?;
                let output = TrainStep::step(&net, batch);
                let metadata =
                    step_metadata(epoch, options.epochs, step, steps, Some(options.learning_rate));
                train_metrics.update(&output.item, &metadata);

                net = optimizer.step(options.learning_rate, net, output.grads);
                tracing::debug!(epoch, step, loss = train_metrics.loss.value(), "Train step");
            }

            let valid = net.valid();
            let mut val_metrics = EpochMetrics::new(accuracy_smooth, dice_smooth);
            for step in 0..validation_steps {
                let batch = val_batcher.batch_raw(val_feed.next_batch()?, &self.device);
                valid.validate_batch(&batch)?;
                let output = ValidStep::step(&valid, batch);
                let metadata = step_metadata(epoch, options.epochs, step, validation_steps, None);
                val_metrics.update(&output, &metadata);
            }

            let [loss, mask_loss, mask_accuracy, dice_coef] = train_metrics.means();
            let [val_loss, val_mask_loss, val_mask_accuracy, val_dice_coef] = val_metrics.means();
            let summary = EpochSummary {
                epoch: epoch + 1,
                loss,
                mask_loss,
                mask_accuracy,
                dice_coef,
                val_loss,
                val_mask_loss,
                val_mask_accuracy,
                val_dice_coef,
            };
            tracing::info!(
                epoch = summary.epoch,
                loss = summary.loss,
                mask_loss = summary.mask_loss,
                mask_accuracy = summary.mask_accuracy,
                dice_coef = summary.dice_coef,
                val_loss = summary.val_loss,
                val_mask_accuracy = summary.val_mask_accuracy,
                val_dice_coef = summary.val_dice_coef,
                "Epoch finished"
            );

            self.net = template.clone().load_record(net.clone().into_record());
            self.save_checkpoint(epoch + 1)?;
            self.layout.set_epoch(epoch + 1);
            for callback in callbacks.iter_mut() {
                callback.on_epoch_end(&summary);
            }
        }

        self.layout.set_epoch(self.epoch().max(options.epochs));
        Ok(())
    }
}
