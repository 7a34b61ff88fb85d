//! The segmentation network: a backbone followed by the mask decoder, with the mask
//! loss and accuracy computed inside the graph.

use burn::{
    module::Ignored,
    nn::conv::Conv2d,
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};
use maskseg_backbones::Backbone;
use maskseg_extra_ops::{l2_penalty, ConvLayers, SelectTrainable};
use maskseg_loss::MaskLoss;
use maskseg_metric::mask_accuracy;

use crate::{
    config::{MaskModelConfig, ModelMode},
    decoder::{Decoder, DecoderConfig},
    error::{ModelError, ModelResult},
    training::{MaskBatch, MaskOutput},
};

impl MaskModelConfig {
    /// Build the [segmentation network](SegmentationNet) for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] if the configuration does not validate.
    pub fn init<B: Backend>(
        &self,
        mode: ModelMode,
        device: &B::Device,
    ) -> ModelResult<SegmentationNet<B>> {
        self.validate()?;

        let bn_mode = mode.batch_norm_mode();
        let backbone = self.backbone.init(bn_mode, device);
        let decoder =
            DecoderConfig::new(backbone.out_channels(), self.num_classes).init(bn_mode, device)?;

        tracing::debug!(
            backbone = %self.backbone.kind,
            mode = mode.as_str(),
            classes = self.num_classes,
            "Built segmentation network"
        );

        Ok(SegmentationNet {
            backbone,
            decoder,
            mask_loss: self.mask_loss.init(),
            in_channels: self.image_shape[2],
            num_classes: self.num_classes,
            mask_loss_weight: self.mask_loss_weight(),
            weight_decay: self.weight_decay,
            accuracy_smooth: self.accuracy_smooth,
            mode: Ignored(mode),
            trainable_convs: Ignored(None),
        })
    }
}

/// Backbone, decoder and training objective.
#[derive(Module, Debug)]
pub struct SegmentationNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub decoder: Decoder<B>,
    mask_loss: MaskLoss,
    in_channels: usize,
    num_classes: usize,
    mask_loss_weight: f64,
    weight_decay: f64,
    accuracy_smooth: f64,
    mode: Ignored<ModelMode>,
    /// Trainability of each convolution in `conv_layers` order, recorded by
    /// `select_trainable`. `None` means every convolution trains.
    trainable_convs: Ignored<Option<Vec<bool>>>,
}

impl<B: Backend> SegmentationNet<B> {
    /// Mode the network was built for.
    pub fn mode(&self) -> ModelMode {
        *self.mode
    }

    /// Predict mask probabilities.
    ///
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, num_classes, height, width]`
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTensorShape`] when the images do not have the
    /// configured number of channels.
    pub fn forward(&self, images: Tensor<B, 4>) -> ModelResult<Tensor<B, 4>> {
        let [_, channels, height, width] = images.dims();
        if channels != self.in_channels {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("[batch_size, {}, height, width]", self.in_channels),
                actual: format!("{:?}", images.dims()),
            });
        }

        let features = self.backbone.forward(images);
        self.decoder.forward(features, [height, width])
    }

    /// Check that `batch` fits the network.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTensorShape`] when the images do not have the
    /// configured channels or the masks are not `[batch_size, num_classes, height, width]`.
    pub fn validate_batch(&self, batch: &MaskBatch<B>) -> ModelResult<()> {
        let [batch_size, channels, height, width] = batch.images.dims();
        if channels != self.in_channels {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("[batch_size, {}, height, width]", self.in_channels),
                actual: format!("{:?}", batch.images.dims()),
            });
        }

        let expected = [batch_size, self.num_classes, height, width];
        if batch.masks.dims() != expected {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("{expected:?}"),
                actual: format!("{:?}", batch.masks.dims()),
            });
        }

        Ok(())
    }

    /// Predict masks and evaluate the training objective on `batch`.
    ///
    /// `loss = mask_loss_weight * mask_loss + l2_penalty`
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTensorShape`] when the images or the target masks
    /// do not fit the network.
    pub fn forward_training(&self, batch: MaskBatch<B>) -> ModelResult<MaskOutput<B>> {
        self.validate_batch(&batch)?;
        let MaskBatch { images, masks } = batch;

        let mask = self.forward(images)?;
        let mask_loss = self.mask_loss.forward(mask.clone(), masks.clone());
        let accuracy = mask_accuracy(mask.clone().detach(), masks.clone(), self.accuracy_smooth);
        let loss = mask_loss
            .clone()
            .mul_scalar(self.mask_loss_weight)
            .add(self.l2_penalty(&mask.device()));

        Ok(MaskOutput::new(loss, mask_loss, accuracy, mask, masks))
    }

    /// Weight decay term over the trainable convolutions of the network.
    pub fn l2_penalty(&self, device: &B::Device) -> Tensor<B, 1> {
        if self.weight_decay == 0.0 {
            return Tensor::zeros([1], device);
        }

        let convs = self.conv_layers();
        let convs: Vec<&Conv2d<B>> = match &self.trainable_convs.0 {
            Some(trainable) => convs
                .into_iter()
                .zip(trainable)
                .filter_map(|(conv, &trainable)| trainable.then_some(conv))
                .collect(),
            None => convs,
        };
        l2_penalty(&convs, self.weight_decay, device)
    }
}

/// # Panics
///
/// Panics if the batch does not fit the network. Check it with
/// [`SegmentationNet::validate_batch`] first.
impl<B: AutodiffBackend> TrainStep<MaskBatch<B>, MaskOutput<B>> for SegmentationNet<B> {
    fn step(&self, batch: MaskBatch<B>) -> TrainOutput<MaskOutput<B>> {
        let item = self
            .forward_training(batch)
            .unwrap_or_else(|err| panic!("training step on an invalid batch: {err}"));
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MaskBatch<B>, MaskOutput<B>> for SegmentationNet<B> {
    fn step(&self, batch: MaskBatch<B>) -> MaskOutput<B> {
        self.forward_training(batch)
            .unwrap_or_else(|err| panic!("validation step on an invalid batch: {err}"))
    }
}

impl<B: Backend> ConvLayers<B> for SegmentationNet<B> {
    fn conv_layers(&self) -> Vec<&Conv2d<B>> {
        let mut convs = self.backbone.conv_layers();
        convs.extend(self.decoder.conv_layers());
        convs
    }
}

impl<B: Backend> SelectTrainable for SegmentationNet<B> {
    fn select_trainable(self, is_trainable: &dyn Fn(&str) -> bool) -> Self {
        let net = Self {
            backbone: self.backbone.select_trainable(is_trainable),
            decoder: self.decoder.select_trainable(is_trainable),
            ..self
        };
        if !B::ad_enabled() {
            return net;
        }

        let trainable: Vec<bool> = net
            .conv_layers()
            .iter()
            .map(|conv| conv.weight.val().is_require_grad())
            .collect();
        Self {
            trainable_convs: Ignored(Some(trainable)),
            ..net
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use burn::{
        module::AutodiffModule,
        tensor::{cast::ToElement, Distribution},
    };
    use maskseg_backbones::{BackboneConfig, BackboneKind};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    fn small_config() -> MaskModelConfig {
        MaskModelConfig::new()
            .with_image_shape([16, 16, 3])
            .with_num_classes(2)
            .with_backbone(BackboneConfig::new().with_kernel_size(3))
    }

    fn batch<B: Backend>(config: &MaskModelConfig, device: &B::Device) -> MaskBatch<B> {
        let [height, width, channels] = config.image_shape;
        let images = Tensor::random([2, channels, height, width], Distribution::Default, device);
        let masks = Tensor::random(
            [2, config.num_classes, height, width],
            Distribution::Bernoulli(0.3),
            device,
        );
        MaskBatch::new(images, masks)
    }

    #[test]
    fn forward_predicts_one_mask_per_class() {
        let device = Default::default();
        let config = small_config();
        let net = config
            .init::<TestBackend>(ModelMode::Inference, &device)
            .unwrap();

        let masks = net.forward(batch(&config, &device).images).unwrap();

        assert_eq!(masks.dims(), [2, 2, 16, 16]);
        assert_eq!(net.mode(), ModelMode::Inference);
    }

    #[test]
    fn forward_rejects_wrong_channel_count() {
        let device = Default::default();
        let net = small_config()
            .init::<TestBackend>(ModelMode::Inference, &device)
            .unwrap();
        let images = Tensor::<TestBackend, 4>::zeros([1, 1, 16, 16], &device);

        let err = net.forward(images).unwrap_err();

        assert!(matches!(err, ModelError::InvalidTensorShape { .. }));
    }

    #[test]
    fn init_rejects_invalid_config() {
        let device = Default::default();
        let result = small_config()
            .with_image_shape([15, 16, 3])
            .init::<TestBackend>(ModelMode::Training, &device);

        assert!(matches!(
            result,
            Err(ModelError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn training_loss_is_weighted_mask_loss_without_decay() {
        let device = Default::default();
        let mut config = small_config().with_weight_decay(0.0);
        config.loss_weights.insert("mask_loss_l".to_string(), 2.0);
        let net = config
            .init::<TestBackend>(ModelMode::Training, &device)
            .unwrap();

        let output = net.forward_training(batch(&config, &device)).unwrap();

        let loss = output.loss.into_scalar().to_f64();
        let mask_loss = output.mask_loss.into_scalar().to_f64();
        let accuracy = output.mask_accuracy.into_scalar().to_f64();
        assert_relative_eq!(loss, 2.0 * mask_loss, epsilon = 1e-5);
        assert!(mask_loss.is_finite() && mask_loss > 0.0);
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn weight_decay_adds_positive_penalty() {
        let device = Default::default();
        let config = small_config().with_weight_decay(0.01);
        let net = config
            .init::<TestBackend>(ModelMode::Training, &device)
            .unwrap();

        let output = net.forward_training(batch(&config, &device)).unwrap();

        let loss = output.loss.into_scalar().to_f64();
        let mask_loss = output.mask_loss.into_scalar().to_f64();
        assert!(loss > mask_loss);
        assert!(net.l2_penalty(&device).into_scalar().to_f64() > 0.0);
    }

    #[test]
    fn training_rejects_mismatched_targets() {
        let device = Default::default();
        let config = small_config();
        let net = config
            .init::<TestBackend>(ModelMode::Training, &device)
            .unwrap();
        let images = batch::<TestBackend>(&config, &device).images;
        let masks = Tensor::zeros([2, 3, 16, 16], &device);

        let result = net.forward_training(MaskBatch::new(images, masks));

        assert!(result.is_err());
    }

    #[test]
    fn loss_backpropagates_into_trainable_layers_only() {
        let device = Default::default();
        let config = small_config();
        let net = config
            .init::<TestAutodiffBackend>(ModelMode::Training, &device)
            .unwrap()
            .select_trainable(&|name| name.starts_with("final_"));

        let output = net.forward_training(batch(&config, &device)).unwrap();
        let grads = output.loss.backward();

        let decoder_conv = net.decoder.conv_layers()[0];
        let backbone_conv = net.backbone.conv_layers()[0];
        assert!(decoder_conv.weight.val().grad(&grads).is_some());
        assert!(backbone_conv.weight.val().grad(&grads).is_none());
    }

    #[test]
    fn validate_batch_rejects_wrong_class_count() {
        let device = Default::default();
        let config = small_config();
        let net = config
            .init::<TestBackend>(ModelMode::Training, &device)
            .unwrap();
        let good = batch::<TestBackend>(&config, &device);
        let bad = MaskBatch::new(good.images.clone(), Tensor::zeros([2, 1, 16, 16], &device));

        assert!(net.validate_batch(&good).is_ok());
        assert!(matches!(
            net.validate_batch(&bad),
            Err(ModelError::InvalidTensorShape { .. })
        ));
    }

    #[test]
    fn train_step_returns_gradients_of_trainable_parameters() {
        let device = Default::default();
        let config = small_config();
        let net = config
            .init::<TestAutodiffBackend>(ModelMode::Training, &device)
            .unwrap()
            .select_trainable(&|name| name.starts_with("final_"));

        let output = TrainStep::step(&net, batch(&config, &device));

        let decoder_conv = net.decoder.conv_layers()[0];
        let backbone_conv = net.backbone.conv_layers()[0];
        assert!(output
            .grads
            .get::<TestBackend, 4>(decoder_conv.weight.id)
            .is_some());
        assert!(output
            .grads
            .get::<TestBackend, 4>(backbone_conv.weight.id)
            .is_none());
        assert_eq!(output.item.batch_size(), 2);
    }

    #[test]
    fn valid_step_evaluates_the_training_objective() {
        let device = Default::default();
        let config = small_config();
        let net = config
            .init::<TestBackend>(ModelMode::Inference, &device)
            .unwrap();
        let batch = batch::<TestBackend>(&config, &device);

        let expected = net.forward_training(batch.clone()).unwrap();
        let output = ValidStep::step(&net, batch);

        assert_relative_eq!(
            output.loss.into_scalar().to_f64(),
            expected.loss.into_scalar().to_f64(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn frozen_convolutions_are_not_penalised() {
        let device = Default::default();
        let config = small_config().with_weight_decay(0.01);
        let net = config
            .init::<TestAutodiffBackend>(ModelMode::Training, &device)
            .unwrap();
        let full = net.l2_penalty(&device).into_scalar().to_f64();

        let net = net.select_trainable(&|name| name.starts_with("final_"));
        let all_convs = net.conv_layers().len();
        let trainable: Vec<_> = net
            .conv_layers()
            .into_iter()
            .filter(|conv| conv.weight.val().is_require_grad())
            .collect();
        let expected = l2_penalty(&trainable, 0.01, &device).into_scalar().to_f64();

        let penalty = net.l2_penalty(&device).into_scalar().to_f64();
        let valid_penalty = net.valid().l2_penalty(&device).into_scalar().to_f64();

        assert!(!trainable.is_empty() && trainable.len() < all_convs);
        assert_relative_eq!(penalty, expected, epsilon = 1e-6);
        assert_relative_eq!(valid_penalty, expected, epsilon = 1e-6);
        assert!(penalty < full);
    }

    #[test]
    fn short_dense_backbone_decodes_to_input_size() {
        let device = Default::default();
        let config = MaskModelConfig::new()
            .with_image_shape([32, 32, 3])
            .with_num_classes(1)
            .with_backbone(BackboneConfig::new().with_kind(BackboneKind::DenseSimpleShort));
        let net = config
            .init::<TestBackend>(ModelMode::Inference, &device)
            .unwrap();
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);

        let masks = net.forward(images).unwrap();

        assert_eq!(masks.dims(), [1, 1, 32, 32]);
        assert_eq!(net.decoder.stages().len(), 3);
    }
}
