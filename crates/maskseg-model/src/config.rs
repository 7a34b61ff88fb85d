//! Model and training hyperparameters.

use std::{collections::BTreeMap, fs, path::Path};

use burn::prelude::*;
use maskseg_backbones::BackboneConfig;
use maskseg_extra_ops::BatchNormMode;
use maskseg_loss::MaskLossConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Key of the mask loss in [`MaskModelConfig::loss_weights`].
pub const MASK_LOSS_KEY: &str = "mask_loss_l";

/// Whether a model is built for training or for inference.
///
/// The mode is fixed at construction and decides how every normalization layer
/// treats its statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelMode {
    #[default]
    #[serde(rename = "training")]
    Training,
    #[serde(rename = "inference")]
    Inference,
}

impl ModelMode {
    /// Normalization mode of the layers built in this mode.
    pub const fn batch_norm_mode(self) -> BatchNormMode {
        match self {
            Self::Training => BatchNormMode::Train,
            Self::Inference => BatchNormMode::Frozen,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Inference => "inference",
        }
    }
}

/// Configuration of the segmentation model and of its training.
///
/// Persisted as JSON with [`MaskModelConfig::load`] and [`MaskModelConfig::save`];
/// missing fields take their defaults.
#[derive(Config, Debug)]
pub struct MaskModelConfig {
    /// Model name, used in log directory and checkpoint names.
    #[config(default = "String::from(\"mymodel\")")]
    pub name: String,

    /// Input image shape as `[height, width, channels]`.
    #[config(default = "[384, 576, 3]")]
    pub image_shape: [usize; 3],

    /// Number of mask channels predicted by the network.
    #[config(default = 4)]
    pub num_classes: usize,

    /// Backbone selection.
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,

    #[config(default = 2)]
    pub batch_size: usize,

    #[config(default = 1000)]
    pub steps_per_epoch: usize,

    #[config(default = 50)]
    pub validation_steps: usize,

    #[config(default = 0.001)]
    pub learning_rate: f64,

    #[config(default = 0.9)]
    pub learning_momentum: f64,

    /// Gradients are rescaled so that their global norm stays below this value.
    #[config(default = 5.0)]
    pub gradient_clip_norm: f64,

    #[config(default = 0.0001)]
    pub weight_decay: f64,

    /// Weights of the named losses; a missing key weighs 1.0.
    #[config(default = "BTreeMap::new()")]
    pub loss_weights: BTreeMap<String, f64>,

    /// Per-channel mean subtracted from every image.
    #[config(default = "vec![123.7, 116.8, 103.9]")]
    pub mean_pixel: Vec<f32>,

    #[config(default = "MaskLossConfig::new()")]
    pub mask_loss: MaskLossConfig,

    /// Smoothing constant of the mask accuracy.
    #[config(default = 1.0)]
    pub accuracy_smooth: f64,

    /// Random seed for weight initialization and data shuffling.
    #[config(default = 42)]
    pub seed: u64,
}

impl MaskModelConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|source| ModelError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&config_str).map_err(|source| ModelError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ModelResult<()> {
        let path = path.as_ref();
        let config_str =
            serde_json::to_string_pretty(self).map_err(|source| ModelError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        fs::write(path, config_str).map_err(|source| ModelError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Lowercased name used in paths.
    pub fn name_lower(&self) -> String {
        self.name.to_lowercase()
    }

    /// Weight of the mask loss in the total loss.
    pub fn mask_loss_weight(&self) -> f64 {
        self.loss_weights.get(MASK_LOSS_KEY).copied().unwrap_or(1.0)
    }

    /// Image height and width.
    pub const fn image_size(&self) -> [usize; 2] {
        [self.image_shape[0], self.image_shape[1]]
    }

    /// Checks the invariants the network and the data pipeline rely on.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] describing the first violation.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |reason: String| Err(ModelError::InvalidConfiguration { reason });

        if self.name.is_empty() {
            return invalid("name must not be empty".to_string());
        }

        let [height, width, channels] = self.image_shape;
        if height == 0 || width == 0 || channels == 0 {
            return invalid(format!("image_shape must be positive, got {:?}", self.image_shape));
        }
        if height % 8 != 0 || width % 8 != 0 {
            return invalid(format!(
                "image height and width must be divisible by 8, got {height}x{width}"
            ));
        }
        if self.backbone.in_channels != channels {
            return invalid(format!(
                "backbone expects {} input channels but images have {channels}",
                self.backbone.in_channels
            ));
        }
        if self.mean_pixel.len() != channels {
            return invalid(format!(
                "mean_pixel has {} values for {channels} channels",
                self.mean_pixel.len()
            ));
        }

        for (field, value) in [
            ("backbone.kernel_size", self.backbone.kernel_size),
            ("num_classes", self.num_classes),
            ("batch_size", self.batch_size),
            ("steps_per_epoch", self.steps_per_epoch),
            ("validation_steps", self.validation_steps),
        ] {
            if value == 0 {
                return invalid(format!("{field} must be positive"));
            }
        }

        if self.learning_rate <= 0.0 {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.learning_momentum) {
            return invalid(format!(
                "learning_momentum must be in [0, 1), got {}",
                self.learning_momentum
            ));
        }
        if self.gradient_clip_norm <= 0.0 {
            return invalid(format!(
                "gradient_clip_norm must be positive, got {}",
                self.gradient_clip_norm
            ));
        }
        if self.weight_decay < 0.0 {
            return invalid(format!("weight_decay must be non-negative, got {}", self.weight_decay));
        }

        Ok(())
    }
}
