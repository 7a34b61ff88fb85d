//! The model assembler: a [`SegmentationNet`] together with its configuration, run
//! directory and weight files.

use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use maskseg_model::{MaskModelConfig, ModelMode, SegmentationNet, SegmentationNetRecord};

use crate::{
    checkpoint::CheckpointLayout,
    error::{MaskModelError, MaskModelResult},
};

/// Recorder used for every checkpoint.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Top-level components that can be excluded when loading weights.
pub const WEIGHT_COMPONENTS: [&str; 2] = ["backbone", "decoder"];

/// A segmentation network with checkpoint bookkeeping.
pub struct MaskModel<B: Backend> {
    pub(crate) config: MaskModelConfig,
    pub(crate) mode: ModelMode,
    pub(crate) net: SegmentationNet<B>,
    pub(crate) device: B::Device,
    pub(crate) layout: CheckpointLayout,
    last_saved: Option<usize>,
}

impl<B: Backend> MaskModel<B> {
    /// Build the network described by `config`; runs and checkpoints go under
    /// `model_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        mode: ModelMode,
        config: MaskModelConfig,
        model_dir: impl Into<PathBuf>,
        device: &B::Device,
    ) -> MaskModelResult<Self> {
        let net = config.init::<B>(mode, device)?;
        let layout = CheckpointLayout::new(model_dir, &config.name);
        tracing::info!(
            name = %config.name,
            mode = mode.as_str(),
            backbone = %config.backbone.kind,
            "Built mask model"
        );

        Ok(Self {
            config,
            mode,
            net,
            device: device.clone(),
            layout,
            last_saved: None,
        })
    }

    pub const fn config(&self) -> &MaskModelConfig {
        &self.config
    }

    pub const fn mode(&self) -> ModelMode {
        self.mode
    }

    pub const fn net(&self) -> &SegmentationNet<B> {
        &self.net
    }

    /// Number of completed training epochs.
    pub const fn epoch(&self) -> usize {
        self.layout.epoch()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.layout.log_dir()
    }

    /// Checkpoint written after `epoch` completed epochs.
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.layout.checkpoint_path(epoch)
    }

    /// See [`CheckpointLayout::set_log_dir`].
    pub fn set_log_dir(&mut self, model_path: Option<&Path>) -> MaskModelResult<()> {
        self.last_saved = None;
        self.layout.set_log_dir(model_path)
    }

    /// See [`CheckpointLayout::find_last`].
    pub fn find_last(&self) -> MaskModelResult<PathBuf> {
        self.layout.find_last()
    }

    /// Predict mask probabilities for molded images.
    pub fn predict(&self, images: Tensor<B, 4>) -> MaskModelResult<Tensor<B, 4>> {
        Ok(self.net.forward(images)?)
    }

    /// Load weights from `path`, then resume the run the file belongs to.
    ///
    /// Records are matched by parameter name. Components listed in `exclude`
    /// (`backbone`, `decoder`) keep their current parameters, which makes the load
    /// by name regardless of `by_name`.
    ///
    /// # Errors
    ///
    /// Returns [`MaskModelError::CheckpointNotFound`] for a missing file and
    /// [`MaskModelError::Record`] when the file does not fit the network.
    pub fn load_weights(
        &mut self,
        path: impl AsRef<Path>,
        by_name: bool,
        exclude: &[&str],
    ) -> MaskModelResult<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MaskModelError::CheckpointNotFound {
                path: path.to_path_buf(),
            });
        }
        if let Some(unknown) = exclude
            .iter()
            .find(|component| !WEIGHT_COMPONENTS.contains(*component))
        {
            tracing::warn!(component = unknown, "Ignoring unknown component in exclude list");
        }

        let mut record: SegmentationNetRecord<B> = CheckpointRecorder::new()
            .load(path.to_path_buf(), &self.device)
            .map_err(|err| MaskModelError::Record {
                path: path.to_path_buf(),
                reason: format!("{err:?}"),
            })?;

        let by_name = by_name || !exclude.is_empty();
        if !exclude.is_empty() {
            let current = self.net.clone().into_record();
            if exclude.contains(&"backbone") {
                record.backbone = current.backbone;
            }
            if exclude.contains(&"decoder") {
                record.decoder = current.decoder;
            }
        }
        self.net = self.net.clone().load_record(record);

        tracing::info!(path = %path.display(), by_name, ?exclude, "Loaded weights");
        self.set_log_dir(Some(path))
    }

    /// Save the network as the checkpoint of `epoch` completed epochs.
    ///
    /// An epoch is written at most once per run; repeated calls return the existing
    /// path.
    ///
    /// # Errors
    ///
    /// Returns an error if the run directory or the record cannot be written.
    pub fn save_checkpoint(&mut self, epoch: usize) -> MaskModelResult<PathBuf> {
        let path = self.layout.checkpoint_path(epoch);
        if self.last_saved == Some(epoch) {
            return Ok(path);
        }

        let log_dir = self.layout.log_dir();
        std::fs::create_dir_all(&log_dir).map_err(|source| MaskModelError::Io {
            path: log_dir,
            source,
        })?;
        CheckpointRecorder::new()
            .record(self.net.clone().into_record(), path.clone())
            .map_err(|err| MaskModelError::Record {
                path: path.clone(),
                reason: format!("{err:?}"),
            })?;

        self.last_saved = Some(epoch);
        tracing::info!(epoch, path = %path.display(), "Saved checkpoint");
        Ok(path)
    }
}
