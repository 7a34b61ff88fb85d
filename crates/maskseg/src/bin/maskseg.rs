use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use maskseg::{
    backend::{create_device, get_backend_name, TrainingBackend},
    model::{MaskModelConfig, ModelMode},
    train::{AugmentationConfig, RleCsvDataset},
    History, MaskModel, TrainOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maskseg")]
#[command(about = "Mask segmentation with residual and dense backbones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on run-length annotated images
    Train {
        /// Model configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Training annotations (`ImageId,EncodedPixels` CSV)
        #[arg(long)]
        dataset_csv: PathBuf,

        /// Directory holding the training images
        #[arg(long)]
        images_dir: PathBuf,

        /// Validation annotations; defaults to the training annotations
        #[arg(long)]
        val_csv: Option<PathBuf>,

        /// Size of the images on disk
        #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"], default_values_t = [1400, 2100])]
        source_size: Vec<usize>,

        /// Directory for run directories and checkpoints
        #[arg(long, default_value = "logs")]
        model_dir: PathBuf,

        /// Checkpoint to resume from, or `last`
        #[arg(short, long)]
        resume: Option<String>,

        /// `all` or a regex over layer names
        #[arg(long, default_value = "all")]
        layers: String,

        /// Train until this many epochs are completed
        #[arg(long, default_value_t = 1)]
        epochs: usize,

        /// Enable flip and shift-scale-rotate augmentation
        #[arg(long)]
        augment: bool,

        /// Feeder threads; defaults to one per CPU
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print the last checkpoint of the most recent run
    FindLast {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long, default_value = "logs")]
        model_dir: PathBuf,
    },

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let device = create_device();

    match cli.command {
        Commands::Train {
            config,
            dataset_csv,
            images_dir,
            val_csv,
            source_size,
            model_dir,
            resume,
            layers,
            epochs,
            augment,
            workers,
        } => {
            let config = MaskModelConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let source_size = [source_size[0], source_size[1]];
            let open = |csv: &PathBuf| -> Result<Arc<RleCsvDataset>> {
                let dataset =
                    RleCsvDataset::new(csv, &images_dir, source_size, config.num_classes)?
                        .with_resize(Some(config.image_size()));
                Ok(Arc::new(dataset))
            };
            let train_dataset = open(&dataset_csv)?;
            let val_dataset = open(val_csv.as_ref().unwrap_or(&dataset_csv))?;

            tracing::info!(backend = get_backend_name(), "Starting training");
            let learning_rate = config.learning_rate;
            let mut model =
                MaskModel::<TrainingBackend>::new(ModelMode::Training, config, model_dir, &device)?;
            match resume.as_deref() {
                Some("last") => {
                    let last = model.find_last()?;
                    model.load_weights(&last, true, &[])?;
                }
                Some(path) => model.load_weights(path, true, &[])?,
                None => {}
            }

            let augmentation = if augment {
                AugmentationConfig::default()
            } else {
                AugmentationConfig::none()
            };
            let options = TrainOptions::new(learning_rate, epochs)
                .with_layers(layers)
                .with_augmentation(augmentation)
                .with_workers(workers);
            let mut history = History::default();
            model.train(train_dataset, val_dataset, &options, &mut [&mut history])?;

            if let Some(last) = history.epochs.last() {
                println!("{}", serde_json::to_string_pretty(last)?);
            }
            Ok(())
        }

        Commands::FindLast { config, model_dir } => {
            let config = MaskModelConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let layout = maskseg::CheckpointLayout::new(model_dir, &config.name);
            println!("{}", layout.find_last()?.display());
            Ok(())
        }

        Commands::Info => {
            println!("maskseg");
            println!("  Backend: {}", get_backend_name());
            println!("  Device: {device:?}");
            Ok(())
        }
    }
}
