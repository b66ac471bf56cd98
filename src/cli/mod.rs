mod commands;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pairwise_nn::data::{preprocess, VectorTable};
use pairwise_nn::network::{ModelMetadata, PairModelConfig, SavedModel};
use pairwise_nn::train::{evaluate, train_loop, TrainConfig, Trainer};

pub use commands::{Commands, EvaluateArgs, TrainArgs};

/// Train and evaluate text-pair classifiers over pretrained word vectors.
#[derive(Parser, Debug)]
#[command(name = "pairwise", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => train(args),
            Commands::Evaluate(args) => evaluate_saved(args),
        }
    }
}

fn load_vectors(path: &Path) -> Result<Arc<VectorTable>> {
    let table = VectorTable::load_text(path)
        .with_context(|| format!("Failed to load word vectors from {}", path.display()))?;
    Ok(Arc::new(table))
}

/// Fails early when the model could not be saved at the end of training.
fn check_out_loc(out_loc: &Path) -> Result<()> {
    let parent = out_loc.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    if !parent.exists() {
        bail!("Can't write model to {}: directory does not exist", out_loc.display());
    }
    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    if let Some(out_loc) = &args.out_loc {
        check_out_loc(out_loc)?;
    }

    let model_config = PairModelConfig::from(&args);
    let train_config = TrainConfig::from(&args);
    tracing::info!(
        dataset = %args.data.dataset,
        width = model_config.width,
        depth = model_config.depth,
        pieces = model_config.pieces,
        pooling = %model_config.pooling,
        dropout = train_config.dropout,
        dropout_decay = train_config.dropout_decay,
        min_batch_size = train_config.min_batch_size,
        max_batch_size = train_config.max_batch_size,
        nb_epoch = train_config.nb_epoch,
        "configuration"
    );

    let table = load_vectors(&args.vectors)?;
    let mut model = model_config.build(Arc::clone(&table))?;

    let dataset = args.data.dataset;
    let (train_rows, dev_rows) = dataset
        .load(&args.data.data_dir, args.data.dev_fraction, args.data.seed)
        .with_context(|| format!("Failed to load {} from {}", dataset, args.data.data_dir.display()))?;
    tracing::info!(train = train_rows.len(), dev = dev_rows.len(), "loaded dataset");
    let (train_x, train_y) = preprocess(&train_rows, dataset.nr_class());
    let (dev_x, dev_y) = preprocess(&dev_rows, dataset.nr_class());

    let mut trainer = Trainer::begin_training(model.as_mut(), &train_x, &train_y, train_config)?;
    tracing::info!(nr_weight = model.nr_weight(), "model ready");
    let before = evaluate(model.as_ref(), &dev_x, &dev_y)?;
    tracing::info!("Accuracy before training: {:.3}", before);

    let last = train_loop(model.as_mut(), &mut trainer, &train_x, &train_y, Some((&dev_x, &dev_y)))?;
    if let Some(stats) = last {
        println!(
            "{:.3} dev accuracy ({:.3} averaged) after {} epochs",
            stats.dev_accuracy.unwrap_or(0.0),
            stats.dev_accuracy_averaged.unwrap_or(0.0),
            stats.epoch,
        );
    }

    if let Some(out_loc) = &args.out_loc {
        let metadata = ModelMetadata {
            description: Some(format!("{} pair classifier", dataset)),
            labels: Some(dataset.labels().iter().map(|l| l.to_string()).collect()),
            vectors: Some(args.vectors.display().to_string()),
        };
        SavedModel::capture(&model_config, metadata, model.as_mut())
            .save_json(out_loc)
            .with_context(|| format!("Failed to save model to {}", out_loc.display()))?;
        tracing::info!(path = %out_loc.display(), "saved model");
    }
    Ok(())
}

fn evaluate_saved(args: EvaluateArgs) -> Result<()> {
    let saved = SavedModel::load_json(&args.model)
        .with_context(|| format!("Failed to read model from {}", args.model.display()))?;
    let vectors = match (&args.vectors, &saved.metadata.vectors) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => path.into(),
        (None, None) => bail!("No word vectors given and none recorded in {}", args.model.display()),
    };
    let table = load_vectors(&vectors)?;
    let model = saved.restore(table)?;

    let dataset = args.data.dataset;
    let (_, dev_rows) = dataset
        .load(&args.data.data_dir, args.data.dev_fraction, args.data.seed)
        .with_context(|| format!("Failed to load {} from {}", dataset, args.data.data_dir.display()))?;
    let (dev_x, dev_y) = preprocess(&dev_rows, dataset.nr_class());
    let accuracy = evaluate(model.as_ref(), &dev_x, &dev_y)?;
    println!("{:.3} dev accuracy on {} pairs", accuracy, dev_rows.len());
    Ok(())
}
