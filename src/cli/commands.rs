use std::path::PathBuf;

use clap::{Args, Subcommand};
use pairwise_nn::data::DatasetKind;
use pairwise_nn::network::{PairModelConfig, PoolingKind};
use pairwise_nn::train::TrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a text-pair classifier and optionally save it
    Train(TrainArgs),

    /// Score a saved model on a dataset's dev portion
    Evaluate(EvaluateArgs),
}

/// Where the data lives. Shared by both subcommands.
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Dataset to load (quora or snli)
    #[arg(default_value = "quora")]
    pub dataset: DatasetKind,

    /// Directory holding the dataset files
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Fraction of a single-file dataset held out for dev
    #[arg(long, default_value_t = 0.1)]
    pub dev_fraction: f64,

    /// Seed for the train/dev split
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Word vectors in GloVe text format
    #[arg(long)]
    pub vectors: PathBuf,

    /// Width of the hidden layers
    #[arg(short = 'w', long, default_value_t = 128)]
    pub width: usize,

    /// Depth of the hidden layers
    #[arg(short = 'd', long, default_value_t = 2)]
    pub depth: usize,

    /// Minimum minibatch size during training
    #[arg(short = 'b', long, default_value_t = 128)]
    pub min_batch_size: usize,

    /// Maximum minibatch size during training
    #[arg(short = 'B', long, default_value_t = 128)]
    pub max_batch_size: usize,

    /// Dropout rate
    #[arg(short = 'D', long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Dropout decay
    #[arg(short = 'C', long, default_value_t = 0.0)]
    pub dropout_decay: f64,

    /// Number of epochs
    #[arg(short = 'i', long, default_value_t = 20)]
    pub nb_epoch: usize,

    /// Number of pieces for maxout
    #[arg(short = 'p', long, default_value_t = 3)]
    pub pieces: usize,

    /// Which pooling to use (mean, max or mean+max)
    #[arg(short = 'P', long, default_value = "mean+max")]
    pub pooling: PoolingKind,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.001)]
    pub learn_rate: f64,

    /// File to save the model
    #[arg(short = 'o', long)]
    pub out_loc: Option<PathBuf>,

    /// Don't log per-batch progress
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl From<&TrainArgs> for PairModelConfig {
    fn from(args: &TrainArgs) -> Self {
        PairModelConfig {
            width: args.width,
            depth: args.depth,
            pieces: args.pieces,
            pooling: args.pooling,
            ..PairModelConfig::default()
        }
    }
}

impl From<&TrainArgs> for TrainConfig {
    fn from(args: &TrainArgs) -> Self {
        TrainConfig {
            nb_epoch: args.nb_epoch,
            min_batch_size: args.min_batch_size,
            max_batch_size: args.max_batch_size,
            dropout: args.dropout,
            dropout_decay: args.dropout_decay,
            learn_rate: args.learn_rate,
            quiet: args.quiet,
            ..TrainConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Model file written by `train --out-loc`
    pub model: PathBuf,

    #[command(flatten)]
    pub data: DataArgs,

    /// Word vectors; defaults to the path recorded in the model file
    #[arg(long)]
    pub vectors: Option<PathBuf>,
}
