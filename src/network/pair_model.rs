use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Deserialize};

use crate::data::vectors::VectorTable;
use crate::error::{NnError, NnResult};
use crate::layers::{diff, pooling, ExtractWindow, Maxout, Reduction, Softmax, StaticVectors, WordIds};
use crate::math::matrix::Matrix;
use crate::model::combinators::{clone, flatten_add_lengths, with_flat};
use crate::model::model::{boxed, Model};
use crate::model::util::{collect_params, load_params};
use crate::network::metadata::ModelMetadata;
use crate::network::network::{Component, Network, NetworkTemplate};

/// How each encoded text is reduced to a single vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolingKind {
    #[serde(rename = "mean")]
    Mean,
    #[serde(rename = "max")]
    Max,
    /// Both, side by side. Doubles the sentence vector width.
    #[serde(rename = "mean+max")]
    MeanMax,
}

impl PoolingKind {
    fn reductions(self) -> &'static [Reduction] {
        match self {
            PoolingKind::Mean => &[Reduction::Mean],
            PoolingKind::Max => &[Reduction::Max],
            PoolingKind::MeanMax => &[Reduction::Mean, Reduction::Max],
        }
    }
}

impl FromStr for PoolingKind {
    type Err = NnError;

    fn from_str(s: &str) -> NnResult<Self> {
        match s {
            "mean" => Ok(PoolingKind::Mean),
            "max" => Ok(PoolingKind::Max),
            "mean+max" => Ok(PoolingKind::MeanMax),
            other => Err(NnError::InvalidConfig(format!("unrecognised pooling: {}", other))),
        }
    }
}

impl fmt::Display for PoolingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PoolingKind::Mean => "mean",
            PoolingKind::Max => "max",
            PoolingKind::MeanMax => "mean+max",
        })
    }
}

/// Architecture of the text-pair classifier.
///
/// ```text
/// sent2vec = word_ids >> flatten_add_lengths >> with_flat(static_vectors(width))
///            >> clone(window >> with_flat(maxout(width)), depth)
///            >> pooling
/// model    = diff(sent2vec) >> maxout(width) >> softmax
/// ```
///
/// The window-then-maxout block gives every token a position-sensitive
/// vector; each repetition widens its view by `window` tokens on each side.
/// Windows work on the ragged batch, so they never reach into another text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairModelConfig {
    pub width: usize,
    pub depth: usize,
    pub pieces: usize,
    pub pooling: PoolingKind,
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_window() -> usize {
    1
}

impl Default for PairModelConfig {
    fn default() -> Self {
        PairModelConfig { width: 128, depth: 2, pieces: 3, pooling: PoolingKind::MeanMax, window: 1 }
    }
}

impl PairModelConfig {
    pub fn build(&self, table: Arc<VectorTable>) -> NnResult<Box<dyn Model>> {
        if self.width == 0 || self.pieces == 0 {
            return Err(NnError::InvalidConfig("width and pieces must be at least 1".into()));
        }
        let width = self.width;
        let pieces = self.pieces;

        let mwe_encode = boxed(ExtractWindow::new(self.window))
            >> with_flat(boxed(Maxout::new(width, Some(width * (2 * self.window + 1)), pieces)));
        let sent2vec = boxed(WordIds::new(Arc::clone(&table)))
            >> flatten_add_lengths()
            >> with_flat(boxed(StaticVectors::new(table, width)))
            >> clone(mwe_encode, self.depth)
            >> pooling(self.pooling.reductions());

        let template = NetworkTemplate::new(
            "text_pair_classifier",
            Box::new(move |dims: &[usize]| -> NnResult<Box<dyn Model>> {
                let nr_out = *dims.first()
                    .ok_or_else(|| NnError::InvalidConfig("maxout needs an output width".into()))?;
                Ok(boxed(Maxout::new(nr_out, dims.get(1).copied(), pieces)))
            }),
        )
        .with_last(Box::new(|dims: &[usize]| -> NnResult<Box<dyn Model>> {
            Ok(boxed(Softmax::new(dims.first().copied(), dims.get(1).copied())))
        }));

        let network = Network::new(&template, vec![
            Component::Model(diff(sent2vec)),
            Component::Shape(vec![width]),
            Component::Shape(vec![]),
        ])?;
        Ok(boxed(network))
    }
}

/// A trained model on disk: its architecture plus every parameter in visit
/// order. Word vectors are not included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    pub config: PairModelConfig,
    #[serde(default)]
    pub metadata: ModelMetadata,
    pub params: Vec<Matrix>,
}

impl SavedModel {
    pub fn capture(config: &PairModelConfig, metadata: ModelMetadata, model: &mut dyn Model) -> SavedModel {
        SavedModel { config: config.clone(), metadata, params: collect_params(model) }
    }

    /// Rebuilds the architecture against `table` and loads the parameters.
    pub fn restore(self, table: Arc<VectorTable>) -> NnResult<Box<dyn Model>> {
        let mut model = self.config.build(table)?;
        load_params(model.as_mut(), self.params)?;
        Ok(model)
    }

    /// Serializes the model to a JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> NnResult<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Deserializes a model file previously written by `save_json`.
    pub fn load_json<P: AsRef<Path>>(path: P) -> NnResult<SavedModel> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
