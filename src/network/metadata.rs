use serde::{Deserialize, Serialize};

/// Optional annotations attached to a saved model.
/// All fields are Option<> so older files without them deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelMetadata {
    pub description: Option<String>,
    /// Human-readable class labels for the output layer, in column order.
    pub labels: Option<Vec<String>>,
    /// Word vectors the model was trained with. They are not stored in the
    /// model file and must be supplied again when loading.
    pub vectors: Option<String>,
}
