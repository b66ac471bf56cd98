use thiserror::Error;

pub type NnResult<T> = Result<T, NnError>;

#[derive(Debug, Error)]
pub enum NnError {
    #[error("{layer}: expected {expected} input, got {got}")]
    InputKind {
        layer: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("{layer}: shape mismatch, expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        layer: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("{0}: backprop called without a matching begin_update")]
    NoForwardState(String),

    #[error("{0}: dimensions are not initialized")]
    Uninitialized(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NnError {
    pub(crate) fn input_kind(layer: &str, expected: &'static str, got: &'static str) -> Self {
        NnError::InputKind { layer: layer.to_string(), expected, got }
    }

    pub(crate) fn shape(layer: &str, expected: (usize, usize), got: (usize, usize)) -> Self {
        NnError::ShapeMismatch { layer: layer.to_string(), expected, got }
    }
}
