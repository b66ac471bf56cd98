pub mod datasets;
pub mod tokenizer;
pub mod vectors;

pub use datasets::{preprocess, to_categorical, DatasetKind, Example};
pub use tokenizer::tokenize;
pub use vectors::VectorTable;
