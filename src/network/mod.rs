pub mod metadata;
pub mod network;
pub mod pair_model;

pub use metadata::ModelMetadata;
pub use network::{Component, Network, NetworkTemplate};
pub use pair_model::{PairModelConfig, PoolingKind, SavedModel};
