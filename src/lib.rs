pub mod data;
pub mod error;
pub mod layers;
pub mod loss;
pub mod math;
pub mod model;
pub mod network;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use error::{NnError, NnResult};
pub use math::matrix::Matrix;
pub use model::{boxed, chain, clone, concatenate, Batch, Model};
pub use network::{Network, PairModelConfig, SavedModel};
pub use optim::{Adam, Optimizer, Sgd};
pub use train::{evaluate, train_loop, EpochStats, TrainConfig, Trainer};
