pub mod batch;
pub mod combinators;
pub mod model;
pub mod util;

pub use batch::Batch;
pub use combinators::{chain, clone, concatenate, flatten_add_lengths, with_flat};
pub use model::{boxed, next_model_id, Input, Model, ParamKey, Prediction};
pub use util::{minibatch, pipe, update, use_params};
