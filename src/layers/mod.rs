pub mod extract_window;
pub mod maxout;
pub mod pair_diff;
pub mod pooling;
pub mod softmax;
pub mod static_vectors;

pub use extract_window::ExtractWindow;
pub use maxout::Maxout;
pub use pair_diff::{diff, PairDiff};
pub use pooling::{max_pool, mean_pool, pooling, Pool, Reduction};
pub use softmax::Softmax;
pub use static_vectors::{StaticVectors, WordIds};
