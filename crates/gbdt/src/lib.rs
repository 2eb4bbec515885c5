//! Outreach GBDT - deterministic binary gradient boosting
//!
//! Trains log-loss Gradient Boosted Decision Trees with exact-greedy CART
//! splits and validation early stopping. Identical inputs and parameters
//! always produce identical models.

pub mod cart;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod model;
pub mod trainer;
pub mod tree;

pub use dataset::{Dataset, FeatureStats};
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use errors::BoosterError;
pub use model::{sigmoid, GbdtModel};
pub use trainer::{log_loss, GbdtConfig, GbdtTrainer, MAX_DEPTH};
pub use tree::{Node, Tree};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
