//! # Siamese Omniglot
//!
//! Siamese convolutional network for one-shot recognition of handwritten
//! characters, built on the burn framework.
//!
//! ## Overview
//!
//! A shared embedding network maps both images of a pair into `[0, 1]^d`;
//! the element-wise L1 distance of the embeddings feeds a two-way
//! match/mismatch head trained with cross-entropy on balanced same/different
//! pairs. At test time a query is compared against N candidates (one per
//! class) and the best match answers the N-way one-shot task.
//!
//! ## Modules
//!
//! - `data` - Character dataset, episode sampling, tensor batching
//! - `model` - Siamese network and its configuration
//! - `training` - Training loop and one-shot evaluation
//! - `config` - Experiment configuration
//! - `error` - Error types

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod training;

pub use config::{DecisionRule, EvaluationConfig, ExperimentConfig, TrainingConfig};
pub use data::{CharacterDataset, EpisodeSampler, EpisodeSpec, ImageShape, ItemRef, PairSpec};
pub use error::{ErrorCategory, Result, SiameseError};
pub use model::{SiameseConfig, SiameseNetwork};
pub use training::{EpochReport, OneShotAccuracy, OneShotEvaluator, SiameseTrainer, TrainingResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default training dataset file
pub const DEFAULT_TRAIN_FILE: &str = "train_omni.json";

/// Default evaluation dataset file
pub const DEFAULT_TEST_FILE: &str = "test_omni.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
