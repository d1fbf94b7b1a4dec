//! # Training and evaluation
//!
//! - `trainer` - epoch loop over sampled pair batches
//! - `evaluator` - N-way one-shot accuracy

mod evaluator;
mod trainer;

pub use evaluator::{all_pairs_correct, best_match, OneShotAccuracy, OneShotEvaluator};
pub use trainer::{EpochReport, SiameseTrainer, TrainingResult};
