//! # Data module
//!
//! Character dataset storage, episode sampling and tensor batching.

mod batcher;
mod dataset;
mod sampler;

pub use batcher::{
    episode_loader, in_plan_order, pair_loader, EpisodeBatch, EpisodeBatcher, EpisodeDataset,
    EpisodeItem, PairBatch, PairBatchDataset, PairBatchItem, PairBatcher, PairItem, PlanOrder,
    Planned,
};
pub use dataset::{CharacterClass, CharacterDataset, ImageShape, ItemRef};
pub use sampler::{EpisodeSampler, EpisodeSpec, PairSpec};
