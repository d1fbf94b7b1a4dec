//! Tensor batching and parallel loading of sampled plans
//!
//! Each loader item is a whole training batch plan or a whole evaluation
//! episode, so the worker pool never splits a batch across workers.
//! Workers deliver batches in completion order; [`in_plan_order`] restores
//! the sampled order before batches reach the optimizer.

use super::dataset::{CharacterDataset, ImageShape};
use super::sampler::{EpisodeSpec, PairSpec};
use crate::error::{Result, SiameseError};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

/// Loaded images of one training pair
#[derive(Debug, Clone)]
pub struct PairItem {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub label: i64,
}

/// Loaded images of one training batch plan
#[derive(Debug, Clone)]
pub struct PairBatchItem {
    /// Index of the plan within the epoch
    pub plan: usize,
    pub pairs: Vec<PairItem>,
}

/// Loaded images of one evaluation episode
#[derive(Debug, Clone)]
pub struct EpisodeItem {
    pub query: Vec<f32>,
    pub candidates: Vec<Vec<f32>>,
    pub target: usize,
}

/// Training batches as a burn dataset over the sampled plans
pub struct PairBatchDataset {
    images: Arc<CharacterDataset>,
    plans: Vec<Vec<PairSpec>>,
}

impl PairBatchDataset {
    pub fn new(images: Arc<CharacterDataset>, plans: Vec<Vec<PairSpec>>) -> Self {
        Self { images, plans }
    }

    fn load(&self, index: usize, plan: &[PairSpec]) -> Result<PairBatchItem> {
        let pairs = plan
            .iter()
            .map(|pair| {
                Ok(PairItem {
                    left: self.images.image_values(pair.left)?,
                    right: self.images.image_values(pair.right)?,
                    label: pair.label(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PairBatchItem { plan: index, pairs })
    }
}

impl Dataset<PairBatchItem> for PairBatchDataset {
    fn get(&self, index: usize) -> Option<PairBatchItem> {
        let plan = self.plans.get(index)?;
        match self.load(index, plan) {
            Ok(item) => Some(item),
            Err(err) => {
                error!("Training plan {}: {}", index, err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.plans.len()
    }
}

/// Evaluation episodes as a burn dataset
pub struct EpisodeDataset {
    images: Arc<CharacterDataset>,
    episodes: Vec<EpisodeSpec>,
}

impl EpisodeDataset {
    pub fn new(images: Arc<CharacterDataset>, episodes: Vec<EpisodeSpec>) -> Self {
        Self { images, episodes }
    }

    fn load(&self, episode: &EpisodeSpec) -> Result<EpisodeItem> {
        Ok(EpisodeItem {
            query: self.images.image_values(episode.query)?,
            candidates: episode
                .candidates
                .iter()
                .map(|&candidate| self.images.image_values(candidate))
                .collect::<Result<Vec<_>>>()?,
            target: episode.target,
        })
    }
}

impl Dataset<EpisodeItem> for EpisodeDataset {
    fn get(&self, index: usize) -> Option<EpisodeItem> {
        let episode = self.episodes.get(index)?;
        match self.load(episode) {
            Ok(item) => Some(item),
            Err(err) => {
                error!("Episode {}: {}", index, err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.episodes.len()
    }
}

/// Batch of training pairs
#[derive(Clone, Debug)]
pub struct PairBatch<B: Backend> {
    /// Index of the plan this batch was built from
    pub plan: usize,
    /// Left images [batch, channels, height, width]
    pub left: Tensor<B, 4>,
    /// Right images [batch, channels, height, width]
    pub right: Tensor<B, 4>,
    /// 1 = same class, 0 = different [batch]
    pub labels: Tensor<B, 1, Int>,
}

/// Batch of one-shot episodes flattened into pairs
///
/// Row `e * ways + j` compares the query of episode `e` with its candidate `j`.
#[derive(Clone, Debug)]
pub struct EpisodeBatch<B: Backend> {
    /// Queries repeated once per candidate [episodes * ways, c, h, w]
    pub queries: Tensor<B, 4>,
    /// Candidates [episodes * ways, c, h, w]
    pub candidates: Tensor<B, 4>,
    /// Position of the genuine match, per episode
    pub targets: Vec<usize>,
    /// Candidates per episode (N)
    pub ways: usize,
}

impl<B: Backend> EpisodeBatch<B> {
    pub fn num_episodes(&self) -> usize {
        self.targets.len()
    }
}

/// Stacks loaded training pairs into tensors
#[derive(Clone, Debug)]
pub struct PairBatcher<B: Backend> {
    shape: ImageShape,
    device: B::Device,
}

impl<B: Backend> PairBatcher<B> {
    pub fn new(shape: ImageShape, device: B::Device) -> Self {
        Self { shape, device }
    }
}

impl<B: Backend> Batcher<PairBatchItem, PairBatch<B>> for PairBatcher<B> {
    fn batch(&self, items: Vec<PairBatchItem>) -> PairBatch<B> {
        let plan = items.first().map(|item| item.plan).unwrap_or(0);
        let pairs: Vec<PairItem> = items.into_iter().flat_map(|item| item.pairs).collect();
        let batch_size = pairs.len();

        let left: Vec<f32> = pairs.iter().flat_map(|p| p.left.iter().copied()).collect();
        let right: Vec<f32> = pairs.iter().flat_map(|p| p.right.iter().copied()).collect();
        let labels: Vec<i64> = pairs.iter().map(|p| p.label).collect();

        PairBatch {
            plan,
            left: images_tensor(left, self.shape, batch_size, &self.device),
            right: images_tensor(right, self.shape, batch_size, &self.device),
            labels: Tensor::from_data(TensorData::new(labels, [batch_size]), &self.device),
        }
    }
}

/// Stacks loaded episodes into query/candidate tensors
#[derive(Clone, Debug)]
pub struct EpisodeBatcher<B: Backend> {
    shape: ImageShape,
    device: B::Device,
}

impl<B: Backend> EpisodeBatcher<B> {
    pub fn new(shape: ImageShape, device: B::Device) -> Self {
        Self { shape, device }
    }
}

impl<B: Backend> Batcher<EpisodeItem, EpisodeBatch<B>> for EpisodeBatcher<B> {
    fn batch(&self, items: Vec<EpisodeItem>) -> EpisodeBatch<B> {
        let ways = items.first().map(|e| e.candidates.len()).unwrap_or(0);
        let rows = items.len() * ways;

        let mut queries = Vec::with_capacity(rows * self.shape.len());
        let mut candidates = Vec::with_capacity(rows * self.shape.len());
        for episode in &items {
            for candidate in &episode.candidates {
                queries.extend_from_slice(&episode.query);
                candidates.extend_from_slice(candidate);
            }
        }

        EpisodeBatch {
            queries: images_tensor(queries, self.shape, rows, &self.device),
            candidates: images_tensor(candidates, self.shape, rows, &self.device),
            targets: items.iter().map(|e| e.target).collect(),
            ways,
        }
    }
}

fn images_tensor<B: Backend>(
    values: Vec<f32>,
    shape: ImageShape,
    batch: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(values, shape.batch_dims(batch)), device)
}

/// Build a loader yielding one tensor batch per training plan
pub fn pair_loader<B: Backend>(
    images: Arc<CharacterDataset>,
    plans: Vec<Vec<PairSpec>>,
    num_workers: usize,
    device: B::Device,
) -> Arc<dyn DataLoader<PairBatch<B>>> {
    let batcher = PairBatcher::<B>::new(images.shape(), device);
    let dataset = PairBatchDataset::new(images, plans);

    let builder = DataLoaderBuilder::new(batcher).batch_size(1);
    let builder = if num_workers > 0 {
        builder.num_workers(num_workers)
    } else {
        builder
    };
    builder.build(dataset)
}

/// A loader output that knows which sampled plan it came from
pub trait Planned {
    fn plan_index(&self) -> usize;
}

impl<B: Backend> Planned for PairBatch<B> {
    fn plan_index(&self) -> usize {
        self.plan
    }
}

/// Iterator yielding loader outputs in plan order `0..planned`
///
/// Early arrivals wait in a reorder buffer. If the loader ends before some
/// plan arrived, the iterator yields one `Resource` error and stops.
pub struct PlanOrder<I, T> {
    inner: I,
    pending: BTreeMap<usize, T>,
    next: usize,
    planned: usize,
    failed: bool,
}

impl<I, T> Iterator for PlanOrder<I, T>
where
    I: Iterator<Item = T>,
    T: Planned,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.planned {
            return None;
        }
        loop {
            if let Some(item) = self.pending.remove(&self.next) {
                self.next += 1;
                return Some(Ok(item));
            }
            match self.inner.next() {
                Some(item) => {
                    self.pending.insert(item.plan_index(), item);
                }
                None => {
                    self.failed = true;
                    return Some(Err(SiameseError::Resource(format!(
                        "data loader delivered no batch for plan {} of {}",
                        self.next + 1,
                        self.planned
                    ))));
                }
            }
        }
    }
}

/// Reorder `batches` into plan order, expecting `planned` of them
pub fn in_plan_order<I, T>(batches: I, planned: usize) -> PlanOrder<I::IntoIter, T>
where
    I: IntoIterator<Item = T>,
    T: Planned,
{
    PlanOrder {
        inner: batches.into_iter(),
        pending: BTreeMap::new(),
        next: 0,
        planned,
        failed: false,
    }
}

/// Build a loader yielding `episodes_per_batch` episodes per tensor batch
pub fn episode_loader<B: Backend>(
    images: Arc<CharacterDataset>,
    episodes: Vec<EpisodeSpec>,
    episodes_per_batch: usize,
    num_workers: usize,
    device: B::Device,
) -> Arc<dyn DataLoader<EpisodeBatch<B>>> {
    let batcher = EpisodeBatcher::<B>::new(images.shape(), device);
    let dataset = EpisodeDataset::new(images, episodes);

    let builder = DataLoaderBuilder::new(batcher).batch_size(episodes_per_batch.max(1));
    let builder = if num_workers > 0 {
        builder.num_workers(num_workers)
    } else {
        builder
    };
    builder.build(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sampler::EpisodeSampler;
    use crate::data::ItemRef;
    use crate::error::ErrorCategory;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn dataset() -> Arc<CharacterDataset> {
        Arc::new(CharacterDataset::synthetic(6, 3, ImageShape::new(1, 8, 8), 42).unwrap())
    }

    #[test]
    fn test_pair_batcher_shapes() {
        let images = dataset();
        let sampler = EpisodeSampler::new(images.class_sizes());
        let mut rng = StdRng::seed_from_u64(1);
        let plans = sampler.sample_pair_batches(1, 5, &mut rng).unwrap();
        let expected: Vec<i64> = plans[0].iter().map(|p| p.label()).collect();

        let dataset = PairBatchDataset::new(images, plans);
        let item = dataset.get(0).unwrap();
        assert!(dataset.get(1).is_none());

        let batcher = PairBatcher::<TestBackend>::new(ImageShape::new(1, 8, 8), Default::default());
        let batch = batcher.batch(vec![item]);

        assert_eq!(batch.left.dims(), [5, 1, 8, 8]);
        assert_eq!(batch.right.dims(), [5, 1, 8, 8]);
        let labels: Vec<i64> = batch
            .labels
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_episode_batcher_layout() {
        let images = dataset();
        let episode = EpisodeSpec {
            query: ItemRef::new(0, 0),
            candidates: vec![ItemRef::new(1, 0), ItemRef::new(0, 1), ItemRef::new(2, 2)],
            target: 1,
        };
        let dataset = EpisodeDataset::new(images.clone(), vec![episode.clone(), episode]);

        let batcher =
            EpisodeBatcher::<TestBackend>::new(ImageShape::new(1, 8, 8), Default::default());
        let batch = batcher.batch(vec![dataset.get(0).unwrap(), dataset.get(1).unwrap()]);

        assert_eq!(batch.num_episodes(), 2);
        assert_eq!(batch.ways, 3);
        assert_eq!(batch.targets, vec![1, 1]);
        assert_eq!(batch.queries.dims(), [6, 1, 8, 8]);
        assert_eq!(batch.candidates.dims(), [6, 1, 8, 8]);

        // Row 4 = episode 1, candidate 1
        let row: Vec<f32> = batch
            .candidates
            .slice([4..5, 0..1, 0..8, 0..8])
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();
        assert_eq!(row, images.image_values(ItemRef::new(0, 1)).unwrap());
    }

    #[test]
    fn test_missing_image_yields_none() {
        let images = dataset();
        let episode = EpisodeSpec {
            query: ItemRef::new(0, 9),
            candidates: vec![ItemRef::new(1, 0), ItemRef::new(2, 0)],
            target: 0,
        };
        assert!(EpisodeDataset::new(images, vec![episode]).get(0).is_none());
    }

    #[test]
    fn test_parallel_pair_loader_yields_every_plan() {
        let images = dataset();
        let sampler = EpisodeSampler::new(images.class_sizes());
        let mut rng = StdRng::seed_from_u64(9);
        let plans = sampler.sample_pair_batches(7, 4, &mut rng).unwrap();

        let loader = pair_loader::<TestBackend>(images, plans, 3, Default::default());
        let batches: Vec<_> = loader.iter().collect();

        assert_eq!(batches.len(), 7);
        assert!(batches.iter().all(|b| b.left.dims() == [4, 1, 8, 8]));
    }

    #[test]
    fn test_parallel_batches_restored_to_plan_order() {
        let images = dataset();
        let sampler = EpisodeSampler::new(images.class_sizes());
        let mut rng = StdRng::seed_from_u64(4);
        let plans = sampler.sample_pair_batches(24, 3, &mut rng).unwrap();
        let expected: Vec<Vec<i64>> = plans
            .iter()
            .map(|plan| plan.iter().map(|p| p.label()).collect())
            .collect();

        let loader = pair_loader::<TestBackend>(images, plans, 4, Default::default());
        let ordered: Vec<PairBatch<TestBackend>> = in_plan_order(loader.iter(), 24)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(ordered.len(), 24);
        for (i, batch) in ordered.into_iter().enumerate() {
            assert_eq!(batch.plan, i);
            let labels: Vec<i64> = batch
                .labels
                .into_data()
                .convert::<i64>()
                .to_vec()
                .unwrap();
            assert_eq!(labels, expected[i]);
        }
    }

    #[test]
    fn test_missing_plan_is_resource_error() {
        let images = dataset();
        let good = PairSpec {
            left: ItemRef::new(0, 0),
            right: ItemRef::new(1, 0),
            same: false,
        };
        let broken = PairSpec {
            left: ItemRef::new(0, 7),
            ..good
        };
        let plans = vec![vec![good], vec![broken], vec![good]];

        let loader = pair_loader::<TestBackend>(images, plans, 0, Default::default());
        let results: Vec<Result<PairBatch<TestBackend>>> =
            in_plan_order(loader.iter(), 3).collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Resource);
    }

    #[test]
    fn test_episode_loader_groups_episodes() {
        let images = dataset();
        let sampler = EpisodeSampler::new(images.class_sizes());
        let mut rng = StdRng::seed_from_u64(9);
        let episodes = sampler.sample_episodes(5, 4, &mut rng).unwrap();

        let loader = episode_loader::<TestBackend>(images, episodes, 2, 0, Default::default());
        let total: usize = loader.iter().map(|b| b.num_episodes()).sum();
        assert_eq!(total, 5);
    }
}
