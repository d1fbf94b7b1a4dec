//! Episode sampling for siamese training and one-shot evaluation
//!
//! The sampler only sees class sizes; it produces index plans that the
//! loaders later turn into image tensors. All randomness comes from the
//! caller's random source so a fixed seed reproduces every plan.

use super::dataset::ItemRef;
use crate::error::{Result, SiameseError};
use rand::seq::index;
use rand::Rng;

/// One training pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSpec {
    pub left: ItemRef,
    pub right: ItemRef,
    /// Both items come from the same class
    pub same: bool,
}

impl PairSpec {
    /// Class label for the loss: 1 = same class, 0 = different classes
    pub fn label(&self) -> i64 {
        i64::from(self.same)
    }
}

/// One N-way one-shot evaluation episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeSpec {
    pub query: ItemRef,
    /// N candidates, exactly one from the query's class
    pub candidates: Vec<ItemRef>,
    /// Position of the genuine match in `candidates`
    pub target: usize,
}

impl EpisodeSpec {
    /// Number of candidates (N)
    pub fn ways(&self) -> usize {
        self.candidates.len()
    }
}

/// Sampler over a dataset described by its per-class item counts
#[derive(Debug, Clone)]
pub struct EpisodeSampler {
    class_sizes: Vec<usize>,
    same_probability: f64,
}

impl EpisodeSampler {
    /// Create a sampler with a fair same/different coin
    pub fn new(class_sizes: Vec<usize>) -> Self {
        Self {
            class_sizes,
            same_probability: 0.5,
        }
    }

    /// Set the probability of drawing a same-class pair
    ///
    /// Values are clamped to [0, 1]; NaN falls back to a fair coin.
    pub fn with_same_probability(mut self, probability: f64) -> Self {
        self.same_probability = if probability.is_nan() {
            0.5
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    pub fn same_probability(&self) -> f64 {
        self.same_probability
    }

    /// Check that training pairs can be drawn: at least two classes, each
    /// with at least two items
    pub fn check_pairs(&self) -> Result<()> {
        if self.class_sizes.len() < 2 {
            return Err(SiameseError::Data(format!(
                "training needs at least 2 classes, found {}",
                self.class_sizes.len()
            )));
        }
        if let Some((class, &size)) = self
            .class_sizes
            .iter()
            .enumerate()
            .find(|(_, &size)| size < 2)
        {
            return Err(SiameseError::Data(format!(
                "training needs at least 2 items per class, class {class} has {size}"
            )));
        }
        Ok(())
    }

    /// Check that `ways`-way episodes can be drawn: at least `ways` classes,
    /// each with at least one item
    pub fn check_episodes(&self, ways: usize) -> Result<()> {
        if ways < 2 {
            return Err(SiameseError::Data(format!(
                "one-shot episodes need at least 2 candidates, got {ways}"
            )));
        }
        if self.class_sizes.len() < ways {
            return Err(SiameseError::Data(format!(
                "{ways}-way episodes need at least {ways} classes, found {}",
                self.class_sizes.len()
            )));
        }
        if let Some(class) = self.class_sizes.iter().position(|&size| size == 0) {
            return Err(SiameseError::Data(format!("class {class} has no items")));
        }
        Ok(())
    }

    /// Draw one training pair
    ///
    /// Assumes [`check_pairs`](Self::check_pairs) succeeded.
    fn draw_pair<R: Rng + ?Sized>(&self, rng: &mut R) -> PairSpec {
        if rng.gen_bool(self.same_probability) {
            let class = rng.gen_range(0..self.class_sizes.len());
            let items = index::sample(rng, self.class_sizes[class], 2);
            PairSpec {
                left: ItemRef::new(class, items.index(0)),
                right: ItemRef::new(class, items.index(1)),
                same: true,
            }
        } else {
            let classes = index::sample(rng, self.class_sizes.len(), 2);
            let (a, b) = (classes.index(0), classes.index(1));
            PairSpec {
                left: ItemRef::new(a, rng.gen_range(0..self.class_sizes[a])),
                right: ItemRef::new(b, rng.gen_range(0..self.class_sizes[b])),
                same: false,
            }
        }
    }

    /// Sample `count` independent training pairs
    pub fn sample_pairs<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<PairSpec>> {
        self.check_pairs()?;
        Ok((0..count).map(|_| self.draw_pair(rng)).collect())
    }

    /// Sample `batches` training batches of `batch_size` pairs each
    pub fn sample_pair_batches<R: Rng + ?Sized>(
        &self,
        batches: usize,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<PairSpec>>> {
        if batch_size == 0 {
            return Err(SiameseError::Data("batch size must be > 0".into()));
        }
        self.check_pairs()?;
        Ok((0..batches)
            .map(|_| (0..batch_size).map(|_| self.draw_pair(rng)).collect())
            .collect())
    }

    /// Draw one `ways`-way episode
    ///
    /// Assumes [`check_episodes`](Self::check_episodes) succeeded.
    fn draw_episode<R: Rng + ?Sized>(&self, ways: usize, rng: &mut R) -> EpisodeSpec {
        let n_classes = self.class_sizes.len();
        let target_class = rng.gen_range(0..n_classes);
        let target_size = self.class_sizes[target_class];

        // Query and genuine match are different drawings when possible
        let (query_item, match_item) = if target_size >= 2 {
            let items = index::sample(rng, target_size, 2);
            (items.index(0), items.index(1))
        } else {
            (0, 0)
        };

        // Distractor classes: N-1 distinct classes other than the target
        let mut candidates: Vec<ItemRef> = index::sample(rng, n_classes - 1, ways - 1)
            .into_iter()
            .map(|c| if c >= target_class { c + 1 } else { c })
            .map(|class| ItemRef::new(class, rng.gen_range(0..self.class_sizes[class])))
            .collect();

        let target = rng.gen_range(0..ways);
        candidates.insert(target, ItemRef::new(target_class, match_item));

        EpisodeSpec {
            query: ItemRef::new(target_class, query_item),
            candidates,
            target,
        }
    }

    /// Sample `count` independent `ways`-way one-shot episodes
    pub fn sample_episodes<R: Rng + ?Sized>(
        &self,
        count: usize,
        ways: usize,
        rng: &mut R,
    ) -> Result<Vec<EpisodeSpec>> {
        self.check_episodes(ways)?;
        Ok((0..count).map(|_| self.draw_episode(ways, rng)).collect())
    }
}
