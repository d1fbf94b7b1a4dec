//! N-way one-shot evaluation

use crate::config::{DecisionRule, EvaluationConfig};
use crate::data::{episode_loader, CharacterDataset, EpisodeBatch, EpisodeSampler};
use crate::error::{Result, SiameseError};
use crate::model::{SiameseNetwork, MATCH_CLASS};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a one-shot evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneShotAccuracy {
    /// Episodes answered correctly
    pub correct: usize,
    /// Episodes evaluated
    pub total: usize,
    /// Candidates per episode
    pub ways: usize,
}

impl OneShotAccuracy {
    /// Fraction of correct episodes in [0, 1]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// Accuracy in percent
    pub fn percentage(&self) -> f64 {
        self.ratio() * 100.0
    }
}

impl std::fmt::Display for OneShotAccuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Accuracy {:.2}% for {}-way one-shot learning: {}/{}",
            self.percentage(),
            self.ways,
            self.correct,
            self.total
        )
    }
}

/// Index of the highest score; the first one wins ties
pub fn best_match(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
}

/// Every candidate's same/different decision agrees with the ground truth
///
/// `logits` holds one `[mismatch, match]` row per candidate.
pub fn all_pairs_correct(logits: &[f32], target: usize) -> bool {
    logits.chunks_exact(2).enumerate().all(|(j, row)| {
        let predicted_match = row[MATCH_CLASS] > row[1 - MATCH_CLASS];
        predicted_match == (j == target)
    })
}

/// Evaluator for N-way one-shot tasks
pub struct OneShotEvaluator<B: Backend> {
    config: EvaluationConfig,
    dataset: Arc<CharacterDataset>,
    sampler: EpisodeSampler,
    device: B::Device,
    rng: StdRng,
}

impl<B: Backend> OneShotEvaluator<B> {
    /// Create an evaluator over `dataset`
    ///
    /// Fails if the dataset has fewer classes than `ways` or an empty class.
    pub fn new(
        config: EvaluationConfig,
        dataset: Arc<CharacterDataset>,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let sampler = EpisodeSampler::new(dataset.class_sizes());
        sampler.check_episodes(config.ways)?;

        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            dataset,
            sampler,
            device,
            rng,
        })
    }

    /// Evaluate `model` on freshly sampled episodes
    pub fn run(mut self, model: &SiameseNetwork<B>) -> Result<OneShotAccuracy> {
        model.config().check_dataset(&self.dataset)?;

        let ways = self.config.ways;
        info!(
            "Evaluating on {} {}-way one-shot tasks ({:?})",
            self.config.episodes, ways, self.config.decision_rule
        );

        let episodes = self
            .sampler
            .sample_episodes(self.config.episodes, ways, &mut self.rng)?;
        let loader = episode_loader::<B>(
            self.dataset.clone(),
            episodes,
            self.config.episodes_per_batch,
            self.config.num_workers,
            self.device.clone(),
        );

        let accuracy = self.score(model, loader.iter())?;
        info!("{}", accuracy);
        Ok(accuracy)
    }

    /// Score delivered episode batches against `config.episodes` planned ones
    fn score<I>(&self, model: &SiameseNetwork<B>, batches: I) -> Result<OneShotAccuracy>
    where
        I: IntoIterator<Item = EpisodeBatch<B>>,
    {
        let ways = self.config.ways;
        let mut accuracy = OneShotAccuracy {
            correct: 0,
            total: 0,
            ways,
        };

        for batch in batches {
            let correct: Vec<bool> = match self.config.decision_rule {
                DecisionRule::BestMatch => {
                    let scores =
                        tensor_values(model.match_probability(batch.queries, batch.candidates))?;
                    scores
                        .chunks_exact(ways)
                        .zip(&batch.targets)
                        .map(|(row, &target)| best_match(row) == Some(target))
                        .collect()
                }
                DecisionRule::AllPairs => {
                    let logits = tensor_values(model.forward(batch.queries, batch.candidates))?;
                    logits
                        .chunks_exact(ways * 2)
                        .zip(&batch.targets)
                        .map(|(rows, &target)| all_pairs_correct(rows, target))
                        .collect()
                }
            };

            accuracy.correct += correct.iter().filter(|&&c| c).count();
            accuracy.total += correct.len();
            debug!("{}/{} episodes correct", accuracy.correct, accuracy.total);
        }

        if accuracy.total != self.config.episodes {
            return Err(SiameseError::Resource(format!(
                "data loader delivered {} of {} episodes",
                accuracy.total, self.config.episodes
            )));
        }
        Ok(accuracy)
    }
}

/// Read a tensor back as `f32` values, rejecting non-finite entries
fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SiameseError::Numeric(format!("cannot read tensor data: {e:?}")))?;

    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(SiameseError::Numeric(format!("model produced score {bad}")));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EpisodeSpec, ImageShape, ItemRef};
    use crate::error::ErrorCategory;
    use crate::model::testing::NanWeights;
    use crate::model::SiameseConfig;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::module::Module;

    type TestBackend = NdArray<f32>;

    fn shape() -> ImageShape {
        ImageShape::new(1, 8, 8)
    }

    fn config(ways: usize, episodes: usize, decision_rule: DecisionRule) -> EvaluationConfig {
        EvaluationConfig {
            ways,
            episodes,
            episodes_per_batch: 2,
            num_workers: 0,
            seed: 1,
            decision_rule,
        }
    }

    #[test]
    fn test_best_match() {
        assert_eq!(best_match(&[0.1, 0.9, 0.3]), Some(1));
        assert_eq!(best_match(&[0.5, 0.5, 0.2]), Some(0));
        assert_eq!(best_match(&[]), None);
    }

    #[test]
    fn test_all_pairs_correct() {
        // candidate 1 is the match
        let logits = [2.0, -1.0, -1.0, 3.0, 0.5, 0.1];
        assert!(all_pairs_correct(&logits, 1));
        assert!(!all_pairs_correct(&logits, 0));

        // two candidates predicted as matches fails even with the right best match
        let logits = [0.0, 1.0, -1.0, 3.0, 0.5, 0.1];
        assert!(!all_pairs_correct(&logits, 1));
    }

    #[test]
    fn test_accuracy_percentage() {
        let accuracy = OneShotAccuracy {
            correct: 3,
            total: 4,
            ways: 20,
        };
        assert_relative_eq!(accuracy.percentage(), 75.0);
        assert_eq!(
            accuracy.to_string(),
            "Accuracy 75.00% for 20-way one-shot learning: 3/4"
        );

        let empty = OneShotAccuracy {
            correct: 0,
            total: 0,
            ways: 5,
        };
        assert_eq!(empty.percentage(), 0.0);
    }

    #[test]
    fn test_rejects_too_few_classes() {
        let dataset = Arc::new(CharacterDataset::synthetic(3, 2, shape(), 0).unwrap());
        let config = EvaluationConfig {
            ways: 5,
            ..Default::default()
        };
        let err = OneShotEvaluator::<TestBackend>::new(config, dataset, Default::default())
            .err()
            .unwrap();
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_counts_every_episode() {
        let device: <TestBackend as Backend>::Device = Default::default();
        let dataset = Arc::new(CharacterDataset::synthetic(6, 2, shape(), 3).unwrap());
        let model = SiameseNetwork::<TestBackend>::new(&device, &SiameseConfig::tiny(shape()));

        for rule in [DecisionRule::BestMatch, DecisionRule::AllPairs] {
            let accuracy =
                OneShotEvaluator::<TestBackend>::new(config(4, 9, rule), dataset.clone(), device)
                    .unwrap()
                    .run(&model)
                    .unwrap();

            assert_eq!(accuracy.total, 9);
            assert_eq!(accuracy.ways, 4);
            assert!(accuracy.correct <= accuracy.total);
        }
    }

    #[test]
    fn test_known_answer_per_rule() {
        // one drawing per class: each query is compared with itself, so the
        // genuine match is the only candidate at distance zero
        let device: <TestBackend as Backend>::Device = Default::default();
        let dataset = Arc::new(CharacterDataset::synthetic(6, 1, shape(), 8).unwrap());
        let model = SiameseNetwork::<TestBackend>::new(&device, &SiameseConfig::tiny(shape()))
            .with_distance_head(&device);

        let best = OneShotEvaluator::<TestBackend>::new(
            config(4, 10, DecisionRule::BestMatch),
            dataset.clone(),
            device,
        )
        .unwrap()
        .run(&model)
        .unwrap();
        assert_eq!(best.correct, 10);

        // the head never predicts a match, so every episode fails all-pairs
        let all_pairs = OneShotEvaluator::<TestBackend>::new(
            config(4, 10, DecisionRule::AllPairs),
            dataset,
            device,
        )
        .unwrap()
        .run(&model)
        .unwrap();
        assert_eq!(all_pairs.correct, 0);
        assert_eq!(all_pairs.total, 10);
    }

    #[test]
    fn test_non_finite_scores_are_numeric_error() {
        let device: <TestBackend as Backend>::Device = Default::default();
        let dataset = Arc::new(CharacterDataset::synthetic(5, 2, shape(), 3).unwrap());
        let model = SiameseNetwork::<TestBackend>::new(&device, &SiameseConfig::tiny(shape()))
            .map(&mut NanWeights);

        for rule in [DecisionRule::BestMatch, DecisionRule::AllPairs] {
            let evaluator =
                OneShotEvaluator::<TestBackend>::new(config(3, 4, rule), dataset.clone(), device)
                    .unwrap();
            let err = evaluator.run(&model).err().unwrap();
            assert_eq!(err.category(), ErrorCategory::Numeric);
        }
    }

    #[test]
    fn test_model_shape_mismatch_is_data_error() {
        let device: <TestBackend as Backend>::Device = Default::default();
        let dataset = Arc::new(CharacterDataset::synthetic(5, 2, shape(), 3).unwrap());
        let model = SiameseNetwork::<TestBackend>::new(
            &device,
            &SiameseConfig::tiny(ImageShape::new(1, 12, 12)),
        );

        let err = OneShotEvaluator::<TestBackend>::new(
            config(3, 4, DecisionRule::BestMatch),
            dataset,
            device,
        )
        .unwrap()
        .run(&model)
        .err()
        .unwrap();
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_loader_shortfall_is_resource_error() {
        let device: <TestBackend as Backend>::Device = Default::default();
        let dataset = Arc::new(CharacterDataset::synthetic(4, 2, shape(), 3).unwrap());
        let model = SiameseNetwork::<TestBackend>::new(&device, &SiameseConfig::tiny(shape()));
        let evaluator = OneShotEvaluator::<TestBackend>::new(
            config(2, 3, DecisionRule::BestMatch),
            dataset.clone(),
            device,
        )
        .unwrap();

        let episode = |item: usize| EpisodeSpec {
            query: ItemRef::new(0, item),
            candidates: vec![ItemRef::new(0, 1), ItemRef::new(1, 0)],
            target: 0,
        };
        // the second episode refers to a drawing that does not exist
        let episodes = vec![episode(0), episode(9), episode(0)];
        let loader = episode_loader::<TestBackend>(dataset, episodes, 1, 0, device);

        let err = evaluator.score(&model, loader.iter()).err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Resource);
    }
}
