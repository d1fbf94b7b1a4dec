//! Siamese training loop
//!
//! `SiameseTrainer::new` validates the configuration and the dataset,
//! `run` consumes the trainer and returns the trained model.

use crate::config::TrainingConfig;
use crate::data::{in_plan_order, pair_loader, CharacterDataset, EpisodeSampler};
use crate::error::{Result, SiameseError};
use crate::model::SiameseNetwork;
use burn::{
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info};

/// Running loss of one finished epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 1-based epoch number
    pub epoch: usize,
    pub epochs: usize,
    /// Batches trained in this epoch
    pub batches: usize,
    /// Mean batch loss over the epoch
    pub loss: f32,
}

impl std::fmt::Display for EpochReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {:5}] loss: {:.3}", self.epoch, self.batches, self.loss)
    }
}

/// Training history
#[derive(Debug, Clone, Default)]
pub struct TrainingResult {
    /// Running loss per epoch
    pub epoch_losses: Vec<f32>,
    /// Total optimizer steps
    pub total_batches: usize,
}

impl TrainingResult {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

/// Trainer for the siamese network
pub struct SiameseTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    dataset: Arc<CharacterDataset>,
    sampler: EpisodeSampler,
    device: B::Device,
    rng: StdRng,
}

impl<B: AutodiffBackend> SiameseTrainer<B> {
    /// Create a trainer over `dataset`
    ///
    /// Fails if the configuration is invalid or the dataset cannot supply
    /// training pairs.
    pub fn new(
        config: TrainingConfig,
        dataset: Arc<CharacterDataset>,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let sampler = EpisodeSampler::new(dataset.class_sizes())
            .with_same_probability(config.same_probability);
        sampler.check_pairs()?;

        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            dataset,
            sampler,
            device,
            rng,
        })
    }

    /// Train `model`, calling `on_epoch` once after every epoch
    ///
    /// Batches reach the optimizer in sampled order whatever the worker
    /// count, so a fixed seed reproduces the run.
    pub fn run<F>(
        mut self,
        model: SiameseNetwork<B>,
        mut on_epoch: F,
    ) -> Result<(SiameseNetwork<B>, TrainingResult)>
    where
        F: FnMut(&EpochReport),
    {
        model.config().check_dataset(&self.dataset)?;

        let config = self.config.clone();
        info!(
            "Starting training: {} epochs x {} batches of {} pairs, lr={}",
            config.epochs, config.episodes_per_epoch, config.batch_size, config.learning_rate
        );
        info!(
            "Train set: {} classes, {} images",
            self.dataset.num_classes(),
            self.dataset.len()
        );

        let mut model = model;
        let mut optimizer = AdamConfig::new().init();
        let criterion = CrossEntropyLossConfig::new().init(&self.device);
        let mut result = TrainingResult::default();

        for epoch in 0..config.epochs {
            let plans = self.sampler.sample_pair_batches(
                config.episodes_per_epoch,
                config.batch_size,
                &mut self.rng,
            )?;
            let loader = pair_loader::<B>(
                self.dataset.clone(),
                plans,
                config.num_workers,
                self.device.clone(),
            );

            let mut running_loss = 0.0f32;
            let mut batches = 0usize;

            for batch in in_plan_order(loader.iter(), config.episodes_per_epoch) {
                let batch = batch?;
                let logits = model.forward(batch.left, batch.right);
                let loss = criterion.forward(logits, batch.labels);

                let loss_value = loss.clone().into_scalar().elem::<f32>();
                if !loss_value.is_finite() {
                    return Err(SiameseError::Numeric(format!(
                        "loss became {} at epoch {}, batch {}",
                        loss_value,
                        epoch + 1,
                        batches + 1
                    )));
                }

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(config.learning_rate, model, grads);

                running_loss += loss_value;
                batches += 1;

                if batches % config.log_interval == 0 {
                    debug!(
                        "Epoch {} batch {}: loss={:.4}",
                        epoch + 1,
                        batches,
                        running_loss / batches as f32
                    );
                }
            }

            let report = EpochReport {
                epoch: epoch + 1,
                epochs: config.epochs,
                batches,
                loss: running_loss / batches as f32,
            };
            info!("Epoch {}/{}: loss={:.4}", report.epoch, report.epochs, report.loss);
            on_epoch(&report);

            result.epoch_losses.push(report.loss);
            result.total_batches += batches;
        }

        info!(
            "Training completed after {} batches, final loss {:?}",
            result.total_batches,
            result.final_loss()
        );
        Ok((model, result))
    }
}
