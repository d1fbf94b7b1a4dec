//! Experiment configuration
//!
//! Defaults reproduce the reference setup: 1000 epochs of 1000 batches of
//! 32 pairs, evaluated on 250 20-way one-shot tasks.

use crate::error::{Result, SiameseError};
use crate::model::SiameseConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Training loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of epochs
    pub epochs: usize,
    /// Sampled batches per epoch (`rnd`)
    pub episodes_per_epoch: usize,
    /// Pairs per batch (`M`)
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Probability of drawing a same-class pair
    pub same_probability: f64,
    /// Data loading worker threads (0 = load on the training thread)
    pub num_workers: usize,
    /// Seed for parameter initialization and pair sampling
    pub seed: u64,
    /// Log the running loss every N batches
    pub log_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            episodes_per_epoch: 1000,
            batch_size: 32,
            learning_rate: 1e-3,
            same_probability: 0.5,
            num_workers: 4,
            seed: 42,
            log_interval: 100,
        }
    }
}

impl TrainingConfig {
    /// Short run for smoke tests
    pub fn quick() -> Self {
        Self {
            epochs: 2,
            episodes_per_epoch: 10,
            batch_size: 8,
            num_workers: 0,
            log_interval: 5,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SiameseError::Config("epochs must be > 0".into()));
        }
        if self.episodes_per_epoch == 0 {
            return Err(SiameseError::Config("episodes_per_epoch must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(SiameseError::Config("batch_size must be > 0".into()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(SiameseError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.same_probability) {
            return Err(SiameseError::Config(format!(
                "same_probability must be in [0, 1], got {}",
                self.same_probability
            )));
        }
        if self.log_interval == 0 {
            return Err(SiameseError::Config("log_interval must be > 0".into()));
        }
        Ok(())
    }
}

/// How an N-way episode is scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// Pick the candidate with the highest match probability
    #[default]
    BestMatch,
    /// Every candidate's same/different decision must be right
    AllPairs,
}

impl std::str::FromStr for DecisionRule {
    type Err = SiameseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "best_match" | "best-match" => Ok(Self::BestMatch),
            "all_pairs" | "all-pairs" => Ok(Self::AllPairs),
            other => Err(SiameseError::Config(format!("unknown decision rule '{other}'"))),
        }
    }
}

/// One-shot evaluation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Candidates per episode (`N`)
    pub ways: usize,
    /// Number of episodes (`K`)
    pub episodes: usize,
    /// Episodes compared in one forward pass
    pub episodes_per_batch: usize,
    /// Data loading worker threads (0 = load on the evaluation thread)
    pub num_workers: usize,
    /// Seed for episode sampling
    pub seed: u64,
    pub decision_rule: DecisionRule,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            ways: 20,
            episodes: 250,
            episodes_per_batch: 1,
            num_workers: 4,
            seed: 7,
            decision_rule: DecisionRule::BestMatch,
        }
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ways < 2 {
            return Err(SiameseError::Config(format!(
                "ways must be >= 2, got {}",
                self.ways
            )));
        }
        if self.episodes == 0 {
            return Err(SiameseError::Config("episodes must be > 0".into()));
        }
        if self.episodes_per_batch == 0 {
            return Err(SiameseError::Config("episodes_per_batch must be > 0".into()));
        }
        Ok(())
    }
}

/// Complete experiment: model, training and evaluation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub model: SiameseConfig,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
}

impl ExperimentConfig {
    /// Load a JSON configuration file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate()?;
        self.evaluation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.training.epochs, 1000);
        assert_eq!(config.training.episodes_per_epoch, 1000);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.evaluation.ways, 20);
        assert_eq!(config.evaluation.episodes, 250);
        assert_eq!(config.model.input_shape.height, 28);
    }

    #[test]
    fn test_invalid_values() {
        let training = TrainingConfig {
            same_probability: 1.5,
            ..Default::default()
        };
        assert!(training.validate().is_err());

        let training = TrainingConfig {
            learning_rate: f64::NAN,
            ..Default::default()
        };
        assert!(training.validate().is_err());

        let evaluation = EvaluationConfig {
            ways: 1,
            ..Default::default()
        };
        assert!(evaluation.validate().is_err());
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = r#"{ "training": { "epochs": 3 },
            "evaluation": { "ways": 5, "decision_rule": "all_pairs" } }"#;
        file.write_all(json.as_bytes()).unwrap();

        let config = ExperimentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.evaluation.ways, 5);
        assert_eq!(config.evaluation.decision_rule, DecisionRule::AllPairs);
    }

    #[test]
    fn test_decision_rule_from_str() {
        assert_eq!("best-match".parse::<DecisionRule>().unwrap(), DecisionRule::BestMatch);
        assert_eq!("all_pairs".parse::<DecisionRule>().unwrap(), DecisionRule::AllPairs);
        assert!("majority".parse::<DecisionRule>().is_err());
    }
}
