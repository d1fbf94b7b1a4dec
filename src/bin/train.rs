//! Train a siamese network and evaluate it on N-way one-shot tasks
//!
//! Usage:
//! ```bash
//! cargo run --release --bin train -- --train-data train_omni.json --test-data test_omni.json
//! cargo run --release --bin train -- --synthetic --epochs 5 --episodes-per-epoch 50
//! ```

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use clap::Parser;
use siamese_omniglot::{
    CharacterDataset, DecisionRule, ExperimentConfig, OneShotEvaluator, SiameseNetwork,
    SiameseTrainer, DEFAULT_TEST_FILE, DEFAULT_TRAIN_FILE,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

type TrainBackend = Autodiff<NdArray<f32>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Training dataset file
    #[arg(long, default_value = DEFAULT_TRAIN_FILE)]
    train_data: PathBuf,

    /// Evaluation dataset file
    #[arg(long, default_value = DEFAULT_TEST_FILE)]
    test_data: PathBuf,

    /// JSON experiment configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use generated glyphs instead of dataset files
    #[arg(long)]
    synthetic: bool,

    /// Number of epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Sampled batches per epoch
    #[arg(long)]
    episodes_per_epoch: Option<usize>,

    /// Pairs per training batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Learning rate
    #[arg(short = 'r', long)]
    learning_rate: Option<f64>,

    /// Candidates per one-shot task
    #[arg(short = 'n', long)]
    ways: Option<usize>,

    /// Number of one-shot tasks
    #[arg(short = 'k', long)]
    eval_episodes: Option<usize>,

    /// Data loading worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Random seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Decision rule: best-match or all-pairs
    #[arg(long)]
    decision_rule: Option<DecisionRule>,
}

impl Args {
    fn experiment(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ExperimentConfig::default(),
        };

        let training = &mut config.training;
        if let Some(epochs) = self.epochs {
            training.epochs = epochs;
        }
        if let Some(episodes) = self.episodes_per_epoch {
            training.episodes_per_epoch = episodes;
        }
        if let Some(batch_size) = self.batch_size {
            training.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            training.learning_rate = lr;
        }

        let evaluation = &mut config.evaluation;
        if let Some(ways) = self.ways {
            evaluation.ways = ways;
        }
        if let Some(episodes) = self.eval_episodes {
            evaluation.episodes = episodes;
        }
        if let Some(rule) = self.decision_rule {
            evaluation.decision_rule = rule;
        }

        if let Some(workers) = self.workers {
            config.training.num_workers = workers;
            config.evaluation.num_workers = workers;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
            config.evaluation.seed = seed.wrapping_add(1);
        }

        config.validate()?;
        Ok(config)
    }

    fn datasets(&self, config: &ExperimentConfig) -> Result<(CharacterDataset, CharacterDataset)> {
        if self.synthetic {
            let shape = config.model.input_shape;
            let seed = config.training.seed;
            let classes = config.evaluation.ways.max(2) * 2;
            return Ok((
                CharacterDataset::synthetic(classes, 20, shape, seed)?,
                CharacterDataset::synthetic(classes, 20, shape, seed.wrapping_add(1))?,
            ));
        }

        let train = CharacterDataset::load(&self.train_data)
            .with_context(|| format!("failed to load {}", self.train_data.display()))?;
        let test = CharacterDataset::load(&self.test_data)
            .with_context(|| format!("failed to load {}", self.test_data.display()))?;
        Ok((train, test))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.experiment()?;
    info!("Configuration: {:?}", config);

    let (train_set, test_set) = args.datasets(&config)?;
    config.model.check_dataset(&train_set)?;
    config.model.check_dataset(&test_set)?;

    let device = <TrainBackend as Backend>::Device::default();
    TrainBackend::seed(config.training.seed);
    let model = SiameseNetwork::<TrainBackend>::new(&device, &config.model);

    let trainer = SiameseTrainer::<TrainBackend>::new(
        config.training.clone(),
        Arc::new(train_set),
        device.clone(),
    )?;
    let (model, _) = trainer.run(model, |report| println!("{}", report))?;
    println!("Finished Training");

    let evaluation = &config.evaluation;
    println!(
        "Evaluating model on {} unique {}-way one-shot learning tasks ...",
        evaluation.episodes, evaluation.ways
    );
    let evaluator =
        OneShotEvaluator::<NdArray<f32>>::new(evaluation.clone(), Arc::new(test_set), device)?;
    let accuracy = evaluator.run(&model.valid())?;
    println!("{}", accuracy);

    Ok(())
}
