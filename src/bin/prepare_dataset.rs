//! Convert an Omniglot-style image directory into a dataset file
//!
//! The directory is expected to hold `alphabet/character/*.png`.
//!
//! Usage:
//! ```bash
//! cargo run --release --bin prepare_dataset -- images_background train_omni.json
//! cargo run --release --bin prepare_dataset -- images_evaluation test_omni.json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use siamese_omniglot::{CharacterDataset, ImageShape};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory of alphabet/character image folders
    input: PathBuf,

    /// Output dataset file
    output: PathBuf,

    /// Target image height
    #[arg(long, default_value_t = 28)]
    height: usize,

    /// Target image width
    #[arg(long, default_value_t = 28)]
    width: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let shape = ImageShape::new(1, args.height, args.width);

    info!("Reading images from {}", args.input.display());
    let dataset = CharacterDataset::from_image_dir(&args.input, shape)
        .with_context(|| format!("failed to import {}", args.input.display()))?;

    dataset
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!(
        "Saved {} classes ({} images, {}) to {}",
        dataset.num_classes(),
        dataset.len(),
        shape,
        args.output.display()
    );
    Ok(())
}
