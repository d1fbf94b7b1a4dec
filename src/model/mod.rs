//! # Siamese model
//!
//! Convolutional siamese network built on the burn framework.

mod config;
mod siamese;

pub use config::SiameseConfig;
pub use siamese::{SiameseNetwork, MATCH_CLASS};

#[cfg(test)]
pub(crate) use siamese::testing;
