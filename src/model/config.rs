//! Siamese network configuration

use crate::data::{CharacterDataset, ImageShape};
use crate::error::{Result, SiameseError};
use serde::{Deserialize, Serialize};

/// Configuration of the siamese network architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiameseConfig {
    /// Input image shape (channels, height, width)
    pub input_shape: ImageShape,
    /// Filters of the first convolution block (two conv layers)
    pub block1_filters: usize,
    /// Filters of the second convolution block (two conv layers)
    pub block2_filters: usize,
    /// Convolution kernel size (odd, "same" padding)
    pub kernel_size: usize,
    /// Size of the embedding vector
    pub embedding_dim: usize,
}

impl Default for SiameseConfig {
    fn default() -> Self {
        Self {
            input_shape: ImageShape::new(1, 28, 28),
            block1_filters: 64,
            block2_filters: 128,
            kernel_size: 3,
            embedding_dim: 128,
        }
    }
}

impl SiameseConfig {
    /// Small network for quick experiments and tests
    pub fn tiny(input_shape: ImageShape) -> Self {
        Self {
            input_shape,
            block1_filters: 4,
            block2_filters: 8,
            kernel_size: 3,
            embedding_dim: 16,
        }
    }

    /// Padding that keeps spatial size through a convolution
    pub fn padding(&self) -> usize {
        (self.kernel_size - 1) / 2
    }

    /// Number of features entering the embedding layer (after two 2x2 pools)
    pub fn flatten_size(&self) -> usize {
        (self.input_shape.height / 4) * (self.input_shape.width / 4) * self.block2_filters
    }

    /// Check that a dataset's images fit the network input
    pub fn check_dataset(&self, dataset: &CharacterDataset) -> Result<()> {
        if dataset.shape() != self.input_shape {
            return Err(SiameseError::Data(format!(
                "dataset images are {}, model expects {}",
                dataset.shape(),
                self.input_shape
            )));
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let shape = &self.input_shape;
        if shape.channels == 0 {
            return Err(SiameseError::Config("input channels must be > 0".into()));
        }
        if shape.height < 4 || shape.width < 4 {
            return Err(SiameseError::Config(format!(
                "input must be at least 4x4, got {}x{}",
                shape.height, shape.width
            )));
        }
        if shape.height % 4 != 0 || shape.width % 4 != 0 {
            return Err(SiameseError::Config(format!(
                "input height and width must be divisible by 4, got {}x{}",
                shape.height, shape.width
            )));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(SiameseError::Config("kernel_size must be odd".into()));
        }
        if self.block1_filters == 0 || self.block2_filters == 0 || self.embedding_dim == 0 {
            return Err(SiameseError::Config(
                "filter counts and embedding_dim must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SiameseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.padding(), 1);
        assert_eq!(config.flatten_size(), 7 * 7 * 128);
    }

    #[test]
    fn test_rejects_indivisible_input() {
        let config = SiameseConfig::tiny(ImageShape::new(1, 10, 12));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_dataset_shape() {
        let config = SiameseConfig::tiny(ImageShape::new(1, 8, 8));
        let matching = CharacterDataset::synthetic(2, 2, ImageShape::new(1, 8, 8), 0).unwrap();
        let other = CharacterDataset::synthetic(2, 2, ImageShape::new(1, 12, 12), 0).unwrap();

        assert!(config.check_dataset(&matching).is_ok());
        assert!(config.check_dataset(&other).is_err());
    }

    #[test]
    fn test_rejects_even_kernel() {
        let config = SiameseConfig {
            kernel_size: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
