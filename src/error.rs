//! Error types for the siamese one-shot library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, SiameseError>;

/// Main error type for the library
///
/// Every variant is fatal to a training or evaluation run.
#[derive(Error, Debug)]
pub enum SiameseError {
    /// Not enough classes or items to satisfy a sampling request,
    /// or a malformed dataset
    #[error("Data error: {0}")]
    Data(String),

    /// Loss or scores became non-finite, or tensor data could not be read back
    #[error("Numeric error: {0}")]
    Numeric(String),

    /// The data loading pool failed to deliver the planned batches
    #[error("Resource error: {0}")]
    Resource(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Coarse error category, stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Data,
    Numeric,
    Resource,
    Config,
    Io,
}

impl SiameseError {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            SiameseError::Data(_) => ErrorCategory::Data,
            SiameseError::Numeric(_) => ErrorCategory::Numeric,
            SiameseError::Resource(_) => ErrorCategory::Resource,
            SiameseError::Config(_) => ErrorCategory::Config,
            SiameseError::Io(_) | SiameseError::Json(_) | SiameseError::Image(_) => {
                ErrorCategory::Io
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            SiameseError::Data("too few classes".into()).category(),
            ErrorCategory::Data
        );
        assert_eq!(
            SiameseError::Numeric("nan".into()).category(),
            ErrorCategory::Numeric
        );
        assert_eq!(
            SiameseError::Resource("loader".into()).category(),
            ErrorCategory::Resource
        );

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(SiameseError::from(io).category(), ErrorCategory::Io);
    }

    #[test]
    fn test_display() {
        let err = SiameseError::Data("need 20 classes, found 3".into());
        assert_eq!(err.to_string(), "Data error: need 20 classes, found 3");
    }
}
