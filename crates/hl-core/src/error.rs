use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LabelError>;

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Required input missing: {0}")]
    InputMissing(PathBuf),

    #[error("Media unreadable: {0}")]
    MediaUnreadable(String),

    #[error("Graphics unavailable: {0}")]
    GraphicsUnavailable(String),

    #[error("Encoder configuration error: {0}")]
    EncoderConfiguration(String),

    #[error("Muxer consistency error: {0}")]
    MuxerConsistency(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Muxing failed: {0}")]
    Muxing(String),

    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Labeling cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LabelError {
    /// Errors that mean labeling cannot run on this device at all, as opposed
    /// to a single run failing.
    pub fn is_device_unsupported(&self) -> bool {
        matches!(self, LabelError::GraphicsUnavailable(_) | LabelError::EncoderConfiguration(_))
    }

    /// Stable short name of the error kind, for logs and callers that map
    /// kinds to messages.
    pub fn kind(&self) -> &'static str {
        match self {
            LabelError::InputMissing(_) => "input_missing",
            LabelError::MediaUnreadable(_) => "media_unreadable",
            LabelError::GraphicsUnavailable(_) => "graphics_unavailable",
            LabelError::EncoderConfiguration(_) => "encoder_configuration",
            LabelError::MuxerConsistency(_) => "muxer_consistency",
            LabelError::Encoding(_) => "encoding",
            LabelError::Muxing(_) => "muxing",
            LabelError::InvalidTransition { .. } => "invalid_transition",
            LabelError::Cancelled => "cancelled",
            LabelError::Config(_) => "config",
            LabelError::Io(_) => "io",
        }
    }
}

/// Row-level problem found while reading a keypoint table. Never fatal: the
/// row is skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{table} row {line}: {reason}")]
pub struct KeypointParseWarning {
    pub table: String,
    pub line: usize,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unsupported_kinds() {
        assert!(LabelError::GraphicsUnavailable("no config".into()).is_device_unsupported());
        assert!(LabelError::EncoderConfiguration("vp9".into()).is_device_unsupported());
        assert!(!LabelError::MediaUnreadable("bad".into()).is_device_unsupported());
        assert!(!LabelError::Cancelled.is_device_unsupported());
    }

    #[test]
    fn test_io_conversion() {
        let err: LabelError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), "io");
    }
}
