//! Error types for the geometry sequence streamer

use serde::{Deserialize, Serialize};

/// Errors raised while opening a sequence or reading its frames.
///
/// The first group is setup-time: returned by `open`, after which nothing
/// remains allocated. `Io` is per-frame and surfaces through the `Failed`
/// slot state rather than aborting playback.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StreamError {
    /// The descriptor file is missing from the sequence directory
    #[error("Sequence descriptor not found: {path}")]
    ConfigNotFound { path: String },

    /// The descriptor exists but could not be parsed or failed validation
    #[error("Sequence descriptor {path} is invalid: {reason}")]
    ConfigParse { path: String, reason: String },

    /// No per-frame geometry files were found
    #[error("No geometry files (*.{extension}) found in {path}")]
    NoGeometryFiles { path: String, extension: String },

    /// The texture format required on this platform is absent
    #[error("Missing required texture format {format} in {path}: {reason}")]
    MissingRequiredTextureFormat {
        path: String,
        format: String,
        reason: String,
    },

    /// Reading a frame failed
    #[error("IO error on frame {frame_index}: {reason}")]
    Io { frame_index: usize, reason: String },

    /// Streamer configuration was rejected
    #[error("Invalid streamer configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The background worker pool could not be created
    #[error("Worker pool error: {reason}")]
    WorkerPool { reason: String },
}

impl StreamError {
    /// Build a per-frame IO error
    pub fn io(frame_index: usize, reason: impl Into<String>) -> Self {
        Self::Io {
            frame_index,
            reason: reason.into(),
        }
    }

    /// Setup-time errors are fatal to `open`
    #[inline]
    pub fn is_setup_error(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }

    /// The frame index attached to a per-frame error
    #[inline]
    pub fn frame_index(&self) -> Option<usize> {
        match self {
            Self::Io { frame_index, .. } => Some(*frame_index),
            _ => None,
        }
    }

    /// Get error category for logging/metrics
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } | Self::ConfigParse { .. } => "descriptor",
            Self::NoGeometryFiles { .. } | Self::MissingRequiredTextureFormat { .. } => "files",
            Self::Io { .. } => "io",
            Self::InvalidConfig { .. } => "config",
            Self::WorkerPool { .. } => "runtime",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_vs_runtime() {
        let not_found = StreamError::ConfigNotFound {
            path: "seq/sequence.json".into(),
        };
        assert!(not_found.is_setup_error());
        assert_eq!(not_found.frame_index(), None);

        let io = StreamError::io(7, "unexpected end of file");
        assert!(!io.is_setup_error());
        assert_eq!(io.frame_index(), Some(7));
    }

    #[test]
    fn test_error_categories() {
        let parse = StreamError::ConfigParse {
            path: "x".into(),
            reason: "y".into(),
        };
        assert_eq!(parse.category(), "descriptor");
        assert_eq!(StreamError::io(0, "boom").category(), "io");
        let tex = StreamError::MissingRequiredTextureFormat {
            path: "x".into(),
            format: "astc".into(),
            reason: "no files".into(),
        };
        assert_eq!(tex.category(), "files");
    }

    #[test]
    fn test_display_mentions_frame() {
        let msg = StreamError::io(12, "short read").to_string();
        assert!(msg.contains("frame 12"));
        assert!(msg.contains("short read"));
    }

    #[test]
    fn test_serialization() {
        let error = StreamError::io(3, "gone");
        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: StreamError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(error, deserialized);
    }
}
