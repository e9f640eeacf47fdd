//! Error types shared across clipforge crates.

use std::path::PathBuf;

/// Top-level error type for clipforge operations.
#[derive(Debug, thiserror::Error)]
pub enum ClipforgeError {
    #[error("Unsupported format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Encoder error: {message}")]
    EncoderRuntime { message: String },

    #[error("Failed to render element {element_id}: {message}")]
    ElementRender { element_id: String, message: String },

    #[error("Resource exhaustion: {message}")]
    ResourceExhaustion { message: String },

    #[error("Not initialized: {message}")]
    NotInitialized { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Timeline error: {message}")]
    Timeline { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ClipforgeError.
pub type ClipforgeResult<T> = Result<T, ClipforgeError>;

impl ClipforgeError {
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::EncoderRuntime {
            message: msg.into(),
        }
    }

    pub fn element(element_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ElementRender {
            element_id: element_id.into(),
            message: msg.into(),
        }
    }

    pub fn resource_exhaustion(msg: impl Into<String>) -> Self {
        Self::ResourceExhaustion {
            message: msg.into(),
        }
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn timeline(msg: impl Into<String>) -> Self {
        Self::Timeline {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// A short message suitable for showing to the person who started the export.
    ///
    /// The `Display` output carries the raw detail and belongs in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsupportedFormat { .. } => {
                "The selected export format is not supported on this system. Try a different container or codec.".to_string()
            }
            Self::Capture { .. } | Self::EncoderRuntime { .. } | Self::NotInitialized { .. } => {
                "Failed to record video. Please check that a supported encoder is installed.".to_string()
            }
            Self::Audio { .. } => {
                "Failed to process audio tracks. Please check your audio files and try again.".to_string()
            }
            Self::ElementRender { .. } | Self::Render { .. } => {
                "Failed to render video frames. Please check your video elements and try again.".to_string()
            }
            Self::Timeline { .. } => {
                "Timeline processing error. Please check your project timeline and try again.".to_string()
            }
            Self::ResourceExhaustion { .. } => {
                "Insufficient memory to complete export. Please try exporting at a lower quality or shorter duration.".to_string()
            }
            Self::Config { message } | Self::InvalidState { message } | Self::Unsupported { message } => {
                message.clone()
            }
            Self::FileNotFound { path } => format!("File not found: {}", path.display()),
            Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                "An unknown error occurred during export.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_keeps_raw_detail() {
        let err = ClipforgeError::encoder("x264enc: broken pipe");
        assert_eq!(err.to_string(), "Encoder error: x264enc: broken pipe");
    }

    #[test]
    fn test_user_message_hides_raw_detail() {
        let err = ClipforgeError::encoder("x264enc: broken pipe");
        assert!(!err.user_message().contains("x264enc"));

        let err = ClipforgeError::resource_exhaustion("estimated 9000 MB");
        assert!(err.user_message().contains("Insufficient memory"));
    }

    #[test]
    fn test_config_errors_are_shown_verbatim() {
        let err = ClipforgeError::config("fps must be greater than zero");
        assert_eq!(err.user_message(), "fps must be greater than zero");
    }
}
