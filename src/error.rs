//! Error handling for the live recognition client.

use thiserror::Error;

use crate::protocol::{CAMERA_PERMISSION_MESSAGE, CAMERA_UNAVAILABLE_MESSAGE};

/// Application error types
#[derive(Error, Debug)]
pub enum OurError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image processing errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Malformed URLs
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The platform refused access to the camera
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    /// Any other failure to open the camera
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// The inference service answered with a non-success status
    #[error("Inference service returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The request was superseded or the session ended
    #[error("Request cancelled")]
    Cancelled,

    /// Session actor errors
    #[error("Session error: {0}")]
    Session(String),

    /// Generic application errors
    #[error("Application error: {0}")]
    App(String),
}

impl OurError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OurError::Cancelled)
    }

    /// Text shown to the user when a camera cannot be opened.
    pub fn camera_message(&self) -> &'static str {
        match self {
            OurError::PermissionDenied(_) => CAMERA_PERMISSION_MESSAGE,
            _ => CAMERA_UNAVAILABLE_MESSAGE,
        }
    }
}

/// Application result type
pub type OurResult<T> = std::result::Result<T, OurError>;
