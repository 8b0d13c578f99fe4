use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::OurError;

/// Shown as the label when the service rejects a frame without saying why.
pub const NO_DETECTION_FALLBACK: &str = "No hand / multiple hands";
/// Shown in the error slot on transport failures.
pub const API_ERROR_MESSAGE: &str = "API error";
pub const CAMERA_PERMISSION_MESSAGE: &str =
    "Camera permission denied. Please allow camera access.";
pub const CAMERA_UNAVAILABLE_MESSAGE: &str = "Unable to access camera.";
/// Static accuracy figure displayed next to the live feed.
pub const DISPLAY_ACCURACY: f64 = 98.5;

/// Gesture vocabulary attached to every frame submission.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Domain {
    #[default]
    Alphabet,
    Numeral,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Alphabet => "Alphabet",
            Domain::Numeral => "Numeral",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = OurError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "alphabet" => Ok(Domain::Alphabet),
            "numeral" => Ok(Domain::Numeral),
            other => Err(OurError::Config(format!("Unknown domain '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Live,
}

/// Whether the page hosting the session is currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Body of `POST /isl/static/predict-frame`
#[derive(Debug, Serialize)]
pub struct PredictFrameRequest<'a> {
    pub image_b64: &'a str,
    pub domain: Domain,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Body of `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub label: String,
    pub score: f64,
}

/// What a frame submission produced, short of a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictOutcome {
    Label(String),
    /// The service answered but found no usable gesture.
    NoDetection(String),
}

/// Everything the session publishes for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub domain: Domain,
    pub frame_rate: u32,
    pub current_label: String,
    pub last_error: Option<String>,
    pub in_flight: bool,
    pub device_held: bool,
    pub processing_load: f64,
    pub memory_usage: f64,
    pub accuracy: f64,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(domain: Domain) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Idle,
            domain,
            frame_rate: 0,
            current_label: String::new(),
            last_error: None,
            in_flight: false,
            device_held: false,
            processing_load: crate::telemetry::INITIAL_PROCESSING_LOAD,
            memory_usage: crate::telemetry::INITIAL_MEMORY_USAGE,
            accuracy: DISPLAY_ACCURACY,
            updated_at: Utc::now(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Live
    }

    /// Fold a finished inference request into the label and error slots.
    ///
    /// Cancellations never reach here; the coordinator drops them.
    pub fn apply_inference(&mut self, result: Result<PredictOutcome, OurError>) {
        match result {
            Ok(PredictOutcome::Label(label)) | Ok(PredictOutcome::NoDetection(label)) => {
                self.current_label = label;
                self.last_error = None;
            }
            Err(OurError::Cancelled) => {}
            Err(_) => {
                self.last_error = Some(API_ERROR_MESSAGE.to_string());
            }
        }
        self.in_flight = false;
        self.updated_at = Utc::now();
    }
}

/// Generic API response
#[derive(Serialize)]
pub(crate) struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub(crate) fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    pub(crate) fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}
