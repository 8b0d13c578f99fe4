//! HTTP client for the remote inference service.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::capture::FramePayload;
use crate::config::Settings;
use crate::protocol::{
    HealthResponse, NO_DETECTION_FALLBACK, PredictFrameRequest, PredictOutcome, PredictResponse,
};
use crate::{OurError, OurResult};

/// Anything that can turn a frame into a label.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Submit one frame. Must resolve to [`OurError::Cancelled`] promptly
    /// once `cancel` fires.
    fn predict_frame(
        &self,
        payload: FramePayload,
        cancel: CancellationToken,
    ) -> impl Future<Output = OurResult<PredictOutcome>> + Send;
}

#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    base: Url,
}

impl InferenceClient {
    pub fn new(base: Url) -> OurResult<Self> {
        // No overall request timeout: a slow request is superseded by the next frame
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { client, base })
    }

    pub fn from_settings(settings: &Settings) -> OurResult<Self> {
        Self::new(settings.api_base_url()?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> OurResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                OurError::Config(format!("API base '{}' cannot be a base URL", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /health`
    pub async fn health(&self) -> OurResult<HealthResponse> {
        let url = self.endpoint(&["health"])?;
        debug!("Checking inference health at {url}");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OurError::Api {
                status: status.as_u16(),
                body: format!("Health failed: {}", status.as_u16()),
            });
        }
        Ok(response.json().await?)
    }

    /// `POST /predict` with a video file as multipart field `video`.
    pub async fn predict_video(&self, path: &Path) -> OurResult<PredictResponse> {
        let url = self.endpoint(&["predict"])?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        info!("Uploading {file_name} ({} bytes) to {url}", bytes.len());

        let form = Form::new().part("video", Part::bytes(bytes).file_name(file_name));
        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(OurError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// `POST /isl/static/predict-frame`, without cancellation.
    ///
    /// Non-success answers are negative detections, not errors. Only
    /// transport failures come back as `Err`.
    pub async fn submit_frame(&self, payload: &FramePayload) -> OurResult<PredictOutcome> {
        let url = self.endpoint(&["isl", "static", "predict-frame"])?;
        let body = PredictFrameRequest {
            image_b64: &payload.image_b64,
            domain: payload.domain,
        };

        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        let json: Value = response.json().await.unwrap_or_default();
        debug!("predict-frame answered {status}");

        Ok(interpret_frame_response(status.is_success(), &json))
    }
}

/// Map a predict-frame answer to an outcome.
pub fn interpret_frame_response(success: bool, json: &Value) -> PredictOutcome {
    if success {
        let label = json.get("label").and_then(Value::as_str).unwrap_or_default();
        PredictOutcome::Label(label.to_string())
    } else {
        let detail = json
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or(NO_DETECTION_FALLBACK);
        PredictOutcome::NoDetection(detail.to_string())
    }
}

impl InferenceBackend for InferenceClient {
    async fn predict_frame(
        &self,
        payload: FramePayload,
        cancel: CancellationToken,
    ) -> OurResult<PredictOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OurError::Cancelled),
            result = self.submit_frame(&payload) => result,
        }
    }
}
