//! Side-dish detection.
//!
//! Two strategies produce the same `Vec<Detection>`: the local binary model,
//! which only knows about ikan bilis, and a hosted object-detection model that
//! is reached over HTTPS. The hosted call never fails the caller; any problem
//! is logged and reported as "nothing detected".

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use failsafe::backoff::EqualJittered;
use failsafe::failure_policy::{ConsecutiveFailures, OrElse, SuccessRateOverTimeWindow};
use failsafe::futures::CircuitBreaker as _;
use failsafe::StateMachine;
use log::{info, warn};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::RemoteDetectorConfig, error::ModelError, models::Detection, preprocess::ImageTensor,
};

/// The only side dish the local model was trained on.
pub const SIDE_DISH_LABEL: &str = "Ikan Bilis";

/// Scores strictly above this count as present. Lower than 0.5 to favour recall.
pub const PRESENCE_THRESHOLD: f32 = 0.3;

/// Filters applied by the hosted service, in percent.
const REMOTE_CONFIDENCE: &str = "40";
const REMOTE_OVERLAP: &str = "30";

type CircuitBreakerType = StateMachine<
    OrElse<SuccessRateOverTimeWindow<EqualJittered>, ConsecutiveFailures<EqualJittered>>,
    (),
>;

/// Raw forward pass of the binary side-dish model.
pub trait SideDishModel: Send + Sync {
    /// Probability that the side dish is present.
    fn presence(&self, input: &ImageTensor) -> Result<f32, ModelError>;
}

pub fn is_present(confidence: f32) -> bool {
    confidence > PRESENCE_THRESHOLD
}

#[derive(Clone)]
pub struct LocalDetector {
    model: Arc<dyn SideDishModel>,
}

impl LocalDetector {
    pub fn new(model: Arc<dyn SideDishModel>) -> Self {
        LocalDetector { model }
    }

    pub fn score(&self, input: &ImageTensor) -> Result<f32, ModelError> {
        let confidence = self.model.presence(input)?;
        if !confidence.is_finite() {
            return Err(ModelError::UnexpectedOutput(format!(
                "side dish score {confidence} is not a probability"
            )));
        }
        Ok(confidence.clamp(0.0, 1.0))
    }

    /// At most one detection.
    pub fn detect(&self, input: &ImageTensor) -> Result<Vec<Detection>, ModelError> {
        Ok(detections_from_score(self.score(input)?))
    }
}

pub fn detections_from_score(confidence: f32) -> Vec<Detection> {
    info!(
        "Side dish raw confidence: {confidence:.4} (threshold: {PRESENCE_THRESHOLD})"
    );
    if is_present(confidence) {
        vec![Detection::new(SIDE_DISH_LABEL, f64::from(confidence))]
    } else {
        Vec::new()
    }
}

#[derive(Error, Debug)]
enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service error: {0}")]
    Service(String),

    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    predictions: Option<Vec<RemotePrediction>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemotePrediction {
    #[serde(rename = "class", default = "unknown_class")]
    class_name: String,
    #[serde(default)]
    confidence: f64,
}

fn unknown_class() -> String {
    "Unknown".to_string()
}

fn parse_detections(body: &str) -> Result<Vec<Detection>, RemoteError> {
    let response: DetectionResponse = serde_json::from_str(body)?;
    let predictions = match (response.predictions, response.message) {
        (Some(predictions), _) => predictions,
        (None, Some(message)) => return Err(RemoteError::Service(message)),
        (None, None) => {
            info!("No side dish predictions in detection response");
            Vec::new()
        }
    };
    let mut detections: Vec<Detection> = predictions
        .into_iter()
        .map(|p| Detection::new(p.class_name, p.confidence.clamp(0.0, 1.0)))
        .collect();
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(detections)
}

/// Client for the hosted detection model.
pub struct RemoteDetector {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    circuit_breaker: CircuitBreakerType,
}

impl RemoteDetector {
    pub fn new(config: &RemoteDetectorConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(RemoteDetector {
            client,
            endpoint: format!(
                "{}/{}/{}",
                config.base_url.trim_end_matches('/'),
                config.model_id,
                config.version
            ),
            api_key: config.api_key.clone(),
            circuit_breaker: failsafe::Config::new().build(),
        })
    }

    /// Never fails: errors and an open circuit both read as no detections.
    pub async fn detect(&self, jpeg: &[u8]) -> Vec<Detection> {
        let request = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("confidence", REMOTE_CONFIDENCE),
                ("overlap", REMOTE_OVERLAP),
            ])
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(STANDARD.encode(jpeg));

        let call = async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(RemoteError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            parse_detections(&body)
        };

        match self.circuit_breaker.call(call).await {
            Ok(detections) => {
                info!("Remote side dish detections: {detections:?}");
                detections
            }
            Err(failsafe::Error::Rejected) => {
                warn!("Side dish service circuit is open, skipping detection");
                Vec::new()
            }
            Err(failsafe::Error::Inner(e)) => {
                warn!("Side dish detection failed: {e}");
                Vec::new()
            }
        }
    }
}

/// Strategy used by `/predict`.
#[derive(Clone)]
pub enum SideDishDetector {
    Local(LocalDetector),
    Remote(Arc<RemoteDetector>),
}
