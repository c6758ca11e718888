//! Client for the external fatigue scoring service.
//!
//! Scoring is a best-effort enrichment layered on top of a stored window:
//! a timeout or malformed response is reported to the caller, which logs it
//! and carries on with the behavioral features alone.

use crate::core::features::WindowFeatures;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default request timeout for the scorer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1200);

/// Scorer endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Base URL, e.g. `http://localhost:8001`
    pub base_url: String,
    /// Per-request timeout
    #[serde(with = "millis_serde")]
    pub timeout: Duration,
    /// Whether ingestion should call the scorer at all
    pub enabled: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: DEFAULT_TIMEOUT,
            enabled: true,
        }
    }
}

impl ScorerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Get the prediction endpoint URL.
    pub fn predict_url(&self) -> String {
        format!("{}/predict", self.base())
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base())
    }
}

/// Scorer error types.
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("Scorer config error: {0}")]
    Config(String),

    #[error("Scorer network error: {0}")]
    Network(String),

    #[error("Scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scorer server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Scorer protocol error: {0}")]
    Protocol(String),
}

/// Request body for `POST /predict`.
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub features: Vec<f64>,
}

impl PredictRequest {
    pub fn from_features(features: &WindowFeatures) -> Self {
        Self {
            features: features.to_vector().to_vec(),
        }
    }
}

/// A validated score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueScore {
    /// Score clamped to `[0, 100]`
    pub fatigue_score: f64,
    /// Severity label, never empty
    pub severity: String,
}

/// Validate a raw `/predict` response body.
pub fn parse_prediction(body: &serde_json::Value) -> Result<FatigueScore, ScorerError> {
    let fatigue_score = body
        .get("fatigue_score")
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .ok_or_else(|| ScorerError::Protocol("missing or non-numeric fatigue_score".to_string()))?;

    let severity = body
        .get("severity")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ScorerError::Protocol("missing or empty severity".to_string()))?;

    Ok(FatigueScore {
        fatigue_score: fatigue_score.clamp(0.0, 100.0),
        severity: severity.to_string(),
    })
}

/// HTTP client for the scoring service.
#[cfg(feature = "scorer")]
#[derive(Clone)]
pub struct ScorerClient {
    config: ScorerConfig,
    client: reqwest::Client,
}

#[cfg(feature = "scorer")]
impl ScorerClient {
    pub fn new(config: ScorerConfig) -> Result<Self, ScorerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScorerError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Test connection to the scorer.
    pub async fn test_connection(&self) -> Result<bool, ScorerError> {
        let response = self
            .client
            .post(self.config.health_url())
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        Ok(response.status().is_success())
    }

    /// Score one window's features.
    pub async fn score(&self, features: &WindowFeatures) -> Result<FatigueScore, ScorerError> {
        let request = PredictRequest::from_features(features);

        let response = self
            .client
            .post(self.config.predict_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ScorerError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScorerError::Protocol(e.to_string()))?;

        parse_prediction(&body)
    }

    fn map_transport(&self, e: reqwest::Error) -> ScorerError {
        if e.is_timeout() {
            ScorerError::Timeout(self.config.timeout)
        } else {
            ScorerError::Network(e.to_string())
        }
    }
}

/// Serde support for Duration as milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
