//! Roboflow workflow inference client

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tiquetes_common::config::RoboflowConfig;

const USER_AGENT: &str = concat!("tiquetes-web/", env!("CARGO_PKG_VERSION"));
const ROBOFLOW_TIMEOUT_SECS: u64 = 120;

/// Roboflow client errors
#[derive(Debug, Error)]
pub enum RoboflowError {
    #[error("Roboflow is not configured")]
    NotConfigured,

    #[error("Invalid Roboflow API key")]
    InvalidApiKey,

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Roboflow server error {0}: {1}")]
    ServerError(u16, String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Roboflow request timed out")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Roboflow serverless workflow client
#[derive(Clone)]
pub struct RoboflowClient {
    http_client: reqwest::Client,
    config: RoboflowConfig,
}

impl RoboflowClient {
    pub fn new(config: RoboflowConfig) -> Result<Self, RoboflowError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(ROBOFLOW_TIMEOUT_SECS))
            .build()
            .map_err(|e| RoboflowError::NetworkError(e.to_string()))?;

        Ok(Self { http_client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.trim().is_empty()
            && !self.config.workspace.trim().is_empty()
            && !self.config.workflow_id.trim().is_empty()
    }

    fn workflow_url(&self) -> String {
        format!(
            "{}/infer/workflows/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.workspace.trim(),
            self.config.workflow_id.trim()
        )
    }

    /// Run the configured workflow on one image
    pub async fn run_workflow(&self, image: &[u8]) -> Result<Value, RoboflowError> {
        if !self.is_configured() {
            return Err(RoboflowError::NotConfigured);
        }

        let body = json!({
            "api_key": self.config.api_key,
            "inputs": {
                "image": {"type": "base64", "value": STANDARD.encode(image)}
            }
        });

        tracing::debug!(
            workflow = %self.config.workflow_id,
            bytes = image.len(),
            "Running Roboflow workflow"
        );

        let response = self
            .http_client
            .post(self.workflow_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RoboflowError::Timeout
                } else {
                    RoboflowError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => RoboflowError::InvalidApiKey,
                404 => RoboflowError::WorkflowNotFound(self.config.workflow_id.clone()),
                422 => RoboflowError::InvalidInput(error_text),
                code if code >= 500 => RoboflowError::ServerError(code, error_text),
                code => RoboflowError::ApiError(code, error_text),
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| RoboflowError::ParseError(e.to_string()))?;

        tracing::info!(workflow = %self.config.workflow_id, "Roboflow workflow completed");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RoboflowConfig {
        RoboflowConfig {
            api_url: "https://detect.roboflow.com/".to_string(),
            api_key: "key".to_string(),
            workspace: "planta".to_string(),
            workflow_id: "racimos".to_string(),
        }
    }

    #[test]
    fn test_workflow_url() {
        let client = RoboflowClient::new(config()).unwrap();
        assert_eq!(
            client.workflow_url(),
            "https://detect.roboflow.com/infer/workflows/planta/racimos"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_client_refuses() {
        let mut cfg = config();
        cfg.api_key.clear();
        let client = RoboflowClient::new(cfg).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.run_workflow(b"img").await,
            Err(RoboflowError::NotConfigured)
        ));
    }
}
