//! Outbound webhook client (Make.com scenarios)
//!
//! Each external flow has its own URL in the `[webhooks]` TOML table. A flow
//! whose URL is empty is treated as not configured.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tiquetes_common::config::WebhookConfig;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("tiquetes-web/", env!("CARGO_PKG_VERSION"));

/// Webhook client errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook '{0}' is not configured")]
    NotConfigured(&'static str),

    #[error("Webhook '{0}' timed out")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Webhook returned HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Webhook '{0}' returned an empty response")]
    EmptyResponse(&'static str),
}

/// External flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Webhook {
    /// Ticket image → markdown table
    Process,
    /// Plate image → plate text
    Placa,
    Revalidation,
    Register,
    /// Scale photo → weight reading
    Pesaje,
    Autorizacion,
    RegistroPeso,
    RegistroClasificacion,
    RegistroPesoNeto,
    AdminNotification,
    ValidacionGranel,
}

impl Webhook {
    pub fn name(&self) -> &'static str {
        match self {
            Webhook::Process => "process",
            Webhook::Placa => "placa",
            Webhook::Revalidation => "revalidation",
            Webhook::Register => "register",
            Webhook::Pesaje => "pesaje",
            Webhook::Autorizacion => "autorizacion",
            Webhook::RegistroPeso => "registro_peso",
            Webhook::RegistroClasificacion => "registro_clasificacion",
            Webhook::RegistroPesoNeto => "registro_peso_neto",
            Webhook::AdminNotification => "admin_notification",
            Webhook::ValidacionGranel => "validacion_granel",
        }
    }

    fn url<'a>(&self, config: &'a WebhookConfig) -> &'a str {
        match self {
            Webhook::Process => &config.process,
            Webhook::Placa => &config.placa,
            Webhook::Revalidation => &config.revalidation,
            Webhook::Register => &config.register,
            Webhook::Pesaje => &config.pesaje,
            Webhook::Autorizacion => &config.autorizacion,
            Webhook::RegistroPeso => &config.registro_peso,
            Webhook::RegistroClasificacion => &config.registro_clasificacion,
            Webhook::RegistroPesoNeto => &config.registro_peso_neto,
            Webhook::AdminNotification => &config.admin_notification,
            Webhook::ValidacionGranel => &config.validacion_granel,
        }
    }
}

/// File attached to a multipart webhook call
#[derive(Debug, Clone)]
pub struct ArchivoAdjunto {
    /// Multipart field name
    pub campo: &'static str,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Webhook reply with HTTP 200
#[derive(Debug, Clone)]
pub struct WebhookReply {
    pub body: String,
}

impl WebhookReply {
    /// Body as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(self.body.trim()).ok()
    }
}

/// Make.com webhook client
#[derive(Clone)]
pub struct WebhookClient {
    http_client: reqwest::Client,
    urls: Arc<WebhookConfig>,
}

impl WebhookClient {
    pub fn new(urls: WebhookConfig) -> Result<Self, WebhookError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| WebhookError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            urls: Arc::new(urls),
        })
    }

    pub fn is_configured(&self, hook: Webhook) -> bool {
        !hook.url(&self.urls).trim().is_empty()
    }

    fn url(&self, hook: Webhook) -> Result<&str, WebhookError> {
        let url = hook.url(&self.urls).trim();
        if url.is_empty() {
            return Err(WebhookError::NotConfigured(hook.name()));
        }
        Ok(url)
    }

    /// POST a multipart form with one file and text fields
    pub async fn post_file(
        &self,
        hook: Webhook,
        archivo: ArchivoAdjunto,
        fields: &[(&str, String)],
        timeout: Duration,
    ) -> Result<WebhookReply, WebhookError> {
        let url = self.url(hook)?;

        let part = reqwest::multipart::Part::bytes(archivo.bytes)
            .file_name(archivo.filename.clone())
            .mime_str(&archivo.content_type)
            .map_err(|e| WebhookError::Network(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new().part(archivo.campo, part);
        for (name, value) in fields {
            form = form.text(name.to_string(), value.clone());
        }

        debug!(webhook = hook.name(), filename = %archivo.filename, "Posting file to webhook");
        let request = self.http_client.post(url).multipart(form).timeout(timeout);
        self.send(hook, request).await
    }

    /// POST a JSON body
    pub async fn post_json(
        &self,
        hook: Webhook,
        body: &Value,
        timeout: Duration,
    ) -> Result<WebhookReply, WebhookError> {
        let url = self.url(hook)?;
        debug!(webhook = hook.name(), "Posting JSON to webhook");
        let request = self.http_client.post(url).json(body).timeout(timeout);
        self.send(hook, request).await
    }

    /// Fire-and-log notification; failures never reach the caller
    pub async fn notify(&self, hook: Webhook, body: &Value, timeout: Duration) {
        if !self.is_configured(hook) {
            debug!(webhook = hook.name(), "Notification webhook not configured, skipping");
            return;
        }
        if let Err(e) = self.post_json(hook, body, timeout).await {
            warn!(webhook = hook.name(), "Notification failed: {}", e);
        }
    }

    async fn send(
        &self,
        hook: Webhook,
        request: reqwest::RequestBuilder,
    ) -> Result<WebhookReply, WebhookError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout(hook.name().to_string())
            } else {
                WebhookError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout(hook.name().to_string())
            } else {
                WebhookError::Network(e.to_string())
            }
        })?;

        if status != reqwest::StatusCode::OK {
            warn!(webhook = hook.name(), status = status.as_u16(), "Webhook returned error status");
            return Err(WebhookError::Status(status.as_u16(), body));
        }

        info!(webhook = hook.name(), bytes = body.len(), "Webhook call succeeded");
        Ok(WebhookReply { body })
    }
}

/// Fail with `EmptyResponse` when the reply body is blank
pub fn require_body(hook: Webhook, reply: WebhookReply) -> Result<WebhookReply, WebhookError> {
    if reply.body.trim().is_empty() {
        return Err(WebhookError::EmptyResponse(hook.name()));
    }
    Ok(reply)
}

/// Remove a surrounding ```` ```json ```` fence from a webhook body
pub fn strip_json_fence(body: &str) -> &str {
    let trimmed = body.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim()
        .strip_suffix("```")
        .unwrap_or(without_open.trim())
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_webhook() {
        let client = WebhookClient::new(WebhookConfig::default()).unwrap();
        assert!(!client.is_configured(Webhook::Process));
        assert!(matches!(
            client.url(Webhook::Process),
            Err(WebhookError::NotConfigured("process"))
        ));
    }

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_json_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_json_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_require_body() {
        let empty = WebhookReply { body: "  ".into() };
        assert!(matches!(
            require_body(Webhook::Pesaje, empty),
            Err(WebhookError::EmptyResponse("pesaje"))
        ));
    }
}
