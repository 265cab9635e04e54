//! Upstream Response Mapping
//!
//! Every client in this crate reads the full body first and then decides:
//! 2xx with JSON is success, 2xx without JSON is malformed, anything else is
//! an upstream error carrying the status and whatever body came back.

use funnel_core::{FunnelError, Result};
use serde_json::{Value, json};

/// Map a reqwest failure that produced no response
pub(crate) fn transport(err: reqwest::Error) -> FunnelError {
    if err.is_timeout() {
        FunnelError::Transport(format!("timeout: {err}"))
    } else {
        FunnelError::Transport(err.to_string())
    }
}

/// Status and raw body of an upstream response
#[derive(Debug)]
pub(crate) struct UpstreamResponse {
    pub status: u16,
    pub text: String,
}

impl UpstreamResponse {
    pub async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport)?;
        Ok(Self { status, text })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.text).ok()
    }

    /// Body for an error reply: the upstream JSON, or a wrapper holding the text
    pub fn error_body(&self) -> Value {
        self.json().unwrap_or_else(|| {
            json!({
                "resultado": "error",
                "mensaje": "Error en la Edge Function",
                "detalle": self.text,
            })
        })
    }

    /// Success body, or the matching error
    pub fn into_json(self) -> Result<Value> {
        if !self.is_success() {
            return Err(self.into_error());
        }
        serde_json::from_str(&self.text).map_err(|_| FunnelError::Malformed(self.text))
    }

    pub fn into_error(self) -> FunnelError {
        tracing::error!(status = self.status, body = %self.text, "Upstream call failed");
        FunnelError::Upstream {
            status: self.status,
            body: self.error_body(),
        }
    }
}
