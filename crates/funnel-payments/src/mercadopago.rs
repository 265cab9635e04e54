//! Mercado Pago Client
//!
//! Read-only access to preapprovals (recurring-payment authorizations).
//! Creating them is the subscription Edge Function's job.

use funnel_core::{FunnelError, Result};
use serde::{Deserialize, Serialize};

use crate::error::{UpstreamResponse, transport};

/// Production API root
pub const API_BASE: &str = "https://api.mercadopago.com";

/// A preapproval as returned by `GET /preapproval/{id}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preapproval {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub init_point: Option<String>,

    #[serde(default)]
    pub sandbox_init_point: Option<String>,

    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl Preapproval {
    /// Page the payer should be sent to: `init_point`, then the sandbox
    /// page, then the redirect URL
    pub fn payment_url(&self) -> Option<&str> {
        [&self.init_point, &self.sandbox_init_point, &self.redirect_url]
            .into_iter()
            .find_map(|url| url.as_deref().filter(|u| !u.trim().is_empty()))
    }
}

pub struct MercadoPagoClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl MercadoPagoClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(API_BASE, access_token)
    }

    pub fn with_base_url(base_url: &str, access_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: crate::http_client()?,
            base_url: crate::trim_base(base_url),
            access_token: access_token.into(),
        })
    }

    pub async fn get_preapproval(&self, preapproval_id: &str) -> Result<Preapproval> {
        let response = self
            .http
            .get(format!("{}/preapproval/{preapproval_id}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;
        let body = UpstreamResponse::read(response).await?.into_json()?;
        serde_json::from_value(body).map_err(|e| FunnelError::Malformed(format!("preapproval: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    #[test]
    fn test_payment_url_fallback_order() {
        let preapproval = Preapproval {
            init_point: Some(String::new()),
            sandbox_init_point: None,
            redirect_url: Some("https://mp.example/redirect".into()),
            ..Default::default()
        };
        assert_eq!(preapproval.payment_url(), Some("https://mp.example/redirect"));
        assert_eq!(Preapproval::default().payment_url(), None);
    }

    #[tokio::test]
    async fn test_get_preapproval() {
        async fn preapproval(Path(id): Path<String>) -> std::result::Result<Json<Value>, StatusCode> {
            if id == "pre-1" {
                Ok(Json(json!({
                    "id": "pre-1",
                    "status": "authorized",
                    "init_point": "https://mp.example/pay/abc",
                    "payer_id": 42,
                })))
            } else {
                Err(StatusCode::NOT_FOUND)
            }
        }
        let base = stub::serve(Router::new().route("/preapproval/{id}", get(preapproval))).await;
        let client = MercadoPagoClient::with_base_url(&base, "APP_USR-test").unwrap();

        let found = client.get_preapproval("pre-1").await.unwrap();
        assert_eq!(found.status.as_deref(), Some("authorized"));
        assert_eq!(found.payment_url(), Some("https://mp.example/pay/abc"));

        let err = client.get_preapproval("missing").await.unwrap_err();
        assert!(matches!(err, FunnelError::Upstream { status: 404, .. }));
    }
}
