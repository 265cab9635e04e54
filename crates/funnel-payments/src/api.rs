//! Funnel API Client
//!
//! Speaks to this service's own `/api/*` routes, the way the landing page
//! does. Lets the checkout orchestrator and the return handler run in a
//! separate process (smoke tests, support tooling) against a deployed
//! server without holding any upstream credential.

use async_trait::async_trait;
use funnel_core::{
    ActivationReply, ActivationRequest, ActivationService, DiagnosticEntry, DiagnosticSink,
    FunnelError, PreapprovalLookup, PreapprovalStatus, Registration, RegistrationRequest,
    RegistrationService, Result, StatusSource, SubscriberId, SubscriptionLink, SubscriptionRequest,
    SubscriptionService,
};
use serde_json::{Value, json};

use crate::edge::subscription_payload;
use crate::error::{UpstreamResponse, transport};

pub struct FunnelApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl FunnelApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: crate::http_client()?,
            base_url: crate::trim_base(base_url),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<UpstreamResponse> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        UpstreamResponse::read(response).await
    }
}

#[async_trait]
impl RegistrationService for FunnelApiClient {
    async fn register(&self, request: &RegistrationRequest) -> Result<Registration> {
        let lead = &request.lead;
        let mut body = request.extra.clone();
        body.insert("nombre".into(), json!(lead.name));
        body.insert("telefono".into(), json!(lead.phone.local()));
        body.insert("signo".into(), json!(lead.sign));
        body.insert("contenido_preferido".into(), json!(lead.content));
        body.insert("acepto_politicas".into(), json!(true));
        body.insert("version_politica".into(), json!(lead.policy_version));
        body.insert("fuente".into(), json!(lead.source));
        if let Some(email) = &lead.email {
            body.insert("email".into(), json!(email));
        }

        let upstream = self.post("/api/alta-suscriptor", &Value::Object(body)).await?;
        if upstream.status == 409 {
            let body = upstream.error_body();
            let message = body
                .get("mensaje")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(FunnelError::Duplicate { message, body });
        }
        upstream.into_json().map(Registration::from_body)
    }
}

#[async_trait]
impl SubscriptionService for FunnelApiClient {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<SubscriptionLink> {
        let upstream = self
            .post("/api/crear-suscripcion", &subscription_payload(request))
            .await?;
        upstream.into_json().map(SubscriptionLink::from_body)
    }
}

#[async_trait]
impl ActivationService for FunnelApiClient {
    async fn activate(&self, request: &ActivationRequest) -> Result<ActivationReply> {
        let upstream = self
            .post("/api/activar-premium-provisorio", &serde_json::to_value(request)?)
            .await?;
        let success = upstream.is_success();
        let reply = upstream
            .json()
            .and_then(|body| serde_json::from_value::<ActivationReply>(body).ok())
            .unwrap_or(ActivationReply {
                ok: false,
                data: None,
                error: Some(format!("HTTP {}", upstream.status)),
            });
        // A non-2xx status is never a success, whatever the body says
        Ok(ActivationReply {
            ok: success && reply.ok,
            ..reply
        })
    }
}

#[async_trait]
impl PreapprovalLookup for FunnelApiClient {
    async fn preapproval_status(&self, subscriber_id: &SubscriberId) -> Result<PreapprovalStatus> {
        let response = self
            .http
            .get(self.url("/api/preapproval-status"))
            .query(&[("id_suscriptor", subscriber_id.as_str())])
            .send()
            .await
            .map_err(transport)?;
        let body = UpstreamResponse::read(response).await?.into_json()?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(FunnelError::Upstream { status: 500, body });
        }
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        let source = match body.get("source").and_then(Value::as_str) {
            Some("refresh") => Some(StatusSource::Refresh),
            Some("db") => Some(StatusSource::Db),
            _ => None,
        };
        Ok(PreapprovalStatus {
            exists: body.get("exists").and_then(Value::as_bool).unwrap_or(false),
            preapproval_id: text("preapproval_id"),
            status: text("status"),
            init_point: text("init_point"),
            source,
        })
    }
}

#[async_trait]
impl DiagnosticSink for FunnelApiClient {
    /// The log route files everything under its own function name; only the
    /// detail travels
    async fn record(&self, entry: DiagnosticEntry) -> Result<()> {
        let upstream = self.post("/api/log-backurl", &entry.detail).await?;
        match upstream.json().and_then(|b| b.get("ok").and_then(Value::as_bool)) {
            Some(true) => Ok(()),
            _ => Err(FunnelError::Upstream {
                status: upstream.status,
                body: upstream.error_body(),
            }),
        }
    }
}
