//! Supabase Edge Functions Client
//!
//! Registration and subscription creation are owned by Edge Functions; this
//! client only shapes their payloads and classifies their answers.

use async_trait::async_trait;
use chrono::SecondsFormat;
use funnel_core::phone::COUNTRY;
use funnel_core::{
    FunnelError, Registration, RegistrationRequest, RegistrationService, Result, SubscriptionLink,
    SubscriptionRequest, SubscriptionService,
};
use serde_json::{Map, Value, json};

use crate::error::{UpstreamResponse, transport};

/// Default message when the remote side flags a duplicate without one
const DUPLICATE_MESSAGE: &str = "Ya tenés una suscripción activa.";

/// Client for the `functions/v1` endpoints
pub struct EdgeFunctionsClient {
    http: reqwest::Client,
    base_url: String,
    service_key: Option<String>,
}

impl EdgeFunctionsClient {
    /// `base_url` is the functions root, e.g. `https://ref.supabase.co/functions/v1`
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: crate::http_client()?,
            base_url: crate::trim_base(base_url),
            service_key: Some(service_key.into()),
        })
    }

    /// Client without a credential; only public functions will accept it
    pub fn public(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: crate::http_client()?,
            base_url: crate::trim_base(base_url),
            service_key: None,
        })
    }

    fn url(&self, function: &str) -> String {
        format!("{}/{function}", self.base_url)
    }

    async fn post(&self, function: &str, payload: &Value) -> Result<UpstreamResponse> {
        tracing::debug!(function, "Calling Edge Function");
        let mut request = self.http.post(self.url(function)).json(payload);
        if let Some(key) = &self.service_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(transport)?;
        UpstreamResponse::read(response).await
    }

    /// Forward a one-time payment request unchanged
    ///
    /// The function authenticates on its own, so no credential is sent.
    /// Returns the upstream status and body (`{}` when the body is not JSON).
    pub async fn create_one_time_payment(&self, payload: &Value) -> Result<(u16, Value)> {
        let response = self
            .http
            .post(self.url("ef_alta_pago_unico"))
            .json(payload)
            .send()
            .await
            .map_err(transport)?;
        let upstream = UpstreamResponse::read(response).await?;
        let body = upstream.json().unwrap_or_else(|| json!({}));
        Ok((upstream.status, body))
    }

    /// Apply field updates to an existing subscriber
    ///
    /// The payload must carry `id_suscriptor`; the function decides which
    /// fields it accepts. Returns the upstream status and body (`{}` when the
    /// body is not JSON).
    pub async fn update_subscriber(&self, payload: &Value) -> Result<(u16, Value)> {
        let upstream = self.post("ef_update_suscriptor", payload).await?;
        tracing::info!(status = upstream.status, "Subscriber update forwarded");
        let body = upstream.json().unwrap_or_else(|| json!({}));
        Ok((upstream.status, body))
    }
}

#[async_trait]
impl RegistrationService for EdgeFunctionsClient {
    async fn register(&self, request: &RegistrationRequest) -> Result<Registration> {
        let upstream = self
            .post("ef_alta_suscriptor_premium", &registration_payload(request))
            .await?;

        if upstream.status == 409 {
            let body = upstream.error_body();
            let message = body
                .get("mensaje")
                .and_then(Value::as_str)
                .unwrap_or(DUPLICATE_MESSAGE)
                .to_string();
            tracing::info!("Registration rejected as duplicate");
            return Err(FunnelError::Duplicate { message, body });
        }

        upstream.into_json().map(Registration::from_body)
    }
}

#[async_trait]
impl SubscriptionService for EdgeFunctionsClient {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<SubscriptionLink> {
        let upstream = self
            .post("ef_crear_suscripcion", &subscription_payload(request))
            .await?;
        let link = upstream.into_json().map(SubscriptionLink::from_body)?;
        tracing::info!(
            subscriber_id = %request.subscriber_id,
            preapproval_id = ?link.preapproval_id,
            "Subscription created"
        );
        Ok(link)
    }
}

/// Body sent to `ef_alta_suscriptor_premium`
pub fn registration_payload(request: &RegistrationRequest) -> Value {
    let lead = &request.lead;
    let mut payload: Map<String, Value> = request.extra.clone();
    for stale in ["version_politica", "monto", "moneda"] {
        payload.remove(stale);
    }

    payload.insert("nombre".into(), json!(lead.name));
    payload.insert("telefono".into(), json!(lead.phone.national()));
    payload.insert("whatsapp".into(), json!(lead.phone.e164()));
    payload.insert("pais".into(), json!(COUNTRY));
    payload.insert("signo".into(), json!(lead.sign));
    payload.insert("contenido_preferido".into(), json!(lead.content));
    payload.insert("acepto_politicas".into(), json!(true));
    payload.insert("version_politicas".into(), json!(lead.policy_version));
    payload.insert("fuente".into(), json!(lead.source));
    payload.insert("tipo_suscripcion".into(), json!("premium"));
    if let Some(email) = &lead.email {
        payload.insert("email".into(), json!(email));
    }

    if let Some(consent) = &request.consent {
        payload.insert("ip_consentimiento".into(), json!(consent.ip));
        payload.insert("user_agent".into(), json!(consent.user_agent));
        payload.insert(
            "fecha_consentimiento".into(),
            json!(consent.accepted_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        payload.insert("medio_consentimiento".into(), json!(consent.medium));
    }

    Value::Object(payload)
}

/// Body sent to `ef_crear_suscripcion`
pub fn subscription_payload(request: &SubscriptionRequest) -> Value {
    let mut payload = json!({
        "id_suscriptor": request.subscriber_id,
        "monto": request.plan.amount_value(),
        "moneda": request.plan.currency,
    });
    let optional = [
        ("nombre", request.name.as_ref().map(|v| json!(v))),
        ("whatsapp", request.whatsapp.as_ref().map(|v| json!(v))),
        ("telefono", request.phone.as_ref().map(|v| json!(v))),
        ("signo", request.sign.map(|v| json!(v))),
        ("contenido_preferido", request.content.map(|v| json!(v))),
        ("email", request.email.as_ref().map(|v| json!(v))),
        ("reason", request.reason.as_ref().map(|v| json!(v))),
    ];
    if let Value::Object(map) = &mut payload {
        for (key, value) in optional {
            if let Some(value) = value {
                map.insert(key.into(), value);
            }
        }
    }
    payload
}
