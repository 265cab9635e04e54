//! External Service Boundaries
//!
//! The funnel talks to three remote collaborators it does not control: the
//! subscriber registration function, the subscription (preapproval) function
//! and the subscriber store. Each is reached through a trait so the same
//! orchestration runs against the real Edge Functions, against this
//! service's own `/api/*` proxy routes, or against in-memory fakes.
//!
//! ```text
//! ┌──────────────────────┐   RegistrationService   ┌──────────────────────┐
//! │ CheckoutOrchestrator │────────────────────────▶│ ef_alta_suscriptor_* │
//! │                      │   SubscriptionService   ├──────────────────────┤
//! │                      │────────────────────────▶│ ef_crear_suscripcion │
//! └──────────────────────┘                         └──────────────────────┘
//! ┌──────────────────────┐   ActivationService     ┌──────────────────────┐
//! │    ReturnHandler     │────────────────────────▶│  suscriptores (REST) │
//! │                      │   PreapprovalLookup     │                      │
//! │                      │────────────────────────▶│                      │
//! │                      │   DiagnosticSink        ├──────────────────────┤
//! │                      │- - - - - - - - - - - - ▶│  log_funciones       │
//! └──────────────────────┘                         └──────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::lead::{ConsentMetadata, ContentPreference, Lead, SubscriberId, ZodiacSign};
use crate::plan::Plan;

/// Registration of a lead with the remote subscriber service
#[derive(Clone, Debug)]
pub struct RegistrationRequest {
    pub lead: Lead,

    /// Present when the caller is the server; a browser-side transport
    /// leaves it to the server to derive
    pub consent: Option<ConsentMetadata>,

    /// Extra fields forwarded untouched
    pub extra: Map<String, Value>,
}

impl RegistrationRequest {
    pub fn new(lead: Lead) -> Self {
        Self {
            lead,
            consent: None,
            extra: Map::new(),
        }
    }

    pub fn with_consent(mut self, consent: ConsentMetadata) -> Self {
        self.consent = Some(consent);
        self
    }
}

/// Remote answer to a successful registration call
#[derive(Clone, Debug)]
pub struct Registration {
    pub subscriber_id: Option<SubscriberId>,
    pub resultado: Option<String>,
    pub mensaje: Option<String>,

    /// Body as returned by the remote service
    pub body: Value,
}

impl Registration {
    /// Build from the remote JSON body
    pub fn from_body(body: Value) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        let subscriber_id = text("id_suscriptor").and_then(SubscriberId::new);
        let resultado = text("resultado");
        let mensaje = text("mensaje");
        Self {
            subscriber_id,
            resultado,
            mensaje,
            body,
        }
    }

    /// Some revisions of the registration function answer 2xx with
    /// `resultado: "duplicado"` instead of 409
    pub fn is_duplicate(&self) -> bool {
        self.resultado.as_deref() == Some("duplicado")
    }
}

/// Creation of a recurring-payment authorization for a subscriber
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub subscriber_id: SubscriberId,
    pub plan: Plan,
    pub name: Option<String>,
    pub whatsapp: Option<String>,
    pub phone: Option<String>,
    pub sign: Option<ZodiacSign>,
    pub content: Option<ContentPreference>,
    pub email: Option<String>,
    pub reason: Option<String>,
}

impl SubscriptionRequest {
    pub fn new(subscriber_id: SubscriberId, plan: Plan) -> Self {
        Self {
            subscriber_id,
            plan,
            name: None,
            whatsapp: None,
            phone: None,
            sign: None,
            content: None,
            email: None,
            reason: None,
        }
    }
}

/// Remote answer to a successful subscription call
#[derive(Clone, Debug)]
pub struct SubscriptionLink {
    /// Payment page the browser must be sent to
    pub init_point: Option<String>,
    pub preapproval_id: Option<String>,
    pub status: Option<String>,
    pub body: Value,
}

impl SubscriptionLink {
    pub fn from_body(body: Value) -> Self {
        let text = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let init_point = text("init_point").or_else(|| text("sandbox_init_point"));
        let preapproval_id = text("preapproval_id");
        let status = text("status");
        Self {
            init_point,
            preapproval_id,
            status,
            body,
        }
    }
}

/// Provisional activation after the payment provider sent the user back
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    #[serde(rename = "id_suscriptor")]
    pub subscriber_id: SubscriberId,

    pub preapproval_id: String,

    /// Status reported on the return URL, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_status: Option<String>,

    /// Raw return parameters, kept for diagnostics
    #[serde(
        rename = "backParams",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub back_params: Option<Value>,
}

/// Outcome reported by the activation proxy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivationReply {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where a preapproval status came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    /// Stored on the subscriber record
    Db,
    /// Fetched again from the payment provider
    Refresh,
}

/// Current state of a subscriber's recurring-payment authorization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreapprovalStatus {
    pub exists: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preapproval_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_point: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StatusSource>,
}

impl PreapprovalStatus {
    pub fn missing() -> Self {
        Self {
            exists: false,
            preapproval_id: None,
            status: None,
            init_point: None,
            source: None,
        }
    }
}

/// One row of the remote function log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    #[serde(rename = "nombre_funcion")]
    pub function: String,

    #[serde(rename = "resultado")]
    pub outcome: String,

    #[serde(rename = "detalle")]
    pub detail: Value,

    #[serde(rename = "exito")]
    pub success: bool,

    #[serde(rename = "creado_por")]
    pub created_by: String,
}

impl DiagnosticEntry {
    pub fn new(function: impl Into<String>, outcome: impl Into<String>, detail: Value) -> Self {
        Self {
            function: function.into(),
            outcome: outcome.into(),
            detail,
            success: true,
            created_by: "next".into(),
        }
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = who.into();
        self
    }
}

/// Registers leads with the remote subscriber service
#[async_trait]
pub trait RegistrationService: Send + Sync {
    /// Register a lead; 409 from the remote side maps to
    /// [`FunnelError::Duplicate`](crate::FunnelError::Duplicate)
    async fn register(&self, request: &RegistrationRequest) -> Result<Registration>;
}

/// Creates recurring-payment authorizations
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<SubscriptionLink>;
}

/// Grants provisional premium access pending payment confirmation
#[async_trait]
pub trait ActivationService: Send + Sync {
    async fn activate(&self, request: &ActivationRequest) -> Result<ActivationReply>;
}

/// Looks up a subscriber's preapproval
#[async_trait]
pub trait PreapprovalLookup: Send + Sync {
    async fn preapproval_status(&self, subscriber_id: &SubscriberId) -> Result<PreapprovalStatus>;
}

/// Best-effort diagnostic log; callers never depend on its outcome
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    async fn record(&self, entry: DiagnosticEntry) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_from_body() {
        let reg = Registration::from_body(json!({
            "resultado": "ok",
            "mensaje": "alta",
            "id_suscriptor": "abc123",
        }));
        assert_eq!(reg.subscriber_id.unwrap().as_str(), "abc123");
        assert!(!Registration::from_body(json!({"resultado": "ok"})).is_duplicate());
        assert!(Registration::from_body(json!({"resultado": "duplicado"})).is_duplicate());
    }

    #[test]
    fn test_subscription_link_falls_back_to_sandbox() {
        let link = SubscriptionLink::from_body(json!({
            "init_point": "",
            "sandbox_init_point": "https://sandbox.mp/pay",
        }));
        assert_eq!(link.init_point.as_deref(), Some("https://sandbox.mp/pay"));
    }

    #[test]
    fn test_diagnostic_entry_wire_names() {
        let entry = DiagnosticEntry::new("backurl-mp", "ERROR_PARAMS", json!({}))
            .failed()
            .created_by("backurl");
        let value = serde_json::to_value(entry).unwrap();
        assert_eq!(value["nombre_funcion"], "backurl-mp");
        assert_eq!(value["exito"], false);
        assert_eq!(value["creado_por"], "backurl");
    }
}
