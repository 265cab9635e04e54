//! Provisional Activation
//!
//! Grants premium access as soon as the payer is back from the payment
//! provider, flagged as pending confirmation until the provider's webhook
//! settles it. The access window is one calendar month.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use funnel_core::{
    ActivationReply, ActivationRequest, ActivationService, DiagnosticEntry, DiagnosticSink,
    PaymentStatus, Result, SubscriberId,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::rest::SupabaseRest;

/// End of the provisional window: one calendar month after `start`,
/// clamped to the last day of a shorter month (Jan 31 → Feb 28)
pub fn provisional_expiry(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Subscriber columns written on the payer's return
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActivationPatch {
    pub estado_suscripcion: &'static str,
    pub premium_activo: bool,
    pub premium_pendiente_confirmacion: bool,
    pub preapproval_id: String,
    pub preapproval_status: &'static str,
    pub preapproval_actualizado_en: DateTime<Utc>,
    pub auto_renovacion_activa: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_inicio_premium: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_vencimiento_premium: Option<DateTime<Utc>>,
}

impl ActivationPatch {
    /// Access granted now, pending webhook confirmation
    pub fn provisional(preapproval_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            estado_suscripcion: "activa",
            premium_activo: true,
            premium_pendiente_confirmacion: true,
            preapproval_id: preapproval_id.into(),
            preapproval_status: "authorized",
            preapproval_actualizado_en: now,
            auto_renovacion_activa: true,
            fecha_inicio_premium: Some(now),
            fecha_vencimiento_premium: Some(provisional_expiry(now)),
        }
    }

    /// Payment still being processed; no access yet
    pub fn pending_payment(preapproval_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            estado_suscripcion: "pendiente_pago",
            premium_activo: false,
            premium_pendiente_confirmacion: true,
            preapproval_id: preapproval_id.into(),
            preapproval_status: "pending",
            preapproval_actualizado_en: now,
            auto_renovacion_activa: false,
            fecha_inicio_premium: None,
            fecha_vencimiento_premium: None,
        }
    }

    /// Grants access unless the caller reported a non-positive status
    pub fn for_request(request: &ActivationRequest, now: DateTime<Utc>) -> Self {
        let status = request.collection_status.as_deref().unwrap_or_default();
        match PaymentStatus::classify(status) {
            PaymentStatus::Positive | PaymentStatus::Unknown => {
                Self::provisional(&request.preapproval_id, now)
            }
            PaymentStatus::Pending | PaymentStatus::Rejected => {
                Self::pending_payment(&request.preapproval_id, now)
            }
        }
    }
}

/// Subscriber columns written when the provider confirms a preapproval
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfirmationPatch {
    pub preapproval_id: String,
    pub preapproval_status: String,
    pub estado_suscripcion: &'static str,
    pub auto_renovacion_activa: bool,
    pub premium_activo: bool,

    /// Written as `null` when not authorized
    pub fecha_inicio_premium: Option<DateTime<Utc>>,
}

impl ConfirmationPatch {
    pub fn new(preapproval_id: impl Into<String>, status: &str, now: DateTime<Utc>) -> Self {
        let authorized = status.trim().eq_ignore_ascii_case("authorized");
        Self {
            preapproval_id: preapproval_id.into(),
            preapproval_status: status.trim().to_string(),
            estado_suscripcion: if authorized { "activa" } else { "pendiente_autorizacion" },
            auto_renovacion_activa: authorized,
            premium_activo: authorized,
            fecha_inicio_premium: authorized.then_some(now),
        }
    }
}

/// Writes activation and confirmation patches to the subscriber store
pub struct ProvisionalActivator {
    rest: Arc<SupabaseRest>,
    log: Arc<dyn DiagnosticSink>,
}

impl ProvisionalActivator {
    pub fn new(rest: Arc<SupabaseRest>) -> Self {
        let log: Arc<dyn DiagnosticSink> = rest.clone();
        Self { rest, log }
    }

    /// Record the outcome without holding up the reply
    fn spawn_log(&self, entry: DiagnosticEntry) {
        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            if let Err(e) = log.record(entry).await {
                tracing::warn!(error = %e, "Could not write activation log");
            }
        });
    }

    /// Apply the provider's final preapproval status
    pub async fn confirm(
        &self,
        subscriber_id: &SubscriberId,
        preapproval_id: &str,
        status: &str,
    ) -> Result<Value> {
        let patch = ConfirmationPatch::new(preapproval_id, status, Utc::now());
        let data = self
            .rest
            .patch_subscriber(subscriber_id, &serde_json::to_value(&patch)?)
            .await?;
        tracing::info!(
            subscriber_id = %subscriber_id,
            status = %patch.preapproval_status,
            estado = patch.estado_suscripcion,
            "Subscription confirmed"
        );
        Ok(data)
    }
}

#[async_trait]
impl ActivationService for ProvisionalActivator {
    async fn activate(&self, request: &ActivationRequest) -> Result<ActivationReply> {
        let patch = ActivationPatch::for_request(request, Utc::now());
        let detail = json!({
            "id_suscriptor": request.subscriber_id,
            "preapproval_id": request.preapproval_id,
            "status": request.collection_status,
        });

        match self
            .rest
            .patch_subscriber(&request.subscriber_id, &serde_json::to_value(&patch)?)
            .await
        {
            Ok(data) => {
                let outcome = if patch.premium_activo {
                    "OK_ACTIVACION_FINAL"
                } else {
                    "OK_PENDIENTE"
                };
                tracing::info!(
                    subscriber_id = %request.subscriber_id,
                    estado = patch.estado_suscripcion,
                    "Provisional activation written"
                );
                let mut detail = detail;
                detail["estado_final"] = json!(patch.estado_suscripcion);
                self.spawn_log(
                    DiagnosticEntry::new("backurl-mp-final", outcome, detail).created_by("backurl"),
                );
                Ok(ActivationReply {
                    ok: true,
                    data: Some(data),
                    error: None,
                })
            }
            Err(e) => {
                let mut detail = detail;
                detail["error"] = json!(e.to_string());
                self.spawn_log(
                    DiagnosticEntry::new("backurl-mp-final", "ERROR_DB", detail)
                        .failed()
                        .created_by("backurl"),
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{patch, post};
    use axum::{Json, Router};
    use chrono::TimeZone;
    use funnel_core::FunnelError;
    use std::sync::Mutex;

    #[test]
    fn test_expiry_is_one_calendar_month() {
        let start = Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap();
        assert_eq!(provisional_expiry(start), Utc.with_ymd_and_hms(2025, 4, 15, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_expiry_clamps_to_month_end() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 8, 30, 0).unwrap();
        assert_eq!(provisional_expiry(start), Utc.with_ymd_and_hms(2025, 2, 28, 8, 30, 0).unwrap());
        let leap = Utc.with_ymd_and_hms(2024, 1, 31, 8, 30, 0).unwrap();
        assert_eq!(provisional_expiry(leap), Utc.with_ymd_and_hms(2024, 2, 29, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_pending_status_grants_nothing() {
        let now = Utc::now();
        let request = ActivationRequest {
            subscriber_id: SubscriberId::new("abc123").unwrap(),
            preapproval_id: "pre-1".into(),
            collection_status: Some("in_process".into()),
            back_params: None,
        };
        let patch = ActivationPatch::for_request(&request, now);
        assert!(!patch.premium_activo);
        assert_eq!(patch.estado_suscripcion, "pendiente_pago");

        let json = serde_json::to_value(&patch).unwrap();
        assert!(json.get("fecha_vencimiento_premium").is_none());
    }

    #[test]
    fn test_confirmation_patch() {
        let now = Utc::now();
        let authorized = serde_json::to_value(ConfirmationPatch::new("pre-1", "authorized", now)).unwrap();
        assert_eq!(authorized["estado_suscripcion"], "activa");
        assert_eq!(authorized["premium_activo"], true);

        let paused = serde_json::to_value(ConfirmationPatch::new("pre-1", "paused", now)).unwrap();
        assert_eq!(paused["estado_suscripcion"], "pendiente_autorizacion");
        assert!(paused["fecha_inicio_premium"].is_null());
    }

    type Patches = Arc<Mutex<Vec<Value>>>;

    async fn activator(status: StatusCode) -> (ProvisionalActivator, Patches) {
        let patches: Patches = Arc::default();
        let router = Router::new()
            .route(
                "/rest/v1/suscriptores",
                patch(move |State(patches): State<Patches>, Json(body): Json<Value>| async move {
                    patches.lock().unwrap().push(body.clone());
                    (status, Json(json!([body])))
                }),
            )
            .route("/rest/v1/log_funciones", post(|| async { StatusCode::CREATED }))
            .with_state(patches.clone());
        let base = stub::serve(router).await;
        let rest = Arc::new(SupabaseRest::new(&base, "srk-test").unwrap());
        (ProvisionalActivator::new(rest), patches)
    }

    #[tokio::test]
    async fn test_activate_writes_provisional_patch() {
        let (activator, patches) = activator(StatusCode::OK).await;
        let request = ActivationRequest {
            subscriber_id: SubscriberId::new("abc123").unwrap(),
            preapproval_id: "pre-1".into(),
            collection_status: None,
            back_params: None,
        };

        let reply = activator.activate(&request).await.unwrap();
        assert!(reply.ok);

        let sent = patches.lock().unwrap()[0].clone();
        assert_eq!(sent["estado_suscripcion"], "activa");
        assert_eq!(sent["premium_pendiente_confirmacion"], true);
        assert_eq!(sent["preapproval_id"], "pre-1");
        assert!(sent["fecha_vencimiento_premium"].is_string());
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let (activator, _) = activator(StatusCode::INTERNAL_SERVER_ERROR).await;
        let request = ActivationRequest {
            subscriber_id: SubscriberId::new("abc123").unwrap(),
            preapproval_id: "pre-1".into(),
            collection_status: Some("approved".into()),
            back_params: None,
        };

        let err = activator.activate(&request).await.unwrap_err();
        assert!(matches!(err, FunnelError::Upstream { status: 500, .. }));
    }
}
