//! Payment Return Handling
//!
//! After the payment provider sends the browser back, the landing page
//! reads the return parameters once and settles on `ok`, `warn` or `error`:
//!
//! - either identifier missing: `error`, no network call at all
//! - `authorized`, `approved`, `success`, `active`: provisional activation,
//!   `ok` only if activation reports success, `warn` otherwise
//! - `pending`, `in_process`: `warn`, no activation; the stored checkout
//!   link is offered so the payer can finish
//! - no status: the stored preapproval status decides
//! - anything else: `error`
//!
//! The diagnostic log entry is spawned on the runtime and never awaited.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::map::Entry;
use serde_json::{Map, Value, json};

use crate::lead::SubscriberId;
use crate::service::{
    ActivationRequest, ActivationService, DiagnosticEntry, DiagnosticSink, PreapprovalLookup,
};

/// Marker carried by every return-page log entry
pub const LOG_KIND: &str = "BACKURL_MP_USUARIO";

/// Query parameters of a payment return URL
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReturnParams {
    pub subscriber_id: Option<SubscriberId>,
    pub preapproval_id: Option<String>,
    pub status: Option<String>,
    pub payer_email: Option<String>,
    pub external_reference: Option<String>,

    /// Every pair as received; repeated keys become arrays
    pub raw: Map<String, Value>,
}

impl ReturnParams {
    /// Build from decoded query pairs
    ///
    /// Accepts `id_suscriptor` or `id`, `preapproval_id` or `preapproval`,
    /// and `status` or `collection_status`. The first spelling wins.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut raw = Map::new();
        for (key, value) in pairs {
            let value = Value::String(value.into());
            match raw.entry(key.into()) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(mut slot) => match slot.get_mut() {
                    Value::Array(values) => values.push(value),
                    existing => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    }
                },
            }
        }
        Self::from_raw(raw)
    }

    fn from_raw(raw: Map<String, Value>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter().find_map(|key| {
                let value = match raw.get(*key)? {
                    Value::Array(values) => values.first()?,
                    other => other,
                };
                value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
        };

        let subscriber_id = first(&["id_suscriptor", "id"]).and_then(SubscriberId::new);
        let preapproval_id = first(&["preapproval_id", "preapproval"]);
        let status = first(&["status", "collection_status"]);
        let payer_email = first(&["payer_email"]);
        let external_reference = first(&["external_reference"]);

        Self {
            subscriber_id,
            preapproval_id,
            status,
            payer_email,
            external_reference,
            raw,
        }
    }

    /// Normalized status: lowercase, trimmed, empty when absent
    pub fn normalized_status(&self) -> String {
        self.status
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default()
    }

    fn report(&self) -> Value {
        json!({
            "tipo": LOG_KIND,
            "message": "BackURL recibido en /gracias (página de USUARIO)",
            "params_crudos": self.raw,
            "campos": {
                "id_suscriptor": self.subscriber_id.as_ref().map(SubscriberId::as_str).unwrap_or_default(),
                "preapproval_id": self.preapproval_id.as_deref().unwrap_or_default(),
                "status": self.status.as_deref().unwrap_or_default(),
            },
        })
    }
}

/// Payment status as reported by the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Positive,
    Pending,
    /// No status on the return URL
    Unknown,
    Rejected,
}

impl PaymentStatus {
    pub fn classify(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "authorized" | "approved" | "success" | "active" => PaymentStatus::Positive,
            "pending" | "in_process" => PaymentStatus::Pending,
            "" => PaymentStatus::Unknown,
            _ => PaymentStatus::Rejected,
        }
    }

    /// Whether a stored preapproval status means the authorization went through
    fn confirms(stored: &str) -> bool {
        matches!(
            stored.trim().to_lowercase().as_str(),
            "authorized" | "approved" | "active"
        )
    }
}

/// Terminal state of the return page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnState {
    Ok,
    Warn,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnReason {
    MissingParameters,
    Activated,
    ActivationFailed,
    PaymentPending,
    StatusUnconfirmed,
    PaymentRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub estado: ReturnState,
    pub motivo: ReturnReason,

    /// Checkout link to resume a pending payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_url: Option<String>,
}

impl ReturnOutcome {
    fn new(estado: ReturnState, motivo: ReturnReason) -> Self {
        Self {
            estado,
            motivo,
            resume_url: None,
        }
    }

    /// Copy shown to the user for this outcome
    pub fn message(&self) -> &'static str {
        match self.motivo {
            ReturnReason::Activated => "¡Listo! Tu suscripción Premium ya está activa.",
            ReturnReason::ActivationFailed
            | ReturnReason::PaymentPending
            | ReturnReason::StatusUnconfirmed => {
                "Tu pago está siendo procesado. Te avisaremos por WhatsApp cuando se confirme."
            }
            ReturnReason::MissingParameters => {
                "No pudimos identificar tu suscripción. Volvé a intentar desde el checkout."
            }
            ReturnReason::PaymentRejected => {
                "El pago no se pudo completar. Podés intentarlo nuevamente."
            }
        }
    }
}

/// Settles a payment return into an outcome
pub struct ReturnHandler {
    activation: Arc<dyn ActivationService>,
    lookup: Arc<dyn PreapprovalLookup>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ReturnHandler {
    pub fn new(
        activation: Arc<dyn ActivationService>,
        lookup: Arc<dyn PreapprovalLookup>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            activation,
            lookup,
            sink,
        }
    }

    /// Must be called from within a tokio runtime
    pub async fn handle(&self, params: &ReturnParams) -> ReturnOutcome {
        let (Some(subscriber_id), Some(preapproval_id)) =
            (params.subscriber_id.as_ref(), params.preapproval_id.as_ref())
        else {
            tracing::warn!(params = ?params.raw, "Payment return without identifiers");
            return ReturnOutcome::new(ReturnState::Error, ReturnReason::MissingParameters);
        };

        self.spawn_log(params);

        let status = params.normalized_status();
        let outcome = match PaymentStatus::classify(&status) {
            PaymentStatus::Positive => self.activate(subscriber_id, preapproval_id, params).await,
            PaymentStatus::Pending => self.resume_pending(subscriber_id).await,
            PaymentStatus::Unknown => self.resolve_unknown(subscriber_id, preapproval_id, params).await,
            PaymentStatus::Rejected => {
                ReturnOutcome::new(ReturnState::Error, ReturnReason::PaymentRejected)
            }
        };

        tracing::info!(
            subscriber_id = %subscriber_id,
            status = %status,
            outcome = ?outcome.estado,
            "Payment return settled"
        );
        outcome
    }

    /// Pending payments are never activated; the stored link is best-effort
    async fn resume_pending(&self, subscriber_id: &SubscriberId) -> ReturnOutcome {
        let mut outcome = ReturnOutcome::new(ReturnState::Warn, ReturnReason::PaymentPending);
        match self.lookup.preapproval_status(subscriber_id).await {
            Ok(stored) => {
                outcome.resume_url = stored.init_point.filter(|url| !url.trim().is_empty());
            }
            Err(e) => {
                tracing::warn!(subscriber_id = %subscriber_id, error = %e, "Pending return without resume link");
            }
        }
        outcome
    }

    async fn resolve_unknown(
        &self,
        subscriber_id: &SubscriberId,
        preapproval_id: &str,
        params: &ReturnParams,
    ) -> ReturnOutcome {
        match self.lookup.preapproval_status(subscriber_id).await {
            Ok(stored) if stored.status.as_deref().is_some_and(PaymentStatus::confirms) => {
                self.activate(subscriber_id, preapproval_id, params).await
            }
            Ok(stored) => {
                tracing::info!(
                    subscriber_id = %subscriber_id,
                    stored_status = ?stored.status,
                    "Return without status and preapproval not confirmed"
                );
                ReturnOutcome::new(ReturnState::Warn, ReturnReason::StatusUnconfirmed)
            }
            Err(e) => {
                tracing::warn!(subscriber_id = %subscriber_id, error = %e, "Preapproval lookup failed");
                ReturnOutcome::new(ReturnState::Warn, ReturnReason::StatusUnconfirmed)
            }
        }
    }

    async fn activate(
        &self,
        subscriber_id: &SubscriberId,
        preapproval_id: &str,
        params: &ReturnParams,
    ) -> ReturnOutcome {
        let request = ActivationRequest {
            subscriber_id: subscriber_id.clone(),
            preapproval_id: preapproval_id.to_string(),
            collection_status: params.status.clone(),
            back_params: Some(Value::Object(params.raw.clone())),
        };

        match self.activation.activate(&request).await {
            Ok(reply) if reply.ok => {
                ReturnOutcome::new(ReturnState::Ok, ReturnReason::Activated)
            }
            Ok(reply) => {
                tracing::warn!(subscriber_id = %subscriber_id, error = ?reply.error, "Provisional activation refused");
                ReturnOutcome::new(ReturnState::Warn, ReturnReason::ActivationFailed)
            }
            Err(e) => {
                tracing::warn!(subscriber_id = %subscriber_id, error = %e, "Provisional activation failed");
                ReturnOutcome::new(ReturnState::Warn, ReturnReason::ActivationFailed)
            }
        }
    }

    fn spawn_log(&self, params: &ReturnParams) {
        let sink = Arc::clone(&self.sink);
        let entry = DiagnosticEntry::new("backurl_mercadopago", "PARAMS", params.report())
            .created_by("front");
        tokio::spawn(async move {
            if let Err(e) = sink.record(entry).await {
                tracing::debug!(error = %e, "Return diagnostic not recorded");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FunnelError, Result};
    use crate::service::{ActivationReply, PreapprovalStatus, StatusSource};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakeActivation {
        reply: Mutex<Option<Result<ActivationReply>>>,
        calls: AtomicUsize,
        last: Mutex<Option<ActivationRequest>>,
    }

    impl FakeActivation {
        fn answering(reply: Result<ActivationReply>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }

        fn ok() -> Arc<Self> {
            Self::answering(Ok(ActivationReply {
                ok: true,
                data: None,
                error: None,
            }))
        }
    }

    #[async_trait]
    impl ActivationService for FakeActivation {
        async fn activate(&self, request: &ActivationRequest) -> Result<ActivationReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(FunnelError::Transport("called twice".into())))
        }
    }

    struct FakeLookup {
        status: Option<String>,
        init_point: Option<String>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeLookup {
        fn with(status: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                status: status.map(str::to_string),
                init_point: None,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn with_link(status: &str, init_point: &str) -> Arc<Self> {
            Arc::new(Self {
                status: Some(status.to_string()),
                init_point: Some(init_point.to_string()),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                status: None,
                init_point: None,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PreapprovalLookup for FakeLookup {
        async fn preapproval_status(&self, _id: &SubscriberId) -> Result<PreapprovalStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FunnelError::Upstream {
                    status: 500,
                    body: json!({"ok": false}),
                });
            }
            Ok(PreapprovalStatus {
                exists: self.status.is_some(),
                preapproval_id: Some("pre-1".into()),
                status: self.status.clone(),
                init_point: self.init_point.clone(),
                source: Some(StatusSource::Db),
            })
        }
    }

    struct ChannelSink(mpsc::UnboundedSender<DiagnosticEntry>);

    #[async_trait]
    impl DiagnosticSink for ChannelSink {
        async fn record(&self, entry: DiagnosticEntry) -> Result<()> {
            let _ = self.0.send(entry);
            Ok(())
        }
    }

    /// Never completes; proves the outcome does not wait for the log
    struct StuckSink;

    #[async_trait]
    impl DiagnosticSink for StuckSink {
        async fn record(&self, _entry: DiagnosticEntry) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn handler(
        activation: Arc<FakeActivation>,
        lookup: Arc<FakeLookup>,
    ) -> (ReturnHandler, mpsc::UnboundedReceiver<DiagnosticEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ReturnHandler::new(activation, lookup, Arc::new(ChannelSink(tx))),
            rx,
        )
    }

    fn params(pairs: &[(&str, &str)]) -> ReturnParams {
        ReturnParams::from_query(pairs.iter().copied())
    }

    #[test]
    fn test_query_aliases() {
        let p = params(&[("id", "abc123"), ("preapproval", "pre-1"), ("collection_status", "approved")]);
        assert_eq!(p.subscriber_id.unwrap().as_str(), "abc123");
        assert_eq!(p.preapproval_id.as_deref(), Some("pre-1"));
        assert_eq!(p.status.as_deref(), Some("approved"));
    }

    #[test]
    fn test_repeated_keys_are_kept() {
        let p = params(&[("status", "approved"), ("status", "pending")]);
        assert_eq!(p.raw["status"], json!(["approved", "pending"]));
        assert_eq!(p.status.as_deref(), Some("approved"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(PaymentStatus::classify(" Approved "), PaymentStatus::Positive);
        assert_eq!(PaymentStatus::classify("in_process"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::classify(""), PaymentStatus::Unknown);
        assert_eq!(PaymentStatus::classify("rejected"), PaymentStatus::Rejected);
    }

    #[test]
    fn test_outcome_wire_format() {
        let mut outcome = ReturnOutcome::new(ReturnState::Warn, ReturnReason::PaymentPending);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"estado": "warn", "motivo": "payment_pending"})
        );

        outcome.resume_url = Some("https://mp.example/pay/abc".into());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"estado": "warn", "motivo": "payment_pending", "resume_url": "https://mp.example/pay/abc"})
        );
    }

    #[tokio::test]
    async fn test_approved_activates_once_and_succeeds() {
        let activation = FakeActivation::ok();
        let lookup = FakeLookup::with(None);
        let (handler, mut logs) = handler(activation.clone(), lookup.clone());

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "approved")]))
            .await;

        assert_eq!(outcome.estado, ReturnState::Ok);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);

        let sent = activation.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.preapproval_id, "pre-1");
        assert_eq!(sent.collection_status.as_deref(), Some("approved"));

        let entry = tokio::time::timeout(Duration::from_secs(1), logs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.detail["tipo"], LOG_KIND);
        assert_eq!(entry.detail["campos"]["id_suscriptor"], "abc123");
    }

    #[tokio::test]
    async fn test_activation_refusal_is_a_warning() {
        let activation = FakeActivation::answering(Ok(ActivationReply {
            ok: false,
            data: None,
            error: Some("Error en Supabase".into()),
        }));
        let (handler, _logs) = handler(activation.clone(), FakeLookup::with(None));

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "authorized")]))
            .await;
        assert_eq!(outcome.estado, ReturnState::Warn);
        assert_eq!(outcome.motivo, ReturnReason::ActivationFailed);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activation_transport_error_is_a_warning() {
        let activation = FakeActivation::answering(Err(FunnelError::Transport("reset".into())));
        let (handler, _logs) = handler(activation.clone(), FakeLookup::with(None));

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "success")]))
            .await;
        assert_eq!(outcome.estado, ReturnState::Warn);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_never_activates() {
        let activation = FakeActivation::ok();
        let (handler, _logs) = handler(activation.clone(), FakeLookup::with(None));

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "pending")]))
            .await;
        assert_eq!(outcome, ReturnOutcome::new(ReturnState::Warn, ReturnReason::PaymentPending));
        assert_eq!(activation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pending_offers_stored_checkout_link() {
        let activation = FakeActivation::ok();
        let lookup = FakeLookup::with_link("pending", "https://mp.example/pay/abc");
        let (handler, _logs) = handler(activation.clone(), lookup.clone());

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "in_process")]))
            .await;
        assert_eq!(outcome.estado, ReturnState::Warn);
        assert_eq!(outcome.motivo, ReturnReason::PaymentPending);
        assert_eq!(outcome.resume_url.as_deref(), Some("https://mp.example/pay/abc"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pending_lookup_failure_still_warns() {
        let activation = FakeActivation::ok();
        let (handler, _logs) = handler(activation.clone(), FakeLookup::failing());

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "pending")]))
            .await;
        assert_eq!(outcome, ReturnOutcome::new(ReturnState::Warn, ReturnReason::PaymentPending));
        assert_eq!(activation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_ids_make_no_calls() {
        let activation = FakeActivation::ok();
        let lookup = FakeLookup::with(Some("authorized"));
        let (handler, mut logs) = handler(activation.clone(), lookup.clone());

        let outcome = handler
            .handle(&params(&[("preapproval_id", "pre-1"), ("status", "approved")]))
            .await;
        assert_eq!(outcome.estado, ReturnState::Error);
        assert_eq!(outcome.motivo, ReturnReason::MissingParameters);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
        drop(handler);
        assert!(logs.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_is_an_error() {
        let activation = FakeActivation::ok();
        let (handler, _logs) = handler(activation.clone(), FakeLookup::with(None));

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "rejected")]))
            .await;
        assert_eq!(outcome.estado, ReturnState::Error);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_status_checks_stored_preapproval() {
        let activation = FakeActivation::ok();
        let lookup = FakeLookup::with(Some("authorized"));
        let (handler, _logs) = handler(activation.clone(), lookup.clone());

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1")]))
            .await;
        assert_eq!(outcome.estado, ReturnState::Ok);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_status_without_confirmation_warns() {
        let activation = FakeActivation::ok();
        let lookup = FakeLookup::with(Some("pending"));
        let (handler, _logs) = handler(activation.clone(), lookup);

        let outcome = handler
            .handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "  ")]))
            .await;
        assert_eq!(outcome.motivo, ReturnReason::StatusUnconfirmed);
        assert_eq!(activation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_outcome_does_not_wait_for_log() {
        let activation = FakeActivation::ok();
        let handler = ReturnHandler::new(activation, FakeLookup::with(None), Arc::new(StuckSink));

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            handler.handle(&params(&[("id_suscriptor", "abc123"), ("preapproval_id", "pre-1"), ("status", "approved")])),
        )
        .await
        .unwrap();
        assert_eq!(outcome.estado, ReturnState::Ok);
    }
}
