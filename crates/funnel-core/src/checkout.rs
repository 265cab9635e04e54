//! Checkout Orchestration
//!
//! Sequences registration, subscription creation and the hand-off to the
//! payment provider's page:
//!
//! ```text
//! Idle ─▶ Validating ─▶ Registering ─▶ Subscribing ─▶ Redirecting(url)
//!             │              │              │
//!             ▼              ▼              ▼
//!       Failed(validation) Failed(duplicate | registration) Failed(subscription)
//! ```
//!
//! Registration must yield a subscriber identifier before the subscription
//! call is attempted. Nothing is retried except transient upstream failures
//! (see [`RetryPolicy`]).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{FunnelError, Result};
use crate::lead::{ConsentMetadata, Lead, LeadForm, SubscriberId};
use crate::plan::Plan;
use crate::retry::RetryPolicy;
use crate::service::{
    RegistrationRequest, RegistrationService, SubscriptionRequest, SubscriptionService,
};
use crate::session::{CheckoutSnapshot, CheckoutStore};

/// Domain used for the placeholder email the payment provider requires
pub const SYNTHETIC_EMAIL_DOMAIN: &str = "tuhoroscopocosmico.com";

/// Why a checkout attempt stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutErrorKind {
    Validation,
    Duplicate,
    Registration,
    Subscription,
}

impl fmt::Display for CheckoutErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckoutErrorKind::Validation => "validation",
            CheckoutErrorKind::Duplicate => "duplicate",
            CheckoutErrorKind::Registration => "registration",
            CheckoutErrorKind::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

/// Where a checkout attempt currently is
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CheckoutPhase {
    #[default]
    Idle,
    Validating,
    Registering,
    Subscribing,
    /// Terminal for this page: the browser leaves for the payment provider
    Redirecting { url: String },
    Failed {
        kind: CheckoutErrorKind,
        message: String,
    },
}

impl CheckoutPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutPhase::Redirecting { .. } | CheckoutPhase::Failed { .. }
        )
    }
}

/// A failed checkout attempt: what stage failed and the underlying error
#[derive(Debug)]
pub struct CheckoutError {
    pub kind: CheckoutErrorKind,
    pub source: FunnelError,
}

impl CheckoutError {
    fn new(kind: CheckoutErrorKind, source: FunnelError) -> Self {
        Self { kind, source }
    }

    /// Message to show inline on the form
    pub fn user_message(&self) -> String {
        match self.kind {
            CheckoutErrorKind::Validation | CheckoutErrorKind::Duplicate => {
                self.source.user_message()
            }
            CheckoutErrorKind::Registration => {
                "No se pudo registrar el usuario. Intenta nuevamente.".into()
            }
            CheckoutErrorKind::Subscription => {
                "Hubo un problema al conectar con el proveedor de pagos. Por favor, intenta de nuevo en unos momentos.".into()
            }
        }
    }
}

impl fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.kind, self.source)
    }
}

impl std::error::Error for CheckoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Instruction to send the browser to the payment provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub init_point: String,
    pub subscriber_id: SubscriberId,
    pub preapproval_id: Option<String>,
}

/// Drives one lead from form submission to the payment redirect
pub struct CheckoutOrchestrator {
    registration: Arc<dyn RegistrationService>,
    subscription: Arc<dyn SubscriptionService>,
    store: CheckoutStore,
    plan: Plan,
    retry: RetryPolicy,
}

impl CheckoutOrchestrator {
    pub fn new(
        registration: Arc<dyn RegistrationService>,
        subscription: Arc<dyn SubscriptionService>,
        store: CheckoutStore,
    ) -> Self {
        Self {
            registration,
            subscription,
            store,
            plan: Plan::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The store this orchestrator writes to
    pub fn store(&self) -> &CheckoutStore {
        &self.store
    }

    /// Run a checkout attempt for `form`
    ///
    /// `consent` is supplied when running server-side, where the caller's IP
    /// and user agent are known.
    pub async fn submit(
        &self,
        form: &LeadForm,
        consent: Option<ConsentMetadata>,
    ) -> std::result::Result<Redirect, CheckoutError> {
        let attempt = Uuid::new_v4();
        let span = tracing::info_span!("checkout", %attempt);
        self.run(form, consent).instrument(span).await
    }

    async fn run(
        &self,
        form: &LeadForm,
        consent: Option<ConsentMetadata>,
    ) -> std::result::Result<Redirect, CheckoutError> {
        self.store.set_phase(CheckoutPhase::Validating);
        let lead = form
            .validate()
            .map_err(|errors| self.fail(CheckoutErrorKind::Validation, errors.into()))?;

        self.store.replace_snapshot(CheckoutSnapshot::draft(&lead));
        self.store.set_phase(CheckoutPhase::Registering);

        let mut request = RegistrationRequest::new(lead.clone());
        request.consent = consent;
        let subscriber_id = self.register(&request).await?;

        self.store.set_phase(CheckoutPhase::Subscribing);
        let subscription = self.subscription_request(&lead, subscriber_id.clone());
        let link = self
            .retry
            .run("create_subscription", || {
                self.subscription.create_subscription(&subscription)
            })
            .await
            .map_err(|e| self.fail(CheckoutErrorKind::Subscription, e))?;

        let Some(init_point) = link.init_point else {
            tracing::error!(body = %link.body, "Subscription answered without init_point");
            return Err(self.fail(
                CheckoutErrorKind::Subscription,
                FunnelError::MissingInitPoint,
            ));
        };

        tracing::info!(subscriber_id = %subscriber_id, "Redirecting to payment provider");
        self.store.set_phase(CheckoutPhase::Redirecting {
            url: init_point.clone(),
        });

        Ok(Redirect {
            init_point,
            subscriber_id,
            preapproval_id: link.preapproval_id,
        })
    }

    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> std::result::Result<SubscriberId, CheckoutError> {
        let outcome = self
            .retry
            .run("register", || self.registration.register(request))
            .await;

        let registration = match outcome {
            Ok(registration) => registration,
            Err(FunnelError::Duplicate { message, body }) => {
                self.store.update_snapshot(|s| {
                    s.resultado = Some("duplicado".into());
                    s.mensaje = Some(message.clone());
                });
                return Err(self.fail(
                    CheckoutErrorKind::Duplicate,
                    FunnelError::Duplicate { message, body },
                ));
            }
            Err(e) => {
                let detail = e.to_string();
                self.store.update_snapshot(|s| s.error_backend = Some(detail));
                return Err(self.fail(CheckoutErrorKind::Registration, e));
            }
        };

        if registration.is_duplicate() {
            let message = registration.mensaje.clone().unwrap_or_default();
            self.store.update_snapshot(|s| {
                s.resultado = registration.resultado.clone();
                s.mensaje = registration.mensaje.clone();
            });
            return Err(self.fail(
                CheckoutErrorKind::Duplicate,
                FunnelError::Duplicate {
                    message,
                    body: registration.body,
                },
            ));
        }

        let Some(subscriber_id) = registration.subscriber_id.clone() else {
            tracing::error!(body = %registration.body, "Registration answered without id_suscriptor");
            self.store
                .update_snapshot(|s| s.error_backend = Some("Alta OK, pero ID no recibido.".into()));
            return Err(self.fail(
                CheckoutErrorKind::Registration,
                FunnelError::MissingSubscriberId,
            ));
        };

        tracing::info!(subscriber_id = %subscriber_id, "Lead registered");
        self.store.update_snapshot(|s| {
            s.id_suscriptor = Some(subscriber_id.clone());
            s.resultado = registration.resultado.clone();
            s.mensaje = registration.mensaje.clone();
            s.error_backend = None;
        });

        Ok(subscriber_id)
    }

    fn subscription_request(&self, lead: &Lead, subscriber_id: SubscriberId) -> SubscriptionRequest {
        let whatsapp = lead.phone.e164();
        let email = lead
            .email
            .clone()
            .unwrap_or_else(|| synthetic_email(&whatsapp));

        SubscriptionRequest {
            name: Some(lead.name.clone()),
            phone: Some(lead.phone.national().to_string()),
            sign: Some(lead.sign),
            content: Some(lead.content),
            email: Some(email),
            reason: Some(self.plan.reason_for(&lead.name)),
            whatsapp: Some(whatsapp),
            ..SubscriptionRequest::new(subscriber_id, self.plan.clone())
        }
    }

    fn fail(&self, kind: CheckoutErrorKind, source: FunnelError) -> CheckoutError {
        match kind {
            CheckoutErrorKind::Validation | CheckoutErrorKind::Duplicate => {
                tracing::info!(kind = %kind, error = %source, "Checkout stopped");
            }
            _ => tracing::error!(kind = %kind, error = %source, "Checkout failed"),
        }
        let error = CheckoutError::new(kind, source);
        self.store.set_phase(CheckoutPhase::Failed {
            kind,
            message: error.user_message(),
        });
        error
    }
}

/// Placeholder email for subscribers who gave none
pub fn synthetic_email(whatsapp: &str) -> String {
    format!("user_{whatsapp}@{SYNTHETIC_EMAIL_DOMAIN}")
}
