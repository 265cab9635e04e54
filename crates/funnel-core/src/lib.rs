//! # funnel-core
//!
//! Domain of the premium subscription funnel: lead capture, phone
//! normalization, checkout orchestration and payment return handling.
//!
//! ## Flow
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ LeadForm  │──▶│ Registration │──▶│ Subscription │──▶│ payment provider │
//! │ validate  │   │ (id_susc.)   │   │ (init_point) │   │      page        │
//! └───────────┘   └──────────────┘   └──────────────┘   └────────┬─────────┘
//!                        CheckoutOrchestrator                    │ back URL
//!                                                                ▼
//!                                   ┌──────────────────────────────────────┐
//!                                   │ ReturnHandler: ok | warn | error     │
//!                                   │ (provisional activation, diag. log)  │
//!                                   └──────────────────────────────────────┘
//! ```
//!
//! Remote collaborators sit behind the traits in [`service`], so the same
//! orchestration runs against real HTTP clients or in-memory fakes.

pub mod back_url;
pub mod checkout;
pub mod error;
pub mod lead;
pub mod phone;
pub mod plan;
pub mod retry;
pub mod service;
pub mod session;

pub use back_url::{PaymentStatus, ReturnHandler, ReturnOutcome, ReturnParams, ReturnReason, ReturnState};
pub use checkout::{CheckoutError, CheckoutErrorKind, CheckoutOrchestrator, CheckoutPhase, Redirect};
pub use error::{Field, FieldErrors, FunnelError, Result, ValidationError};
pub use lead::{ConsentMetadata, ContentPreference, Lead, LeadForm, SubscriberId, ZodiacSign};
pub use phone::PhoneNumber;
pub use plan::{Currency, Plan, parse_amount};
pub use retry::RetryPolicy;
pub use service::{
    ActivationReply, ActivationRequest, ActivationService, DiagnosticEntry, DiagnosticSink,
    PreapprovalLookup, PreapprovalStatus, Registration, RegistrationRequest, RegistrationService,
    StatusSource, SubscriptionLink, SubscriptionRequest, SubscriptionService,
};
pub use session::{CheckoutReader, CheckoutSnapshot, CheckoutStore, MemorySessionStorage, SessionStorage};
