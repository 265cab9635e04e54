//! # funnel-payments
//!
//! HTTP clients for everything the funnel does not own.
//!
//! ```text
//! ┌──────────────────────┐   POST /functions/v1/ef_alta_suscriptor_premium
//! │ EdgeFunctionsClient  │──▶POST /functions/v1/ef_crear_suscripcion
//! │                      │   POST /functions/v1/ef_alta_pago_unico
//! └──────────────────────┘
//! ┌──────────────────────┐   PATCH /rest/v1/suscriptores?id=eq.{id}
//! │ SupabaseRest         │──▶GET   /rest/v1/suscriptores?select=...
//! │                      │   PATCH /rest/v1/pagos?preference_id=eq.{id}
//! │                      │   POST  /rest/v1/log_funciones
//! └──────────────────────┘
//! ┌──────────────────────┐
//! │ MercadoPagoClient    │──▶GET https://api.mercadopago.com/preapproval/{id}
//! └──────────────────────┘
//! ┌──────────────────────┐
//! │ FunnelApiClient      │──▶this service's own /api/* routes
//! └──────────────────────┘
//! ```
//!
//! [`ProvisionalActivator`] and [`PreapprovalStatusService`] combine these
//! into the activation and status-lookup services used by the return
//! handler.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use funnel_payments::{EdgeFunctionsClient, SupabaseRest};
//!
//! let edge = EdgeFunctionsClient::new("https://ref.supabase.co/functions/v1", service_key)?;
//! let rest = SupabaseRest::new("https://ref.supabase.co", service_key)?;
//! ```

use std::time::Duration;

use funnel_core::{FunnelError, Result};

mod activation;
mod api;
mod edge;
mod error;
mod mercadopago;
mod preapproval;
mod rest;

pub use activation::{ActivationPatch, ConfirmationPatch, ProvisionalActivator, provisional_expiry};
pub use api::FunnelApiClient;
pub use edge::{EdgeFunctionsClient, registration_payload, subscription_payload};
pub use mercadopago::{MercadoPagoClient, Preapproval};
pub use preapproval::PreapprovalStatusService;
pub use rest::{PreapprovalRow, SupabaseRest};

/// Per-request timeout for every upstream call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| FunnelError::Config(format!("HTTP client: {e}")))
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
pub(crate) mod stub {
    //! Local axum server standing in for the remote services

    use axum::Router;

    /// Serve `router` on an ephemeral port and return its base URL
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}
