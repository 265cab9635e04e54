//! # funnel-server
//!
//! Axum service in front of the subscription funnel. Browser-facing routes
//! validate input, attach server-side consent metadata and the service
//! credential, and forward to Supabase and Mercado Pago.

pub mod config;
pub mod consent;
pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::FunnelConfig;
pub use state::AppState;

use crate::handlers::{
    activate_provisional, checkout_online, confirm_subscription, create_initial_payment,
    create_subscription, health_check, log_backurl, payment_return, preapproval_status,
    register_subscriber, registration_online, start_checkout, update_subscriber,
};

/// Every route with CORS and request tracing applied
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Lead capture and checkout
        .route("/api/alta-suscriptor", post(register_subscriber).get(registration_online))
        .route("/api/crear-suscripcion", post(create_subscription))
        .route("/api/iniciar-checkout", post(start_checkout).get(checkout_online))
        .route("/api/crear-pago-inicial", post(create_initial_payment))
        .route("/api/update-suscriptor", post(update_subscriber))

        // Payment return
        .route("/gracias", get(payment_return))
        .route("/api/activar-premium-provisorio", post(activate_provisional))
        .route("/api/confirmar-suscripcion", post(confirm_subscription))
        .route("/api/preapproval-status", get(preapproval_status))
        .route("/api/log-backurl", post(log_backurl))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
