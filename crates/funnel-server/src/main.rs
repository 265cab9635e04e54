//! Subscription funnel HTTP server
//!
//! Serves the registration, checkout and payment-return API in front of
//! Supabase Edge Functions and Mercado Pago.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use funnel_server::{AppState, FunnelConfig, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = FunnelConfig::from_env()?;

    tracing::info!(
        "Plan: {} {} / mes (política {})",
        config.plan.amount,
        config.plan.currency,
        config.policy_version
    );

    let state = AppState::from_config(config)?;

    if state.supabase_configured() {
        tracing::info!("✓ Supabase configured");
    } else {
        tracing::warn!("⚠ Supabase not configured - registration and checkout disabled");
        tracing::warn!("  Set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY in .env");
    }
    if state.mercadopago_configured {
        tracing::info!("✓ Mercado Pago configured");
    } else {
        tracing::warn!("⚠ Mercado Pago not configured - payment links will not be refreshed");
        tracing::warn!("  Set MERCADOPAGO_ACCESS_TOKEN in .env");
    }

    let addr = state.config.bind_addr.clone();
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 funnel server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                         - Health check");
    tracing::info!("  POST /api/alta-suscriptor            - Register lead");
    tracing::info!("  POST /api/crear-suscripcion          - Create Mercado Pago preapproval");
    tracing::info!("  POST /api/iniciar-checkout           - Register and get payment link");
    tracing::info!("  POST /api/crear-pago-inicial         - One-time payment");
    tracing::info!("  POST /api/update-suscriptor          - Update subscriber fields");
    tracing::info!("  GET  /gracias                        - Settle payment return");
    tracing::info!("  POST /api/activar-premium-provisorio - Provisional activation");
    tracing::info!("  POST /api/confirmar-suscripcion      - Confirm preapproval status");
    tracing::info!("  GET  /api/preapproval-status         - Preapproval lookup");
    tracing::info!("  POST /api/log-backurl                - Return diagnostics");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
