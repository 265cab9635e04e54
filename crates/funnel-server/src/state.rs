//! Application state shared across handlers

use std::sync::Arc;

use funnel_core::{
    ActivationService, CheckoutOrchestrator, CheckoutStore, DiagnosticSink, PreapprovalLookup,
    RegistrationService, Result, ReturnHandler, SubscriptionService,
};
use funnel_payments::{
    EdgeFunctionsClient, MercadoPagoClient, PreapprovalStatusService, ProvisionalActivator,
    SupabaseRest,
};

use crate::config::FunnelConfig;

/// Shared application state
///
/// Every client is optional: a route whose client is missing answers 500
/// with a configuration message instead of the server refusing to start.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FunnelConfig>,

    /// Registration and subscription Edge Functions (service credential)
    pub edge: Option<Arc<EdgeFunctionsClient>>,

    /// Public Edge Functions (no credential)
    pub public_edge: Option<Arc<EdgeFunctionsClient>>,

    /// Supabase tables
    pub rest: Option<Arc<SupabaseRest>>,

    /// Provisional activation and confirmation
    pub activator: Option<Arc<ProvisionalActivator>>,

    /// Preapproval lookup with Mercado Pago refresh
    pub preapproval: Option<Arc<PreapprovalStatusService>>,

    /// Whether a Mercado Pago token was supplied
    pub mercadopago_configured: bool,
}

impl AppState {
    /// Build every client the configuration allows
    pub fn from_config(config: FunnelConfig) -> Result<Self> {
        let service_key = config.service_key.as_deref();

        let edge = match (config.edge_base.as_deref(), service_key) {
            (Some(base), Some(key)) => Some(Arc::new(EdgeFunctionsClient::new(base, key)?)),
            _ => None,
        };
        let public_edge = match config.edge_base.as_deref() {
            Some(base) => Some(Arc::new(EdgeFunctionsClient::public(base)?)),
            None => None,
        };
        let rest = match (config.supabase_url.as_deref(), service_key) {
            (Some(url), Some(key)) => Some(Arc::new(SupabaseRest::new(url, key)?)),
            _ => None,
        };
        let mercadopago = match config.mercadopago_token.as_deref() {
            Some(token) => Some(Arc::new(MercadoPagoClient::new(token)?)),
            None => None,
        };

        let activator = rest
            .as_ref()
            .map(|rest| Arc::new(ProvisionalActivator::new(Arc::clone(rest))));
        let preapproval = rest.as_ref().map(|rest| {
            Arc::new(PreapprovalStatusService::new(
                Arc::clone(rest),
                mercadopago.clone(),
            ))
        });

        Ok(Self {
            config: Arc::new(config),
            edge,
            public_edge,
            rest,
            activator,
            preapproval,
            mercadopago_configured: mercadopago.is_some(),
        })
    }

    pub fn supabase_configured(&self) -> bool {
        self.edge.is_some() && self.rest.is_some()
    }

    /// A fresh orchestrator for one server-side checkout attempt
    pub fn orchestrator(&self) -> Option<CheckoutOrchestrator> {
        let edge = self.edge.as_ref()?;
        let registration: Arc<dyn RegistrationService> = edge.clone();
        let subscription: Arc<dyn SubscriptionService> = edge.clone();
        Some(
            CheckoutOrchestrator::new(registration, subscription, CheckoutStore::in_memory())
                .with_plan(self.config.plan.clone())
                .with_retry(self.config.retry_policy()),
        )
    }

    /// Return handler running activation and lookup in-process
    pub fn return_handler(&self) -> Option<ReturnHandler> {
        let activation: Arc<dyn ActivationService> = self.activator.clone()?;
        let lookup: Arc<dyn PreapprovalLookup> = self.preapproval.clone()?;
        let sink: Arc<dyn DiagnosticSink> = self.rest.clone()?;
        Some(ReturnHandler::new(activation, lookup, sink))
    }
}
