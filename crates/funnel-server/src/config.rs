//! Server configuration from the environment

use std::str::FromStr;

use funnel_core::lead::DEFAULT_POLICY_VERSION;
use funnel_core::{Currency, FunnelError, Plan, Result, RetryPolicy};
use rust_decimal::Decimal;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Everything the server reads from the environment
///
/// Absent Supabase or Mercado Pago settings do not stop the server; the
/// routes that need them answer 500 instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunnelConfig {
    /// Supabase project root, e.g. `https://ref.supabase.co`
    pub supabase_url: Option<String>,

    /// Service-role key; never leaves the server
    pub service_key: Option<String>,

    /// Edge Functions root, e.g. `https://ref.supabase.co/functions/v1`
    pub edge_base: Option<String>,

    pub mercadopago_token: Option<String>,
    pub bind_addr: String,
    pub plan: Plan,
    pub policy_version: String,
    pub max_retries: usize,
}

impl FunnelConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`; blank values count as absent
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let supabase_url = var("SUPABASE_URL")
            .or_else(|| var("NEXT_PUBLIC_SUPABASE_URL"))
            .map(|url| url.trim_end_matches('/').to_string());
        let edge_base = var("NEXT_PUBLIC_EDGE_BASE")
            .map(|url| url.trim_end_matches('/').to_string())
            .or_else(|| supabase_url.as_ref().map(|url| format!("{url}/functions/v1")));

        let amount = match var("PLAN_AMOUNT") {
            Some(raw) => Decimal::from_str(&raw)
                .map_err(|e| FunnelError::Config(format!("PLAN_AMOUNT={raw}: {e}")))?,
            None => Plan::premium_monthly().amount,
        };
        let currency = match var("PLAN_CURRENCY") {
            Some(raw) => Currency::from_str(&raw)
                .map_err(|e| FunnelError::Config(format!("PLAN_CURRENCY={raw}: {}", e.message)))?,
            None => Currency::Uyu,
        };
        let plan = Plan::new(amount, currency)
            .map_err(|e| FunnelError::Config(format!("plan: {}", e.message)))?;

        let max_retries = match var("CHECKOUT_MAX_RETRIES") {
            Some(raw) => raw
                .parse()
                .map_err(|e| FunnelError::Config(format!("CHECKOUT_MAX_RETRIES={raw}: {e}")))?,
            None => RetryPolicy::default().max_retries,
        };

        Ok(Self {
            supabase_url,
            service_key: var("SUPABASE_SERVICE_ROLE_KEY"),
            edge_base,
            mercadopago_token: var("MERCADOPAGO_ACCESS_TOKEN"),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            plan,
            policy_version: var("POLICY_VERSION").unwrap_or_else(|| DEFAULT_POLICY_VERSION.into()),
            max_retries,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_retries(self.max_retries)
    }
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            service_key: None,
            edge_base: None,
            mercadopago_token: None,
            bind_addr: DEFAULT_BIND_ADDR.into(),
            plan: Plan::default(),
            policy_version: DEFAULT_POLICY_VERSION.into(),
            max_retries: RetryPolicy::default().max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<FunnelConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FunnelConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, FunnelConfig::default());
        assert_eq!(config.plan.amount, dec!(390));
        assert_eq!(config.edge_base, None);
    }

    #[test]
    fn test_edge_base_derived_from_project_url() {
        let config = load(&[("NEXT_PUBLIC_SUPABASE_URL", "https://ref.supabase.co/")]).unwrap();
        assert_eq!(config.supabase_url.as_deref(), Some("https://ref.supabase.co"));
        assert_eq!(config.edge_base.as_deref(), Some("https://ref.supabase.co/functions/v1"));

        let config = load(&[
            ("SUPABASE_URL", "https://ref.supabase.co"),
            ("NEXT_PUBLIC_EDGE_BASE", "https://edge.example/v1/"),
        ])
        .unwrap();
        assert_eq!(config.edge_base.as_deref(), Some("https://edge.example/v1"));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let config = load(&[("SUPABASE_SERVICE_ROLE_KEY", "  "), ("BIND_ADDR", "")]).unwrap();
        assert_eq!(config.service_key, None);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_plan_overrides() {
        let config = load(&[("PLAN_AMOUNT", "12.5"), ("PLAN_CURRENCY", "usd")]).unwrap();
        assert_eq!(config.plan.amount, dec!(12.5));
        assert_eq!(config.plan.currency, Currency::Usd);

        assert!(matches!(load(&[("PLAN_AMOUNT", "gratis")]), Err(FunnelError::Config(_))));
        assert!(matches!(load(&[("PLAN_AMOUNT", "0")]), Err(FunnelError::Config(_))));
        assert!(matches!(load(&[("CHECKOUT_MAX_RETRIES", "-1")]), Err(FunnelError::Config(_))));
    }
}
