//! Supabase REST Client
//!
//! Direct table access with the service-role key: the subscriber record,
//! the payments table and the function log.

use async_trait::async_trait;
use funnel_core::{DiagnosticEntry, DiagnosticSink, FunnelError, Result, SubscriberId};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{UpstreamResponse, transport};

const SUBSCRIBERS: &str = "suscriptores";
const PAYMENTS: &str = "pagos";
const FUNCTION_LOG: &str = "log_funciones";

/// Preapproval columns of a subscriber record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreapprovalRow {
    #[serde(default)]
    pub preapproval_id: Option<String>,

    #[serde(default)]
    pub preapproval_status: Option<String>,

    #[serde(default)]
    pub preapproval_init_point: Option<String>,
}

/// Client for `{SUPABASE_URL}/rest/v1`
pub struct SupabaseRest {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl SupabaseRest {
    /// `project_url` is the project root, e.g. `https://ref.supabase.co`
    pub fn new(project_url: &str, service_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: crate::http_client()?,
            base_url: format!("{}/rest/v1", crate::trim_base(project_url)),
            service_key: service_key.into(),
        })
    }

    fn table(&self, table: &str) -> String {
        format!("{}/{table}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(request: RequestBuilder) -> Result<UpstreamResponse> {
        let response = request.send().await.map_err(transport)?;
        UpstreamResponse::read(response).await
    }

    /// Patch the subscriber record and return the updated rows
    pub async fn patch_subscriber(&self, id: &SubscriberId, patch: &Value) -> Result<Value> {
        let request = self
            .authorized(self.http.patch(self.table(SUBSCRIBERS)))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(patch);
        let upstream = Self::send(request).await?;
        if !upstream.is_success() {
            return Err(upstream.into_error());
        }
        // An empty representation is still a successful patch
        Ok(upstream.json().unwrap_or(Value::Array(Vec::new())))
    }

    /// Preapproval columns of one subscriber, `None` when the record is absent
    pub async fn preapproval_row(&self, id: &SubscriberId) -> Result<Option<PreapprovalRow>> {
        let request = self
            .authorized(self.http.get(self.table(SUBSCRIBERS)))
            .query(&[
                ("select", "preapproval_id,preapproval_status,preapproval_init_point".to_string()),
                ("id", format!("eq.{id}")),
            ]);
        let body = Self::send(request).await?.into_json()?;
        let mut rows: Vec<PreapprovalRow> = serde_json::from_value(body)
            .map_err(|e| FunnelError::Malformed(format!("suscriptores row: {e}")))?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    /// Patch payment rows created for a preapproval
    pub async fn patch_payments(&self, preference_id: &str, patch: &Value) -> Result<()> {
        let request = self
            .authorized(self.http.patch(self.table(PAYMENTS)))
            .query(&[("preference_id", format!("eq.{preference_id}"))])
            .json(patch);
        let upstream = Self::send(request).await?;
        if upstream.is_success() {
            Ok(())
        } else {
            Err(upstream.into_error())
        }
    }

    /// Append one row to the function log
    pub async fn insert_log(&self, entry: &DiagnosticEntry) -> Result<()> {
        let request = self
            .authorized(self.http.post(self.table(FUNCTION_LOG)))
            .json(&[entry]);
        let upstream = Self::send(request).await?;
        if upstream.is_success() {
            Ok(())
        } else {
            Err(upstream.into_error())
        }
    }
}

#[async_trait]
impl DiagnosticSink for SupabaseRest {
    async fn record(&self, entry: DiagnosticEntry) -> Result<()> {
        self.insert_log(&entry).await
    }
}
