//! Preapproval Status Lookup
//!
//! Reads the preapproval stored on the subscriber record. When the payment
//! link was never stored, it is fetched again from Mercado Pago and written
//! back to `suscriptores` and `pagos`.

use std::sync::Arc;

use async_trait::async_trait;
use funnel_core::{
    DiagnosticEntry, DiagnosticSink, PreapprovalLookup, PreapprovalStatus, Result, StatusSource,
    SubscriberId,
};
use serde_json::json;

use crate::mercadopago::MercadoPagoClient;
use crate::rest::SupabaseRest;

const FUNCTION_NAME: &str = "api_preapproval_status";

pub struct PreapprovalStatusService {
    rest: Arc<SupabaseRest>,
    mercadopago: Option<Arc<MercadoPagoClient>>,
}

impl PreapprovalStatusService {
    /// Without a Mercado Pago client, stored values are returned as they are
    pub fn new(rest: Arc<SupabaseRest>, mercadopago: Option<Arc<MercadoPagoClient>>) -> Self {
        Self { rest, mercadopago }
    }

    fn spawn_log(&self, outcome: &'static str, detail: serde_json::Value) {
        let rest = Arc::clone(&self.rest);
        tokio::spawn(async move {
            let entry = DiagnosticEntry::new(FUNCTION_NAME, outcome, detail);
            if let Err(e) = rest.record(entry).await {
                tracing::debug!(error = %e, "Preapproval log not recorded");
            }
        });
    }

    /// Store a refreshed link; failures only cost a future refresh
    async fn write_back(
        &self,
        subscriber_id: &SubscriberId,
        preapproval_id: &str,
        init_point: Option<&str>,
        status: Option<&str>,
    ) {
        let subscriber = json!({
            "preapproval_init_point": init_point,
            "preapproval_status": status,
        });
        if let Err(e) = self.rest.patch_subscriber(subscriber_id, &subscriber).await {
            tracing::warn!(subscriber_id = %subscriber_id, error = %e, "Could not store refreshed preapproval");
            return;
        }

        let payment = json!({ "link_pago": init_point, "status": status });
        if let Err(e) = self.rest.patch_payments(preapproval_id, &payment).await {
            tracing::warn!(preapproval_id, error = %e, "Could not update payment row");
            return;
        }

        self.spawn_log(
            "PREAPPROVAL_REFRESHED_FROM_MP",
            json!({ "id": subscriber_id, "preapproval_id": preapproval_id }),
        );
    }
}

#[async_trait]
impl PreapprovalLookup for PreapprovalStatusService {
    async fn preapproval_status(&self, subscriber_id: &SubscriberId) -> Result<PreapprovalStatus> {
        self.spawn_log("PREAPPROVAL_POLL_HIT", json!({ "id": subscriber_id }));

        let Some(row) = self.rest.preapproval_row(subscriber_id).await? else {
            return Ok(PreapprovalStatus::missing());
        };
        let Some(preapproval_id) = row.preapproval_id.filter(|id| !id.trim().is_empty()) else {
            return Ok(PreapprovalStatus::missing());
        };

        let mut status = PreapprovalStatus {
            exists: true,
            preapproval_id: Some(preapproval_id.clone()),
            status: row.preapproval_status,
            init_point: row.preapproval_init_point.filter(|url| !url.trim().is_empty()),
            source: Some(StatusSource::Db),
        };

        if status.init_point.is_some() {
            return Ok(status);
        }
        let Some(mercadopago) = &self.mercadopago else {
            return Ok(status);
        };

        match mercadopago.get_preapproval(&preapproval_id).await {
            Ok(remote) => {
                status.init_point = remote.payment_url().map(str::to_string);
                status.status = remote.status.or(status.status);
                status.source = Some(StatusSource::Refresh);
                self.write_back(
                    subscriber_id,
                    &preapproval_id,
                    status.init_point.as_deref(),
                    status.status.as_deref(),
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(preapproval_id = %preapproval_id, error = %e, "Preapproval refresh failed");
            }
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Store {
        row: Arc<Mutex<Option<Value>>>,
        patches: Arc<Mutex<Vec<(String, Value)>>>,
    }

    async fn select(State(store): State<Store>) -> Json<Value> {
        let row = store.row.lock().unwrap().clone();
        Json(row.map_or_else(|| json!([]), |r| json!([r])))
    }

    async fn patch_table(
        table: &'static str,
        store: Store,
        body: Value,
    ) -> StatusCode {
        store.patches.lock().unwrap().push((table.to_string(), body));
        StatusCode::NO_CONTENT
    }

    async fn stubbed(row: Option<Value>, with_mercadopago: bool) -> (PreapprovalStatusService, Store) {
        let store = Store {
            row: Arc::new(Mutex::new(row)),
            ..Default::default()
        };
        let router = Router::new()
            .route(
                "/rest/v1/suscriptores",
                get(select).patch(|State(store): State<Store>, Json(body): Json<Value>| {
                    patch_table("suscriptores", store, body)
                }),
            )
            .route(
                "/rest/v1/pagos",
                axum::routing::patch(
                    |State(store): State<Store>,
                     _query: Query<HashMap<String, String>>,
                     Json(body): Json<Value>| patch_table("pagos", store, body),
                ),
            )
            .route("/rest/v1/log_funciones", post(|| async { StatusCode::CREATED }))
            .route(
                "/preapproval/{id}",
                get(|| async {
                    Json(json!({
                        "id": "pre-1",
                        "status": "authorized",
                        "sandbox_init_point": "https://sandbox.mp/pay/pre-1",
                    }))
                }),
            )
            .with_state(store.clone());
        let base = stub::serve(router).await;

        let rest = Arc::new(SupabaseRest::new(&base, "srk-test").unwrap());
        let mercadopago = with_mercadopago
            .then(|| Arc::new(MercadoPagoClient::with_base_url(&base, "APP_USR-test").unwrap()));
        (PreapprovalStatusService::new(rest, mercadopago), store)
    }

    fn id() -> SubscriberId {
        SubscriberId::new("abc123").unwrap()
    }

    #[tokio::test]
    async fn test_no_preapproval_means_missing() {
        let (service, _) = stubbed(Some(json!({"preapproval_id": null})), true).await;
        let status = service.preapproval_status(&id()).await.unwrap();
        assert!(!status.exists);
        assert_eq!(status, PreapprovalStatus::missing());
    }

    #[tokio::test]
    async fn test_stored_link_is_served_from_db() {
        let (service, store) = stubbed(
            Some(json!({
                "preapproval_id": "pre-1",
                "preapproval_status": "pending",
                "preapproval_init_point": "https://mp.example/pay/pre-1",
            })),
            true,
        )
        .await;

        let status = service.preapproval_status(&id()).await.unwrap();
        assert_eq!(status.source, Some(StatusSource::Db));
        assert_eq!(status.init_point.as_deref(), Some("https://mp.example/pay/pre-1"));
        assert!(store.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_link_is_refreshed_and_written_back() {
        let (service, store) = stubbed(
            Some(json!({"preapproval_id": "pre-1", "preapproval_status": "pending"})),
            true,
        )
        .await;

        let status = service.preapproval_status(&id()).await.unwrap();
        assert_eq!(status.source, Some(StatusSource::Refresh));
        assert_eq!(status.status.as_deref(), Some("authorized"));
        assert_eq!(status.init_point.as_deref(), Some("https://sandbox.mp/pay/pre-1"));

        let patches = store.patches.lock().unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].0, "suscriptores");
        assert_eq!(patches[0].1["preapproval_init_point"], "https://sandbox.mp/pay/pre-1");
        assert_eq!(patches[1].0, "pagos");
        assert_eq!(patches[1].1["link_pago"], "https://sandbox.mp/pay/pre-1");
    }

    #[tokio::test]
    async fn test_without_mercadopago_db_values_are_kept() {
        let (service, _) = stubbed(
            Some(json!({"preapproval_id": "pre-1", "preapproval_status": "pending"})),
            false,
        )
        .await;

        let status = service.preapproval_status(&id()).await.unwrap();
        assert!(status.exists);
        assert_eq!(status.source, Some(StatusSource::Db));
        assert_eq!(status.init_point, None);
    }
}
