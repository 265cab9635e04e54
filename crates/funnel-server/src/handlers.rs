//! HTTP request handlers

use std::collections::HashMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use funnel_core::{
    ActivationRequest, ActivationService, CheckoutError, CheckoutErrorKind, Currency,
    DiagnosticEntry, DiagnosticSink, FieldErrors, FunnelError, LeadForm, PhoneNumber, Plan,
    PreapprovalLookup, RegistrationRequest, RegistrationService, ReturnParams, SubscriberId,
    SubscriptionRequest, SubscriptionService, ValidationError, parse_amount,
};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::consent::consent_metadata;
use crate::error::ApiError;
use crate::state::AppState;

/// Fields the registration and checkout routes require, in reporting order
const REQUIRED_FIELDS: [&str; 5] =
    ["nombre", "telefono", "signo", "contenido_preferido", "acepto_politicas"];

/// Lead fields rebuilt from the validated lead; everything else is forwarded
const LEAD_FIELDS: [&str; 8] = [
    "nombre",
    "telefono",
    "signo",
    "contenido_preferido",
    "acepto_politicas",
    "email",
    "fuente",
    "whatsapp",
];

const CHECKOUT_MEDIUM: &str = "web-checkout";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub supabase_configured: bool,
    pub mercadopago_configured: bool,
}

// ============================================================================
// Request Helpers
// ============================================================================

/// Body bytes, or the buffering failure as a JSON error
///
/// Oversized bodies (over axum's default limit) land here as 413.
fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, (StatusCode, String)> {
    body.map_err(|rejection| {
        tracing::warn!(status = %rejection.status(), error = %rejection.body_text(), "Request body rejected");
        (rejection.status(), rejection.body_text())
    })
}

/// [`read_body`] for routes answering `{resultado, mensaje}`
fn resultado_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ApiError> {
    read_body(body).map_err(|(status, text)| {
        ApiError::resultado(status, "No se pudo leer la solicitud").with_detail(text)
    })
}

/// [`read_body`] for routes answering `{ok, error}`
fn not_ok_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ApiError> {
    read_body(body).map_err(|(status, text)| ApiError::not_ok(status, text))
}

/// JSON object body, `None` for anything else
fn parse_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Non-blank string field; numbers are accepted as their text
fn text(body: &Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First required field that is absent, null or blank
///
/// A consent flag sent as `false` counts as present so that it gets the
/// dedicated consent message.
fn first_missing(body: &Map<String, Value>, required: &[&'static str]) -> Option<&'static str> {
    required.iter().copied().find(|key| match body.get(*key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    })
}

fn consented(body: &Map<String, Value>) -> bool {
    body.get("acepto_politicas") == Some(&Value::Bool(true))
}

/// Lead form from a request body; the phone may arrive in any accepted form
fn lead_form(body: &Map<String, Value>, policy_version: &str) -> LeadForm {
    let phone = text(body, "telefono").unwrap_or_default();
    let phone = PhoneNumber::parse_any(&phone).map_or(phone, |p| p.local());
    LeadForm {
        name: text(body, "nombre").unwrap_or_default(),
        sign: text(body, "signo").unwrap_or_default(),
        content: text(body, "contenido_preferido").unwrap_or_default(),
        phone,
        email: text(body, "email"),
        consent: consented(body),
        policy_version: text(body, "version_politica").or_else(|| Some(policy_version.to_string())),
        source: text(body, "fuente"),
    }
}

/// Body fields that are not part of the lead
fn extras(mut body: Map<String, Value>) -> Map<String, Value> {
    for key in LEAD_FIELDS {
        body.remove(key);
    }
    body
}

/// Plan requested in the body, if the body names an amount
fn requested_plan(body: &Map<String, Value>) -> Result<Option<Plan>, ApiError> {
    let Some(raw) = body.get("monto").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let amount = parse_amount(raw).ok_or_else(|| {
        ApiError::resultado(StatusCode::BAD_REQUEST, "El monto no es válido.")
    })?;
    let currency = match text(body, "moneda") {
        Some(code) => code.parse().map_err(invalid_field)?,
        None => Currency::Uyu,
    };
    Plan::new(amount, currency).map(Some).map_err(invalid_field)
}

fn invalid_field(error: ValidationError) -> ApiError {
    ApiError::resultado(StatusCode::BAD_REQUEST, error.message)
}

fn invalid_lead(errors: FieldErrors) -> ApiError {
    let detail: Vec<Value> = errors
        .iter()
        .map(|e| json!({ "campo": e.field.wire_name(), "mensaje": e.message }))
        .collect();
    let mut error = ApiError::resultado(
        StatusCode::BAD_REQUEST,
        errors.first_message().unwrap_or("Datos inválidos"),
    );
    error.body["errores"] = Value::Array(detail);
    error
}

/// Map a failed Edge Function call onto the proxy reply
fn proxy_error(error: FunnelError) -> ApiError {
    match error {
        FunnelError::Duplicate { body, .. } => ApiError::new(StatusCode::CONFLICT, body),
        FunnelError::Upstream { status, body } => ApiError::upstream(status, body),
        FunnelError::Malformed(text) => {
            tracing::error!(body = %text, "Edge Function answered 2xx without JSON");
            ApiError::resultado(StatusCode::INTERNAL_SERVER_ERROR, "Respuesta OK pero JSON inválido")
                .with_detail(text)
        }
        other => {
            tracing::error!(error = %other, "Edge Function proxy failed");
            ApiError::resultado(StatusCode::INTERNAL_SERVER_ERROR, "Fallo en el proxy")
                .with_detail(other.to_string())
        }
    }
}

/// Map a failed checkout attempt; the orchestrator has already logged it
fn checkout_error(error: CheckoutError) -> ApiError {
    let message = error.user_message();
    match (error.kind, error.source) {
        (CheckoutErrorKind::Validation, _) => ApiError::resultado(StatusCode::BAD_REQUEST, message),
        (CheckoutErrorKind::Duplicate, FunnelError::Duplicate { body, .. }) if body.is_object() => {
            ApiError::new(StatusCode::CONFLICT, body)
        }
        (CheckoutErrorKind::Duplicate, _) => ApiError::new(
            StatusCode::CONFLICT,
            json!({ "resultado": "duplicado", "mensaje": message }),
        ),
        (CheckoutErrorKind::Registration, FunnelError::MissingSubscriberId) => ApiError::resultado(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error interno al procesar el registro.",
        ),
        (CheckoutErrorKind::Subscription, FunnelError::MissingInitPoint) => ApiError::resultado(
            StatusCode::INTERNAL_SERVER_ERROR,
            "No se pudo generar el link de pago.",
        ),
        (CheckoutErrorKind::Registration | CheckoutErrorKind::Subscription, _) => {
            ApiError::resultado(StatusCode::BAD_GATEWAY, message)
        }
    }
}

fn no_store<T: IntoResponse>(reply: T) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], reply).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        supabase_configured: state.supabase_configured(),
        mercadopago_configured: state.mercadopago_configured,
    })
}

/// Register a lead with the registration Edge Function
pub async fn register_subscriber(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&resultado_body(body)?).unwrap_or_default();

    if let Some(field) = first_missing(&body, &REQUIRED_FIELDS) {
        return Err(ApiError::resultado(StatusCode::BAD_REQUEST, format!("Falta {field}")));
    }
    if !consented(&body) {
        return Err(ApiError::resultado(
            StatusCode::BAD_REQUEST,
            "Debe aceptar la política de privacidad",
        ));
    }

    let edge = state.edge.as_ref().ok_or_else(|| {
        tracing::error!("Registration called without Supabase configuration");
        ApiError::resultado(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Faltan variables de entorno del servidor",
        )
    })?;

    let lead = lead_form(&body, &state.config.policy_version)
        .validate()
        .map_err(invalid_lead)?;
    let consent = consent_metadata(&headers, &lead.source);
    let mut request = RegistrationRequest::new(lead).with_consent(consent);
    request.extra = extras(body);

    let registration = edge.register(&request).await.map_err(proxy_error)?;
    tracing::info!(subscriber_id = ?registration.subscriber_id, "Lead registered");
    Ok(Json(registration.body))
}

pub async fn registration_online() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Create the recurring-payment authorization for a registered subscriber
pub async fn create_subscription(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = resultado_body(body)?;
    let edge = state.edge.as_ref().ok_or_else(|| {
        tracing::error!("Subscription called without Supabase configuration");
        ApiError::resultado(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error de configuración del servidor",
        )
    })?;

    let body = parse_object(&body).unwrap_or_default();
    let subscriber_id = text(&body, "id_suscriptor").and_then(SubscriberId::new);
    let (Some(subscriber_id), Some(plan)) = (subscriber_id, requested_plan(&body)?) else {
        return Err(ApiError::resultado(
            StatusCode::BAD_REQUEST,
            "Faltan datos para crear la suscripción",
        ));
    };

    let mut request = SubscriptionRequest::new(subscriber_id, plan);
    request.name = text(&body, "nombre");
    request.whatsapp = text(&body, "whatsapp");
    request.phone = text(&body, "telefono");
    request.sign = text(&body, "signo").and_then(|s| s.parse().ok());
    request.content = text(&body, "contenido_preferido").and_then(|s| s.parse().ok());
    request.email = text(&body, "email");
    request.reason = text(&body, "reason");

    let link = edge.create_subscription(&request).await.map_err(proxy_error)?;
    Ok(Json(link.body))
}

/// Register and subscribe in one call, answering with the payment URL
pub async fn start_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let Some(body) = parse_object(&resultado_body(body)?) else {
        return Err(ApiError::resultado(StatusCode::BAD_REQUEST, "Datos no recibidos"));
    };

    if let Some(field) = first_missing(&body, &REQUIRED_FIELDS) {
        return Err(ApiError::resultado(
            StatusCode::BAD_REQUEST,
            format!("Falta completar: {field}"),
        ));
    }
    if !consented(&body) {
        return Err(ApiError::resultado(
            StatusCode::BAD_REQUEST,
            "Debes aceptar las políticas de privacidad para continuar.",
        ));
    }

    let form = lead_form(&body, &state.config.policy_version);
    form.validate().map_err(invalid_lead)?;
    let plan = requested_plan(&body)?;

    let mut orchestrator = state.orchestrator().ok_or_else(|| {
        tracing::error!("Checkout called without Supabase configuration");
        ApiError::resultado(StatusCode::INTERNAL_SERVER_ERROR, "Error interno de configuración")
    })?;
    if let Some(plan) = plan {
        orchestrator = orchestrator.with_plan(plan);
    }

    let medium = form.source.clone().unwrap_or_else(|| CHECKOUT_MEDIUM.into());
    let redirect = orchestrator
        .submit(&form, Some(consent_metadata(&headers, &medium)))
        .await
        .map_err(checkout_error)?;

    Ok(Json(json!({
        "resultado": "ok",
        "init_point": redirect.init_point,
        "id_suscriptor": redirect.subscriber_id,
    })))
}

pub async fn checkout_online() -> Json<Value> {
    Json(json!({ "status": "online", "service": "api_iniciar_checkout" }))
}

/// Grant provisional premium access on the payer's return
pub async fn activate_provisional(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&not_ok_body(body)?).unwrap_or_default();
    let subscriber_id = text(&body, "id_suscriptor").and_then(SubscriberId::new);
    let (Some(subscriber_id), Some(preapproval_id)) = (subscriber_id, text(&body, "preapproval_id"))
    else {
        return Err(ApiError::not_ok(
            StatusCode::BAD_REQUEST,
            "Faltan id_suscriptor o preapproval_id",
        ));
    };

    let activator = state.activator.as_ref().ok_or_else(|| {
        ApiError::not_ok(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Faltan variables de entorno de Supabase",
        )
    })?;

    let request = ActivationRequest {
        subscriber_id,
        preapproval_id,
        collection_status: text(&body, "collection_status"),
        back_params: body.get("backParams").cloned(),
    };
    match activator.activate(&request).await {
        Ok(reply) => Ok(Json(json!({ "ok": true, "data": reply.data }))),
        Err(e) => {
            tracing::error!(subscriber_id = %request.subscriber_id, error = %e, "Provisional activation failed");
            Err(ApiError::not_ok(StatusCode::INTERNAL_SERVER_ERROR, "Error en Supabase"))
        }
    }
}

/// Apply the provider's final preapproval status
pub async fn confirm_subscription(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = parse_object(&not_ok_body(body)?).unwrap_or_default();
    let subscriber_id = text(&body, "id_suscriptor").and_then(SubscriberId::new);
    let (Some(subscriber_id), Some(preapproval_id), Some(status)) = (
        subscriber_id,
        text(&body, "preapproval_id"),
        text(&body, "status"),
    ) else {
        return Err(ApiError::not_ok(StatusCode::BAD_REQUEST, "Faltan parámetros"));
    };

    let activator = state.activator.as_ref().ok_or_else(|| {
        ApiError::not_ok(StatusCode::INTERNAL_SERVER_ERROR, "Faltan variables de entorno")
    })?;

    match activator.confirm(&subscriber_id, &preapproval_id, &status).await {
        Ok(data) => Ok(Json(json!({ "ok": true, "data": data }))),
        Err(e) => {
            tracing::error!(subscriber_id = %subscriber_id, error = %e, "Confirmation failed");
            Err(ApiError::not_ok(StatusCode::BAD_GATEWAY, "Supabase error"))
        }
    }
}

/// Current preapproval of a subscriber, refreshed when the link is missing
pub async fn preapproval_status(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let Some(subscriber_id) = query.get("id_suscriptor").cloned().and_then(SubscriberId::new) else {
        return Err(ApiError::not_ok(StatusCode::BAD_REQUEST, "missing id_suscriptor"));
    };
    let lookup = state.preapproval.as_ref().ok_or_else(|| {
        ApiError::not_ok(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Faltan variables de entorno de Supabase",
        )
    })?;

    let status = lookup.preapproval_status(&subscriber_id).await.map_err(|e| {
        tracing::error!(subscriber_id = %subscriber_id, error = %e, "Preapproval lookup failed");
        ApiError::not_ok(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let mut reply = serde_json::to_value(&status).map_err(|e| {
        ApiError::not_ok(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    reply["ok"] = Value::Bool(true);
    Ok(no_store(Json(reply)))
}

/// Record what the browser saw on the payment return; never fails the caller
pub async fn log_backurl(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Json<Value> {
    let Ok(body) = read_body(body) else {
        return Json(json!({ "ok": false }));
    };
    let detail = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
    let Some(rest) = state.rest.as_ref() else {
        tracing::warn!("Return log dropped: Supabase not configured");
        return Json(json!({ "ok": false }));
    };

    let entry = DiagnosticEntry::new("backurl_mercadopago", "PARAMS", detail).created_by("front");
    match rest.record(entry).await {
        Ok(()) => Json(json!({ "ok": true })),
        Err(e) => {
            tracing::warn!(error = %e, "Return log not recorded");
            Json(json!({ "ok": false }))
        }
    }
}

/// Forward a one-time payment request and mirror the answer
pub async fn create_initial_payment(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let internal = |detail: String| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal", "detalle": detail })),
        )
            .into_response()
    };

    let body = match read_body(body) {
        Ok(body) => body,
        Err((status, detail)) => {
            return (status, Json(json!({ "error": "invalid_body", "detalle": detail })))
                .into_response();
        }
    };
    let Some(edge) = state.public_edge.as_ref() else {
        return internal("Edge Functions base URL not configured".into());
    };
    let payload = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));

    match edge.create_one_time_payment(&payload).await {
        Ok((status, reply)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(reply)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "One-time payment proxy failed");
            internal(e.to_string())
        }
    }
}

/// Settle a payment return and report `{estado, motivo}`
pub async fn payment_return(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let handler = state.return_handler().ok_or_else(|| {
        ApiError::not_ok(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Faltan variables de entorno de Supabase",
        )
    })?;

    let params = ReturnParams::from_query(pairs);
    let outcome = handler.handle(&params).await;
    let mut reply = json!({
        "estado": outcome.estado,
        "motivo": outcome.motivo,
        "mensaje": outcome.message(),
    });
    if let Some(url) = &outcome.resume_url {
        reply["resume_url"] = Value::String(url.clone());
    }
    Ok(no_store(Json(reply)))
}

/// Forward field updates for an existing subscriber and mirror the answer
pub async fn update_subscriber(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = parse_object(&resultado_body(body)?).unwrap_or_default();
    if text(&body, "id_suscriptor").is_none() {
        return Err(ApiError::resultado(StatusCode::BAD_REQUEST, "Falta id_suscriptor"));
    }

    let edge = state.edge.as_ref().ok_or_else(|| {
        tracing::error!("Subscriber update called without Supabase configuration");
        ApiError::resultado(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Faltan variables de entorno del servidor",
        )
    })?;

    match edge.update_subscriber(&Value::Object(body)).await {
        Ok((status, reply)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            Ok((status, Json(reply)).into_response())
        }
        Err(e) => {
            tracing::error!(error = %e, "Subscriber update proxy failed");
            Err(
                ApiError::resultado(StatusCode::INTERNAL_SERVER_ERROR, "Fallo en update-suscriptor")
                    .with_detail(e.to_string()),
            )
        }
    }
}
