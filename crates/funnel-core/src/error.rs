//! Error Types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for funnel operations
pub type Result<T> = std::result::Result<T, FunnelError>;

/// Input fields that can fail validation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Sign,
    ContentPreference,
    Phone,
    Consent,
    SubscriberId,
    PreapprovalId,
    Status,
    Amount,
}

impl Field {
    /// Field name as it appears on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            Field::Name => "nombre",
            Field::Sign => "signo",
            Field::ContentPreference => "contenido_preferido",
            Field::Phone => "telefono",
            Field::Consent => "acepto_politicas",
            Field::SubscriberId => "id_suscriptor",
            Field::PreapprovalId => "preapproval_id",
            Field::Status => "status",
            Field::Amount => "monto",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A single rejected input field with a message fit for the form
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: Field,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Every field error found in one submission, in form order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors(Vec<ValidationError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Error for a given field, if that field was rejected
    pub fn get(&self, field: Field) -> Option<&ValidationError> {
        self.0.iter().find(|e| e.field == field)
    }

    /// Message of the first rejected field
    pub fn first_message(&self) -> Option<&str> {
        self.0.first().map(|e| e.message.as_str())
    }
}

impl From<ValidationError> for FieldErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Funnel error types
#[derive(Error, Debug)]
pub enum FunnelError {
    /// Local validation failed; never reached the network
    #[error("Invalid input: {0}")]
    Invalid(FieldErrors),

    /// Remote registration reports an existing active subscriber
    #[error("Subscriber already registered: {message}")]
    Duplicate {
        message: String,
        body: serde_json::Value,
    },

    /// Remote service answered with a non-2xx status
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: serde_json::Value },

    /// Remote service answered 2xx with a body we could not use
    #[error("Malformed upstream response: {0}")]
    Malformed(String),

    /// Request never got an answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// Registration succeeded without assigning an identifier
    #[error("Registration returned no subscriber identifier")]
    MissingSubscriberId,

    /// Subscription succeeded without a payment redirect URL
    #[error("Subscription returned no payment redirect URL")]
    MissingInitPoint,

    /// Required configuration is absent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkout state could not be persisted or read back
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FunnelError {
    /// Transport failures and upstream 5xx answers are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FunnelError::Transport(_) => true,
            FunnelError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Nearest meaningful HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            FunnelError::Invalid(_) => 400,
            FunnelError::Duplicate { .. } => 409,
            FunnelError::Upstream { status, .. } if *status >= 400 => *status,
            FunnelError::Transport(_) => 502,
            _ => 500,
        }
    }

    /// Convert to a message safe to show the end user
    pub fn user_message(&self) -> String {
        match self {
            FunnelError::Invalid(errors) => errors
                .first_message()
                .unwrap_or("Revisá los datos del formulario.")
                .to_string(),
            FunnelError::Duplicate { message, .. } if !message.is_empty() => message.clone(),
            FunnelError::Duplicate { .. } => "Ya tenés una suscripción activa.".into(),
            FunnelError::Config(_) => "Error interno de configuración.".into(),
            _ => "Ocurrió un error. Probá de nuevo en unos momentos.".into(),
        }
    }
}

impl From<ValidationError> for FunnelError {
    fn from(error: ValidationError) -> Self {
        FunnelError::Invalid(error.into())
    }
}

impl From<FieldErrors> for FunnelError {
    fn from(errors: FieldErrors) -> Self {
        FunnelError::Invalid(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FunnelError::Transport("reset".into()).is_retryable());
        assert!(
            FunnelError::Upstream {
                status: 503,
                body: serde_json::Value::Null
            }
            .is_retryable()
        );
        assert!(
            !FunnelError::Upstream {
                status: 400,
                body: serde_json::Value::Null
            }
            .is_retryable()
        );
        assert!(
            !FunnelError::Duplicate {
                message: String::new(),
                body: serde_json::Value::Null
            }
            .is_retryable()
        );
        assert!(!FunnelError::MissingInitPoint.is_retryable());
    }

    #[test]
    fn test_status_codes() {
        let invalid: FunnelError = ValidationError::new(Field::Phone, "bad").into();
        assert_eq!(invalid.status_code(), 400);
        assert_eq!(FunnelError::MissingSubscriberId.status_code(), 500);
        assert_eq!(FunnelError::Transport("x".into()).status_code(), 502);
        assert_eq!(
            FunnelError::Upstream {
                status: 200,
                body: serde_json::Value::Null
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = FunnelError::Upstream {
            status: 500,
            body: serde_json::json!({"detail": "stack trace"}),
        };
        assert!(!err.user_message().contains("stack"));
    }
}
