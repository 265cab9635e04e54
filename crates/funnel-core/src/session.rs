//! Checkout Session State
//!
//! A checkout crosses a full external redirect to the payment provider, so
//! the lead snapshot must outlive the in-memory state of the page that
//! started it. [`CheckoutStore`] holds that state explicitly:
//!
//! - only the [`CheckoutOrchestrator`](crate::checkout::CheckoutOrchestrator)
//!   writes to it (the writer is crate-private);
//! - readers hold a [`CheckoutReader`] and either read the current value or
//!   await the subscriber identifier, instead of polling storage;
//! - every write is mirrored to a [`SessionStorage`] backend under
//!   [`SESSION_KEY`] so the next page load can restore it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::checkout::{CheckoutErrorKind, CheckoutPhase};
use crate::error::{FunnelError, Result};
use crate::lead::{Lead, SubscriberId};

/// Storage key under which the snapshot is persisted
pub const SESSION_KEY: &str = "registro";

/// Lead data kept across the payment redirect
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    pub nombre: String,

    /// E.164 number
    pub whatsapp: String,

    /// Number as the user typed it, trunk zero included
    #[serde(rename = "whatsappLocal")]
    pub whatsapp_local: String,

    pub signo: String,
    pub contenido_preferido: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_suscriptor: Option<SubscriberId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resultado: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensaje: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_backend: Option<String>,
}

impl CheckoutSnapshot {
    /// Draft written before any network call
    pub fn draft(lead: &Lead) -> Self {
        Self {
            nombre: lead.name.clone(),
            whatsapp: lead.phone.e164(),
            whatsapp_local: lead.phone.local(),
            signo: lead.sign.as_str().to_string(),
            contenido_preferido: lead.content.as_str().to_string(),
            email: lead.email.clone(),
            ..Default::default()
        }
    }

    /// Whether the last registration attempt was rejected as a duplicate
    pub fn is_duplicate(&self) -> bool {
        self.resultado.as_deref() == Some("duplicado")
    }

    /// WhatsApp number masked for display, e.g. `+598 *** 456`
    pub fn masked_whatsapp(&self) -> String {
        let digits: Vec<char> = self.whatsapp.chars().collect();
        if digits.len() <= 7 {
            return self.whatsapp.clone();
        }
        let head: String = digits[..4].iter().collect();
        let tail: String = digits[digits.len() - 3..].iter().collect();
        format!("{head} *** {tail}")
    }
}

/// Phase plus snapshot, as observed by readers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutState {
    pub phase: CheckoutPhase,
    pub snapshot: Option<CheckoutSnapshot>,
}

/// Key-value backend for persisting the snapshot across page loads
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory session storage (for the server and for tests)
#[derive(Default)]
pub struct MemorySessionStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| FunnelError::Storage("session storage lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| FunnelError::Storage("session storage lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| FunnelError::Storage("session storage lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Single-writer checkout state with persistent mirroring
pub struct CheckoutStore {
    tx: watch::Sender<CheckoutState>,
    storage: Arc<dyn SessionStorage>,
}

impl CheckoutStore {
    /// Empty store backed by `storage`
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let (tx, _rx) = watch::channel(CheckoutState::default());
        Self { tx, storage }
    }

    /// Store with no persistence beyond this process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::new()))
    }

    /// Store seeded from a snapshot persisted by an earlier page load
    pub fn restore(storage: Arc<dyn SessionStorage>) -> Result<Self> {
        let snapshot = match storage.get(SESSION_KEY)? {
            Some(raw) => Some(serde_json::from_str::<CheckoutSnapshot>(&raw)?),
            None => None,
        };
        let (tx, _rx) = watch::channel(CheckoutState {
            phase: CheckoutPhase::Idle,
            snapshot,
        });
        Ok(Self { tx, storage })
    }

    /// Read and remove the persisted snapshot (post-payment page)
    pub fn take(storage: &dyn SessionStorage) -> Result<Option<CheckoutSnapshot>> {
        let snapshot = match storage.get(SESSION_KEY)? {
            Some(raw) => Some(serde_json::from_str::<CheckoutSnapshot>(&raw)?),
            None => None,
        };
        storage.remove(SESSION_KEY)?;
        Ok(snapshot)
    }

    pub fn subscribe(&self) -> CheckoutReader {
        CheckoutReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> CheckoutState {
        self.tx.borrow().clone()
    }

    pub fn phase(&self) -> CheckoutPhase {
        self.tx.borrow().phase.clone()
    }

    pub fn snapshot(&self) -> Option<CheckoutSnapshot> {
        self.tx.borrow().snapshot.clone()
    }

    pub(crate) fn set_phase(&self, phase: CheckoutPhase) {
        tracing::debug!(phase = ?phase, "Checkout phase");
        self.tx.send_modify(|state| state.phase = phase);
    }

    /// Apply `update` to the snapshot (creating an empty one if needed) and
    /// mirror the result to storage
    pub(crate) fn update_snapshot(&self, update: impl FnOnce(&mut CheckoutSnapshot)) {
        let mut persisted = None;
        self.tx.send_modify(|state| {
            let snapshot = state.snapshot.get_or_insert_with(CheckoutSnapshot::default);
            update(snapshot);
            persisted = Some(snapshot.clone());
        });

        if let Some(snapshot) = persisted {
            if let Err(e) = self.persist(&snapshot) {
                tracing::warn!(error = %e, "Could not persist checkout snapshot");
            }
        }
    }

    pub(crate) fn replace_snapshot(&self, snapshot: CheckoutSnapshot) {
        self.update_snapshot(|current| *current = snapshot);
    }

    fn persist(&self, snapshot: &CheckoutSnapshot) -> Result<()> {
        let raw = serde_json::to_string(snapshot)?;
        self.storage.set(SESSION_KEY, &raw)
    }
}

/// Read-only view of a [`CheckoutStore`]
#[derive(Clone)]
pub struct CheckoutReader {
    rx: watch::Receiver<CheckoutState>,
}

impl CheckoutReader {
    pub fn current(&self) -> CheckoutState {
        self.rx.borrow().clone()
    }

    /// Resolve once the subscriber identifier is known
    ///
    /// Fails if the checkout attempt fails before an identifier arrives.
    pub async fn wait_for_subscriber_id(&mut self) -> std::result::Result<SubscriberId, CheckoutErrorKind> {
        let state = self
            .rx
            .wait_for(|state| {
                state
                    .snapshot
                    .as_ref()
                    .is_some_and(|s| s.id_suscriptor.is_some())
                    || matches!(state.phase, CheckoutPhase::Failed { .. })
            })
            .await
            .map_err(|_| CheckoutErrorKind::Registration)?;

        if let Some(id) = state.snapshot.as_ref().and_then(|s| s.id_suscriptor.clone()) {
            return Ok(id);
        }
        match &state.phase {
            CheckoutPhase::Failed { kind, .. } => Err(*kind),
            _ => Err(CheckoutErrorKind::Registration),
        }
    }

    /// Wait for the next change of phase or snapshot
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
