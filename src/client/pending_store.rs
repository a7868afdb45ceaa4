//! Durable queue of purchases awaiting backend confirmation, keyed by purchase token.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    client::storage::{KeyValueStore, StorageError},
    models::common::PurchaseKind,
    utils::token_fingerprint,
};

/// One queued purchase as persisted on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingValidationPurchase {
    pub purchase_token: String,
    pub product_id: String,
    pub purchase_kind: PurchaseKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub next_retry_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
}

/// Lenient view of a stored entry; anything may be missing or mistyped
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPendingEntry {
    product_id: Option<String>,
    purchase_kind: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    updated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    next_retry_at: Option<OffsetDateTime>,
    last_reason: Option<String>,
}

/// Rebuild the queue from whatever was stored.
///
/// Entries without a product id or with an unrecognized purchase kind are
/// dropped. Missing timestamps fall back to the epoch, which makes the entry
/// due immediately; a missing `updatedAt` falls back to `createdAt`.
pub fn normalize(raw: &serde_json::Value) -> BTreeMap<String, PendingValidationPurchase> {
    let Some(map) = raw.as_object() else {
        return BTreeMap::new();
    };

    map.iter()
        .filter_map(|(token, value)| {
            if token.is_empty() {
                return None;
            }

            let entry: RawPendingEntry = match serde_json::from_value(value.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(token = %token_fingerprint(token), "Dropping unreadable entry: {}", e);
                    return None;
                }
            };

            let product_id = entry.product_id.filter(|id| !id.is_empty())?;
            let purchase_kind = entry
                .purchase_kind
                .as_deref()
                .and_then(PurchaseKind::from_str)?;
            let created_at = entry.created_at.unwrap_or(OffsetDateTime::UNIX_EPOCH);

            Some((
                token.clone(),
                PendingValidationPurchase {
                    purchase_token: token.clone(),
                    product_id,
                    purchase_kind,
                    created_at,
                    updated_at: entry.updated_at.unwrap_or(created_at),
                    next_retry_at: entry.next_retry_at.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    last_reason: entry.last_reason,
                },
            ))
        })
        .collect()
}

/// In-memory mirror of the persisted queue; every mutation is written through
pub struct PendingValidationStore {
    storage: Arc<dyn KeyValueStore>,
    storage_key: String,
    entries: BTreeMap<String, PendingValidationPurchase>,
}

impl PendingValidationStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        Self {
            storage,
            storage_key: storage_key.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Replace the in-memory queue with the persisted one.
    ///
    /// A document that is not valid JSON is treated as an empty queue.
    pub fn load(&mut self) -> Result<(), StorageError> {
        self.entries = match self.storage.get(&self.storage_key)? {
            Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => normalize(&value),
                Err(e) => {
                    warn!("Discarding unreadable pending validations: {}", e);
                    BTreeMap::new()
                }
            },
            None => BTreeMap::new(),
        };

        debug!(count = self.entries.len(), "Loaded pending validations");
        Ok(())
    }

    fn persist(&self) -> Result<(), StorageError> {
        if self.entries.is_empty() {
            return self.storage.remove(&self.storage_key);
        }

        let raw = serde_json::to_string(&self.entries)?;
        self.storage.set(&self.storage_key, &raw)
    }

    /// Insert or replace the entry for its token.
    ///
    /// Every mutation below leaves the in-memory queue untouched when the write fails.
    pub fn enqueue(&mut self, entry: PendingValidationPurchase) -> Result<(), StorageError> {
        let token = entry.purchase_token.clone();
        let previous = self.entries.insert(token.clone(), entry);
        self.persist().inspect_err(|_| self.restore(token, previous))
    }

    pub fn remove(&mut self, purchase_token: &str) -> Result<Option<PendingValidationPurchase>, StorageError> {
        let Some(removed) = self.entries.remove(purchase_token) else {
            return Ok(None);
        };

        if let Err(e) = self.persist() {
            self.entries.insert(purchase_token.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    /// Record a failed attempt on an existing entry
    pub fn record_retry(
        &mut self,
        purchase_token: &str,
        next_retry_at: OffsetDateTime,
        reason: Option<String>,
        now: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        let Some(entry) = self.entries.get_mut(purchase_token) else {
            return Ok(false);
        };

        let previous = entry.clone();
        entry.next_retry_at = next_retry_at;
        entry.updated_at = now;
        if reason.is_some() {
            entry.last_reason = reason;
        }
        self.persist()
            .inspect_err(|_| self.restore(purchase_token.to_string(), Some(previous)))?;
        Ok(true)
    }

    fn restore(&mut self, purchase_token: String, previous: Option<PendingValidationPurchase>) {
        match previous {
            Some(entry) => self.entries.insert(purchase_token, entry),
            None => self.entries.remove(&purchase_token),
        };
    }

    pub fn get(&self, purchase_token: &str) -> Option<&PendingValidationPurchase> {
        self.entries.get(purchase_token)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PendingValidationPurchase> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
