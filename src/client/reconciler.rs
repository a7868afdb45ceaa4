//! Client-side coordinator: one loop drives every queued validation.

use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    client::{
        pending_store::{PendingValidationPurchase, PendingValidationStore},
        retry_scheduler::{RetryPolicy, RetryScheduler},
        storage::{KeyValueStore, StorageError},
        validation_client::PurchaseValidator,
    },
    config::ClientConfig,
    models::entitlement::{DevicePurchase, ValidatedPurchase},
    services::{
        entitlement_resolver::resolve_entitlement,
        product_catalog::ProductCatalog,
        validation_errors::{classify_client_error, ValidationNotice, REASON_UNKNOWN_PRODUCT},
    },
    utils::token_fingerprint,
};

/// What happened to one purchase after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Validated {
        purchase_token: String,
        product_id: String,
    },
    /// Still queued; another attempt is due at `next_retry_at`
    Rescheduled {
        purchase_token: String,
        next_retry_at: OffsetDateTime,
        attempt: u32,
        reason: Option<String>,
        notice: ValidationNotice,
    },
    /// Left the queue without being validated
    Dropped {
        purchase_token: String,
        reason: Option<String>,
        notice: ValidationNotice,
    },
    /// A call for this token is already outstanding
    InFlight { purchase_token: String },
}

impl ReconcileOutcome {
    pub fn purchase_token(&self) -> &str {
        match self {
            ReconcileOutcome::Validated { purchase_token, .. }
            | ReconcileOutcome::Rescheduled { purchase_token, .. }
            | ReconcileOutcome::Dropped { purchase_token, .. }
            | ReconcileOutcome::InFlight { purchase_token } => purchase_token,
        }
    }

    /// Notice to show the user, if any
    pub fn notice(&self) -> Option<ValidationNotice> {
        match self {
            ReconcileOutcome::Rescheduled { notice, .. }
            | ReconcileOutcome::Dropped { notice, .. } => Some(*notice),
            ReconcileOutcome::Validated { .. } | ReconcileOutcome::InFlight { .. } => None,
        }
    }
}

struct ReconcilerState {
    store: PendingValidationStore,
    scheduler: RetryScheduler,
    validated: Vec<ValidatedPurchase>,
}

impl ReconcilerState {
    /// Take a token out of the queue for good.
    ///
    /// The schedule is only cleared once the removal is on disk.
    fn drop_token(&mut self, purchase_token: &str) -> Result<(), StorageError> {
        self.store.remove(purchase_token)?;
        self.scheduler.forget(purchase_token);
        Ok(())
    }
}

/// Owns the pending queue, the retry schedule and the local entitlement cache
/// for one signed-in session
pub struct PurchaseReconciler {
    catalog: Arc<ProductCatalog>,
    validator: Arc<dyn PurchaseValidator>,
    tick_interval: Duration,
    state: Mutex<ReconcilerState>,
}

impl PurchaseReconciler {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        validator: Arc<dyn PurchaseValidator>,
        storage: Arc<dyn KeyValueStore>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            catalog,
            validator,
            tick_interval: Duration::from_millis(config.retry.tick_interval_ms.max(1)),
            state: Mutex::new(ReconcilerState {
                store: PendingValidationStore::new(storage, config.storage_key.clone()),
                scheduler: RetryScheduler::new(RetryPolicy::from_config(&config.retry)),
                validated: Vec::new(),
            }),
        }
    }

    /// Load the persisted queue and schedule every entry at its stored time.
    ///
    /// Returns the number of queued purchases.
    pub async fn start(&self, now: OffsetDateTime) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        state.store.load()?;
        state.scheduler.reset();
        for entry in state.store.entries() {
            state.scheduler.schedule(&entry.purchase_token, entry.next_retry_at);
        }

        let count = state.store.len();
        info!(count = count, now = %now, "Resumed pending validations");
        Ok(count)
    }

    /// A purchase just completed on the device: validate it right away
    pub async fn purchase_completed(
        &self,
        purchase: DevicePurchase,
        now: OffsetDateTime,
    ) -> Result<ReconcileOutcome, StorageError> {
        if !self.catalog.is_known_product_id(&purchase.product_id) {
            warn!(product_id = %purchase.product_id, "Ignoring purchase of unknown product");
            self.state
                .lock()
                .await
                .drop_token(&purchase.purchase_token)?;
            return Ok(ReconcileOutcome::Dropped {
                purchase_token: purchase.purchase_token,
                reason: Some(REASON_UNKNOWN_PRODUCT.to_string()),
                notice: ValidationNotice::ValidationFailed,
            });
        }

        self.attempt(&purchase.purchase_token, &purchase.product_id, now)
            .await
    }

    /// Attempt every entry whose retry time has come.
    ///
    /// A storage failure on one entry puts it back on the schedule at the base
    /// delay and does not stop the rest of the batch.
    pub async fn tick(&self, now: OffsetDateTime) -> Vec<ReconcileOutcome> {
        let due: Vec<(String, String)> = {
            let mut state = self.state.lock().await;
            let state = &mut *state;
            let tokens = state.scheduler.take_due(now);
            tokens
                .into_iter()
                .filter_map(|token| {
                    let product_id = state.store.get(&token)?.product_id.clone();
                    Some((token, product_id))
                })
                .collect()
        };

        let mut outcomes = Vec::with_capacity(due.len());
        for (token, product_id) in due {
            match self.attempt(&token, &product_id, now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(token = %token_fingerprint(&token), "Failed to record attempt: {}", e);
                    let mut state = self.state.lock().await;
                    let retry_at = now + state.scheduler.policy().delay_for_attempt(1);
                    state.scheduler.schedule(&token, retry_at);
                }
            }
        }
        outcomes
    }

    /// Drive `tick` on a fixed interval until `shutdown` flips to true
    pub async fn run(
        self: Arc<Self>,
        outcomes: mpsc::UnboundedSender<ReconcileOutcome>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for outcome in self.tick(OffsetDateTime::now_utc()).await {
                        if outcomes.send(outcome).is_err() {
                            debug!("Outcome receiver dropped, stopping reconciler");
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Validate the canonical purchase among those the device still owns
    pub async fn restore_purchases(
        &self,
        purchases: &[DevicePurchase],
        now: OffsetDateTime,
    ) -> Result<Option<ReconcileOutcome>, StorageError> {
        let known = purchases
            .iter()
            .filter(|purchase| self.catalog.is_known_product_id(&purchase.product_id));

        let Some(canonical) = resolve_entitlement(&self.catalog, known) else {
            debug!("No restorable purchases on device");
            return Ok(None);
        };

        self.purchase_completed(canonical.clone(), now)
            .await
            .map(Some)
    }

    /// Canonical validated purchase this session, if any
    pub async fn entitlement(&self) -> Option<ValidatedPurchase> {
        let state = self.state.lock().await;
        resolve_entitlement(&self.catalog, &state.validated).cloned()
    }

    pub async fn is_premium(&self) -> bool {
        !self.state.lock().await.validated.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.store.len()
    }

    pub async fn pending(&self, purchase_token: &str) -> Option<PendingValidationPurchase> {
        self.state.lock().await.store.get(purchase_token).cloned()
    }

    /// Drop session caches and counters; the persisted queue is kept for the next `start`
    pub async fn sign_out(&self) {
        let mut state = self.state.lock().await;
        state.scheduler.reset();
        state.validated.clear();
        info!("Cleared reconciler session state");
    }

    async fn attempt(
        &self,
        purchase_token: &str,
        product_id: &str,
        now: OffsetDateTime,
    ) -> Result<ReconcileOutcome, StorageError> {
        if !self.state.lock().await.scheduler.try_begin(purchase_token) {
            debug!(token = %token_fingerprint(purchase_token), "Validation already in flight");
            return Ok(ReconcileOutcome::InFlight {
                purchase_token: purchase_token.to_string(),
            });
        }

        // Lock is not held across the network call
        let result = self.validator.validate(purchase_token, product_id).await;

        let mut state = self.state.lock().await;
        state.scheduler.finish(purchase_token);

        let err = match result {
            Ok(_) => {
                state
                    .validated
                    .retain(|validated| validated.purchase_token != purchase_token);
                state.validated.push(ValidatedPurchase {
                    purchase_token: purchase_token.to_string(),
                    product_id: product_id.to_string(),
                    validated_at: now,
                });
                info!(
                    token = %token_fingerprint(purchase_token),
                    product_id = product_id,
                    "Purchase validated"
                );

                // Premium stands even if the entry lingers; it is revalidated and dequeued later
                if let Err(e) = state.drop_token(purchase_token) {
                    error!(
                        token = %token_fingerprint(purchase_token),
                        "Failed to dequeue validated purchase: {}", e
                    );
                    if state.store.get(purchase_token).is_some() {
                        let retry_at = now + state.scheduler.policy().delay_for_attempt(1);
                        state.scheduler.schedule(purchase_token, retry_at);
                    }
                }

                return Ok(ReconcileOutcome::Validated {
                    purchase_token: purchase_token.to_string(),
                    product_id: product_id.to_string(),
                });
            }
            Err(err) => err,
        };

        let details = classify_client_error(&err);

        if !details.retryable {
            state.drop_token(purchase_token)?;
            warn!(
                token = %token_fingerprint(purchase_token),
                reason = ?details.reason,
                "Validation failed permanently: {}", err
            );
            return Ok(ReconcileOutcome::Dropped {
                purchase_token: purchase_token.to_string(),
                notice: ValidationNotice::for_details(&details),
                reason: details.reason,
            });
        }

        let attempt = state.scheduler.record_failure(purchase_token);
        if state.scheduler.exhausted(purchase_token) {
            state.drop_token(purchase_token)?;
            warn!(
                token = %token_fingerprint(purchase_token),
                attempts = attempt,
                "Giving up on validation for this session"
            );
            return Ok(ReconcileOutcome::Dropped {
                purchase_token: purchase_token.to_string(),
                reason: details.reason,
                notice: ValidationNotice::RetriesExhausted,
            });
        }

        let delay = state.scheduler.policy().delay_for_attempt(i64::from(attempt));
        let next_retry_at = now + delay;

        let updated =
            state
                .store
                .record_retry(purchase_token, next_retry_at, details.reason.clone(), now)?;
        if !updated {
            state.store.enqueue(PendingValidationPurchase {
                purchase_token: purchase_token.to_string(),
                product_id: product_id.to_string(),
                purchase_kind: self.catalog.purchase_kind_for_product_id(product_id),
                created_at: now,
                updated_at: now,
                next_retry_at,
                last_reason: details.reason.clone(),
            })?;
        }
        state.scheduler.schedule(purchase_token, next_retry_at);

        info!(
            token = %token_fingerprint(purchase_token),
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Validation deferred: {}", err
        );

        Ok(ReconcileOutcome::Rescheduled {
            purchase_token: purchase_token.to_string(),
            next_retry_at,
            attempt,
            reason: details.reason,
            notice: ValidationNotice::TemporaryFailure,
        })
    }
}
