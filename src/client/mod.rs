//! On-device half: pending-validation queue, retry schedule and backend caller.

pub mod pending_store;
pub mod reconciler;
pub mod retry_scheduler;
pub mod storage;
pub mod validation_client;

pub use pending_store::{PendingValidationPurchase, PendingValidationStore};
pub use reconciler::{PurchaseReconciler, ReconcileOutcome};
pub use retry_scheduler::{RetryPolicy, RetryScheduler};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StorageError};
pub use validation_client::{error_from_response, HttpPurchaseValidator, PurchaseValidator};
