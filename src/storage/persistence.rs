//! Repository traits for pluggable storage backends
//!
//! The custody engine reaches storage only through these traits so backends
//! can be swapped without touching the orchestrator:
//! - `InMemoryStore`: tests and throwaway deployments
//! - `SledStore`: embedded durable store for a single station server
//!
//! Every trait is `Send + Sync` for shared access across request tasks.
//! Lookups that identify a row by key fail with [`StoreError::NotFound`];
//! lookups that ask "is there one?" return `Option`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{
    NewResolution, NewScan, NewScanDetail, NewTransaction, Role, Scan, ScanDetail, ToolSet,
    Transaction, TransactionResolution, TransactionStatus, User,
};

/// Entity names used in `NotFound` errors
pub mod entity {
    pub const USER: &str = "user";
    pub const ROLE: &str = "role";
    pub const TOOL_SET: &str = "tool set";
    pub const TOOL_TYPE: &str = "tool type";
    pub const TRANSACTION: &str = "transaction";
    pub const SCAN: &str = "scan";
    pub const RESOLUTION: &str = "resolution";
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_employee_id(&self, employee_id: &str) -> Result<User, StoreError>;

    async fn get_by_id(&self, id: u64) -> Result<User, StoreError>;

    /// User plus every transaction they ever held, newest first.
    async fn get_with_transactions(
        &self,
        employee_id: &str,
    ) -> Result<(User, Vec<Transaction>), StoreError>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn get_by_id(&self, id: u64) -> Result<Role, StoreError>;
}

#[async_trait]
pub trait ToolSetRepository: Send + Sync {
    /// Tool set with its tool types resolved, in set order.
    async fn get_by_id_with_tools(&self, id: u64) -> Result<ToolSet, StoreError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert a new transaction.
    ///
    /// Fails with `Conflict` when `new.status` is active and the user
    /// already holds an `OPEN` or `QA VERIFICATION` transaction.
    async fn create(&self, new: NewTransaction) -> Result<Transaction, StoreError>;

    /// Overwrite status, counter, tool set and `updated_at`.
    ///
    /// Fails with `Conflict` when the update would give the user a second
    /// active transaction.
    async fn update(&self, transaction: &Transaction) -> Result<Transaction, StoreError>;

    async fn get_by_id(&self, id: u64) -> Result<Transaction, StoreError>;

    async fn get_open_or_escalated_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Most recently updated `FAILED` transaction of the user.
    async fn get_latest_failed_by_user(&self, user_id: u64)
        -> Result<Option<Transaction>, StoreError>;

    /// All transactions, most recently updated first, optionally filtered.
    async fn list(&self, status: Option<TransactionStatus>) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn create(&self, new: NewScan) -> Result<Scan, StoreError>;

    /// Scans of a transaction in creation order.
    async fn list_by_transaction(&self, transaction_id: u64) -> Result<Vec<Scan>, StoreError>;
}

#[async_trait]
pub trait ScanDetailRepository: Send + Sync {
    async fn create(&self, new: NewScanDetail) -> Result<ScanDetail, StoreError>;

    async fn list_by_scan(&self, scan_id: u64) -> Result<Vec<ScanDetail>, StoreError>;
}

#[async_trait]
pub trait TransactionResolutionRepository: Send + Sync {
    /// Fails with `Conflict` if the transaction already has a resolution.
    async fn create(&self, new: NewResolution) -> Result<TransactionResolution, StoreError>;

    async fn get_by_transaction(
        &self,
        transaction_id: u64,
    ) -> Result<Option<TransactionResolution>, StoreError>;
}

/// Every repository the custody engine uses, as shared trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub tool_sets: Arc<dyn ToolSetRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub scans: Arc<dyn ScanRepository>,
    pub scan_details: Arc<dyn ScanDetailRepository>,
    pub resolutions: Arc<dyn TransactionResolutionRepository>,
}

impl Repositories {
    /// Wire every repository to one backend that implements them all.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository
            + RoleRepository
            + ToolSetRepository
            + TransactionRepository
            + ScanRepository
            + ScanDetailRepository
            + TransactionResolutionRepository
            + 'static,
    {
        Self {
            users: store.clone(),
            roles: store.clone(),
            tool_sets: store.clone(),
            transactions: store.clone(),
            scans: store.clone(),
            scan_details: store.clone(),
            resolutions: store,
        }
    }
}
