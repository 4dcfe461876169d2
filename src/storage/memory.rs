//! In-memory store for tests and throwaway deployments
//!
//! Thread-safe via `RwLock`. Not durable: data is lost on restart. The
//! one-active-transaction-per-user rule is checked under the write lock,
//! so concurrent creates cannot both succeed.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::catalog::{CatalogError, CatalogImport, CatalogImportStats, CatalogSeed, ToolSetRecord};
use super::persistence::{
    entity, RoleRepository, ScanDetailRepository, ScanRepository, StoreError,
    ToolSetRepository, TransactionRepository, TransactionResolutionRepository, UserRepository,
};
use crate::types::{
    NewResolution, NewScan, NewScanDetail, NewTransaction, Role, Scan, ScanDetail, ToolSet,
    ToolType, Transaction, TransactionResolution, TransactionStatus, User,
};

#[derive(Default)]
struct State {
    next_id: u64,
    roles: HashMap<u64, Role>,
    users: HashMap<u64, User>,
    tool_types: HashMap<u64, ToolType>,
    tool_sets: HashMap<u64, ToolSetRecord>,
    transactions: Vec<Transaction>,
    scans: Vec<Scan>,
    scan_details: Vec<ScanDetail>,
    resolutions: Vec<TransactionResolution>,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn active_for_user(&self, user_id: u64) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|t| t.user_id == user_id && t.status.is_active())
    }
}

/// In-memory implementation of every repository trait
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with a catalog seed.
    pub fn with_catalog(seed: &CatalogSeed) -> Result<Self, CatalogError> {
        let store = Self::new();
        store.import_catalog(seed)?;
        Ok(store)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Backend name for logging
    pub fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

impl CatalogImport for InMemoryStore {
    fn import_catalog(&self, seed: &CatalogSeed) -> Result<CatalogImportStats, CatalogError> {
        seed.validate()?;
        let mut state = self.write()?;

        for role in &seed.roles {
            state.roles.insert(role.id, role.clone());
        }
        for user in &seed.users {
            state.users.insert(user.id, user.clone());
        }
        for tool in &seed.tool_types {
            state.tool_types.insert(tool.id, tool.clone());
        }
        for set in &seed.tool_sets {
            state.tool_sets.insert(set.id, set.clone());
        }

        // Keep generated ids clear of seeded ones
        let max_seeded = seed
            .users
            .iter()
            .map(|u| u.id)
            .chain(seed.roles.iter().map(|r| r.id))
            .chain(seed.tool_types.iter().map(|t| t.id))
            .chain(seed.tool_sets.iter().map(|s| s.id))
            .max()
            .unwrap_or(0);
        state.next_id = state.next_id.max(max_seeded);

        Ok(CatalogImportStats {
            roles: seed.roles.len(),
            users: seed.users.len(),
            tool_types: seed.tool_types.len(),
            tool_sets: seed.tool_sets.len(),
        })
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_by_employee_id(&self, employee_id: &str) -> Result<User, StoreError> {
        let state = self.read()?;
        state
            .users
            .values()
            .find(|u| u.employee_id == employee_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(entity::USER, employee_id))
    }

    async fn get_by_id(&self, id: u64) -> Result<User, StoreError> {
        let state = self.read()?;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(entity::USER, id))
    }

    async fn get_with_transactions(
        &self,
        employee_id: &str,
    ) -> Result<(User, Vec<Transaction>), StoreError> {
        let user = UserRepository::get_by_employee_id(self, employee_id).await?;
        let state = self.read()?;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user.id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok((user, transactions))
    }
}

#[async_trait]
impl RoleRepository for InMemoryStore {
    async fn get_by_id(&self, id: u64) -> Result<Role, StoreError> {
        let state = self.read()?;
        state
            .roles
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(entity::ROLE, id))
    }
}

#[async_trait]
impl ToolSetRepository for InMemoryStore {
    async fn get_by_id_with_tools(&self, id: u64) -> Result<ToolSet, StoreError> {
        let state = self.read()?;
        let record = state
            .tool_sets
            .get(&id)
            .ok_or_else(|| StoreError::not_found(entity::TOOL_SET, id))?;

        let tools = record
            .tool_type_ids
            .iter()
            .map(|tool_id| {
                state
                    .tool_types
                    .get(tool_id)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found(entity::TOOL_TYPE, tool_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ToolSet {
            id: record.id,
            name: record.name.clone(),
            tools,
        })
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, StoreError> {
        let mut state = self.write()?;

        if new.status.is_active() {
            if let Some(existing) = state.active_for_user(new.user_id) {
                return Err(StoreError::Conflict(format!(
                    "user {} already holds active transaction {}",
                    new.user_id, existing.id
                )));
            }
        }

        let transaction = Transaction {
            id: state.allocate_id(),
            user_id: new.user_id,
            tool_set_id: new.tool_set_id,
            count_of_checks: 0,
            status: new.status,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        state.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn update(&self, transaction: &Transaction) -> Result<Transaction, StoreError> {
        let mut state = self.write()?;

        let index = state
            .transactions
            .iter()
            .position(|t| t.id == transaction.id)
            .ok_or_else(|| StoreError::not_found(entity::TRANSACTION, transaction.id))?;

        if transaction.status.is_active() {
            if let Some(other) = state.active_for_user(transaction.user_id) {
                if other.id != transaction.id {
                    return Err(StoreError::Conflict(format!(
                        "user {} already holds active transaction {}",
                        transaction.user_id, other.id
                    )));
                }
            }
        }

        let slot = &mut state.transactions[index];
        slot.tool_set_id = transaction.tool_set_id;
        slot.count_of_checks = transaction.count_of_checks;
        slot.status = transaction.status;
        slot.updated_at = transaction.updated_at;
        Ok(slot.clone())
    }

    async fn get_by_id(&self, id: u64) -> Result<Transaction, StoreError> {
        let state = self.read()?;
        state
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(entity::TRANSACTION, id))
    }

    async fn get_open_or_escalated_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.read()?.active_for_user(user_id).cloned())
    }

    async fn get_latest_failed_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.status == TransactionStatus::Failed)
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn list(&self, status: Option<TransactionStatus>) -> Result<Vec<Transaction>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}

#[async_trait]
impl ScanRepository for InMemoryStore {
    async fn create(&self, new: NewScan) -> Result<Scan, StoreError> {
        let mut state = self.write()?;
        if !state.transactions.iter().any(|t| t.id == new.transaction_id) {
            return Err(StoreError::not_found(entity::TRANSACTION, new.transaction_id));
        }
        let scan = Scan {
            id: state.allocate_id(),
            transaction_id: new.transaction_id,
            direction: new.direction,
            image_url: new.image_url,
            debug_image_url: new.debug_image_url,
            created_at: new.created_at,
        };
        state.scans.push(scan.clone());
        Ok(scan)
    }

    async fn list_by_transaction(&self, transaction_id: u64) -> Result<Vec<Scan>, StoreError> {
        let state = self.read()?;
        Ok(state
            .scans
            .iter()
            .filter(|s| s.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScanDetailRepository for InMemoryStore {
    async fn create(&self, new: NewScanDetail) -> Result<ScanDetail, StoreError> {
        let mut state = self.write()?;
        if !state.scans.iter().any(|s| s.id == new.scan_id) {
            return Err(StoreError::not_found(entity::SCAN, new.scan_id));
        }
        let detail = ScanDetail {
            id: state.allocate_id(),
            scan_id: new.scan_id,
            tool_type_id: new.tool_type_id,
            confidence: new.confidence,
            embedding: new.embedding,
            bbox: new.bbox,
        };
        state.scan_details.push(detail.clone());
        Ok(detail)
    }

    async fn list_by_scan(&self, scan_id: u64) -> Result<Vec<ScanDetail>, StoreError> {
        let state = self.read()?;
        Ok(state
            .scan_details
            .iter()
            .filter(|d| d.scan_id == scan_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionResolutionRepository for InMemoryStore {
    async fn create(&self, new: NewResolution) -> Result<TransactionResolution, StoreError> {
        let mut state = self.write()?;
        if state
            .resolutions
            .iter()
            .any(|r| r.transaction_id == new.transaction_id)
        {
            return Err(StoreError::Conflict(format!(
                "transaction {} already resolved",
                new.transaction_id
            )));
        }
        let resolution = TransactionResolution {
            id: state.allocate_id(),
            transaction_id: new.transaction_id,
            qa_user_id: new.qa_user_id,
            reason: new.reason,
            notes: new.notes,
            tool_type_ids: new.tool_type_ids,
            created_at: new.created_at,
        };
        state.resolutions.push(resolution.clone());
        Ok(resolution)
    }

    async fn get_by_transaction(
        &self,
        transaction_id: u64,
    ) -> Result<Option<TransactionResolution>, StoreError> {
        let state = self.read()?;
        Ok(state
            .resolutions
            .iter()
            .find(|r| r.transaction_id == transaction_id)
            .cloned())
    }
}
