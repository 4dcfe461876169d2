//! Sled-backed store
//!
//! One tree per entity, JSON values, big-endian `u64` keys so iteration
//! follows id order. Child rows (scans, scan details) are keyed
//! `parent_id ++ child_id` and read back with a prefix scan.
//!
//! The one-active-transaction-per-user rule is enforced with an
//! `active_by_user` tree claimed through `compare_and_swap`: whoever
//! swaps `None -> transaction id` first owns the slot, a concurrent second
//! claim sees the swap fail and gets `Conflict`.
//!
//! `transactions_by_user` indexes transactions under `user_id ++ tx_id`
//! with empty values, so per-user reads only decode that user's rows.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::catalog::{CatalogError, CatalogImport, CatalogImportStats, CatalogSeed, ToolSetRecord};
use super::persistence::{
    entity, RoleRepository, ScanDetailRepository, ScanRepository, StoreError,
    ToolSetRepository, TransactionRepository, TransactionResolutionRepository, UserRepository,
};
use crate::types::{
    NewResolution, NewScan, NewScanDetail, NewTransaction, Role, Scan, ScanDetail, ToolSet,
    ToolType, Transaction, TransactionResolution, TransactionStatus, User,
};

const TREE_ROLES: &str = "roles";
const TREE_USERS: &str = "users";
const TREE_USERS_BY_EMPLOYEE: &str = "users_by_employee";
const TREE_TOOL_TYPES: &str = "tool_types";
const TREE_TOOL_SETS: &str = "tool_sets";
const TREE_TRANSACTIONS: &str = "transactions";
const TREE_ACTIVE_BY_USER: &str = "active_by_user";
const TREE_TRANSACTIONS_BY_USER: &str = "transactions_by_user";
const TREE_SCANS: &str = "scans";
const TREE_SCAN_DETAILS: &str = "scan_details";
const TREE_RESOLUTIONS: &str = "resolutions";

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn child_key(parent: u64, child: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&parent.to_be_bytes());
    key[8..].copy_from_slice(&child.to_be_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Result<u64, StoreError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad id key length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// Durable store implementing every repository trait
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    roles: sled::Tree,
    users: sled::Tree,
    users_by_employee: sled::Tree,
    tool_types: sled::Tree,
    tool_sets: sled::Tree,
    transactions: sled::Tree,
    active_by_user: sled::Tree,
    transactions_by_user: sled::Tree,
    scans: sled::Tree,
    scan_details: sled::Tree,
    resolutions: sled::Tree,
}

impl SledStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let store = Self::from_db(db)?;
        info!(path = %path_ref.display(), transactions = store.transactions.len(), "Custody store opened");
        Ok(store)
    }

    /// Temporary store removed on drop (tests)
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let store = Self {
            roles: db.open_tree(TREE_ROLES)?,
            users: db.open_tree(TREE_USERS)?,
            users_by_employee: db.open_tree(TREE_USERS_BY_EMPLOYEE)?,
            tool_types: db.open_tree(TREE_TOOL_TYPES)?,
            tool_sets: db.open_tree(TREE_TOOL_SETS)?,
            transactions: db.open_tree(TREE_TRANSACTIONS)?,
            active_by_user: db.open_tree(TREE_ACTIVE_BY_USER)?,
            transactions_by_user: db.open_tree(TREE_TRANSACTIONS_BY_USER)?,
            scans: db.open_tree(TREE_SCANS)?,
            scan_details: db.open_tree(TREE_SCAN_DETAILS)?,
            resolutions: db.open_tree(TREE_RESOLUTIONS)?,
            db: Arc::new(db),
        };
        store.backfill_user_index()?;
        Ok(store)
    }

    /// Rebuild the per-user index for stores written before it existed
    fn backfill_user_index(&self) -> Result<(), StoreError> {
        if !self.transactions_by_user.is_empty() || self.transactions.is_empty() {
            return Ok(());
        }
        let rows = self.load_transactions()?;
        for row in &rows {
            self.transactions_by_user.insert(child_key(row.user_id, row.id), Vec::<u8>::new())?;
        }
        info!(transactions = rows.len(), "Per-user transaction index rebuilt");
        Ok(())
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Backend name for logging
    pub fn backend_name(&self) -> &'static str {
        "sled"
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // generate_id starts at 0; keep 0 free as "unassigned"
        Ok(self.db.generate_id()? + 1)
    }

    fn get_json<T: DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
        entity_name: &'static str,
        display_key: impl ToString,
    ) -> Result<T, StoreError> {
        match tree.get(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::not_found(entity_name, display_key)),
        }
    }

    fn put_json<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), StoreError> {
        tree.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan_values<T: DeserializeOwned>(
        iter: impl Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
    ) -> Result<Vec<T>, StoreError> {
        iter.map(|item| {
            let (_key, value) = item?;
            Ok(serde_json::from_slice(&value)?)
        })
        .collect()
    }

    /// Claim the user's active slot for `transaction_id`. Succeeds if the
    /// slot is empty or already held by the same transaction.
    fn claim_active(&self, user_id: u64, transaction_id: u64) -> Result<(), StoreError> {
        let key = id_key(user_id);
        let swap = self.active_by_user.compare_and_swap(
            key,
            None as Option<&[u8]>,
            Some(&id_key(transaction_id)[..]),
        )?;
        match swap {
            Ok(()) => Ok(()),
            Err(cas) => {
                let holder = cas.current.as_deref().map(decode_id).transpose()?;
                if holder == Some(transaction_id) {
                    Ok(())
                } else {
                    Err(StoreError::Conflict(format!(
                        "user {user_id} already holds active transaction {}",
                        holder.map_or_else(|| "?".to_string(), |h| h.to_string())
                    )))
                }
            }
        }
    }

    /// Release the slot if `transaction_id` still holds it.
    fn release_active(&self, user_id: u64, transaction_id: u64) -> Result<(), StoreError> {
        let expected = id_key(transaction_id);
        // A failed swap means someone else holds the slot; nothing to release.
        let _ = self.active_by_user.compare_and_swap(
            id_key(user_id),
            Some(&expected[..]),
            None as Option<&[u8]>,
        )?;
        Ok(())
    }

    fn load_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        Self::scan_values(self.transactions.iter())
    }

    fn load_user_transactions(&self, user_id: u64) -> Result<Vec<Transaction>, StoreError> {
        self.transactions_by_user
            .scan_prefix(id_key(user_id))
            .map(|item| {
                let (key, _) = item?;
                let id = decode_id(&key[8..])?;
                Self::get_json(&self.transactions, &id_key(id), entity::TRANSACTION, id)
            })
            .collect()
    }

    fn newest_first(rows: &mut [Transaction]) {
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
    }
}

impl CatalogImport for SledStore {
    fn import_catalog(&self, seed: &CatalogSeed) -> Result<CatalogImportStats, CatalogError> {
        seed.validate()?;

        for role in &seed.roles {
            Self::put_json(&self.roles, &id_key(role.id), role)?;
        }
        for user in &seed.users {
            Self::put_json(&self.users, &id_key(user.id), user)?;
            self.users_by_employee
                .insert(user.employee_id.as_bytes(), &id_key(user.id)[..])
                .map_err(StoreError::from)?;
        }
        for tool in &seed.tool_types {
            Self::put_json(&self.tool_types, &id_key(tool.id), tool)?;
        }
        for set in &seed.tool_sets {
            Self::put_json(&self.tool_sets, &id_key(set.id), set)?;
        }
        self.flush()?;

        let stats = CatalogImportStats {
            roles: seed.roles.len(),
            users: seed.users.len(),
            tool_types: seed.tool_types.len(),
            tool_sets: seed.tool_sets.len(),
        };
        info!(?stats, "Catalog imported");
        Ok(stats)
    }
}

#[async_trait]
impl UserRepository for SledStore {
    async fn get_by_employee_id(&self, employee_id: &str) -> Result<User, StoreError> {
        let id = self
            .users_by_employee
            .get(employee_id.as_bytes())?
            .ok_or_else(|| StoreError::not_found(entity::USER, employee_id))?;
        let id = decode_id(&id)?;
        UserRepository::get_by_id(self, id).await
    }

    async fn get_by_id(&self, id: u64) -> Result<User, StoreError> {
        Self::get_json(&self.users, &id_key(id), entity::USER, id)
    }

    async fn get_with_transactions(
        &self,
        employee_id: &str,
    ) -> Result<(User, Vec<Transaction>), StoreError> {
        let user = UserRepository::get_by_employee_id(self, employee_id).await?;
        let mut transactions = self.load_user_transactions(user.id)?;
        Self::newest_first(&mut transactions);
        Ok((user, transactions))
    }
}

#[async_trait]
impl RoleRepository for SledStore {
    async fn get_by_id(&self, id: u64) -> Result<Role, StoreError> {
        Self::get_json(&self.roles, &id_key(id), entity::ROLE, id)
    }
}

#[async_trait]
impl ToolSetRepository for SledStore {
    async fn get_by_id_with_tools(&self, id: u64) -> Result<ToolSet, StoreError> {
        let record: ToolSetRecord = Self::get_json(&self.tool_sets, &id_key(id), entity::TOOL_SET, id)?;
        let tools = record
            .tool_type_ids
            .iter()
            .map(|tool_id| {
                Self::get_json::<ToolType>(&self.tool_types, &id_key(*tool_id), entity::TOOL_TYPE, tool_id)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ToolSet {
            id: record.id,
            name: record.name,
            tools,
        })
    }
}

#[async_trait]
impl TransactionRepository for SledStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, StoreError> {
        let id = self.next_id()?;
        if new.status.is_active() {
            self.claim_active(new.user_id, id)?;
        }

        let transaction = Transaction {
            id,
            user_id: new.user_id,
            tool_set_id: new.tool_set_id,
            count_of_checks: 0,
            status: new.status,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        let written = Self::put_json(&self.transactions, &id_key(id), &transaction).and_then(|()| {
            self.transactions_by_user
                .insert(child_key(new.user_id, id), Vec::<u8>::new())
                .map(|_| ())
                .map_err(|e| {
                    let _ = self.transactions.remove(id_key(id));
                    StoreError::from(e)
                })
        });
        if let Err(e) = written {
            if new.status.is_active() {
                self.release_active(new.user_id, id)?;
            }
            return Err(e);
        }
        debug!(transaction_id = id, status = %transaction.status, "Transaction created");
        Ok(transaction)
    }

    async fn update(&self, transaction: &Transaction) -> Result<Transaction, StoreError> {
        let previous: Transaction = Self::get_json(
            &self.transactions,
            &id_key(transaction.id),
            entity::TRANSACTION,
            transaction.id,
        )?;

        if transaction.status.is_active() && !previous.status.is_active() {
            self.claim_active(transaction.user_id, transaction.id)?;
        }

        let mut stored = previous.clone();
        stored.tool_set_id = transaction.tool_set_id;
        stored.count_of_checks = transaction.count_of_checks;
        stored.status = transaction.status;
        stored.updated_at = transaction.updated_at;
        Self::put_json(&self.transactions, &id_key(stored.id), &stored)?;

        if !stored.status.is_active() && previous.status.is_active() {
            self.release_active(stored.user_id, stored.id)?;
        }
        Ok(stored)
    }

    async fn get_by_id(&self, id: u64) -> Result<Transaction, StoreError> {
        Self::get_json(&self.transactions, &id_key(id), entity::TRANSACTION, id)
    }

    async fn get_open_or_escalated_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError> {
        let Some(holder) = self.active_by_user.get(id_key(user_id))? else {
            return Ok(None);
        };
        let id = decode_id(&holder)?;
        let transaction: Transaction =
            Self::get_json(&self.transactions, &id_key(id), entity::TRANSACTION, id)?;
        Ok(transaction.status.is_active().then_some(transaction))
    }

    async fn get_latest_failed_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .load_user_transactions(user_id)?
            .into_iter()
            .filter(|t| t.status == TransactionStatus::Failed)
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id))))
    }

    async fn list(&self, status: Option<TransactionStatus>) -> Result<Vec<Transaction>, StoreError> {
        let mut rows: Vec<Transaction> = self
            .load_transactions()?
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();
        Self::newest_first(&mut rows);
        Ok(rows)
    }
}

#[async_trait]
impl ScanRepository for SledStore {
    async fn create(&self, new: NewScan) -> Result<Scan, StoreError> {
        if !self.transactions.contains_key(id_key(new.transaction_id))? {
            return Err(StoreError::not_found(entity::TRANSACTION, new.transaction_id));
        }
        let scan = Scan {
            id: self.next_id()?,
            transaction_id: new.transaction_id,
            direction: new.direction,
            image_url: new.image_url,
            debug_image_url: new.debug_image_url,
            created_at: new.created_at,
        };
        Self::put_json(&self.scans, &child_key(scan.transaction_id, scan.id), &scan)?;
        Ok(scan)
    }

    async fn list_by_transaction(&self, transaction_id: u64) -> Result<Vec<Scan>, StoreError> {
        Self::scan_values(self.scans.scan_prefix(id_key(transaction_id)))
    }
}

#[async_trait]
impl ScanDetailRepository for SledStore {
    async fn create(&self, new: NewScanDetail) -> Result<ScanDetail, StoreError> {
        let detail = ScanDetail {
            id: self.next_id()?,
            scan_id: new.scan_id,
            tool_type_id: new.tool_type_id,
            confidence: new.confidence,
            embedding: new.embedding,
            bbox: new.bbox,
        };
        Self::put_json(&self.scan_details, &child_key(detail.scan_id, detail.id), &detail)?;
        Ok(detail)
    }

    async fn list_by_scan(&self, scan_id: u64) -> Result<Vec<ScanDetail>, StoreError> {
        Self::scan_values(self.scan_details.scan_prefix(id_key(scan_id)))
    }
}

#[async_trait]
impl TransactionResolutionRepository for SledStore {
    async fn create(&self, new: NewResolution) -> Result<TransactionResolution, StoreError> {
        let resolution = TransactionResolution {
            id: self.next_id()?,
            transaction_id: new.transaction_id,
            qa_user_id: new.qa_user_id,
            reason: new.reason,
            notes: new.notes,
            tool_type_ids: new.tool_type_ids,
            created_at: new.created_at,
        };
        let value = serde_json::to_vec(&resolution)?;
        let swap = self.resolutions.compare_and_swap(
            id_key(resolution.transaction_id),
            None as Option<&[u8]>,
            Some(value),
        )?;
        if swap.is_err() {
            return Err(StoreError::Conflict(format!(
                "transaction {} already resolved",
                resolution.transaction_id
            )));
        }
        Ok(resolution)
    }

    async fn get_by_transaction(
        &self,
        transaction_id: u64,
    ) -> Result<Option<TransactionResolution>, StoreError> {
        match self.resolutions.get(id_key(transaction_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
