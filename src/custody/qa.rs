//! QA resolution workflow and review screens
//!
//! A transaction lands in `QA VERIFICATION` when a checkin finds too many
//! problems or runs out of attempts. A Quality Auditor looks at the latest
//! photograph and closes it with a reason: the model got it wrong, or the
//! engineer did.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::context::RequestContext;
use super::orchestrator::CustodyService;
use crate::error::{CustodyError, ResultExt};
use crate::recognition::{classify, Classification};
use crate::types::{
    NewResolution, ResolutionReason, Scan, ScanDetail, Transaction, TransactionResolution,
    TransactionStatus, User,
};

/// Confirmation returned by [`CustodyService::verify`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResponse {
    pub resolution_id: u64,
    pub transaction_id: u64,
    pub qa_employee_id: String,
    pub qa_full_name: String,
    pub reason: ResolutionReason,
    pub notes: String,
    pub tool_type_ids: Option<Vec<u64>>,
    pub resolved_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

/// One row of the QA transaction list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub transaction_id: u64,
    pub employee_id: String,
    pub full_name: String,
    pub tool_set_id: u64,
    pub status: TransactionStatus,
    pub count_of_checks: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// QA review screen for one transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaTransactionView {
    pub transaction: Transaction,
    pub employee_id: String,
    pub full_name: String,
    pub tool_set_name: String,
    /// Most recent photograph
    pub scan: Scan,
    /// Buckets recomputed from the scan's stored detections
    #[serde(flatten)]
    pub classification: Classification,
    pub resolution: Option<TransactionResolution>,
}

impl CustodyService {
    /// Close an escalated transaction with a QA verdict.
    ///
    /// `reason` must be `MODEL_ERR` or `HUMAN_ERR`. `tool_type_ids` is kept
    /// as given: `None` means QA annotated nothing, `Some(vec![])` means QA
    /// explicitly flagged no tools.
    ///
    /// Runs under the holder's user lock and then the transaction lock, so
    /// it never interleaves with the holder's checkin. If an earlier call
    /// recorded the resolution but failed to close the transaction, this
    /// call closes it against that stored resolution.
    pub async fn verify(
        &self,
        ctx: &RequestContext,
        transaction_id: u64,
        qa_employee_id: &str,
        reason: &str,
        notes: &str,
        tool_type_ids: Option<Vec<u64>>,
    ) -> Result<VerificationResponse, CustodyError> {
        let reason: ResolutionReason = reason.parse()?;
        ctx.ensure_active()?;

        let qa_user = self
            .repos
            .users
            .get_by_employee_id(qa_employee_id)
            .await
            .op("load QA user")?;
        let role = self
            .repos
            .roles
            .get_by_id(qa_user.role_id)
            .await
            .op("load QA role")?;
        if !role.is_quality_auditor() {
            warn!(employee_id = %qa_employee_id, role = %role.name, "Verification refused: not a Quality Auditor");
            return Err(CustodyError::NotQualityAuditor {
                employee_id: qa_employee_id.to_string(),
            });
        }

        let holder_id = self
            .repos
            .transactions
            .get_by_id(transaction_id)
            .await
            .op("load transaction")?
            .user_id;
        let holder = self
            .repos
            .users
            .get_by_id(holder_id)
            .await
            .op("load transaction holder")?;
        let _user_guard = self.user_locks.lock(&holder.employee_id).await;
        let _transaction_guard = self.transaction_locks.lock(&transaction_id).await;

        let mut transaction = self
            .repos
            .transactions
            .get_by_id(transaction_id)
            .await
            .op("load transaction")?;
        if transaction.status != TransactionStatus::QaVerification {
            warn!(transaction_id, status = %transaction.status, "Verification refused: not escalated");
            return Err(CustodyError::NotEscalated {
                transaction_id,
                status: transaction.status,
            });
        }

        let now = Utc::now();
        let existing = self
            .repos
            .resolutions
            .get_by_transaction(transaction_id)
            .await
            .op("load resolution")?;
        let resolution = match existing {
            Some(resolution) => {
                warn!(
                    transaction_id,
                    resolution_id = resolution.id,
                    "Transaction already resolved but still in QA, closing it"
                );
                resolution
            }
            None => self
                .repos
                .resolutions
                .create(NewResolution {
                    transaction_id,
                    qa_user_id: qa_user.id,
                    reason,
                    notes: notes.to_string(),
                    tool_type_ids,
                    created_at: now,
                })
                .await
                .op("record resolution")?,
        };

        transaction.resolve(now)?;
        let transaction = self
            .repos
            .transactions
            .update(&transaction)
            .await
            .op("close transaction")?;

        info!(
            transaction_id,
            qa_employee_id = %qa_user.employee_id,
            reason = %resolution.reason,
            "Transaction resolved by QA"
        );
        Ok(VerificationResponse {
            resolution_id: resolution.id,
            transaction_id,
            qa_employee_id: qa_user.employee_id,
            qa_full_name: qa_user.full_name,
            reason: resolution.reason,
            notes: resolution.notes,
            tool_type_ids: resolution.tool_type_ids,
            resolved_at: resolution.created_at,
            status: transaction.status,
        })
    }

    /// Transactions for the QA list, most recently updated first.
    pub async fn list_transactions(
        &self,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<TransactionSummary>, CustodyError> {
        let transactions = self
            .repos
            .transactions
            .list(status)
            .await
            .op("list transactions")?;

        let mut users: HashMap<u64, User> = HashMap::new();
        let mut rows = Vec::with_capacity(transactions.len());
        for t in transactions {
            if !users.contains_key(&t.user_id) {
                let user = self
                    .repos
                    .users
                    .get_by_id(t.user_id)
                    .await
                    .op("load transaction holder")?;
                users.insert(t.user_id, user);
            }
            let (employee_id, full_name) = users
                .get(&t.user_id)
                .map(|u| (u.employee_id.clone(), u.full_name.clone()))
                .unwrap_or_default();
            rows.push(TransactionSummary {
                transaction_id: t.id,
                employee_id,
                full_name,
                tool_set_id: t.tool_set_id,
                status: t.status,
                count_of_checks: t.count_of_checks,
                created_at: t.created_at,
                updated_at: t.updated_at,
            });
        }
        Ok(rows)
    }

    /// Everything QA needs to judge one transaction.
    pub async fn qa_transaction(&self, transaction_id: u64) -> Result<QaTransactionView, CustodyError> {
        let transaction = self
            .repos
            .transactions
            .get_by_id(transaction_id)
            .await
            .op("load transaction")?;
        let holder = self
            .repos
            .users
            .get_by_id(transaction.user_id)
            .await
            .op("load transaction holder")?;
        let tool_set = self
            .repos
            .tool_sets
            .get_by_id_with_tools(transaction.tool_set_id)
            .await
            .op("load tool set")?;

        let scan = self
            .repos
            .scans
            .list_by_transaction(transaction_id)
            .await
            .op("load scans")?
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .ok_or_else(|| CustodyError::ScanNotFound(transaction_id.to_string()))?;
        let detections: Vec<_> = self
            .repos
            .scan_details
            .list_by_scan(scan.id)
            .await
            .op("load scan details")?
            .iter()
            .map(ScanDetail::to_recognized)
            .collect();
        let classification = classify(&detections, &tool_set.tools, &self.settings.thresholds);

        let resolution = self
            .repos
            .resolutions
            .get_by_transaction(transaction_id)
            .await
            .op("load resolution")?;

        Ok(QaTransactionView {
            transaction,
            employee_id: holder.employee_id,
            full_name: holder.full_name,
            tool_set_name: tool_set.name,
            scan,
            classification,
            resolution,
        })
    }
}
