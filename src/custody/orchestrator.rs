//! Checkout / checkin orchestration
//!
//! One call per photograph. Every call runs under the employee's lock:
//!
//! ```text
//! guard ─► tool set ─► upload ─► recognition ─► classify ─► write scan ─► write transaction
//! ```
//!
//! Nothing is written before recognition has returned, so a failed or
//! cancelled upload/recognition leaves storage untouched. The scan is
//! written before the transaction status changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::context::RequestContext;
use super::locks::KeyedLocks;
use super::scan_recorder::record_scan;
use super::state_machine::{
    checkin_guard, evaluate_checkin, evaluate_checkout, CheckinBlock, LifecycleRules,
};
use crate::config::CustodyConfig;
use crate::error::{CustodyError, ResultExt};
use crate::imaging::{ImageStore, UploadedImage};
use crate::recognition::{classify, Classification, RecognitionService, ScanRequest, ScanResult, Thresholds};
use crate::storage::Repositories;
use crate::types::{
    NewTransaction, ScanDirection, ToolSet, Transaction, TransactionStatus, User,
};

/// Which operation `check` routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Checkout,
    Checkin,
}

/// Result of one checkout or checkin photograph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResponse {
    pub transaction_id: u64,
    pub image_url: String,
    pub debug_image_url: Option<String>,
    #[serde(flatten)]
    pub classification: Classification,
    pub status: TransactionStatus,
    pub direction: TransactionDirection,
    pub count_of_checks: u32,
    /// Checkins left before the transaction goes to QA; zero unless `OPEN`
    pub attempts_remaining: u32,
}

/// Tunables the service reads on every call
#[derive(Debug, Clone)]
pub struct CustodySettings {
    pub thresholds: Thresholds,
    pub rules: LifecycleRules,
    pub default_tool_set_id: Option<u64>,
    pub recognition_confidence_floor: f32,
    pub recognition_timeout: Duration,
    pub upload_timeout: Duration,
}

impl From<&CustodyConfig> for CustodySettings {
    fn from(config: &CustodyConfig) -> Self {
        Self {
            thresholds: config.thresholds(),
            rules: LifecycleRules::from(config),
            default_tool_set_id: config.lifecycle.default_tool_set_id,
            recognition_confidence_floor: config.recognition.confidence_floor,
            recognition_timeout: config.recognition.timeout(),
            upload_timeout: config.storage.upload_timeout(),
        }
    }
}

impl Default for CustodySettings {
    fn default() -> Self {
        Self::from(&CustodyConfig::default())
    }
}

/// The custody engine: checkout, checkin and QA resolution.
pub struct CustodyService {
    pub(super) repos: Repositories,
    recognition: Arc<dyn RecognitionService>,
    images: Arc<dyn ImageStore>,
    pub(super) settings: CustodySettings,
    pub(super) user_locks: KeyedLocks<String>,
    pub(super) transaction_locks: KeyedLocks<u64>,
}

impl CustodyService {
    pub fn new(
        repos: Repositories,
        recognition: Arc<dyn RecognitionService>,
        images: Arc<dyn ImageStore>,
        settings: CustodySettings,
    ) -> Self {
        info!(
            recognition = recognition.backend_name(),
            images = images.backend_name(),
            confidence = settings.thresholds.confidence,
            similarity = settings.thresholds.similarity,
            max_checkin_attempts = settings.rules.max_checkin_attempts,
            "Custody service ready"
        );
        Self {
            repos,
            recognition,
            images,
            settings,
            user_locks: KeyedLocks::new(),
            transaction_locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &CustodySettings {
        &self.settings
    }

    /// Lock table entries currently held or awaited.
    pub fn lock_entries(&self) -> usize {
        self.user_locks.len() + self.transaction_locks.len()
    }

    /// Route a photograph to checkin when the user holds an `OPEN` or
    /// `QA VERIFICATION` transaction, otherwise to checkout.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        employee_id: &str,
        photo: &[u8],
        tool_set_id: Option<u64>,
    ) -> Result<CheckResponse, CustodyError> {
        if photo.is_empty() {
            return Err(CustodyError::EmptyImage);
        }
        let _guard = self.user_locks.lock(&employee_id.to_string()).await;

        let (user, transactions) = self
            .repos
            .users
            .get_with_transactions(employee_id)
            .await
            .op("load user")?;
        let active = transactions.into_iter().find(|t| t.status.is_active());

        match active {
            Some(transaction) => self.checkin_locked(ctx, &user, Some(transaction), photo).await,
            None => self.checkout_locked(ctx, &user, photo, tool_set_id).await,
        }
    }

    /// Hand a tool set to the engineer.
    pub async fn checkout(
        &self,
        ctx: &RequestContext,
        employee_id: &str,
        photo: &[u8],
        tool_set_id: Option<u64>,
    ) -> Result<CheckResponse, CustodyError> {
        if photo.is_empty() {
            return Err(CustodyError::EmptyImage);
        }
        let _guard = self.user_locks.lock(&employee_id.to_string()).await;
        let user = self
            .repos
            .users
            .get_by_employee_id(employee_id)
            .await
            .op("load user")?;
        self.checkout_locked(ctx, &user, photo, tool_set_id).await
    }

    /// Take the engineer's tool set back.
    pub async fn checkin(
        &self,
        ctx: &RequestContext,
        employee_id: &str,
        photo: &[u8],
    ) -> Result<CheckResponse, CustodyError> {
        if photo.is_empty() {
            return Err(CustodyError::EmptyImage);
        }
        let _guard = self.user_locks.lock(&employee_id.to_string()).await;
        let user = self
            .repos
            .users
            .get_by_employee_id(employee_id)
            .await
            .op("load user")?;
        let active = self
            .repos
            .transactions
            .get_open_or_escalated_by_user(user.id)
            .await
            .op("load active transaction")?;
        self.checkin_locked(ctx, &user, active, photo).await
    }

    async fn checkout_locked(
        &self,
        ctx: &RequestContext,
        user: &User,
        photo: &[u8],
        tool_set_id: Option<u64>,
    ) -> Result<CheckResponse, CustodyError> {
        if let Some(active) = self
            .repos
            .transactions
            .get_open_or_escalated_by_user(user.id)
            .await
            .op("load active transaction")?
        {
            warn!(
                employee_id = %user.employee_id,
                transaction_id = active.id,
                status = %active.status,
                "Checkout refused: unfinished transaction"
            );
            return Err(CustodyError::UnfinishedCheckout {
                transaction_id: active.id,
            });
        }

        let tool_set = self.resolve_tool_set(user, tool_set_id).await?;
        let (image, scan) = self.capture(ctx, photo, ScanDirection::Checkout).await?;

        let classification = classify(&scan.detections, &tool_set.tools, &self.settings.thresholds);
        let status = evaluate_checkout(
            &classification,
            tool_set.len(),
            self.settings.rules.low_confidence_floor,
        );
        if ctx.is_cancelled() {
            return Err(CustodyError::Cancelled);
        }

        // Row stays FAILED (no active slot) until its scan is on record
        let now = Utc::now();
        let mut transaction = match self
            .repos
            .transactions
            .get_latest_failed_by_user(user.id)
            .await
            .op("load failed transaction")?
        {
            Some(failed) => failed,
            None => self
                .repos
                .transactions
                .create(NewTransaction {
                    user_id: user.id,
                    tool_set_id: tool_set.id,
                    status: TransactionStatus::Failed,
                    created_at: now,
                })
                .await
                .op("create transaction")?,
        };

        record_scan(&self.repos, transaction.id, ScanDirection::Checkout, &image, &scan, now).await?;
        transaction.reopen_failed(tool_set.id, status, now)?;
        let transaction = self
            .repos
            .transactions
            .update(&transaction)
            .await
            .op("update transaction")?;

        info!(
            employee_id = %user.employee_id,
            transaction_id = transaction.id,
            tool_set_id = tool_set.id,
            status = %transaction.status,
            accepted = classification.accepted.len(),
            problems = classification.problem_count(),
            "Checkout evaluated"
        );
        Ok(self.response(transaction, image, scan, classification, TransactionDirection::Checkout))
    }

    async fn checkin_locked(
        &self,
        ctx: &RequestContext,
        user: &User,
        active: Option<Transaction>,
        photo: &[u8],
    ) -> Result<CheckResponse, CustodyError> {
        let Some(mut transaction) = active else {
            warn!(employee_id = %user.employee_id, "Checkin refused: nothing to return");
            return Err(CustodyError::NothingToReturn);
        };

        if let Err(block) = checkin_guard(&transaction, &self.settings.rules) {
            warn!(
                employee_id = %user.employee_id,
                transaction_id = transaction.id,
                count_of_checks = transaction.count_of_checks,
                ?block,
                "Checkin refused"
            );
            return Err(match block {
                CheckinBlock::RetryLimit { attempts } => CustodyError::RetryLimitExceeded {
                    transaction_id: transaction.id,
                    attempts,
                },
                CheckinBlock::AwaitingQa => CustodyError::AwaitingQa {
                    transaction_id: transaction.id,
                },
            });
        }

        let tool_set = self
            .repos
            .tool_sets
            .get_by_id_with_tools(transaction.tool_set_id)
            .await
            .op("load tool set")?;
        let (image, scan) = self.capture(ctx, photo, ScanDirection::Checkin).await?;
        if ctx.is_cancelled() {
            return Err(CustodyError::Cancelled);
        }

        let now = Utc::now();
        record_scan(&self.repos, transaction.id, ScanDirection::Checkin, &image, &scan, now).await?;

        let classification = classify(&scan.detections, &tool_set.tools, &self.settings.thresholds);
        let attempt = transaction.record_checkin_attempt(&self.settings.rules, now)?;
        let status = evaluate_checkin(
            classification.manual_check.len(),
            classification.unrecognized.len(),
            classification.missing.len(),
            attempt,
            &self.settings.rules,
        );
        transaction.apply_checkin_outcome(status, now)?;
        let transaction = self
            .repos
            .transactions
            .update(&transaction)
            .await
            .op("update transaction")?;

        info!(
            employee_id = %user.employee_id,
            transaction_id = transaction.id,
            attempt,
            status = %transaction.status,
            problems = classification.problem_count(),
            "Checkin evaluated"
        );
        Ok(self.response(transaction, image, scan, classification, TransactionDirection::Checkin))
    }

    /// Explicit id, else the user's default, else the configured default.
    async fn resolve_tool_set(
        &self,
        user: &User,
        requested: Option<u64>,
    ) -> Result<ToolSet, CustodyError> {
        let id = requested
            .or(user.default_tool_set_id)
            .or(self.settings.default_tool_set_id)
            .ok_or_else(|| CustodyError::NoToolSetAssigned {
                employee_id: user.employee_id.clone(),
            })?;
        self.repos
            .tool_sets
            .get_by_id_with_tools(id)
            .await
            .op("load tool set")
    }

    /// Upload the photograph, then run recognition on the stored copy.
    async fn capture(
        &self,
        ctx: &RequestContext,
        photo: &[u8],
        direction: ScanDirection,
    ) -> Result<(UploadedImage, ScanResult), CustodyError> {
        let image = ctx
            .run(
                "upload",
                self.settings.upload_timeout,
                self.images.upload(photo, direction.as_str()),
            )
            .await
            .op("upload photo")?;

        let request = ScanRequest {
            image_id: image.key.clone(),
            image_url: image.url.clone(),
            confidence_floor: self.settings.recognition_confidence_floor,
        };
        let scan = ctx
            .run(
                "recognition",
                self.settings.recognition_timeout,
                self.recognition.scan(&request),
            )
            .await
            .op("recognize tools")?;

        Ok((image, scan))
    }

    fn response(
        &self,
        transaction: Transaction,
        image: UploadedImage,
        scan: ScanResult,
        classification: Classification,
        direction: TransactionDirection,
    ) -> CheckResponse {
        CheckResponse {
            transaction_id: transaction.id,
            image_url: image.url,
            debug_image_url: scan.debug_image_url,
            classification,
            status: transaction.status,
            direction,
            count_of_checks: transaction.count_of_checks,
            attempts_remaining: self.attempts_remaining(&transaction),
        }
    }

    pub(super) fn attempts_remaining(&self, transaction: &Transaction) -> u32 {
        if transaction.status == TransactionStatus::Open {
            self.settings
                .rules
                .max_checkin_attempts
                .saturating_sub(transaction.count_of_checks)
        } else {
            0
        }
    }
}
