//! Transaction state machine
//!
//! ```text
//!   checkout ──► OPEN ──checkin──► CLOSED
//!      │          │  ▲
//!      │          │  └─ checkin with problems, attempts left
//!      │          └───checkin──► QA VERIFICATION ──verify──► CLOSED
//!      └──► FAILED ──next checkout──► OPEN | FAILED (same row)
//! ```
//!
//! Evaluation functions are pure. Transitions are methods on
//! [`Transaction`] and refuse anything the diagram does not allow.

use chrono::{DateTime, Utc};

use crate::config::CustodyConfig;
use crate::recognition::Classification;
use crate::types::{Transaction, TransactionStatus};

/// Retry and escalation limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleRules {
    pub max_checkin_attempts: u32,
    pub qa_escalation_problem_count: usize,
    pub low_confidence_floor: f32,
}

impl Default for LifecycleRules {
    fn default() -> Self {
        Self::from(&CustodyConfig::default())
    }
}

impl From<&CustodyConfig> for LifecycleRules {
    fn from(config: &CustodyConfig) -> Self {
        Self {
            max_checkin_attempts: config.lifecycle.max_checkin_attempts,
            qa_escalation_problem_count: config.lifecycle.qa_escalation_problem_count,
            low_confidence_floor: config.classification.low_confidence_floor,
        }
    }
}

/// Illegal transition attempted on a transaction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("transaction {id} is {status} and cannot {action}")]
    WrongStatus {
        id: u64,
        status: TransactionStatus,
        action: &'static str,
    },
    #[error("transaction {id} has used all {attempts} checkin attempts")]
    AttemptsExhausted { id: u64, attempts: u32 },
    #[error("{outcome} is not a valid {action} outcome")]
    InvalidOutcome {
        outcome: TransactionStatus,
        action: &'static str,
    },
}

/// Why a checkin is refused before anything is uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinBlock {
    RetryLimit { attempts: u32 },
    AwaitingQa,
}

/// Status of a checkout given its classification.
///
/// `Failed` when anything is missing or unrecognized, when the matched
/// count differs from the set size, or when a manual-check detection is
/// below `low_confidence_floor`. Otherwise `Open`, even with manual checks.
pub fn evaluate_checkout(
    classification: &Classification,
    set_size: usize,
    low_confidence_floor: f32,
) -> TransactionStatus {
    let weak_manual_check = classification
        .manual_check
        .iter()
        .any(|c| c.tool.confidence < low_confidence_floor);

    if !classification.missing.is_empty()
        || !classification.unrecognized.is_empty()
        || classification.matched_count() != set_size
        || weak_manual_check
    {
        TransactionStatus::Failed
    } else {
        TransactionStatus::Open
    }
}

/// Status after a checkin. `count_of_checks` already includes this attempt.
pub fn evaluate_checkin(
    manual: usize,
    unrecognized: usize,
    missing: usize,
    count_of_checks: u32,
    rules: &LifecycleRules,
) -> TransactionStatus {
    let problems = manual + unrecognized + missing;
    if problems == 0 {
        TransactionStatus::Closed
    } else if problems >= rules.qa_escalation_problem_count
        || count_of_checks >= rules.max_checkin_attempts
    {
        TransactionStatus::QaVerification
    } else {
        TransactionStatus::Open
    }
}

/// Guards evaluated before a checkin touches storage or the model. The
/// retry limit is checked first: a transaction escalated by running out of
/// attempts reports that rather than the escalation.
pub fn checkin_guard(transaction: &Transaction, rules: &LifecycleRules) -> Result<(), CheckinBlock> {
    if transaction.count_of_checks >= rules.max_checkin_attempts {
        return Err(CheckinBlock::RetryLimit {
            attempts: transaction.count_of_checks,
        });
    }
    if transaction.status == TransactionStatus::QaVerification {
        return Err(CheckinBlock::AwaitingQa);
    }
    Ok(())
}

impl Transaction {
    /// Consume one checkin attempt. Only an `OPEN` transaction with
    /// attempts left can be checked in.
    pub fn record_checkin_attempt(
        &mut self,
        rules: &LifecycleRules,
        now: DateTime<Utc>,
    ) -> Result<u32, TransitionError> {
        if self.status != TransactionStatus::Open {
            return Err(self.wrong_status("record a checkin"));
        }
        if self.count_of_checks >= rules.max_checkin_attempts {
            return Err(TransitionError::AttemptsExhausted {
                id: self.id,
                attempts: self.count_of_checks,
            });
        }
        self.count_of_checks += 1;
        self.updated_at = now;
        Ok(self.count_of_checks)
    }

    /// Apply the evaluated checkin status.
    pub fn apply_checkin_outcome(
        &mut self,
        outcome: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != TransactionStatus::Open {
            return Err(self.wrong_status("complete a checkin"));
        }
        if outcome == TransactionStatus::Failed {
            return Err(TransitionError::InvalidOutcome {
                outcome,
                action: "checkin",
            });
        }
        self.status = outcome;
        self.updated_at = now;
        Ok(())
    }

    /// QA verdict: `QA VERIFICATION` becomes `CLOSED`.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TransactionStatus::QaVerification {
            return Err(self.wrong_status("be resolved"));
        }
        self.status = TransactionStatus::Closed;
        self.updated_at = now;
        Ok(())
    }

    /// Reuse a `FAILED` row for a new checkout attempt.
    pub fn reopen_failed(
        &mut self,
        tool_set_id: u64,
        outcome: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != TransactionStatus::Failed {
            return Err(self.wrong_status("be reused for checkout"));
        }
        if !matches!(outcome, TransactionStatus::Open | TransactionStatus::Failed) {
            return Err(TransitionError::InvalidOutcome {
                outcome,
                action: "checkout",
            });
        }
        self.tool_set_id = tool_set_id;
        self.status = outcome;
        self.count_of_checks = 0;
        self.updated_at = now;
        Ok(())
    }

    fn wrong_status(&self, action: &'static str) -> TransitionError {
        TransitionError::WrongStatus {
            id: self.id,
            status: self.status,
            action,
        }
    }
}
