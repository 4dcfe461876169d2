//! Loan records and their QA resolutions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a loan record.
///
/// Wire names are part of the external contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Tools are with the engineer
    #[serde(rename = "OPEN")]
    Open,
    /// Escalated to a QA reviewer
    #[serde(rename = "QA VERIFICATION")]
    QaVerification,
    /// Tools returned and accepted
    #[serde(rename = "CLOSED")]
    Closed,
    /// Checkout rejected before the loan became usable
    #[serde(rename = "FAILED")]
    Failed,
}

impl TransactionStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::QaVerification, Self::Closed, Self::Failed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::QaVerification => "QA VERIFICATION",
            Self::Closed => "CLOSED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Open or escalated: the user still holds the tools.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for TransactionStatus {
    type Err = ParseStatusError;

    /// Accepts the wire names plus the short `qa` alias QA screens filter by.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "QA VERIFICATION" | "QA" => Ok(Self::QaVerification),
            "CLOSED" => Ok(Self::Closed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Loan record: the aggregate root of the custody lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub user_id: u64,
    pub tool_set_id: u64,
    /// Checkin attempts consumed so far
    pub count_of_checks: u32,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transaction before the store has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: u64,
    pub tool_set_id: u64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Why QA had to step in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionReason {
    /// The vision model misjudged a correct tool set
    #[serde(rename = "MODEL_ERR")]
    ModelError,
    /// The engineer really did return the wrong or incomplete set
    #[serde(rename = "HUMAN_ERR")]
    HumanError,
}

impl ResolutionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModelError => "MODEL_ERR",
            Self::HumanError => "HUMAN_ERR",
        }
    }
}

impl std::fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resolution reason '{0}', expected MODEL_ERR or HUMAN_ERR")]
pub struct ParseReasonError(pub String);

impl FromStr for ResolutionReason {
    type Err = ParseReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "MODEL_ERR" => Ok(Self::ModelError),
            "HUMAN_ERR" => Ok(Self::HumanError),
            other => Err(ParseReasonError(other.to_string())),
        }
    }
}

/// QA decision closing an escalated transaction. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResolution {
    pub id: u64,
    pub transaction_id: u64,
    /// Store id of the QA user
    pub qa_user_id: u64,
    pub reason: ResolutionReason,
    pub notes: String,
    /// Tool types QA flagged. `None`: no annotation was supplied;
    /// `Some(empty)`: QA explicitly flagged nothing.
    #[serde(default)]
    pub tool_type_ids: Option<Vec<u64>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResolution {
    pub transaction_id: u64,
    pub qa_user_id: u64,
    pub reason: ResolutionReason,
    pub notes: String,
    pub tool_type_ids: Option<Vec<u64>>,
    pub created_at: DateTime<Utc>,
}
