//! Custody error type
//!
//! Every failure a caller can see is a [`CustodyError`] variant with a
//! stable [`ErrorKind`] and a stable `code()` string. Collaborator failures
//! are wrapped with the operation that hit them; `kind()`, `code()` and
//! `root()` look through the wrapping.

use std::time::Duration;

use crate::custody::TransitionError;
use crate::imaging::UploadError;
use crate::recognition::RecognitionError;
use crate::storage::{entity, StoreError};

/// Coarse error class, for callers mapping errors onto a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Upstream,
    Store,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("tool set {0} not found")]
    ToolSetNotFound(String),
    #[error("transaction {0} not found")]
    TransactionNotFound(String),
    #[error("no scan recorded for transaction {0}")]
    ScanNotFound(String),
    #[error("no tool set requested, assigned to {employee_id} or configured as default")]
    NoToolSetAssigned { employee_id: String },

    #[error("user already holds unfinished transaction {transaction_id}")]
    UnfinishedCheckout { transaction_id: u64 },
    #[error("user has no open transaction to check in")]
    NothingToReturn,
    #[error("transaction {transaction_id} used all {attempts} checkin attempts")]
    RetryLimitExceeded { transaction_id: u64, attempts: u32 },
    #[error("transaction {transaction_id} is awaiting QA verification")]
    AwaitingQa { transaction_id: u64 },
    #[error("transaction {transaction_id} is {status}, not awaiting QA")]
    NotEscalated {
        transaction_id: u64,
        status: crate::types::TransactionStatus,
    },

    #[error(transparent)]
    InvalidReason(#[from] crate::types::ParseReasonError),
    #[error("photo is empty")]
    EmptyImage,
    #[error("user {employee_id} is not a Quality Auditor")]
    NotQualityAuditor { employee_id: String },

    #[error("recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("image upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
    #[error("request cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(StoreError),
    #[error("illegal transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("{op}: {source}")]
    Op {
        op: &'static str,
        #[source]
        source: Box<CustodyError>,
    },
}

impl CustodyError {
    /// Innermost error, past any `Op` wrapping.
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Op { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::UserNotFound(_)
            | Self::ToolSetNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::ScanNotFound(_)
            | Self::NoToolSetAssigned { .. } => ErrorKind::NotFound,
            Self::UnfinishedCheckout { .. }
            | Self::NothingToReturn
            | Self::RetryLimitExceeded { .. }
            | Self::AwaitingQa { .. }
            | Self::NotEscalated { .. }
            | Self::Transition(_) => ErrorKind::Conflict,
            Self::InvalidReason(_) | Self::EmptyImage | Self::NotQualityAuditor { .. } => {
                ErrorKind::Validation
            }
            Self::Recognition(_) | Self::Upload(UploadError::Io(_) | UploadError::Rejected(_)) => {
                ErrorKind::Upstream
            }
            Self::Upload(UploadError::Empty | UploadError::InvalidHint(_)) => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Upstream,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Store(StoreError::Conflict(_)) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Store,
            // root() never returns Op
            Self::Op { source, .. } => source.kind(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self.root() {
            Self::UserNotFound(_) => "user_not_found",
            Self::ToolSetNotFound(_) => "tool_set_not_found",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::ScanNotFound(_) => "scan_not_found",
            Self::NoToolSetAssigned { .. } => "no_tool_set_assigned",
            Self::UnfinishedCheckout { .. } => "unfinished_checkout",
            Self::NothingToReturn => "nothing_to_return",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::AwaitingQa { .. } => "awaiting_qa",
            Self::NotEscalated { .. } => "not_escalated",
            Self::InvalidReason(_) => "invalid_reason",
            Self::EmptyImage => "empty_image",
            Self::NotQualityAuditor { .. } => "not_quality_auditor",
            Self::Recognition(_) => "recognition_failed",
            Self::Upload(_) => "upload_failed",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Store(_) => "store_error",
            Self::Transition(_) => "illegal_transition",
            Self::Op { source, .. } => source.code(),
        }
    }
}

/// Map store lookups onto the entity-specific variants.
impl From<StoreError> for CustodyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: name, key } => match name {
                entity::USER => Self::UserNotFound(key),
                entity::TOOL_SET => Self::ToolSetNotFound(key),
                entity::TRANSACTION => Self::TransactionNotFound(key),
                entity::SCAN => Self::ScanNotFound(key),
                _ => Self::Store(StoreError::NotFound { entity: name, key }),
            },
            other => Self::Store(other),
        }
    }
}

/// Attach the failing operation's name to an error.
pub trait ResultExt<T> {
    fn op(self, op: &'static str) -> Result<T, CustodyError>;
}

impl<T, E: Into<CustodyError>> ResultExt<T> for Result<T, E> {
    fn op(self, op: &'static str) -> Result<T, CustodyError> {
        self.map_err(|e| CustodyError::Op {
            op,
            source: Box::new(e.into()),
        })
    }
}
