//! Domain types shared across the custody engine.

pub mod catalog;
pub mod recognition;
pub mod scan;
pub mod transaction;
pub mod user;

pub use catalog::{ToolSet, ToolType, ToolTypeSummary};
pub use recognition::{BoundingBox, RecognizedTool};
pub use scan::{NewScan, NewScanDetail, Scan, ScanDetail, ScanDirection};
pub use transaction::{
    NewResolution, NewTransaction, ParseReasonError, ParseStatusError, ResolutionReason,
    Transaction, TransactionResolution, TransactionStatus,
};
pub use user::{Role, User, ROLE_ENGINEER, ROLE_QUALITY_AUDITOR};
