//! Custody engine
//!
//! Checkout and checkin of tool sets against a photograph, retry limits,
//! QA escalation and resolution.

pub mod context;
pub mod locks;
mod orchestrator;
mod qa;
mod scan_recorder;
pub mod state_machine;

pub use context::RequestContext;
pub use locks::{KeyedGuard, KeyedLocks};
pub use orchestrator::{CheckResponse, CustodyService, CustodySettings, TransactionDirection};
pub use qa::{QaTransactionView, TransactionSummary, VerificationResponse};
pub use state_machine::{
    checkin_guard, evaluate_checkin, evaluate_checkout, CheckinBlock, LifecycleRules,
    TransitionError,
};
