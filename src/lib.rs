//! toolcrib: Tool Custody Engine
//!
//! Vision-checked checkout and checkin of maintenance tool sets.
//!
//! ## Architecture
//!
//! - **Recognition**: embedding similarity and four-bucket classification
//!   of a photograph's detections against the expected tool set
//! - **Custody**: transaction state machine, checkout/checkin orchestration
//!   and QA resolution
//! - **Storage**: repository traits with in-memory and sled backends
//! - **Imaging**: photograph upload behind an `ImageStore` trait

pub mod config;
pub mod custody;
pub mod error;
pub mod imaging;
pub mod recognition;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::CustodyConfig;

// Re-export the engine surface
pub use custody::{
    CheckResponse, CustodyService, CustodySettings, QaTransactionView, RequestContext,
    TransactionDirection, TransactionSummary, VerificationResponse,
};
pub use error::{CustodyError, ErrorKind, ResultExt};

// Re-export collaborator seams
pub use imaging::{FsImageStore, ImageStore, UploadError, UploadedImage};
pub use recognition::{
    classify, Classification, ConfidenceScale, HttpRecognitionClient, RecognitionError,
    RecognitionService, ScanRequest, ScanResult, Thresholds,
};
pub use storage::{InMemoryStore, Repositories, SledStore, StoreError};

// Re-export domain types
pub use types::{
    RecognizedTool, ResolutionReason, Scan, ScanDetail, ScanDirection, ToolSet, ToolType,
    Transaction, TransactionResolution, TransactionStatus, User,
};
