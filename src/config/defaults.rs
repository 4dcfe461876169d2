//! System-wide default constants.
//!
//! Every tunable the config file can override starts here. Grouped by
//! subsystem.

use crate::recognition::ConfidenceScale;

// ============================================================================
// Classification
// ============================================================================

/// Minimum recognition confidence for a detection to be accepted.
pub const CONFIDENCE_THRESHOLD: f32 = 0.98;

/// Minimum cosine similarity between a detection's embedding and the
/// catalog reference embedding for the detection to be accepted.
pub const SIMILARITY_THRESHOLD: f64 = 0.90;

/// Manual-check detections below this confidence fail a checkout outright.
pub const LOW_CONFIDENCE_FLOOR: f32 = 0.50;

// ============================================================================
// Lifecycle
// ============================================================================

/// Checkin attempts allowed per transaction before it escalates to QA.
pub const MAX_CHECKIN_ATTEMPTS: u32 = 3;

/// Problem detections (manual + unrecognized + missing) in one checkin that
/// escalate straight to QA.
pub const QA_ESCALATION_PROBLEM_COUNT: usize = 4;

// ============================================================================
// Recognition service
// ============================================================================

pub const RECOGNITION_BASE_URL: &str = "http://127.0.0.1:8000";

/// Per-call timeout for the recognition service (seconds).
pub const RECOGNITION_TIMEOUT_SECS: u64 = 30;

/// Detection floor passed to the model as `threshold`.
pub const RECOGNITION_CONFIDENCE_FLOOR: f32 = 0.5;

/// The model numbers classes from zero; catalog ids start at one.
pub const CLASS_ID_OFFSET: u64 = 1;

/// The model reports confidence as a fraction.
pub const CONFIDENCE_SCALE: ConfidenceScale = ConfidenceScale::Unit;

// ============================================================================
// Storage
// ============================================================================

pub const DB_PATH: &str = "./data/toolcrib.db";

pub const IMAGE_ROOT: &str = "./data/images";

pub const PUBLIC_BASE_URL: &str = "http://127.0.0.1:8080/images";

/// Per-call timeout for image uploads (seconds).
pub const UPLOAD_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Config file discovery
// ============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TOOLCRIB_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "toolcrib.toml";
