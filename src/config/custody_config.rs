//! Custody engine configuration
//!
//! All thresholds, timeouts and storage locations the engine reads at
//! runtime. Every section is optional in the file; missing fields fall
//! back to [`super::defaults`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::recognition::{ConfidenceScale, Thresholds};

/// Root configuration loaded from `toolcrib.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Recognition acceptance thresholds
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Checkin retry and escalation rules
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Recognition service endpoint
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Database and image storage
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CustodyConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TOOLCRIB_CONFIG` environment variable
    /// 2. `./toolcrib.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys are logged, not fatal.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject impossible values; log suspicious ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Acceptance thresholds in the form the classifier takes.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.classification.confidence_threshold,
            similarity: self.classification.similarity_threshold,
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[source] toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Minimum model confidence for acceptance (0..=1)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Minimum embedding similarity for acceptance (0..=1)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Manual-check detections below this fail a checkout
    #[serde(default = "default_low_confidence_floor")]
    pub low_confidence_floor: f32,
}

fn default_confidence_threshold() -> f32 { defaults::CONFIDENCE_THRESHOLD }
fn default_similarity_threshold() -> f64 { defaults::SIMILARITY_THRESHOLD }
fn default_low_confidence_floor() -> f32 { defaults::LOW_CONFIDENCE_FLOOR }

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            similarity_threshold: default_similarity_threshold(),
            low_confidence_floor: default_low_confidence_floor(),
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Checkins allowed before the transaction escalates
    #[serde(default = "default_max_checkin_attempts")]
    pub max_checkin_attempts: u32,

    /// Problems in a single checkin that escalate immediately
    #[serde(default = "default_qa_escalation_problem_count")]
    pub qa_escalation_problem_count: usize,

    /// Tool set used when neither the request nor the user names one
    #[serde(default)]
    pub default_tool_set_id: Option<u64>,
}

fn default_max_checkin_attempts() -> u32 { defaults::MAX_CHECKIN_ATTEMPTS }
fn default_qa_escalation_problem_count() -> usize { defaults::QA_ESCALATION_PROBLEM_COUNT }

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_checkin_attempts: default_max_checkin_attempts(),
            qa_escalation_problem_count: default_qa_escalation_problem_count(),
            default_tool_set_id: None,
        }
    }
}

// ============================================================================
// Recognition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_recognition_base_url")]
    pub base_url: String,

    #[serde(default = "default_recognition_timeout_secs")]
    pub timeout_secs: u64,

    /// Detection floor sent to the model
    #[serde(default = "default_recognition_confidence_floor")]
    pub confidence_floor: f32,

    /// Added to the model's zero-based class index to get a tool type id
    #[serde(default = "default_class_id_offset")]
    pub class_id_offset: u64,

    /// `unit` (0..1) or `percent` (0..100); no per-value guessing
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: ConfidenceScale,
}

fn default_recognition_base_url() -> String { defaults::RECOGNITION_BASE_URL.to_string() }
fn default_recognition_timeout_secs() -> u64 { defaults::RECOGNITION_TIMEOUT_SECS }
fn default_recognition_confidence_floor() -> f32 { defaults::RECOGNITION_CONFIDENCE_FLOOR }
fn default_class_id_offset() -> u64 { defaults::CLASS_ID_OFFSET }
fn default_confidence_scale() -> ConfidenceScale { defaults::CONFIDENCE_SCALE }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            base_url: default_recognition_base_url(),
            timeout_secs: default_recognition_timeout_secs(),
            confidence_floor: default_recognition_confidence_floor(),
            class_id_offset: default_class_id_offset(),
            confidence_scale: default_confidence_scale(),
        }
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled database directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory uploaded photos are written under
    #[serde(default = "default_image_root")]
    pub image_root: PathBuf,

    /// URL prefix under which `image_root` is served
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_db_path() -> PathBuf { PathBuf::from(defaults::DB_PATH) }
fn default_image_root() -> PathBuf { PathBuf::from(defaults::IMAGE_ROOT) }
fn default_public_base_url() -> String { defaults::PUBLIC_BASE_URL.to_string() }
fn default_upload_timeout_secs() -> u64 { defaults::UPLOAD_TIMEOUT_SECS }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            image_root: default_image_root(),
            public_base_url: default_public_base_url(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl StorageConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}
