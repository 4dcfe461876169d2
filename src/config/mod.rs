//! Custody Configuration Module
//!
//! Thresholds, retry rules, recognition endpoint and storage locations,
//! loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `TOOLCRIB_CONFIG` environment variable (path to TOML file)
//! 2. `toolcrib.toml` in the current working directory
//! 3. Built-in defaults from [`defaults`]
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(CustodyConfig::load());
//!
//! // Anywhere else:
//! let attempts = config::get().lifecycle.max_checkin_attempts;
//! ```

mod custody_config;
pub mod defaults;
pub mod validation;

pub use custody_config::*;

use std::sync::OnceLock;

static CUSTODY_CONFIG: OnceLock<CustodyConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: CustodyConfig) {
    if CUSTODY_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// The global configuration.
///
/// Falls back to built-in defaults when `init()` was never called.
pub fn get() -> &'static CustodyConfig {
    CUSTODY_CONFIG.get_or_init(|| {
        tracing::warn!("config::get() before config::init(), using defaults");
        CustodyConfig::default()
    })
}

pub fn is_initialized() -> bool {
    CUSTODY_CONFIG.get().is_some()
}
