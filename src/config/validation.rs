//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Unknown keys never break a config.

use std::collections::HashSet;

use super::CustodyConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `CustodyConfig`.
///
/// Kept by hand in step with `custody_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [classification]
        "classification",
        "classification.confidence_threshold",
        "classification.similarity_threshold",
        "classification.low_confidence_floor",
        // [lifecycle]
        "lifecycle",
        "lifecycle.max_checkin_attempts",
        "lifecycle.qa_escalation_problem_count",
        "lifecycle.default_tool_set_id",
        // [recognition]
        "recognition",
        "recognition.base_url",
        "recognition.timeout_secs",
        "recognition.confidence_floor",
        "recognition.class_id_offset",
        "recognition.confidence_scale",
        // [storage]
        "storage",
        "storage.db_path",
        "storage.image_root",
        "storage.public_base_url",
        "storage.upload_timeout_secs",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3, if any.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then(ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // serde reports parse errors later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

fn check_unit_interval(value: f64, name: &str, errors: &mut Vec<String>) {
    // NaN comparisons silently pass
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        errors.push(format!("{name} = {value} must be within 0.0..=1.0"));
    }
}

/// Range checks on a parsed config.
///
/// Returns (errors, warnings). Errors make the config unusable; warnings
/// flag values that work but are probably a mistake.
pub fn validate_ranges(config: &CustodyConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let c = &config.classification;
    check_unit_interval(
        f64::from(c.confidence_threshold),
        "classification.confidence_threshold",
        &mut errors,
    );
    check_unit_interval(c.similarity_threshold, "classification.similarity_threshold", &mut errors);
    check_unit_interval(
        f64::from(c.low_confidence_floor),
        "classification.low_confidence_floor",
        &mut errors,
    );
    check_unit_interval(
        f64::from(config.recognition.confidence_floor),
        "recognition.confidence_floor",
        &mut errors,
    );

    if c.low_confidence_floor > c.confidence_threshold {
        warnings.push(ValidationWarning {
            field: "classification.low_confidence_floor".to_string(),
            message: format!(
                "low_confidence_floor ({}) is above confidence_threshold ({}); every manual check will fail checkout",
                c.low_confidence_floor, c.confidence_threshold
            ),
            suggestion: None,
        });
    }
    if c.similarity_threshold < 0.5 {
        warnings.push(ValidationWarning {
            field: "classification.similarity_threshold".to_string(),
            message: format!(
                "similarity_threshold = {:.2} is unusually permissive",
                c.similarity_threshold
            ),
            suggestion: None,
        });
    }

    let l = &config.lifecycle;
    if l.max_checkin_attempts == 0 {
        errors.push("lifecycle.max_checkin_attempts must be > 0".to_string());
    }
    if l.qa_escalation_problem_count == 0 {
        errors.push("lifecycle.qa_escalation_problem_count must be > 0".to_string());
    }

    let r = &config.recognition;
    if !(r.base_url.starts_with("http://") || r.base_url.starts_with("https://")) {
        errors.push(format!(
            "recognition.base_url = '{}' must be an http(s) URL",
            r.base_url
        ));
    }
    if r.timeout_secs == 0 {
        errors.push("recognition.timeout_secs must be > 0".to_string());
    }

    let s = &config.storage;
    if s.upload_timeout_secs == 0 {
        errors.push("storage.upload_timeout_secs must be > 0".to_string());
    }
    if s.public_base_url.trim().is_empty() {
        errors.push("storage.public_base_url must not be empty".to_string());
    }

    (errors, warnings)
}
