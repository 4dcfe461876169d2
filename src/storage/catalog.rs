//! Catalog seed: roles, users, tool types and tool sets
//!
//! Catalog management lives outside the custody engine. Deployments and
//! tests load the reference data it needs from a seed file instead.
//!
//! ```toml
//! [[roles]]
//! id = 1
//! name = "Engineer"
//!
//! [[users]]
//! id = 10
//! employee_id = "E-1001"
//! full_name = "Ivan Petrov"
//! role_id = 1
//! default_tool_set_id = 1
//!
//! [[tool_types]]
//! id = 1
//! part_number = "PN-8841"
//! name = "Torque wrench 3/8"
//! reference_embedding = [0.12, 0.98]
//!
//! [[tool_sets]]
//! id = 1
//! name = "A320 line kit"
//! tool_type_ids = [1]
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::types::{Role, ToolType, User};

/// Tool set as stored: tool types by reference, in set order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSetRecord {
    pub id: u64,
    pub name: String,
    pub tool_type_ids: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub tool_types: Vec<ToolType>,
    #[serde(default)]
    pub tool_sets: Vec<ToolSetRecord>,
}

/// Counts reported after an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogImportStats {
    pub roles: usize,
    pub users: usize,
    pub tool_types: usize,
    pub tool_sets: usize,
}

/// Catalog seed errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog I/O error ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog parse error: {0}")]
    Parse(String),
    #[error("catalog is inconsistent:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogSeed {
    /// Load a seed from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&contents).map_err(|e| CatalogError::Parse(e.to_string()))
        } else {
            toml::from_str(&contents).map_err(|e| CatalogError::Parse(e.to_string()))
        }
    }

    /// Referential integrity: unique ids and employee ids, users point at
    /// known roles and sets, sets point at known tool types.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut errors = Vec::new();

        let role_ids: HashSet<u64> = self.roles.iter().map(|r| r.id).collect();
        let tool_ids: HashSet<u64> = self.tool_types.iter().map(|t| t.id).collect();
        let set_ids: HashSet<u64> = self.tool_sets.iter().map(|s| s.id).collect();

        if role_ids.len() != self.roles.len() {
            errors.push("duplicate role id".to_string());
        }
        if tool_ids.len() != self.tool_types.len() {
            errors.push("duplicate tool type id".to_string());
        }
        if set_ids.len() != self.tool_sets.len() {
            errors.push("duplicate tool set id".to_string());
        }

        let mut user_ids = HashSet::new();
        let mut employee_ids = HashSet::new();
        for user in &self.users {
            if !user_ids.insert(user.id) {
                errors.push(format!("duplicate user id {}", user.id));
            }
            if !employee_ids.insert(user.employee_id.as_str()) {
                errors.push(format!("duplicate employee id '{}'", user.employee_id));
            }
            if !role_ids.contains(&user.role_id) {
                errors.push(format!(
                    "user '{}' references unknown role {}",
                    user.employee_id, user.role_id
                ));
            }
            if let Some(set_id) = user.default_tool_set_id {
                if !set_ids.contains(&set_id) {
                    errors.push(format!(
                        "user '{}' references unknown tool set {set_id}",
                        user.employee_id
                    ));
                }
            }
        }

        for set in &self.tool_sets {
            for tool_id in &set.tool_type_ids {
                if !tool_ids.contains(tool_id) {
                    errors.push(format!(
                        "tool set {} references unknown tool type {tool_id}",
                        set.id
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::Invalid(errors))
        }
    }
}

/// Backends that can take a catalog seed.
pub trait CatalogImport {
    /// Upsert every catalog row. Existing rows with the same id are replaced.
    fn import_catalog(&self, seed: &CatalogSeed) -> Result<CatalogImportStats, CatalogError>;
}
