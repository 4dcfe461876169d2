//! Users and roles as the custody engine sees them (read-only).

use serde::{Deserialize, Serialize};

/// Role name for maintenance engineers who borrow tools.
pub const ROLE_ENGINEER: &str = "Engineer";
/// Role name for the QA staff allowed to resolve escalated transactions.
pub const ROLE_QUALITY_AUDITOR: &str = "Quality Auditor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: u64,
    pub name: String,
}

impl Role {
    pub fn is_quality_auditor(&self) -> bool {
        self.name == ROLE_QUALITY_AUDITOR
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    /// Badge number the engineer types or scans at the station
    pub employee_id: String,
    pub full_name: String,
    pub role_id: u64,
    /// Tool set issued when a checkout does not name one.
    /// `None` falls back to the configured deployment default.
    #[serde(default)]
    pub default_tool_set_id: Option<u64>,
}
