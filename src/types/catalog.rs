//! Reference catalog: tool types and the tool sets engineers are issued.

use serde::{Deserialize, Serialize};

/// One kind of tool in the reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolType {
    pub id: u64,
    /// Manufacturer part number
    pub part_number: String,
    /// Display name shown to engineers and QA
    pub name: String,
    /// Reference embedding produced by the vision model for a clean sample
    pub reference_embedding: Vec<f32>,
}

impl ToolType {
    /// Compact form used in responses where the embedding is noise.
    pub fn summary(&self) -> ToolTypeSummary {
        ToolTypeSummary {
            id: self.id,
            part_number: self.part_number.clone(),
            name: self.name.clone(),
        }
    }
}

/// Tool type without its embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTypeSummary {
    pub id: u64,
    pub part_number: String,
    pub name: String,
}

/// Named, ordered collection of tool types an engineer is expected to carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSet {
    pub id: u64,
    pub name: String,
    pub tools: Vec<ToolType>,
}

impl ToolSet {
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
