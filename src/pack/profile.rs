use serde::{Deserialize, Serialize};

use crate::contract::ToolCategory;

/// Policy bundle controlling which tools a planner may see and use.
///
/// Loaded from configuration; the field set is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationProfile {
    pub name: String,
    pub allowed_categories: Vec<ToolCategory>,
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    #[serde(default)]
    pub allow_side_effects: bool,
}

impl GenerationProfile {
    /// A permissive profile: every category, nothing blocked, side effects
    /// allowed.
    pub fn permissive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_categories: vec![
                ToolCategory::Llm,
                ToolCategory::Logic,
                ToolCategory::Search,
                ToolCategory::Output,
                ToolCategory::Notify,
                ToolCategory::Compound,
                ToolCategory::Utility,
                ToolCategory::Flow,
            ],
            blocked_tools: Vec::new(),
            allow_side_effects: true,
        }
    }

    pub fn allows_category(&self, category: ToolCategory) -> bool {
        self.allowed_categories.contains(&category)
    }

    pub fn blocks_tool(&self, name: &str) -> bool {
        self.blocked_tools.iter().any(|blocked| blocked == name)
    }
}
