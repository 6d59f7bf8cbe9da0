use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contract::ParamType;

/// Error policy applied when a step does not succeed.
///
/// The procedure-level policy is the default for every step; a step may
/// override it with its own `on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Abort the run on the first non-successful step.
    #[default]
    Fail,
    /// Record the step as skipped and keep going; downstream references to
    /// its data resolve to null.
    Skip,
    /// Record the failure as returned and keep going.
    Continue,
}

impl OnError {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Fail => "fail",
            OnError::Skip => "skip",
            OnError::Continue => "continue",
        }
    }
}

/// A caller-facing parameter declared by a procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One invocation of one tool, with templated parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    /// Template string; when present the step only runs if it renders truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Legacy single-step iteration binding. Prefer the `foreach` flow tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,
    /// Branch name to sub-step list; only meaningful on flow-primitive steps.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<String, Vec<Step>>,
}

impl Step {
    /// The error policy in effect for this step given the procedure default.
    pub fn effective_policy(&self, procedure_default: OnError) -> OnError {
        self.on_error.unwrap_or(procedure_default)
    }
}

/// A declarative procedure: an ordered list of steps over registered tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureDefinition {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub on_error: OnError,
    pub steps: Vec<Step>,
}

impl ProcedureDefinition {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
