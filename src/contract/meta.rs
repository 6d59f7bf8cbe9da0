use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Categories for organizing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Llm,
    Logic,
    Search,
    Output,
    Notify,
    Compound,
    Utility,
    Flow,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Llm => "llm",
            ToolCategory::Logic => "logic",
            ToolCategory::Search => "search",
            ToolCategory::Output => "output",
            ToolCategory::Notify => "notify",
            ToolCategory::Compound => "compound",
            ToolCategory::Utility => "utility",
            ToolCategory::Flow => "flow",
        }
    }
}

/// Hint to planners about how much content a tool returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadProfile {
    Thin,
    #[default]
    Full,
    Summary,
}

/// Where a tool may be used: by procedure authors, by free-form agents,
/// or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureProfile {
    pub procedure: bool,
    pub agent: bool,
}

impl Default for ExposureProfile {
    fn default() -> Self {
        Self {
            procedure: true,
            agent: true,
        }
    }
}

/// JSON-Schema subset types a parameter or output can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }

    /// Bare JSON Schema fragment for this type. `Any` is opaque: `{}`.
    pub fn schema_fragment(&self) -> Value {
        match self {
            ParamType::Any => Value::Object(Map::new()),
            other => serde_json::json!({ "type": other.as_str() }),
        }
    }

    /// Whether a concrete JSON value conforms to this type. Integers are
    /// accepted where numbers are expected, not the other way around.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }
}

/// Declaration of a single tool input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Item type for array parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ParamType>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    /// Full schema fragment override for parameters whose shape the simple
    /// type model cannot express (e.g. the shared `where` fragment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            items: None,
            description: String::new(),
            required: true,
            default: None,
            enum_values: None,
            example: None,
            schema: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn array(name: impl Into<String>, items: ParamType) -> Self {
        Self {
            items: Some(items),
            ..Self::new(name, ParamType::Array)
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    pub fn enum_values(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// JSON Schema property for this parameter. Enum constraints on array
    /// parameters land inside `items`, on scalars at the top level.
    pub fn to_property_schema(&self) -> Value {
        if let Some(schema) = &self.schema {
            return schema.clone();
        }

        let mut prop = match self.ty.schema_fragment() {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if self.ty == ParamType::Array {
            let mut items = match self.items.unwrap_or(ParamType::Any).schema_fragment() {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            if let Some(values) = &self.enum_values {
                items.insert("enum".into(), Value::Array(values.clone()));
            }
            if !items.is_empty() {
                prop.insert("items".into(), Value::Object(items));
            }
        } else if let Some(values) = &self.enum_values {
            prop.insert("enum".into(), Value::Array(values.clone()));
        }

        if !self.description.is_empty() {
            prop.insert("description".into(), Value::String(self.description.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(example) = &self.example {
            prop.insert("examples".into(), Value::Array(vec![example.clone()]));
        }

        Value::Object(prop)
    }
}

/// Documentation for one field of a structured tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default)]
    pub nullable: bool,
}

impl OutputField {
    pub fn new(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            example: None,
            nullable: false,
        }
    }

    pub fn example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn to_property_schema(&self) -> Value {
        let mut prop = match self.ty.schema_fragment() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if !self.description.is_empty() {
            prop.insert("description".into(), Value::String(self.description.clone()));
        }
        if let Some(example) = &self.example {
            prop.insert("examples".into(), Value::Array(vec![example.clone()]));
        }
        if self.nullable {
            prop.insert("nullable".into(), Value::Bool(true));
        }
        Value::Object(prop)
    }
}

/// Structured documentation of what a tool returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default)]
    pub description: String,
    /// Fields of an object output, or of each item for an array output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<OutputField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
}

impl OutputSpec {
    pub fn new(ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            ty,
            description: description.into(),
            fields: Vec::new(),
            example: None,
        }
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = OutputField>) -> Self {
        self.fields = fields.into_iter().collect();
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.example = Some(example);
        self
    }

    pub(crate) fn to_schema(&self) -> Value {
        let mut schema = match self.ty.schema_fragment() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if !self.description.is_empty() {
            schema.insert("description".into(), Value::String(self.description.clone()));
        }

        if !self.fields.is_empty() {
            let properties: Map<String, Value> = self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.to_property_schema()))
                .collect();
            match self.ty {
                ParamType::Object => {
                    schema.insert("properties".into(), Value::Object(properties));
                }
                ParamType::Array => {
                    schema.insert(
                        "items".into(),
                        serde_json::json!({ "type": "object", "properties": properties }),
                    );
                }
                _ => {}
            }
        }

        if let Some(example) = &self.example {
            schema.insert("examples".into(), Value::Array(vec![example.clone()]));
        }
        Value::Object(schema)
    }
}

/// Alternative output for a dual-mode tool (e.g. single vs. collection
/// mode), chosen deterministically by the inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputVariant {
    pub mode: String,
    pub condition: String,
    pub spec: OutputSpec,
}

/// Everything a tool declares about itself. The formal [`ToolContract`] is
/// derived from this.
///
/// [`ToolContract`]: crate::contract::ToolContract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMeta {
    pub name: String,
    pub category: ToolCategory,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_variants: Vec<OutputVariant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires_llm: bool,
    #[serde(default = "default_true")]
    pub requires_session: bool,
    #[serde(default)]
    pub side_effects: bool,
    #[serde(default = "default_true")]
    pub is_primitive: bool,
    #[serde(default)]
    pub payload_profile: PayloadProfile,
    #[serde(default)]
    pub exposure_profile: ExposureProfile,
}

fn default_version() -> String {
    "1.0.0".into()
}

impl ToolMeta {
    pub fn new(
        name: impl Into<String>,
        category: ToolCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            description: description.into(),
            version: default_version(),
            parameters: Vec::new(),
            output: None,
            output_variants: Vec::new(),
            tags: Vec::new(),
            requires_llm: false,
            requires_session: true,
            side_effects: false,
            is_primitive: true,
            payload_profile: PayloadProfile::default(),
            exposure_profile: ExposureProfile::default(),
        }
    }

    pub fn parameters(mut self, parameters: impl IntoIterator<Item = ParameterSpec>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    pub fn output(mut self, output: OutputSpec) -> Self {
        self.output = Some(output);
        self
    }

    pub fn output_variants(mut self, variants: impl IntoIterator<Item = OutputVariant>) -> Self {
        self.output_variants = variants.into_iter().collect();
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = &'static str>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires_llm(mut self) -> Self {
        self.requires_llm = true;
        self
    }

    pub fn no_session(mut self) -> Self {
        self.requires_session = false;
        self
    }

    pub fn side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }

    pub fn compound(mut self) -> Self {
        self.is_primitive = false;
        self
    }

    pub fn payload_profile(mut self, profile: PayloadProfile) -> Self {
        self.payload_profile = profile;
        self
    }

    pub fn exposure(mut self, procedure: bool, agent: bool) -> Self {
        self.exposure_profile = ExposureProfile { procedure, agent };
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Validate and normalize input parameters against the declaration:
    /// required checks, default filling, type and enum checks. Template
    /// strings pass through untouched since they resolve at run time.
    pub fn conform_params(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, ParamsError> {
        let mut conformed = Map::new();

        for spec in &self.parameters {
            match params.get(&spec.name) {
                Some(value) => {
                    conformed.insert(spec.name.clone(), value.clone());

                    if is_template(value) {
                        continue;
                    }

                    if !spec.ty.matches(value) && spec.schema.is_none() {
                        return Err(ParamsError::Type {
                            parameter: spec.name.clone(),
                            expected: spec.ty.as_str(),
                            actual: json_type_name(value),
                        });
                    }

                    if let Some(allowed) = &spec.enum_values {
                        if spec.ty == ParamType::Array {
                            if let Value::Array(items) = value {
                                for item in items {
                                    if !allowed.contains(item) {
                                        return Err(ParamsError::Enum {
                                            parameter: spec.name.clone(),
                                            value: item.clone(),
                                            allowed: allowed.clone(),
                                        });
                                    }
                                }
                            }
                        } else if !allowed.contains(value) {
                            return Err(ParamsError::Enum {
                                parameter: spec.name.clone(),
                                value: value.clone(),
                                allowed: allowed.clone(),
                            });
                        }
                    }
                }
                None if spec.required => {
                    return Err(ParamsError::MissingRequired {
                        parameter: spec.name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &spec.default {
                        conformed.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }

        // Unknown parameters pass through; tools may accept open maps.
        for (name, value) in params {
            if !conformed.contains_key(name) {
                conformed.insert(name.clone(), value.clone());
            }
        }

        Ok(conformed)
    }
}

/// A string literal containing a template marker; resolved at run time, so
/// static checks do not apply.
pub fn is_template(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.contains("{{"))
}

/// JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Missing required parameter: {parameter}")]
    MissingRequired { parameter: String },

    #[error("Parameter '{parameter}' expects type '{expected}' but got '{actual}'")]
    Type {
        parameter: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Parameter '{parameter}' value {value} not in allowed values: {allowed:?}")]
    Enum {
        parameter: String,
        value: Value,
        allowed: Vec<Value>,
    },
}
