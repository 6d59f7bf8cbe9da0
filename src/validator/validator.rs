use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::contract::resolve_output_fields;
use crate::contract::OutputShape;
use crate::procedure::ProcedureDefinition;
use crate::registry::ToolRegistry;
use crate::template::TEMPLATE_PATTERN;

use super::{ValidationCode, ValidationFinding, ValidationReport, ValidatorHints};

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap());

/// Step references inside templates: `steps.step_name`.
static STEP_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"steps\.([a-zA-Z_][a-zA-Z0-9_]*)").unwrap());

/// Parameter references inside templates: `params.param_name`.
static PARAM_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"params\.([a-zA-Z_][a-zA-Z0-9_]*)").unwrap());

/// Output field references: `steps.step_name.field_name`.
static OUTPUT_FIELD_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"steps\.([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)").unwrap());

static IDENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*").unwrap());

const VALID_ON_ERROR_POLICIES: &[&str] = &["fail", "skip", "continue"];

struct FlowBranchSpec {
    required_branches: &'static [&'static str],
    description: &'static str,
}

fn flow_spec(function: &str) -> Option<FlowBranchSpec> {
    match function {
        "if_branch" => Some(FlowBranchSpec {
            required_branches: &["then"],
            description: "requires 'branches.then' (else is optional)",
        }),
        "switch_branch" => Some(FlowBranchSpec {
            required_branches: &[],
            description: "requires at least one case branch (default is optional)",
        }),
        "parallel" => Some(FlowBranchSpec {
            required_branches: &[],
            description: "requires at least 2 branches",
        }),
        "foreach" => Some(FlowBranchSpec {
            required_branches: &["each"],
            description: "requires 'branches.each'",
        }),
        _ => None,
    }
}

fn json_type_of(value: &Value) -> &'static str {
    crate::contract::json_type_name(value)
}

fn is_template_str(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.contains("{{"))
}

fn str_field<'a>(step: &'a Value, key: &str) -> &'a str {
    step.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Static analyzer for procedure definitions.
///
/// Produces all findings it can in one pass per phase rather than bailing on
/// the first error; only a top-level schema failure short-circuits, since
/// deeper analysis is meaningless then.
pub struct ProcedureValidator {
    registry: Arc<ToolRegistry>,
    hints: ValidatorHints,
}

impl ProcedureValidator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        registry.initialize();
        Self {
            registry,
            hints: ValidatorHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: ValidatorHints) -> Self {
        self.hints = hints;
        self
    }

    /// Validate a typed definition by serializing it back to a document.
    pub fn validate(&self, definition: &ProcedureDefinition) -> ValidationReport {
        match definition.to_value() {
            Ok(value) => self.validate_value(&value),
            Err(e) => {
                let mut report = ValidationReport::default();
                report.errors.push(ValidationFinding::new(
                    ValidationCode::InvalidFieldType,
                    format!("Definition is not serializable: {e}"),
                    "",
                ));
                report
            }
        }
    }

    /// Validate a raw procedure document.
    pub fn validate_value(&self, definition: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        report.errors.extend(self.validate_schema(definition));
        if !report.errors.is_empty() {
            return report;
        }

        let Some(steps) = definition.get("steps").and_then(Value::as_array) else {
            return report;
        };

        // Function conformance, policies, and branch structure, per step.
        let mut step_names: HashSet<&str> = HashSet::new();
        for (idx, step) in steps.iter().enumerate() {
            let step_path = format!("steps[{idx}]");
            let step_name = str_field(step, "name");

            if step_names.contains(step_name) {
                report.errors.push(
                    ValidationFinding::new(
                        ValidationCode::DuplicateStepName,
                        format!("Duplicate step name: '{step_name}'"),
                        format!("{step_path}.name"),
                    )
                    .detail("step_name", json!(step_name)),
                );
            }
            step_names.insert(step_name);

            let func_name = str_field(step, "function");
            let empty = Map::new();
            let params = step
                .get("params")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            let func_errors = self.validate_function(func_name, params, &step_path);
            for finding in &func_errors {
                if finding.code == ValidationCode::UnknownFunction {
                    log::warn!("Validation found unknown function '{func_name}' in step '{step_name}'");
                }
            }
            report.errors.extend(func_errors);

            report.errors.extend(check_on_error(step, &step_path));

            if flow_spec(func_name).is_some() {
                report.errors.extend(self.validate_flow_branches(step, &step_path));
            }
        }

        // Declared parameter names for reference checking.
        let defined_params: BTreeSet<String> = definition
            .get("parameters")
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|p| p.get("name"))
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        // Template reference ordering and well-formedness.
        let seen = HashSet::new();
        self.validate_template_refs_in_steps(steps, &defined_params, &seen, "steps", &mut report.errors);

        // Output-field references against producing tools' output schemas.
        let (output_errors, output_warnings) = self.validate_output_field_refs(steps, "steps");
        report.errors.extend(output_errors);
        report.warnings.extend(output_warnings);

        // Advisories.
        for (idx, step) in steps.iter().enumerate() {
            let step_path = format!("steps[{idx}]");
            report.warnings.extend(self.validate_facet_filters(step, &step_path));
        }
        report.warnings.extend(self.check_function_mismatches(steps));

        report
    }

    fn validate_schema(&self, definition: &Value) -> Vec<ValidationFinding> {
        let mut errors = Vec::new();

        match definition.get("name") {
            None | Some(Value::Null) => errors.push(ValidationFinding::new(
                ValidationCode::MissingRequiredField,
                "Procedure name is required",
                "name",
            )),
            Some(Value::String(name)) if name.is_empty() => errors.push(ValidationFinding::new(
                ValidationCode::MissingRequiredField,
                "Procedure name is required",
                "name",
            )),
            Some(Value::String(_)) => {}
            Some(other) => errors.push(
                ValidationFinding::new(
                    ValidationCode::InvalidFieldType,
                    "Procedure name must be a string",
                    "name",
                )
                .detail("expected", json!("string"))
                .detail("received", json!(json_type_of(other))),
            ),
        }

        match definition.get("slug").and_then(Value::as_str) {
            None | Some("") => errors.push(ValidationFinding::new(
                ValidationCode::MissingRequiredField,
                "Procedure slug is required",
                "slug",
            )),
            Some(slug) if !SLUG_PATTERN.is_match(slug) => errors.push(
                ValidationFinding::new(
                    ValidationCode::InvalidSlugFormat,
                    "Slug must start with a lowercase letter and contain only lowercase \
                     letters, numbers, underscores, and hyphens",
                    "slug",
                )
                .detail("value", json!(slug))
                .detail("pattern", json!("^[a-z][a-z0-9_-]*$")),
            ),
            Some(_) => {}
        }

        match definition.get("steps") {
            None | Some(Value::Null) => errors.push(ValidationFinding::new(
                ValidationCode::EmptySteps,
                "At least one step is required",
                "steps",
            )),
            Some(Value::Array(steps)) if steps.is_empty() => errors.push(ValidationFinding::new(
                ValidationCode::EmptySteps,
                "At least one step is required",
                "steps",
            )),
            Some(Value::Array(steps)) => {
                for (idx, step) in steps.iter().enumerate() {
                    let step_path = format!("steps[{idx}]");

                    if !step.is_object() {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::InvalidFieldType,
                                "Step must be an object",
                                step_path,
                            )
                            .detail("expected", json!("object"))
                            .detail("received", json!(json_type_of(step))),
                        );
                        continue;
                    }

                    if str_field(step, "name").is_empty() {
                        errors.push(ValidationFinding::new(
                            ValidationCode::MissingRequiredField,
                            "Step name is required",
                            format!("{step_path}.name"),
                        ));
                    }
                    if str_field(step, "function").is_empty() {
                        errors.push(ValidationFinding::new(
                            ValidationCode::MissingRequiredField,
                            "Step function is required",
                            format!("{step_path}.function"),
                        ));
                    }
                }
            }
            Some(other) => errors.push(
                ValidationFinding::new(
                    ValidationCode::InvalidFieldType,
                    "Steps must be an array",
                    "steps",
                )
                .detail("expected", json!("array"))
                .detail("received", json!(json_type_of(other))),
            ),
        }

        if let Some(on_error) = definition.get("on_error") {
            if !on_error
                .as_str()
                .is_some_and(|p| VALID_ON_ERROR_POLICIES.contains(&p))
            {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::InvalidOnErrorPolicy,
                        format!("Invalid on_error policy: '{}'", display_value(on_error)),
                        "on_error",
                    )
                    .detail("value", on_error.clone())
                    .detail("valid_values", json!(VALID_ON_ERROR_POLICIES)),
                );
            }
        }

        match definition.get("parameters") {
            None | Some(Value::Null) => {}
            Some(Value::Array(parameters)) => {
                let mut param_names: HashSet<&str> = HashSet::new();
                for (idx, param) in parameters.iter().enumerate() {
                    let param_path = format!("parameters[{idx}]");

                    let Some(param_obj) = param.as_object() else {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::InvalidFieldType,
                                "Parameter must be an object",
                                param_path,
                            )
                            .detail("expected", json!("object"))
                            .detail("received", json!(json_type_of(param))),
                        );
                        continue;
                    };

                    let param_name = str_field(param, "name");
                    if param_name.is_empty() {
                        errors.push(ValidationFinding::new(
                            ValidationCode::MissingParameterName,
                            "Parameter name is required",
                            format!("{param_path}.name"),
                        ));
                        continue;
                    }

                    if param_names.contains(param_name) {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::DuplicateParameterName,
                                format!("Duplicate parameter name: '{param_name}'"),
                                format!("{param_path}.name"),
                            )
                            .detail("parameter_name", json!(param_name)),
                        );
                    }
                    param_names.insert(param_name);

                    let is_required = param
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let has_default =
                        param_obj.get("default").is_some_and(|d| !d.is_null());
                    if is_required && has_default {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::ContradictoryParameter,
                                format!(
                                    "Parameter '{param_name}' cannot be both required and have a \
                                     default value. If it has a default, set required: false."
                                ),
                                param_path,
                            )
                            .detail("parameter_name", json!(param_name))
                            .detail("required", json!(true))
                            .detail("default", param_obj.get("default").cloned().unwrap_or(Value::Null))
                            .detail(
                                "fix",
                                json!("Set 'required: false' since the parameter has a default value"),
                            ),
                        );
                    }
                }
            }
            Some(other) => errors.push(
                ValidationFinding::new(
                    ValidationCode::InvalidFieldType,
                    "Parameters must be an array",
                    "parameters",
                )
                .detail("expected", json!("array"))
                .detail("received", json!(json_type_of(other))),
            ),
        }

        errors
    }

    /// Tool existence, required inputs, and non-template value conformance
    /// against the tool's input schema.
    fn validate_function(
        &self,
        func_name: &str,
        params: &Map<String, Value>,
        step_path: &str,
    ) -> Vec<ValidationFinding> {
        let mut errors = Vec::new();

        let Some(contract) = self.registry.contract(func_name) else {
            errors.push(
                ValidationFinding::new(
                    ValidationCode::UnknownFunction,
                    format!("Unknown function: '{func_name}'"),
                    format!("{step_path}.function"),
                )
                .detail("function", json!(func_name))
                .detail("available", json!(self.registry.names())),
            );
            return errors;
        };

        let required_params = contract.required_inputs();
        for param_name in &required_params {
            if !params.contains_key(param_name) {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::MissingRequiredParam,
                        format!(
                            "Missing required parameter '{param_name}' for function '{func_name}'"
                        ),
                        format!("{step_path}.params.{param_name}"),
                    )
                    .detail("function", json!(func_name))
                    .detail("parameter", json!(param_name)),
                );
            }
        }

        let Some(properties) = contract.input_properties() else {
            return errors;
        };

        for (param_name, value) in params {
            let Some(prop_schema) = properties.get(param_name) else {
                // Unknown params allowed; tools may accept open maps.
                continue;
            };

            if is_template_str(value) {
                continue;
            }
            if value.is_null() && !required_params.contains(param_name) {
                continue;
            }

            let Some(expected_type) = prop_schema.get("type").and_then(Value::as_str) else {
                continue;
            };

            let matches = match expected_type {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::InvalidParamType,
                        format!(
                            "Parameter '{param_name}' for function '{func_name}' expects type \
                             '{expected_type}' but got '{}'",
                            json_type_of(value)
                        ),
                        format!("{step_path}.params.{param_name}"),
                    )
                    .detail("function", json!(func_name))
                    .detail("parameter", json!(param_name))
                    .detail("expected_type", json!(expected_type))
                    .detail("actual_type", json!(json_type_of(value))),
                );
            }

            // Enum constraints: per-item inside `items` for arrays, top-level
            // for scalars.
            if expected_type == "array" {
                let enum_values = prop_schema
                    .get("items")
                    .and_then(|items| items.get("enum"))
                    .and_then(Value::as_array);
                if let (Some(allowed), Some(items)) = (enum_values, value.as_array()) {
                    for item in items {
                        if !allowed.contains(item) {
                            errors.push(
                                ValidationFinding::new(
                                    ValidationCode::InvalidParamType,
                                    format!(
                                        "Parameter '{param_name}' for function '{func_name}' \
                                         contains invalid value '{}' not in allowed values: \
                                         {allowed:?}",
                                        display_value(item)
                                    ),
                                    format!("{step_path}.params.{param_name}"),
                                )
                                .detail("function", json!(func_name))
                                .detail("parameter", json!(param_name))
                                .detail("value", item.clone())
                                .detail("allowed_values", json!(allowed)),
                            );
                        }
                    }
                }
            } else if let Some(allowed) = prop_schema.get("enum").and_then(Value::as_array) {
                if !allowed.contains(value) {
                    errors.push(
                        ValidationFinding::new(
                            ValidationCode::InvalidParamType,
                            format!(
                                "Parameter '{param_name}' for function '{func_name}' value \
                                 '{}' not in allowed values: {allowed:?}",
                                display_value(value)
                            ),
                            format!("{step_path}.params.{param_name}"),
                        )
                        .detail("function", json!(func_name))
                        .detail("parameter", json!(param_name))
                        .detail("value", value.clone())
                        .detail("allowed_values", json!(allowed)),
                    );
                }
            }
        }

        errors
    }

    /// Branch requirements for a flow-primitive step, recursing into every
    /// branch's step list. Step-name uniqueness is scoped per branch.
    fn validate_flow_branches(&self, step: &Value, step_path: &str) -> Vec<ValidationFinding> {
        let mut errors = Vec::new();
        let func_name = str_field(step, "function");
        let step_name = str_field(step, "name");

        let Some(spec) = flow_spec(func_name) else {
            return errors;
        };

        let branches = match step.get("branches") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::InvalidBranchStructure,
                        "'branches' must be an object mapping branch names to step lists",
                        format!("{step_path}.branches"),
                    )
                    .detail("expected", json!("object"))
                    .detail("received", json!(json_type_of(other))),
                );
                return errors;
            }
        };
        let Some(branches) = branches else {
            errors.push(
                ValidationFinding::new(
                    ValidationCode::MissingRequiredBranch,
                    format!(
                        "Flow function '{func_name}' requires a 'branches' field. {}",
                        spec.description
                    ),
                    format!("{step_path}.branches"),
                )
                .detail("function", json!(func_name))
                .detail("step_name", json!(step_name))
                .detail("required_branches", json!(spec.required_branches)),
            );
            return errors;
        };

        for required_branch in spec.required_branches {
            match branches.get(*required_branch) {
                None => errors.push(
                    ValidationFinding::new(
                        ValidationCode::MissingRequiredBranch,
                        format!("Flow function '{func_name}' requires branch '{required_branch}'"),
                        format!("{step_path}.branches.{required_branch}"),
                    )
                    .detail("function", json!(func_name))
                    .detail("missing_branch", json!(required_branch)),
                ),
                Some(branch) if branch_is_empty(branch) => errors.push(
                    ValidationFinding::new(
                        ValidationCode::EmptyBranch,
                        format!("Branch '{required_branch}' must contain at least one step"),
                        format!("{step_path}.branches.{required_branch}"),
                    )
                    .detail("function", json!(func_name))
                    .detail("branch", json!(required_branch)),
                ),
                Some(_) => {}
            }
        }

        if func_name == "switch_branch" {
            let case_count = branches.keys().filter(|k| k.as_str() != "default").count();
            if case_count < 1 {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::InsufficientBranches,
                        "switch_branch requires at least one case branch (not counting 'default')",
                        format!("{step_path}.branches"),
                    )
                    .detail("function", json!(func_name))
                    .detail("branch_count", json!(case_count))
                    .detail("min_required", json!(1)),
                );
            }
        } else if func_name == "parallel" && branches.len() < 2 {
            errors.push(
                ValidationFinding::new(
                    ValidationCode::InsufficientBranches,
                    format!(
                        "parallel requires at least 2 branches for concurrent execution \
                         (found {})",
                        branches.len()
                    ),
                    format!("{step_path}.branches"),
                )
                .detail("function", json!(func_name))
                .detail("branch_count", json!(branches.len()))
                .detail("min_required", json!(2)),
            );
        }

        for (branch_name, branch_steps) in branches {
            let branch_path = format!("{step_path}.branches.{branch_name}");

            // Required-and-empty was already reported above.
            if spec.required_branches.contains(&branch_name.as_str())
                && branch_is_empty(branch_steps)
            {
                continue;
            }

            let Some(branch_list) = branch_steps.as_array() else {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::InvalidBranchStructure,
                        format!("Branch '{branch_name}' must be a list of steps"),
                        branch_path,
                    )
                    .detail("expected", json!("array"))
                    .detail("received", json!(json_type_of(branch_steps))),
                );
                continue;
            };

            if branch_list.is_empty() {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::EmptyBranch,
                        format!("Branch '{branch_name}' must contain at least one step"),
                        branch_path,
                    )
                    .detail("branch", json!(branch_name)),
                );
                continue;
            }

            let mut nested_names: HashSet<&str> = HashSet::new();
            for (nested_idx, nested_step) in branch_list.iter().enumerate() {
                let nested_path = format!("{branch_path}[{nested_idx}]");

                if !nested_step.is_object() {
                    errors.push(
                        ValidationFinding::new(
                            ValidationCode::InvalidFieldType,
                            "Step must be an object",
                            nested_path,
                        )
                        .detail("expected", json!("object"))
                        .detail("received", json!(json_type_of(nested_step))),
                    );
                    continue;
                }

                let nested_name = str_field(nested_step, "name");
                let nested_func = str_field(nested_step, "function");

                if nested_name.is_empty() {
                    errors.push(ValidationFinding::new(
                        ValidationCode::MissingRequiredField,
                        "Step name is required",
                        format!("{nested_path}.name"),
                    ));
                }

                if nested_func.is_empty() {
                    errors.push(ValidationFinding::new(
                        ValidationCode::MissingRequiredField,
                        "Step function is required",
                        format!("{nested_path}.function"),
                    ));
                } else {
                    let empty = Map::new();
                    let nested_params = nested_step
                        .get("params")
                        .and_then(Value::as_object)
                        .unwrap_or(&empty);
                    errors.extend(self.validate_function(nested_func, nested_params, &nested_path));
                }

                if nested_names.contains(nested_name) {
                    errors.push(
                        ValidationFinding::new(
                            ValidationCode::DuplicateStepName,
                            format!(
                                "Duplicate step name '{nested_name}' in branch '{branch_name}'"
                            ),
                            format!("{nested_path}.name"),
                        )
                        .detail("step_name", json!(nested_name))
                        .detail("branch", json!(branch_name)),
                    );
                }
                nested_names.insert(nested_name);

                errors.extend(check_on_error(nested_step, &nested_path));

                if flow_spec(nested_func).is_some() {
                    errors.extend(self.validate_flow_branches(nested_step, &nested_path));
                }
            }
        }

        errors
    }

    /// Template reference ordering across a step list.
    ///
    /// `seen` holds the step names visible before this list begins; each
    /// branch gets its own copy, so sibling branches never see each other.
    fn validate_template_refs_in_steps(
        &self,
        steps: &[Value],
        defined_params: &BTreeSet<String>,
        seen: &HashSet<String>,
        base_path: &str,
        errors: &mut Vec<ValidationFinding>,
    ) {
        let mut local_seen = seen.clone();

        for (idx, step) in steps.iter().enumerate() {
            let step_name = str_field(step, "name");
            let step_path = format!("{base_path}[{idx}]");

            if let Some(params) = step.get("params") {
                self.check_template_refs_in_value(
                    params,
                    &local_seen,
                    defined_params,
                    &format!("{step_path}.params"),
                    step_name,
                    errors,
                );
            }

            for section in ["condition", "foreach"] {
                if let Some(value) = step.get(section) {
                    if !value.is_null() {
                        self.check_template_refs_in_value(
                            value,
                            &local_seen,
                            defined_params,
                            &format!("{step_path}.{section}"),
                            step_name,
                            errors,
                        );
                    }
                }
            }

            if let Some(branches) = step.get("branches").and_then(Value::as_object) {
                // Inside a foreach branch, `item` and `item_index` are also
                // in scope; they are bound by the executor, so references to
                // them are not checked here.
                for (branch_name, branch_steps) in branches {
                    if let Some(branch_list) = branch_steps.as_array() {
                        self.validate_template_refs_in_steps(
                            branch_list,
                            defined_params,
                            &local_seen,
                            &format!("{step_path}.branches.{branch_name}"),
                            errors,
                        );
                    }
                }
            }

            local_seen.insert(step_name.to_string());
        }
    }

    fn check_template_refs_in_value(
        &self,
        value: &Value,
        seen_steps: &HashSet<String>,
        defined_params: &BTreeSet<String>,
        path: &str,
        current_step: &str,
        errors: &mut Vec<ValidationFinding>,
    ) {
        match value {
            Value::String(s) => {
                for caps in STEP_REF_PATTERN.captures_iter(s) {
                    let ref_step = &caps[1];

                    if ref_step == current_step {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::CircularDependency,
                                format!("Step '{current_step}' cannot reference itself"),
                                path,
                            )
                            .detail("step", json!(current_step))
                            .detail("reference", json!(ref_step)),
                        );
                    } else if !seen_steps.contains(ref_step) {
                        let mut available: Vec<&String> = seen_steps.iter().collect();
                        available.sort();
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::InvalidStepReference,
                                format!(
                                    "Step '{current_step}' references unknown or future step \
                                     '{ref_step}'"
                                ),
                                path,
                            )
                            .detail("step", json!(current_step))
                            .detail("reference", json!(ref_step))
                            .detail("available_steps", json!(available)),
                        );
                    }
                }

                for caps in PARAM_REF_PATTERN.captures_iter(s) {
                    let ref_param = &caps[1];
                    if !defined_params.contains(ref_param) {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::InvalidParamReference,
                                format!(
                                    "Step '{current_step}' references undefined parameter \
                                     '{ref_param}'"
                                ),
                                path,
                            )
                            .detail("step", json!(current_step))
                            .detail("reference", json!(ref_param))
                            .detail("defined_params", json!(defined_params)),
                        );
                    }
                }

                for caps in TEMPLATE_PATTERN.captures_iter(s) {
                    let expr = caps[1].trim().to_string();
                    if !IDENT_START.is_match(&expr) {
                        errors.push(
                            ValidationFinding::new(
                                ValidationCode::InvalidTemplateSyntax,
                                format!("Invalid template expression: '{expr}'"),
                                path,
                            )
                            .detail("expression", json!(expr)),
                        );
                    }
                }
            }
            Value::Object(map) => {
                for (key, val) in map {
                    self.check_template_refs_in_value(
                        val,
                        seen_steps,
                        defined_params,
                        &format!("{path}.{key}"),
                        current_step,
                        errors,
                    );
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_template_refs_in_value(
                        item,
                        seen_steps,
                        defined_params,
                        &format!("{path}[{i}]"),
                        current_step,
                        errors,
                    );
                }
            }
            _ => {}
        }
    }

    /// `steps.X.field` references checked against the output schema of the
    /// tool attached to step X. The step map is per level: outer steps are
    /// not resolvable from inside a branch and are skipped there.
    fn validate_output_field_refs(
        &self,
        steps: &[Value],
        base_path: &str,
    ) -> (Vec<ValidationFinding>, Vec<ValidationFinding>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let mut step_func_map: HashMap<&str, &str> = HashMap::new();
        for step in steps {
            let name = str_field(step, "name");
            let func = str_field(step, "function");
            if !name.is_empty() && !func.is_empty() {
                step_func_map.insert(name, func);
            }
        }

        for (idx, step) in steps.iter().enumerate() {
            let step_path = format!("{base_path}[{idx}]");
            let step_name = str_field(step, "name");

            for section in ["params", "condition", "foreach"] {
                if let Some(value) = step.get(section) {
                    if !value.is_null() {
                        self.check_output_refs_in_value(
                            value,
                            &step_func_map,
                            &format!("{step_path}.{section}"),
                            step_name,
                            &mut errors,
                            &mut warnings,
                        );
                    }
                }
            }

            if let Some(branches) = step.get("branches").and_then(Value::as_object) {
                for (branch_name, branch_steps) in branches {
                    if let Some(branch_list) = branch_steps.as_array() {
                        let (branch_errors, branch_warnings) = self.validate_output_field_refs(
                            branch_list,
                            &format!("{step_path}.branches.{branch_name}"),
                        );
                        errors.extend(branch_errors);
                        warnings.extend(branch_warnings);
                    }
                }
            }
        }

        (errors, warnings)
    }

    fn check_output_refs_in_value(
        &self,
        value: &Value,
        step_func_map: &HashMap<&str, &str>,
        path: &str,
        current_step: &str,
        errors: &mut Vec<ValidationFinding>,
        warnings: &mut Vec<ValidationFinding>,
    ) {
        match value {
            Value::String(s) if s.contains("{{") => {
                for caps in OUTPUT_FIELD_REF_PATTERN.captures_iter(s) {
                    let step_ref = &caps[1];
                    let field_ref = &caps[2];
                    self.check_single_output_ref(
                        step_ref,
                        field_ref,
                        step_func_map,
                        path,
                        current_step,
                        errors,
                        warnings,
                    );
                }
            }
            Value::Object(map) => {
                for (key, val) in map {
                    self.check_output_refs_in_value(
                        val,
                        step_func_map,
                        &format!("{path}.{key}"),
                        current_step,
                        errors,
                        warnings,
                    );
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_output_refs_in_value(
                        item,
                        step_func_map,
                        &format!("{path}[{i}]"),
                        current_step,
                        errors,
                        warnings,
                    );
                }
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_single_output_ref(
        &self,
        step_name: &str,
        field_name: &str,
        step_func_map: &HashMap<&str, &str>,
        path: &str,
        current_step: &str,
        errors: &mut Vec<ValidationFinding>,
        warnings: &mut Vec<ValidationFinding>,
    ) {
        let Some(func_name) = step_func_map.get(step_name) else {
            return; // Step not found at this level; skip.
        };
        let Some(contract) = self.registry.contract(func_name) else {
            return; // Unknown function is reported elsewhere.
        };

        let ref_str = format!("steps.{step_name}.{field_name}");
        let (shape, output_fields) = resolve_output_fields(&contract.output_schema);

        match shape {
            None => {}
            Some(OutputShape::String) => {
                errors.push(
                    ValidationFinding::new(
                        ValidationCode::InvalidOutputFieldReference,
                        format!(
                            "Step '{current_step}' references field '{field_name}' on step \
                             '{step_name}' (function '{func_name}'), but it returns a string. \
                             Use the step result directly: {{{{ steps.{step_name} }}}}"
                        ),
                        path,
                    )
                    .detail("step", json!(current_step))
                    .detail("referenced_step", json!(step_name))
                    .detail("function", json!(func_name))
                    .detail("field", json!(field_name))
                    .detail("output_type", json!("string"))
                    .detail("ref", json!(ref_str)),
                );
            }
            Some(OutputShape::Array) => {
                let available: Vec<String> = output_fields
                    .map(|fields| fields.into_iter().collect())
                    .unwrap_or_default();
                let mut message = format!(
                    "Step '{current_step}' references field '{field_name}' on step '{step_name}' \
                     (function '{func_name}'), but it returns an array. Use foreach to iterate, \
                     then access item.{field_name}."
                );
                if !available.is_empty() {
                    message.push_str(&format!(" Available item fields: {available:?}"));
                }
                warnings.push(
                    ValidationFinding::new(ValidationCode::InvalidOutputFieldReference, message, path)
                        .detail("step", json!(current_step))
                        .detail("referenced_step", json!(step_name))
                        .detail("function", json!(func_name))
                        .detail("field", json!(field_name))
                        .detail("output_type", json!("array"))
                        .detail("available_fields", json!(available))
                        .detail("ref", json!(ref_str)),
                );
            }
            Some(OutputShape::Object) => {
                let Some(fields) = output_fields else {
                    return;
                };
                if !fields.contains(field_name) {
                    let available: Vec<&String> = fields.iter().collect();
                    warnings.push(
                        ValidationFinding::new(
                            ValidationCode::InvalidOutputFieldReference,
                            format!(
                                "Step '{current_step}' references field '{field_name}' on step \
                                 '{step_name}' (function '{func_name}'), but that field is not in \
                                 the output schema. Available fields: {available:?}"
                            ),
                            path,
                        )
                        .detail("step", json!(current_step))
                        .detail("referenced_step", json!(step_name))
                        .detail("function", json!(func_name))
                        .detail("field", json!(field_name))
                        .detail("output_type", json!("object"))
                        .detail("available_fields", json!(available))
                        .detail("ref", json!(ref_str)),
                    );
                }
            }
        }
    }

    /// `facet_filters` advisories against the configured facet table.
    /// Without a table nothing is checked.
    fn validate_facet_filters(&self, step: &Value, step_path: &str) -> Vec<ValidationFinding> {
        let mut warnings = Vec::new();

        if self.hints.known_facets.is_empty() {
            return warnings;
        }

        let Some(facet_filters) = step
            .get("params")
            .and_then(|p| p.get("facet_filters"))
            .and_then(Value::as_object)
        else {
            return warnings;
        };

        let step_name = str_field(step, "name");
        let available: Vec<&String> = self.hints.known_facets.iter().collect();

        for facet_name in facet_filters.keys() {
            if facet_name.contains("{{") {
                continue;
            }
            if !self.hints.known_facets.contains(facet_name) {
                warnings.push(
                    ValidationFinding::new(
                        ValidationCode::InvalidFacetFilter,
                        format!(
                            "Step '{step_name}' uses unknown facet filter '{facet_name}'. \
                             Available facets: {}",
                            available
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        format!("{step_path}.params.facet_filters.{facet_name}"),
                    )
                    .detail("step_name", json!(step_name))
                    .detail("unknown_facet", json!(facet_name))
                    .detail("available_facets", json!(available)),
                );
            }
        }

        warnings
    }

    /// Step-name/tool mismatches against the configured keyword table, e.g.
    /// a step named `search_forecasts` that invokes a generic asset search.
    fn check_function_mismatches(&self, steps: &[Value]) -> Vec<ValidationFinding> {
        let mut warnings = Vec::new();

        for (idx, step) in steps.iter().enumerate() {
            let step_name = str_field(step, "name");
            let step_name_lower = step_name.to_lowercase();
            let func_name = str_field(step, "function");
            let step_path = format!("steps[{idx}]");

            for hint in &self.hints.step_name_hints {
                if step_name_lower.contains(&hint.keyword)
                    && hint.wrong_functions.iter().any(|f| f == func_name)
                {
                    warnings.push(
                        ValidationFinding::new(
                            ValidationCode::FunctionMismatchWarning,
                            format!(
                                "Step '{step_name}' appears to want {} but uses '{func_name}'. {}",
                                hint.expected, hint.suggestion
                            ),
                            format!("{step_path}.function"),
                        )
                        .detail("step_name", json!(step_name))
                        .detail("current_function", json!(func_name))
                        .detail("expected_function", json!(hint.expected))
                        .detail("keyword_matched", json!(hint.keyword))
                        .detail("suggestion", json!(hint.suggestion)),
                    );
                }
            }
        }

        warnings
    }
}

fn branch_is_empty(branch: &Value) -> bool {
    match branch {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn check_on_error(step: &Value, step_path: &str) -> Vec<ValidationFinding> {
    let Some(on_error) = step.get("on_error") else {
        return Vec::new();
    };
    if on_error.is_null()
        || on_error
            .as_str()
            .is_some_and(|p| VALID_ON_ERROR_POLICIES.contains(&p))
    {
        return Vec::new();
    }
    vec![ValidationFinding::new(
        ValidationCode::InvalidOnErrorPolicy,
        format!("Invalid on_error policy: '{}'", display_value(on_error)),
        format!("{step_path}.on_error"),
    )
    .detail("value", on_error.clone())
    .detail("valid_values", json!(VALID_ON_ERROR_POLICIES))]
}

/// String form of a value for messages: strings render bare, everything
/// else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate against the process-wide registry with no advisory tables.
pub fn validate_procedure(definition: &Value) -> ValidationReport {
    static VALIDATOR: Lazy<ProcedureValidator> =
        Lazy::new(|| ProcedureValidator::new(crate::registry::global()));
    VALIDATOR.validate_value(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{OutputField, OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
    use crate::procedure::StepResult;
    use crate::tools::{InvocationContext, Tool, ToolError};
    use crate::validator::StepNameHint;
    use async_trait::async_trait;

    struct MetaOnly {
        meta: ToolMeta,
    }

    #[async_trait]
    impl Tool for MetaOnly {
        fn meta(&self) -> &ToolMeta {
            &self.meta
        }

        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            _params: Map<String, Value>,
        ) -> Result<StepResult, ToolError> {
            Ok(StepResult::success(Value::Null))
        }
    }

    fn register(registry: &ToolRegistry, meta: ToolMeta) {
        registry.register(Arc::new(MetaOnly { meta }));
    }

    fn registry_fixture() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::with_builtins();
        register(
            &registry,
            ToolMeta::new("search_assets", ToolCategory::Search, "Search the asset store")
                .parameters([
                    ParameterSpec::string("query").description("Search query"),
                    ParameterSpec::integer("limit").optional(),
                    ParameterSpec::string("source_type")
                        .enum_values([json!("sharepoint"), json!("upload")])
                        .optional(),
                    ParameterSpec::array("labels", ParamType::String)
                        .enum_values([json!("red"), json!("green"), json!("blue")])
                        .optional(),
                ])
                .output(OutputSpec::new(ParamType::Array, "Matching assets").fields([
                    OutputField::new("id", ParamType::String, "Asset id"),
                    OutputField::new("title", ParamType::String, "Asset title"),
                ])),
        );
        register(
            &registry,
            ToolMeta::new("stringy", ToolCategory::Llm, "Returns plain text")
                .parameters([ParameterSpec::string("text").optional()])
                .output(OutputSpec::new(ParamType::String, "Generated text")),
        );
        register(
            &registry,
            ToolMeta::new("summarize", ToolCategory::Llm, "Summarize content")
                .parameters([ParameterSpec::string("text").optional()])
                .output(OutputSpec::new(ParamType::Object, "Summary record").fields([
                    OutputField::new("summary", ParamType::String, "The summary"),
                    OutputField::new("total", ParamType::Integer, "Items summarized"),
                ])),
        );
        register(
            &registry,
            ToolMeta::new("opaque", ToolCategory::Utility, "Undeclared output"),
        );
        Arc::new(registry)
    }

    fn validator() -> ProcedureValidator {
        ProcedureValidator::new(registry_fixture())
    }

    fn minimal(steps: Value) -> Value {
        json!({"name": "Test", "slug": "test", "steps": steps})
    }

    fn codes(findings: &[ValidationFinding]) -> Vec<ValidationCode> {
        findings.iter().map(|f| f.code).collect()
    }

    #[test]
    fn test_unknown_function() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "x", "function": "not_a_tool"}
        ])));
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        let finding = &report.errors[0];
        assert_eq!(finding.code, ValidationCode::UnknownFunction);
        assert_eq!(finding.path, "steps[0].function");
        assert_eq!(finding.details["function"], json!("not_a_tool"));
        assert!(finding.details["available"]
            .as_array()
            .unwrap()
            .contains(&json!("search_assets")));
    }

    #[test]
    fn test_forward_reference() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "a", "function": "log", "params": {"message": "{{ steps.b }}"}},
            {"name": "b", "function": "log", "params": {"message": "x"}}
        ])));
        assert!(!report.is_valid());
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidStepReference)
            .unwrap();
        assert_eq!(finding.path, "steps[0].params.message");
        assert_eq!(finding.details["reference"], json!("b"));
    }

    #[test]
    fn test_output_field_on_string_result() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s1", "function": "stringy"},
            {"name": "use", "function": "log", "params": {"message": "{{ steps.s1.title }}"}}
        ])));
        assert!(!report.is_valid());
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidOutputFieldReference)
            .unwrap();
        assert_eq!(finding.details["output_type"], json!("string"));
        assert_eq!(finding.details["referenced_step"], json!("s1"));
        assert!(finding.message.contains("{{ steps.s1 }}"));
    }

    #[test]
    fn test_schema_failure_short_circuits() {
        let report = validator().validate_value(&json!({
            "name": "X",
            "slug": "Bad Slug",
            "steps": [{"name": "x", "function": "not_a_tool"}]
        }));
        assert_eq!(codes(&report.errors), vec![ValidationCode::InvalidSlugFormat]);
    }

    #[test]
    fn test_missing_top_level_fields() {
        let report = validator().validate_value(&json!({}));
        let found = codes(&report.errors);
        assert!(found.contains(&ValidationCode::MissingRequiredField));
        assert!(found.contains(&ValidationCode::EmptySteps));
    }

    #[test]
    fn test_steps_must_be_array() {
        let report = validator().validate_value(&json!({
            "name": "X", "slug": "x", "steps": {"name": "a"}
        }));
        assert!(codes(&report.errors).contains(&ValidationCode::InvalidFieldType));
    }

    #[test]
    fn test_empty_steps() {
        let report = validator().validate_value(&json!({
            "name": "X", "slug": "x", "steps": []
        }));
        assert_eq!(codes(&report.errors), vec![ValidationCode::EmptySteps]);
    }

    #[test]
    fn test_duplicate_step_names() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "a", "function": "log", "params": {"message": "1"}},
            {"name": "a", "function": "log", "params": {"message": "2"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::DuplicateStepName)
            .unwrap();
        assert_eq!(finding.path, "steps[1].name");
    }

    #[test]
    fn test_parameter_schema_checks() {
        let report = validator().validate_value(&json!({
            "name": "X",
            "slug": "x",
            "parameters": [
                {"name": "a", "required": true, "default": 3},
                {"name": "a"},
                {"required": false},
                "not-an-object"
            ],
            "steps": [{"name": "s", "function": "log", "params": {"message": "m"}}]
        }));
        let found = codes(&report.errors);
        assert!(found.contains(&ValidationCode::ContradictoryParameter));
        assert!(found.contains(&ValidationCode::DuplicateParameterName));
        assert!(found.contains(&ValidationCode::MissingParameterName));
        assert!(found.contains(&ValidationCode::InvalidFieldType));
    }

    #[test]
    fn test_invalid_on_error_policy() {
        let report = validator().validate_value(&json!({
            "name": "X", "slug": "x", "on_error": "explode",
            "steps": [{"name": "s", "function": "log", "params": {"message": "m"}}]
        }));
        assert_eq!(codes(&report.errors), vec![ValidationCode::InvalidOnErrorPolicy]);

        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "log", "on_error": "retry",
             "params": {"message": "m"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidOnErrorPolicy)
            .unwrap();
        assert_eq!(finding.path, "steps[0].on_error");
    }

    #[test]
    fn test_missing_required_param() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets", "params": {"limit": 5}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::MissingRequiredParam)
            .unwrap();
        assert_eq!(finding.path, "steps[0].params.query");
        assert_eq!(finding.details["parameter"], json!("query"));
    }

    #[test]
    fn test_required_param_via_template_is_fine() {
        let report = validator().validate_value(&json!({
            "name": "X", "slug": "x",
            "parameters": [{"name": "q"}],
            "steps": [
                {"name": "s", "function": "search_assets",
                 "params": {"query": "{{ params.q }}"}}
            ]
        }));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_param_type_mismatch() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "limit": "ten"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidParamType)
            .unwrap();
        assert_eq!(finding.details["expected_type"], json!("integer"));
        assert_eq!(finding.details["actual_type"], json!("string"));
    }

    #[test]
    fn test_scalar_enum_violation() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "source_type": "ftp"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidParamType)
            .unwrap();
        assert_eq!(finding.details["value"], json!("ftp"));
    }

    #[test]
    fn test_array_enum_applied_per_item() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "labels": ["red", "purple"]}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidParamType)
            .unwrap();
        assert_eq!(finding.details["value"], json!("purple"));
    }

    #[test]
    fn test_null_for_optional_param_is_fine() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "limit": null}}
        ])));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_unknown_params_allowed() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "posted_within_days": 7}}
        ])));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_if_branch_requires_then() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::MissingRequiredBranch)
            .unwrap();
        assert_eq!(finding.path, "steps[0].branches");

        let report = validator().validate_value(&minimal(json!([
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"},
             "branches": {"then": []}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::EmptyBranch)
            .unwrap();
        assert_eq!(finding.path, "steps[0].branches.then");
    }

    #[test]
    fn test_parallel_branch_count() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "fan", "function": "parallel",
             "branches": {"only": [{"name": "a", "function": "log", "params": {"message": "m"}}]}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InsufficientBranches)
            .unwrap();
        assert_eq!(finding.details["min_required"], json!(2));
    }

    #[test]
    fn test_parallel_with_two_empty_branches() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "fan", "function": "parallel", "branches": {"a": [], "b": []}}
        ])));
        let empty_count = report
            .errors
            .iter()
            .filter(|f| f.code == ValidationCode::EmptyBranch)
            .count();
        assert_eq!(empty_count, 2);
        assert!(!codes(&report.errors).contains(&ValidationCode::InsufficientBranches));
    }

    #[test]
    fn test_switch_needs_case_branch() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "route", "function": "switch_branch", "params": {"value": "x"},
             "branches": {"default": [{"name": "d", "function": "log", "params": {"message": "m"}}]}}
        ])));
        assert!(codes(&report.errors).contains(&ValidationCode::InsufficientBranches));
    }

    #[test]
    fn test_foreach_requires_each() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "iter", "function": "foreach", "params": {"items": [1]},
             "branches": {"body": [{"name": "b", "function": "log", "params": {"message": "m"}}]}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::MissingRequiredBranch)
            .unwrap();
        assert_eq!(finding.path, "steps[0].branches.each");
    }

    #[test]
    fn test_branches_must_be_object_of_lists() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"},
             "branches": "then"}
        ])));
        assert!(codes(&report.errors).contains(&ValidationCode::InvalidBranchStructure));

        let report = validator().validate_value(&minimal(json!([
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"},
             "branches": {"then": {"name": "a"}}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidBranchStructure)
            .unwrap();
        assert_eq!(finding.path, "steps[0].branches.then");
    }

    #[test]
    fn test_nested_branch_steps_fully_checked() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"},
             "branches": {"then": [
                 {"name": "n1", "function": "not_a_tool"},
                 {"name": "n1", "function": "log", "on_error": "bogus",
                  "params": {"message": "m"}},
                 {"function": "log", "params": {"message": "m"}}
             ]}}
        ])));
        let found = codes(&report.errors);
        assert!(found.contains(&ValidationCode::UnknownFunction));
        assert!(found.contains(&ValidationCode::DuplicateStepName));
        assert!(found.contains(&ValidationCode::InvalidOnErrorPolicy));
        assert!(found.contains(&ValidationCode::MissingRequiredField));

        let unknown = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::UnknownFunction)
            .unwrap();
        assert_eq!(unknown.path, "steps[0].branches.then[0].function");
    }

    #[test]
    fn test_deeply_nested_flow_recursion() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "outer", "function": "if_branch", "params": {"condition": "yes"},
             "branches": {"then": [
                 {"name": "inner", "function": "foreach", "params": {"items": [1]},
                  "branches": {}}
             ]}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::MissingRequiredBranch)
            .unwrap();
        assert!(finding.path.starts_with("steps[0].branches.then[0]"));
    }

    #[test]
    fn test_circular_dependency() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "a", "function": "log", "params": {"message": "{{ steps.a }}"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::CircularDependency)
            .unwrap();
        assert_eq!(finding.details["step"], json!("a"));
    }

    #[test]
    fn test_undefined_param_reference() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "a", "function": "log", "params": {"message": "{{ params.nope }}"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidParamReference)
            .unwrap();
        assert_eq!(finding.details["reference"], json!("nope"));
    }

    #[test]
    fn test_invalid_template_syntax() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "a", "function": "log", "params": {"message": "{{ 123abc }}"}}
        ])));
        let finding = report
            .errors
            .iter()
            .find(|f| f.code == ValidationCode::InvalidTemplateSyntax)
            .unwrap();
        assert_eq!(finding.details["expression"], json!("123abc"));
    }

    #[test]
    fn test_branch_sees_prior_steps_but_not_siblings() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "prep", "function": "log", "params": {"message": "x"}},
            {"name": "fan", "function": "parallel", "branches": {
                "a": [{"name": "a1", "function": "log",
                       "params": {"message": "{{ steps.prep }}"}}],
                "b": [{"name": "b1", "function": "log",
                       "params": {"message": "{{ steps.a1 }}"}}]
            }},
            {"name": "after", "function": "log", "params": {"message": "{{ steps.b1 }}"}}
        ])));
        let refs: Vec<&ValidationFinding> = report
            .errors
            .iter()
            .filter(|f| f.code == ValidationCode::InvalidStepReference)
            .collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].details["reference"], json!("a1"));
        assert_eq!(refs[1].details["reference"], json!("b1"));
    }

    #[test]
    fn test_foreach_branch_item_scope() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "load", "function": "search_assets", "params": {"query": "*"}},
            {"name": "iter", "function": "foreach",
             "params": {"items": "{{ steps.load }}"},
             "branches": {"each": [
                 {"name": "show", "function": "log",
                  "params": {"message": "{{ item.title }} at {{ item_index }}"}}
             ]}}
        ])));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_steps_visible_after_branch_of_earlier_flow() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"},
             "branches": {"then": [{"name": "t1", "function": "log",
                                    "params": {"message": "x"}}]}},
            {"name": "after", "function": "log", "params": {"message": "{{ steps.gate }}"}}
        ])));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_array_output_field_warning() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "load", "function": "search_assets", "params": {"query": "*"}},
            {"name": "use", "function": "log",
             "params": {"message": "{{ steps.load.title }}"}}
        ])));
        assert!(report.is_valid());
        let warning = report
            .warnings
            .iter()
            .find(|w| w.code == ValidationCode::InvalidOutputFieldReference)
            .unwrap();
        assert_eq!(warning.details["output_type"], json!("array"));
        assert!(warning.message.contains("foreach"));
        assert!(warning.details["available_fields"]
            .as_array()
            .unwrap()
            .contains(&json!("title")));
    }

    #[test]
    fn test_object_unknown_field_warning() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "sum", "function": "summarize", "params": {"text": "x"}},
            {"name": "use", "function": "log",
             "params": {"message": "{{ steps.sum.missing }}"}}
        ])));
        assert!(report.is_valid());
        let warning = report
            .warnings
            .iter()
            .find(|w| w.code == ValidationCode::InvalidOutputFieldReference)
            .unwrap();
        assert_eq!(warning.details["output_type"], json!("object"));

        let report = validator().validate_value(&minimal(json!([
            {"name": "sum", "function": "summarize", "params": {"text": "x"}},
            {"name": "use", "function": "log",
             "params": {"message": "{{ steps.sum.summary }}"}}
        ])));
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    }

    #[test]
    fn test_generic_output_schema_not_checked() {
        let report = validator().validate_value(&minimal(json!([
            {"name": "mystery", "function": "opaque"},
            {"name": "use", "function": "log",
             "params": {"message": "{{ steps.mystery.whatever }}"}}
        ])));
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_facet_filter_advisories() {
        let hints = ValidatorHints::default().with_known_facets(["agency", "doc_type"]);
        let validator_with_hints = ProcedureValidator::new(registry_fixture()).with_hints(hints);

        let report = validator_with_hints.validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "facet_filters": {"bogus": "x", "agency": "GSA"}}}
        ])));
        assert!(report.is_valid());
        let warning = report
            .warnings
            .iter()
            .find(|w| w.code == ValidationCode::InvalidFacetFilter)
            .unwrap();
        assert_eq!(warning.details["unknown_facet"], json!("bogus"));
        assert_eq!(warning.path, "steps[0].params.facet_filters.bogus");

        // Without a facet table nothing is checked.
        let report = validator().validate_value(&minimal(json!([
            {"name": "s", "function": "search_assets",
             "params": {"query": "*", "facet_filters": {"bogus": "x"}}}
        ])));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_function_mismatch_advisories() {
        let hints = ValidatorHints::default().with_step_name_hints([StepNameHint::new(
            "forecast",
            "search_forecasts",
            ["search_assets"],
            "For acquisition forecasts, use search_forecasts instead of search_assets",
        )]);
        let validator = ProcedureValidator::new(registry_fixture()).with_hints(hints);

        let report = validator.validate_value(&minimal(json!([
            {"name": "load_forecasts", "function": "search_assets",
             "params": {"query": "*"}}
        ])));
        assert!(report.is_valid());
        let warning = report
            .warnings
            .iter()
            .find(|w| w.code == ValidationCode::FunctionMismatchWarning)
            .unwrap();
        assert_eq!(warning.details["expected_function"], json!("search_forecasts"));
        assert_eq!(warning.details["keyword_matched"], json!("forecast"));
        assert_eq!(warning.path, "steps[0].function");
    }

    #[test]
    fn test_revalidation_is_stable() {
        let definition = minimal(json!([
            {"name": "a", "function": "log", "params": {"message": "{{ steps.z }}"}},
            {"name": "gate", "function": "if_branch", "params": {"condition": "yes"}}
        ]));
        let validator = validator();
        let first = validator.validate_value(&definition).to_value();
        let second = validator.validate_value(&definition).to_value();
        assert_eq!(first, second);
    }

    #[test]
    fn test_valid_procedure_end_to_end() {
        let definition = json!({
            "name": "Daily Triage",
            "slug": "daily-triage",
            "on_error": "fail",
            "parameters": [
                {"name": "since_days", "type": "integer", "required": false, "default": 7}
            ],
            "steps": [
                {"name": "load", "function": "search_assets",
                 "params": {"query": "*", "source_type": "sharepoint",
                            "posted_within_days": "{{ params.since_days }}"}},
                {"name": "has_any", "function": "if_branch",
                 "params": {"condition": "{{ steps.load | length > 0 }}"},
                 "branches": {
                     "then": [{"name": "notify", "function": "log",
                               "params": {"message": "{{ steps.load | length }} items"}}],
                     "else": [{"name": "log_none", "function": "log",
                               "params": {"message": "none"}}]
                 }}
            ]
        });
        let report = validator().validate_value(&definition);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);

        // The typed entry point agrees.
        let typed = ProcedureDefinition::from_value(definition).unwrap();
        let report = validator().validate(&typed);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }
}
