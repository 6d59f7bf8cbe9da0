use serde::{Deserialize, Serialize};

/// Closed catalogue of validation finding codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    // Schema
    MissingRequiredField,
    InvalidFieldType,
    InvalidSlugFormat,
    EmptySteps,
    DuplicateStepName,

    // Parameters
    DuplicateParameterName,
    ContradictoryParameter,
    MissingParameterName,

    // Functions
    UnknownFunction,
    MissingRequiredParam,
    UnknownFunctionParam,
    InvalidParamType,

    // Template references
    InvalidStepReference,
    InvalidParamReference,
    CircularDependency,
    InvalidTemplateSyntax,

    // Policy
    InvalidOnErrorPolicy,

    // Flow control
    MissingRequiredBranch,
    EmptyBranch,
    InsufficientBranches,
    InvalidBranchStructure,

    // Semantic advisories (non-blocking)
    FunctionMismatchWarning,
    InvalidFacetFilter,
    InvalidOutputFieldReference,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ValidationCode::InvalidFieldType => "INVALID_FIELD_TYPE",
            ValidationCode::InvalidSlugFormat => "INVALID_SLUG_FORMAT",
            ValidationCode::EmptySteps => "EMPTY_STEPS",
            ValidationCode::DuplicateStepName => "DUPLICATE_STEP_NAME",
            ValidationCode::DuplicateParameterName => "DUPLICATE_PARAMETER_NAME",
            ValidationCode::ContradictoryParameter => "CONTRADICTORY_PARAMETER",
            ValidationCode::MissingParameterName => "MISSING_PARAMETER_NAME",
            ValidationCode::UnknownFunction => "UNKNOWN_FUNCTION",
            ValidationCode::MissingRequiredParam => "MISSING_REQUIRED_PARAM",
            ValidationCode::UnknownFunctionParam => "UNKNOWN_FUNCTION_PARAM",
            ValidationCode::InvalidParamType => "INVALID_PARAM_TYPE",
            ValidationCode::InvalidStepReference => "INVALID_STEP_REFERENCE",
            ValidationCode::InvalidParamReference => "INVALID_PARAM_REFERENCE",
            ValidationCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ValidationCode::InvalidTemplateSyntax => "INVALID_TEMPLATE_SYNTAX",
            ValidationCode::InvalidOnErrorPolicy => "INVALID_ON_ERROR_POLICY",
            ValidationCode::MissingRequiredBranch => "MISSING_REQUIRED_BRANCH",
            ValidationCode::EmptyBranch => "EMPTY_BRANCH",
            ValidationCode::InsufficientBranches => "INSUFFICIENT_BRANCHES",
            ValidationCode::InvalidBranchStructure => "INVALID_BRANCH_STRUCTURE",
            ValidationCode::FunctionMismatchWarning => "FUNCTION_MISMATCH_WARNING",
            ValidationCode::InvalidFacetFilter => "INVALID_FACET_FILTER",
            ValidationCode::InvalidOutputFieldReference => "INVALID_OUTPUT_FIELD_REFERENCE",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
