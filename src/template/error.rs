use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Invalid template expression '{expression}': {reason}")]
    Syntax { expression: String, reason: String },

    #[error("Unresolved reference '{path}'")]
    UnresolvedReference { path: String },

    #[error("Cannot access field '{field}' on {type_name} value '{path}'; use the value directly")]
    FieldAccess {
        field: String,
        type_name: &'static str,
        path: String,
    },

    #[error("Cannot index into {type_name} value '{path}'")]
    IndexAccess { type_name: &'static str, path: String },

    #[error("Filter '{filter}' cannot be applied to {type_name}")]
    FilterInput {
        filter: &'static str,
        type_name: &'static str,
    },

    #[error("Cannot compare {left} with {right}")]
    Comparison {
        left: &'static str,
        right: &'static str,
    },
}

impl TemplateError {
    pub fn syntax(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        TemplateError::Syntax {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}
