use std::collections::BTreeSet;

/// One advisory rule: a keyword in a step name that suggests the author
/// meant a different tool than the one invoked.
#[derive(Debug, Clone)]
pub struct StepNameHint {
    /// Keyword matched against the lowercased step name.
    pub keyword: String,
    /// The tool the author probably meant.
    pub expected: String,
    /// Tools that trigger the warning when combined with the keyword.
    pub wrong_functions: Vec<String>,
    /// Author-facing guidance appended to the warning message.
    pub suggestion: String,
}

impl StepNameHint {
    pub fn new(
        keyword: impl Into<String>,
        expected: impl Into<String>,
        wrong_functions: impl IntoIterator<Item = &'static str>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            expected: expected.into(),
            wrong_functions: wrong_functions.into_iter().map(Into::into).collect(),
            suggestion: suggestion.into(),
        }
    }
}

/// External reference tables the advisory phases consult. Both default to
/// empty, in which case the corresponding warnings are simply never emitted;
/// hosts inject tables matching their tool roster.
#[derive(Debug, Clone, Default)]
pub struct ValidatorHints {
    pub step_name_hints: Vec<StepNameHint>,
    /// Facet names accepted in `facet_filters` parameters.
    pub known_facets: BTreeSet<String>,
}

impl ValidatorHints {
    pub fn with_step_name_hints(mut self, hints: impl IntoIterator<Item = StepNameHint>) -> Self {
        self.step_name_hints = hints.into_iter().collect();
        self
    }

    pub fn with_known_facets(
        mut self,
        facets: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        self.known_facets = facets.into_iter().map(Into::into).collect();
        self
    }
}
