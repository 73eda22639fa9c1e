//! Query definitions and recorded parameter values.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::{CapturedStatement, Result, Value, substitute};

/// `:name` tokens. A preceding `:` (a `::type` cast) disqualifies the match.
static NAMED_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^:]):([A-Za-z_]\w*)").expect("valid regex"));

/// Parameter values recorded for one execution, keyed by parameter name.
pub type Parameters = IndexMap<String, Value>;

/// A named-parameter query template and the parameter names it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefinition {
    template: String,
    parameter_names: BTreeSet<String>,
}

impl QueryDefinition {
    pub fn parse(template: impl Into<String>) -> Self {
        let template = template.into();
        let parameter_names = NAMED_PARAM
            .captures_iter(&template)
            .map(|caps| caps[1].to_owned())
            .collect();
        Self {
            template,
            parameter_names,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn parameter_names(&self) -> &BTreeSet<String> {
        &self.parameter_names
    }

    pub fn declares(&self, name: &str) -> bool {
        self.parameter_names.contains(name)
    }

    /// Keep the supplied values whose names the template declares.
    pub fn bind<I, N, V>(&self, values: I) -> Parameters
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Value>,
    {
        let mut parameters = Parameters::new();
        for (name, value) in values {
            let name = name.into();
            if self.declares(&name) {
                parameters.insert(name, value.into());
            } else {
                tracing::trace!(%name, "dropping undeclared parameter");
            }
        }
        parameters
    }
}

/// Record the values for the parameters `template` declares; others are dropped.
pub fn record_parameters<I, N, V>(template: &str, values: I) -> Parameters
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<Value>,
{
    QueryDefinition::parse(template).bind(values)
}

/// One issued statement paired with the values bound for that execution.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundExecution {
    pub statement: CapturedStatement,
    pub parameters: Parameters,
}

impl BoundExecution {
    pub fn new(statement: CapturedStatement, parameters: Parameters) -> Self {
        Self {
            statement,
            parameters,
        }
    }

    /// The issued statement with every recognised placeholder replaced.
    pub fn literal(&self) -> Result<String> {
        substitute(&self.statement.issued, &self.parameters)
    }
}
