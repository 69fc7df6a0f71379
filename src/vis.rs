//! Visualization contract: vis spec parsing, argument validation and
//! query-function derivation

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::VisError;
use crate::model::{ArgValue, Args, FuncArg, QueryFunc};
use crate::results::QueryError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub valid_values: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncArgSpec {
    pub name: String,
    /// Literal value
    #[serde(default)]
    pub value: Option<String>,
    /// Name of the variable whose argument value is substituted
    #[serde(default)]
    pub variable: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuncSpec {
    pub name: String,
    #[serde(default)]
    pub args: Vec<FuncArgSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFunc {
    pub output_name: String,
    pub func: FuncSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub func: Option<FuncSpec>,
}

/// A parsed vis spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vis {
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub global_funcs: Vec<GlobalFunc>,
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

impl Vis {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// The vis operations the orchestrator relies on
pub trait VisContract: Send + Sync {
    /// Strict parse; formatting problems are errors
    fn parse(&self, text: &str) -> Result<Vis, VisError>;

    /// A client-side error when `args` do not satisfy the vis variables
    fn validate_args(&self, vis: &Vis, args: &Args) -> Option<QueryError>;

    /// Query functions to submit with the script
    fn query_funcs(&self, vis: &Vis, args: &Args) -> Vec<QueryFunc>;
}

/// JSON vis specs
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonVis;

impl VisContract for JsonVis {
    fn parse(&self, text: &str) -> Result<Vis, VisError> {
        parse_vis(text)
    }

    fn validate_args(&self, vis: &Vis, args: &Args) -> Option<QueryError> {
        let mut problems = Vec::new();

        for variable in &vis.variables {
            match args.get(&variable.name) {
                None if variable.default_value.is_none() => {
                    problems.push(format!("Missing value for required arg `{}`.", variable.name));
                }
                Some(value) if !variable.valid_values.is_empty() && !value.is_within(&variable.valid_values) => {
                    problems.push(format!(
                        "Value `{}` passed in for `{}` is not in the set of valid values: {}.",
                        value,
                        variable.name,
                        variable.valid_values.join(", ")
                    ));
                }
                _ => {}
            }
        }

        if problems.is_empty() {
            None
        } else {
            Some(QueryError::client("Invalid arguments").with_details(problems))
        }
    }

    fn query_funcs(&self, vis: &Vis, args: &Args) -> Vec<QueryFunc> {
        let globals = vis
            .global_funcs
            .iter()
            .map(|global| bind_func(&global.func, &global.output_name, vis, args));

        let widgets = vis.widgets.iter().enumerate().filter_map(|(i, widget)| {
            let func = widget.func.as_ref()?;
            let prefix = widget.name.clone().unwrap_or_else(|| format!("widget_{}", i));
            Some(bind_func(func, &prefix, vis, args))
        });

        globals.chain(widgets).collect()
    }
}

fn bind_func(func: &FuncSpec, output_table_prefix: &str, vis: &Vis, args: &Args) -> QueryFunc {
    let args = func
        .args
        .iter()
        .map(|arg| {
            let value = match (&arg.value, &arg.variable) {
                (Some(value), _) => value.clone(),
                (None, Some(variable)) => resolve_variable(vis, args, variable),
                (None, None) => String::new(),
            };
            FuncArg {
                name: arg.name.clone(),
                value,
            }
        })
        .collect();

    QueryFunc {
        name: func.name.clone(),
        output_table_prefix: output_table_prefix.to_string(),
        args,
    }
}

fn resolve_variable(vis: &Vis, args: &Args, name: &str) -> String {
    args.get(name)
        .map(ArgValue::to_query_value)
        .or_else(|| vis.variable(name).and_then(|v| v.default_value.clone()))
        .unwrap_or_default()
}

/// Strictly parse a vis spec. Empty text is an empty vis.
pub fn parse_vis(text: &str) -> Result<Vis, VisError> {
    if text.trim().is_empty() {
        return Ok(Vis::default());
    }

    let vis: Vis = serde_json::from_str(text)?;

    let mut seen = HashSet::new();
    for variable in &vis.variables {
        if !seen.insert(variable.name.as_str()) {
            return Err(VisError::DuplicateVariable {
                name: variable.name.clone(),
            });
        }
    }

    Ok(vis)
}

/// Parse a vis spec, falling back to an empty vis on any error
pub fn parse_vis_silently(text: &str) -> Vis {
    parse_vis(text).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "ignoring malformed vis spec");
        Vis::default()
    })
}

/// Keep only the args the vis declares, filling in defaults for missing ones
pub fn args_for_vis(vis: &Vis, args: &Args) -> Args {
    vis.variables
        .iter()
        .filter_map(|variable| {
            let value = args
                .get(&variable.name)
                .cloned()
                .or_else(|| variable.default_value.clone().map(ArgValue::Single))?;
            Some((variable.name.clone(), value))
        })
        .collect()
}
