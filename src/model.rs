//! Core value types: scripts, arguments, cluster targets and execution requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::vis::{parse_vis_silently, Vis};

/// Value of a script argument: either a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Single(String),
    List(Vec<String>),
}

impl ArgValue {
    /// Render the value the way query functions receive it (lists are comma-joined)
    pub fn to_query_value(&self) -> String {
        match self {
            ArgValue::Single(value) => value.clone(),
            ArgValue::List(values) => values.join(","),
        }
    }

    /// Whether every value is contained in `allowed`
    pub fn is_within(&self, allowed: &[String]) -> bool {
        match self {
            ArgValue::Single(value) => allowed.contains(value),
            ArgValue::List(values) => values.iter().all(|v| allowed.contains(v)),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Single(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Single(value)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(values: Vec<String>) -> Self {
        ArgValue::List(values)
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_query_value())
    }
}

/// Arguments keyed by name. Ordered so serialized args are stable.
pub type Args = BTreeMap<String, ArgValue>;

/// A script as stored by the catalog: raw code and raw vis text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub vis: String,
}

impl Script {
    pub fn new(id: impl Into<String>, code: impl Into<String>, vis: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            vis: vis.into(),
        }
    }
}

/// A selected script with its vis spec parsed leniently.
///
/// `vis_text` is kept so `execute()` can re-parse it strictly and surface
/// formatting errors the lenient parse swallowed.
#[derive(Debug, Clone)]
pub struct ParsedScript {
    pub id: String,
    pub code: String,
    pub vis_text: String,
    pub vis: Vis,
}

impl From<Script> for ParsedScript {
    fn from(script: Script) -> Self {
        let vis = parse_vis_silently(&script.vis);
        Self {
            id: script.id,
            code: script.code,
            vis_text: script.vis,
            vis,
        }
    }
}

/// Connection attributes for the target cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub id: String,
    pub attach_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough_address: Option<String>,
}

impl ClusterConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attach_credentials: true,
            passthrough_address: None,
        }
    }
}

/// One argument bound to a query function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncArg {
    pub name: String,
    pub value: String,
}

/// A query function the cluster evaluates alongside the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFunc {
    pub name: String,
    pub output_table_prefix: String,
    pub args: Vec<FuncArg>,
}

/// Everything needed to submit one attempt. Built fresh for every execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub cluster: ClusterConfig,
    pub code: String,
    pub query_funcs: Vec<QueryFunc>,
}

impl ExecutionRequest {
    pub fn new(cluster: ClusterConfig, code: impl Into<String>, query_funcs: Vec<QueryFunc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster,
            code: code.into(),
            query_funcs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_deserializes_string_or_list() {
        let args: Args = serde_json::from_str(r#"{"a": "1", "b": ["x", "y"]}"#).unwrap();
        assert_eq!(args["a"], ArgValue::Single("1".to_string()));
        assert_eq!(args["b"].to_query_value(), "x,y");
    }

    #[test]
    fn test_arg_value_within_allowed() {
        let allowed = vec!["x".to_string(), "y".to_string()];
        assert!(ArgValue::from("x").is_within(&allowed));
        assert!(!ArgValue::List(vec!["x".into(), "z".into()]).is_within(&allowed));
    }

    #[test]
    fn test_parsed_script_tolerates_bad_vis() {
        let parsed = ParsedScript::from(Script::new("s", "px.display()", "{not json"));
        assert!(parsed.vis.variables.is_empty());
        assert_eq!(parsed.vis_text, "{not json");
    }
}
