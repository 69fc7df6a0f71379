//! Script classification and loading from disk

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::model::Script;

/// Vis spec looked up next to a script when none is given
pub const DEFAULT_VIS_FILE: &str = "vis.json";

/// Whether the script mutates cluster state (deploys tracepoints).
///
/// Mutation scripts import the tracing module at top level; their effect is
/// not observable until the cluster reports the mutation as ready.
pub fn contains_mutation(code: &str) -> bool {
    code.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("import pxtrace") || line.starts_with("from pxtrace import")
    })
}

/// Whether the script streams results instead of returning them once
pub fn is_streaming(code: &str) -> bool {
    code.contains(".stream()")
}

/// Load a script from `path`. The vis spec comes from `vis_path`, or from a
/// `vis.json` next to the script when it exists.
pub fn load_script(path: &Path, vis_path: Option<&Path>) -> Result<Script> {
    let code = fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;

    let default_vis = path.parent().map(|dir| dir.join(DEFAULT_VIS_FILE));
    let vis = match (vis_path, default_vis) {
        (Some(vis_path), _) => fs::read_to_string(vis_path)
            .with_context(|| format!("Failed to read vis spec: {}", vis_path.display()))?,
        (None, Some(default)) if default.is_file() => fs::read_to_string(&default)
            .with_context(|| format!("Failed to read vis spec: {}", default.display()))?,
        (None, _) => String::new(),
    };

    let id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Script::new(id, code, vis))
}
