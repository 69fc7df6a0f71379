//! File watcher for automatic script re-execution
//!
//! Watches a script (and its vis spec) and re-selects and re-executes it on
//! every change. A running execution is superseded by the new one.

use anyhow::Result;
use colored::Colorize;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use crate::execution::OrchestratorHandle;
use crate::model::Args;
use crate::script::{load_script, DEFAULT_VIS_FILE};
use crate::vis::{parse_vis, JsonVis, VisContract};

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Script watcher for automatic re-running
pub struct ScriptWatcher {
    script_path: PathBuf,
    vis_path: Option<PathBuf>,
    args: Args,
    manual: bool,
    handle: OrchestratorHandle,
}

impl ScriptWatcher {
    pub fn new(
        script_path: PathBuf,
        vis_path: Option<PathBuf>,
        args: Args,
        manual: bool,
        handle: OrchestratorHandle,
    ) -> Self {
        Self {
            script_path,
            vis_path,
            args,
            manual,
            handle,
        }
    }

    /// Block and re-run the script on every change until the orchestrator goes away
    pub fn start(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            Config::default(),
        )?;

        let watch_dir = self
            .script_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
        if let Some(ref vis_path) = self.vis_path {
            watcher.watch(vis_path, RecursiveMode::NonRecursive)?;
        }

        println!(
            "\n{} {} {}\n",
            "👀".cyan(),
            "Watching for changes in".bold(),
            self.script_path.display()
        );
        println!("{}", "Press Ctrl+C to stop\n".dimmed());

        self.event_loop(rx)
    }

    fn event_loop(&self, rx: Receiver<Event>) -> Result<()> {
        let mut last_run: Option<Instant> = None;

        while let Ok(event) = rx.recv() {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }

            if within_debounce(last_run) {
                continue;
            }

            if !event.paths.iter().any(|p| self.is_watched(p)) {
                continue;
            }

            last_run = Some(Instant::now());
            println!("\n{} {}", "↻".yellow(), "Script changed, re-running...".bold());

            if !self.rerun()? {
                break;
            }
        }

        Ok(())
    }

    fn is_watched(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        if self.script_path.file_name() == Some(name) {
            return true;
        }
        match self.vis_path {
            Some(ref vis_path) => vis_path.file_name() == Some(name),
            None => name == DEFAULT_VIS_FILE,
        }
    }

    /// Reload and resubmit. Returns false once the orchestrator is gone.
    pub fn rerun(&self) -> Result<bool> {
        let script = match load_script(&self.script_path, self.vis_path.as_deref()) {
            Ok(script) => script,
            Err(e) => {
                println!("{} {:#}", "✗".red(), e);
                return Ok(true);
            }
        };

        // Surface client-side problems right away; the orchestrator only
        // reports them through the sink
        if let Some(problem) = precheck(&script.vis, &self.args) {
            println!("{} {}", "✗".red(), problem.red());
        }

        let selected = if self.manual {
            self.handle.set_script_and_args_manually(script, self.args.clone())
        } else {
            self.handle.set_script_and_args(script, self.args.clone())
        };

        Ok(selected && self.handle.execute())
    }
}

fn within_debounce(last_run: Option<Instant>) -> bool {
    last_run.is_some_and(|at| at.elapsed() < DEBOUNCE)
}

/// Parse and validate without executing; a description of the first problem
pub fn precheck(vis_text: &str, args: &Args) -> Option<String> {
    let vis = match parse_vis(vis_text) {
        Ok(vis) => vis,
        Err(e) => return Some(format!("While parsing vis spec: {}", e)),
    };
    JsonVis.validate_args(&vis, args).map(|error| {
        if error.details.is_empty() {
            error.message
        } else {
            format!("{}: {}", error.message, error.details.join("; "))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionOrchestrator, Input};
    use crate::collab::StaticCluster;
    use crate::model::ClusterConfig;
    use crate::sink::ResultStore;
    use std::sync::Arc;

    #[test]
    fn test_precheck() {
        let vis = r#"{"variables": [{"name": "ns", "type": "PX_STRING"}]}"#;
        assert!(precheck(vis, &Args::new()).is_some());

        let mut args = Args::new();
        args.insert("ns".to_string(), "default".into());
        assert!(precheck(vis, &args).is_none());

        assert!(precheck("{not json", &args).unwrap().starts_with("While parsing vis spec"));
        assert!(precheck("", &Args::new()).is_none());
    }

    #[test]
    fn test_debounce_starts_open() {
        assert!(!within_debounce(None));
        assert!(within_debounce(Some(Instant::now())));
        assert!(!within_debounce(Instant::now().checked_sub(DEBOUNCE * 2)));
    }

    #[tokio::test]
    async fn test_rerun_selects_and_executes() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("script.pxl");
        std::fs::write(&script_path, "px.display(df)").unwrap();

        let cluster = Arc::new(StaticCluster::ready("dev", ClusterConfig::new("c1")));
        let mut orchestrator = ExecutionOrchestrator::builder(cluster, Arc::new(ResultStore::new())).build();

        let watcher = ScriptWatcher::new(script_path.clone(), None, Args::new(), true, orchestrator.handle());
        assert!(watcher.is_watched(&script_path));
        assert!(watcher.is_watched(&dir.path().join(DEFAULT_VIS_FILE)));
        assert!(!watcher.is_watched(&dir.path().join("notes.txt")));

        assert!(watcher.rerun().unwrap());

        match orchestrator.next_input().await {
            Input::SelectionChanged { script, manual, .. } => {
                assert_eq!(script.id, "script");
                assert!(manual);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(orchestrator.next_input().await, Input::ExecuteRequested));
    }
}
