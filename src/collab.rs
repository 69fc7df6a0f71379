//! Collaborators the orchestrator consults before executing: the script
//! catalog, the cluster resolver and navigation state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::model::{Args, ClusterConfig, Script};

/// State of a dependency that may still be loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Loading,
    Ready(T),
    /// Loaded, but nothing matched the selection
    Missing,
}

impl<T> Resolution<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Resolution::Ready(value) => Some(value),
            Resolution::Loading | Resolution::Missing => None,
        }
    }
}

/// Source of stored scripts
pub trait ScriptCatalog: Send + Sync {
    /// Whether the listing has finished loading
    fn is_loaded(&self) -> bool;

    fn get(&self, id: &str) -> Option<Script>;

    /// Fires whenever the listing changes. Catalogs without one are
    /// re-checked only on an explicit refresh.
    fn subscribe(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

/// Resolves the selected cluster to connection attributes
pub trait ClusterResolver: Send + Sync {
    fn resolve(&self) -> Resolution<ClusterConfig>;

    /// Display name used for navigation state
    fn cluster_name(&self) -> String;

    /// Fires whenever the resolution changes
    fn subscribe(&self) -> Option<watch::Receiver<()>> {
        None
    }
}

/// Receives the current selection so it can be reflected in route state
pub trait Navigator: Send + Sync {
    fn push(&self, cluster_name: &str, script_id: &str, args: &Args);
}

/// A catalog held in memory
#[derive(Debug)]
pub struct StaticCatalog {
    loaded: Mutex<bool>,
    scripts: Mutex<HashMap<String, Script>>,
    changes: watch::Sender<()>,
}

impl StaticCatalog {
    /// An empty catalog that is already loaded
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(true),
            scripts: Mutex::new(HashMap::new()),
            changes: watch::channel(()).0,
        }
    }

    /// An empty catalog still waiting for its listing
    pub fn loading() -> Self {
        let catalog = Self::new();
        catalog.set_loaded(false);
        catalog
    }

    pub fn with_script(self, script: Script) -> Self {
        self.insert(script);
        self
    }

    pub fn insert(&self, script: Script) {
        lock(&self.scripts).insert(script.id.clone(), script);
        self.changes.send_replace(());
    }

    pub fn set_loaded(&self, loaded: bool) {
        *lock(&self.loaded) = loaded;
        self.changes.send_replace(());
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptCatalog for StaticCatalog {
    fn is_loaded(&self) -> bool {
        *lock(&self.loaded)
    }

    fn get(&self, id: &str) -> Option<Script> {
        lock(&self.scripts).get(id).cloned()
    }

    fn subscribe(&self) -> Option<watch::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}

/// A cluster resolver with a settable resolution
#[derive(Debug)]
pub struct StaticCluster {
    name: String,
    state: Mutex<Resolution<ClusterConfig>>,
    changes: watch::Sender<()>,
}

impl StaticCluster {
    pub fn ready(name: impl Into<String>, config: ClusterConfig) -> Self {
        Self::with_resolution(name, Resolution::Ready(config))
    }

    pub fn loading(name: impl Into<String>) -> Self {
        Self::with_resolution(name, Resolution::Loading)
    }

    fn with_resolution(name: impl Into<String>, resolution: Resolution<ClusterConfig>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(resolution),
            changes: watch::channel(()).0,
        }
    }

    pub fn set(&self, resolution: Resolution<ClusterConfig>) {
        *lock(&self.state) = resolution;
        self.changes.send_replace(());
    }
}

impl ClusterResolver for StaticCluster {
    fn resolve(&self) -> Resolution<ClusterConfig> {
        lock(&self.state).clone()
    }

    fn cluster_name(&self) -> String {
        self.name.clone()
    }

    fn subscribe(&self) -> Option<watch::Receiver<()>> {
        Some(self.changes.subscribe())
    }
}

/// Navigation that goes nowhere
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNavigator;

impl Navigator for NullNavigator {
    fn push(&self, cluster_name: &str, script_id: &str, args: &Args) {
        tracing::trace!(cluster = cluster_name, script = script_id, args = args.len(), "navigation push");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_catalog_loading_state() {
        let catalog = StaticCatalog::loading().with_script(Script::new("a", "px.display()", ""));
        assert!(!catalog.is_loaded());
        assert!(catalog.get("a").is_some());

        catalog.set_loaded(true);
        assert!(catalog.is_loaded());
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_static_cluster_resolution() {
        let cluster = StaticCluster::loading("prod");
        assert_eq!(cluster.resolve(), Resolution::Loading);

        cluster.set(Resolution::Ready(ClusterConfig::new("c1")));
        assert_eq!(cluster.resolve().ready().map(|c| c.id), Some("c1".to_string()));
        assert_eq!(cluster.cluster_name(), "prod");
    }

    #[tokio::test]
    async fn test_setters_signal_subscribers() {
        let cluster = StaticCluster::loading("prod");
        let mut cluster_changes = cluster.subscribe().unwrap();
        assert!(!cluster_changes.has_changed().unwrap());
        cluster.set(Resolution::Missing);
        assert!(cluster_changes.has_changed().unwrap());
        cluster_changes.changed().await.unwrap();

        let catalog = StaticCatalog::loading();
        let mut catalog_changes = catalog.subscribe().unwrap();
        catalog.set_loaded(true);
        catalog_changes.changed().await.unwrap();
        assert!(!catalog_changes.has_changed().unwrap());
    }
}
