//! Tool descriptor registry with hot reload.
//!
//! Each callable tool is described by one JSON file in the descriptors
//! directory. A [`notify`] watcher picks up created, changed, and deleted
//! files so a tool-server can announce or retract capabilities without a
//! process restart. Dispatch is by exact name; the catalog view feeds the
//! tool selector's similarity shortlist only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pipeline::tool_selector::ToolCatalogEntry;

const DESCRIPTOR_EXT: &str = "json";

/// One registered tool: what it is called, what it does, what arguments it
/// takes, and which server executes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, the dispatch key.
    pub name: String,
    /// Human-readable description, used for similarity scoring.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub args_schema: serde_json::Value,
    /// Base URL of the tool-server that executes this tool.
    pub endpoint: String,
    /// Execution timeout, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

/// Registry of tool descriptors, backed by JSON files on disk and kept
/// current by a file watcher.
pub struct ToolRegistry {
    descriptors: RwLock<HashMap<String, ToolDescriptor>>,
    descriptors_dir: PathBuf,
    _watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("descriptors_dir", &self.descriptors_dir)
            .field("tool_count", &self.count())
            .finish()
    }
}

impl ToolRegistry {
    /// Load descriptors from `descriptors_dir` and start watching it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or the watcher
    /// cannot be started.
    pub fn new(descriptors_dir: PathBuf) -> anyhow::Result<Arc<Self>> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                if let Ok(evt) = event {
                    for path in evt.paths {
                        if let Err(e) = tx.send(path) {
                            warn!(error = %e, "tool watcher channel closed");
                        }
                    }
                }
            })?;

        if descriptors_dir.is_dir() {
            watcher.watch(&descriptors_dir, RecursiveMode::NonRecursive)?;
        }

        let registry = Arc::new(Self {
            descriptors: RwLock::new(HashMap::new()),
            descriptors_dir: descriptors_dir.clone(),
            _watcher: Some(watcher),
        });
        registry.reload_all()?;

        let watcher_registry = Arc::clone(&registry);
        std::thread::spawn(move || {
            while let Ok(path) = rx.recv() {
                watcher_registry.handle_fs_event(&path);
            }
        });

        info!(
            count = registry.count(),
            dir = %descriptors_dir.display(),
            "tool registry initialised"
        );
        Ok(registry)
    }

    /// Load descriptors without a watcher. Tests and one-shot subcommands
    /// have no use for hot reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn new_without_watcher(descriptors_dir: PathBuf) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(Self {
            descriptors: RwLock::new(HashMap::new()),
            descriptors_dir,
            _watcher: None,
        });
        registry.reload_all()?;
        Ok(registry)
    }

    fn handle_fs_event(&self, path: &Path) {
        if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXT) {
            return;
        }
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");

        if path.exists() {
            debug!(tool = name, "reloading tool descriptor");
            if let Err(e) = self.reload_tool(name) {
                warn!(tool = name, error = %e, "tool descriptor reload failed");
            }
        } else {
            debug!(tool = name, "dropping deleted tool descriptor");
            if let Ok(mut map) = self.descriptors.write() {
                map.remove(name);
            }
        }
    }

    /// Look up a descriptor by exact tool name.
    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.descriptors
            .read()
            .ok()
            .and_then(|map| map.get(name).cloned())
    }

    /// The full catalog as name/description pairs for the tool selector.
    pub fn catalog(&self) -> Vec<ToolCatalogEntry> {
        let Ok(map) = self.descriptors.read() else {
            return Vec::new();
        };
        map.values()
            .map(|d| ToolCatalogEntry {
                name: d.name.clone(),
                description: d.description.clone(),
            })
            .collect()
    }

    /// Re-read one descriptor file; a missing file unregisters the tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn reload_tool(&self, name: &str) -> anyhow::Result<()> {
        let path = self.descriptors_dir.join(format!("{name}.{DESCRIPTOR_EXT}"));

        if !path.exists() {
            if let Ok(mut map) = self.descriptors.write() {
                map.remove(name);
            }
            return Ok(());
        }

        let descriptor = read_descriptor(&path)?;
        if let Ok(mut map) = self.descriptors.write() {
            map.insert(descriptor.name.clone(), descriptor);
        }
        Ok(())
    }

    /// Re-read every descriptor file in the directory, replacing the
    /// in-memory set. Invalid files are skipped with a warning rather than
    /// failing the reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory itself cannot be listed.
    pub fn reload_all(&self) -> anyhow::Result<()> {
        if !self.descriptors_dir.is_dir() {
            return Ok(());
        }

        let mut loaded = HashMap::new();
        for entry in std::fs::read_dir(&self.descriptors_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXT) {
                continue;
            }
            match read_descriptor(&path) {
                Ok(descriptor) => {
                    loaded.insert(descriptor.name.clone(), descriptor);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid tool descriptor");
                }
            }
        }

        if let Ok(mut map) = self.descriptors.write() {
            *map = loaded;
        }
        Ok(())
    }

    /// Number of registered tools.
    pub fn count(&self) -> usize {
        self.descriptors.read().map(|m| m.len()).unwrap_or(0)
    }
}

fn read_descriptor(path: &Path) -> anyhow::Result<ToolDescriptor> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_descriptor(dir: &Path, name: &str) {
        let descriptor = serde_json::json!({
            "name": name,
            "description": format!("{name} tool"),
            "args_schema": {"type": "object", "properties": {}},
            "endpoint": format!("https://{name}.example.com/invoke"),
        });
        std::fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_string_pretty(&descriptor).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn loads_descriptors_and_serves_catalog() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "search");
        write_descriptor(dir.path(), "weather");

        let registry = ToolRegistry::new_without_watcher(dir.path().to_path_buf()).unwrap();
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.catalog().len(), 2);
        assert_eq!(
            registry.get("search").unwrap().timeout_secs,
            120,
            "timeout defaults when the descriptor omits it"
        );
    }

    #[test]
    fn invalid_descriptor_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "good");
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let registry = ToolRegistry::new_without_watcher(dir.path().to_path_buf()).unwrap();
        assert_eq!(registry.count(), 1);
        assert!(registry.get("good").is_some());
    }

    #[test]
    fn reload_tool_unregisters_when_the_file_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "search");
        let registry = ToolRegistry::new_without_watcher(dir.path().to_path_buf()).unwrap();
        assert!(registry.get("search").is_some());

        std::fs::remove_file(dir.path().join("search.json")).unwrap();
        registry.reload_tool("search").unwrap();
        assert!(registry.get("search").is_none());
    }
}
