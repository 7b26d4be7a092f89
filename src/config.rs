use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, WorkgraphError};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Max concurrent build children. Never less than 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// The manifest script the executor runs per project.
    #[serde(default = "default_build_script")]
    pub build_script: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Extra ignore globs, unioned with the built-in set.
    #[serde(default)]
    pub ignore: Vec<String>,
    /// The manifest script dev targets run under the supervisor.
    #[serde(default = "default_dev_script")]
    pub dev_script: String,
}

fn default_concurrency() -> usize {
    4
}
fn default_build_script() -> String {
    "build".to_string()
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_dev_script() -> String {
    "dev".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            build_script: default_build_script(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore: Vec::new(),
            dev_script: default_dev_script(),
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".config"))
                .ok()
        })
        .map(|p| p.join("workgraph/workgraph.toml"))
}

/// Overlay one parsed table onto another, in place. Nested tables merge
/// key by key; any other value kind wins outright.
fn overlay_table(base: &mut toml::value::Table, overlay: toml::value::Table) {
    for (key, incoming) in overlay {
        match base.entry(key) {
            toml::map::Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            toml::map::Entry::Occupied(mut slot) => match incoming {
                toml::Value::Table(nested) => {
                    if let toml::Value::Table(existing) = slot.get_mut() {
                        overlay_table(existing, nested);
                    } else {
                        // A table displaces a scalar of the same name.
                        slot.insert(toml::Value::Table(nested));
                    }
                }
                other => {
                    slot.insert(other);
                }
            },
        }
    }
}

impl GlobalConfig {
    /// Resolve the effective configuration.
    ///
    /// With `--config` the named file is authoritative and read on its own.
    /// The default path overlays a project-local `workgraph.toml` on top of
    /// the user-level file under `$XDG_CONFIG_HOME/workgraph/`, table by
    /// table, so a project only pins the keys it cares about. Defaults fill
    /// in whatever no file provides.
    pub fn load(path: Option<&Path>, workspace_root: &Path) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Ok(Self::default());
            }
            let content = std::fs::read_to_string(p).map_err(|e| {
                WorkgraphError::ConfigError(format!("cannot read config {}: {}", p.display(), e))
            })?;
            return Ok(toml::from_str(&content)?);
        }

        let candidates = [
            user_config_path(),
            Some(workspace_root.join("workgraph.toml")),
        ];
        let mut accumulated = toml::value::Table::new();
        let mut found_any = false;
        for layer in candidates.into_iter().flatten() {
            if !layer.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(&layer).map_err(|e| {
                WorkgraphError::ConfigError(format!(
                    "cannot read config {}: {}",
                    layer.display(),
                    e
                ))
            })?;
            let table: toml::value::Table = toml::from_str(&content).map_err(|e| {
                WorkgraphError::ConfigError(format!("{}: {}", layer.display(), e))
            })?;
            overlay_table(&mut accumulated, table);
            found_any = true;
        }

        if !found_any {
            return Ok(Self::default());
        }
        Ok(toml::Value::Table(accumulated).try_into()?)
    }
}
