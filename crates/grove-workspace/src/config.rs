//! Workspace configuration, read from `grove.toml`

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "grove.toml";

/// Worker count used regardless of core count; analysis is mostly I/O bound.
pub const DEFAULT_WORKER_THREADS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub worker_threads: usize,
    /// Entries a cache may hold before unused ones are swept. Unbounded when absent.
    pub cache_soft_limit: Option<usize>,
    pub watch: WatchConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        WorkspaceConfig {
            worker_threads: DEFAULT_WORKER_THREADS,
            cache_soft_limit: None,
            watch: WatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory names never reported to the workspace.
    pub ignored_dirs: Vec<String>,
    /// File extensions (without the dot) that are reported. Empty means all.
    pub extensions: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            ignored_dirs: vec![".git".to_string(), "target".to_string(), "bin-debug".to_string()],
            extensions: ["as", "mxml", "css", "swc", "json", "png", "jpg", "svg"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            debounce_ms: 100,
        }
    }
}

impl WatchConfig {
    /// True if a file with this path should be reported.
    pub fn accepts(&self, path: &str) -> bool {
        if path
            .split('/')
            .any(|segment| self.ignored_dirs.iter().any(|dir| dir == segment))
        {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match file_name.rsplit_once('.') {
            Some((_, ext)) => self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

impl WorkspaceConfig {
    /// Load `grove.toml` from `root`, falling back to defaults when it does not exist.
    pub fn load_from_dir(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WorkspaceConfig = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cache_soft_limit == Some(0) {
            return Err(ConfigError::Invalid {
                field: "cache_soft_limit",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = WorkspaceConfig::from_toml_str("").unwrap();
        assert_eq!(config, WorkspaceConfig::default());
        assert_eq!(config.worker_threads, 16);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
worker_threads = 4
cache_soft_limit = 512

[watch]
ignored_dirs = ["node_modules"]
extensions = ["as"]
debounce_ms = 50
"#;
        let config = WorkspaceConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.cache_soft_limit, Some(512));
        assert_eq!(config.watch.ignored_dirs, vec!["node_modules"]);
        assert_eq!(config.watch.debounce_ms, 50);
    }

    #[test]
    fn reject_zero_workers() {
        let err = WorkspaceConfig::from_toml_str("worker_threads = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "worker_threads", .. }));
    }

    #[test]
    fn reject_unknown_types() {
        assert!(matches!(
            WorkspaceConfig::from_toml_str("worker_threads = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn watch_filter() {
        let watch = WatchConfig::default();
        assert!(watch.accepts("/proj/src/Main.as"));
        assert!(watch.accepts("/proj/libs/framework.SWC"));
        assert!(!watch.accepts("/proj/.git/HEAD"));
        assert!(!watch.accepts("/proj/target/out.as"));
        assert!(!watch.accepts("/proj/README"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config, WorkspaceConfig::default());
    }
}
