use thiserror::Error;

/// Failure while constructing a cache entry. Never cached; the next lookup retries.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode library container {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} problem(s) parsing {path}: {}", .problems.len(), .problems.join("; "))]
    Parse { path: String, problems: Vec<String> },

    #[error("library container {container} has no script {script}")]
    MissingScript { container: String, script: String },
}

impl CacheError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the underlying resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
