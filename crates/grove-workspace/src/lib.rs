//! Cross-project invalidation and build/idle coordination

pub mod build_sync;
pub mod config;
pub mod error;
pub mod file_spec;
pub mod listener;
pub mod manifest;
pub mod path_index;
pub mod report;
pub mod workspace;


#[cfg(test)]
pub mod test_utils;

pub use build_sync::BuildSynchronizationState;
pub use config::{CONFIG_FILE, DEFAULT_WORKER_THREADS, WatchConfig, WorkspaceConfig};
pub use error::{ConfigError, ManifestError, Result, WorkspaceError};
pub use file_spec::FileSpecification;
pub use listener::{InvalidationListener, LoggingListener, RecordingListener};
pub use manifest::{BuildOutcome, DependencyDeclaration, Manifest, ManifestProject, ManifestUnit, UnitDeclaration};
pub use path_index::{PathIndex, Visibility};
pub use report::{ChangeKind, InvalidatedUnit, InvalidationReport};
pub use workspace::{IdleSession, RequestGuard, Workspace};
