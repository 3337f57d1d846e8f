//! Error types shared across the engine

use thiserror::Error;

/// Failure reported by a compilation unit while producing or dropping derived data.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("unit {path} is no longer attached to a project")]
    Detached { path: String },

    #[error("failed to build file scope for {path}: {reason}")]
    FileScope { path: String, reason: String },

    #[error("failed to clean {path}: {reason}")]
    Clean { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A cycle found while ordering units. The units are listed in the order the
/// cycle was walked; the first unit is the one the back edge pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circular dependency: {}", .units.join(" -> "))]
pub struct CircularDependency {
    pub units: Vec<String>,
}
