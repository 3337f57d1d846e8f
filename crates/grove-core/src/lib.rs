//! Grove Core: compilation unit model, dependency graph, and symbol table

pub mod error;
pub mod graph;
pub mod model;
pub mod path;
pub mod symbols;
pub mod unit;


#[cfg(test)]
pub mod test_utils;

pub use error::{CircularDependency, UnitError};
pub use graph::{DependencyGraph, Edge};
pub use model::{
    Definition, DefinitionKind, DependencyKind, DependencyKindSet, FileScope, InvalidatedDefinition, UnitState,
    UnitType, short_name,
};
pub use path::{is_normalized, normalize_path, normalize_str};
pub use symbols::SymbolTable;
pub use unit::{
    CleanOutcome, CompilationUnit, InvalidatedContainers, InvalidationMap, PendingUpdates, Project, ProjectRef,
    UnitRef, WeakProjectRef, WeakUnitRef,
};
