//! Capability interfaces for compilation units and projects
//!
//! The engine never looks inside a unit. It needs a handful of capabilities
//! (identity, definitions, cleaning) from any unit regardless of kind, and a
//! handful of queries from the project that owns it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::error::UnitError;
use crate::graph::DependencyGraph;
use crate::model::{Definition, FileScope, UnitType};

/// A unit of source: one file, one included fragment, or one synthesized unit.
pub trait CompilationUnit: Send + Sync + fmt::Debug {
    /// Normalized absolute path of the file this unit was built from.
    fn absolute_filename(&self) -> &str;

    /// Display name, also the default tie-break when ordering units.
    fn name(&self) -> &str;

    fn unit_type(&self) -> UnitType;

    /// Invisible units shadow a visible unit for the same file (e.g. an
    /// editor buffer) and never export definitions to the project scope.
    fn is_invisible(&self) -> bool {
        false
    }

    /// The owning project, or `None` once the unit has been removed from it.
    fn project(&self) -> Option<ProjectRef>;

    /// Base names of the definitions this unit declares.
    fn short_names(&self) -> Result<Vec<String>, UnitError>;

    /// Definitions known without analyzing the unit. May be empty.
    fn definition_promises(&self) -> Vec<Definition>;

    /// Build (or fetch) the file scope of the unit.
    fn file_scope_request_result(&self) -> Result<FileScope, UnitError>;

    /// Files pulled in by `include` directives.
    fn included_files(&self) -> Vec<String> {
        Vec::new()
    }

    /// Drop derived data. `fully_clear` drops the file scope as well; without
    /// it only cross-unit resolution is discarded.
    fn clean(&self, fully_clear: bool) -> Result<CleanOutcome, UnitError>;
}

/// What a unit reports back after [`CompilationUnit::clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanOutcome {
    /// The project must refresh this unit's public and internal definitions.
    pub update_definitions: bool,
    /// Library container files whose contents are now stale.
    pub invalidated_containers: Vec<String>,
}

/// A compiler project: owns units and their dependency graph.
pub trait Project: Send + Sync {
    fn name(&self) -> &str;

    fn dependency_graph(&self) -> &DependencyGraph;

    /// Refresh the project symbol table for units cleaned during an idle state.
    fn update_public_and_internal_definitions(&self, units: &[UnitRef]);

    /// Returns true if any library unit was added or replaced.
    fn invalidate_libraries(&self, changed_container_files: &HashSet<String>) -> bool;

    fn remove_source_file(&self, path: &str);

    /// Units holding an unresolved reference to a definition with this base name.
    fn dependencies_on_unfound_definition(&self, short_name: &str) -> Vec<UnitRef>;

    /// Units depending on any definition with this base name.
    fn dependencies_on_definition(&self, short_name: &str) -> Vec<UnitRef>;

    /// Units that referenced this path (e.g. an embed source) while it did not exist.
    fn dependencies_on_unfound_referenced_source_file(&self, path: &str) -> Vec<UnitRef>;

    /// Create units for a newly added file. Returns true if any were created.
    fn handle_added_file(&self, path: &str) -> bool;

    /// Units defining the same qualified names as `unit`; they must be
    /// re-examined together when one of them changes.
    fn units_with_conflicting_definitions(&self, _unit: &UnitRef) -> Vec<UnitRef> {
        Vec::new()
    }
}

/// Address of the data behind a trait object, ignoring the vtable.
fn thin_ptr<T: ?Sized>(ptr: *const T) -> usize {
    ptr.cast::<()>() as usize
}

/// Shared handle to a unit, compared and hashed by identity.
#[derive(Clone)]
pub struct UnitRef(pub Arc<dyn CompilationUnit>);

impl UnitRef {
    pub fn new<U: CompilationUnit + 'static>(unit: Arc<U>) -> Self {
        UnitRef(unit)
    }

    pub fn downgrade(&self) -> WeakUnitRef {
        WeakUnitRef(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &UnitRef) -> bool {
        thin_ptr(Arc::as_ptr(&self.0)) == thin_ptr(Arc::as_ptr(&other.0))
    }
}

impl std::ops::Deref for UnitRef {
    type Target = dyn CompilationUnit;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for UnitRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for UnitRef {}

impl Hash for UnitRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        thin_ptr(Arc::as_ptr(&self.0)).hash(state);
    }
}

impl fmt::Debug for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitRef({})", self.0.absolute_filename())
    }
}

/// Non-owning handle to a unit, as held by the workspace path indices.
#[derive(Clone)]
pub struct WeakUnitRef(Weak<dyn CompilationUnit>);

impl WeakUnitRef {
    pub fn upgrade(&self) -> Option<UnitRef> {
        self.0.upgrade().map(UnitRef)
    }

    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }

    pub fn points_to(&self, unit: &UnitRef) -> bool {
        thin_ptr(self.0.as_ptr()) == thin_ptr(Arc::as_ptr(&unit.0))
    }
}

impl fmt::Debug for WeakUnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(unit) => write!(f, "WeakUnitRef({})", unit.absolute_filename()),
            None => f.write_str("WeakUnitRef(<dropped>)"),
        }
    }
}

/// Shared handle to a project, compared and hashed by identity.
#[derive(Clone)]
pub struct ProjectRef(pub Arc<dyn Project>);

impl ProjectRef {
    pub fn new<P: Project + 'static>(project: Arc<P>) -> Self {
        ProjectRef(project)
    }

    pub fn downgrade(&self) -> WeakProjectRef {
        WeakProjectRef(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ProjectRef) -> bool {
        thin_ptr(Arc::as_ptr(&self.0)) == thin_ptr(Arc::as_ptr(&other.0))
    }
}

impl std::ops::Deref for ProjectRef {
    type Target = dyn Project;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for ProjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ProjectRef {}

impl Hash for ProjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        thin_ptr(Arc::as_ptr(&self.0)).hash(state);
    }
}

impl fmt::Debug for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectRef({})", self.0.name())
    }
}

/// Non-owning handle to a project.
#[derive(Clone)]
pub struct WeakProjectRef(Weak<dyn Project>);

impl WeakProjectRef {
    pub fn upgrade(&self) -> Option<ProjectRef> {
        self.0.upgrade().map(ProjectRef)
    }

    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }

    pub fn points_to(&self, project: &ProjectRef) -> bool {
        thin_ptr(self.0.as_ptr()) == thin_ptr(Arc::as_ptr(&project.0))
    }
}

impl fmt::Debug for WeakProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(project) => write!(f, "WeakProjectRef({})", project.name()),
            None => f.write_str("WeakProjectRef(<dropped>)"),
        }
    }
}

/// Units whose definitions must be refreshed when the idle state ends, per project.
pub type PendingUpdates = HashMap<ProjectRef, HashSet<UnitRef>>;

/// Stale library container files, per project.
pub type InvalidatedContainers = HashMap<ProjectRef, HashSet<String>>;

/// Definitions about to become stale, per project.
pub type InvalidationMap = HashMap<ProjectRef, Vec<crate::model::InvalidatedDefinition>>;
