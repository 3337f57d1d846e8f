//! Projects described by a TOML manifest
//!
//! A manifest lists a project's units up front: their paths, the qualified
//! names each defines, and the names each depends on. Dependencies are
//! resolved through the project symbol table; library containers are read
//! through the workspace library manager. The CLI drives the workspace with
//! these projects, and they double as a reference implementation of the
//! unit and project capabilities.
//!
//! ```toml
//! [project]
//! name = "app"
//!
//! [[libraries]]
//! path = "/libs/framework.swc"
//!
//! [[units]]
//! path = "/app/src/Main.as"
//! definitions = ["app.Main"]
//! includes = ["/app/src/version.as"]
//! references = ["/app/assets/logo.png"]
//!
//! [[units.dependencies]]
//! target = "framework.Sprite"
//! kind = "inheritance"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};

use grove_cache::{CacheStoreBase, ScriptScopeKey};
use grove_core::{
    CircularDependency, CleanOutcome, CompilationUnit, Definition, DefinitionKind, DependencyGraph, DependencyKind,
    FileScope, Project, ProjectRef, SymbolTable, UnitError, UnitRef, UnitState, UnitType, WeakProjectRef,
    WeakUnitRef, is_normalized, normalize_path, short_name,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub project: ProjectSection,
    #[serde(default)]
    pub libraries: Vec<LibrarySection>,
    #[serde(default)]
    pub units: Vec<UnitDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSection {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDeclaration {
    pub path: String,
    #[serde(default, rename = "type")]
    pub unit_type: UnitType,
    #[serde(default)]
    pub invisible: bool,
    /// Qualified names the unit defines.
    #[serde(default)]
    pub definitions: Vec<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    /// Files the unit embeds or otherwise reads by path.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    pub target: String,
    pub kind: DependencyKind,
}

impl Manifest {
    pub fn from_toml_str(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest file. Relative paths in it are resolved against the
    /// directory holding the manifest.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut manifest: Manifest = toml::from_str(&content).map_err(|e| ManifestError::Parse(e.to_string()))?;
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        manifest.validate()?;
        Ok(manifest)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut String| {
            if !Path::new(path.as_str()).is_absolute() {
                *path = normalize_path(base.join(path.as_str()));
            }
        };
        for library in &mut self.libraries {
            resolve(&mut library.path);
        }
        for unit in &mut self.units {
            resolve(&mut unit.path);
            unit.includes.iter_mut().for_each(&resolve);
            unit.references.iter_mut().for_each(&resolve);
        }
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let paths = self
            .libraries
            .iter()
            .map(|library| &library.path)
            .chain(self.units.iter().flat_map(|unit| {
                std::iter::once(&unit.path)
                    .chain(unit.includes.iter())
                    .chain(unit.references.iter())
            }));
        for path in paths {
            if !is_normalized(path) {
                return Err(ManifestError::Parse(format!("path not normalized: {path}")));
            }
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert((unit.path.as_str(), unit.invisible)) {
                return Err(ManifestError::DuplicateUnit {
                    path: unit.path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A unit declared in a manifest, or read from a library container.
#[derive(Debug)]
pub struct ManifestUnit {
    path: String,
    name: String,
    unit_type: UnitType,
    invisible: bool,
    definitions: Vec<Definition>,
    includes: Vec<String>,
    references: Vec<String>,
    dependencies: Vec<(String, DependencyKind)>,
    project: Mutex<Option<WeakProjectRef>>,
    state: Mutex<UnitState>,
    cleans: Mutex<Vec<bool>>,
}

impl ManifestUnit {
    fn from_declaration(declaration: &UnitDeclaration, project: &ProjectRef) -> Self {
        ManifestUnit {
            path: declaration.path.clone(),
            name: file_stem(&declaration.path).to_string(),
            unit_type: declaration.unit_type,
            invisible: declaration.invisible,
            definitions: declaration
                .definitions
                .iter()
                .map(|name| Definition::new(name.clone(), DefinitionKind::Class))
                .collect(),
            includes: declaration.includes.clone(),
            references: declaration.references.clone(),
            dependencies: declaration
                .dependencies
                .iter()
                .map(|dependency| (dependency.target.clone(), dependency.kind))
                .collect(),
            project: Mutex::new(Some(project.downgrade())),
            state: Mutex::new(UnitState::Fresh),
            cleans: Mutex::new(Vec::new()),
        }
    }

    fn library(container: &str, script: &str, definitions: Vec<Definition>, dependencies: &[String], project: &ProjectRef) -> Self {
        ManifestUnit {
            path: container.to_string(),
            name: script.to_string(),
            unit_type: UnitType::Library,
            invisible: false,
            definitions,
            includes: Vec::new(),
            references: Vec::new(),
            dependencies: dependencies
                .iter()
                .map(|name| (name.clone(), DependencyKind::Signature))
                .collect(),
            project: Mutex::new(Some(project.downgrade())),
            state: Mutex::new(UnitState::Fresh),
            cleans: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> UnitState {
        *self.state.lock()
    }

    /// The `fully_clear` flag of every clean so far, oldest first.
    pub fn clean_history(&self) -> Vec<bool> {
        self.cleans.lock().clone()
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    fn set_state(&self, state: UnitState) {
        *self.state.lock() = state;
    }

    fn detach(&self) {
        *self.project.lock() = None;
    }
}

impl CompilationUnit for ManifestUnit {
    fn absolute_filename(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn unit_type(&self) -> UnitType {
        self.unit_type
    }

    fn is_invisible(&self) -> bool {
        self.invisible
    }

    fn project(&self) -> Option<ProjectRef> {
        self.project.lock().as_ref().and_then(WeakProjectRef::upgrade)
    }

    fn short_names(&self) -> Result<Vec<String>, UnitError> {
        Ok(self
            .definitions
            .iter()
            .map(|definition| definition.short_name().to_string())
            .collect())
    }

    fn definition_promises(&self) -> Vec<Definition> {
        self.definitions.clone()
    }

    fn file_scope_request_result(&self) -> Result<FileScope, UnitError> {
        if self.project().is_none() {
            return Err(UnitError::Detached {
                path: self.path.clone(),
            });
        }
        let externally_visible_definitions = if self.invisible {
            Vec::new()
        } else {
            self.definitions.clone()
        };
        Ok(FileScope {
            externally_visible_definitions,
        })
    }

    fn included_files(&self) -> Vec<String> {
        self.includes.clone()
    }

    fn clean(&self, fully_clear: bool) -> Result<CleanOutcome, UnitError> {
        self.cleans.lock().push(fully_clear);
        self.set_state(if fully_clear {
            UnitState::Cleaned
        } else {
            UnitState::NeedsResolve
        });

        let mut outcome = CleanOutcome {
            update_definitions: fully_clear && !self.invisible,
            invalidated_containers: Vec::new(),
        };
        if fully_clear && self.unit_type == UnitType::Library {
            outcome.invalidated_containers.push(self.path.clone());
        }
        Ok(outcome)
    }
}

/// Result of [`ManifestProject::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    /// Units re-resolved by this build.
    pub resolved: usize,
    /// Unit names, dependencies first.
    pub order: Vec<String>,
    /// Short names still referenced but not defined anywhere.
    pub unresolved: Vec<String>,
    #[serde(skip)]
    pub cycle: Option<CircularDependency>,
}

pub struct ManifestProject {
    name: String,
    this: Weak<ManifestProject>,
    workspace: Weak<Workspace>,
    graph: DependencyGraph,
    symbols: SymbolTable,
    declarations: Vec<UnitDeclaration>,
    libraries: HashSet<String>,
    units: RwLock<HashMap<String, Vec<Arc<ManifestUnit>>>>,
    /// Short name to units that referenced it while nothing defined it.
    unfound_definitions: RwLock<HashMap<String, Vec<WeakUnitRef>>>,
    /// Path to units that referenced it while it did not exist.
    unfound_files: RwLock<HashMap<String, Vec<WeakUnitRef>>>,
    definition_updates: Mutex<Vec<String>>,
}

impl ManifestProject {
    /// Load the manifest at `path` and open it in `workspace`.
    pub fn load(workspace: &Arc<Workspace>, path: &Path) -> Result<Arc<Self>, ManifestError> {
        Self::open(workspace, Manifest::load(path)?)
    }

    pub fn from_toml_str(workspace: &Arc<Workspace>, content: &str) -> Result<Arc<Self>, ManifestError> {
        Self::open(workspace, Manifest::from_toml_str(content)?)
    }

    /// Create every declared unit, read the declared libraries and resolve
    /// dependencies. The workspace holds the project weakly: the caller keeps
    /// it alive.
    pub fn open(workspace: &Arc<Workspace>, manifest: Manifest) -> Result<Arc<Self>, ManifestError> {
        let Manifest {
            project,
            libraries,
            units,
        } = manifest;
        let this = Arc::new_cyclic(|this| ManifestProject {
            name: project.name,
            this: this.clone(),
            workspace: Arc::downgrade(workspace),
            graph: DependencyGraph::new(),
            symbols: SymbolTable::new(),
            declarations: units,
            libraries: libraries.into_iter().map(|library| library.path).collect(),
            units: RwLock::new(HashMap::new()),
            unfound_definitions: RwLock::new(HashMap::new()),
            unfound_files: RwLock::new(HashMap::new()),
            definition_updates: Mutex::new(Vec::new()),
        });
        let project_ref = ProjectRef::new(Arc::clone(&this));

        for declaration in &this.declarations {
            let unit = Arc::new(ManifestUnit::from_declaration(declaration, &project_ref));
            this.register(workspace, unit);
        }
        let mut libraries: Vec<&String> = this.libraries.iter().collect();
        libraries.sort();
        for library in libraries {
            this.load_library(workspace, &project_ref, library);
        }
        for unit in this.unit_list() {
            this.resolve(&unit);
        }

        workspace.add_project(&project_ref);
        tracing::info!("Opened project {} with {} units", this.name, this.graph.unit_count());
        Ok(this)
    }

    pub fn project_ref(&self) -> Option<ProjectRef> {
        self.this.upgrade().map(ProjectRef::new)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Every unit of the project, ordered by path then name.
    pub fn units(&self) -> Vec<UnitRef> {
        self.unit_list().into_iter().map(UnitRef::new).collect()
    }

    /// The visible unit declared for `path`.
    pub fn unit(&self, path: &str) -> Option<Arc<ManifestUnit>> {
        self.units
            .read()
            .get(path)?
            .iter()
            .find(|unit| !unit.invisible)
            .cloned()
    }

    /// Library units read from the container at `path`.
    pub fn library_units(&self, path: &str) -> Vec<Arc<ManifestUnit>> {
        self.units
            .read()
            .get(path)
            .map(|units| {
                units
                    .iter()
                    .filter(|unit| unit.unit_type == UnitType::Library)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of units whose definitions were refreshed, in refresh order.
    pub fn definition_updates(&self) -> Vec<String> {
        self.definition_updates.lock().clone()
    }

    /// Re-resolve every unit that was cleaned since it was last resolved,
    /// then order the project. Runs as one build request.
    pub fn build(&self) -> Result<BuildOutcome, ManifestError> {
        let workspace = self.workspace.upgrade().ok_or(ManifestError::WorkspaceGone)?;
        let _request = workspace.build_session();

        let units = self.unit_list();
        let mut resolved = 0;
        for unit in &units {
            if unit.state() != UnitState::Cached {
                self.resolve(unit);
                resolved += 1;
            }
        }

        let roots: Vec<UnitRef> = units.into_iter().map(UnitRef::new).collect();
        let order = self
            .graph
            .topological_sort(&roots)
            .iter()
            .map(|unit| unit.name().to_string())
            .collect();
        let cycle = self.graph.last_circular_dependency();
        if let Some(cycle) = &cycle {
            tracing::warn!("{}: {}", self.name, cycle);
        }
        Ok(BuildOutcome {
            resolved,
            order,
            unresolved: self.unresolved_names(),
            cycle,
        })
    }

    fn unresolved_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .unfound_definitions
            .read()
            .iter()
            .filter(|(_, units)| !live_units(units).is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn unit_list(&self) -> Vec<Arc<ManifestUnit>> {
        let mut units: Vec<Arc<ManifestUnit>> = self.units.read().values().flatten().cloned().collect();
        units.sort_by(|a, b| (&a.path, &a.name).cmp(&(&b.path, &b.name)));
        units
    }

    fn register(&self, workspace: &Workspace, unit: Arc<ManifestUnit>) {
        let unit_ref = UnitRef::new(Arc::clone(&unit));
        self.graph.add_compilation_unit(&unit_ref);
        if !unit.invisible {
            for definition in &unit.definitions {
                self.symbols.insert(definition.qualified_name.clone(), unit_ref.clone());
            }
        }
        workspace.add_compilation_unit(&unit.path, &unit_ref);
        workspace.add_included_files(&unit_ref, unit.includes.iter().map(String::as_str));
        self.units.write().entry(unit.path.clone()).or_default().push(unit);
    }

    fn unregister(&self, workspace: &Workspace, unit: &Arc<ManifestUnit>) {
        let unit_ref = UnitRef::new(Arc::clone(unit));
        workspace.remove_compilation_unit(&unit_ref);
        self.symbols.remove_unit(&unit_ref);
        self.graph.remove_compilation_unit(&unit_ref);
        unit.detach();
    }

    /// Read the container at `path` and add one library unit per script.
    /// Returns the number of units added.
    fn load_library(&self, workspace: &Workspace, project: &ProjectRef, path: &str) -> usize {
        let manager = workspace.library_manager();
        let container = match manager.containers().get(path) {
            Ok(container) => container,
            Err(e) if e.is_not_found() => {
                tracing::debug!("Library {} does not exist yet", path);
                return 0;
            }
            Err(e) => {
                tracing::warn!("Skipping library {}: {}", path, e);
                return 0;
            }
        };

        let mut added = 0;
        for script in &container.scripts {
            let scope = match manager.script_scopes().get(&ScriptScopeKey::new(path, script.name.as_str())) {
                Ok(scope) => scope,
                Err(e) => {
                    tracing::warn!("Skipping script {} in {}: {}", script.name, path, e);
                    continue;
                }
            };
            let mut definitions: Vec<Definition> = scope.definitions().cloned().collect();
            definitions.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
            let unit = ManifestUnit::library(path, &script.name, definitions, &scope.dependencies, project);
            self.register(workspace, Arc::new(unit));
            added += 1;
        }
        tracing::debug!("Read {} scripts from library {}", added, path);
        added
    }

    fn resolve(&self, unit: &Arc<ManifestUnit>) {
        let unit_ref = UnitRef::new(Arc::clone(unit));
        self.graph.remove_dependencies(&unit_ref);
        forget(&self.unfound_definitions, &unit_ref);
        forget(&self.unfound_files, &unit_ref);

        for (target, kind) in &unit.dependencies {
            match self.symbols.lookup(target) {
                Some(dependee) => self.graph.add_named_dependency(&unit_ref, &dependee, *kind, target),
                None => {
                    tracing::debug!("{}: unresolved reference to {}", unit.name, target);
                    self.unfound_definitions
                        .write()
                        .entry(short_name(target).to_string())
                        .or_default()
                        .push(unit_ref.downgrade());
                }
            }
        }
        for reference in &unit.references {
            if !Path::new(reference).exists() {
                self.unfound_files
                    .write()
                    .entry(reference.clone())
                    .or_default()
                    .push(unit_ref.downgrade());
            }
        }
        unit.set_state(UnitState::Cached);
    }
}

impl Project for ManifestProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn update_public_and_internal_definitions(&self, units: &[UnitRef]) {
        let mut updates = self.definition_updates.lock();
        for unit in units {
            self.symbols.remove_unit(unit);
            if unit.project().is_none() || unit.is_invisible() {
                continue;
            }
            for definition in unit.definition_promises() {
                self.symbols.insert(definition.qualified_name, unit.clone());
            }
            updates.push(unit.name().to_string());
        }
    }

    fn invalidate_libraries(&self, changed_container_files: &HashSet<String>) -> bool {
        let (Some(workspace), Some(project)) = (self.workspace.upgrade(), self.project_ref()) else {
            return false;
        };
        let mut changed: Vec<&String> = changed_container_files
            .iter()
            .filter(|path| self.libraries.contains(*path))
            .collect();
        changed.sort();

        let mut added = false;
        for path in changed {
            for unit in self.library_units(path) {
                self.unregister(&workspace, &unit);
            }
            self.units.write().remove(path.as_str());
            let count = self.load_library(&workspace, &project, path);
            for unit in self.library_units(path) {
                self.resolve(&unit);
            }
            added = count > 0 || added;
        }
        added
    }

    fn remove_source_file(&self, path: &str) {
        let Some(workspace) = self.workspace.upgrade() else {
            return;
        };
        let removed: Vec<Arc<ManifestUnit>> = {
            let mut units = self.units.write();
            let Some(at_path) = units.get_mut(path) else {
                return;
            };
            let (removed, kept): (Vec<_>, Vec<_>) = at_path
                .drain(..)
                .partition(|unit| unit.unit_type != UnitType::Library);
            *at_path = kept;
            if at_path.is_empty() {
                units.remove(path);
            }
            removed
        };
        for unit in &removed {
            self.unregister(&workspace, unit);
        }
        tracing::debug!("{}: removed {} units for {}", self.name, removed.len(), path);
    }

    fn dependencies_on_unfound_definition(&self, short_name: &str) -> Vec<UnitRef> {
        self.unfound_definitions
            .read()
            .get(short_name)
            .map(|units| live_units(units))
            .unwrap_or_default()
    }

    fn dependencies_on_definition(&self, short_name: &str) -> Vec<UnitRef> {
        let mut dependents = Vec::new();
        for qualified_name in self.symbols.names_with_short_name(short_name) {
            for definer in self.symbols.definers(&qualified_name) {
                for (depender, _) in self.graph.incoming_edges(&definer) {
                    if self
                        .graph
                        .named_dependencies(&depender, &definer)
                        .contains_key(&qualified_name)
                    {
                        dependents.push(depender);
                    }
                }
            }
        }
        dependents
    }

    fn dependencies_on_unfound_referenced_source_file(&self, path: &str) -> Vec<UnitRef> {
        self.unfound_files
            .read()
            .get(path)
            .map(|units| live_units(units))
            .unwrap_or_default()
    }

    fn handle_added_file(&self, path: &str) -> bool {
        let (Some(workspace), Some(project)) = (self.workspace.upgrade(), self.project_ref()) else {
            return false;
        };
        let missing: Vec<&UnitDeclaration> = {
            let units = self.units.read();
            let existing = units.get(path);
            self.declarations
                .iter()
                .filter(|declaration| declaration.path == path && declaration.unit_type != UnitType::Library)
                .filter(|declaration| {
                    existing.is_none_or(|units| units.iter().all(|unit| unit.invisible != declaration.invisible))
                })
                .collect()
        };

        for declaration in &missing {
            let unit = Arc::new(ManifestUnit::from_declaration(declaration, &project));
            self.register(&workspace, Arc::clone(&unit));
            self.resolve(&unit);
        }
        if !missing.is_empty() {
            tracing::debug!("{}: created {} units for {}", self.name, missing.len(), path);
        }
        !missing.is_empty()
    }

    fn units_with_conflicting_definitions(&self, unit: &UnitRef) -> Vec<UnitRef> {
        let mut conflicting = Vec::new();
        for definition in unit.definition_promises() {
            for definer in self.symbols.definers(&definition.qualified_name) {
                if definer != *unit && !conflicting.contains(&definer) {
                    conflicting.push(definer);
                }
            }
        }
        conflicting
    }
}

impl std::fmt::Debug for ManifestProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestProject")
            .field("name", &self.name)
            .field("units", &self.graph.unit_count())
            .finish()
    }
}

fn file_stem(path: &str) -> &str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Live units still attached to a project.
fn live_units(units: &[WeakUnitRef]) -> Vec<UnitRef> {
    units
        .iter()
        .filter_map(WeakUnitRef::upgrade)
        .filter(|unit| unit.project().is_some())
        .collect()
}

fn forget(records: &RwLock<HashMap<String, Vec<WeakUnitRef>>>, unit: &UnitRef) {
    records.write().retain(|_, units| {
        units.retain(|weak| !weak.is_dead() && !weak.points_to(unit));
        !units.is_empty()
    });
}
