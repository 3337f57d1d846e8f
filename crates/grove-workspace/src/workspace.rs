//! The workspace: shared state of every project open in one compiler session
//!
//! Maps file paths to compilation units, turns file system events into
//! minimal invalidation of dependent units, and serializes those
//! invalidations against running builds through the idle state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use grove_cache::{AssetCache, LibraryManager, MarkupCache, NamespaceCache};
use grove_core::{
    DependencyGraph, InvalidatedContainers, InvalidatedDefinition, InvalidationMap, PendingUpdates, ProjectRef,
    UnitRef, UnitType, WeakProjectRef, debug_assert_normalized,
};
use parking_lot::RwLock;
use rayon::ThreadPool;

use crate::build_sync::BuildSynchronizationState;
use crate::config::WorkspaceConfig;
use crate::error::{Result, WorkspaceError};
use crate::file_spec::FileSpecification;
use crate::listener::InvalidationListener;
use crate::path_index::{PathIndex, Visibility};
use crate::report::{ChangeKind, InvalidatedUnit, InvalidationReport};

pub struct Workspace {
    config: WorkspaceConfig,
    sync: BuildSynchronizationState,
    pool: RwLock<Option<Arc<ThreadPool>>>,
    projects: RwLock<Vec<WeakProjectRef>>,
    listeners: RwLock<Vec<Arc<dyn InvalidationListener>>>,
    /// Source path to the units built from it.
    path_index: PathIndex,
    /// Included file path to the units including it.
    include_index: PathIndex,
    file_specs: DashMap<String, Arc<FileSpecification>>,
    library_manager: LibraryManager,
    markup_cache: MarkupCache,
    namespace_cache: NamespaceCache,
    asset_cache: AssetCache,
    sequence: AtomicU64,
}

/// Holds the idle state until dropped, collecting the units whose
/// definitions must be refreshed when it ends.
pub struct IdleSession<'a> {
    workspace: &'a Workspace,
    pending: PendingUpdates,
}

impl IdleSession<'_> {
    pub fn pending_mut(&mut self) -> &mut PendingUpdates {
        &mut self.pending
    }
}

impl Drop for IdleSession<'_> {
    fn drop(&mut self) {
        self.workspace.end_idle_state(std::mem::take(&mut self.pending));
    }
}

/// Counts as one running build request until dropped.
pub struct RequestGuard<'a> {
    sync: &'a BuildSynchronizationState,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.sync.end_request();
    }
}

impl Workspace {
    pub fn new(config: WorkspaceConfig) -> Result<Arc<Self>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|index| format!("grove-worker-{index}"))
            .panic_handler(|_| tracing::error!("Build request panicked"))
            .build()?;
        let soft_limit = config.cache_soft_limit;
        tracing::debug!("Workspace created with {} workers", config.worker_threads);

        Ok(Arc::new(Workspace {
            config,
            sync: BuildSynchronizationState::new(),
            pool: RwLock::new(Some(Arc::new(pool))),
            projects: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            path_index: PathIndex::new(),
            include_index: PathIndex::new(),
            file_specs: DashMap::new(),
            library_manager: LibraryManager::new(soft_limit),
            markup_cache: MarkupCache::new(soft_limit),
            namespace_cache: NamespaceCache::new(soft_limit),
            asset_cache: AssetCache::new(soft_limit),
            sequence: AtomicU64::new(0),
        }))
    }

    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::new(WorkspaceConfig::default())
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Shut down the worker pool. Requests already queued still run; new
    /// ones are refused.
    pub fn close(&self) {
        if self.pool.write().take().is_some() {
            tracing::info!("Workspace closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.read().is_none()
    }

    // Projects

    pub fn add_project(&self, project: &ProjectRef) {
        let mut projects = self.projects.write();
        projects.retain(|weak| !weak.is_dead());
        if !projects.iter().any(|weak| weak.points_to(project)) {
            tracing::debug!("Added project {}", project.name());
            projects.push(project.downgrade());
        }
    }

    pub fn delete_project(&self, project: &ProjectRef) {
        self.projects
            .write()
            .retain(|weak| !weak.is_dead() && !weak.points_to(project));
    }

    /// Live projects, in the order they were added.
    pub fn projects(&self) -> Vec<ProjectRef> {
        self.projects.read().iter().filter_map(WeakProjectRef::upgrade).collect()
    }

    // Listeners

    pub fn add_invalidation_listener(&self, listener: Arc<dyn InvalidationListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|existing| same_listener(existing, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_invalidation_listener(&self, listener: &Arc<dyn InvalidationListener>) {
        self.listeners
            .write()
            .retain(|existing| !same_listener(existing, listener));
    }

    // File events

    /// The contents of `path` changed.
    pub fn file_changed(&self, path: &str) -> InvalidationReport {
        debug_assert_normalized!(path);
        tracing::info!("File changed: {}", path);
        let mut report = self.new_report(ChangeKind::Changed, Some(path));
        {
            let mut session = self.idle_session();
            let units = self.collect_associated_units(path);
            self.invalidate(path, &units, &mut session, &mut report);
            self.file_specification(path);
        }
        report.finish()
    }

    /// `path` was created. Projects get a chance to create units for it, and
    /// units that failed to resolve something it may now provide are invalidated.
    pub fn file_added(&self, path: &str) -> InvalidationReport {
        debug_assert_normalized!(path);
        tracing::info!("File added: {}", path);
        let mut report = self.new_report(ChangeKind::Added, Some(path));
        {
            let mut session = self.idle_session();
            self.file_specification(path);
            self.library_manager.remove(path);

            let projects = self.projects();
            let changed_files = HashSet::from([path.to_string()]);
            let mut added = false;
            for project in &projects {
                added = project.handle_added_file(path) || added;
                added = project.invalidate_libraries(&changed_files) || added;
            }

            let mut units = HashSet::new();
            if added {
                let related = self.collect_associated_units(path);
                units.extend(self.units_depending_on_missing_definitions(&related));
                units.extend(related);
            }
            for project in &projects {
                units.extend(project.dependencies_on_unfound_referenced_source_file(path));
            }
            self.invalidate(path, &units, &mut session, &mut report);
        }
        report.finish()
    }

    /// `path` was deleted. Its units are invalidated, then dropped from their
    /// projects and from the path indices.
    pub fn file_removed(&self, path: &str) -> InvalidationReport {
        debug_assert_normalized!(path);
        tracing::info!("File removed: {}", path);
        let mut report = self.new_report(ChangeKind::Removed, Some(path));
        {
            let mut session = self.idle_session();
            let units = self.collect_associated_units(path);
            let mut projects: Vec<ProjectRef> = units
                .iter()
                .filter_map(|unit| unit.project())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            projects.sort_by(|a, b| a.name().cmp(b.name()));

            self.invalidate(path, &units, &mut session, &mut report);

            for project in &projects {
                project.remove_source_file(path);
            }
            for unit in &units {
                if unit.unit_type() != UnitType::Library {
                    self.path_index.remove(path, unit);
                    self.include_index.remove(path, unit);
                }
            }
            self.file_specs.remove(path);
        }
        report.finish()
    }

    /// Library units were swapped. `removed` lose their definitions; units
    /// that depended on names now provided by `added` re-resolve.
    /// `run_while_idle` runs before the idle state ends.
    pub fn swc_changed(
        &self,
        removed: &HashSet<UnitRef>,
        added: &HashSet<UnitRef>,
        run_while_idle: impl FnOnce(),
    ) -> InvalidationReport {
        tracing::info!("Library units changed: {} removed, {} added", removed.len(), added.len());
        let mut report = self.new_report(ChangeKind::LibraryChanged, None);
        {
            let mut session = self.idle_session();
            let mut changed = removed.clone();
            changed.extend(self.units_depending_on_missing_definitions(added));

            let to_clean = DependencyGraph::compute_invalidation_set(changed);
            self.notify_listeners(&to_clean);
            let mut containers = InvalidatedContainers::new();
            self.clean_units(
                &to_clean,
                |unit| removed.contains(unit),
                &mut session.pending,
                &mut containers,
                &mut report,
            );
            // The caller swaps the libraries itself inside run_while_idle.
            if !containers.is_empty() {
                tracing::debug!("Ignoring {} invalidated container sets", containers.len());
            }
            run_while_idle();
        }
        report.finish()
    }

    // Units and paths

    pub fn add_compilation_unit(&self, path: &str, unit: &UnitRef) {
        debug_assert_normalized!(path);
        self.path_index.add(path, unit);
    }

    /// Forget `unit`: its path mapping and the files it includes. The file
    /// specification goes too once nothing maps to the path.
    pub fn remove_compilation_unit(&self, unit: &UnitRef) {
        let path = unit.absolute_filename();
        self.path_index.remove(path, unit);
        self.include_index.remove_unit(unit);
        if !self.path_index.contains_path(path) && !self.include_index.contains_path(path) {
            self.file_specs.remove(path);
        }
        let purged = self.path_index.purge() + self.include_index.purge();
        if purged > 0 {
            tracing::debug!("Purged {} paths whose units are gone", purged);
        }
    }

    pub fn add_included_files<'a>(&self, unit: &UnitRef, files: impl IntoIterator<Item = &'a str>) {
        self.include_index.add_all(files, unit);
    }

    pub fn remove_included_files(&self, unit: &UnitRef) {
        self.include_index.remove_unit(unit);
    }

    /// Visible units built from `path`, optionally restricted to one project.
    pub fn compilation_units(&self, path: &str, project: Option<&ProjectRef>) -> Vec<UnitRef> {
        debug_assert_normalized!(path);
        self.path_index.get(path, Visibility::VisibleOnly, project)
    }

    pub fn invisible_compilation_units(&self, path: &str, project: Option<&ProjectRef>) -> Vec<UnitRef> {
        debug_assert_normalized!(path);
        self.path_index.get(path, Visibility::InvisibleOnly, project)
    }

    pub fn invisible_and_visible_compilation_units(&self, path: &str, project: Option<&ProjectRef>) -> Vec<UnitRef> {
        debug_assert_normalized!(path);
        self.path_index.get(path, Visibility::All, project)
    }

    /// Units that include `path`.
    pub fn including_compilation_units(&self, path: &str, project: Option<&ProjectRef>) -> Vec<UnitRef> {
        debug_assert_normalized!(path);
        self.include_index.get(path, Visibility::All, project)
    }

    pub fn file_specification(&self, path: &str) -> Arc<FileSpecification> {
        debug_assert_normalized!(path);
        self.file_specs
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(FileSpecification::new(path)))
            .clone()
    }

    pub fn is_known_file(&self, path: &str) -> bool {
        self.file_specs.contains_key(path)
    }

    // Build synchronization

    pub fn start_building(&self) {
        self.sync.start_request(false);
    }

    pub fn done_building(&self) {
        self.sync.end_request();
    }

    /// Block until a request may run. File scope requests are also admitted
    /// while the idle owner refreshes definitions.
    pub fn start_request(&self, file_scope: bool) {
        self.sync.start_request(file_scope);
    }

    pub fn end_request(&self) {
        self.sync.end_request();
    }

    pub fn build_session(&self) -> RequestGuard<'_> {
        self.request(false)
    }

    pub fn request(&self, file_scope: bool) -> RequestGuard<'_> {
        self.sync.start_request(file_scope);
        RequestGuard { sync: &self.sync }
    }

    pub fn start_idle_state(&self) {
        self.sync.start_idle_state();
    }

    /// Refresh the definitions of `pending` units with file scope requests
    /// admitted, then leave the idle state.
    pub fn end_idle_state(&self, pending: PendingUpdates) {
        self.sync.start_allowing_file_scope_requests();
        let mut updates: Vec<(ProjectRef, Vec<UnitRef>)> = pending
            .into_iter()
            .map(|(project, units)| {
                let mut units: Vec<UnitRef> = units.into_iter().collect();
                units.sort_by(|a, b| (a.absolute_filename(), a.name()).cmp(&(b.absolute_filename(), b.name())));
                (project, units)
            })
            .collect();
        updates.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        for (project, units) in &updates {
            tracing::debug!("Updating {} definitions in {}", units.len(), project.name());
            project.update_public_and_internal_definitions(units);
        }
        self.sync.end_allowing_file_scope_requests();
        self.sync.end_idle_state();
    }

    pub fn idle_session(&self) -> IdleSession<'_> {
        self.sync.start_idle_state();
        IdleSession {
            workspace: self,
            pending: PendingUpdates::new(),
        }
    }

    pub fn is_building(&self) -> bool {
        self.sync.is_building()
    }

    /// Run `task` on the worker pool as one build request. The request is
    /// admitted before this returns.
    pub fn spawn_request<F>(self: &Arc<Self>, file_scope: bool, task: F) -> Result<()>
    where
        F: FnOnce(&Workspace) + Send + 'static,
    {
        let pool = self.pool.read().clone().ok_or(WorkspaceError::Closed)?;
        self.sync.start_request(file_scope);
        let workspace = Arc::clone(self);
        pool.spawn(move || {
            let _request = RequestGuard { sync: &workspace.sync };
            task(&workspace);
        });
        Ok(())
    }

    // Caches

    pub fn library_manager(&self) -> &LibraryManager {
        &self.library_manager
    }

    pub fn markup_cache(&self) -> &MarkupCache {
        &self.markup_cache
    }

    pub fn namespace_cache(&self) -> &NamespaceCache {
        &self.namespace_cache
    }

    pub fn asset_cache(&self) -> &AssetCache {
        &self.asset_cache
    }

    // Invalidation

    fn new_report(&self, kind: ChangeKind, path: Option<&str>) -> InvalidationReport {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        InvalidationReport::new(sequence, kind, path.map(str::to_string))
    }

    /// Units built from or including `path`, plus units whose definitions
    /// collide with theirs.
    fn collect_associated_units(&self, path: &str) -> HashSet<UnitRef> {
        let mut units: HashSet<UnitRef> = self.path_index.visible_and_invisible(path).into_iter().collect();
        units.extend(self.include_index.visible_and_invisible(path));

        let conflicting: Vec<UnitRef> = units
            .iter()
            .filter_map(|unit| unit.project().map(|project| project.units_with_conflicting_definitions(unit)))
            .flatten()
            .collect();
        units.extend(conflicting);
        units
    }

    /// Units that failed to resolve, or resolved, a name one of `units` defines.
    fn units_depending_on_missing_definitions(&self, units: &HashSet<UnitRef>) -> HashSet<UnitRef> {
        let mut dependents = HashSet::new();
        for unit in units {
            let Some(project) = unit.project() else {
                continue;
            };
            let short_names = match unit.short_names() {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!("Skipping definitions of {}: {}", unit.absolute_filename(), e);
                    continue;
                }
            };
            for name in short_names {
                dependents.extend(project.dependencies_on_unfound_definition(&name));
                dependents.extend(project.dependencies_on_definition(&name));
            }
        }
        dependents
    }

    fn invalidate(
        &self,
        path: &str,
        units: &HashSet<UnitRef>,
        session: &mut IdleSession<'_>,
        report: &mut InvalidationReport,
    ) {
        self.markup_cache.remove_file(path);
        self.asset_cache.remove_file(path);
        self.library_manager.remove(path);
        if units.is_empty() {
            return;
        }

        let mut to_clean = DependencyGraph::compute_invalidation_set(units.iter().cloned());
        to_clean.extend(self.units_depending_on_missing_definitions(units));

        self.notify_listeners(&to_clean);
        let mut containers = InvalidatedContainers::new();
        self.clean_units(
            &to_clean,
            |unit| units.contains(unit),
            &mut session.pending,
            &mut containers,
            report,
        );

        for (project, files) in containers {
            for file in &files {
                self.library_manager.remove(file);
            }
            if project.invalidate_libraries(&files) {
                tracing::debug!("Project {} replaced library units", project.name());
            }
        }
    }

    fn notify_listeners(&self, units: &HashSet<UnitRef>) {
        let listeners: Vec<Arc<dyn InvalidationListener>> = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        let mut changes = InvalidationMap::new();
        for unit in units {
            let Some(project) = unit.project() else {
                continue;
            };
            let mut definitions = unit.definition_promises();
            if definitions.is_empty() {
                match unit.file_scope_request_result() {
                    Ok(scope) => definitions = scope.externally_visible_definitions,
                    Err(e) => {
                        tracing::warn!("No definitions for {}: {}", unit.absolute_filename(), e);
                        continue;
                    }
                }
            }
            changes
                .entry(project)
                .or_default()
                .extend(definitions.into_iter().map(|definition| InvalidatedDefinition {
                    qualified_name: definition.qualified_name,
                    containing_file: unit.absolute_filename().to_string(),
                }));
        }
        if changes.is_empty() {
            return;
        }
        for listener in &listeners {
            listener.definitions_changed(&changes);
        }
    }

    fn clean_units(
        &self,
        units: &HashSet<UnitRef>,
        fully_clear: impl Fn(&UnitRef) -> bool,
        pending: &mut PendingUpdates,
        containers: &mut InvalidatedContainers,
        report: &mut InvalidationReport,
    ) {
        let mut ordered: Vec<&UnitRef> = units.iter().collect();
        ordered.sort_by(|a, b| (a.absolute_filename(), a.name()).cmp(&(b.absolute_filename(), b.name())));

        for unit in ordered {
            let fully = fully_clear(unit);
            match unit.clean(fully) {
                Ok(outcome) => {
                    if let Some(project) = unit.project() {
                        if outcome.update_definitions {
                            pending.entry(project.clone()).or_default().insert(unit.clone());
                        }
                        if !outcome.invalidated_containers.is_empty() {
                            containers
                                .entry(project)
                                .or_default()
                                .extend(outcome.invalidated_containers);
                        }
                    }
                    report.invalidated.push(InvalidatedUnit {
                        path: unit.absolute_filename().to_string(),
                        name: unit.name().to_string(),
                        fully_cleared: fully,
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to clean {}: {}", unit.absolute_filename(), e);
                    report.failed.push(unit.absolute_filename().to_string());
                }
            }
        }
        tracing::debug!("Cleaned {} units", units.len());
    }
}

fn same_listener(a: &Arc<dyn InvalidationListener>, b: &Arc<dyn InvalidationListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("projects", &self.projects.read().len())
            .field("paths", &self.path_index.paths().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

