//! CLI command implementations

use anyhow::Context;
use grove_cache::{CacheStats, CacheStoreBase};
use grove_core::{Project, normalize_path};
use grove_watcher::WatcherService;
use grove_workspace::{LoggingListener, ManifestProject, Workspace, WorkspaceConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Manifest opened when none is named on the command line.
pub const MANIFEST_FILE: &str = "grove-project.toml";

pub struct Session {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub manifests: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Changed,
    Added,
    Removed,
}

/// A workspace and the projects opened in it. The workspace only holds
/// projects weakly, so this keeps them alive.
struct Opened {
    workspace: Arc<Workspace>,
    projects: Vec<Arc<ManifestProject>>,
}

impl Session {
    fn open(&self) -> anyhow::Result<Opened> {
        let config = match &self.config {
            Some(path) => WorkspaceConfig::load(path)?,
            None => WorkspaceConfig::load_from_dir(&self.root)?,
        };
        let workspace = Workspace::new(config)?;
        workspace.add_invalidation_listener(Arc::new(LoggingListener));

        let manifests = if self.manifests.is_empty() {
            vec![self.root.join(MANIFEST_FILE)]
        } else {
            self.manifests.clone()
        };

        let mut projects = Vec::with_capacity(manifests.len());
        for manifest in &manifests {
            let project = ManifestProject::load(&workspace, manifest)
                .with_context(|| format!("failed to open project {}", manifest.display()))?;
            tracing::info!("Opened project {} ({} units)", project.name(), project.units().len());
            projects.push(project);
        }
        Ok(Opened { workspace, projects })
    }
}

pub fn check(session: &Session, stats: bool) -> anyhow::Result<()> {
    let opened = session.open()?;

    let mut outcomes = serde_json::Map::new();
    for project in &opened.projects {
        let outcome = project.build()?;
        tracing::info!(
            "{}: {} units ordered, {} unresolved",
            project.name(),
            outcome.order.len(),
            outcome.unresolved.len()
        );
        outcomes.insert(project.name().to_string(), serde_json::to_value(&outcome)?);
    }
    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    if stats {
        print_stats(&opened.workspace);
    }
    Ok(())
}

pub fn invalidate(session: &Session, path: &Path, kind: FileEvent) -> anyhow::Result<()> {
    let opened = session.open()?;
    let path = normalize_path(path);

    let report = match kind {
        FileEvent::Changed => opened.workspace.file_changed(&path),
        FileEvent::Added => opened.workspace.file_added(&path),
        FileEvent::Removed => opened.workspace.file_removed(&path),
    };
    if report.is_empty() {
        tracing::info!("No units depend on {}", path);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn watch(session: &Session) -> anyhow::Result<()> {
    let opened = session.open()?;
    for project in &opened.projects {
        project.build()?;
    }

    let mut service = WatcherService::new(&session.root, Arc::clone(&opened.workspace))?;
    service.start_watching()?;

    tokio::select! {
        result = service.process_events() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
    }

    opened.workspace.close();
    Ok(())
}

fn print_stats(workspace: &Workspace) {
    let mut stores: Vec<(&'static str, CacheStats)> = workspace.library_manager().stats();
    stores.push((workspace.markup_cache().store_name(), workspace.markup_cache().stats()));
    stores.push((workspace.namespace_cache().store_name(), workspace.namespace_cache().stats()));
    stores.push((workspace.asset_cache().store_name(), workspace.asset_cache().stats()));

    for (name, stats) in stores {
        println!(
            "{:<16} {:>6} entries {:>8} hits {:>8} misses {:>6} evictions",
            name, stats.entries, stats.hits, stats.misses, stats.evictions
        );
    }
}
