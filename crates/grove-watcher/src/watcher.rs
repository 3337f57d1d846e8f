//! Filesystem watcher implementation

use anyhow::Result;
use grove_core::normalize_path;
use grove_workspace::{InvalidationReport, WatchConfig, Workspace};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// A change to one file, with a normalized path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(String),
    Modified(String),
    Removed(String),
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::Created(path) | WatchEvent::Modified(path) | WatchEvent::Removed(path) => path,
        }
    }
}

/// File system watcher for one project root
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    root_path: PathBuf,
}

impl FileWatcher {
    /// Create a watcher for `root_path` reporting the files `config` accepts.
    pub fn new(root_path: impl AsRef<Path>, config: WatchConfig) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                debug!("File system event: {:?}", event);
                for watch_event in classify(&event, &config) {
                    if let Err(e) = event_tx.send(watch_event) {
                        warn!("Failed to queue watch event: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("File system watch error: {}", e);
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            root_path,
        })
    }

    /// Watch the root directory recursively
    pub fn watch(&mut self) -> Result<()> {
        info!("Watching directory: {}", self.root_path.display());
        self.watcher.watch(&self.root_path, RecursiveMode::Recursive)?;
        Ok(())
    }

    pub fn unwatch(&mut self) -> Result<()> {
        info!("Stopping watch for: {}", self.root_path.display());
        self.watcher.unwatch(&self.root_path)?;
        Ok(())
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }
}

/// Turn a notify event into watch events for the files `config` accepts.
fn classify(event: &notify::Event, config: &WatchConfig) -> Vec<WatchEvent> {
    let paths: Vec<String> = event.paths.iter().map(normalize_path).collect();
    let events: Vec<WatchEvent> = match event.kind {
        EventKind::Create(_) => paths.into_iter().map(WatchEvent::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(WatchEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths.into_iter().map(WatchEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths.into_iter().map(WatchEvent::Created).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let mut paths = paths.into_iter();
            let from = paths.next().map(WatchEvent::Removed);
            let to = paths.next().map(WatchEvent::Created);
            from.into_iter().chain(to).collect()
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.into_iter().map(WatchEvent::Modified).collect(),
        _ => Vec::new(),
    };
    events
        .into_iter()
        .filter(|event| config.accepts(event.path()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Modified,
    Removed,
}

fn merge(previous: Option<Change>, next: Change) -> Option<Change> {
    match (previous, next) {
        (None, next) => Some(next),
        (Some(Change::Created), Change::Removed) => None,
        (Some(Change::Created), _) => Some(Change::Created),
        (Some(Change::Modified), Change::Removed) => Some(Change::Removed),
        (Some(Change::Modified), _) => Some(Change::Modified),
        (Some(Change::Removed), Change::Removed) => Some(Change::Removed),
        // Deleted and written again, as editors do on save.
        (Some(Change::Removed), _) => Some(Change::Modified),
    }
}

/// Collapse a burst of events to at most one event per path, in the order
/// paths were first seen. A file created and deleted within the burst
/// produces nothing.
pub fn coalesce(events: Vec<WatchEvent>) -> Vec<WatchEvent> {
    let mut order: Vec<String> = Vec::new();
    let mut changes: HashMap<String, Option<Change>> = HashMap::new();
    for event in events {
        let (path, change) = match event {
            WatchEvent::Created(path) => (path, Change::Created),
            WatchEvent::Modified(path) => (path, Change::Modified),
            WatchEvent::Removed(path) => (path, Change::Removed),
        };
        let previous = match changes.get(&path) {
            Some(previous) => *previous,
            None => {
                order.push(path.clone());
                None
            }
        };
        changes.insert(path, merge(previous, change));
    }

    order
        .into_iter()
        .filter_map(|path| match changes.get(&path).copied().flatten()? {
            Change::Created => Some(WatchEvent::Created(path)),
            Change::Modified => Some(WatchEvent::Modified(path)),
            Change::Removed => Some(WatchEvent::Removed(path)),
        })
        .collect()
}

/// Hand one event to the workspace. Blocks while builds are running.
pub fn apply_event(workspace: &Workspace, event: &WatchEvent) -> InvalidationReport {
    match event {
        WatchEvent::Created(path) => workspace.file_added(path),
        WatchEvent::Modified(path) => workspace.file_changed(path),
        WatchEvent::Removed(path) => workspace.file_removed(path),
    }
}

/// Every file under `root` that `config` accepts, honoring ignore files.
pub fn scan_files(root: &Path, config: &WatchConfig) -> Vec<String> {
    let mut files: Vec<String> = ignore::WalkBuilder::new(root)
        .hidden(false)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|file_type| file_type.is_file()))
        .map(|entry| normalize_path(entry.path()))
        .filter(|path| config.accepts(path))
        .collect();
    files.sort();
    files
}

/// Watcher service that feeds file system events to a workspace
pub struct WatcherService {
    watcher: FileWatcher,
    workspace: Arc<Workspace>,
    debounce: Duration,
    report_tx: Option<broadcast::Sender<InvalidationReport>>,
}

impl WatcherService {
    pub fn new(root_path: impl AsRef<Path>, workspace: Arc<Workspace>) -> Result<Self> {
        let config = workspace.config().watch.clone();
        let debounce = Duration::from_millis(config.debounce_ms);
        Ok(Self {
            watcher: FileWatcher::new(root_path, config)?,
            workspace,
            debounce,
            report_tx: None,
        })
    }

    /// Like [`new`](Self::new), also publishing every invalidation report.
    pub fn with_broadcast(
        root_path: impl AsRef<Path>,
        workspace: Arc<Workspace>,
        report_tx: broadcast::Sender<InvalidationReport>,
    ) -> Result<Self> {
        let mut service = Self::new(root_path, workspace)?;
        service.report_tx = Some(report_tx);
        Ok(service)
    }

    /// Register every existing file with the workspace, then start watching.
    pub fn start_watching(&mut self) -> Result<()> {
        let files = scan_files(self.watcher.root_path(), &self.workspace.config().watch);
        for file in &files {
            self.workspace.file_specification(file);
        }
        info!("Tracking {} files", files.len());
        self.watcher.watch()
    }

    /// Apply events until the watcher shuts down. Events arriving within the
    /// debounce interval of each other are coalesced first.
    pub async fn process_events(&mut self) -> Result<()> {
        let debounce = self.debounce;
        loop {
            let batch = {
                let event_rx = self.watcher.event_receiver();
                let Some(first) = event_rx.recv().await else {
                    break;
                };
                let mut batch = vec![first];
                while let Ok(Some(event)) = tokio::time::timeout(debounce, event_rx.recv()).await {
                    batch.push(event);
                }
                batch
            };

            for event in coalesce(batch) {
                self.dispatch(event).await?;
            }
        }
        info!("Watch event stream closed");
        Ok(())
    }

    async fn dispatch(&self, event: WatchEvent) -> Result<()> {
        debug!("Processing watch event: {:?}", event);
        let workspace = Arc::clone(&self.workspace);
        let report = tokio::task::spawn_blocking(move || apply_event(&workspace, &event)).await?;

        if !report.is_empty() {
            info!(
                "#{} {}: {} units invalidated, {} failed",
                report.sequence,
                report.path.as_deref().unwrap_or("<libraries>"),
                report.invalidated.len(),
                report.failed.len()
            );
        }
        if let Some(report_tx) = &self.report_tx {
            // No subscribers is fine.
            let _ = report_tx.send(report);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_workspace::{ChangeKind, ManifestProject};
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[tokio::test]
    async fn test_file_watcher_creation() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = FileWatcher::new(temp_dir.path(), WatchConfig::default()).unwrap();
        assert!(watcher.watch().is_ok());
        assert!(watcher.event_receiver().try_recv().is_err());
    }

    #[test]
    fn test_classify_filters_and_normalizes() {
        let config = WatchConfig::default();
        let created = event(EventKind::Create(CreateKind::File), &["/app/src/./Main.as", "/app/target/Out.as"]);
        assert_eq!(
            classify(&created, &config),
            vec![WatchEvent::Created("/app/src/Main.as".to_string())]
        );

        let modified = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/app/src/Main.as"]);
        assert_eq!(
            classify(&modified, &config),
            vec![WatchEvent::Modified("/app/src/Main.as".to_string())]
        );

        let touched = event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)), &["/app/src/Main.as"]);
        assert!(classify(&touched, &config).is_empty());

        let removed = event(EventKind::Remove(RemoveKind::File), &["/app/README"]);
        assert!(classify(&removed, &config).is_empty());
    }

    #[test]
    fn test_classify_rename() {
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/app/src/Old.as", "/app/src/New.as"],
        );
        assert_eq!(
            classify(&renamed, &WatchConfig::default()),
            vec![
                WatchEvent::Removed("/app/src/Old.as".to_string()),
                WatchEvent::Created("/app/src/New.as".to_string()),
            ]
        );
    }

    #[test]
    fn test_coalesce() {
        let a = || "/app/A.as".to_string();
        let b = || "/app/B.as".to_string();
        let c = || "/app/C.as".to_string();
        let events = vec![
            WatchEvent::Created(a()),
            WatchEvent::Modified(b()),
            WatchEvent::Modified(a()),
            WatchEvent::Removed(c()),
            WatchEvent::Removed(b()),
            WatchEvent::Created(c()),
        ];
        assert_eq!(
            coalesce(events),
            vec![WatchEvent::Created(a()), WatchEvent::Removed(b()), WatchEvent::Modified(c())]
        );

        // Created then deleted inside one burst.
        assert!(coalesce(vec![WatchEvent::Created(a()), WatchEvent::Removed(a())]).is_empty());
    }

    #[test]
    fn test_apply_event_routes_to_workspace() {
        let workspace = Workspace::with_defaults().unwrap();
        let manifest = r#"
[project]
name = "app"

[[units]]
path = "/app/src/Main.as"
definitions = ["app.Main"]
"#;
        let _project = ManifestProject::from_toml_str(&workspace, manifest).unwrap();

        let report = apply_event(&workspace, &WatchEvent::Modified("/app/src/Main.as".to_string()));
        assert_eq!(report.kind, ChangeKind::Changed);
        assert_eq!(report.unit_names(), vec!["Main"]);

        let report = apply_event(&workspace, &WatchEvent::Removed("/app/src/Main.as".to_string()));
        assert_eq!(report.kind, ChangeKind::Removed);
        assert!(workspace.compilation_units("/app/src/Main.as", None).is_empty());

        let report = apply_event(&workspace, &WatchEvent::Created("/app/src/Main.as".to_string()));
        assert_eq!(report.kind, ChangeKind::Added);
        assert_eq!(workspace.compilation_units("/app/src/Main.as", None).len(), 1);
    }

    #[test]
    fn test_scan_files() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("target")).unwrap();
        std::fs::write(src.join("Main.as"), "package {}").unwrap();
        std::fs::write(src.join("notes.txt"), "todo").unwrap();
        std::fs::write(temp_dir.path().join("target").join("Out.as"), "").unwrap();

        let files = scan_files(temp_dir.path(), &WatchConfig::default());
        assert_eq!(files, vec![normalize_path(src.join("Main.as"))]);
    }
}
