//! Invalidation listeners

use grove_core::{InvalidatedDefinition, InvalidationMap};
use parking_lot::Mutex;

/// Told about definitions just before the units defining them are cleaned.
///
/// Called from inside the workspace idle state: implementations must not
/// start build requests or touch the workspace's unit indices.
pub trait InvalidationListener: Send + Sync {
    fn definitions_changed(&self, changes: &InvalidationMap);
}

/// Logs every invalidated definition at debug level.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl InvalidationListener for LoggingListener {
    fn definitions_changed(&self, changes: &InvalidationMap) {
        for (project, definitions) in changes {
            tracing::info!("{}: {} definitions invalidated", project.name(), definitions.len());
            for definition in definitions {
                tracing::debug!("  {} ({})", definition.qualified_name, definition.containing_file);
            }
        }
    }
}

/// Keeps every notification, flattened to `(project name, definition)` pairs.
#[derive(Debug, Default)]
pub struct RecordingListener {
    notifications: Mutex<Vec<Vec<(String, InvalidatedDefinition)>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }

    /// Qualified names from every notification so far, sorted and deduplicated.
    pub fn invalidated_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .notifications
            .lock()
            .iter()
            .flatten()
            .map(|(_, definition)| definition.qualified_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn take(&self) -> Vec<Vec<(String, InvalidatedDefinition)>> {
        std::mem::take(&mut *self.notifications.lock())
    }
}

impl InvalidationListener for RecordingListener {
    fn definitions_changed(&self, changes: &InvalidationMap) {
        let mut flattened: Vec<(String, InvalidatedDefinition)> = changes
            .iter()
            .flat_map(|(project, definitions)| {
                definitions
                    .iter()
                    .map(move |definition| (project.name().to_string(), definition.clone()))
            })
            .collect();
        flattened.sort_by(|a, b| (&a.0, &a.1.qualified_name).cmp(&(&b.0, &b.1.qualified_name)));
        self.notifications.lock().push(flattened);
    }
}
