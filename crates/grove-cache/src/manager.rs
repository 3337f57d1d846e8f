//! Library manager: the caches derived from library containers

use std::sync::Arc;

use crate::container::ContainerCache;
use crate::scope::ScriptScopeCache;
use crate::store::{CacheStats, CacheStoreBase};
use crate::style::StyleCache;

/// Owns every cache whose entries are read out of library containers, so a
/// changed container can be forgotten in one call.
pub struct LibraryManager {
    containers: Arc<ContainerCache>,
    scopes: ScriptScopeCache,
    styles: StyleCache,
}

impl LibraryManager {
    pub fn new(soft_limit: Option<usize>) -> Self {
        let containers = Arc::new(ContainerCache::new(soft_limit));
        LibraryManager {
            scopes: ScriptScopeCache::new(Arc::clone(&containers), soft_limit),
            styles: StyleCache::new(Arc::clone(&containers), soft_limit),
            containers,
        }
    }

    pub fn containers(&self) -> &ContainerCache {
        &self.containers
    }

    pub fn script_scopes(&self) -> &ScriptScopeCache {
        &self.scopes
    }

    pub fn styles(&self) -> &StyleCache {
        &self.styles
    }

    /// Forget everything read from the container at `path`. Returns the
    /// number of entries dropped.
    pub fn remove(&self, path: &str) -> usize {
        grove_core::debug_assert_normalized!(path);
        let removed =
            self.scopes.remove_file(path) + self.styles.remove_file(path) + self.containers.remove_file(path);
        if removed > 0 {
            tracing::debug!("Dropped {} cached entries for library {}", removed, path);
        }
        removed
    }

    pub fn stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            (self.containers.store_name(), self.containers.stats()),
            (self.scopes.store_name(), self.scopes.stats()),
            (self.styles.store_name(), self.styles.stats()),
        ]
    }
}
