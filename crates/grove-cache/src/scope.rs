//! Script scopes: per-script symbol tables built from library containers

use std::collections::BTreeMap;
use std::sync::Arc;

use grove_core::Definition;

use crate::container::{ContainerCache, LibraryContainer};
use crate::error::{CacheError, Result};
use crate::key::{CacheStoreKey, container_entry_key};
use crate::store::{CacheStore, CacheStoreBase};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptScopeKey {
    pub container: String,
    pub script: String,
}

impl ScriptScopeKey {
    pub fn new(container: impl Into<String>, script: impl Into<String>) -> Self {
        ScriptScopeKey {
            container: container.into(),
            script: script.into(),
        }
    }
}

impl CacheStoreKey for ScriptScopeKey {
    fn generate_key(&self) -> String {
        container_entry_key(&self.container, &self.script)
    }
}

/// Symbol table for one library script.
#[derive(Debug)]
pub struct ScriptScope {
    pub script: String,
    /// The container the scope was read from, shared with the container cache.
    pub container: Arc<LibraryContainer>,
    symbols: BTreeMap<String, Definition>,
    pub dependencies: Vec<String>,
}

impl ScriptScope {
    pub fn lookup(&self, qualified_name: &str) -> Option<&Definition> {
        self.symbols.get(qualified_name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Script scopes, built on top of the container cache.
pub struct ScriptScopeCache {
    store: CacheStore<ScriptScope>,
    containers: Arc<ContainerCache>,
}

impl ScriptScopeCache {
    pub fn new(containers: Arc<ContainerCache>, soft_limit: Option<usize>) -> Self {
        ScriptScopeCache {
            store: CacheStore::with_soft_limit("script-scopes", soft_limit),
            containers,
        }
    }

    pub fn remove_file(&self, container: &str) -> usize {
        self.store.remove_for_file(container)
    }
}

impl CacheStoreBase for ScriptScopeCache {
    type Key = ScriptScopeKey;
    type Value = ScriptScope;
    type Error = CacheError;

    fn store(&self) -> &CacheStore<ScriptScope> {
        &self.store
    }

    fn create_entry_value(&self, key: &ScriptScopeKey) -> Result<Arc<ScriptScope>> {
        let container = self.containers.get(&key.container)?;
        let script = container
            .script(&key.script)
            .ok_or_else(|| CacheError::MissingScript {
                container: key.container.clone(),
                script: key.script.clone(),
            })?;

        let symbols = script
            .definitions
            .iter()
            .map(|definition| (definition.qualified_name.clone(), definition.clone()))
            .collect();
        let dependencies = script.dependencies.clone();

        Ok(Arc::new(ScriptScope {
            script: key.script.clone(),
            container: Arc::clone(&container),
            symbols,
            dependencies,
        }))
    }
}
