//! Library containers
//!
//! A library container bundles pre-compiled scripts with the definitions each
//! script exports, plus auxiliary text files (default style sheets and the
//! like). On disk it is a JSON document.

use std::collections::BTreeMap;
use std::sync::Arc;

use grove_core::Definition;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::store::{CacheStore, CacheStoreBase};

/// One pre-compiled script inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryScript {
    pub name: String,
    #[serde(default)]
    pub definitions: Vec<Definition>,
    /// Qualified names the script references.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryContainer {
    #[serde(skip)]
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub scripts: Vec<LibraryScript>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl LibraryContainer {
    /// Decode a container from its JSON form.
    pub fn decode(path: &str, bytes: &[u8]) -> Result<Self> {
        let mut container: LibraryContainer =
            serde_json::from_slice(bytes).map_err(|source| CacheError::Decode {
                path: path.to_string(),
                source,
            })?;
        container.path = path.to_string();
        Ok(container)
    }

    pub fn read(path: &str) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        Self::decode(path, &bytes)
    }

    pub fn script(&self, name: &str) -> Option<&LibraryScript> {
        self.scripts.iter().find(|script| script.name == name)
    }

    /// Contents of a bundled file, if the container carries it.
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.scripts.iter().flat_map(|script| script.definitions.iter())
    }
}

/// Decoded library containers keyed by normalized container path.
pub struct ContainerCache {
    store: CacheStore<LibraryContainer>,
}

impl ContainerCache {
    pub fn new(soft_limit: Option<usize>) -> Self {
        ContainerCache {
            store: CacheStore::with_soft_limit("containers", soft_limit),
        }
    }

    /// Drop the decoded container for `path`.
    pub fn remove_file(&self, path: &str) -> usize {
        self.store.remove_for_file(path)
    }
}

impl CacheStoreBase for ContainerCache {
    type Key = str;
    type Value = LibraryContainer;
    type Error = CacheError;

    fn store(&self) -> &CacheStore<LibraryContainer> {
        &self.store
    }

    fn create_entry_value(&self, path: &str) -> Result<Arc<LibraryContainer>> {
        grove_core::debug_assert_normalized!(path);
        LibraryContainer::read(path).map(Arc::new)
    }
}
