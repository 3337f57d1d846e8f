//! Interned namespace definitions

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::key::CacheStoreKey;
use crate::store::{CacheStore, CacheStoreBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    Public,
    Internal,
    Protected,
    Private,
    User,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NamespaceKind::Public => "public",
            NamespaceKind::Internal => "internal",
            NamespaceKind::Protected => "protected",
            NamespaceKind::Private => "private",
            NamespaceKind::User => "user",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub kind: NamespaceKind,
    pub uri: String,
}

impl CacheStoreKey for NamespaceDefinition {
    fn generate_key(&self) -> String {
        format!("{}{}{}", self.kind, crate::key::KEY_SEPARATOR, self.uri)
    }
}

/// Hands out one shared [`NamespaceDefinition`] per (kind, URI).
pub struct NamespaceCache {
    store: CacheStore<NamespaceDefinition>,
}

impl NamespaceCache {
    pub fn new(soft_limit: Option<usize>) -> Self {
        NamespaceCache {
            store: CacheStore::with_soft_limit("namespaces", soft_limit),
        }
    }

    pub fn intern(&self, kind: NamespaceKind, uri: &str) -> Arc<NamespaceDefinition> {
        let key = NamespaceDefinition {
            kind,
            uri: uri.to_string(),
        };
        match self.get(&key) {
            Ok(definition) => definition,
            Err(never) => match never {},
        }
    }
}

impl CacheStoreBase for NamespaceCache {
    type Key = NamespaceDefinition;
    type Value = NamespaceDefinition;
    type Error = Infallible;

    fn store(&self) -> &CacheStore<NamespaceDefinition> {
        &self.store
    }

    fn create_entry_value(&self, key: &NamespaceDefinition) -> Result<Arc<NamespaceDefinition>, Infallible> {
        Ok(Arc::new(key.clone()))
    }
}
