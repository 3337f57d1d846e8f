//! Embedded asset descriptors
//!
//! Every embed request naming the same file with the same MIME type resolves
//! to one shared [`AssetTag`].

use std::sync::Arc;

use serde::Serialize;

use crate::error::{CacheError, Result};
use crate::key::{CacheStoreKey, KEY_SEPARATOR};
use crate::store::{CacheStore, CacheStoreBase};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey {
    pub path: String,
    /// Explicit MIME type; guessed from the extension when `None`.
    pub mime: Option<String>,
}

impl AssetKey {
    pub fn new(path: impl Into<String>) -> Self {
        AssetKey {
            path: path.into(),
            mime: None,
        }
    }

    pub fn with_mime(path: impl Into<String>, mime: impl Into<String>) -> Self {
        AssetKey {
            path: path.into(),
            mime: Some(mime.into()),
        }
    }

    pub fn resolved_mime(&self) -> String {
        match &self.mime {
            Some(mime) => mime.clone(),
            None => mime_guess::from_path(&self.path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

impl CacheStoreKey for AssetKey {
    fn generate_key(&self) -> String {
        format!("{}{}{}", self.path, KEY_SEPARATOR, self.resolved_mime())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetTag {
    pub path: String,
    pub mime: String,
    pub len: u64,
    /// Hex-encoded blake3 digest of the file contents.
    pub content_hash: String,
}

pub struct AssetCache {
    store: CacheStore<AssetTag>,
}

impl AssetCache {
    pub fn new(soft_limit: Option<usize>) -> Self {
        AssetCache {
            store: CacheStore::with_soft_limit("assets", soft_limit),
        }
    }

    pub fn remove_file(&self, path: &str) -> usize {
        self.store.remove_for_file(path)
    }
}

impl CacheStoreBase for AssetCache {
    type Key = AssetKey;
    type Value = AssetTag;
    type Error = CacheError;

    fn store(&self) -> &CacheStore<AssetTag> {
        &self.store
    }

    fn create_entry_value(&self, key: &AssetKey) -> Result<Arc<AssetTag>> {
        grove_core::debug_assert_normalized!(&key.path);
        let bytes = std::fs::read(&key.path).map_err(|e| CacheError::io(&key.path, e))?;
        Ok(Arc::new(AssetTag {
            path: key.path.clone(),
            mime: key.resolved_mime(),
            len: bytes.len() as u64,
            content_hash: blake3::hash(&bytes).to_hex().to_string(),
        }))
    }
}
