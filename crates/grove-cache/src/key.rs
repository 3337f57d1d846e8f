//! Cache keys

/// Separates the container path from the entry name inside a generated key.
pub const KEY_SEPARATOR: char = ':';

/// Identity of a cache slot.
///
/// The generated string is derived only from the key's identity fields, so
/// two keys naming the same resource always share a slot.
pub trait CacheStoreKey {
    fn generate_key(&self) -> String;
}

impl CacheStoreKey for str {
    fn generate_key(&self) -> String {
        self.to_string()
    }
}

impl CacheStoreKey for String {
    fn generate_key(&self) -> String {
        self.clone()
    }
}

/// Key for an entry stored inside a container file: `{container}:{entry}`.
pub fn container_entry_key(container: &str, entry: &str) -> String {
    format!("{container}{KEY_SEPARATOR}{entry}")
}
