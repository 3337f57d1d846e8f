//! Memoizing stores for library containers, markup, styles, and assets

pub mod asset;
pub mod container;
pub mod error;
pub mod key;
pub mod manager;
pub mod markup;
pub mod namespace;
pub mod scope;
pub mod store;
pub mod style;


#[cfg(test)]
pub mod test_utils;

pub use asset::{AssetCache, AssetKey, AssetTag};
pub use container::{ContainerCache, LibraryContainer, LibraryScript};
pub use error::CacheError;
pub use key::{CacheStoreKey, KEY_SEPARATOR, container_entry_key};
pub use manager::LibraryManager;
pub use markup::{MarkupCache, MarkupDocument, MarkupElement, MarkupToken};
pub use namespace::{NamespaceCache, NamespaceDefinition, NamespaceKind};
pub use scope::{ScriptScope, ScriptScopeCache, ScriptScopeKey};
pub use store::{CacheStats, CacheStore, CacheStoreBase};
pub use style::{CompatibilityVersion, StyleCache, StyleDocument, StyleKey, StyleRule, defaults_style_file};
