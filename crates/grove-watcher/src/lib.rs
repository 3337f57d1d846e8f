//! File system events driving workspace invalidation

pub mod watcher;

pub use watcher::{FileWatcher, WatchEvent, WatcherService, apply_event, coalesce, scan_files};
