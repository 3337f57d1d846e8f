use std::io;
use std::time::SystemTime;

/// A file the workspace knows about, read from disk on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSpecification {
    path: String,
}

impl FileSpecification {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        grove_core::debug_assert_normalized!(&path);
        FileSpecification { path }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn read_to_string(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.path)
    }

    pub fn last_modified(&self) -> io::Result<SystemTime> {
        std::fs::metadata(&self.path)?.modified()
    }

    pub fn exists(&self) -> bool {
        std::path::Path::new(&self.path).is_file()
    }
}
