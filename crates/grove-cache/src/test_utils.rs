//! Test utilities for grove-cache

use std::fs;
use std::path::Path;

use grove_core::normalize_path;
use serde_json::json;
use tempfile::TempDir;

/// Write a library container with one script per `(name, qualified names)` pair
/// and the given bundled files. Returns its normalized path.
pub fn write_container(dir: &Path, file_name: &str, scripts: &[(&str, &[&str])], files: &[(&str, &str)]) -> String {
    let scripts: Vec<_> = scripts
        .iter()
        .map(|(name, definitions)| {
            json!({
                "name": name,
                "definitions": definitions
                    .iter()
                    .map(|qname| json!({ "qualified_name": qname, "kind": "class" }))
                    .collect::<Vec<_>>(),
                "dependencies": [],
            })
        })
        .collect();
    let files: serde_json::Map<String, serde_json::Value> = files
        .iter()
        .map(|(name, contents)| (name.to_string(), json!(contents)))
        .collect();
    let container = json!({ "version": "1.0", "scripts": scripts, "files": files });

    let path = dir.join(file_name);
    fs::write(&path, serde_json::to_vec_pretty(&container).unwrap()).unwrap();
    normalize_path(path)
}

pub fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

/// Write `contents` to `dir/name` and return the normalized path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    normalize_path(path)
}
