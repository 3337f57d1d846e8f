//! Test utilities for grove-workspace

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Weak};

use grove_core::{
    CleanOutcome, CompilationUnit, Definition, DefinitionKind, DependencyGraph, FileScope, Project, ProjectRef,
    UnitError, UnitRef, UnitType, WeakProjectRef, normalize_path,
};
use parking_lot::Mutex;

use crate::config::WorkspaceConfig;
use crate::manifest::ManifestProject;
use crate::workspace::Workspace;

pub fn small_workspace() -> Arc<Workspace> {
    Workspace::new(WorkspaceConfig {
        worker_threads: 2,
        ..WorkspaceConfig::default()
    })
    .unwrap()
}

pub fn open(workspace: &Arc<Workspace>, manifest: &str) -> Arc<ManifestProject> {
    ManifestProject::from_toml_str(workspace, manifest).unwrap()
}

/// A inherited by B, B used in an expression of C, C in a signature of D.
pub const CHAIN: &str = r#"
[project]
name = "app"

[[units]]
path = "/app/src/A.as"
definitions = ["app.A"]

[[units]]
path = "/app/src/B.as"
definitions = ["app.B"]
[[units.dependencies]]
target = "app.A"
kind = "inheritance"

[[units]]
path = "/app/src/C.as"
definitions = ["app.C"]
[[units.dependencies]]
target = "app.B"
kind = "expression"

[[units]]
path = "/app/src/D.as"
definitions = ["app.D"]
[[units.dependencies]]
target = "app.C"
kind = "signature"
"#;

/// Write a library container holding one script per `(name, qualified names)`.
pub fn write_container(dir: &Path, file_name: &str, scripts: &[(&str, &[&str])]) -> String {
    let scripts: Vec<String> = scripts
        .iter()
        .map(|(name, definitions)| {
            let definitions: Vec<String> = definitions
                .iter()
                .map(|qualified_name| format!(r#"{{"qualified_name":"{qualified_name}","kind":"class"}}"#))
                .collect();
            format!(r#"{{"name":"{name}","definitions":[{}]}}"#, definitions.join(","))
        })
        .collect();
    let path = dir.join(file_name);
    std::fs::write(&path, format!(r#"{{"version":"4.0.0","scripts":[{}]}}"#, scripts.join(","))).unwrap();
    normalize_path(path)
}

/// A unit whose behavior each test configures.
#[derive(Debug)]
pub struct StubUnit {
    name: String,
    path: String,
    project: Mutex<Option<WeakProjectRef>>,
    /// Definitions only known once the file scope is built.
    scope_definitions: Vec<Definition>,
    fail_clean: bool,
    pub cleans: Mutex<Vec<bool>>,
}

impl CompilationUnit for StubUnit {
    fn absolute_filename(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn unit_type(&self) -> UnitType {
        UnitType::Source
    }

    fn project(&self) -> Option<ProjectRef> {
        self.project.lock().as_ref().and_then(WeakProjectRef::upgrade)
    }

    fn short_names(&self) -> Result<Vec<String>, UnitError> {
        Ok(self
            .scope_definitions
            .iter()
            .map(|definition| definition.short_name().to_string())
            .collect())
    }

    fn definition_promises(&self) -> Vec<Definition> {
        Vec::new()
    }

    fn file_scope_request_result(&self) -> Result<FileScope, UnitError> {
        Ok(FileScope {
            externally_visible_definitions: self.scope_definitions.clone(),
        })
    }

    fn clean(&self, fully_clear: bool) -> Result<CleanOutcome, UnitError> {
        if self.fail_clean {
            return Err(UnitError::Clean {
                path: self.path.clone(),
                reason: "stub".to_string(),
            });
        }
        self.cleans.lock().push(fully_clear);
        Ok(CleanOutcome {
            update_definitions: fully_clear,
            invalidated_containers: Vec::new(),
        })
    }
}

/// A project that records definition updates. When it has a workspace, each
/// update runs a file scope request on another thread and waits for it.
pub struct StubProject {
    name: String,
    graph: DependencyGraph,
    workspace: Option<Weak<Workspace>>,
    pub updates: Mutex<Vec<String>>,
}

impl Project for StubProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn update_public_and_internal_definitions(&self, units: &[UnitRef]) {
        if let Some(workspace) = self.workspace.as_ref().and_then(Weak::upgrade) {
            std::thread::scope(|scope| {
                scope
                    .spawn(|| {
                        let _request = workspace.request(true);
                    })
                    .join()
                    .unwrap();
            });
        }
        self.updates
            .lock()
            .extend(units.iter().map(|unit| unit.name().to_string()));
    }

    fn invalidate_libraries(&self, _changed_container_files: &HashSet<String>) -> bool {
        false
    }

    fn remove_source_file(&self, _path: &str) {}

    fn dependencies_on_unfound_definition(&self, _short_name: &str) -> Vec<UnitRef> {
        Vec::new()
    }

    fn dependencies_on_definition(&self, _short_name: &str) -> Vec<UnitRef> {
        Vec::new()
    }

    fn dependencies_on_unfound_referenced_source_file(&self, _path: &str) -> Vec<UnitRef> {
        Vec::new()
    }

    fn handle_added_file(&self, _path: &str) -> bool {
        false
    }
}

pub fn stub_project(name: &str, workspace: Option<&Arc<Workspace>>) -> (Arc<StubProject>, ProjectRef) {
    let project = Arc::new(StubProject {
        name: name.to_string(),
        graph: DependencyGraph::new(),
        workspace: workspace.map(Arc::downgrade),
        updates: Mutex::new(Vec::new()),
    });
    let project_ref = ProjectRef::new(Arc::clone(&project));
    (project, project_ref)
}

/// A unit at `/stub/{name}.as` whose file scope defines `stub.{name}`.
pub fn stub_unit(project: &ProjectRef, name: &str, fail_clean: bool) -> (Arc<StubUnit>, UnitRef) {
    let unit = Arc::new(StubUnit {
        name: name.to_string(),
        path: format!("/stub/{name}.as"),
        project: Mutex::new(Some(project.downgrade())),
        scope_definitions: vec![Definition::new(format!("stub.{name}"), DefinitionKind::Class)],
        fail_clean,
        cleans: Mutex::new(Vec::new()),
    });
    let unit_ref = UnitRef::new(Arc::clone(&unit));
    project.dependency_graph().add_compilation_unit(&unit_ref);
    (unit, unit_ref)
}
