//! Test utilities for grove-core

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::UnitError;
use crate::graph::DependencyGraph;
use crate::model::{Definition, DefinitionKind, FileScope, UnitType};
use crate::unit::{CleanOutcome, CompilationUnit, Project, ProjectRef, UnitRef, WeakProjectRef};

/// A unit that records every `clean` it receives.
#[derive(Debug)]
pub struct StubUnit {
    name: String,
    path: String,
    project: Mutex<Option<WeakProjectRef>>,
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
        self.project.lock().as_ref().and_then(|project| project.upgrade())
    }

    fn short_names(&self) -> Result<Vec<String>, UnitError> {
        Ok(vec![self.name.clone()])
    }

    fn definition_promises(&self) -> Vec<Definition> {
        vec![Definition::new(self.name.clone(), DefinitionKind::Class)]
    }

    fn file_scope_request_result(&self) -> Result<FileScope, UnitError> {
        Ok(FileScope {
            externally_visible_definitions: self.definition_promises(),
        })
    }

    fn clean(&self, fully_clear: bool) -> Result<CleanOutcome, UnitError> {
        self.cleans.lock().push(fully_clear);
        Ok(CleanOutcome::default())
    }
}

impl StubUnit {
    pub fn detach(&self) {
        *self.project.lock() = None;
    }
}

/// A project that only owns a dependency graph.
pub struct StubProject {
    name: String,
    graph: DependencyGraph,
}

impl Project for StubProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn update_public_and_internal_definitions(&self, _units: &[UnitRef]) {}

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

pub fn stub_project(name: &str) -> (Arc<StubProject>, ProjectRef) {
    let project = Arc::new(StubProject {
        name: name.to_string(),
        graph: DependencyGraph::new(),
    });
    let project_ref = ProjectRef::new(project.clone());
    (project, project_ref)
}

/// Create a unit named `name` at `/src/{name}.as`, registered in the project graph.
pub fn stub_unit(project: &ProjectRef, name: &str) -> (Arc<StubUnit>, UnitRef) {
    let unit = Arc::new(StubUnit {
        name: name.to_string(),
        path: format!("/src/{name}.as"),
        project: Mutex::new(Some(project.downgrade())),
        cleans: Mutex::new(Vec::new()),
    });
    let unit_ref = UnitRef::new(unit.clone());
    project.dependency_graph().add_compilation_unit(&unit_ref);
    (unit, unit_ref)
}

/// Names of `units`, sorted, for stable assertions.
pub fn names<'a>(units: impl IntoIterator<Item = &'a UnitRef>) -> Vec<String> {
    let mut names: Vec<String> = units.into_iter().map(|unit| unit.name().to_string()).collect();
    names.sort();
    names
}
