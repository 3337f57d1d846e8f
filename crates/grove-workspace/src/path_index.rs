//! Path to compilation unit index
//!
//! Holds units weakly: a unit dropped by its project, or detached from it,
//! disappears from every lookup without being removed explicitly.

use std::collections::HashMap;

use grove_core::{ProjectRef, UnitRef, WeakUnitRef};
use parking_lot::RwLock;

/// Which units a lookup returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    VisibleOnly,
    InvisibleOnly,
    All,
}

impl Visibility {
    fn admits(self, unit: &UnitRef) -> bool {
        match self {
            Visibility::VisibleOnly => !unit.is_invisible(),
            Visibility::InvisibleOnly => unit.is_invisible(),
            Visibility::All => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct PathIndex {
    entries: RwLock<HashMap<String, Vec<WeakUnitRef>>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `path` to `unit`. Adding the same pair twice has no effect.
    pub fn add(&self, path: &str, unit: &UnitRef) {
        grove_core::debug_assert_normalized!(path);
        let mut entries = self.entries.write();
        let units = entries.entry(path.to_string()).or_default();
        units.retain(|weak| !weak.is_dead());
        if !units.iter().any(|weak| weak.points_to(unit)) {
            units.push(unit.downgrade());
        }
    }

    /// Map every path in `paths` to `unit`.
    pub fn add_all<'a>(&self, paths: impl IntoIterator<Item = &'a str>, unit: &UnitRef) {
        for path in paths {
            self.add(path, unit);
        }
    }

    /// Remove the mapping from `path` to `unit` only.
    pub fn remove(&self, path: &str, unit: &UnitRef) {
        let mut entries = self.entries.write();
        if let Some(units) = entries.get_mut(path) {
            units.retain(|weak| !weak.is_dead() && !weak.points_to(unit));
            if units.is_empty() {
                entries.remove(path);
            }
        }
    }

    /// Remove `unit` from every path it is mapped from.
    pub fn remove_unit(&self, unit: &UnitRef) {
        let mut entries = self.entries.write();
        entries.retain(|_, units| {
            units.retain(|weak| !weak.is_dead() && !weak.points_to(unit));
            !units.is_empty()
        });
    }

    /// Live units for `path`, optionally restricted to one project.
    pub fn get(&self, path: &str, visibility: Visibility, project: Option<&ProjectRef>) -> Vec<UnitRef> {
        let entries = self.entries.read();
        let Some(units) = entries.get(path) else {
            return Vec::new();
        };
        units
            .iter()
            .filter_map(WeakUnitRef::upgrade)
            .filter(|unit| {
                // Units removed from their project are treated as gone.
                match unit.project() {
                    Some(owner) => project.is_none_or(|wanted| *wanted == owner),
                    None => false,
                }
            })
            .filter(|unit| visibility.admits(unit))
            .collect()
    }

    pub fn visible_and_invisible(&self, path: &str) -> Vec<UnitRef> {
        self.get(path, Visibility::All, None)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        !self.visible_and_invisible(path).is_empty()
    }

    /// Drop entries whose units are all gone. Returns the number of paths dropped.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, units| {
            units.retain(|weak| !weak.is_dead());
            !units.is_empty()
        });
        before - entries.len()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}
