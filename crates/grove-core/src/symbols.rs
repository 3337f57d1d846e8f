//! Project symbol table for cross-unit resolution

use dashmap::DashMap;

use crate::model::short_name;
use crate::unit::UnitRef;

/// Maps qualified names to the units defining them. Thread-safe for concurrent access.
///
/// More than one unit may define the same name; the first one registered wins
/// lookups and the others are reported as conflicting.
pub struct SymbolTable {
    symbols: DashMap<String, Vec<UnitRef>>,
    /// For fast file lookup: file path -> list of symbol names in that file
    file_symbols: DashMap<String, Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: DashMap::new(),
            file_symbols: DashMap::new(),
        }
    }

    /// Insert a symbol.
    pub fn insert(&self, qualified_name: String, unit: UnitRef) {
        let file_path = unit.absolute_filename().to_string();
        {
            let mut definers = self.symbols.entry(qualified_name.clone()).or_default();
            if definers.contains(&unit) {
                return;
            }
            definers.push(unit);
        }
        self.file_symbols
            .entry(file_path)
            .or_default()
            .push(qualified_name);
    }

    /// Look up the unit that wins resolution for a qualified name.
    pub fn lookup(&self, qualified_name: &str) -> Option<UnitRef> {
        self.symbols
            .get(qualified_name)
            .and_then(|r| r.value().first().cloned())
    }

    /// Every unit defining a qualified name.
    pub fn definers(&self, qualified_name: &str) -> Vec<UnitRef> {
        self.symbols
            .get(qualified_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.symbols.contains_key(qualified_name)
    }

    /// Get all symbol names defined in a file.
    pub fn symbols_in_file(&self, file_path: &str) -> Vec<String> {
        self.file_symbols
            .get(file_path)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Qualified names whose base name is `name`.
    pub fn names_with_short_name(&self, name: &str) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|entry| short_name(entry.key()) == name)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove every symbol a unit contributed.
    pub fn remove_unit(&self, unit: &UnitRef) {
        let file_path = unit.absolute_filename();
        let Some(names) = self.file_symbols.get(file_path).map(|r| r.value().clone()) else {
            return;
        };
        let mut remaining = Vec::new();
        for name in names {
            let mut keep_name = false;
            if let Some(mut definers) = self.symbols.get_mut(&name) {
                definers.retain(|definer| definer != unit);
                // Another unit for the same file may still define it.
                keep_name = definers
                    .iter()
                    .any(|definer| definer.absolute_filename() == file_path);
            }
            self.symbols.remove_if(&name, |_, definers| definers.is_empty());
            if keep_name {
                remaining.push(name);
            }
        }
        if remaining.is_empty() {
            self.file_symbols.remove(file_path);
        } else {
            self.file_symbols.insert(file_path.to_string(), remaining);
        }
    }

    /// Remove all symbols for a file (useful for incremental re-indexing).
    pub fn remove_file(&self, file_path: &str) {
        if let Some((_, names)) = self.file_symbols.remove(file_path) {
            for name in names {
                if let Some(mut definers) = self.symbols.get_mut(&name) {
                    definers.retain(|definer| definer.absolute_filename() != file_path);
                }
                self.symbols.remove_if(&name, |_, definers| definers.is_empty());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
