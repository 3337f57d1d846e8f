//! Core data structures shared by the graph, the caches and the workspace

use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminates what kind of input a compilation unit was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// A script source file.
    #[default]
    Source,
    /// A script inside a pre-compiled library container.
    Library,
    /// A resource bundle.
    Resource,
    /// An embedded asset.
    Embed,
    /// A unit synthesized by the compiler.
    Synthetic,
}

/// Lifecycle of the derived data cached on a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Nothing has been computed yet.
    Fresh,
    /// Parse trees, scopes or definitions are cached.
    Cached,
    /// Dependents only: file scope kept, cross-unit resolution dropped.
    NeedsResolve,
    /// Everything derived from the source has been dropped.
    Cleaned,
}

/// What kind of relationship a dependency edge records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Base class or implemented interface. Orders code generation.
    Inheritance,
    /// Type used in a signature (parameter, return, field type).
    Signature,
    /// Namespace reference.
    Namespace,
    /// Reference from inside a function body or initializer.
    Expression,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 4] = [
        DependencyKind::Inheritance,
        DependencyKind::Signature,
        DependencyKind::Namespace,
        DependencyKind::Expression,
    ];

    fn bit(self) -> u8 {
        match self {
            DependencyKind::Inheritance => 1 << 0,
            DependencyKind::Signature => 1 << 1,
            DependencyKind::Namespace => 1 << 2,
            DependencyKind::Expression => 1 << 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DependencyKind::Inheritance => "inheritance",
            DependencyKind::Signature => "signature",
            DependencyKind::Namespace => "namespace",
            DependencyKind::Expression => "expression",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A small set of [`DependencyKind`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<DependencyKind>", into = "Vec<DependencyKind>")]
pub struct DependencyKindSet(u8);

impl DependencyKindSet {
    pub const fn none() -> Self {
        DependencyKindSet(0)
    }

    pub fn all() -> Self {
        Self::of(&DependencyKind::ALL)
    }

    pub fn of(kinds: &[DependencyKind]) -> Self {
        let mut set = Self::none();
        for kind in kinds {
            set.insert(*kind);
        }
        set
    }

    /// Kinds through which invalidation keeps propagating to further dependents.
    pub fn recursive_invalidation() -> Self {
        Self::of(&[
            DependencyKind::Inheritance,
            DependencyKind::Signature,
            DependencyKind::Namespace,
        ])
    }

    pub fn insert(&mut self, kind: DependencyKind) {
        self.0 |= kind.bit();
    }

    pub fn extend(&mut self, other: DependencyKindSet) {
        self.0 |= other.0;
    }

    pub fn contains(&self, kind: DependencyKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// True if the two sets share at least one kind.
    pub fn intersects(&self, other: DependencyKindSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = DependencyKind> + '_ {
        DependencyKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl From<DependencyKind> for DependencyKindSet {
    fn from(kind: DependencyKind) -> Self {
        Self::of(&[kind])
    }
}

impl From<Vec<DependencyKind>> for DependencyKindSet {
    fn from(kinds: Vec<DependencyKind>) -> Self {
        Self::of(&kinds)
    }
}

impl From<DependencyKindSet> for Vec<DependencyKind> {
    fn from(set: DependencyKindSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for DependencyKindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Closed set of definition flavors produced by analyzing a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Package,
    #[default]
    Class,
    Interface,
    Function,
    Getter,
    Setter,
    Variable,
    Constant,
    Namespace,
}

/// A named, resolvable program entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Definition {
    pub qualified_name: String,
    #[serde(default)]
    pub kind: DefinitionKind,
}

impl Definition {
    pub fn new(qualified_name: impl Into<String>, kind: DefinitionKind) -> Self {
        Definition {
            qualified_name: qualified_name.into(),
            kind,
        }
    }

    /// The unqualified base name (`pkg.sub.Foo` and `pkg.sub:Foo` give `Foo`).
    pub fn short_name(&self) -> &str {
        short_name(&self.qualified_name)
    }
}

/// Strip the package part off a qualified name.
pub fn short_name(qualified_name: &str) -> &str {
    match qualified_name.rfind(['.', ':']) {
        Some(idx) => &qualified_name[idx + 1..],
        None => qualified_name,
    }
}

/// A definition that is about to become stale, reported to invalidation listeners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalidatedDefinition {
    pub qualified_name: String,
    pub containing_file: String,
}

/// Top-level symbol table of one unit, before cross-unit resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileScope {
    pub externally_visible_definitions: Vec<Definition>,
}
