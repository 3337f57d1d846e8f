//! Dependency graph over compilation units, using petgraph::StableDiGraph
//!
//! Edges point from the depender to the dependee. One edge exists per ordered
//! pair of units; it accumulates every kind of dependency recorded between
//! them, together with the qualified names that caused each kind.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::{Mutex, RwLock};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

use crate::error::CircularDependency;
use crate::model::{DependencyKind, DependencyKindSet};
use crate::unit::UnitRef;

/// The dependency record between one depender and one dependee.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    named: BTreeMap<String, DependencyKindSet>,
    kinds: DependencyKindSet,
}

impl Edge {
    fn add(&mut self, kinds: DependencyKindSet, qualified_name: Option<&str>) {
        if let Some(name) = qualified_name {
            self.named
                .entry(name.to_string())
                .or_default()
                .extend(kinds);
        }
        self.kinds.extend(kinds);
    }

    pub fn kinds(&self) -> DependencyKindSet {
        self.kinds
    }

    pub fn named_dependencies(&self) -> &BTreeMap<String, DependencyKindSet> {
        &self.named
    }
}

#[derive(Default)]
struct GraphInner {
    graph: StableDiGraph<UnitRef, Edge>,
    indices: HashMap<UnitRef, NodeIndex>,
}

impl GraphInner {
    fn ensure_node(&mut self, unit: &UnitRef) -> NodeIndex {
        if let Some(idx) = self.indices.get(unit) {
            return *idx;
        }
        let idx = self.graph.add_node(unit.clone());
        self.indices.insert(unit.clone(), idx);
        idx
    }

    fn edges(&self, unit: &UnitRef, direction: Direction) -> Vec<(UnitRef, DependencyKindSet)> {
        let Some(&idx) = self.indices.get(unit) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .filter_map(|edge_ref| {
                let other = match direction {
                    Direction::Outgoing => edge_ref.target(),
                    Direction::Incoming => edge_ref.source(),
                };
                self.graph
                    .node_weight(other)
                    .map(|unit| (unit.clone(), edge_ref.weight().kinds))
            })
            .collect()
    }

    /// Successors of `idx` over edges of the given kinds, in comparator order.
    fn ordered_successors<F>(&self, idx: NodeIndex, kinds: DependencyKindSet, compare: &F) -> Vec<NodeIndex>
    where
        F: Fn(&UnitRef, &UnitRef) -> Ordering,
    {
        let mut successors: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge_ref| edge_ref.weight().kinds.intersects(kinds))
            .map(|edge_ref| edge_ref.target())
            .collect();
        successors.sort_by(|a, b| compare(&self.graph[*a], &self.graph[*b]));
        successors.dedup();
        successors
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Frame {
    node: NodeIndex,
    successors: Vec<NodeIndex>,
    next: usize,
}

/// Directed graph of compilation units, safe to share between threads.
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
    last_circular_dependency: Mutex<Option<CircularDependency>>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DependencyGraph")
            .field("unit_count", &inner.graph.node_count())
            .field("edge_count", &inner.graph.edge_count())
            .finish()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            inner: RwLock::new(GraphInner::default()),
            last_circular_dependency: Mutex::new(None),
        }
    }

    pub fn add_compilation_unit(&self, unit: &UnitRef) {
        self.inner.write().ensure_node(unit);
    }

    pub fn add_compilation_units<'a>(&self, units: impl IntoIterator<Item = &'a UnitRef>) {
        let mut inner = self.inner.write();
        for unit in units {
            inner.ensure_node(unit);
        }
    }

    /// Remove a unit and every edge touching it.
    pub fn remove_compilation_unit(&self, unit: &UnitRef) {
        let mut inner = self.inner.write();
        if let Some(idx) = inner.indices.remove(unit) {
            inner.graph.remove_node(idx);
        }
    }

    pub fn contains(&self, unit: &UnitRef) -> bool {
        self.inner.read().indices.contains_key(unit)
    }

    pub fn compilation_units(&self) -> Vec<UnitRef> {
        let inner = self.inner.read();
        inner
            .graph
            .node_indices()
            .filter_map(|idx| inner.graph.node_weight(idx).cloned())
            .collect()
    }

    pub fn unit_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    /// Record that `depender` depends on `dependee`. Adding the same pair
    /// again, with the same or another kind, merges into the existing edge.
    pub fn add_dependency(&self, depender: &UnitRef, dependee: &UnitRef, kind: DependencyKind) {
        self.add_dependency_kinds(depender, dependee, kind.into(), None);
    }

    /// Like [`add_dependency`](Self::add_dependency), remembering which
    /// definition of the dependee was referenced.
    pub fn add_named_dependency(
        &self,
        depender: &UnitRef,
        dependee: &UnitRef,
        kind: DependencyKind,
        qualified_name: &str,
    ) {
        self.add_dependency_kinds(depender, dependee, kind.into(), Some(qualified_name));
    }

    pub fn add_dependency_kinds(
        &self,
        depender: &UnitRef,
        dependee: &UnitRef,
        kinds: DependencyKindSet,
        qualified_name: Option<&str>,
    ) {
        // Self references are never recorded.
        if depender == dependee {
            return;
        }
        debug_assert!(
            !dependee.is_invisible(),
            "invisible units export nothing, so nothing can depend on {}",
            dependee.absolute_filename()
        );

        let mut inner = self.inner.write();
        let from = inner.ensure_node(depender);
        let to = inner.ensure_node(dependee);
        match inner.graph.find_edge(from, to) {
            Some(edge_idx) => {
                if let Some(edge) = inner.graph.edge_weight_mut(edge_idx) {
                    edge.add(kinds, qualified_name);
                }
            }
            None => {
                let mut edge = Edge::default();
                edge.add(kinds, qualified_name);
                inner.graph.add_edge(from, to, edge);
            }
        }
        tracing::trace!(
            "dependency {} -> {} {:?}",
            depender.name(),
            dependee.name(),
            kinds
        );
    }

    /// Drop every outgoing edge of `unit`; incoming edges are kept.
    pub fn remove_dependencies(&self, unit: &UnitRef) {
        let mut inner = self.inner.write();
        let Some(&idx) = inner.indices.get(unit) else {
            return;
        };
        let outgoing: Vec<_> = inner
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge_ref| edge_ref.id())
            .collect();
        for edge_idx in outgoing {
            inner.graph.remove_edge(edge_idx);
        }
    }

    pub fn direct_dependencies(&self, unit: &UnitRef) -> HashSet<UnitRef> {
        self.inner
            .read()
            .edges(unit, Direction::Outgoing)
            .into_iter()
            .map(|(dependee, _)| dependee)
            .collect()
    }

    /// Units depending directly on `unit` through an edge of one of `kinds`.
    pub fn direct_reverse_dependencies(&self, unit: &UnitRef, kinds: DependencyKindSet) -> HashSet<UnitRef> {
        self.incoming_edges(unit)
            .into_iter()
            .filter(|(_, edge_kinds)| edge_kinds.intersects(kinds))
            .map(|(depender, _)| depender)
            .collect()
    }

    /// Dependers of `unit` with the kinds of each edge.
    pub fn incoming_edges(&self, unit: &UnitRef) -> Vec<(UnitRef, DependencyKindSet)> {
        self.inner.read().edges(unit, Direction::Incoming)
    }

    pub fn dependency_kinds(&self, depender: &UnitRef, dependee: &UnitRef) -> DependencyKindSet {
        self.with_edge(depender, dependee, |edge| edge.kinds())
            .unwrap_or_default()
    }

    pub fn named_dependencies(
        &self,
        depender: &UnitRef,
        dependee: &UnitRef,
    ) -> BTreeMap<String, DependencyKindSet> {
        self.with_edge(depender, dependee, |edge| edge.named_dependencies().clone())
            .unwrap_or_default()
    }

    fn with_edge<T>(&self, depender: &UnitRef, dependee: &UnitRef, f: impl FnOnce(&Edge) -> T) -> Option<T> {
        let inner = self.inner.read();
        let from = *inner.indices.get(depender)?;
        let to = *inner.indices.get(dependee)?;
        let edge_idx = inner.graph.find_edge(from, to)?;
        inner.graph.edge_weight(edge_idx).map(f)
    }

    /// Order every unit reachable from `roots` so that each unit comes after
    /// the units it inherits from. Ties are broken by unit name.
    pub fn topological_sort(&self, roots: &[UnitRef]) -> Vec<UnitRef> {
        self.topological_sort_by(roots, DependencyKind::Inheritance.into(), |a, b| {
            a.name().cmp(b.name())
        })
    }

    /// Order every unit reachable from `roots` (over edges of any kind) so
    /// that, for each edge whose kinds intersect `ordering_kinds`, the
    /// dependee precedes the depender.
    ///
    /// Roots are visited in the order given and successors in `compare`
    /// order, so the result is reproducible. A cycle does not stop the sort:
    /// the closing edge is skipped and the cycle is kept for
    /// [`last_circular_dependency`](Self::last_circular_dependency).
    pub fn topological_sort_by<F>(&self, roots: &[UnitRef], ordering_kinds: DependencyKindSet, compare: F) -> Vec<UnitRef>
    where
        F: Fn(&UnitRef, &UnitRef) -> Ordering,
    {
        let inner = self.inner.read();
        let mut cycle: Option<CircularDependency> = None;
        let mut sorted = Vec::with_capacity(inner.graph.node_count());

        // Units that were never added to the graph have no constraints.
        let mut starts = Vec::with_capacity(roots.len());
        for root in roots {
            match inner.indices.get(root) {
                Some(idx) => starts.push(*idx),
                None => {
                    if !sorted.contains(root) {
                        sorted.push(root.clone());
                    }
                }
            }
        }

        let reachable = discover(&inner, &starts, &compare);

        let mut marks: HashMap<NodeIndex, Mark> = HashMap::with_capacity(reachable.len());
        for &start in &reachable {
            if marks.contains_key(&start) {
                continue;
            }
            marks.insert(start, Mark::InProgress);
            let mut stack = vec![Frame {
                node: start,
                successors: inner.ordered_successors(start, ordering_kinds, &compare),
                next: 0,
            }];

            while !stack.is_empty() {
                let top = stack.len() - 1;
                let next = {
                    let frame = &mut stack[top];
                    let next = frame.successors.get(frame.next).copied();
                    frame.next += 1;
                    next
                };

                match next {
                    Some(successor) => match marks.get(&successor).copied() {
                        None => {
                            marks.insert(successor, Mark::InProgress);
                            stack.push(Frame {
                                node: successor,
                                successors: inner.ordered_successors(successor, ordering_kinds, &compare),
                                next: 0,
                            });
                        }
                        Some(Mark::InProgress) => {
                            let start_of_cycle = stack
                                .iter()
                                .position(|frame| frame.node == successor)
                                .unwrap_or(0);
                            let units: Vec<String> = stack[start_of_cycle..]
                                .iter()
                                .map(|frame| inner.graph[frame.node].name().to_string())
                                .collect();
                            tracing::warn!("circular dependency: {}", units.join(" -> "));
                            if cycle.is_none() {
                                cycle = Some(CircularDependency { units });
                            }
                        }
                        Some(Mark::Done) => {}
                    },
                    None => {
                        if let Some(frame) = stack.pop() {
                            marks.insert(frame.node, Mark::Done);
                            sorted.push(inner.graph[frame.node].clone());
                        }
                    }
                }
            }
        }

        *self.last_circular_dependency.lock() = cycle;
        sorted
    }

    /// The cycle found by the most recent sort, if any.
    pub fn last_circular_dependency(&self) -> Option<CircularDependency> {
        self.last_circular_dependency.lock().clone()
    }

    /// Every unit that could be affected by a change to any unit in
    /// `changed`, consulting the dependency graph of each unit's own project.
    ///
    /// The changed units are always part of the result. Every direct
    /// dependent of an invalidated unit is invalidated; propagation continues
    /// past a dependent only when its edge carries an inheritance, signature
    /// or namespace dependency. Units no longer attached to a project
    /// contribute only themselves.
    pub fn compute_invalidation_set(changed: impl IntoIterator<Item = UnitRef>) -> HashSet<UnitRef> {
        invalidation_closure(changed, DependencyKindSet::recursive_invalidation(), |unit| {
            unit.project()
                .map(|project| project.dependency_graph().incoming_edges(unit))
                .unwrap_or_default()
        })
    }

    /// Invalidation closure restricted to this graph, propagating through
    /// edges whose kinds intersect `recursive_kinds`.
    pub fn invalidation_set(
        &self,
        changed: impl IntoIterator<Item = UnitRef>,
        recursive_kinds: DependencyKindSet,
    ) -> HashSet<UnitRef> {
        invalidation_closure(changed, recursive_kinds, |unit| self.incoming_edges(unit))
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Breadth-first discovery of everything reachable from `starts` over any edge.
fn discover<F>(inner: &GraphInner, starts: &[NodeIndex], compare: &F) -> Vec<NodeIndex>
where
    F: Fn(&UnitRef, &UnitRef) -> Ordering,
{
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    for &start in starts {
        if seen.insert(start) {
            queue.push_back(start);
        }
    }
    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for successor in inner.ordered_successors(idx, DependencyKindSet::all(), compare) {
            if seen.insert(successor) {
                queue.push_back(successor);
            }
        }
    }
    order
}

fn invalidation_closure<I>(
    changed: impl IntoIterator<Item = UnitRef>,
    recursive_kinds: DependencyKindSet,
    incoming: I,
) -> HashSet<UnitRef>
where
    I: Fn(&UnitRef) -> Vec<(UnitRef, DependencyKindSet)>,
{
    let mut result = HashSet::new();
    let mut work_list: VecDeque<(UnitRef, UnitRef, DependencyKindSet)> = VecDeque::new();
    for unit in changed {
        if result.insert(unit.clone()) {
            for (depender, kinds) in incoming(&unit) {
                work_list.push_back((depender, unit.clone(), kinds));
            }
        }
    }

    let mut visited_edges: HashSet<(UnitRef, UnitRef)> = HashSet::new();
    while let Some((depender, dependee, kinds)) = work_list.pop_front() {
        if !visited_edges.insert((depender.clone(), dependee)) {
            continue;
        }
        result.insert(depender.clone());
        if kinds.intersects(recursive_kinds) {
            for (next, next_kinds) in incoming(&depender) {
                work_list.push_back((next, depender.clone(), next_kinds));
            }
        }
    }
    result
}
