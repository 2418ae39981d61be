//! Structurally shared integer sets
//!
//! A [`SetRepository`] stores sets of `u32` indices as canonical binary trees
//! whose nodes are hash-consed: identical subtrees are the same allocation no
//! matter which set built them. Consequences:
//!
//! - two sets from one repository are equal iff their roots are the same node,
//!   so equality is O(1);
//! - union, intersection and difference reuse untouched subtrees and only
//!   allocate along the paths where the operands differ;
//! - nodes are reference counted and freed when the last set using them drops.
//!
//! # Node layout
//!
//! A node covers the half-open range `[start, end)` of its smallest and
//! largest element. A *leaf* means every index in its range is present. A
//! *split* node divides its range at the position where the highest
//! differing bit of `start` and `end - 1` flips; the left child holds the
//! smaller elements. Given an element set, this layout is unique.
//!
//! Elements must not exceed [`MAX_INDEX`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::ops::{Add, BitAnd, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

/// Element type stored in sets.
pub type Index = u32;

/// Largest storable element; node ranges end one past their last element.
pub const MAX_INDEX: Index = u32::MAX - 1;

/// Default number of node creations between sweeps of dead table entries.
const DEFAULT_PRUNE_INTERVAL: u64 = 4096;

struct SetNode {
    start: Index,
    end: Index,
    count: u32,
    children: Option<(Arc<SetNode>, Arc<SetNode>)>,
}

impl SetNode {
    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn covers(&self, other: &SetNode) -> bool {
        self.is_leaf() && self.start <= other.start && other.end <= self.end
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Leaf { start: Index, end: Index },
    Split { left: usize, right: usize },
}

struct RepositoryInner {
    name: String,
    nodes: DashMap<NodeKey, Weak<SetNode>>,
    created: AtomicU64,
    prune_interval: u64,
}

/// Hash-consing store for [`Set`]s. Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct SetRepository {
    inner: Arc<RepositoryInner>,
}

impl fmt::Debug for SetRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetRepository")
            .field("name", &self.inner.name)
            .field("nodes", &self.inner.nodes.len())
            .finish()
    }
}

impl SetRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_prune_interval(name, DEFAULT_PRUNE_INTERVAL)
    }

    /// Create a repository that sweeps dead node entries every `interval`
    /// node creations (0 disables automatic sweeping).
    pub fn with_prune_interval(name: impl Into<String>, interval: u64) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                name: name.into(),
                nodes: DashMap::new(),
                created: AtomicU64::new(0),
                prune_interval: interval,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn empty_set(&self) -> Set {
        Set {
            root: None,
            repository: self.clone(),
        }
    }

    /// Build a set from arbitrary (unsorted, duplicated) indices.
    ///
    /// Elements above [`MAX_INDEX`] are refused: fatal in debug builds,
    /// dropped from the set otherwise.
    pub fn create_set(&self, items: impl IntoIterator<Item = Index>) -> Set {
        let sorted: BTreeSet<Index> = items
            .into_iter()
            .filter(|item| {
                if *item > MAX_INDEX {
                    error!("Set element {} is out of range", item);
                    debug_assert!(false, "set element {} is out of range", item);
                    return false;
                }
                true
            })
            .collect();
        let items: Vec<Index> = sorted.into_iter().collect();
        let root = if items.is_empty() {
            None
        } else {
            Some(self.build(&items))
        };
        Set {
            root,
            repository: self.clone(),
        }
    }

    pub fn union(&self, a: &Set, b: &Set) -> Set {
        self.debug_check(a, b);
        self.wrap(self.union_nodes(a.root.as_ref(), b.root.as_ref()))
    }

    pub fn intersection(&self, a: &Set, b: &Set) -> Set {
        self.debug_check(a, b);
        self.wrap(self.intersect_nodes(a.root.as_ref(), b.root.as_ref()))
    }

    pub fn difference(&self, a: &Set, b: &Set) -> Set {
        self.debug_check(a, b);
        self.wrap(self.subtract_nodes(a.root.as_ref(), b.root.as_ref()))
    }

    /// Number of entries in the node table, including dead ones not yet swept.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Number of nodes still referenced by some set.
    pub fn live_node_count(&self) -> usize {
        self.inner
            .nodes
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Drop table entries whose node has been freed.
    pub fn prune(&self) {
        let before = self.inner.nodes.len();
        self.inner.nodes.retain(|_, node| node.strong_count() > 0);
        trace!(
            repository = %self.inner.name,
            removed = before.saturating_sub(self.inner.nodes.len()),
            "Pruned set nodes"
        );
    }

    fn wrap(&self, root: Option<Arc<SetNode>>) -> Set {
        Set {
            root,
            repository: self.clone(),
        }
    }

    fn debug_check(&self, a: &Set, b: &Set) {
        debug_assert!(
            Arc::ptr_eq(&self.inner, &a.repository.inner)
                && Arc::ptr_eq(&self.inner, &b.repository.inner),
            "set operands belong to a different repository"
        );
    }

    // ------------------------------------------------------------------------
    // Node construction
    // ------------------------------------------------------------------------

    fn intern(&self, key: NodeKey, make: impl FnOnce() -> SetNode) -> Arc<SetNode> {
        let node = match self.inner.nodes.entry(key) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().upgrade() {
                    return existing;
                }
                let node = Arc::new(make());
                entry.insert(Arc::downgrade(&node));
                node
            }
            Entry::Vacant(entry) => {
                let node = Arc::new(make());
                entry.insert(Arc::downgrade(&node));
                node
            }
        };

        let created = self.inner.created.fetch_add(1, Ordering::Relaxed) + 1;
        if self.inner.prune_interval > 0 && created % self.inner.prune_interval == 0 {
            self.prune();
        }
        node
    }

    fn leaf(&self, start: Index, end: Index) -> Arc<SetNode> {
        self.intern(NodeKey::Leaf { start, end }, || SetNode {
            start,
            end,
            count: end - start,
            children: None,
        })
    }

    fn split(&self, left: Arc<SetNode>, right: Arc<SetNode>) -> Arc<SetNode> {
        let key = NodeKey::Split {
            left: Arc::as_ptr(&left) as usize,
            right: Arc::as_ptr(&right) as usize,
        };
        self.intern(key, || SetNode {
            start: left.start,
            end: right.end,
            count: left.count + right.count,
            children: Some((left, right)),
        })
    }

    fn build(&self, items: &[Index]) -> Arc<SetNode> {
        let first = items[0];
        let last = items[items.len() - 1];
        if (last - first) as usize + 1 == items.len() {
            return self.leaf(first, last + 1);
        }

        let position = split_position(first, last + 1);
        let middle = items.partition_point(|&item| item < position);
        let left = self.build(&items[..middle]);
        let right = self.build(&items[middle..]);
        self.split(left, right)
    }

    /// Canonical node for the union of `x` and `y`, all of `x` below `y`.
    fn join(&self, x: Arc<SetNode>, y: Arc<SetNode>) -> Arc<SetNode> {
        let start = x.start;
        let end = y.end;
        if x.count + y.count == end - start {
            return self.leaf(start, end);
        }

        let position = split_position(start, end);
        if x.end <= position && position <= y.start {
            return self.split(x, y);
        }

        let (x_low, x_high) = self.split_at(&x, position);
        let (y_low, y_high) = self.split_at(&y, position);
        let low = self.join_opt(x_low, y_low);
        let high = self.join_opt(x_high, y_high);
        match (low, high) {
            (Some(low), Some(high)) => self.split(low, high),
            (Some(node), None) | (None, Some(node)) => node,
            (None, None) => self.leaf(start, end),
        }
    }

    fn join_opt(&self, x: Option<Arc<SetNode>>, y: Option<Arc<SetNode>>) -> Option<Arc<SetNode>> {
        match (x, y) {
            (Some(x), Some(y)) => Some(self.join(x, y)),
            (x, None) => x,
            (None, y) => y,
        }
    }

    /// Partition a node into elements below `position` and the rest.
    fn split_at(
        &self,
        node: &Arc<SetNode>,
        position: Index,
    ) -> (Option<Arc<SetNode>>, Option<Arc<SetNode>>) {
        if position <= node.start {
            return (None, Some(Arc::clone(node)));
        }
        if position >= node.end {
            return (Some(Arc::clone(node)), None);
        }

        match &node.children {
            None => (
                Some(self.leaf(node.start, position)),
                Some(self.leaf(position, node.end)),
            ),
            Some((left, right)) => {
                if position >= right.start {
                    let (low, high) = self.split_at(right, position);
                    (self.join_opt(Some(Arc::clone(left)), low), high)
                } else if position <= left.end {
                    let (low, high) = self.split_at(left, position);
                    (low, self.join_opt(high, Some(Arc::clone(right))))
                } else {
                    (Some(Arc::clone(left)), Some(Arc::clone(right)))
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Algebra
    // ------------------------------------------------------------------------

    fn union_nodes(
        &self,
        a: Option<&Arc<SetNode>>,
        b: Option<&Arc<SetNode>>,
    ) -> Option<Arc<SetNode>> {
        let (a, b) = match (a, b) {
            (None, other) | (other, None) => return other.cloned(),
            (Some(a), Some(b)) => (a, b),
        };
        if Arc::ptr_eq(a, b) || a.covers(b) {
            return Some(Arc::clone(a));
        }
        if b.covers(a) {
            return Some(Arc::clone(b));
        }
        if a.end <= b.start {
            return Some(self.join(Arc::clone(a), Arc::clone(b)));
        }
        if b.end <= a.start {
            return Some(self.join(Arc::clone(b), Arc::clone(a)));
        }

        let start = a.start.min(b.start);
        let end = a.end.max(b.end);
        if a.is_leaf() && b.is_leaf() {
            return Some(self.leaf(start, end));
        }

        let position = split_position(start, end);
        let (a_low, a_high) = self.split_at(a, position);
        let (b_low, b_high) = self.split_at(b, position);
        let low = self.union_nodes(a_low.as_ref(), b_low.as_ref());
        let high = self.union_nodes(a_high.as_ref(), b_high.as_ref());
        self.join_opt(low, high)
    }

    fn intersect_nodes(
        &self,
        a: Option<&Arc<SetNode>>,
        b: Option<&Arc<SetNode>>,
    ) -> Option<Arc<SetNode>> {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            _ => return None,
        };
        if Arc::ptr_eq(a, b) || b.covers(a) {
            return Some(Arc::clone(a));
        }
        if a.covers(b) {
            return Some(Arc::clone(b));
        }
        if a.end <= b.start || b.end <= a.start {
            return None;
        }
        if a.is_leaf() && b.is_leaf() {
            return Some(self.leaf(a.start.max(b.start), a.end.min(b.end)));
        }

        let position = split_position(a.start.min(b.start), a.end.max(b.end));
        let (a_low, a_high) = self.split_at(a, position);
        let (b_low, b_high) = self.split_at(b, position);
        let low = self.intersect_nodes(a_low.as_ref(), b_low.as_ref());
        let high = self.intersect_nodes(a_high.as_ref(), b_high.as_ref());
        self.join_opt(low, high)
    }

    fn subtract_nodes(
        &self,
        a: Option<&Arc<SetNode>>,
        b: Option<&Arc<SetNode>>,
    ) -> Option<Arc<SetNode>> {
        let a = a?;
        let Some(b) = b else {
            return Some(Arc::clone(a));
        };
        if Arc::ptr_eq(a, b) || b.covers(a) {
            return None;
        }
        if a.end <= b.start || b.end <= a.start {
            return Some(Arc::clone(a));
        }
        if a.is_leaf() && b.is_leaf() {
            let before = (a.start < b.start).then(|| self.leaf(a.start, b.start));
            let after = (b.end < a.end).then(|| self.leaf(b.end, a.end));
            return self.join_opt(before, after);
        }

        let position = split_position(a.start.min(b.start), a.end.max(b.end));
        let (a_low, a_high) = self.split_at(a, position);
        let (b_low, b_high) = self.split_at(b, position);
        let low = self.subtract_nodes(a_low.as_ref(), b_low.as_ref());
        let high = self.subtract_nodes(a_high.as_ref(), b_high.as_ref());
        self.join_opt(low, high)
    }
}

/// Split point of `[start, end)`, which must hold at least two indices.
fn split_position(start: Index, end: Index) -> Index {
    let last = end - 1;
    let highest_differing = 31 - (start ^ last).leading_zeros();
    let mask = (1u32 << highest_differing) - 1;
    last & !mask
}

// ============================================================================
// Set
// ============================================================================

/// Immutable handle to a set stored in a [`SetRepository`].
///
/// Equality and hashing are by root node identity, which for sets of the same
/// repository coincides with element equality.
#[derive(Clone)]
pub struct Set {
    root: Option<Arc<SetNode>>,
    repository: SetRepository,
}

impl Set {
    pub fn repository(&self) -> &SetRepository {
        &self.repository
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn count(&self) -> usize {
        self.root.as_ref().map_or(0, |node| node.count as usize)
    }

    pub fn contains(&self, item: Index) -> bool {
        let mut current = self.root.as_ref();
        while let Some(node) = current {
            if item < node.start || item >= node.end {
                return false;
            }
            match &node.children {
                None => return true,
                Some((left, right)) => {
                    current = if item < right.start { Some(left) } else { Some(right) };
                }
            }
        }
        false
    }

    /// Elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Index> + '_ {
        SetIter {
            stack: self.root.iter().cloned().collect(),
            range: None,
        }
    }

    pub fn to_vec(&self) -> Vec<Index> {
        self.iter().collect()
    }

    pub fn std_set(&self) -> BTreeSet<Index> {
        self.iter().collect()
    }

    pub fn union(&self, other: &Set) -> Set {
        self.repository.union(self, other)
    }

    pub fn intersection(&self, other: &Set) -> Set {
        self.repository.intersection(self, other)
    }

    pub fn difference(&self, other: &Set) -> Set {
        self.repository.difference(self, other)
    }

    /// Copy of this set with `item` added.
    pub fn with(&self, item: Index) -> Set {
        self.union(&self.repository.create_set([item]))
    }

    /// Copy of this set with `item` removed.
    pub fn without(&self, item: Index) -> Set {
        self.difference(&self.repository.create_set([item]))
    }

    /// Graphviz rendering of the shared node structure.
    pub fn dump_dot_graph(&self) -> String {
        let mut out = String::from("digraph Set {\n");
        let mut seen = HashSet::new();
        if let Some(root) = &self.root {
            dump_node(root, &mut seen, &mut out);
        }
        out.push_str("}\n");
        out
    }
}

fn dump_node(node: &Arc<SetNode>, seen: &mut HashSet<usize>, out: &mut String) {
    let id = Arc::as_ptr(node) as usize;
    if !seen.insert(id) {
        return;
    }
    let shape = if node.is_leaf() { "box" } else { "ellipse" };
    let _ = writeln!(
        out,
        "  n{} [label=\"[{}, {}) #{}\", shape={}];",
        id, node.start, node.end, node.count, shape
    );
    if let Some((left, right)) = &node.children {
        for child in [left, right] {
            let _ = writeln!(out, "  n{} -> n{};", id, Arc::as_ptr(child) as usize);
            dump_node(child, seen, out);
        }
    }
}

struct SetIter {
    stack: Vec<Arc<SetNode>>,
    range: Option<(Index, Index)>,
}

impl Iterator for SetIter {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        loop {
            if let Some((next, end)) = self.range {
                if next < end {
                    self.range = Some((next + 1, end));
                    return Some(next);
                }
                self.range = None;
            }

            let node = self.stack.pop()?;
            match &node.children {
                None => self.range = Some((node.start, node.end)),
                Some((left, right)) => {
                    self.stack.push(Arc::clone(right));
                    self.stack.push(Arc::clone(left));
                }
            }
        }
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Set {}

impl Hash for Set {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root
            .as_ref()
            .map_or(0, |node| Arc::as_ptr(node) as usize)
            .hash(state);
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Add for &Set {
    type Output = Set;

    fn add(self, rhs: &Set) -> Set {
        self.union(rhs)
    }
}

impl BitAnd for &Set {
    type Output = Set;

    fn bitand(self, rhs: &Set) -> Set {
        self.intersection(rhs)
    }
}

impl Sub for &Set {
    type Output = Set;

    fn sub(self, rhs: &Set) -> Set {
        self.difference(rhs)
    }
}
