/// Hidden-class Map engine
///
/// A `Map` describes the property layout shared by every object that
/// has followed the same sequence of property insertions. Maps form a
/// transition DAG: `add_property` either returns a cached child (two
/// objects that added the same property in the same way share a
/// shape) or allocates a new one.
///
/// Maps never own each other directly — `previous` and the
/// transition table both store `MapId`s into a single arena, so the
/// transition DAG has no cycles for Rust's borrow checker to trip
/// over even though conceptually parents and children reference each
/// other.

use std::collections::HashMap;
use crate::symbol::Symbol;

/// Transition chains longer than this force a unique (non-shared) fork,
/// bounding the cost of walking back to find a materialized table.
pub const MAX_TRANSITION: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
    pub is_accessor: bool,
}

impl Attributes {
    pub fn data(writable: bool, enumerable: bool, configurable: bool) -> Self {
        Attributes { writable, enumerable, configurable, is_accessor: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub offset: u32,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(u32);

impl MapId {
    /// Raw arena index, for collaborators (e.g. the GC) that need a
    /// stable identity but live outside this module.
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TransitionKey(Symbol, Attributes);

#[derive(Debug, Default)]
struct Transitions {
    edges: HashMap<TransitionKey, MapId>,
    /// Prototype-change edges, keyed by the new prototype's identity.
    proto_edges: HashMap<u64, MapId>,
}

#[derive(Debug)]
struct MapNode {
    prototype: Option<u64>,
    previous: Option<MapId>,
    table: Option<HashMap<Symbol, Entry>>,
    /// The single (symbol, entry) this map adds over `previous`, until
    /// the table is lazily materialized.
    added: Option<(Symbol, Entry)>,
    deleted: Vec<u32>,
    transitions: Transitions,
    transit_count: u32,
    unique: bool,
    /// Set by `flatten`; forces future transitions off this map to
    /// fork rather than mutate/alias it even though it's unique.
    force_fork: bool,
    calculated_size: u32,
}

impl MapNode {
    fn root() -> Self {
        MapNode {
            prototype: None,
            previous: None,
            table: Some(HashMap::new()),
            added: None,
            deleted: Vec::new(),
            transitions: Transitions::default(),
            transit_count: 0,
            unique: false,
            force_fork: false,
            calculated_size: 0,
        }
    }
}

/// An arena of maps. A `Map` engine instance owns the whole transition
/// DAG reachable from its root.
#[derive(Debug)]
pub struct MapArena {
    nodes: Vec<MapNode>,
}

impl MapArena {
    pub fn new() -> Self {
        MapArena { nodes: vec![MapNode::root()] }
    }

    pub fn root(&self) -> MapId {
        MapId(0)
    }

    /// The map this one transitioned from, if any. The GC's
    /// `mark_children` walks this edge to keep an entire transition
    /// chain alive as long as any map on it is reachable.
    pub fn previous(&self, id: MapId) -> Option<MapId> {
        self.node(id).previous
    }

    fn node(&self, id: MapId) -> &MapNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: MapId) -> &mut MapNode {
        &mut self.nodes[id.0 as usize]
    }

    fn push(&mut self, node: MapNode) -> MapId {
        let id = MapId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Number of live property slots described by this map.
    pub fn slot_count(&self, id: MapId) -> u32 {
        let node = self.node(id);
        match &node.table {
            Some(table) => table.len() as u32 + node.deleted.len() as u32,
            None => node.calculated_size,
        }
    }

    /// Look up `symbol`, materializing the table on demand.
    pub fn get(&mut self, id: MapId, symbol: Symbol) -> Option<Entry> {
        if let Some((added_sym, entry)) = self.node(id).added {
            if added_sym == symbol {
                return Some(entry);
            }
        }
        if let Some(table) = &self.node(id).table {
            return table.get(&symbol).copied();
        }
        self.materialize(id);
        self.node(id).table.as_ref().unwrap().get(&symbol).copied()
    }

    /// Walk the chain collecting each `added` pair on the way up to a
    /// materialized table (or the root's empty table), then replay
    /// them in reverse so the result reflects insertion order.
    fn materialize(&mut self, id: MapId) {
        if self.node(id).table.is_some() {
            return;
        }
        let mut stack = Vec::new();
        let mut cur = id;
        loop {
            let node = self.node(cur);
            if let Some(table) = &node.table {
                stack.push((cur, None));
                let _ = table;
                break;
            }
            let added = node.added.expect("non-root unmaterialized map must have `added`");
            let previous = node.previous.expect("non-root unmaterialized map must have a previous");
            stack.push((cur, Some(added)));
            cur = previous;
            if self.node(cur).table.is_some() {
                break;
            }
        }
        let mut table = self.node(cur).table.clone().unwrap_or_default();
        for (node_id, added) in stack.into_iter().rev() {
            if let Some((sym, entry)) = added {
                table.insert(sym, entry);
            }
            if node_id == id {
                // only materialize the requested node fully; intermediate
                // nodes keep lazily materializing on their own next `get`.
            }
        }
        let node = self.node_mut(id);
        node.table = Some(table);
        node.previous = None;
    }

    /// Add `symbol` with `attributes`, returning the resulting map and
    /// the slot offset the property now occupies.
    pub fn add_property(&mut self, id: MapId, symbol: Symbol, attributes: Attributes) -> (MapId, u32) {
        debug_assert!(!symbol.is_dummy());

        if self.node(id).unique {
            return self.add_property_unique(id, symbol, attributes);
        }

        let key = TransitionKey(symbol, attributes);
        if let Some(&child) = self.node(id).transitions.edges.get(&key) {
            let offset = self.get(child, symbol).expect("transition child must contain the symbol it transitions on").offset;
            return (child, offset);
        }

        if self.node(id).transit_count > MAX_TRANSITION {
            let forked = self.fork_unique(id);
            return self.add_property_unique(forked, symbol, attributes);
        }

        let parent_deleted = self.node(id).deleted.clone();
        let parent_slots = self.slot_count(id);
        let offset = parent_deleted.last().copied();
        let (offset, deleted) = match offset {
            Some(o) => {
                let mut d = parent_deleted;
                d.pop();
                (o, d)
            }
            None => (parent_slots, parent_deleted),
        };
        let entry = Entry { offset, attributes };
        let calculated_size = offset.max(parent_slots) + 1;
        let child = MapNode {
            prototype: self.node(id).prototype,
            previous: Some(id),
            table: None,
            added: Some((symbol, entry)),
            deleted,
            transitions: Transitions::default(),
            transit_count: self.node(id).transit_count + 1,
            unique: false,
            force_fork: false,
            calculated_size,
        };
        let child_id = self.push(child);
        self.node_mut(id).transitions.edges.insert(key, child_id);
        (child_id, offset)
    }

    fn add_property_unique(&mut self, id: MapId, symbol: Symbol, attributes: Attributes) -> (MapId, u32) {
        let target = if self.node(id).force_fork { self.fork_unique(id) } else { id };

        let parent_slots = self.slot_count(target);
        let offset = self.node_mut(target).deleted.pop().unwrap_or(parent_slots);
        self.materialize(target);
        let entry = Entry { offset, attributes };
        let node = self.node_mut(target);
        node.table.as_mut().unwrap().insert(symbol, entry);
        node.calculated_size = offset.max(parent_slots) + 1;
        (target, offset)
    }

    /// Split `id` into a private unique map sharing its current table,
    /// detached from the shared transition DAG.
    fn fork_unique(&mut self, id: MapId) -> MapId {
        self.materialize(id);
        let node = self.node(id);
        let forked = MapNode {
            prototype: node.prototype,
            previous: None,
            table: node.table.clone(),
            added: None,
            deleted: node.deleted.clone(),
            transitions: Transitions::default(),
            transit_count: 0,
            unique: true,
            force_fork: false,
            calculated_size: node.calculated_size,
        };
        self.push(forked)
    }

    pub fn change_attributes(&mut self, id: MapId, symbol: Symbol, attributes: Attributes) -> MapId {
        let target = self.fork_unique(id);
        self.materialize(target);
        let node = self.node_mut(target);
        let table = node.table.as_mut().unwrap();
        if let Some(entry) = table.get_mut(&symbol) {
            entry.attributes = attributes;
        }
        target
    }

    pub fn delete_property(&mut self, id: MapId, symbol: Symbol) -> MapId {
        let target = self.fork_unique(id);
        self.materialize(target);
        let node = self.node_mut(target);
        let table = node.table.as_mut().unwrap();
        if let Some(entry) = table.remove(&symbol) {
            node.deleted.push(entry.offset);
        }
        target
    }

    pub fn change_prototype(&mut self, id: MapId, prototype: Option<u64>) -> MapId {
        if self.node(id).unique {
            let target = if self.node(id).force_fork { self.fork_unique(id) } else { id };
            self.node_mut(target).prototype = prototype;
            return target;
        }

        let proto_key = prototype.unwrap_or(0);
        if let Some(&child) = self.node(id).transitions.proto_edges.get(&proto_key) {
            return child;
        }
        if self.node(id).transit_count > MAX_TRANSITION {
            let forked = self.fork_unique(id);
            self.node_mut(forked).prototype = prototype;
            return forked;
        }
        self.materialize(id);
        let node = self.node(id);
        let child = MapNode {
            prototype,
            previous: None,
            table: node.table.clone(),
            added: None,
            deleted: node.deleted.clone(),
            transitions: Transitions::default(),
            transit_count: node.transit_count + 1,
            unique: false,
            force_fork: false,
            calculated_size: node.calculated_size,
        };
        let child_id = self.push(child);
        self.node_mut(id).transitions.proto_edges.insert(proto_key, child_id);
        child_id
    }

    /// Forbid future in-place mutation/aliasing of a unique map —
    /// later transitions off it always fork first.
    pub fn flatten(&mut self, id: MapId) {
        if self.node(id).unique {
            self.node_mut(id).force_fork = true;
        }
    }

    pub fn is_unique(&self, id: MapId) -> bool {
        self.node(id).unique
    }

    pub fn transit_count(&self, id: MapId) -> u32 {
        self.node(id).transit_count
    }
}

impl Default for MapArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    fn data_attrs() -> Attributes {
        Attributes::data(true, true, true)
    }

    #[test]
    fn slot_count_matches_live_properties() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let (m1, _) = arena.add_property(root, intern("a"), data_attrs());
        let (m2, _) = arena.add_property(m1, intern("b"), data_attrs());
        assert_eq!(arena.slot_count(m2), 2);
    }

    #[test]
    fn identical_transitions_are_shared() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let (m1, _) = arena.add_property(root, intern("x"), data_attrs());
        let (m2, _) = arena.add_property(root, intern("x"), data_attrs());
        assert_eq!(m1, m2);
    }

    #[test]
    fn offsets_are_stable_across_shared_chains() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let (a1, off_a) = arena.add_property(root, intern("first"), data_attrs());
        let (_, off_b1) = arena.add_property(a1, intern("second"), data_attrs());

        let (a2, off_a2) = arena.add_property(root, intern("first"), data_attrs());
        let (_, off_b2) = arena.add_property(a2, intern("second"), data_attrs());

        assert_eq!(off_a, off_a2);
        assert_eq!(off_b1, off_b2);
    }

    #[test]
    fn delete_then_add_reuses_the_freed_offset() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let (m1, _) = arena.add_property(root, intern("p"), data_attrs());
        let (m2, off_p) = arena.add_property(m1, intern("q"), data_attrs());
        let m3 = arena.delete_property(m2, intern("q"));
        let (_, off_r) = arena.add_property(m3, intern("r"), data_attrs());
        assert_eq!(off_p, off_r);
    }

    #[test]
    fn crossing_max_transition_forces_a_unique_fork() {
        let mut arena = MapArena::new();
        let mut current = arena.root();
        for i in 0..(MAX_TRANSITION + 2) {
            let (next, _) = arena.add_property(current, intern(&format!("k{i}")), data_attrs());
            current = next;
        }
        assert!(arena.is_unique(current));
    }

    #[test]
    fn get_finds_properties_through_unmaterialized_chain() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let (m1, _) = arena.add_property(root, intern("alpha"), data_attrs());
        let (m2, _) = arena.add_property(m1, intern("beta"), data_attrs());
        assert!(arena.get(m2, intern("alpha")).is_some());
        assert!(arena.get(m2, intern("beta")).is_some());
        assert!(arena.get(m2, intern("gamma")).is_none());
    }
}
