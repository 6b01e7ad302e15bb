/// GC collaborator interface
///
/// The tracing GC itself is out of scope: this module only implements
/// the contract the core depends on (§6) — a `Trace` hook the
/// collector calls to find the outgoing edges of a map or a scope's
/// code object. A real collector lives outside this crate and drives
/// these impls during its mark phase; nothing here allocates or
/// collects anything itself.

use crate::bytecode::Code;
use crate::map::{MapArena, MapId};

/// Opaque handle a collector uses to identify a traced object. The
/// core never constructs one of these itself — it only ever visits
/// the ones a `Trace` impl reports.
pub type GcRef = u64;

/// Visits the outgoing edges of a GC-managed object.
///
/// A map's only outgoing edge is `previous` (§5, Shared resources):
/// keeping a map alive must keep its whole transition chain alive, or
/// a polymorphic inline cache holding an older map in the chain would
/// dereference a collected node. A code object's edges are its decl
/// table, since those decls are what a collector would need to find
/// heap-allocated default values or closure templates stashed in a
/// hosting runtime.
pub trait Trace {
    fn mark_children(&self, visit: &mut dyn FnMut(GcRef));
}

fn map_ref(id: MapId) -> GcRef {
    id.raw() as GcRef
}

/// Marks the chain starting at `id`, not the whole arena — a
/// collector calls this once per live root it finds referencing a map.
pub fn mark_map_chain(arena: &MapArena, id: MapId, visit: &mut dyn FnMut(GcRef)) {
    visit(map_ref(id));
    let mut cur = arena.previous(id);
    while let Some(prev) = cur {
        visit(map_ref(prev));
        cur = arena.previous(prev);
    }
}

impl Trace for Code {
    fn mark_children(&self, visit: &mut dyn FnMut(GcRef)) {
        for (i, _decl) in self.decls.iter().enumerate() {
            visit(i as GcRef);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Attributes;
    use crate::symbol::intern;

    #[test]
    fn mark_map_chain_visits_every_ancestor() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let (m1, _) = arena.add_property(root, intern("a"), Attributes::default());
        let (m2, _) = arena.add_property(m1, intern("b"), Attributes::default());

        let mut seen = Vec::new();
        mark_map_chain(&arena, m2, &mut |r| seen.push(r));

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], map_ref(m2));
    }

    #[test]
    fn root_map_chain_is_a_single_node() {
        let arena = MapArena::new();
        let root = arena.root();
        let mut seen = Vec::new();
        mark_map_chain(&arena, root, &mut |r| seen.push(r));
        assert_eq!(seen, vec![map_ref(root)]);
    }
}
