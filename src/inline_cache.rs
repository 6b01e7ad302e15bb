/// Inline-cache layer on top of the Map engine
///
/// Sits directly on `map::MapArena`: callers embed `(map identity,
/// offset)` pairs at bytecode sites and guard them with an identity
/// compare before trusting the cached offset. This module is the
/// state machine that decides when a site degrades from monomorphic
/// to polymorphic to megamorphic.
///
/// Inspired by V8 and CPython 3.11's adaptive interpreter.

use std::collections::HashMap;

use crate::map::MapId;

/// PIC holds up to this many distinct shapes before going megamorphic.
const IC_MAX_POLY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcState {
    Uninitialized,
    Monomorphic,
    Polymorphic,
    Megamorphic,
}

#[derive(Debug, Clone, Copy)]
pub struct PropEntry {
    pub map: MapId,
    pub offset: u32,
}

/// A property-access inline-cache site.
#[derive(Debug)]
pub struct PropIc {
    state: IcState,
    entries: [Option<PropEntry>; IC_MAX_POLY],
    hits: u32,
    misses: u32,
}

impl PropIc {
    pub fn new() -> Self {
        PropIc { state: IcState::Uninitialized, entries: [None; IC_MAX_POLY], hits: 0, misses: 0 }
    }

    pub fn state(&self) -> IcState {
        self.state
    }

    /// Guard-and-fetch: returns the cached offset only if `map`
    /// matches a cached entry by identity.
    pub fn lookup(&mut self, map: MapId) -> Option<u32> {
        match self.state {
            IcState::Megamorphic | IcState::Uninitialized => {
                self.misses += 1;
                None
            }
            IcState::Monomorphic | IcState::Polymorphic => {
                for entry in self.entries.iter().flatten() {
                    if entry.map == map {
                        self.hits += 1;
                        return Some(entry.offset);
                    }
                }
                self.misses += 1;
                None
            }
        }
    }

    pub fn update(&mut self, map: MapId, offset: u32) {
        let new_entry = PropEntry { map, offset };
        match self.state {
            IcState::Uninitialized => {
                self.entries[0] = Some(new_entry);
                self.state = IcState::Monomorphic;
            }
            IcState::Monomorphic | IcState::Polymorphic => {
                if self.entries.iter().flatten().any(|e| e.map == map) {
                    return;
                }
                if let Some(slot) = self.entries.iter_mut().find(|e| e.is_none()) {
                    *slot = Some(new_entry);
                    self.state = IcState::Polymorphic;
                } else {
                    self.state = IcState::Megamorphic;
                }
            }
            IcState::Megamorphic => {}
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

impl Default for PropIc {
    fn default() -> Self {
        Self::new()
    }
}

/// A call-site inline cache. Monomorphic only: calls don't benefit
/// from a polymorphic tier the way property reads do, since the
/// target's identity (not its shape) is what's being cached.
#[derive(Debug)]
pub struct CallIc {
    state: IcState,
    entry: Option<(MapId, u64)>,
}

impl CallIc {
    pub fn new() -> Self {
        CallIc { state: IcState::Uninitialized, entry: None }
    }

    pub fn state(&self) -> IcState {
        self.state
    }

    pub fn lookup(&self, map: MapId) -> Option<u64> {
        match self.state {
            IcState::Monomorphic => self.entry.filter(|(m, _)| *m == map).map(|(_, target)| target),
            _ => None,
        }
    }

    pub fn update(&mut self, map: MapId, target: u64) {
        if self.state == IcState::Megamorphic {
            return;
        }
        if let Some((prev_map, _)) = self.entry {
            if prev_map != map {
                self.state = IcState::Megamorphic;
                self.entry = None;
                return;
            }
        }
        self.entry = Some((map, target));
        self.state = IcState::Monomorphic;
    }

    /// Called when this call site resolves its callee through a
    /// `VarType::Lookup` access rather than a shape-guarded path —
    /// there is no stable shape to cache against, so the site is
    /// marked permanently uncacheable rather than left to flounder
    /// through the usual poly→mega path.
    pub fn mark_reflective(&mut self) {
        self.state = IcState::Megamorphic;
        self.entry = None;
    }
}

impl Default for CallIc {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse operand-type tag a binary-operator call site feeds back to
/// its cache. Mirrors the map engine's shapes in spirit: two operands
/// of the same tag pair take the same fast numeric/string path, so a
/// site's cache degrades exactly when the *types* it sees diversify,
/// the same way a property cache degrades when the *shapes* do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFeedback {
    Smi,
    Double,
    String,
    Object,
    Other,
}

/// A binary-operator (`+`, `<`, …) inline-cache site. Caches
/// `(lhs, rhs)` type-tag pairs rather than `(map, offset)` pairs —
/// there is no shape to guard here, only the coarse type lattice a
/// numeric/string fast path can specialize on.
#[derive(Debug)]
pub struct BinopIc {
    state: IcState,
    entries: [Option<(TypeFeedback, TypeFeedback)>; IC_MAX_POLY],
}

impl BinopIc {
    pub fn new() -> Self {
        BinopIc { state: IcState::Uninitialized, entries: [None; IC_MAX_POLY] }
    }

    pub fn state(&self) -> IcState {
        self.state
    }

    /// True if this site has already cached `(lhs, rhs)` and can take
    /// its specialized path without falling back to the generic op.
    pub fn is_cached(&self, lhs: TypeFeedback, rhs: TypeFeedback) -> bool {
        matches!(self.state, IcState::Monomorphic | IcState::Polymorphic)
            && self.entries.iter().flatten().any(|e| *e == (lhs, rhs))
    }

    pub fn update(&mut self, lhs: TypeFeedback, rhs: TypeFeedback) {
        let pair = (lhs, rhs);
        match self.state {
            IcState::Uninitialized => {
                self.entries[0] = Some(pair);
                self.state = IcState::Monomorphic;
            }
            IcState::Monomorphic | IcState::Polymorphic => {
                if self.entries.iter().flatten().any(|e| *e == pair) {
                    return;
                }
                if let Some(slot) = self.entries.iter_mut().find(|e| e.is_none()) {
                    *slot = Some(pair);
                    self.state = IcState::Polymorphic;
                } else {
                    self.state = IcState::Megamorphic;
                }
            }
            IcState::Megamorphic => {}
        }
    }
}

impl Default for BinopIc {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-function feedback vector: one inline cache per bytecode
/// offset that performs a property access, call, or binary op. Caches
/// are allocated lazily the first time a site is reached, matching
/// the `Uninitialized` starting state each cache type already has.
#[derive(Debug, Default)]
pub struct IcTable {
    props: HashMap<usize, PropIc>,
    calls: HashMap<usize, CallIc>,
    binops: HashMap<usize, BinopIc>,
}

impl IcTable {
    pub fn new() -> Self {
        IcTable::default()
    }

    pub fn prop(&mut self, site: usize) -> &mut PropIc {
        self.props.entry(site).or_default()
    }

    pub fn call(&mut self, site: usize) -> &mut CallIc {
        self.calls.entry(site).or_default()
    }

    pub fn binop(&mut self, site: usize) -> &mut BinopIc {
        self.binops.entry(site).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapArena;

    #[test]
    fn monomorphic_then_polymorphic_then_megamorphic() {
        let mut arena = MapArena::new();
        let root = arena.root();
        let mut ic = PropIc::new();
        assert_eq!(ic.state(), IcState::Uninitialized);

        ic.update(root, 0);
        assert_eq!(ic.state(), IcState::Monomorphic);
        assert_eq!(ic.lookup(root), Some(0));

        let mut maps = vec![root];
        for i in 0..IC_MAX_POLY {
            let (m, off) = arena.add_property(root, crate::symbol::intern(&format!("s{i}")), crate::map::Attributes::data(true, true, true));
            ic.update(m, off);
            maps.push(m);
        }
        assert_eq!(ic.state(), IcState::Megamorphic);
        assert!(ic.lookup(root).is_none());
    }

    #[test]
    fn reflective_call_site_never_caches() {
        let mut ic = CallIc::new();
        let mut arena = MapArena::new();
        let root = arena.root();
        ic.mark_reflective();
        ic.update(root, 0xdead);
        assert_eq!(ic.state(), IcState::Megamorphic);
        assert!(ic.lookup(root).is_none());
    }

    #[test]
    fn binop_ic_stays_monomorphic_on_repeat_types() {
        let mut ic = BinopIc::new();
        ic.update(TypeFeedback::Smi, TypeFeedback::Smi);
        ic.update(TypeFeedback::Smi, TypeFeedback::Smi);
        assert_eq!(ic.state(), IcState::Monomorphic);
        assert!(ic.is_cached(TypeFeedback::Smi, TypeFeedback::Smi));
    }

    #[test]
    fn binop_ic_degrades_to_megamorphic_past_ic_max_poly() {
        let mut ic = BinopIc::new();
        let pairs = [
            (TypeFeedback::Smi, TypeFeedback::Smi),
            (TypeFeedback::Double, TypeFeedback::Double),
            (TypeFeedback::String, TypeFeedback::String),
            (TypeFeedback::Object, TypeFeedback::Object),
            (TypeFeedback::Other, TypeFeedback::Other),
        ];
        for (lhs, rhs) in pairs {
            ic.update(lhs, rhs);
        }
        assert_eq!(ic.state(), IcState::Megamorphic);
        assert!(!ic.is_cached(TypeFeedback::Smi, TypeFeedback::Smi));
    }

    #[test]
    fn ic_table_keeps_independent_caches_per_site() {
        let mut table = IcTable::new();
        let mut arena = MapArena::new();
        let root = arena.root();
        let (m1, off1) = arena.add_property(root, crate::symbol::intern("a"), crate::map::Attributes::data(true, true, true));

        table.prop(10).update(m1, off1);
        assert_eq!(table.prop(10).state(), IcState::Monomorphic);
        // A different site starts fresh even though it shares an arena.
        assert_eq!(table.prop(20).state(), IcState::Uninitialized);
    }
}
