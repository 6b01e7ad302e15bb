/// Lexical scope resolver
///
/// Two-pass analysis over a function's scope tree:
///
///   - forward pass (`Resolver::lookup`), called once per variable
///     reference as the compiler walks the AST, classifies the
///     reference and records a `Site` against the declaring scope;
///   - backward pass (`Resolver::finalize`), called when a function
///     scope closes, builds the declaration table and rewrites every
///     recorded site's bytecode in place.
///
/// Scopes live in an arena (`Vec<ScopeNode>`) addressed by `ScopeId` —
/// parent links are plain indices, so the tree has no owning cycles
/// for the borrow checker to fight.

use std::collections::HashMap;
use crate::bytecode::{Code, Decl, Op};
use crate::symbol::Symbol;

/// STACK < HEAP < GLOBAL < LOOKUP. `upgrade` is `max`; a site's
/// classification only ever moves up this lattice, never down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VarType {
    Stack,
    Heap,
    Global,
    Lookup,
}

pub fn upgrade(a: VarType, b: VarType) -> VarType {
    a.max(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeId(pub u32);

#[derive(Debug, Clone)]
struct VarInfo {
    ty: VarType,
    refcount: u32,
    immutable: bool,
    is_param: bool,
    /// Assigned once the backward pass decides this variable's final
    /// storage; `None` until `finalize` runs.
    local_index: Option<u16>,
    heap_offset: Option<u16>,
}

impl VarInfo {
    fn declared(immutable: bool, is_param: bool) -> Self {
        VarInfo { ty: VarType::Stack, refcount: 0, immutable, is_param, local_index: None, heap_offset: None }
    }
}

#[derive(Debug, Clone, Copy)]
struct Site {
    symbol: Symbol,
    offset: usize,
    /// The classification this reference carried *at the moment it
    /// ascended past this scope* — not the variable's final stored
    /// type. The backward pass upgrades the two together.
    ty_at_site: VarType,
    /// Number of enclosing Function-scope boundaries crossed between
    /// the reference and the declaring scope; used for HEAP depth.
    depth: u16,
    is_write: bool,
    from_strict: bool,
}

#[derive(Debug)]
struct FunctionScope {
    code: CodeId,
    variables: HashMap<Symbol, VarInfo>,
    /// Declaration order as the parser saw them, so the decl table
    /// comes out deterministic.
    param_order: Vec<Symbol>,
    fdecl_order: Vec<Symbol>,
    var_order: Vec<Symbol>,
    fexpr_self: Option<Symbol>,
    sites: Vec<Site>,
    /// Top (global) scope: unresolved names become GLOBAL here instead
    /// of recursing further.
    is_top: bool,
    /// This scope is the lexically immediate parent of a non-strict
    /// direct `eval` call — its own locals must stay addressable from
    /// the generic lookup path eval might install.
    upper_of_eval: bool,
    /// This *is* a top scope whose global object might be extended
    /// by eval — unresolved globals become LOOKUP rather than GLOBAL.
    eval_top_scope: bool,
    /// Non-strict function containing a direct `eval` call: anything
    /// resolved through it must upgrade to at least LOOKUP.
    dynamic_target: bool,
    strict: bool,
    creates_arguments_object: bool,
    has_arguments_ref: bool,
}

impl FunctionScope {
    fn new(code: CodeId) -> Self {
        FunctionScope {
            code,
            variables: HashMap::new(),
            param_order: Vec::new(),
            fdecl_order: Vec::new(),
            var_order: Vec::new(),
            fexpr_self: None,
            sites: Vec::new(),
            is_top: false,
            upper_of_eval: false,
            eval_top_scope: false,
            dynamic_target: false,
            strict: false,
            creates_arguments_object: false,
            has_arguments_ref: false,
        }
    }
}

#[derive(Debug)]
enum ScopeKind {
    Function(FunctionScope),
    Catch { symbol: Symbol },
    With,
}

#[derive(Debug)]
struct ScopeNode {
    parent: Option<ScopeId>,
    kind: ScopeKind,
}

/// Arena of scopes plus the resolver state machine.
#[derive(Debug, Default)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
}

impl ScopeTree {
    pub fn new() -> Self {
        ScopeTree::default()
    }

    fn push(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.nodes.len() as u32);
        self.nodes.push(ScopeNode { parent, kind });
        id
    }

    pub fn new_top_scope(&mut self, code: CodeId) -> ScopeId {
        let mut fs = FunctionScope::new(code);
        fs.is_top = true;
        self.push(None, ScopeKind::Function(fs))
    }

    pub fn new_function_scope(&mut self, parent: ScopeId, code: CodeId, strict: bool) -> ScopeId {
        let mut fs = FunctionScope::new(code);
        fs.strict = strict;
        self.push(Some(parent), ScopeKind::Function(fs))
    }

    pub fn new_catch_scope(&mut self, parent: ScopeId, symbol: Symbol) -> ScopeId {
        self.push(Some(parent), ScopeKind::Catch { symbol })
    }

    pub fn new_with_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.push(Some(parent), ScopeKind::With)
    }

    fn function_mut(&mut self, id: ScopeId) -> &mut FunctionScope {
        match &mut self.nodes[id.0 as usize].kind {
            ScopeKind::Function(fs) => fs,
            _ => panic!("scope {:?} is not a function scope", id),
        }
    }

    fn function(&self, id: ScopeId) -> &FunctionScope {
        match &self.nodes[id.0 as usize].kind {
            ScopeKind::Function(fs) => fs,
            _ => panic!("scope {:?} is not a function scope", id),
        }
    }

    /// Declare a binding in `scope` before any reference to it is
    /// resolved (parameters, `var`s, function declarations).
    pub fn declare_param(&mut self, scope: ScopeId, symbol: Symbol) {
        let fs = self.function_mut(scope);
        fs.param_order.push(symbol);
        fs.variables.entry(symbol).or_insert_with(|| VarInfo::declared(false, true));
    }

    pub fn declare_var(&mut self, scope: ScopeId, symbol: Symbol) {
        let fs = self.function_mut(scope);
        fs.var_order.push(symbol);
        let entry = fs.variables.entry(symbol).or_insert_with(|| VarInfo::declared(false, false));
        // Re-declaring a `var` resets its refcount bookkeeping — later
        // sites still count, but a prior no-op declaration shouldn't
        // pin the slot if it ends up unreferenced.
        entry.refcount = 0;
    }

    pub fn declare_function(&mut self, scope: ScopeId, symbol: Symbol) {
        let fs = self.function_mut(scope);
        fs.fdecl_order.push(symbol);
        fs.variables.insert(symbol, VarInfo::declared(false, false));
    }

    pub fn declare_fexpr_self(&mut self, scope: ScopeId, symbol: Symbol) {
        let fs = self.function_mut(scope);
        fs.fexpr_self = Some(symbol);
        fs.variables.entry(symbol).or_insert_with(|| VarInfo::declared(true, false));
    }

    pub fn mark_creates_arguments(&mut self, scope: ScopeId) {
        self.function_mut(scope).creates_arguments_object = true;
    }

    pub fn mark_dynamic_target(&mut self, scope: ScopeId) {
        self.function_mut(scope).dynamic_target = true;
    }

    pub fn mark_upper_of_eval(&mut self, scope: ScopeId) {
        self.function_mut(scope).upper_of_eval = true;
    }

    pub fn mark_eval_top_scope(&mut self, scope: ScopeId) {
        let fs = self.function_mut(scope);
        fs.eval_top_scope = true;
    }
}

pub struct Resolver;

impl Resolver {
    /// Forward pass: resolve one variable reference at bytecode
    /// `offset` in `code`, starting the ascent at `scope`.
    pub fn lookup(tree: &mut ScopeTree, scope: ScopeId, symbol: Symbol, offset: usize, is_write: bool, from_strict: bool) {
        let mut ty = VarType::Stack;
        let mut cur = scope;
        let mut depth: u16 = 0;

        loop {
            match &tree.nodes[cur.0 as usize].kind {
                ScopeKind::With => {
                    ty = upgrade(ty, VarType::Lookup);
                    cur = tree.nodes[cur.0 as usize].parent.expect("with scope must have a parent");
                }
                ScopeKind::Catch { symbol: bound } if *bound == symbol => {
                    let fs = tree.function_mut(nearest_function(tree, cur));
                    fs.sites.push(Site { symbol, offset, ty_at_site: ty, depth, is_write, from_strict });
                    return;
                }
                ScopeKind::Catch { .. } => {
                    cur = tree.nodes[cur.0 as usize].parent.expect("catch scope must have a parent");
                }
                ScopeKind::Function(_) => {
                    let is_top = tree.function(cur).is_top;
                    let known = tree.function(cur).variables.contains_key(&symbol);

                    if known {
                        if is_top {
                            let eval_top = tree.function(cur).eval_top_scope;
                            let final_ty = upgrade(ty, if eval_top { VarType::Lookup } else { VarType::Global });
                            let fs = tree.function_mut(cur);
                            fs.variables.get_mut(&symbol).unwrap().refcount += 1;
                            fs.variables.get_mut(&symbol).unwrap().ty = upgrade(fs.variables[&symbol].ty, final_ty);
                            fs.sites.push(Site { symbol, offset, ty_at_site: ty, depth, is_write, from_strict });
                        } else {
                            let stored_upgrade = if matches!(ty, VarType::Lookup | VarType::Global) { VarType::Heap } else { ty };
                            let fs = tree.function_mut(cur);
                            let info = fs.variables.get_mut(&symbol).unwrap();
                            info.refcount += 1;
                            info.ty = upgrade(info.ty, stored_upgrade);
                            fs.sites.push(Site { symbol, offset, ty_at_site: ty, depth, is_write, from_strict });
                        }
                        return;
                    }

                    if is_top {
                        let eval_top = tree.function(cur).eval_top_scope;
                        let final_ty = upgrade(ty, if eval_top { VarType::Lookup } else { VarType::Global });
                        let fs = tree.function_mut(cur);
                        let mut info = VarInfo::declared(false, false);
                        info.refcount = 1;
                        info.ty = final_ty;
                        fs.variables.insert(symbol, info);
                        fs.var_order.push(symbol);
                        fs.sites.push(Site { symbol, offset, ty_at_site: ty, depth, is_write, from_strict });
                        return;
                    }

                    let dynamic = tree.function(cur).dynamic_target;
                    ty = upgrade(ty, if dynamic { VarType::Lookup } else { VarType::Heap });
                    depth += 1;
                    cur = tree.nodes[cur.0 as usize].parent.expect("non-top function scope must have a parent");
                }
            }
        }
    }

    /// Backward pass: close out `scope`, building its declaration
    /// table and patching every recorded site's bytecode.
    pub fn finalize(tree: &mut ScopeTree, code: &mut Code, scope: ScopeId) {
        let upper_of_eval = tree.function(scope).upper_of_eval;
        let creates_args = tree.function(scope).creates_arguments_object;
        let is_top = tree.function(scope).is_top;

        if creates_args {
            let fs = tree.function_mut(scope);
            let params = fs.param_order.clone();
            for p in params {
                if let Some(info) = fs.variables.get_mut(&p) {
                    info.ty = upgrade(info.ty, VarType::Heap);
                }
            }
        }

        if !upper_of_eval && !is_top {
            let fs = tree.function_mut(scope);
            let mut next_local = code.local_count;
            let mut names: Vec<Symbol> = fs.variables.keys().copied().collect();
            names.sort_by_key(|s| format!("{s:?}"));
            for sym in names {
                let info = fs.variables.get_mut(&sym).unwrap();
                if info.ty == VarType::Stack && info.refcount > 0 {
                    info.local_index = Some(next_local);
                    next_local += 1;
                }
            }
            code.local_count = next_local;
        }

        // Heap offsets for anything not resolved to the register stack.
        {
            let fs = tree.function_mut(scope);
            let mut next_heap = 0u16;
            let mut assign = |sym: Symbol, fs: &mut FunctionScope, next_heap: &mut u16| {
                if let Some(info) = fs.variables.get_mut(&sym) {
                    if info.local_index.is_none() {
                        info.heap_offset = Some(*next_heap);
                        *next_heap += 1;
                    }
                }
            };
            let params = fs.param_order.clone();
            let fdecls = fs.fdecl_order.clone();
            let vars = fs.var_order.clone();
            let fexpr = fs.fexpr_self;
            let has_args = fs.has_arguments_ref || fs.creates_arguments_object;

            for p in &params { assign(*p, fs, &mut next_heap); }
            for f in &fdecls { assign(*f, fs, &mut next_heap); }
            if has_args && !fs.variables.contains_key(&crate::symbol::intern("arguments")) {
                // "arguments" itself is represented structurally, not as
                // a plain declared variable; its own offset is assigned
                // directly below without going through `variables`.
            }
            for v in &vars { assign(*v, fs, &mut next_heap); }
            if let Some(sym) = fexpr { assign(sym, fs, &mut next_heap); }

            code.heap_count = code.heap_count.max(next_heap);
            code.has_declarative_env = next_heap > 0;
        }

        // Declaration table, in construction order.
        {
            let fs = tree.function(scope);
            let mut decls = Vec::new();
            for p in &fs.param_order {
                let info = &fs.variables[p];
                decls.push(match info.local_index {
                    Some(idx) => Decl::ParamLocal { symbol: *p, local_index: idx },
                    None => Decl::Param { symbol: *p, heap_offset: info.heap_offset.unwrap_or(0) },
                });
            }
            for f in &fs.fdecl_order {
                let info = &fs.variables[f];
                decls.push(Decl::FunctionDecl { symbol: *f, heap_offset: info.heap_offset.unwrap_or(0) });
            }
            if fs.creates_arguments_object {
                decls.push(Decl::Arguments { heap_offset: 0 });
            }
            for v in &fs.var_order {
                if let Some(info) = fs.variables.get(v) {
                    decls.push(match info.local_index {
                        Some(idx) if fs.param_order.contains(v) || fs.fdecl_order.contains(v) => {
                            Decl::ParamLocal { symbol: *v, local_index: idx }
                        }
                        Some(idx) => Decl::ArgumentsLocal { local_index: idx },
                        None => Decl::Var { symbol: *v, heap_offset: info.heap_offset.unwrap_or(0) },
                    });
                }
            }
            if let Some(sym) = fs.fexpr_self {
                let info = &fs.variables[&sym];
                decls.push(match info.local_index {
                    Some(idx) => Decl::FunctionExprLocal { symbol: sym, local_index: idx },
                    None => Decl::FunctionExpr { symbol: sym, heap_offset: info.heap_offset.unwrap_or(0) },
                });
            }
            code.decls = decls;
        }

        // Patch every recorded site.
        let sites = tree.function(scope).sites.clone();
        for site in sites {
            let info = &tree.function(scope).variables[&site.symbol];
            let final_ty = upgrade(info.ty, site.ty_at_site);
            let patched = match final_ty {
                VarType::Stack => {
                    let idx = info.local_index.expect("STACK site must have a local index");
                    if info.immutable && site.from_strict && site.is_write {
                        Op::SetLocalImmutable(idx)
                    } else if site.is_write {
                        Op::SetLocal(idx)
                    } else {
                        Op::GetLocal(idx)
                    }
                }
                VarType::Global => {
                    if site.is_write { Op::SetGlobal(site.symbol) } else { Op::GetGlobal(site.symbol) }
                }
                VarType::Heap => {
                    let offset = info.heap_offset.unwrap_or(0);
                    if site.is_write {
                        Op::SetHeap { depth: site.depth, offset }
                    } else {
                        Op::GetHeap { depth: site.depth, offset }
                    }
                }
                VarType::Lookup => {
                    if site.is_write { Op::SetLookup(site.symbol) } else { Op::GetLookup(site.symbol) }
                }
            };
            code.patch(site.offset, patched);
        }
    }
}

fn nearest_function(tree: &ScopeTree, mut id: ScopeId) -> ScopeId {
    loop {
        if matches!(tree.nodes[id.0 as usize].kind, ScopeKind::Function(_)) {
            return id;
        }
        id = tree.nodes[id.0 as usize].parent.expect("scope chain must terminate at a function/top scope");
    }
}

impl Clone for Site {
    fn clone(&self) -> Self {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    fn setup() -> (ScopeTree, CodeId, Code) {
        (ScopeTree::new(), CodeId(0), Code::new())
    }

    #[test]
    fn simple_local_resolves_to_stack() {
        let (mut tree, code_id, mut code) = setup();
        let top = tree.new_top_scope(code_id);
        let func = tree.new_function_scope(top, code_id, false);
        let x = intern("x_local_test");
        tree.declare_var(func, x);
        let site = code.emit(Op::GetVar(x));
        Resolver::lookup(&mut tree, func, x, site, false, false);
        Resolver::finalize(&mut tree, &mut code, func);
        assert!(matches!(code.ops[site], Op::GetLocal(_)));
    }

    #[test]
    fn unknown_name_at_top_becomes_global() {
        let (mut tree, code_id, mut code) = setup();
        let top = tree.new_top_scope(code_id);
        let g = intern("g_global_test");
        let site = code.emit(Op::GetVar(g));
        Resolver::lookup(&mut tree, top, g, site, false, false);
        Resolver::finalize(&mut tree, &mut code, top);
        assert!(matches!(code.ops[site], Op::GetGlobal(_)));
    }

    #[test]
    fn with_scope_forces_lookup() {
        let (mut tree, code_id, mut code) = setup();
        let top = tree.new_top_scope(code_id);
        let func = tree.new_function_scope(top, code_id, false);
        let w = tree.new_with_scope(func);
        let v = intern("v_with_test");
        tree.declare_var(func, v);
        let site = code.emit(Op::GetVar(v));
        Resolver::lookup(&mut tree, w, v, site, false, false);
        Resolver::finalize(&mut tree, &mut code, func);
        assert!(matches!(code.ops[site], Op::GetLookup(_)));
    }

    #[test]
    fn non_strict_eval_scope_upgrades_to_lookup() {
        let (mut tree, code_id, mut code) = setup();
        let top = tree.new_top_scope(code_id);
        let outer = tree.new_function_scope(top, code_id, false);
        tree.mark_dynamic_target(outer);
        let inner = tree.new_function_scope(outer, code_id, false);
        let v = intern("v_eval_test");
        tree.declare_var(outer, v);
        let site = code.emit(Op::GetVar(v));
        Resolver::lookup(&mut tree, inner, v, site, false, false);
        Resolver::finalize(&mut tree, &mut code, outer);
        assert!(matches!(code.ops[site], Op::GetLookup(_)));
    }

    #[test]
    fn unreferenced_var_gets_no_decl_entry() {
        let (mut tree, code_id, mut code) = setup();
        let top = tree.new_top_scope(code_id);
        let func = tree.new_function_scope(top, code_id, false);
        let dead = intern("dead_var_test");
        tree.declare_var(func, dead);
        Resolver::finalize(&mut tree, &mut code, func);
        assert!(code.decls.iter().all(|d| !matches!(d,
            Decl::Var { symbol, .. } if *symbol == dead)));
    }

    #[test]
    fn monotonicity_never_downgrades() {
        let (mut tree, code_id, mut code) = setup();
        let top = tree.new_top_scope(code_id);
        let func = tree.new_function_scope(top, code_id, false);
        let w = tree.new_with_scope(func);
        let v = intern("v_mono_test");
        tree.declare_var(func, v);
        let site_in_with = code.emit(Op::GetVar(v));
        let site_direct = code.emit(Op::GetVar(v));
        Resolver::lookup(&mut tree, w, v, site_in_with, false, false);
        Resolver::lookup(&mut tree, func, v, site_direct, false, false);
        Resolver::finalize(&mut tree, &mut code, func);
        // the with-site forces LOOKUP; per the function-scope upgrade
        // rule the variable's own stored type only rises to HEAP (not
        // LOOKUP — that's reserved for sites that cross a With/Catch
        // themselves), so the direct site, which never crosses the
        // With, ends up at HEAP rather than STACK. Monotonicity still
        // holds: it never falls back down to STACK.
        assert!(matches!(code.ops[site_in_with], Op::GetLookup(_)));
        assert!(matches!(code.ops[site_direct], Op::GetHeap { .. }));
    }
}
