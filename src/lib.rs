/// aero — hidden-class map engine, lexical scope resolver, and
/// backtracking/JIT regexp matcher, plus the ambient plumbing
/// (config, errors, diagnostics) a standalone build of these three
/// subsystems needs.

pub mod bytecode;
pub mod conf;
pub mod diagnostics;
pub mod errors;
pub mod gc;
pub mod inline_cache;
pub mod map;
pub mod regex;
pub mod scope;
pub mod symbol;
pub mod vm_state;

pub use bytecode::{Code, Decl, Op};
pub use conf::Conf;
pub use inline_cache::{BinopIc, CallIc, IcTable, PropIc, TypeFeedback};
pub use map::{Attributes, MapArena, MapId};
pub use regex::{Flags, Match, Regex};
pub use scope::{Resolver, ScopeTree, VarType};
