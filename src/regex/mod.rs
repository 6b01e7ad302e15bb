/// RegExp Match Engine
///
/// Public entry point: compile a pattern once, then run it against
/// any number of subjects. Execution prefers the JIT-compiled
/// specialization when one exists for the host architecture and the
/// program's opcode mix; otherwise it falls back to the portable
/// backtracking interpreter. Both paths are required to agree on
/// every observable outcome (§4.3.6).

pub mod compile;
pub mod interp;
pub mod opcode;

#[cfg(target_arch = "x86_64")]
pub mod jit;

use std::cell::RefCell;

pub use compile::{CompileError, Flags};

use interp::{chars_to_code_units, Interpreter, MatchResult};
use opcode::Program;

use crate::vm_state::VmState;

pub struct Regex {
    program: Program,
    #[cfg(target_arch = "x86_64")]
    jit: Option<jit::Executable>,
    #[cfg(target_arch = "x86_64")]
    vm_state: RefCell<VmState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Option<(usize, usize)>>,
}

impl Regex {
    pub fn compile(pattern: &str, flags: Flags) -> Result<Regex, CompileError> {
        let program = compile::compile(pattern, flags)?;
        #[cfg(target_arch = "x86_64")]
        let jit = if std::env::var_os("AERO_NO_JIT").is_none() {
            jit::jit_compile(&program)
        } else {
            None
        };

        #[cfg(target_arch = "x86_64")]
        let vm_state = RefCell::new(VmState::new(program.frame_cells()));

        Ok(Regex {
            program,
            #[cfg(target_arch = "x86_64")]
            jit,
            #[cfg(target_arch = "x86_64")]
            vm_state,
        })
    }

    pub fn is_jit_compiled(&self) -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            self.jit.is_some()
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            false
        }
    }

    pub fn exec(&self, subject: &str, start: usize) -> Option<Match> {
        let units = chars_to_code_units(subject);

        #[cfg(target_arch = "x86_64")]
        if let Some(exe) = &self.jit {
            let mut state = self.vm_state.borrow_mut();
            let (result, caps) = exe.exec(&units, start, &mut state);
            return Self::to_match(result, &caps);
        }

        let interp = Interpreter::new(&self.program, &units);
        let (result, caps) = interp.exec(start);
        Self::to_match(result, &caps)
    }

    fn to_match(result: MatchResult, caps: &[i32]) -> Option<Match> {
        if result != MatchResult::Success {
            return None;
        }
        let start = caps[0] as usize;
        let end = caps[1] as usize;
        let captures = caps[2..]
            .chunks(2)
            .map(|pair| {
                if pair[1] == opcode::UNDEFINED {
                    None
                } else {
                    Some((pair[0] as usize, pair[1] as usize))
                }
            })
            .collect();
        Some(Match { start, end, captures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreter_and_jit_agree_on_a_literal_pattern() {
        let re = Regex::compile("abc", Flags::default()).unwrap();
        let m = re.exec("xxabcyy", 0).unwrap();
        assert_eq!((m.start, m.end), (2, 5));
    }

    #[test]
    fn capture_groups_are_exposed_by_range() {
        let re = Regex::compile("(a)(b)", Flags::default()).unwrap();
        let m = re.exec("ab", 0).unwrap();
        assert_eq!(m.captures[0], Some((0, 1)));
        assert_eq!(m.captures[1], Some((1, 2)));
    }

    #[test]
    fn no_match_returns_none() {
        let re = Regex::compile("zzz", Flags::default()).unwrap();
        assert!(re.exec("abc", 0).is_none());
    }
}
