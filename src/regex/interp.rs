/// Backtracking interpreter
///
/// A stack-based virtual machine executing `Program` directly; the
/// reference implementation every JIT-compiled specialization must
/// agree with bit-for-bit on return code and captures.

use super::opcode::{CharWidth, Filter, Op, Program, UNDEFINED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Success,
    Failure,
    Error,
}

/// One subject character abstracted over 1-byte/2-byte hosts.
fn char_at(subject: &[u32], cp: usize) -> Option<u32> {
    subject.get(cp).copied()
}

fn is_word_char(c: Option<u32>) -> bool {
    matches!(c, Some(c) if (c as u8 as char).is_ascii_alphanumeric() || c == b'_' as u32)
        && matches!(c, Some(c) if c < 128)
}

fn is_line_terminator(c: u32) -> bool {
    matches!(c, 0x0A | 0x0D | 0x2028 | 0x2029)
}

struct Frame {
    cells: Vec<i32>,
}

pub struct Interpreter<'a> {
    program: &'a Program,
    subject: &'a [u32],
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program, subject: &'a [u32]) -> Self {
        Interpreter { program, subject }
    }

    /// Try the program at every start position from `from` onward,
    /// honoring the quick-check prefilter (§4.3.5).
    pub fn exec(&self, from: usize) -> (MatchResult, Vec<i32>) {
        let size = self.subject.len();
        if let Some(filter) = self.program.filter {
            if self.program.char_width == CharWidth::OneByte {
                let has_wide_bits = match filter {
                    Filter::OneChar(c) => c >= 256,
                    Filter::Bitmask(m) => m >= 256,
                };
                if has_wide_bits {
                    return (MatchResult::Failure, Vec::new());
                }
            }
        }

        let mut start = from;
        loop {
            if start > size {
                return (MatchResult::Failure, Vec::new());
            }
            if let Some(filter) = self.program.filter {
                if start < size {
                    let c = self.subject[start];
                    let passes = match filter {
                        Filter::OneChar(want) => c == want as u32,
                        Filter::Bitmask(mask) => (c as u32 & mask as u32) == c,
                    };
                    if !passes {
                        start += 1;
                        continue;
                    }
                } else {
                    start += 1;
                    continue;
                }
            }

            match self.run_once(start) {
                (MatchResult::Success, caps) => return (MatchResult::Success, caps),
                (MatchResult::Error, _) => return (MatchResult::Error, Vec::new()),
                (MatchResult::Failure, _) => start += 1,
            }
        }
    }

    fn run_once(&self, start: usize) -> (MatchResult, Vec<i32>) {
        let ncells = self.program.frame_cells();
        let mut cells = vec![UNDEFINED; ncells - 1];
        let mut backtrack: Vec<Frame> = Vec::new();
        let mut cp = start;
        let mut pc = 0usize;
        let size = self.subject.len();

        loop {
            let op = match self.program.ops.get(pc) {
                Some(op) => op,
                None => return (MatchResult::Error, Vec::new()),
            };

            let outcome = self.step(op, &mut cp, &mut pc, &mut cells, size);
            match outcome {
                StepResult::Continue => {}
                StepResult::PushBacktrack(target) => {
                    // Cell index 1 (the END slot of capture group 0,
                    // which opcodes never address directly) doubles as
                    // the saved-cp scratch slot for this frame.
                    let mut frame_cells = cells.clone();
                    frame_cells[1] = cp as i32;
                    frame_cells.push(target as i32);
                    backtrack.push(Frame { cells: frame_cells });
                    pc += 1;
                }
                StepResult::Backtrack => {
                    match backtrack.pop() {
                        None => return (MatchResult::Failure, Vec::new()),
                        Some(frame) => {
                            let target = *frame.cells.last().unwrap();
                            cells = frame.cells[..frame.cells.len() - 1].to_vec();
                            cp = cells[1].max(0) as usize;
                            pc = target as usize;
                        }
                    }
                }
                StepResult::Success => {
                    let mut out = vec![UNDEFINED; self.program.num_captures as usize * 2 + 2];
                    out[0] = start as i32;
                    out[1] = cp as i32;
                    for g in 1..=self.program.num_captures as usize {
                        out[g * 2] = cells[g * 2];
                        out[g * 2 + 1] = cells[g * 2 + 1];
                    }
                    return (MatchResult::Success, out);
                }
                StepResult::Failure => return (MatchResult::Failure, Vec::new()),
                StepResult::Error => return (MatchResult::Error, Vec::new()),
            }
        }
    }

    fn step(&self, op: &Op, cp: &mut usize, pc: &mut usize, cells: &mut Vec<i32>, size: usize) -> StepResult {
        match op {
            Op::CheckChar(c) => {
                if *cp < size && self.subject[*cp] == *c as u32 {
                    *cp += 1;
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::CheckCharOr2(a, b) => {
                if *cp < size && (self.subject[*cp] == *a as u32 || self.subject[*cp] == *b as u32) {
                    *cp += 1;
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::CheckCharOr3(a, b, c) => {
                if *cp < size
                    && (self.subject[*cp] == *a as u32 || self.subject[*cp] == *b as u32 || self.subject[*cp] == *c as u32)
                {
                    *cp += 1;
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::CheckRange(ranges) => {
                if *cp < size && in_ranges(ranges, self.subject[*cp]) {
                    *cp += 1;
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::CheckRangeInverted(ranges) => {
                // An empty payload falls through to success rather than
                // unconditionally inverting — "no ranges" never rejects.
                if *cp < size && (ranges.is_empty() || !in_ranges(ranges, self.subject[*cp])) {
                    *cp += 1;
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::AssertionBol => {
                if *cp == 0 || is_line_terminator(self.subject[*cp - 1]) {
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::AssertionEol => {
                if *cp == size || is_line_terminator(self.subject[*cp]) {
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::AssertionBob => {
                if *cp == 0 {
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::AssertionEob => {
                if *cp == size {
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::AssertionWordBoundary | Op::AssertionWordBoundaryInverted => {
                let left = if *cp > 0 && *cp <= size { Some(self.subject[*cp - 1]) } else { None };
                let right = if *cp < size { Some(self.subject[*cp]) } else { None };
                let boundary = is_word_char(left) != is_word_char(right);
                let wants_boundary = matches!(op, Op::AssertionWordBoundary);
                if boundary == wants_boundary {
                    *pc += 1;
                    StepResult::Continue
                } else {
                    StepResult::Backtrack
                }
            }
            Op::StartCapture(g) => {
                cells[*g as usize * 2] = *cp as i32;
                cells[*g as usize * 2 + 1] = UNDEFINED;
                *pc += 1;
                StepResult::Continue
            }
            Op::EndCapture(g) => {
                cells[*g as usize * 2 + 1] = *cp as i32;
                *pc += 1;
                StepResult::Continue
            }
            Op::ClearCaptures { from, to } => {
                for g in *from..*to {
                    cells[g as usize * 2] = UNDEFINED;
                    cells[g as usize * 2 + 1] = UNDEFINED;
                }
                *pc += 1;
                StepResult::Continue
            }
            Op::CounterZero(k) => {
                let idx = self.counter_cell(*k);
                cells[idx] = 0;
                *pc += 1;
                StepResult::Continue
            }
            Op::CounterNext { counter, max, target } => {
                let idx = self.counter_cell(*counter);
                cells[idx] += 1;
                if (cells[idx] as u32) < *max {
                    *pc = *target;
                } else {
                    *pc += 1;
                }
                StepResult::Continue
            }
            Op::StoreSp(k) => {
                let idx = self.reserved_cell(*k);
                cells[idx] = *pc as i32;
                *pc += 1;
                StepResult::Continue
            }
            Op::StorePosition(k) => {
                let idx = self.reserved_cell(*k);
                cells[idx] = *cp as i32;
                *pc += 1;
                StepResult::Continue
            }
            Op::PositionTest(k) => {
                let idx = self.reserved_cell(*k);
                if cells[idx] == *cp as i32 {
                    StepResult::Backtrack
                } else {
                    *pc += 1;
                    StepResult::Continue
                }
            }
            Op::AssertionSuccess { slot, target } => {
                let idx = self.reserved_cell(*slot);
                *pc = *target;
                let _ = idx;
                StepResult::Continue
            }
            Op::AssertionFailure(_slot) => StepResult::Backtrack,
            Op::BackReference(g) => self.back_reference(*g, cp, pc, cells, size, false),
            Op::BackReferenceIgnoreCase(g) => self.back_reference(*g, cp, pc, cells, size, true),
            Op::PushBacktrack(target) => StepResult::PushBacktrack(*target),
            Op::Jump(target) => {
                *pc = *target;
                StepResult::Continue
            }
            Op::Failure => StepResult::Failure,
            Op::Success => StepResult::Success,
        }
    }

    fn counter_cell(&self, k: u16) -> usize {
        self.program.counters_base() + k as usize
    }

    fn reserved_cell(&self, k: u16) -> usize {
        self.program.counters_base() + self.program.num_counters as usize + k as usize
    }

    fn back_reference(&self, g: u16, cp: &mut usize, pc: &mut usize, cells: &mut [i32], size: usize, ignore_case: bool) -> StepResult {
        let start = cells[g as usize * 2];
        let end = cells[g as usize * 2 + 1];
        if end == UNDEFINED {
            *pc += 1;
            return StepResult::Continue;
        }
        let (start, end) = (start as usize, end as usize);
        let len = end - start;
        if size - *cp < len {
            return StepResult::Backtrack;
        }
        for i in 0..len {
            let a = self.subject[start + i];
            let b = self.subject[*cp + i];
            let equal = if ignore_case { fold_eq(a, b) } else { a == b };
            if !equal {
                return StepResult::Backtrack;
            }
        }
        *cp += len;
        *pc += 1;
        StepResult::Continue
    }
}

fn fold_eq(a: u32, b: u32) -> bool {
    if a == b {
        return true;
    }
    if a < 128 && b < 128 {
        return (a as u8 as char).to_ascii_lowercase() == (b as u8 as char).to_ascii_lowercase();
    }
    false
}

fn in_ranges(ranges: &[(u32, u32)], c: u32) -> bool {
    ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi)
}

enum StepResult {
    Continue,
    PushBacktrack(usize),
    Backtrack,
    Success,
    Failure,
    Error,
}

pub fn chars_to_code_units(subject: &str) -> Vec<u32> {
    subject.chars().map(|c| c as u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regex::compile::{compile, Flags};

    fn run(pattern: &str, flags: Flags, subject: &str) -> (MatchResult, Vec<i32>) {
        let program = compile(pattern, flags).unwrap();
        let units = chars_to_code_units(subject);
        Interpreter::new(&program, &units).exec(0)
    }

    #[test]
    fn literal_concat_matches() {
        let (res, caps) = run("abc", Flags::default(), "xxabcyy");
        assert_eq!(res, MatchResult::Success);
        assert_eq!((caps[0], caps[1]), (2, 5));
    }

    #[test]
    fn alternation_picks_first_matching_branch() {
        let (res, _) = run("cat|dog", Flags::default(), "a dog ran");
        assert_eq!(res, MatchResult::Success);
    }

    #[test]
    fn character_class_matches_digits() {
        let (res, caps) = run(r"[0-9]+", Flags::default(), "ab123cd");
        assert_eq!(res, MatchResult::Success);
        assert_eq!((caps[0], caps[1]), (2, 5));
    }

    #[test]
    fn counted_repetition_respects_bound() {
        let (res, caps) = run("a{2,3}", Flags::default(), "aaaa");
        assert_eq!(res, MatchResult::Success);
        assert_eq!(caps[1] - caps[0], 3);
    }

    #[test]
    fn backreference_requires_exact_repeat() {
        let (res, _) = run(r"(ab)\1", Flags::default(), "abab");
        assert_eq!(res, MatchResult::Success);
        let (res2, _) = run(r"(ab)\1", Flags::default(), "abac");
        assert_eq!(res2, MatchResult::Failure);
    }

    #[test]
    fn backreference_ignore_case_folds() {
        let (res, _) = run(r"(ab)\1", Flags { ignore_case: true, ..Default::default() }, "abAB");
        assert_eq!(res, MatchResult::Success);
    }

    #[test]
    fn word_boundary_anchors_whole_word() {
        let (res, _) = run(r"\bcat\b", Flags::default(), "a cat ran");
        assert_eq!(res, MatchResult::Success);
        let (res2, _) = run(r"\bcat\b", Flags::default(), "concatenate");
        assert_eq!(res2, MatchResult::Failure);
    }

    #[test]
    fn quick_check_one_char_filter_skips_non_matching_starts() {
        let program = compile("zzz", Flags::default()).unwrap();
        assert_eq!(program.filter, Some(super::Filter::OneChar('z' as u16)));
        let units = chars_to_code_units("aaazzzbbb");
        let (res, caps) = Interpreter::new(&program, &units).exec(0);
        assert_eq!(res, MatchResult::Success);
        assert_eq!((caps[0], caps[1]), (3, 6));
    }

    #[test]
    fn zero_width_star_loop_terminates() {
        let (res, _) = run("(a*)*", Flags::default(), "b");
        assert_eq!(res, MatchResult::Success);
    }
}
