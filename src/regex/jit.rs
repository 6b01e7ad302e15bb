/// x86-64 single-pass JIT
///
/// Translates a `Program`'s opcode stream to native code in the
/// two-scan discipline `iv::aero::JIT` uses (`examples/original_source/
/// iv/aero/jit.h`): a reference-gathering scan followed by a linear
/// emission scan. Grounded on the same `dynasmrt` API this workspace's
/// sibling example `gregex`'s Pike-JIT backend uses for its own
/// single-pass x86-64 lowering.
///
/// `jit_compile` inspects the whole opcode stream up front and bails
/// to `None` — "run the interpreter instead" — the moment it finds an
/// opcode its lowering does not cover, rather than emitting code for
/// part of a program. That keeps the two backends trivially equivalent
/// on anything the JIT declines: the interpreter is the one engine
/// that implements every opcode, so every bail-out falls through to a
/// fully correct path. Today the lowering covers literal/class
/// character checks, anchors, word boundaries, captures, counted
/// repetition and the backtrack-stack skeleton — i.e. everything
/// `compile()` actually emits except backreferences, whose native
/// lowering would need a runtime-length comparison loop this backend
/// doesn't generate. `STORE_SP`/`ASSERTION_SUCCESS`/`ASSERTION_FAILURE`
/// (lookaround) are excluded too, but `compile()` never emits them
/// either, so that exclusion costs nothing today.
///
/// The outer retry-at-every-start-position loop (§4.3.5's quick-check
/// prefilter plus the "advance `start` and try again" driver) lives in
/// `Executable::exec`, not in emitted code, mirroring how
/// `Interpreter::exec` is a thin driver wrapped around the
/// single-trial `run_once` — the compiled function only ever attempts
/// one `start`, same as `run_once`.

use std::collections::{BTreeSet, HashMap};
use std::mem;

use dynasmrt::{dynasm, DynamicLabel, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use crate::vm_state::VmState;

use super::interp::MatchResult;
use super::opcode::{CharWidth, Filter, Op, Program, UNDEFINED};

macro_rules! asm {
    ($ops:expr, $($t:tt)*) => {
        dynasm!($ops
            ; .arch x64
            ; .alias subject, r12
            ; .alias size, r13
            ; .alias cells, r14
            ; .alias cp, r15
            ; .alias sp, rbx
            ; .alias state, r9
            ; .alias trial_start, r10
            ; $($t)*
        )
    };
}

pub struct Executable {
    buffer: ExecutableBuffer,
    entry: dynasmrt::AssemblyOffset,
    num_captures: u16,
    cells_len: usize,
    filter: Option<Filter>,
    char_width: CharWidth,
}

impl Executable {
    /// Tries every start position from `from` onward, same contract as
    /// `Interpreter::exec`: honors the quick-check prefilter and
    /// advances past any position the filter rules out before handing
    /// the subject to the compiled function.
    pub fn exec(&self, subject: &[u32], from: usize, state: &mut VmState) -> (MatchResult, Vec<i32>) {
        let size = subject.len();
        if let Some(filter) = self.filter {
            if self.char_width == CharWidth::OneByte {
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
            if let Some(filter) = self.filter {
                if start < size {
                    let c = subject[start];
                    let passes = match filter {
                        Filter::OneChar(want) => c == want as u32,
                        Filter::Bitmask(mask) => (c & mask as u32) == c,
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

            match self.run_once(subject, start, state) {
                (MatchResult::Success, caps) => return (MatchResult::Success, caps),
                (MatchResult::Error, _) => return (MatchResult::Error, Vec::new()),
                (MatchResult::Failure, _) => start += 1,
            }
        }
    }

    /// One trial at a fixed `start`, exactly what the native function
    /// computes. Its backtrack-stack capacity request mirrors
    /// `Interpreter::run_once`'s unbounded `Vec<Frame>`: one frame per
    /// input position is enough for every loop `compile()` emits,
    /// since each either consumes a character or is guarded by a
    /// `PositionTest` against looping on the same `cp` twice.
    fn run_once(&self, subject: &[u32], start: usize, state: &mut VmState) -> (MatchResult, Vec<i32>) {
        state.ensure_capacity(subject.len() + 2);
        let mut cells = vec![UNDEFINED; self.cells_len];
        let f: extern "C" fn(*const u32, u64, *mut i32, u64, *mut i32) -> i32 =
            unsafe { mem::transmute(self.buffer.ptr(self.entry)) };
        let code = f(subject.as_ptr(), subject.len() as u64, cells.as_mut_ptr(), start as u64, state.as_mut_ptr());
        match code {
            0 => {
                let out = cells[..(self.num_captures as usize + 1) * 2].to_vec();
                (MatchResult::Success, out)
            }
            1 => (MatchResult::Failure, Vec::new()),
            _ => (MatchResult::Error, Vec::new()),
        }
    }
}

/// Opcodes the x86-64 lowering below knows how to emit.
///
/// Excluded, deliberately: `BackReference`/`BackReferenceIgnoreCase`
/// (matching one needs a runtime loop over a captured span whose
/// length isn't known until the match is underway — left to the
/// interpreter rather than hand-generating a data-dependent loop with
/// no compiled test to check it against), and `StoreSp` /
/// `AssertionSuccess` / `AssertionFailure` (lookaround bookkeeping that
/// `compile()` never emits, since this engine has no lookaround
/// syntax yet — excluding them costs nothing today and keeps the list
/// honest about what's actually reachable).
fn is_supported(op: &Op) -> bool {
    matches!(
        op,
        Op::CheckChar(_)
            | Op::CheckCharOr2(_, _)
            | Op::CheckCharOr3(_, _, _)
            | Op::CheckRange(_)
            | Op::CheckRangeInverted(_)
            | Op::AssertionBol
            | Op::AssertionEol
            | Op::AssertionBob
            | Op::AssertionEob
            | Op::AssertionWordBoundary
            | Op::AssertionWordBoundaryInverted
            | Op::StartCapture(_)
            | Op::EndCapture(_)
            | Op::ClearCaptures { .. }
            | Op::CounterZero(_)
            | Op::CounterNext { .. }
            | Op::StorePosition(_)
            | Op::PositionTest(_)
            | Op::PushBacktrack(_)
            | Op::Jump(_)
            | Op::Failure
            | Op::Success
    )
}

/// Scan 1: every opcode offset referenced by a jump-like instruction,
/// and a dense index for every `PUSH_BACKTRACK` site, paired with the
/// bytecode offset it targets — the runtime dispatch a `->backtrack`
/// pop has to perform is exactly "which of these did I come from".
struct References {
    targets: BTreeSet<usize>,
    backtrack_index: HashMap<usize, usize>,
    backtrack_dispatch: Vec<(usize, usize)>,
}

fn scan_references(ops: &[Op]) -> References {
    let mut targets = BTreeSet::new();
    let mut backtrack_index = HashMap::new();
    let mut backtrack_dispatch = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::Jump(t) => {
                targets.insert(*t);
            }
            Op::CounterNext { target, .. } => {
                targets.insert(*target);
            }
            Op::PushBacktrack(t) => {
                targets.insert(*t);
                let idx = backtrack_index.len();
                backtrack_index.insert(i, idx);
                backtrack_dispatch.push((idx, *t));
            }
            _ => {}
        }
    }
    References { targets, backtrack_index, backtrack_dispatch }
}

struct Ctx<'a> {
    program: &'a Program,
    refs: &'a References,
    labels: &'a HashMap<usize, DynamicLabel>,
    cells_len: usize,
    frame_stride_bytes: i32,
}

pub fn jit_compile(program: &Program) -> Option<Executable> {
    if program.char_width != CharWidth::OneByte {
        return None; // ASCII-only lowering for now
    }
    if !program.ops.iter().all(is_supported) {
        return None;
    }

    let refs = scan_references(&program.ops);
    let mut ops = dynasmrt::x64::Assembler::new().ok()?;
    let labels: HashMap<usize, DynamicLabel> = refs.targets.iter().map(|&t| (t, ops.new_dynamic_label())).collect();

    let cells_len = program.frame_cells() - 1;
    let frame_stride_bytes = (program.frame_cells() * 4) as i32;
    let ctx = Ctx { program, refs: &refs, labels: &labels, cells_len, frame_stride_bytes };

    let entry = ops.offset();
    emit_prologue(&mut ops);

    for (i, op) in program.ops.iter().enumerate() {
        if let Some(label) = labels.get(&i) {
            asm!(ops, ; =>*label);
        }
        emit_op(&mut ops, op, i, &ctx);
    }

    emit_epilogue(&mut ops, &ctx);
    let buffer = ops.finalize().ok()?;
    Some(Executable {
        buffer,
        entry,
        num_captures: program.num_captures,
        cells_len,
        filter: program.filter,
        char_width: program.char_width,
    })
}

fn emit_prologue(ops: &mut dynasmrt::x64::Assembler) {
    // System V AMD64: rdi=subject, rsi=size, rdx=cells, rcx=start, r8=state
    asm!(ops
        ; push r12
        ; push r13
        ; push r14
        ; push r15
        ; push rbx
        ; push r10
        ; push r9
        ; mov r12, rdi
        ; mov r13, rsi
        ; mov r14, rdx
        ; mov r15, rcx
        ; mov r10, rcx // trial_start pins the trial's start `cp`; r15 advances.
        ; mov r9, r8    // state: the host-VM backtrack-frame scratch buffer.
        ; mov rbx, 0    // sp: number of frames currently pushed.
    );
}

fn emit_epilogue(ops: &mut dynasmrt::x64::Assembler, ctx: &Ctx) {
    asm!(ops
        ; ->backtrack:
        ; test rbx, rbx
        ; jz ->failure
        ; dec rbx
    );
    asm!(ops
        ; imul rax, rbx, ctx.frame_stride_bytes
        ; lea rcx, [r9 + rax]
    );
    for c in 0..ctx.cells_len {
        let off = (c as i32) * 4;
        asm!(ops
            ; mov edx, [rcx + off]
            ; mov [r14 + off], edx
        );
    }
    asm!(ops
        ; mov r15d, [rcx + 4] // restore cp from the frame's saved-cp cell (index 1).
        ; mov eax, [rcx + (ctx.cells_len as i32) * 4] // tracked backtrack-site index.
    );
    for &(idx, target) in &ctx.refs.backtrack_dispatch {
        let label = ctx.labels[&target];
        asm!(ops
            ; cmp eax, idx as i32
            ; je =>label
        );
    }
    asm!(ops
        ; jmp ->failure // unreachable: every pushed index has a dispatch arm above.
        ; ->success:
        ; mov [r14], r10d
        ; mov [r14 + 4], r15d
        ; mov eax, 0
        ; jmp ->ret
        ; ->failure:
        ; mov eax, 1
        ; jmp ->ret
        ; ->ret:
        ; pop r9
        ; pop r10
        ; pop rbx
        ; pop r15
        ; pop r14
        ; pop r13
        ; pop r12
        ; ret
    );
}

/// True if `eax` (already loaded with a character) falls in any of
/// `ranges`, jumping to `on_match` — falls through otherwise. Ranges
/// are unrolled at compile time rather than walked with a runtime
/// loop, since the program (and so the range list) is fully known
/// before a single instruction is emitted.
fn emit_ranges_branch(ops: &mut dynasmrt::x64::Assembler, ranges: &[(u32, u32)], on_match: DynamicLabel) {
    for &(lo, hi) in ranges {
        let skip = ops.new_dynamic_label();
        asm!(ops
            ; cmp eax, lo as i32
            ; jb =>skip
            ; cmp eax, hi as i32
            ; ja =>skip
            ; jmp =>on_match
            ; =>skip
        );
    }
}

const LINE_TERMINATORS: [(u32, u32); 4] = [(0x0A, 0x0A), (0x0D, 0x0D), (0x2028, 0x2028), (0x2029, 0x2029)];
const WORD_RANGES: [(u32, u32); 4] = [(0x30, 0x39), (0x41, 0x5A), (0x5F, 0x5F), (0x61, 0x7A)];

fn emit_check_range(ops: &mut dynasmrt::x64::Assembler, ranges: &[(u32, u32)], inverted: bool) {
    asm!(ops
        ; cmp r15, r13
        ; jae ->backtrack
        ; mov eax, [r12 + r15 * 4]
    );
    if ranges.is_empty() {
        // An empty payload falls through to success rather than
        // unconditionally inverting — "no ranges" never rejects.
        if inverted {
            asm!(ops ; inc r15);
        } else {
            asm!(ops ; jmp ->backtrack);
        }
        return;
    }
    let matched = ops.new_dynamic_label();
    emit_ranges_branch(ops, ranges, matched);
    if inverted {
        let done = ops.new_dynamic_label();
        asm!(ops
            ; inc r15
            ; jmp =>done
            ; =>matched
            ; jmp ->backtrack
            ; =>done
        );
    } else {
        asm!(ops
            ; jmp ->backtrack
            ; =>matched
            ; inc r15
        );
    }
}

fn emit_assertion_bol(ops: &mut dynasmrt::x64::Assembler) {
    let ok = ops.new_dynamic_label();
    asm!(ops
        ; test r15, r15
        ; jz =>ok
        ; mov eax, r15d
        ; dec eax
        ; mov eax, [r12 + rax * 4]
    );
    emit_ranges_branch(ops, &LINE_TERMINATORS, ok);
    asm!(ops ; jmp ->backtrack ; =>ok);
}

fn emit_assertion_eol(ops: &mut dynasmrt::x64::Assembler) {
    let ok = ops.new_dynamic_label();
    asm!(ops
        ; cmp r15, r13
        ; je =>ok
        ; mov eax, [r12 + r15 * 4]
    );
    emit_ranges_branch(ops, &LINE_TERMINATORS, ok);
    asm!(ops ; jmp ->backtrack ; =>ok);
}

/// `wants_boundary` selects `\b` (true) vs `\B` (false), matching
/// `Interpreter::step`'s shared handling of both opcodes.
fn emit_assertion_word_boundary(ops: &mut dynasmrt::x64::Assembler, wants_boundary: bool) {
    let left_word = ops.new_dynamic_label();
    let left_computed = ops.new_dynamic_label();
    let right_word = ops.new_dynamic_label();
    let right_computed = ops.new_dynamic_label();

    asm!(ops
        ; xor r8d, r8d
        ; test r15, r15
        ; jz =>left_computed
        ; cmp r15, r13
        ; ja =>left_computed
        ; mov eax, r15d
        ; dec eax
        ; mov eax, [r12 + rax * 4]
    );
    emit_ranges_branch(ops, &WORD_RANGES, left_word);
    asm!(ops
        ; jmp =>left_computed
        ; =>left_word
        ; mov r8d, 1
        ; =>left_computed
    );

    asm!(ops
        ; xor r11d, r11d
        ; cmp r15, r13
        ; jae =>right_computed
        ; mov eax, [r12 + r15 * 4]
    );
    emit_ranges_branch(ops, &WORD_RANGES, right_word);
    asm!(ops
        ; jmp =>right_computed
        ; =>right_word
        ; mov r11d, 1
        ; =>right_computed
    );

    // boundary == (left_word != right_word); backtrack unless that
    // matches what this opcode wants.
    if wants_boundary {
        asm!(ops
            ; cmp r8d, r11d
            ; je ->backtrack
        );
    } else {
        asm!(ops
            ; cmp r8d, r11d
            ; jne ->backtrack
        );
    }
}

fn counter_cell_offset(program: &Program, k: u16) -> i32 {
    ((program.counters_base() + k as usize) * 4) as i32
}

fn reserved_cell_offset(program: &Program, k: u16) -> i32 {
    ((program.counters_base() + program.num_counters as usize + k as usize) * 4) as i32
}

fn emit_push_backtrack(ops: &mut dynasmrt::x64::Assembler, i: usize, ctx: &Ctx) {
    let idx = ctx.refs.backtrack_index[&i];
    asm!(ops
        ; imul rax, rbx, ctx.frame_stride_bytes
        ; lea rcx, [r9 + rax]
    );
    for c in 0..ctx.cells_len {
        let off = (c as i32) * 4;
        if c == 1 {
            // Cell index 1 (group 0's END slot, which opcodes never
            // address directly) doubles as this frame's saved-cp slot.
            asm!(ops ; mov [rcx + off], r15d);
        } else {
            asm!(ops
                ; mov edx, [r14 + off]
                ; mov [rcx + off], edx
            );
        }
    }
    let tracked_off = (ctx.cells_len as i32) * 4;
    asm!(ops
        ; mov DWORD [rcx + tracked_off], idx as i32
        ; inc rbx
    );
}

fn emit_op(ops: &mut dynasmrt::x64::Assembler, op: &Op, i: usize, ctx: &Ctx) {
    match op {
        Op::CheckChar(c) => {
            // `subject` is a `&[u32]` of code units, not a byte buffer —
            // each element is 4 bytes, so the index is scaled.
            asm!(ops
                ; cmp r15, r13
                ; jae ->backtrack
                ; mov eax, [r12 + r15 * 4]
                ; cmp eax, *c as i32
                ; jne ->backtrack
                ; inc r15
            );
        }
        Op::CheckCharOr2(a, b) => {
            asm!(ops
                ; cmp r15, r13
                ; jae ->backtrack
                ; mov eax, [r12 + r15 * 4]
                ; cmp eax, *a as i32
                ; je >matched
                ; cmp eax, *b as i32
                ; jne ->backtrack
                ; matched:
                ; inc r15
            );
        }
        Op::CheckCharOr3(a, b, c) => {
            asm!(ops
                ; cmp r15, r13
                ; jae ->backtrack
                ; mov eax, [r12 + r15 * 4]
                ; cmp eax, *a as i32
                ; je >matched
                ; cmp eax, *b as i32
                ; je >matched
                ; cmp eax, *c as i32
                ; jne ->backtrack
                ; matched:
                ; inc r15
            );
        }
        Op::CheckRange(ranges) => emit_check_range(ops, ranges, false),
        Op::CheckRangeInverted(ranges) => emit_check_range(ops, ranges, true),
        Op::AssertionBol => emit_assertion_bol(ops),
        Op::AssertionEol => emit_assertion_eol(ops),
        Op::AssertionBob => {
            asm!(ops ; test r15, r15 ; jnz ->backtrack);
        }
        Op::AssertionEob => {
            asm!(ops ; cmp r15, r13 ; jne ->backtrack);
        }
        Op::AssertionWordBoundary => emit_assertion_word_boundary(ops, true),
        Op::AssertionWordBoundaryInverted => emit_assertion_word_boundary(ops, false),
        Op::StartCapture(g) => {
            let off = (*g as i32) * 8;
            asm!(ops ; mov [r14 + off], r15d);
        }
        Op::EndCapture(g) => {
            let off = (*g as i32) * 8 + 4;
            asm!(ops ; mov [r14 + off], r15d);
        }
        Op::ClearCaptures { from, to } => {
            for g in *from..*to {
                let start_off = (g as i32) * 8;
                let end_off = start_off + 4;
                asm!(ops
                    ; mov DWORD [r14 + start_off], -1
                    ; mov DWORD [r14 + end_off], -1
                );
            }
        }
        Op::CounterZero(k) => {
            let off = counter_cell_offset(ctx.program, *k);
            asm!(ops ; mov DWORD [r14 + off], 0);
        }
        Op::CounterNext { counter, max, target } => {
            let off = counter_cell_offset(ctx.program, *counter);
            let label = ctx.labels[target];
            asm!(ops
                ; mov eax, [r14 + off]
                ; inc eax
                ; mov [r14 + off], eax
                ; cmp eax, *max as i32
                ; jb =>label
            );
        }
        Op::StorePosition(k) => {
            let off = reserved_cell_offset(ctx.program, *k);
            asm!(ops ; mov [r14 + off], r15d);
        }
        Op::PositionTest(k) => {
            let off = reserved_cell_offset(ctx.program, *k);
            asm!(ops
                ; mov eax, [r14 + off]
                ; cmp eax, r15d
                ; je ->backtrack
            );
        }
        Op::PushBacktrack(_target) => emit_push_backtrack(ops, i, ctx),
        Op::Jump(target) => {
            let label = ctx.labels[target];
            asm!(ops ; jmp =>label);
        }
        Op::Failure => {
            asm!(ops ; jmp ->failure);
        }
        Op::Success => {
            asm!(ops ; jmp ->success);
        }
        _ => unreachable!("is_supported gates emit_op"),
    }
}
