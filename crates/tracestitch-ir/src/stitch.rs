//! Trace stitching: inline a recorded trace as a speculative fast path.
//!
//! For an entry function `main` with body `i0 .. in-1`, trace `t*` and position `p`:
//!
//! ```text
//! speculate
//! t*
//! commit
//! jmp .speculate-success
//! .speculate-fail:
//! i0 .. ip-1
//! .speculate-success:
//! ip .. in-1
//! ```
//!
//! A committed trace resumes at `ip`. A failed guard inside `t*` rolls back and branches to
//! `.speculate-fail`, which runs the untouched original body from the top.

use tracestitch_contracts::{ENTRY_FUNCTION_NAME, SPECULATE_FAIL_LABEL, SPECULATE_SUCCESS_LABEL};

use crate::diagnostics::{Stage, StitchError};
use crate::program::{Code, Op, Operation, Program};
use crate::validate::{position_in_range, validate_program};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchOptions {
    pub entry: String,
    pub success_label: String,
    pub fail_label: String,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            entry: ENTRY_FUNCTION_NAME.to_string(),
            success_label: SPECULATE_SUCCESS_LABEL.to_string(),
            fail_label: SPECULATE_FAIL_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stitched {
    pub program: Program,
    /// Instructions before the original body: markers, trace, jump and fail label.
    pub prelude_len: usize,
    /// Index of the success label in the patched entry function.
    pub success_index: usize,
}

/// `speculate; trace..; commit; jmp .success; .fail:`
pub fn build_prelude(trace: &[Operation], options: &StitchOptions) -> Vec<Code> {
    let mut out = Vec::with_capacity(trace.len() + 4);
    out.push(Code::Op(Operation::effect(Op::Speculate)));
    out.extend(trace.iter().cloned().map(Code::Op));
    out.push(Code::Op(Operation::effect(Op::Commit)));
    out.push(Code::Op(Operation::jump(&options.success_label)));
    out.push(Code::label(&options.fail_label));
    out
}

/// Produces a new program with `trace` spliced into the entry function at `position`.
///
/// The input is never modified. Every refusal (missing entry, bad position, reserved label
/// already present, malformed input or output) returns before anything is built, or discards
/// the half-built copy, so callers never observe a partial patch.
pub fn stitch(
    program: &Program,
    trace: &[Operation],
    position: i64,
    options: &StitchOptions,
) -> Result<Stitched, StitchError> {
    let diagnostics = validate_program(program, Stage::Validate);
    if !diagnostics.is_empty() {
        return Err(StitchError::Malformed {
            stage: Stage::Validate,
            diagnostics,
        });
    }

    let entry_idx =
        program
            .function_index(&options.entry)
            .ok_or_else(|| StitchError::MissingEntryFunction {
                name: options.entry.clone(),
            })?;
    let entry = &program.functions[entry_idx];

    let pos = position_in_range(position, entry.instrs.len()).ok_or(
        StitchError::PositionOutOfRange {
            position,
            len: entry.instrs.len(),
        },
    )?;

    for label in [&options.success_label, &options.fail_label] {
        if entry.has_label(label) {
            return Err(StitchError::LabelCollision {
                function: entry.name.clone(),
                label: label.clone(),
            });
        }
    }

    let prelude = build_prelude(trace, options);
    let prelude_len = prelude.len();

    let mut instrs = prelude;
    instrs.reserve(entry.instrs.len() + 1);
    instrs.extend_from_slice(&entry.instrs[..pos]);
    instrs.push(Code::label(&options.success_label));
    instrs.extend_from_slice(&entry.instrs[pos..]);

    let mut patched_entry = entry.clone();
    patched_entry.instrs = instrs;

    let mut patched = program.clone();
    patched.functions[entry_idx] = patched_entry;

    let diagnostics = validate_program(&patched, Stage::Stitch);
    if !diagnostics.is_empty() {
        return Err(StitchError::Malformed {
            stage: Stage::Stitch,
            diagnostics,
        });
    }

    Ok(Stitched {
        program: patched,
        prelude_len,
        success_index: prelude_len + pos,
    })
}
