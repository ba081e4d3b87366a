//! Literal arguments for driving the entry function under the reference interpreter.
//!
//! Synthesis is best-effort: it only needs to produce *some* run to record a trace from.

use crate::diagnostics::{Diagnostic, Stage, CODE_UNRECOGNIZED_ARG_TYPE};
use crate::program::{Program, Type};

pub const INT_MIN: u32 = 1;
pub const INT_MAX: u32 = 3;
pub const FLOAT_LITERAL: &str = "3.1415926";
pub const BOOL_LITERAL: &str = "true";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedArgs {
    pub literals: Vec<String>,
    pub warnings: Vec<Diagnostic>,
}

/// One literal for a declared type. `sample` supplies raw entropy for integers.
pub fn synth_arg(ty: &Type, sample: &mut dyn FnMut() -> u32) -> (String, bool) {
    match ty {
        Type::Int => {
            let span = INT_MAX - INT_MIN + 1;
            ((INT_MIN + sample() % span).to_string(), true)
        }
        Type::Bool => (BOOL_LITERAL.to_string(), true),
        Type::Float => (FLOAT_LITERAL.to_string(), true),
        Type::Other(_) => (FLOAT_LITERAL.to_string(), false),
    }
}

/// Literals for every declared argument of `entry`, in order. A missing entry function or one
/// without arguments yields no literals; the stitcher reports the missing function itself.
pub fn synth_entry_args(
    program: &Program,
    entry: &str,
    sample: &mut dyn FnMut() -> u32,
) -> SynthesizedArgs {
    let mut out = SynthesizedArgs::default();
    let Some(func) = program.function(entry) else {
        return out;
    };
    for arg in &func.args {
        let (literal, recognized) = synth_arg(&arg.arg_type, sample);
        if !recognized {
            out.warnings.push(
                Diagnostic::warning(
                    CODE_UNRECOGNIZED_ARG_TYPE,
                    Stage::Acquire,
                    format!(
                        "argument {} has unrecognized type {}; passing {FLOAT_LITERAL}",
                        arg.name, arg.arg_type
                    ),
                )
                .at(entry, None),
            );
        }
        out.literals.push(literal);
    }
    out
}

/// OS entropy, falling back to the clock when the OS source is unavailable.
pub fn os_sample() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        return u32::from_le_bytes(buf);
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}
