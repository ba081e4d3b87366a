use std::collections::BTreeMap;

use crate::diagnostics::{
    Diagnostic, Stage, CODE_DUPLICATE_FUNCTION, CODE_DUPLICATE_LABEL, CODE_UNRESOLVED_LABEL,
};
use crate::program::{Code, Function, Program};

/// Structural checks: unique function names, unique labels per function, and every jump
/// target defined exactly once in its function. Returns an empty list for a well-formed program.
pub fn validate_program(program: &Program, stage: Stage) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, func) in program.functions.iter().enumerate() {
        if let Some(first) = seen.insert(func.name.as_str(), idx) {
            out.push(Diagnostic::error(
                CODE_DUPLICATE_FUNCTION,
                stage,
                format!(
                    "duplicate function @{} (functions[{first}] and functions[{idx}])",
                    func.name
                ),
            ));
        }
    }

    for func in &program.functions {
        out.extend(validate_function(func, stage));
    }
    out
}

pub fn validate_function(func: &Function, stage: Stage) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    let mut defined: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, code) in func.instrs.iter().enumerate() {
        let Some(label) = code.as_label() else {
            continue;
        };
        if let Some(first) = defined.insert(label, idx) {
            out.push(
                Diagnostic::error(
                    CODE_DUPLICATE_LABEL,
                    stage,
                    format!("duplicate label .{label} (first defined at instr {first})"),
                )
                .at(&func.name, Some(idx)),
            );
        }
    }

    for (idx, code) in func.instrs.iter().enumerate() {
        let Code::Op(op) = code else {
            continue;
        };
        for target in &op.labels {
            if !defined.contains_key(target.as_str()) {
                out.push(
                    Diagnostic::error(
                        CODE_UNRESOLVED_LABEL,
                        stage,
                        format!("{} targets undefined label .{target}", op.op),
                    )
                    .at(&func.name, Some(idx)),
                );
            }
        }
    }
    out
}

/// `0 <= position <= len`: inserting at `len` appends.
pub fn position_in_range(position: i64, len: usize) -> Option<usize> {
    let pos = usize::try_from(position).ok()?;
    (pos <= len).then_some(pos)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{position_in_range, validate_program};
    use crate::diagnostics::{
        Stage, CODE_DUPLICATE_FUNCTION, CODE_DUPLICATE_LABEL, CODE_UNRESOLVED_LABEL,
    };
    use crate::program::Program;

    fn program(v: serde_json::Value) -> Program {
        serde_json::from_value(v).expect("parse program")
    }

    #[test]
    fn accepts_well_formed_program() {
        let p = program(json!({"functions": [{
            "name": "main",
            "instrs": [
                {"op": "jmp", "labels": ["end"]},
                {"label": "end"},
                {"op": "ret"}
            ]
        }]}));
        assert!(validate_program(&p, Stage::Validate).is_empty());
    }

    #[test]
    fn flags_duplicate_labels_and_unresolved_targets() {
        let p = program(json!({"functions": [{
            "name": "main",
            "instrs": [
                {"label": "a"},
                {"op": "br", "args": ["c"], "labels": ["a", "b"]},
                {"label": "a"}
            ]
        }]}));
        let diags = validate_program(&p, Stage::Validate);
        let codes: Vec<&str> = diags.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec![CODE_DUPLICATE_LABEL, CODE_UNRESOLVED_LABEL]);
        assert_eq!(diags[0].index, Some(2));
        assert_eq!(diags[1].index, Some(1));
        assert!(diags[1].message.contains(".b"));
    }

    #[test]
    fn labels_are_scoped_per_function() {
        let p = program(json!({"functions": [
            {"name": "main", "instrs": [{"label": "l"}]},
            {"name": "helper", "instrs": [{"label": "l"}, {"op": "jmp", "labels": ["l"]}]}
        ]}));
        assert!(validate_program(&p, Stage::Validate).is_empty());
    }

    #[test]
    fn flags_duplicate_function_names() {
        let p = program(json!({"functions": [{"name": "f"}, {"name": "f"}]}));
        let diags = validate_program(&p, Stage::Validate);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, CODE_DUPLICATE_FUNCTION);
    }

    #[test]
    fn position_bounds() {
        assert_eq!(position_in_range(0, 0), Some(0));
        assert_eq!(position_in_range(5, 5), Some(5));
        assert_eq!(position_in_range(6, 5), None);
        assert_eq!(position_in_range(-1, 5), None);
    }
}
