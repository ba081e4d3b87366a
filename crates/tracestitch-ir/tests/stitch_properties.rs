use serde_json::json;
use tracestitch_ir::diagnostics::{Stage, StitchError};
use tracestitch_ir::program::{Code, Op, Program};
use tracestitch_ir::stitch::{stitch, StitchOptions};
use tracestitch_ir::validate::validate_program;

mod ir_program;

use ir_program::{binop, br, func, jmp, konst, label, op, program};

fn looping_main() -> Program {
    program(vec![
        func(
            "main",
            &[("n", "int")],
            vec![
                konst("i", 0),
                konst("one", 1),
                label("loop"),
                binop("lt", "c", "i", "n"),
                br("c", "body", "done"),
                label("body"),
                binop("add", "i", "i", "one"),
                jmp("loop"),
                label("done"),
                json!({ "op": "print", "args": ["i"] }),
            ],
        ),
        func("aux", &[], vec![label("loop"), jmp("loop")]),
    ])
}

fn recorded_trace(len: usize) -> Vec<tracestitch_ir::program::Operation> {
    let body = [
        konst("i", 0),
        konst("one", 1),
        binop("lt", "c", "i", "n"),
        json!({ "op": "guard", "args": ["c"], "labels": ["speculate-fail"] }),
        binop("add", "i", "i", "one"),
    ];
    body.iter().cycle().take(len).cloned().map(op).collect()
}

#[test]
fn every_position_and_trace_length_is_well_formed() {
    let p = looping_main();
    let n = p.functions[0].instrs.len();
    for trace_len in [0usize, 1, 4, 9] {
        let trace = recorded_trace(trace_len);
        for pos in 0..=n {
            let out = stitch(&p, &trace, pos as i64, &StitchOptions::default())
                .unwrap_or_else(|e| panic!("pos={pos} trace_len={trace_len}: {e}"));
            assert!(validate_program(&out.program, Stage::Stitch).is_empty());

            let main = &out.program.functions[0].instrs;
            assert_eq!(main.len(), trace_len + 4 + n + 1);

            // Prelude shape.
            assert_eq!(main[0].as_op().map(|o| o.op), Some(Op::Speculate));
            for (i, t) in trace.iter().enumerate() {
                assert_eq!(main[1 + i], Code::Op(t.clone()));
            }
            assert_eq!(main[trace_len + 1].as_op().map(|o| o.op), Some(Op::Commit));
            let jump = main[trace_len + 2].as_op().expect("success jump");
            assert_eq!(jump.op, Op::Jmp);
            assert_eq!(jump.labels, vec!["speculate-success".to_string()]);
            assert_eq!(main[trace_len + 3].as_label(), Some("speculate-fail"));

            // Fallback preservation: from the success label onward the original tail follows.
            assert_eq!(out.success_index, trace_len + 4 + pos);
            assert_eq!(main[out.success_index].as_label(), Some("speculate-success"));
            assert_eq!(&main[out.success_index + 1..], &p.functions[0].instrs[pos..]);
            assert_eq!(&main[trace_len + 4..out.success_index], &p.functions[0].instrs[..pos]);

            // Non-entry functions are untouched.
            assert_eq!(out.program.functions[1], p.functions[1]);
        }
    }
}

#[test]
fn out_of_range_position_is_a_structural_error() {
    let p = looping_main();
    let n = p.functions[0].instrs.len();
    let err = stitch(&p, &[], n as i64 + 1, &StitchOptions::default()).expect_err("refuse");
    assert!(matches!(err, StitchError::PositionOutOfRange { .. }));
    assert_eq!(err.stage(), Stage::Stitch);
}

#[test]
fn restitching_collides_with_existing_labels() {
    let p = looping_main();
    let once = stitch(&p, &recorded_trace(2), 3, &StitchOptions::default()).expect("first stitch");
    let err = stitch(&once.program, &[], 0, &StitchOptions::default()).expect_err("second stitch");
    assert!(matches!(err, StitchError::LabelCollision { .. }), "{err}");
}

#[test]
fn patched_program_serializes_like_the_input() {
    let p = looping_main();
    let out = stitch(&p, &recorded_trace(1), 2, &StitchOptions::default()).expect("stitch");
    let text = out.program.to_pretty_json().expect("encode");
    let back = Program::from_json_bytes(text.as_bytes()).expect("decode");
    assert_eq!(back, out.program);

    let v: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(v["functions"][0]["instrs"][0], json!({ "op": "speculate" }));
    assert_eq!(
        v["functions"][0]["instrs"][3],
        json!({ "op": "jmp", "labels": ["speculate-success"] })
    );
    assert_eq!(v["functions"][0]["instrs"][4], json!({ "label": "speculate-fail" }));
    assert_eq!(v["functions"][0]["args"], json!([{ "name": "n", "type": "int" }]));
}

#[test]
fn annotations_outside_the_model_pass_through() {
    let input = json!({
        "functions": [
            {
                "name": "main",
                "instrs": [
                    { "op": "const", "dest": "x", "type": "int", "value": 1, "src": "a.bril:1" },
                    { "label": "tail", "note": "kept" },
                    { "op": "print", "args": ["x"] }
                ],
                "attrs": { "inline": false }
            },
            { "name": "aux", "instrs": [{ "op": "nop", "extra": 1 }], "attrs": { "k": 2 } }
        ],
        "meta": "x"
    });
    let p = Program::from_json_bytes(input.to_string().as_bytes()).expect("decode");
    let out = stitch(&p, &recorded_trace(1), 1, &StitchOptions::default()).expect("stitch");
    let v: serde_json::Value =
        serde_json::from_str(&out.program.to_pretty_json().expect("encode")).expect("json");

    assert_eq!(v["meta"], "x");
    assert_eq!(v["functions"][1], input["functions"][1]);
    assert_eq!(v["functions"][0]["attrs"], json!({ "inline": false }));

    let instrs = v["functions"][0]["instrs"].as_array().expect("instrs");
    let orig = input["functions"][0]["instrs"].as_array().expect("orig");
    assert_eq!(instrs[5], orig[0]);
    assert_eq!(instrs[6], json!({ "label": "speculate-success" }));
    assert_eq!(&instrs[7..], &orig[1..]);
}
