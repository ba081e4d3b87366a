#![allow(dead_code)]

use serde_json::{json, Value};
use tracestitch_ir::program::{Operation, Program};

pub fn program(functions: Vec<Value>) -> Program {
    serde_json::from_value(json!({ "functions": functions })).expect("decode IR program JSON")
}

pub fn func(name: &str, args: &[(&str, &str)], instrs: Vec<Value>) -> Value {
    let args: Vec<Value> = args
        .iter()
        .map(|(name, ty)| json!({ "name": name, "type": ty }))
        .collect();
    json!({ "name": name, "args": args, "instrs": instrs })
}

pub fn konst(dest: &str, value: i64) -> Value {
    json!({ "op": "const", "dest": dest, "type": "int", "value": value })
}

pub fn binop(op: &str, dest: &str, a: &str, b: &str) -> Value {
    json!({ "op": op, "dest": dest, "type": "int", "args": [a, b] })
}

pub fn label(name: &str) -> Value {
    json!({ "label": name })
}

pub fn jmp(target: &str) -> Value {
    json!({ "op": "jmp", "labels": [target] })
}

pub fn br(cond: &str, then_: &str, else_: &str) -> Value {
    json!({ "op": "br", "args": [cond], "labels": [then_, else_] })
}

pub fn op(v: Value) -> Operation {
    serde_json::from_value(v).expect("decode IR operation JSON")
}
