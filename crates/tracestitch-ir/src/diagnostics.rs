use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracestitch_contracts::STITCH_REPORT_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Acquire,
    Stitch,
    Validate,
    Emit,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Acquire => "acquire",
            Stage::Stitch => "stitch",
            Stage::Validate => "validate",
            Stage::Emit => "emit",
        }
    }
}

pub const CODE_MISSING_ENTRY: &str = "TS-STITCH-0001";
pub const CODE_POSITION_OUT_OF_RANGE: &str = "TS-STITCH-0002";
pub const CODE_LABEL_COLLISION: &str = "TS-STITCH-0003";
pub const CODE_DUPLICATE_FUNCTION: &str = "TS-VALIDATE-0001";
pub const CODE_DUPLICATE_LABEL: &str = "TS-VALIDATE-0002";
pub const CODE_UNRESOLVED_LABEL: &str = "TS-VALIDATE-0003";
pub const CODE_UNRECOGNIZED_ARG_TYPE: &str = "TS-ARGS-0001";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Instruction index within `function`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl Diagnostic {
    pub fn error(code: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            stage,
            message: message.into(),
            function: None,
            index: None,
        }
    }

    pub fn warning(code: &str, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, stage, message)
        }
    }

    pub fn at(mut self, function: &str, index: Option<usize>) -> Self {
        self.function = Some(function.to_string());
        self.index = index;
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        match (&self.function, self.index) {
            (Some(func), Some(idx)) => write!(f, " (@{func} instr {idx})"),
            (Some(func), None) => write!(f, " (@{func})"),
            _ => Ok(()),
        }
    }
}

/// Refusal to produce a patched program. Nothing is emitted when this is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum StitchError {
    MissingEntryFunction { name: String },
    PositionOutOfRange { position: i64, len: usize },
    LabelCollision { function: String, label: String },
    Malformed { stage: Stage, diagnostics: Vec<Diagnostic> },
}

impl StitchError {
    pub fn stage(&self) -> Stage {
        match self {
            StitchError::Malformed { stage, .. } => *stage,
            _ => Stage::Stitch,
        }
    }

    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            StitchError::MissingEntryFunction { .. } => {
                vec![Diagnostic::error(CODE_MISSING_ENTRY, Stage::Stitch, self.to_string())]
            }
            StitchError::PositionOutOfRange { .. } => vec![Diagnostic::error(
                CODE_POSITION_OUT_OF_RANGE,
                Stage::Stitch,
                self.to_string(),
            )],
            StitchError::LabelCollision { function, .. } => vec![Diagnostic::error(
                CODE_LABEL_COLLISION,
                Stage::Stitch,
                self.to_string(),
            )
            .at(function, None)],
            StitchError::Malformed { diagnostics, .. } => diagnostics.clone(),
        }
    }
}

impl std::fmt::Display for StitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StitchError::MissingEntryFunction { name } => {
                write!(f, "program has no entry function @{name}")
            }
            StitchError::PositionOutOfRange { position, len } => write!(
                f,
                "trace position {position} is outside the entry function (expected 0..={len})"
            ),
            StitchError::LabelCollision { function, label } => write!(
                f,
                "label .{label} already exists in @{function}; refusing to emit a duplicate"
            ),
            StitchError::Malformed { stage, diagnostics } => {
                let what = match stage {
                    Stage::Parse | Stage::Validate => "input program is malformed",
                    _ => "patched program would be malformed",
                };
                write!(f, "{what}")?;
                for d in diagnostics {
                    write!(f, "\n  {d}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for StitchError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub stage: Stage,
    pub exit_code: u8,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl Report {
    pub fn new(stage: Stage) -> Self {
        Self {
            schema_version: STITCH_REPORT_SCHEMA_VERSION.to_string(),
            ok: true,
            stage,
            exit_code: 0,
            diagnostics: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_diagnostics(mut self, mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            a.function
                .cmp(&b.function)
                .then_with(|| a.index.cmp(&b.index))
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        self.diagnostics = diagnostics;
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Diagnostic, Report, Stage, StitchError, CODE_DUPLICATE_LABEL};

    #[test]
    fn report_is_not_ok_with_errors_only() {
        let warn = Diagnostic::warning("TS-ARGS-0001", Stage::Acquire, "w");
        let report = Report::new(Stage::Acquire).with_diagnostics(vec![warn.clone()]);
        assert!(report.ok);

        let err = Diagnostic::error(CODE_DUPLICATE_LABEL, Stage::Validate, "dup").at("main", Some(3));
        let report = Report::new(Stage::Validate).with_diagnostics(vec![err, warn]);
        assert!(!report.ok);
        // Unlocated diagnostics sort first.
        assert_eq!(report.diagnostics[0].code, "TS-ARGS-0001");
    }

    #[test]
    fn malformed_error_lists_diagnostics() {
        let d = Diagnostic::error(CODE_DUPLICATE_LABEL, Stage::Validate, "duplicate label .x")
            .at("main", Some(4));
        let err = StitchError::Malformed {
            stage: Stage::Validate,
            diagnostics: vec![d],
        };
        assert_eq!(
            err.to_string(),
            "input program is malformed\n  TS-VALIDATE-0002: duplicate label .x (@main instr 4)"
        );
        assert_eq!(err.stage(), Stage::Validate);
    }

    #[test]
    fn report_serializes_schema_and_meta() {
        let report = Report::new(Stage::Emit).meta("trace_len", 3);
        let v = serde_json::to_value(&report).expect("encode report");
        assert_eq!(v["schema_version"], "tracestitch.report@0.1.0");
        assert_eq!(v["stage"], "emit");
        assert_eq!(v["meta"]["trace_len"], 3);
    }
}
