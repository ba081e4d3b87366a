use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracestitch_contracts::{EXIT_ACQUISITION_ERROR, EXIT_OK, EXIT_STRUCTURAL_ERROR};
use tracestitch_ir::diagnostics::{Diagnostic, Report, Stage, StitchError};
use tracestitch_ir::entry_args::os_sample;
use tracestitch_ir::program::Program;
use tracestitch_ir::stitch::{stitch, StitchOptions};
use tracestitch_runner::{
    acquire, parse_trace_channel, AcquisitionError, InterpreterConfig, RecordedTrace,
};

const CODE_IO: &str = "TS-IO-0001";
const CODE_PARSE: &str = "TS-PARSE-0001";

#[derive(Debug, Clone)]
pub struct Options {
    pub input: Option<PathBuf>,
    pub interp: String,
    pub timeout_seconds: u64,
    pub entry: String,
    pub trace: Option<PathBuf>,
    pub text: bool,
    pub report_out: Option<PathBuf>,
}

struct Failure {
    stage: Stage,
    exit_code: u8,
    diagnostics: Vec<Diagnostic>,
    message: String,
}

impl Failure {
    fn io(stage: Stage, err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        Self {
            stage,
            exit_code: EXIT_STRUCTURAL_ERROR,
            diagnostics: vec![Diagnostic::error(CODE_IO, stage, message.clone())],
            message,
        }
    }

    fn acquisition(err: AcquisitionError) -> Self {
        Self {
            stage: Stage::Acquire,
            exit_code: EXIT_ACQUISITION_ERROR,
            diagnostics: vec![err.to_diagnostic()],
            message: err.to_string(),
        }
    }

    fn structural(err: StitchError) -> Self {
        Self {
            stage: err.stage(),
            exit_code: EXIT_STRUCTURAL_ERROR,
            diagnostics: err.to_diagnostics(),
            message: err.to_string(),
        }
    }
}

struct Success {
    output: String,
    meta: Vec<(&'static str, serde_json::Value)>,
    warnings: Vec<Diagnostic>,
}

/// Runs read -> acquire -> stitch -> emit and returns the process exit code. On failure
/// stdout is left untouched.
pub fn run(opts: &Options) -> u8 {
    let (report, exit_code) = match try_run(opts) {
        Ok(ok) => {
            let mut report = Report::new(Stage::Emit).with_diagnostics(ok.warnings);
            for (k, v) in ok.meta {
                report = report.meta(k, v);
            }
            if let Err(err) = emit(&ok.output) {
                eprintln!("{}: {err:#}", Stage::Emit.as_str());
                let d = Diagnostic::error(CODE_IO, Stage::Emit, format!("{err:#}"));
                let report = Report::new(Stage::Emit).with_diagnostics(vec![d]);
                (report, EXIT_STRUCTURAL_ERROR)
            } else {
                (report, EXIT_OK)
            }
        }
        Err(fail) => {
            eprintln!("{}: {}", fail.stage.as_str(), fail.message);
            (
                Report::new(fail.stage).with_diagnostics(fail.diagnostics),
                fail.exit_code,
            )
        }
    };

    if let Some(path) = &opts.report_out {
        let mut report = report;
        report.exit_code = exit_code;
        if let Err(err) = write_report(path, &report) {
            eprintln!("report: {err:#}");
        }
    }
    exit_code
}

fn try_run(opts: &Options) -> Result<Success, Failure> {
    let bytes = read_input(opts.input.as_deref()).map_err(|e| Failure::io(Stage::Parse, e))?;
    let program = Program::from_json_bytes(&bytes).map_err(|err| {
        let message = format!("parse program JSON: {err}");
        Failure {
            stage: Stage::Parse,
            exit_code: EXIT_STRUCTURAL_ERROR,
            diagnostics: vec![Diagnostic::error(CODE_PARSE, Stage::Parse, message.clone())],
            message,
        }
    })?;

    let mut meta = vec![("input_sha256", json!(sha256_hex(&bytes)))];
    let mut warnings = Vec::new();

    let trace = match &opts.trace {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read trace: {}", path.display()))
                .map_err(|e| Failure::io(Stage::Acquire, e))?;
            eprintln!("trace file {}", path.display());
            eprintln!("{raw}");
            meta.push(("trace_source", json!(path.display().to_string())));
            parse_trace_channel(&raw).map_err(Failure::acquisition)?
        }
        None => {
            let config = InterpreterConfig::from_command_line(
                &opts.interp,
                Duration::from_secs(opts.timeout_seconds),
            )
            .map_err(Failure::acquisition)?;
            let mut sample = os_sample;
            let acq = acquire(&config, &program, &bytes, &opts.entry, &mut sample)
                .map_err(Failure::acquisition)?;
            eprintln!("{}", acq.command_line);
            eprintln!("{}", acq.raw_trace);
            for w in &acq.warnings {
                eprintln!("warning: {w}");
            }
            let trace = acq.trace().map_err(Failure::acquisition)?;
            meta.push(("command", json!(acq.command_line)));
            meta.push(("interpreter_exit_status", json!(acq.exit_status)));
            warnings.extend(acq.warnings);
            trace
        }
    };
    let RecordedTrace { ops, position } = trace;

    let options = StitchOptions {
        entry: opts.entry.clone(),
        ..StitchOptions::default()
    };
    let stitched = stitch(&program, &ops, position, &options).map_err(Failure::structural)?;

    let output = if opts.text {
        stitched.program.to_string()
    } else {
        stitched
            .program
            .to_pretty_json()
            .context("encode patched program")
            .map_err(|e| Failure::io(Stage::Emit, e))?
    };

    meta.push(("trace_len", json!(ops.len())));
    meta.push(("position", json!(position)));
    meta.push(("success_index", json!(stitched.success_index)));
    meta.push(("output_sha256", json!(sha256_hex(output.as_bytes()))));
    Ok(Success {
        output,
        meta,
        warnings,
    })
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("read input: {}", path.display()))
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut buf)
                .context("read program from stdin")?;
            Ok(buf)
        }
    }
}

fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(output.as_bytes())
        .context("write patched program")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

fn write_report(path: &Path, report: &Report) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }
    let mut bytes = serde_json::to_vec_pretty(report)?;
    bytes.push(b'\n');
    std::fs::write(path, bytes).with_context(|| format!("write report: {}", path.display()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex_lower(&Sha256::digest(bytes))
}

fn hex_lower(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(LUT[(b >> 4) as usize] as char);
        out.push(LUT[(b & 0x0F) as usize] as char);
    }
    out
}
