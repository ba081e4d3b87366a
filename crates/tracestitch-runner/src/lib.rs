use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracestitch_ir::diagnostics::{Diagnostic, Stage};
use tracestitch_ir::entry_args::synth_entry_args;
use tracestitch_ir::program::{Operation, Program};

pub const DEFAULT_INTERPRETER: &str = "brili";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_MAX_TRACE_BYTES: usize = 16 * 1024 * 1024;

pub const CODE_SPAWN: &str = "TS-ACQ-0001";
pub const CODE_IO: &str = "TS-ACQ-0002";
pub const CODE_TIMED_OUT: &str = "TS-ACQ-0003";
pub const CODE_EMPTY_CHANNEL: &str = "TS-ACQ-0004";
pub const CODE_BAD_POSITION: &str = "TS-ACQ-0005";
pub const CODE_BAD_INSTRUCTION: &str = "TS-ACQ-0006";
pub const CODE_CHANNEL_TOO_LARGE: &str = "TS-ACQ-0007";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Program and leading arguments; synthesized entry arguments are appended.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub max_trace_bytes: usize,
}

impl InterpreterConfig {
    /// Splits `cmd` on whitespace, e.g. `"node brili.js"`.
    pub fn from_command_line(cmd: &str, timeout: Duration) -> Result<Self, AcquisitionError> {
        let command: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
        if command.is_empty() {
            return Err(AcquisitionError::Spawn {
                command: cmd.to_string(),
                message: "empty interpreter command".to_string(),
            });
        }
        Ok(Self {
            command,
            timeout,
            max_trace_bytes: DEFAULT_MAX_TRACE_BYTES,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    Spawn { command: String, message: String },
    Io { what: &'static str, message: String },
    TimedOut { after: Duration },
    ChannelTooLarge { cap: usize },
    EmptyChannel { exit_status: Option<i32> },
    BadPosition { line: String },
    BadInstruction { line_no: usize, message: String },
}

impl AcquisitionError {
    pub fn code(&self) -> &'static str {
        match self {
            AcquisitionError::Spawn { .. } => CODE_SPAWN,
            AcquisitionError::Io { .. } => CODE_IO,
            AcquisitionError::TimedOut { .. } => CODE_TIMED_OUT,
            AcquisitionError::ChannelTooLarge { .. } => CODE_CHANNEL_TOO_LARGE,
            AcquisitionError::EmptyChannel { .. } => CODE_EMPTY_CHANNEL,
            AcquisitionError::BadPosition { .. } => CODE_BAD_POSITION,
            AcquisitionError::BadInstruction { .. } => CODE_BAD_INSTRUCTION,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code(), Stage::Acquire, self.to_string())
    }
}

impl std::fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionError::Spawn { command, message } => {
                write!(f, "spawn interpreter {command:?}: {message}")
            }
            AcquisitionError::Io { what, message } => write!(f, "{what}: {message}"),
            AcquisitionError::TimedOut { after } => {
                write!(f, "interpreter did not exit within {}s", after.as_secs_f64())
            }
            AcquisitionError::ChannelTooLarge { cap } => {
                write!(f, "trace channel exceeded {cap} bytes")
            }
            AcquisitionError::EmptyChannel { exit_status } => {
                write!(f, "interpreter produced no trace")?;
                if let Some(code) = exit_status {
                    write!(f, " (exit status {code})")?;
                }
                Ok(())
            }
            AcquisitionError::BadPosition { line } => {
                write!(f, "last trace line is not an instruction index: {line:?}")
            }
            AcquisitionError::BadInstruction { line_no, message } => {
                write!(f, "trace line {line_no} is not an operation: {message}")
            }
        }
    }
}

impl std::error::Error for AcquisitionError {}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTrace {
    pub ops: Vec<Operation>,
    /// Index into the entry function's instructions where recording began.
    pub position: i64,
}

/// Splits the interpreter's diagnostic channel: non-empty lines, the last one an integer
/// position, every other one a JSON operation.
pub fn parse_trace_channel(text: &str) -> Result<RecordedTrace, AcquisitionError> {
    let mut lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    let Some((_, last)) = lines.pop() else {
        return Err(AcquisitionError::EmptyChannel { exit_status: None });
    };
    let position = last
        .parse::<i64>()
        .map_err(|_| AcquisitionError::BadPosition {
            line: last.to_string(),
        })?;

    let mut ops = Vec::with_capacity(lines.len());
    for (line_no, line) in lines {
        let op: Operation =
            serde_json::from_str(line).map_err(|err| AcquisitionError::BadInstruction {
                line_no,
                message: err.to_string(),
            })?;
        ops.push(op);
    }
    Ok(RecordedTrace { ops, position })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterOutput {
    pub exit_status: i32,
    pub exit_signal: Option<i32>,
    pub stderr: Vec<u8>,
}

/// Runs the interpreter once: the program goes to stdin, stdout is discarded and stderr is
/// captured. Once `config.timeout` elapses the interpreter and everything it spawned is killed,
/// whether the interpreter itself is still running or only a descendant still holds stderr.
pub fn invoke(
    config: &InterpreterConfig,
    program_json: &[u8],
    args: &[String],
) -> Result<InterpreterOutput, AcquisitionError> {
    let command_line = command_line(config, args);
    let (program, leading) = config
        .command
        .split_first()
        .ok_or_else(|| AcquisitionError::Spawn {
            command: command_line.clone(),
            message: "empty interpreter command".to_string(),
        })?;

    let mut cmd = Command::new(program);
    cmd.args(leading)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|err| AcquisitionError::Spawn {
        command: command_line.clone(),
        message: err.to_string(),
    })?;
    let deadline = Instant::now().checked_add(config.timeout);

    let mut stdin = child.stdin.take().ok_or(AcquisitionError::Io {
        what: "take interpreter stdin",
        message: "not piped".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or(AcquisitionError::Io {
        what: "take interpreter stderr",
        message: "not piped".to_string(),
    })?;

    // Never joined: the interpreter may exit without draining stdin.
    let input = program_json.to_vec();
    std::thread::spawn(move || -> std::io::Result<()> {
        stdin.write_all(&input)?;
        stdin.flush()
    });

    let cap = config.max_trace_bytes;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(read_to_end_capped(stderr, cap));
    });

    let timed_out = AcquisitionError::TimedOut {
        after: config.timeout,
    };
    let Some(status) = wait_child_until(&mut child, deadline)? else {
        kill_process_group(&mut child);
        return Err(timed_out);
    };
    let Some((stderr_bytes, truncated)) = recv_stderr(&rx, deadline)? else {
        kill_process_group(&mut child);
        return Err(timed_out);
    };
    if truncated {
        return Err(AcquisitionError::ChannelTooLarge { cap });
    }

    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let exit_status = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };
    Ok(InterpreterOutput {
        exit_status,
        exit_signal,
        stderr: stderr_bytes,
    })
}

/// Polls until the child exits; `None` once `deadline` has passed.
fn wait_child_until(
    child: &mut Child,
    deadline: Option<Instant>,
) -> Result<Option<ExitStatus>, AcquisitionError> {
    loop {
        let polled = child.try_wait().map_err(|err| AcquisitionError::Io {
            what: "try_wait interpreter",
            message: err.to_string(),
        })?;
        if let Some(status) = polled {
            return Ok(Some(status));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

type CapturedStderr = std::io::Result<(Vec<u8>, bool)>;

/// Waits for the stderr reader; `None` once `deadline` has passed with the pipe still open.
fn recv_stderr(
    rx: &Receiver<CapturedStderr>,
    deadline: Option<Instant>,
) -> Result<Option<(Vec<u8>, bool)>, AcquisitionError> {
    let reader_lost = || AcquisitionError::Io {
        what: "read interpreter stderr",
        message: "reader thread ended without a result".to_string(),
    };
    let captured = match deadline {
        Some(d) => match rx.recv_timeout(d.saturating_duration_since(Instant::now())) {
            Ok(captured) => captured,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(reader_lost()),
        },
        None => rx.recv().map_err(|_| reader_lost())?,
    };
    captured.map(Some).map_err(|err| AcquisitionError::Io {
        what: "read interpreter stderr",
        message: err.to_string(),
    })
}

fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // The child leads its own group (process_group(0) at spawn).
            unsafe {
                let _ = libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

pub fn command_line(config: &InterpreterConfig, args: &[String]) -> String {
    config
        .command
        .iter()
        .chain(args.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub command_line: String,
    pub raw_trace: String,
    pub exit_status: i32,
    pub warnings: Vec<Diagnostic>,
}

impl Acquisition {
    /// Parses the captured channel. An empty channel reports the interpreter's exit status.
    pub fn trace(&self) -> Result<RecordedTrace, AcquisitionError> {
        parse_trace_channel(&self.raw_trace).map_err(|err| match err {
            AcquisitionError::EmptyChannel { .. } => AcquisitionError::EmptyChannel {
                exit_status: Some(self.exit_status),
            },
            other => other,
        })
    }
}

/// Synthesizes entry arguments from `program` and runs the interpreter over `program_json`,
/// the document exactly as it was read. The channel is returned unparsed so callers can show
/// it before [`Acquisition::trace`] judges it.
pub fn acquire(
    config: &InterpreterConfig,
    program: &Program,
    program_json: &[u8],
    entry: &str,
    sample: &mut dyn FnMut() -> u32,
) -> Result<Acquisition, AcquisitionError> {
    let synthesized = synth_entry_args(program, entry, sample);
    let out = invoke(config, program_json, &synthesized.literals)?;
    Ok(Acquisition {
        command_line: command_line(config, &synthesized.literals),
        raw_trace: String::from_utf8_lossy(&out.stderr).into_owned(),
        exit_status: out.exit_status,
        warnings: synthesized.warnings,
    })
}
