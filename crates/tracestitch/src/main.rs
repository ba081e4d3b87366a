use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracestitch_contracts::ENTRY_FUNCTION_NAME;
use tracestitch_runner::{DEFAULT_INTERPRETER, DEFAULT_TIMEOUT_SECONDS};

mod pipeline;

#[derive(Parser, Debug)]
#[command(name = "tracestitch")]
#[command(
    about = "Inline a recorded interpreter trace into a program as a speculative fast path.",
    long_about = None
)]
struct Cli {
    /// Program JSON to patch (default: stdin).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Reference interpreter command; entry arguments are appended.
    #[arg(long, default_value = DEFAULT_INTERPRETER)]
    interp: String,

    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    timeout_seconds: u64,

    #[arg(long, default_value = ENTRY_FUNCTION_NAME)]
    entry: String,

    /// Read a previously captured trace channel instead of running the interpreter.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Print the patched program as text instead of JSON.
    #[arg(long)]
    text: bool,

    /// Write a JSON run report here.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let opts = pipeline::Options {
        input: cli.input,
        interp: cli.interp,
        timeout_seconds: cli.timeout_seconds,
        entry: cli.entry,
        trace: cli.trace,
        text: cli.text,
        report_out: cli.report_out,
    };
    ExitCode::from(pipeline::run(&opts))
}
