#![forbid(unsafe_code)]

//! Binary entrypoint of the HSM copytool daemon.

use std::process::ExitCode;

use clap::Parser;
use copytool_app::{Cli, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let rc = run(&cli);
    ExitCode::from(u8::try_from(rc).unwrap_or(u8::MAX))
}
