use std::ffi::OsString;

use clap::Parser;
use strand_core::StrandError;
use tracing_subscriber::{fmt, EnvFilter};

mod checker;
mod cli_args;
mod error_map;
mod runner;

pub(crate) use cli_args::{CheckArgs, Cli, Mode, RunArgs};
pub(crate) use error_map::{
    emit_error, json_string, map_cli_case_invalid, map_cli_check_path, map_cli_check_scan,
    map_cli_program_read,
};

/// Installs the stderr log subscriber; `RUST_LOG` overrides the `warn` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second call (tests) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, StrandError> {
    match cli.command {
        Mode::Run(args) => runner::run_program_file(args),
        Mode::Check(args) => checker::run_check(args),
    }
}
