use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "strand")]
#[command(about = "Runs and checks strand IR programs")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Run(RunArgs),
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    #[arg(long = "program")]
    pub(crate) program: String,
    #[arg(long = "taint")]
    pub(crate) taint: bool,
    #[arg(long = "trace-calls")]
    pub(crate) trace_calls: bool,
    #[arg(long = "trace-taint")]
    pub(crate) trace_taint: bool,
    #[arg(long = "profile")]
    pub(crate) profile: bool,
    /// Extra debug flags by name, comma separated.
    #[arg(long = "flags")]
    pub(crate) flags: Option<String>,
    #[arg(long = "max-call-depth")]
    pub(crate) max_call_depth: Option<usize>,
}

#[derive(Debug, Args)]
pub(crate) struct CheckArgs {
    #[arg(long = "dir")]
    pub(crate) dir: String,
}
