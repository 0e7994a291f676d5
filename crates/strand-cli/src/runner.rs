use std::fs;
use std::sync::Arc;

use strand_api::{create_instance, load_program_from_json, run_program, RunOutcome};
use strand_core::{DebugFlags, StrandError};
use strand_runtime::{Diagnostic, DiagnosticSink, InstanceOptions, ProfileStatistic};
use tracing::info;

use crate::{json_string, map_cli_program_read, RunArgs};

/// Writes diagnostics to stderr so program output on stdout stays clean.
#[derive(Debug, Default)]
pub(crate) struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        eprintln!("{}", format_diagnostic(diagnostic));
    }
}

pub(crate) fn format_diagnostic(diagnostic: &Diagnostic) -> String {
    let kind = if diagnostic.trace_only { "TRACE" } else { "WARN" };
    let file = diagnostic.file.as_deref().unwrap_or("<unknown>");
    match diagnostic.line {
        Some(line) => format!("{} {}:{}: {}", kind, file, line, diagnostic.message),
        None => format!("{} {}: {}", kind, file, diagnostic.message),
    }
}

pub(crate) fn run_flags(args: &RunArgs) -> Result<DebugFlags, StrandError> {
    let mut flags = DebugFlags::SHOW_ERRORS | DebugFlags::SHOW_WARNINGS;
    if args.trace_calls {
        flags |= DebugFlags::TRACE_CALLS;
    }
    if args.trace_taint {
        flags |= DebugFlags::TRACE_TAINT;
    }
    if args.profile {
        flags |= DebugFlags::PROFILE_ONLY;
    }
    if let Some(list) = &args.flags {
        flags |= DebugFlags::parse_list(list)?;
    }
    Ok(flags)
}

pub(crate) fn run_program_file(args: RunArgs) -> Result<i32, StrandError> {
    let source = fs::read_to_string(&args.program).map_err(map_cli_program_read)?;
    let program = load_program_from_json(&source)?;
    let flags = run_flags(&args)?;
    info!(program = %program.name, %flags, taint = args.taint, "starting program");
    let instance = create_instance(InstanceOptions {
        name: Some(program.name.clone()),
        debug_flags: Some(flags),
        taint_mode: Some(args.taint),
        max_call_depth: args.max_call_depth,
        diagnostics: Some(Arc::new(StderrSink)),
        ..InstanceOptions::default()
    });
    let outcome = run_program(&instance, &program)?;
    let code = emit_outcome(&outcome);
    if args.profile {
        for line in profile_lines(&instance.profiler_statistics()) {
            println!("{}", line);
        }
    }
    Ok(code)
}

pub(crate) fn emit_outcome(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed(value) => {
            println!("RESULT:OK");
            println!("VALUE_JSON:{}", json_string(&value.to_string()));
            0
        }
        RunOutcome::Thrown { value, trace } => {
            println!("RESULT:THROWN");
            println!("VALUE_JSON:{}", json_string(&value.to_string()));
            for frame in trace {
                println!(
                    "TRACE:{} at {}:{}",
                    frame.description,
                    frame.file.as_deref().unwrap_or("<unknown>"),
                    frame.line
                );
            }
            2
        }
    }
}

pub(crate) fn profile_lines(statistics: &[ProfileStatistic]) -> Vec<String> {
    statistics
        .iter()
        .map(|statistic| {
            format!(
                "PROFILE:{}:{}:{}:{}",
                statistic.function,
                statistic.line,
                statistic.calls,
                statistic.total.as_micros()
            )
        })
        .collect()
}
