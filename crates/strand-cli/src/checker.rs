use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use strand_api::{create_instance, load_program_from_json, run_program};
use strand_core::{DebugFlags, StrandError};
use strand_runtime::{InstanceOptions, MemoryStream};
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    json_string, map_cli_case_invalid, map_cli_check_path, map_cli_check_scan,
    map_cli_program_read, CheckArgs,
};

/// Fields a checked program carries next to its IR.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgramCase {
    #[serde(default)]
    pub(crate) taint: bool,
    #[serde(default)]
    pub(crate) input: Vec<String>,
    #[serde(default)]
    pub(crate) expect: Option<Expectation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Expectation {
    #[serde(default)]
    pub(crate) value: Option<String>,
    #[serde(default)]
    pub(crate) output: Option<String>,
    #[serde(default)]
    pub(crate) thrown: bool,
    #[serde(default)]
    pub(crate) error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CaseResult {
    Passed,
    Skipped,
    Failed(String),
}

pub(crate) fn run_check(args: CheckArgs) -> Result<i32, StrandError> {
    let root = resolve_check_dir(&args.dir)?;
    let files = collect_program_files(&root)?;
    if files.is_empty() {
        return Err(StrandError::new(
            "CLI_CHECK_EMPTY",
            format!("No *.json programs under {}", root.display()),
        ));
    }

    let (mut passed, mut skipped, mut failed) = (0usize, 0usize, 0usize);
    for path in &files {
        let label = path
            .strip_prefix(&root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let result = fs::read_to_string(path)
            .map_err(map_cli_program_read)
            .and_then(|source| check_case(&source))
            .unwrap_or_else(|error| CaseResult::Failed(error.to_string()));
        match result {
            CaseResult::Passed => {
                passed += 1;
                println!("CASE:PASS:{}", label);
            }
            CaseResult::Skipped => {
                skipped += 1;
                println!("CASE:SKIP:{}", label);
            }
            CaseResult::Failed(reason) => {
                failed += 1;
                println!("CASE:FAIL:{}:{}", label, json_string(&reason));
            }
        }
    }

    if failed > 0 {
        return Err(StrandError::new(
            "CLI_CHECK_FAILED",
            format!("{} of {} programs failed.", failed, files.len()),
        ));
    }
    println!("RESULT:OK");
    println!("PASSED:{}", passed);
    println!("SKIPPED:{}", skipped);
    Ok(0)
}

pub(crate) fn resolve_check_dir(dir: &str) -> Result<PathBuf, StrandError> {
    let path = PathBuf::from(dir);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(map_cli_check_path)?
            .join(path)
    };
    if !absolute.is_dir() {
        return Err(StrandError::new(
            "CLI_CHECK_NOT_DIR",
            format!("check dir is not a directory: {}", absolute.display()),
        ));
    }
    Ok(absolute)
}

pub(crate) fn collect_program_files(root: &Path) -> Result<Vec<PathBuf>, StrandError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(map_cli_check_scan)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Runs one program document against its `expect` block.
pub(crate) fn check_case(source: &str) -> Result<CaseResult, StrandError> {
    let case: ProgramCase = serde_json::from_str(source).map_err(map_cli_case_invalid)?;
    let Some(expect) = case.expect else {
        return Ok(CaseResult::Skipped);
    };
    let program = load_program_from_json(source)?;
    debug!(program = %program.name, taint = case.taint, "checking program");

    let console = Arc::new(MemoryStream::with_input(case.input));
    let instance = create_instance(InstanceOptions {
        name: Some(program.name.clone()),
        debug_flags: Some(DebugFlags::NONE),
        taint_mode: Some(case.taint),
        console: Some(console.clone()),
        ..InstanceOptions::default()
    });
    let outcome = match (run_program(&instance, &program), &expect.error_code) {
        (Err(error), Some(code)) if error.code == *code => return Ok(CaseResult::Passed),
        (Err(error), _) => return Ok(CaseResult::Failed(format!("unexpected error {}", error))),
        (Ok(_), Some(code)) => {
            return Ok(CaseResult::Failed(format!("expected error {}", code)));
        }
        (Ok(outcome), None) => outcome,
    };

    if outcome.is_thrown() != expect.thrown {
        return Ok(CaseResult::Failed(format!(
            "expected thrown={}, got {:?}",
            expect.thrown, outcome
        )));
    }
    let value = outcome.value().to_string();
    if let Some(expected) = &expect.value {
        if *expected != value {
            return Ok(CaseResult::Failed(format!(
                "expected value {:?}, got {:?}",
                expected, value
            )));
        }
    }
    let output = console.output();
    if let Some(expected) = &expect.output {
        if *expected != output {
            return Ok(CaseResult::Failed(format!(
                "expected output {:?}, got {:?}",
                expected, output
            )));
        }
    }
    Ok(CaseResult::Passed)
}
