use std::sync::Arc;

use strand_core::ir::Program;
use strand_core::StrandError;
use strand_runtime::{Completion, Fault, InstanceOptions, ScriptInstance, StackFrame, Value};
use tracing::debug;

/// How a program run ended when the engine itself did not fail.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Value),
    Thrown { value: Value, trace: Vec<StackFrame> },
}

impl RunOutcome {
    pub fn value(&self) -> &Value {
        match self {
            Self::Completed(value) | Self::Thrown { value, .. } => value,
        }
    }

    pub fn is_thrown(&self) -> bool {
        matches!(self, Self::Thrown { .. })
    }
}

pub fn load_program_from_json(source: &str) -> Result<Program, StrandError> {
    let program: Program = serde_json::from_str(source).map_err(|error| {
        StrandError::at_line(
            "API_PROGRAM_JSON_INVALID",
            format!("Program JSON is invalid: {}", error),
            error.line(),
        )
    })?;
    if program.name.trim().is_empty() {
        return Err(StrandError::new(
            "API_PROGRAM_NAME_EMPTY",
            "Program needs a non-empty name.",
        ));
    }
    Ok(program)
}

pub fn create_instance(options: InstanceOptions) -> Arc<ScriptInstance> {
    ScriptInstance::new(options)
}

pub fn run_program(
    instance: &Arc<ScriptInstance>,
    program: &Program,
) -> Result<RunOutcome, StrandError> {
    debug!(program = %program.name, instance = %instance.name(), "running program");
    match instance.run(program).map_err(fault_to_error)? {
        Completion::Returned(value) => Ok(RunOutcome::Completed(value)),
        Completion::Thrown(value) => Ok(RunOutcome::Thrown {
            value,
            trace: instance.stack_trace(),
        }),
    }
}

/// Loads, instantiates and runs in one go.
pub fn run_program_from_json(
    source: &str,
    options: InstanceOptions,
) -> Result<RunOutcome, StrandError> {
    let program = load_program_from_json(source)?;
    let instance = create_instance(options);
    run_program(&instance, &program)
}

fn fault_to_error(fault: Fault) -> StrandError {
    match fault {
        Fault::Engine(error) | Fault::Security(error) => error,
        Fault::ForeignInvocation(fault) => {
            StrandError::new("API_FOREIGN_INVOCATION", fault.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_runtime::MemoryStream;

    const HELLO: &str = r#"{
        "name": "hello",
        "sourceFile": "hello.strand",
        "block": { "steps": [
            { "kind": "createFrame", "line": 1 },
            { "kind": "literal", "value": "hello", "line": 1 },
            { "kind": "call", "function": "println", "line": 1 },
            { "kind": "createFrame", "line": 2 },
            { "kind": "literal", "value": 42, "line": 2 },
            { "kind": "return", "line": 2 }
        ]}
    }"#;

    const FAILING: &str = r#"{
        "name": "failing",
        "block": { "steps": [
            { "kind": "bind", "function": "explode", "line": 1, "body": { "steps": [
                { "kind": "createFrame", "line": 2 },
                { "kind": "literal", "value": "kaboom", "line": 2 },
                { "kind": "return", "flow": "throw", "line": 2 }
            ]}},
            { "kind": "createFrame", "line": 4 },
            { "kind": "call", "function": "explode", "line": 4 }
        ]}
    }"#;

    #[test]
    fn load_program_from_json_applies_defaults() {
        let program = load_program_from_json(HELLO).expect("program should load");
        assert_eq!(program.name, "hello");
        assert_eq!(program.source_file.as_deref(), Some("hello.strand"));
        assert_eq!(program.block.steps.len(), 6);
    }

    #[test]
    fn load_program_from_json_reports_invalid_documents() {
        let error = load_program_from_json("{ \"name\": ").expect_err("truncated json");
        assert_eq!(error.code, "API_PROGRAM_JSON_INVALID");
        assert_eq!(error.line, Some(1));

        let error = load_program_from_json(r#"{ "name": " ", "block": {} }"#)
            .expect_err("blank name");
        assert_eq!(error.code, "API_PROGRAM_NAME_EMPTY");
    }

    #[test]
    fn run_program_completes_with_returned_value() {
        let console = Arc::new(MemoryStream::new());
        let instance = create_instance(InstanceOptions {
            console: Some(console.clone()),
            ..InstanceOptions::default()
        });
        let program = load_program_from_json(HELLO).expect("program should load");
        let outcome = run_program(&instance, &program).expect("run should pass");
        assert!(!outcome.is_thrown());
        assert_eq!(outcome.value(), &Value::from(42));
        assert_eq!(console.output(), "hello\n");
    }

    #[test]
    fn run_program_surfaces_thrown_values_with_trace() {
        let outcome =
            run_program_from_json(FAILING, InstanceOptions::default()).expect("run should pass");
        let RunOutcome::Thrown { value, trace } = outcome else {
            panic!("expected a thrown outcome");
        };
        assert_eq!(value, Value::from("kaboom"));
        assert_eq!(trace[0].description, "explode()");
        assert_eq!(trace[0].line, 4);
    }

    #[test]
    fn engine_faults_become_coded_errors() {
        let source = r#"{
            "name": "spin",
            "block": { "steps": [
                { "kind": "bind", "function": "spin", "line": 1, "body": { "steps": [
                    { "kind": "createFrame", "line": 2 },
                    { "kind": "call", "function": "spin", "line": 2 }
                ]}},
                { "kind": "createFrame", "line": 3 },
                { "kind": "call", "function": "spin", "line": 3 }
            ]}
        }"#;
        let error = run_program_from_json(
            source,
            InstanceOptions {
                max_call_depth: Some(8),
                ..InstanceOptions::default()
            },
        )
        .expect_err("depth limit");
        assert_eq!(error.code, "ENGINE_CALL_DEPTH");
        assert_eq!(error.line, Some(2));
    }
}
