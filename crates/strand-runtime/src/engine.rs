mod call;
mod closure;
mod environment;
mod linker;
mod operators;
mod step;
mod steps;

#[cfg(test)]
mod engine_tests;

use std::sync::Arc;

use tracing::debug;

pub use call::call_function;
pub(crate) use call::describe_call;
pub use closure::{Closure, ContinuationMeta};
pub use environment::{ClosureScope, Environment, GotoKind, Location, Signal};
pub use linker::{GeneratedSteps, Linker, StepFactory};
pub use operators::{standard_operators, OPERATORS};
pub use step::{evaluate, Block, Continue, LinkedStep, Step};
pub(crate) use steps::resolve_callee;
pub use steps::TemplatePart;

use crate::callable::Callable;
use crate::error::Fault;
use crate::instance::ScriptInstance;
use crate::value::Value;

/// How a top-level run ended.
#[derive(Debug, Clone)]
pub enum Completion {
    Returned(Value),
    Thrown(Value),
}

/// Runs a linked program as the body of an unnamed closure.
///
/// Top-level assignments land in the instance globals. A value thrown and
/// not caught anywhere is reported as a warning and returned as
/// [`Completion::Thrown`].
pub fn run_script(
    instance: &Arc<ScriptInstance>,
    name: &str,
    block: &Block,
    source_file: Option<String>,
) -> Result<Completion, Fault> {
    let _guard = instance.invocation_lock().acquire();
    let closure = Closure::new(
        Some(name.to_string()),
        Vec::new(),
        block.clone(),
        Default::default(),
        source_file,
        block.first_line(),
    );
    let mut env = Environment::new(instance.clone());
    env.create_frame();
    env.create_frame();
    debug!(script = name, "running script");
    let value = call_function(&mut env, &Callable::Closure(Arc::new(closure)), name, 0)?;
    match env.take_signal() {
        Signal::Thrown(thrown) => {
            instance.warn(
                format!("uncaught exception: {}", thrown),
                Some(env.current_line()),
                env.current_file(),
            );
            Ok(Completion::Thrown(thrown))
        }
        _ => Ok(Completion::Returned(value)),
    }
}
