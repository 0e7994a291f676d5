//! Taint tracking.
//!
//! Values read from untrusted sources carry a taint flag. In taint mode the
//! linker decorates the data-producing steps so that taint on any operand
//! flows into the result, and guards around built-ins decide where taint is
//! introduced, removed or refused.

mod guard;
mod steps;

pub use guard::{Guard, GuardKind};
pub use steps::{PermeableStep, TaintModeSteps};

use crate::error::Fault;
use crate::value::Value;

/// Refuses the call when any argument is tainted. Arrays and maps are
/// checked one level deep, so an untainted container holding a tainted
/// element is refused too.
pub(crate) fn reject_tainted(function: &str, args: &[Value]) -> Result<(), Fault> {
    let tainted = args
        .iter()
        .filter(|value| carries_taint(value))
        .map(Value::describe)
        .collect::<Vec<_>>();
    if tainted.is_empty() {
        return Ok(());
    }
    Err(Fault::security(
        "SECURITY_TAINTED_ARGUMENT",
        format!(
            "{} called with tainted arguments: {}",
            function,
            tainted.join(", ")
        ),
    ))
}

pub(crate) fn describe_tainted(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter(|value| value.is_tainted())
        .map(Value::describe)
        .collect()
}

fn carries_taint(value: &Value) -> bool {
    value.is_tainted()
        || value
            .items()
            .iter()
            .any(|(_, element)| element.is_tainted())
}
