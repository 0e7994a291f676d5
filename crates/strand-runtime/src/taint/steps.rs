use super::describe_tainted;
use crate::engine::{
    resolve_callee, Continue, Environment, GeneratedSteps, Step, StepFactory, TemplatePart,
};
use crate::error::Fault;
use crate::value::Value;

/// When a decorated step leaves taint handling to its callee.
#[derive(Debug)]
enum Bypass {
    Never,
    /// Sanitizer and tainter operators decide for themselves.
    Operator(String),
    /// Guarded functions and script closures decide for themselves.
    Callee(String),
}

/// Lets taint on any operand of the wrapped step flow into its result.
#[derive(Debug)]
pub struct PermeableStep {
    label: String,
    bypass: Bypass,
    inner: Box<dyn Step>,
}

impl PermeableStep {
    fn new(label: impl Into<String>, bypass: Bypass, inner: Box<dyn Step>) -> Box<dyn Step> {
        Box::new(Self {
            label: label.into(),
            bypass,
            inner,
        })
    }

    fn bypassed(&self, env: &mut Environment) -> bool {
        match &self.bypass {
            Bypass::Never => false,
            Bypass::Operator(operator) => env
                .instance()
                .operator(operator)
                .is_some_and(|callable| callable.is_sanitizer() || callable.is_tainter()),
            Bypass::Callee(function) => resolve_callee(env, function).is_some_and(|callable| {
                callable.is_sanitizer() || callable.is_tainter() || callable.as_closure().is_some()
            }),
        }
    }

    fn propagate(&self, env: &mut Environment, tainted: &[String], value: Value) -> Value {
        if tainted.is_empty() || value.is_empty() || !env.is_normal() || value.is_tainted() {
            return value;
        }
        let value = value.tainted();
        env.replace_top(value.clone());
        let line = env.current_line();
        let file = env.current_file();
        env.instance().trace_taint(
            format!("{} tainted by {}", self.label, tainted.join(", ")),
            Some(line),
            file,
        );
        value
    }
}

impl Step for PermeableStep {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        if self.bypassed(env) {
            return self.inner.evaluate(env);
        }
        let tainted = describe_tainted(env.current_frame());
        let value = self.inner.evaluate(env)?;
        Ok(self.propagate(env, &tainted, value))
    }

    fn resume(&self, env: &mut Environment, inner: &mut Continue<'_>) -> Result<Value, Fault> {
        self.inner.resume(env, inner)
    }
}

/// Step factory used in taint mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaintModeSteps;

impl StepFactory for TaintModeSteps {
    fn template(&self, parts: Vec<TemplatePart>) -> Box<dyn Step> {
        PermeableStep::new("template", Bypass::Never, GeneratedSteps.template(parts))
    }

    fn operate(&self, operator: String) -> Box<dyn Step> {
        PermeableStep::new(
            format!("operator {}", operator),
            Bypass::Operator(operator.clone()),
            GeneratedSteps.operate(operator),
        )
    }

    fn call(&self, function: String) -> Box<dyn Step> {
        PermeableStep::new(
            format!("call {}", function),
            Bypass::Callee(function.clone()),
            GeneratedSteps.call(function),
        )
    }

    fn object_new(&self, class: String) -> Box<dyn Step> {
        PermeableStep::new(
            format!("new {}", class),
            Bypass::Never,
            GeneratedSteps.object_new(class),
        )
    }

    fn object_access(&self, method: String) -> Box<dyn Step> {
        PermeableStep::new(
            format!("method {}", method),
            Bypass::Never,
            GeneratedSteps.object_access(method),
        )
    }
}
