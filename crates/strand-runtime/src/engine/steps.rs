use strand_core::{Flow, VarScope};

use super::call::call_function;
use super::closure::Closure;
use super::environment::{Environment, GotoKind, Signal, ValueIterator};
use super::step::{evaluate, Block, Continue, Step};
use crate::bridge;
use crate::callable::Callable;
use crate::error::Fault;
use crate::value::{resolve_index, Value, ValueKind};

use std::sync::Arc;

/// Looks up the callee named by a `Call` step. `$` and `&` names are read
/// from variables; anything else comes from the function tables.
pub(crate) fn resolve_callee(env: &mut Environment, function: &str) -> Option<Callable> {
    if function.starts_with('$') || function.starts_with('&') {
        return env.get_var(function).as_callable().cloned();
    }
    env.instance().function(function)
}

/// Converts a failed foreign call into the thrown-value channel.
fn catch_foreign(env: &mut Environment, outcome: Result<Value, Fault>) -> Result<Value, Fault> {
    match outcome {
        Err(Fault::ForeignInvocation(fault)) => {
            env.flag_error(Value::host_fault(fault));
            Ok(Value::empty())
        }
        other => other,
    }
}

#[derive(Debug)]
pub struct CreateFrame;

impl Step for CreateFrame {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        env.create_frame();
        Ok(Value::empty())
    }
}

#[derive(Debug)]
pub struct Literal {
    pub(crate) value: Value,
}

impl Step for Literal {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        env.push(self.value.clone())?;
        Ok(self.value.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Slot,
}

#[derive(Debug)]
pub struct Template {
    pub(crate) parts: Vec<TemplatePart>,
}

impl Step for Template {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let mut values = env.pop_all()?.into_iter();
        let mut text = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Text(literal) => text.push_str(literal),
                TemplatePart::Slot => {
                    if let Some(value) = values.next() {
                        text.push_str(&value.to_string());
                    }
                }
            }
        }
        env.frame_result(Value::from(text))
    }
}

#[derive(Debug)]
pub struct Get {
    pub(crate) name: String,
}

impl Step for Get {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let value = env.get_var(&self.name);
        env.push(value.clone())?;
        Ok(value)
    }
}

#[derive(Debug)]
pub struct Assign {
    pub(crate) name: String,
    pub(crate) scope: VarScope,
}

impl Step for Assign {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let value = env.pop()?;
        env.set_var(&self.name, value.clone(), self.scope);
        env.frame_result(value)
    }
}

#[derive(Debug)]
pub struct Index;

impl Step for Index {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let mut operands = env.pop_all()?.into_iter();
        let container = operands.next().unwrap_or_default();
        let key = operands.next().unwrap_or_default();
        let value = match container.kind() {
            ValueKind::Array(_) => container.element(key.to_integer()),
            ValueKind::Map(_) => container.entry(&key),
            ValueKind::String(text) => {
                let chars = text.chars().collect::<Vec<_>>();
                resolve_index(key.to_integer(), chars.len())
                    .and_then(|position| chars.get(position))
                    .map(|ch| Value::from(ch.to_string()).inherit_taint(container.is_tainted()))
            }
            _ => None,
        };
        env.frame_result(value.unwrap_or_default())
    }
}

#[derive(Debug)]
pub struct AssignIndex;

impl Step for AssignIndex {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let mut operands = env.pop_all()?.into_iter();
        let container = operands.next().unwrap_or_default();
        let key = operands.next().unwrap_or_default();
        let value = operands.next().unwrap_or_default();
        match container.kind() {
            ValueKind::Array(array) => {
                if !array.set(key.to_integer(), value.clone()) {
                    env.flag_error(Value::from(format!(
                        "index {} is out of bounds for {}",
                        key,
                        container.describe()
                    )));
                }
            }
            ValueKind::Map(map) => map.insert(&key, value.clone()),
            _ => env.flag_error(Value::from(format!(
                "cannot assign an index of {}",
                container.describe()
            ))),
        }
        env.frame_result(value)
    }
}

#[derive(Debug)]
pub struct Operate {
    pub(crate) operator: String,
}

impl Step for Operate {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let operands = env.pop_all()?;
        let operator = env.instance().operator(&self.operator).ok_or_else(|| {
            Fault::engine(
                "ENGINE_OPERATOR_UNKNOWN",
                format!("Unknown operator \"{}\".", self.operator),
            )
        })?;
        let value = operator.invoke(env, &self.operator, operands)?;
        env.frame_result(value)
    }
}

#[derive(Debug)]
pub struct Decide {
    pub(crate) condition: Block,
    pub(crate) then: Block,
    pub(crate) otherwise: Option<Block>,
}

impl Step for Decide {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let condition = evaluate(&self.condition, env)?;
        if !env.is_normal() {
            return Ok(Value::empty());
        }
        if condition.is_true() {
            evaluate(&self.then, env)
        } else if let Some(otherwise) = &self.otherwise {
            evaluate(otherwise, env)
        } else {
            Ok(Value::empty())
        }
    }
}

#[derive(Debug)]
pub struct Goto {
    pub(crate) condition: Block,
    pub(crate) body: Block,
    pub(crate) increment: Option<Block>,
}

impl Goto {
    /// Consumes loop signals left by the body. False means the loop is over.
    fn after_body(&self, env: &mut Environment) -> bool {
        match env.signal() {
            Signal::Normal => true,
            Signal::Goto(GotoKind::Continue) => {
                env.clear_signal();
                true
            }
            Signal::Goto(GotoKind::Break) => {
                env.clear_signal();
                false
            }
            _ => false,
        }
    }

    fn step_increment(&self, env: &mut Environment) -> Result<bool, Fault> {
        if let Some(increment) = &self.increment {
            evaluate(increment, env)?;
        }
        Ok(env.is_normal())
    }
}

impl Step for Goto {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        loop {
            let condition = evaluate(&self.condition, env)?;
            if !env.is_normal() || !condition.is_true() {
                break;
            }
            evaluate(&self.body, env)?;
            if !self.after_body(env) || !self.step_increment(env)? {
                break;
            }
        }
        Ok(Value::empty())
    }

    fn resume(&self, env: &mut Environment, inner: &mut Continue<'_>) -> Result<Value, Fault> {
        inner(env)?;
        if self.after_body(env) && self.step_increment(env)? {
            return self.evaluate(env);
        }
        Ok(Value::empty())
    }
}

#[derive(Debug)]
pub struct IterateCreate {
    pub(crate) key: Option<String>,
    pub(crate) value: String,
}

impl Step for IterateCreate {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let source = env.pop()?;
        env.kill_frame();
        if !source.is_empty() && source.as_array().is_none() && source.as_map().is_none() {
            let line = env.current_line();
            let file = env.current_file();
            env.instance().warn(
                format!("cannot iterate over {}", source.describe()),
                Some(line),
                file,
            );
        }
        env.push_iterator(ValueIterator::new(
            self.key.clone(),
            self.value.clone(),
            source.items(),
        ));
        Ok(Value::empty())
    }
}

#[derive(Debug)]
pub struct IterateNext;

impl Step for IterateNext {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let value = Value::boolean(env.advance_iterator()?);
        env.push(value.clone())?;
        Ok(value)
    }
}

#[derive(Debug)]
pub struct IterateDestroy;

impl Step for IterateDestroy {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        env.pop_iterator();
        Ok(Value::empty())
    }
}

#[derive(Debug)]
pub struct CreateClosure {
    pub(crate) params: Vec<String>,
    pub(crate) body: Block,
}

impl Step for CreateClosure {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let closure = Closure::new(
            None,
            self.params.clone(),
            self.body.clone(),
            env.current_locals(),
            env.current_file(),
            env.current_line(),
        );
        let value = Value::callable(Callable::Closure(Arc::new(closure)));
        env.push(value.clone())?;
        Ok(value)
    }
}

#[derive(Debug)]
pub struct Bind {
    pub(crate) function: String,
    pub(crate) params: Vec<String>,
    pub(crate) body: Block,
}

impl Step for Bind {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let closure = Closure::new(
            Some(self.function.clone()),
            self.params.clone(),
            self.body.clone(),
            Default::default(),
            env.current_file(),
            env.current_line(),
        );
        env.instance()
            .bind_function(&self.function, Callable::Closure(Arc::new(closure)));
        Ok(Value::empty())
    }
}

#[derive(Debug)]
pub struct BindInline {
    pub(crate) function: String,
    pub(crate) body: Block,
}

impl Step for BindInline {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let body = self.body.clone();
        env.instance().bind_inline(
            &self.function,
            Callable::native(move |env: &mut Environment, _: &str, _: Vec<Value>| {
                run_inline(&body, env)
            }),
        );
        Ok(Value::empty())
    }
}

/// Runs an inline chain in the caller's variable context.
fn run_inline(body: &Block, env: &mut Environment) -> Result<Value, Fault> {
    evaluate(body, env)?;
    match env.signal() {
        Signal::Returning(value) | Signal::Yield(value) => {
            let value = value.clone();
            env.clear_signal();
            Ok(value)
        }
        _ => Ok(Value::empty()),
    }
}

#[derive(Debug)]
pub struct Call {
    pub(crate) function: String,
}

impl Step for Call {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let line = env.current_line();
        match resolve_callee(env, &self.function) {
            Some(callee) => call_function(env, &callee, &self.function, line),
            None => {
                env.flag_error(Value::from(format!(
                    "Attempted to call non-existent function {}",
                    self.function
                )));
                env.frame_result(Value::empty())
            }
        }
    }
}

#[derive(Debug)]
pub struct ObjectNew {
    pub(crate) class: String,
}

impl Step for ObjectNew {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let args = env.pop_all()?;
        let outcome = bridge::construct(env, &self.class, args);
        let value = catch_foreign(env, outcome)?;
        env.frame_result(value)
    }
}

#[derive(Debug)]
pub struct ObjectAccess {
    pub(crate) method: String,
}

impl Step for ObjectAccess {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let mut operands = env.pop_all()?;
        if operands.is_empty() {
            return Err(Fault::engine(
                "ENGINE_OBJECT_TARGET_MISSING",
                format!("No target for method \"{}\".", self.method),
            ));
        }
        let target = operands.remove(0);
        if let Some(callable) = target.as_callable() {
            for value in operands.into_iter().rev() {
                env.push(value)?;
            }
            let line = env.current_line();
            return call_function(env, callable, &self.method, line);
        }
        let outcome = bridge::invoke_method(env, &target, &self.method, operands);
        let value = catch_foreign(env, outcome)?;
        env.frame_result(value)
    }
}

#[derive(Debug)]
pub struct Return {
    pub(crate) flow: Flow,
}

impl Step for Return {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let value = if env.current_frame().is_empty() {
            Value::empty()
        } else {
            env.pop()?
        };
        env.kill_frame();
        env.flag_return(value, self.flow);
        Ok(Value::empty())
    }
}

#[derive(Debug)]
pub struct Try {
    pub(crate) body: Block,
    pub(crate) handler: Block,
    pub(crate) var: String,
}

impl Try {
    fn run(&self, env: &mut Environment, body: &mut Continue<'_>) -> Result<Value, Fault> {
        let frame_mark = env.frame_depth();
        let installed = env.install_exception_handler();
        let outcome = body(env);
        if env.exception_depth() >= installed {
            env.pop_exception_context();
        }
        let value = outcome?;

        let Signal::Thrown(thrown) = env.signal().clone() else {
            return Ok(value);
        };
        env.clean_to(frame_mark);
        env.clear_signal();
        env.set_var(&self.var, thrown, VarScope::Auto);
        evaluate(&self.handler, env)
    }
}

impl Step for Try {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        let body = self.body.clone();
        self.run(env, &mut |env: &mut Environment| evaluate(&body, env))
    }

    fn resume(&self, env: &mut Environment, inner: &mut Continue<'_>) -> Result<Value, Fault> {
        self.run(env, inner)
    }
}

#[derive(Debug)]
pub struct PopTry;

impl Step for PopTry {
    fn evaluate(&self, env: &mut Environment) -> Result<Value, Fault> {
        env.pop_exception_context();
        Ok(Value::empty())
    }
}
