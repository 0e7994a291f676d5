use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use strand_core::{Flow, VarScope};

use super::step::Block;
use crate::error::Fault;
use crate::instance::ScriptInstance;
use crate::value::{ScriptArray, ScriptMap, Value};

pub type ClosureScope = Arc<Mutex<IndexMap<String, Value>>>;

#[derive(Debug, Clone)]
pub enum GotoKind {
    Break,
    Continue,
}

#[derive(Debug, Clone, Default)]
pub enum Signal {
    #[default]
    Normal,
    Returning(Value),
    Thrown(Value),
    Goto(GotoKind),
    PassControl(Value),
    Yield(Value),
}

impl Signal {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }

    /// Signals that leave a closure resumable.
    pub fn is_suspending(&self) -> bool {
        matches!(self, Self::PassControl(_) | Self::Yield(_))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VariableContext {
    pub(crate) locals: IndexMap<String, Value>,
    pub(crate) closure: Option<ClosureScope>,
}

#[derive(Debug, Clone)]
pub(crate) struct ValueIterator {
    key: Option<String>,
    value: String,
    items: Vec<(Value, Value)>,
    position: usize,
}

impl ValueIterator {
    pub(crate) fn new(key: Option<String>, value: String, items: Vec<(Value, Value)>) -> Self {
        Self {
            key,
            value,
            items,
            position: 0,
        }
    }
}

/// Position inside a block where evaluation stopped on a suspending signal.
#[derive(Debug, Clone)]
pub(crate) struct SavedFrame {
    pub(crate) block: Block,
    pub(crate) index: usize,
}

#[derive(Debug, Clone)]
struct ExceptionContext {
    frame_depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Location {
    pub file: Option<String>,
    pub line: usize,
}

/// Mutable evaluation context for one thread of execution.
pub struct Environment {
    instance: Arc<ScriptInstance>,
    frames: Vec<Vec<Value>>,
    signal: Signal,
    exception_contexts: Vec<ExceptionContext>,
    locations: Vec<Location>,
    contexts: Vec<VariableContext>,
    iterators: Vec<ValueIterator>,
    suspended: Vec<SavedFrame>,
    nested_time: Vec<Duration>,
    call_depth: usize,
}

impl Environment {
    pub fn new(instance: Arc<ScriptInstance>) -> Self {
        Self {
            instance,
            frames: Vec::new(),
            signal: Signal::Normal,
            exception_contexts: Vec::new(),
            locations: vec![Location::default()],
            contexts: Vec::new(),
            iterators: Vec::new(),
            suspended: Vec::new(),
            nested_time: Vec::new(),
            call_depth: 0,
        }
    }

    pub fn instance(&self) -> &Arc<ScriptInstance> {
        &self.instance
    }

    // frames

    pub fn create_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn kill_frame(&mut self) {
        self.frames.pop();
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Drops every frame opened above `mark`.
    pub fn clean_to(&mut self, mark: usize) {
        self.frames.truncate(mark);
    }

    pub fn current_frame(&self) -> &[Value] {
        self.frames.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, value: Value) -> Result<(), Fault> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Fault::engine("ENGINE_NO_FRAME", "No frame available for push."))?;
        frame.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, Fault> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Fault::engine("ENGINE_NO_FRAME", "No frame available for pop."))?;
        frame
            .pop()
            .ok_or_else(|| Fault::engine("ENGINE_FRAME_EMPTY", "Frame has no operand to pop."))
    }

    /// Pops everything in the current frame; operands come out in parameter order.
    pub fn pop_all(&mut self) -> Result<Vec<Value>, Fault> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| Fault::engine("ENGINE_NO_FRAME", "No frame available for pop."))?;
        Ok(frame.drain(..).rev().collect())
    }

    /// Replaces the value most recently pushed onto the current frame.
    pub fn replace_top(&mut self, value: Value) {
        if let Some(top) = self.frames.last_mut().and_then(|frame| frame.last_mut()) {
            *top = value;
        }
    }

    /// Kills the operand frame and leaves `value` on the enclosing one.
    pub fn frame_result(&mut self, value: Value) -> Result<Value, Fault> {
        self.kill_frame();
        self.push(value.clone())?;
        Ok(value)
    }

    // signals

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn is_normal(&self) -> bool {
        self.signal.is_normal()
    }

    pub fn set_signal(&mut self, signal: Signal) {
        self.signal = signal;
    }

    pub fn clear_signal(&mut self) {
        self.signal = Signal::Normal;
    }

    pub fn take_signal(&mut self) -> Signal {
        std::mem::take(&mut self.signal)
    }

    pub fn flag_return(&mut self, value: Value, flow: Flow) {
        self.signal = match flow {
            Flow::Return => Signal::Returning(value),
            Flow::Throw => Signal::Thrown(value),
            Flow::Break => Signal::Goto(GotoKind::Break),
            Flow::Continue => Signal::Goto(GotoKind::Continue),
            Flow::Callcc => Signal::PassControl(value),
            Flow::Yield => Signal::Yield(value),
        };
    }

    pub fn flag_error(&mut self, value: Value) {
        self.signal = Signal::Thrown(value);
    }

    pub fn thrown_value(&self) -> Option<&Value> {
        match &self.signal {
            Signal::Thrown(value) => Some(value),
            _ => None,
        }
    }

    // exception contexts

    /// Returns the context depth after installing, used to detect whether it is still present.
    pub fn install_exception_handler(&mut self) -> usize {
        self.exception_contexts.push(ExceptionContext {
            frame_depth: self.frames.len(),
        });
        self.exception_contexts.len()
    }

    pub fn pop_exception_context(&mut self) -> Option<usize> {
        self.exception_contexts
            .pop()
            .map(|context| context.frame_depth)
    }

    pub fn exception_depth(&self) -> usize {
        self.exception_contexts.len()
    }

    pub fn has_exception_handler(&self) -> bool {
        !self.exception_contexts.is_empty()
    }

    // source locations

    pub fn push_source(&mut self, file: Option<String>, line: usize) {
        self.locations.push(Location { file, line });
    }

    pub fn pop_source(&mut self) {
        if self.locations.len() > 1 {
            self.locations.pop();
        }
    }

    pub fn set_line(&mut self, line: usize) {
        if let Some(location) = self.locations.last_mut() {
            location.line = line;
        }
    }

    pub fn current_line(&self) -> usize {
        self.locations.last().map(|location| location.line).unwrap_or(0)
    }

    pub fn current_file(&self) -> Option<String> {
        self.locations
            .iter()
            .rev()
            .find_map(|location| location.file.clone())
    }

    // variables

    pub(crate) fn push_context(&mut self, context: VariableContext) {
        self.contexts.push(context);
    }

    pub(crate) fn pop_context(&mut self) -> Option<VariableContext> {
        self.contexts.pop()
    }

    pub(crate) fn current_locals(&self) -> IndexMap<String, Value> {
        self.contexts
            .last()
            .map(|context| context.locals.clone())
            .unwrap_or_default()
    }

    /// Locals, then the closure scope, then globals. Unbound `@` and `%` names
    /// are created as empty containers.
    pub fn get_var(&mut self, name: &str) -> Value {
        if let Some(context) = self.contexts.last() {
            if let Some(value) = context.locals.get(name) {
                return value.clone();
            }
            if let Some(scope) = &context.closure {
                if let Some(value) = scope
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(name)
                {
                    return value.clone();
                }
            }
        }
        if let Some(value) = self.instance.global(name) {
            return value;
        }

        let created = if name.starts_with('@') {
            Value::array(ScriptArray::new())
        } else if name.starts_with('%') {
            Value::map(ScriptMap::new())
        } else {
            return Value::empty();
        };
        self.set_var(name, created.clone(), VarScope::Auto);
        created
    }

    pub fn set_var(&mut self, name: &str, value: Value, scope: VarScope) {
        match scope {
            VarScope::Global => self.instance.set_global(name, value),
            VarScope::Local => match self.contexts.last_mut() {
                Some(context) => {
                    context.locals.insert(name.to_string(), value);
                }
                None => self.instance.set_global(name, value),
            },
            VarScope::Auto => {
                if let Some(context) = self.contexts.last_mut() {
                    if let Some(slot) = context.locals.get_mut(name) {
                        *slot = value;
                        return;
                    }
                    if let Some(scope) = &context.closure {
                        let mut scope = scope.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(slot) = scope.get_mut(name) {
                            *slot = value;
                            return;
                        }
                    }
                }
                self.instance.set_global(name, value);
            }
        }
    }

    // iterators

    pub(crate) fn push_iterator(&mut self, iterator: ValueIterator) {
        self.iterators.push(iterator);
    }

    pub(crate) fn pop_iterator(&mut self) -> Option<ValueIterator> {
        self.iterators.pop()
    }

    pub(crate) fn iterator_depth(&self) -> usize {
        self.iterators.len()
    }

    pub(crate) fn split_iterators(&mut self, mark: usize) -> Vec<ValueIterator> {
        if mark >= self.iterators.len() {
            return Vec::new();
        }
        self.iterators.split_off(mark)
    }

    pub(crate) fn restore_iterators(&mut self, iterators: Vec<ValueIterator>) {
        self.iterators.extend(iterators);
    }

    /// Advances the innermost iterator and binds its variables. Returns false when exhausted.
    pub(crate) fn advance_iterator(&mut self) -> Result<bool, Fault> {
        let iterator = self.iterators.last_mut().ok_or_else(|| {
            Fault::engine("ENGINE_ITERATOR_MISSING", "No active iterator to advance.")
        })?;
        let Some((key, value)) = iterator.items.get(iterator.position).cloned() else {
            return Ok(false);
        };
        iterator.position += 1;
        let key_name = iterator.key.clone();
        let value_name = iterator.value.clone();
        if let Some(key_name) = key_name {
            self.set_var(&key_name, key, VarScope::Auto);
        }
        self.set_var(&value_name, value, VarScope::Auto);
        Ok(true)
    }

    // suspension bookkeeping

    pub(crate) fn record_suspension(&mut self, block: Block, index: usize) {
        self.suspended.push(SavedFrame { block, index });
    }

    pub(crate) fn suspension_depth(&self) -> usize {
        self.suspended.len()
    }

    /// Saved positions above `mark`, innermost first.
    pub(crate) fn take_suspension(&mut self, mark: usize) -> Vec<SavedFrame> {
        if mark >= self.suspended.len() {
            return Vec::new();
        }
        self.suspended.split_off(mark)
    }

    // call bookkeeping

    pub(crate) fn enter_call(&mut self) -> Result<(), Fault> {
        let limit = self.instance.max_call_depth();
        if self.call_depth >= limit {
            return Err(Fault::engine(
                "ENGINE_CALL_DEPTH",
                format!("Maximum call depth of {} exceeded.", limit),
            ));
        }
        self.call_depth += 1;
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    pub(crate) fn start_nested_timer(&mut self) {
        self.nested_time.push(Duration::ZERO);
    }

    /// Closes a timed call and returns its exclusive time.
    pub(crate) fn stop_nested_timer(&mut self, elapsed: Duration) -> Duration {
        let nested = self.nested_time.pop().unwrap_or_default();
        if let Some(parent) = self.nested_time.last_mut() {
            *parent += elapsed;
        }
        elapsed.saturating_sub(nested)
    }
}

#[cfg(test)]
mod environment_tests {
    use super::*;
    use crate::test_support::test_instance;

    #[test]
    fn frames_pop_in_parameter_order() {
        let mut env = Environment::new(test_instance());
        env.create_frame();
        env.push(Value::from(2)).expect("push");
        env.push(Value::from(1)).expect("push");
        let args = env.pop_all().expect("pop all");
        assert_eq!(args, vec![Value::from(1), Value::from(2)]);
        assert!(env.current_frame().is_empty());

        env.create_frame();
        env.frame_result(Value::from(7)).expect("frame result");
        assert_eq!(env.frame_depth(), 1);
        assert_eq!(env.pop().expect("pop"), Value::from(7));
        env.kill_frame();
        assert_eq!(
            env.push(Value::empty()).expect_err("no frame").code(),
            "ENGINE_NO_FRAME"
        );
    }

    #[test]
    fn variable_lookup_prefers_locals_then_closure_then_globals() {
        let instance = test_instance();
        instance.set_global("$x", Value::from("global"));
        let mut env = Environment::new(instance.clone());
        let scope: ClosureScope = Arc::new(Mutex::new(IndexMap::from([(
            "$x".to_string(),
            Value::from("closure"),
        )])));
        env.push_context(VariableContext {
            locals: IndexMap::new(),
            closure: Some(scope.clone()),
        });
        assert_eq!(env.get_var("$x"), Value::from("closure"));

        env.set_var("$x", Value::from("local"), VarScope::Local);
        assert_eq!(env.get_var("$x"), Value::from("local"));

        env.set_var("$y", Value::from(1), VarScope::Auto);
        assert_eq!(instance.global("$y"), Some(Value::from(1)));

        env.pop_context();
        assert_eq!(env.get_var("$x"), Value::from("global"));
        assert!(env.get_var("$missing").is_empty());
        assert!(env.get_var("@list").as_array().is_some());
        assert!(instance.global("@list").is_some());
    }

    #[test]
    fn nested_timer_reports_exclusive_time() {
        let mut env = Environment::new(test_instance());
        env.start_nested_timer();
        env.start_nested_timer();
        let inner = env.stop_nested_timer(Duration::from_millis(30));
        let outer = env.stop_nested_timer(Duration::from_millis(100));
        assert_eq!(inner, Duration::from_millis(30));
        assert_eq!(outer, Duration::from_millis(70));
    }
}
