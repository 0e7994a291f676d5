use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tracing::debug;

use super::environment::{
    ClosureScope, Environment, SavedFrame, Signal, ValueIterator, VariableContext,
};
use super::step::{evaluate, resume_frames, Block};
use crate::callable::Callable;
use crate::error::Fault;
use crate::value::{ScriptArray, Value};

/// Single-use metadata attached to the target of a `callcc`.
#[derive(Debug, Clone)]
pub struct ContinuationMeta {
    pub continuation: Value,
    pub source_file: Option<String>,
    pub source_line: usize,
}

#[derive(Debug)]
struct SavedContext {
    /// Outermost block first.
    frames: Vec<SavedFrame>,
    locals: IndexMap<String, Value>,
    iterators: Vec<ValueIterator>,
}

pub struct Closure {
    name: Option<String>,
    params: Vec<String>,
    body: Block,
    scope: ClosureScope,
    source_file: Option<String>,
    line: usize,
    continuation: Mutex<Option<ContinuationMeta>>,
    saved: Mutex<Option<SavedContext>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Closure {
    pub fn new(
        name: Option<String>,
        params: Vec<String>,
        body: Block,
        captured: IndexMap<String, Value>,
        source_file: Option<String>,
        line: usize,
    ) -> Self {
        Self {
            name,
            params,
            body,
            scope: Arc::new(Mutex::new(captured)),
            source_file,
            line,
            continuation: Mutex::new(None),
            saved: Mutex::new(None),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn scope_value(&self, name: &str) -> Option<Value> {
        lock(&self.scope).get(name).cloned()
    }

    pub fn put_continuation(&self, meta: ContinuationMeta) {
        *lock(&self.continuation) = Some(meta);
    }

    /// Removes the metadata as it is read.
    pub fn take_continuation(&self) -> Option<ContinuationMeta> {
        lock(&self.continuation).take()
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.saved).is_some()
    }

    pub(crate) fn invoke(
        self: &Arc<Self>,
        env: &mut Environment,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        let saved = lock(&self.saved).take();
        let mut locals = saved
            .as_ref()
            .map(|saved| saved.locals.clone())
            .unwrap_or_default();
        self.bind_arguments(&mut locals, name, args);

        env.push_context(VariableContext {
            locals,
            closure: Some(self.scope.clone()),
        });
        env.push_source(self.source_file.clone(), self.line);
        let iterator_mark = env.iterator_depth();
        let suspension_mark = env.suspension_depth();

        let outcome = match saved {
            Some(saved) => {
                debug!(closure = %self, frames = saved.frames.len(), "resuming closure");
                env.restore_iterators(saved.iterators);
                resume_frames(&saved.frames, env)
            }
            None => evaluate(&self.body, env),
        };
        let source_line = env.current_line();
        env.pop_source();
        let context = env.pop_context();

        if let Err(fault) = outcome {
            env.split_iterators(iterator_mark);
            env.take_suspension(suspension_mark);
            return Err(fault);
        }

        let result = match env.take_signal() {
            Signal::Returning(value) => value,
            Signal::Yield(value) => {
                self.suspend(env, context, iterator_mark, suspension_mark);
                value
            }
            Signal::PassControl(target) => {
                self.suspend(env, context, iterator_mark, suspension_mark);
                match target.as_callable().and_then(Callable::as_closure) {
                    Some(next) => {
                        next.put_continuation(ContinuationMeta {
                            continuation: Value::callable(Callable::Closure(self.clone())),
                            source_file: self.source_file.clone(),
                            source_line,
                        });
                        env.set_signal(Signal::PassControl(target.clone()));
                    }
                    None => env.instance().warn(
                        format!("callcc target {} is not a closure", target.describe()),
                        Some(source_line),
                        self.source_file.clone(),
                    ),
                }
                target
            }
            Signal::Thrown(value) => {
                env.set_signal(Signal::Thrown(value));
                Value::empty()
            }
            Signal::Goto(_) | Signal::Normal => Value::empty(),
        };
        env.split_iterators(iterator_mark);
        env.take_suspension(suspension_mark);
        Ok(result)
    }

    fn bind_arguments(&self, locals: &mut IndexMap<String, Value>, name: &str, args: Vec<Value>) {
        locals.insert("$0".to_string(), Value::from(name));
        for (index, value) in args.iter().enumerate() {
            locals.insert(format!("${}", index + 1), value.clone());
        }
        for (param, value) in self.params.iter().zip(args.iter()) {
            locals.insert(param.clone(), value.clone());
        }
        locals.insert("@_".to_string(), Value::array(ScriptArray::from_vec(args)));
    }

    fn suspend(
        &self,
        env: &mut Environment,
        context: Option<VariableContext>,
        iterator_mark: usize,
        suspension_mark: usize,
    ) {
        let mut frames = env.take_suspension(suspension_mark);
        frames.reverse();
        *lock(&self.saved) = Some(SavedContext {
            frames,
            locals: context.map(|context| context.locals).unwrap_or_default(),
            iterators: env.split_iterators(iterator_mark),
        });
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "&{}", name),
            None => write!(
                f,
                "&closure[{}:{}]",
                self.source_file.as_deref().unwrap_or("<unknown>"),
                self.line
            ),
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
