use std::fmt;
use std::sync::Arc;

use crate::bridge::HostFunction;
use crate::engine::{Closure, Environment};
use crate::error::Fault;
use crate::taint::{Guard, GuardKind};
use crate::value::Value;

/// Built-in function body. Arguments arrive in parameter order.
pub trait Function: Send + Sync {
    fn call(&self, env: &mut Environment, name: &str, args: Vec<Value>) -> Result<Value, Fault>;
}

impl<F> Function for F
where
    F: Fn(&mut Environment, &str, Vec<Value>) -> Result<Value, Fault> + Send + Sync,
{
    fn call(&self, env: &mut Environment, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
        self(env, name, args)
    }
}

#[derive(Clone)]
pub enum Callable {
    Native(Arc<dyn Function>),
    Closure(Arc<Closure>),
    Host(Arc<HostFunction>),
    Guard(Arc<Guard>),
}

impl Callable {
    pub fn native<F>(function: F) -> Self
    where
        F: Fn(&mut Environment, &str, Vec<Value>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(function))
    }

    /// Runs the callable without any call bookkeeping; see [`crate::engine::call_function`].
    pub fn invoke(
        &self,
        env: &mut Environment,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        match self {
            Self::Native(function) => function.call(env, name, args),
            Self::Closure(closure) => closure.invoke(env, name, args),
            Self::Host(function) => function.invoke(env, args),
            Self::Guard(guard) => guard.invoke(env, name, args),
        }
    }

    pub fn guard(&self) -> Option<GuardKind> {
        match self {
            Self::Guard(guard) => Some(guard.kind()),
            _ => None,
        }
    }

    pub fn is_sanitizer(&self) -> bool {
        self.guard() == Some(GuardKind::Sanitizer)
    }

    pub fn is_tainter(&self) -> bool {
        self.guard() == Some(GuardKind::Tainter)
    }

    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Self::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    pub fn same(&self, other: &Callable) -> bool {
        self.identity() == other.identity()
    }

    fn identity(&self) -> *const () {
        match self {
            Self::Native(function) => Arc::as_ptr(function) as *const (),
            Self::Closure(closure) => Arc::as_ptr(closure) as *const (),
            Self::Host(function) => Arc::as_ptr(function) as *const (),
            Self::Guard(guard) => Arc::as_ptr(guard) as *const (),
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => write!(f, "&native"),
            Self::Closure(closure) => write!(f, "{}", closure),
            Self::Host(function) => write!(f, "&{}", function.name()),
            Self::Guard(guard) => write!(f, "{}", guard.inner()),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guard(guard) => write!(f, "{:?}({})", guard.kind(), guard.inner()),
            other => write!(f, "{}", other),
        }
    }
}
