use std::sync::Arc;

use super::reject_tainted;
use crate::callable::Callable;
use crate::engine::Environment;
use crate::error::Fault;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Result is always clean.
    Sanitizer,
    /// Tainted arguments are refused before the call.
    Sensitive,
    /// Non-empty results are tainted.
    Tainter,
}

/// Wraps a callable with a taint policy.
pub struct Guard {
    kind: GuardKind,
    inner: Callable,
}

impl Guard {
    pub fn new(kind: GuardKind, inner: Callable) -> Self {
        Self { kind, inner }
    }

    pub fn wrap(kind: GuardKind, inner: Callable) -> Callable {
        Callable::Guard(Arc::new(Self::new(kind, inner)))
    }

    pub fn kind(&self) -> GuardKind {
        self.kind
    }

    pub fn inner(&self) -> &Callable {
        &self.inner
    }

    pub(crate) fn invoke(
        &self,
        env: &mut Environment,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        match self.kind {
            GuardKind::Sanitizer => Ok(self.inner.invoke(env, name, args)?.untainted()),
            GuardKind::Sensitive => {
                reject_tainted(name, &args)?;
                self.inner.invoke(env, name, args)
            }
            GuardKind::Tainter => {
                let value = self.inner.invoke(env, name, args)?;
                if value.is_empty() {
                    return Ok(value);
                }
                Ok(value.tainted())
            }
        }
    }
}

#[cfg(test)]
mod guard_tests {
    use super::*;
    use crate::test_support::test_instance;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo() -> Callable {
        Callable::native(|_, _, args| Ok(args.into_iter().next().unwrap_or_default()))
    }

    #[test]
    fn sanitizer_strips_and_tainter_marks() {
        let mut env = Environment::new(test_instance());
        let clean = Guard::wrap(GuardKind::Sanitizer, echo())
            .invoke(&mut env, "untaint", vec![Value::from("x").tainted()])
            .expect("sanitize");
        assert!(!clean.is_tainted());
        assert_eq!(clean, Value::from("x"));

        let dirty = Guard::wrap(GuardKind::Tainter, echo())
            .invoke(&mut env, "taint", vec![Value::from("x")])
            .expect("taint");
        assert!(dirty.is_tainted());
        let nothing = Guard::wrap(GuardKind::Tainter, echo())
            .invoke(&mut env, "taint", Vec::new())
            .expect("empty");
        assert!(!nothing.is_tainted());
    }

    #[test]
    fn sensitive_guard_refuses_before_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let sink = Guard::wrap(
            GuardKind::Sensitive,
            Callable::native(move |_, _, _| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Value::empty())
            }),
        );
        let mut env = Environment::new(test_instance());
        let fault = sink
            .invoke(&mut env, "exec", vec![Value::from("ls"), Value::from("; rm").tainted()])
            .expect_err("refused");
        assert_eq!(fault.code(), "SECURITY_TAINTED_ARGUMENT");
        assert!(fault.to_string().contains("exec"));
        assert!(fault.to_string().contains("'; rm'"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        sink.invoke(&mut env, "exec", vec![Value::from("ls")])
            .expect("clean call");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
