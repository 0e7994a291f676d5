use std::fmt;
use std::sync::{Arc, Weak};

use rhai::Dynamic;
use strand_core::DebugFlags;

use super::convert::{build_argument, value_from_host};
use super::registry::{HostInterface, InterfaceMethod};
use crate::callable::Callable;
use crate::engine::{call_function, describe_call, Environment, Signal};
use crate::error::HostFault;
use crate::instance::ScriptInstance;
use crate::value::Value;

/// An object living on the host side of the bridge.
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn implements(&self, _interface: &str) -> bool {
        false
    }

    fn invoke(&self, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, HostFault>;

    /// The script callable behind a proxy, if this object is one.
    fn script_callable(&self) -> Option<Callable> {
        None
    }
}

#[derive(Clone)]
pub struct HostObjectRef(Arc<dyn HostObject>);

impl HostObjectRef {
    pub fn new(object: impl HostObject + 'static) -> Self {
        Self(Arc::new(object))
    }

    pub fn type_name(&self) -> &str {
        self.0.type_name()
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.0.implements(interface)
    }

    pub fn invoke(&self, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, HostFault> {
        self.0.invoke(method, args)
    }

    pub fn script_callable(&self) -> Option<Callable> {
        self.0.script_callable()
    }
}

impl fmt::Debug for HostObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObjectRef({})", self.type_name())
    }
}

/// Adapts one script callable to a set of host interfaces.
///
/// Every interface method is routed to the same callable, named after the
/// method. The proxy holds its instance weakly so it cannot keep a dropped
/// instance alive.
pub struct ScriptProxy {
    instance: Weak<ScriptInstance>,
    callable: Callable,
    type_name: String,
    interfaces: Vec<HostInterface>,
}

impl ScriptProxy {
    pub fn new(
        instance: &Arc<ScriptInstance>,
        callable: Callable,
        type_name: impl Into<String>,
        interfaces: Vec<HostInterface>,
    ) -> Self {
        Self {
            instance: Arc::downgrade(instance),
            callable,
            type_name: type_name.into(),
            interfaces,
        }
    }

    fn method(&self, name: &str, arity: usize) -> Option<&InterfaceMethod> {
        self.interfaces
            .iter()
            .flat_map(|interface| interface.methods.iter())
            .find(|method| method.name == name && method.params.len() == arity)
    }
}

impl HostObject for ScriptProxy {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn implements(&self, interface: &str) -> bool {
        self.type_name == interface
            || self
                .interfaces
                .iter()
                .any(|candidate| candidate.name == interface)
    }

    fn invoke(&self, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, HostFault> {
        let declared = self.method(method, args.len()).ok_or_else(|| {
            HostFault::new(format!(
                "{} has no method {} taking {} arguments",
                self.type_name,
                method,
                args.len()
            ))
        })?;
        let instance = self
            .instance
            .upgrade()
            .ok_or_else(|| HostFault::new("script instance is gone"))?;
        let _guard = instance.invocation_lock().acquire();

        let values = args.into_iter().map(value_from_host).collect::<Vec<_>>();
        if instance.debug_flags().contains(DebugFlags::TRACE_CALLS) {
            instance.trace(
                format!("proxy {}.{}", self.type_name, describe_call(method, &values)),
                None,
                None,
            );
        }

        let mut env = Environment::new(instance.clone());
        env.create_frame();
        env.create_frame();
        for value in values.into_iter().rev() {
            env.push(value).map_err(HostFault::escaped)?;
        }
        let result =
            call_function(&mut env, &self.callable, method, 0).map_err(HostFault::escaped)?;

        if let Signal::Thrown(thrown) = env.take_signal() {
            return Err(thrown
                .as_host_fault()
                .unwrap_or_else(|| HostFault::thrown(thrown)));
        }
        if declared.returns.is_void() {
            return Ok(Dynamic::UNIT);
        }
        build_argument(&result, &declared.returns, &instance)
    }

    fn script_callable(&self) -> Option<Callable> {
        Some(self.callable.clone())
    }
}

#[cfg(test)]
mod proxy_tests {
    use super::*;
    use crate::bridge::HostRegistry;
    use crate::instance::InstanceOptions;
    use crate::test_support::{call, ret, run_with, FunctionBridge};
    use rhai::ImmutableString;
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;
    use strand_core::HostType;

    fn comparator_instance() -> Arc<ScriptInstance> {
        let mut registry = HostRegistry::new();
        registry.register_interface(HostInterface::new("Comparator").method(InterfaceMethod::new(
            "compare",
            vec![HostType::Any, HostType::Any],
            HostType::Int,
        )));
        registry.register_interface(HostInterface::new("Listener").method(InterfaceMethod::new(
            "fire",
            vec![HostType::String],
            HostType::Void,
        )));
        ScriptInstance::new(InstanceOptions {
            host_registry: Some(Arc::new(registry)),
            ..InstanceOptions::default()
        })
    }

    fn proxy(instance: &Arc<ScriptInstance>, callable: Callable, interface: &str) -> HostObjectRef {
        let argument = build_argument(
            &Value::callable(callable),
            &HostType::interface(interface),
            instance,
        )
        .expect("proxy");
        argument.cast::<HostObjectRef>()
    }

    #[test]
    fn proxy_result_is_converted_to_the_declared_return_type() {
        let instance = comparator_instance();
        let comparator = proxy(
            &instance,
            Callable::native(|_, name, args| {
                assert_eq!(name, "compare");
                Ok(Value::from(args[0].to_integer() - args[1].to_integer()))
            }),
            "Comparator",
        );
        assert!(comparator.implements("Comparator"));
        let result = comparator
            .invoke("compare", vec![Dynamic::from_int(9), Dynamic::from_int(4)])
            .expect("compare");
        assert_eq!(result.cast::<i32>(), 5);
    }

    #[test]
    fn void_methods_discard_results_and_thrown_values_become_faults() {
        let instance = comparator_instance();
        let listener = proxy(
            &instance,
            Callable::native(|_, _, args| Ok(args[0].clone())),
            "Listener",
        );
        let result = listener
            .invoke("fire", vec![Dynamic::from(ImmutableString::from("ping"))])
            .expect("fire");
        assert!(result.is_unit());

        let failing = proxy(
            &instance,
            Callable::native(|env, _, _| {
                env.flag_error(Value::from("bad listener"));
                Ok(Value::empty())
            }),
            "Listener",
        );
        let fault = failing
            .invoke("fire", vec![Dynamic::from(ImmutableString::from("ping"))])
            .expect_err("thrown");
        assert_eq!(fault.message, "bad listener");
        assert_eq!(fault.payload.as_deref(), Some(&Value::from("bad listener")));
    }

    #[test]
    fn proxies_unwrap_back_to_their_callable() {
        let instance = comparator_instance();
        let callable = Callable::native(|_, _, _| Ok(Value::empty()));
        let wrapped = proxy(&instance, callable.clone(), "Listener");
        let value = value_from_host(Dynamic::from(wrapped));
        assert!(value.as_callable().is_some_and(|inner| inner.same(&callable)));
    }

    #[test]
    fn unknown_methods_fault() {
        let instance = comparator_instance();
        let listener = proxy(
            &instance,
            Callable::native(|_, _, _| Ok(Value::empty())),
            "Listener",
        );
        assert!(listener.invoke("close", Vec::new()).is_err());
    }

    #[test]
    fn proxy_calls_from_other_threads_wait_for_the_running_script() {
        let instance = comparator_instance();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let hold_log = log.clone();
        instance.register_bridge(&FunctionBridge(
            "hold",
            Callable::native(move |_, _, _| {
                started_tx.lock().expect("lock").send(()).expect("started");
                release_rx.lock().expect("lock").recv().expect("release");
                hold_log.lock().expect("lock").push("hold");
                Ok(Value::from("held"))
            }),
        ));
        let fire_log = log.clone();
        let listener = proxy(
            &instance,
            Callable::native(move |_, _, _| {
                fire_log.lock().expect("lock").push("fire");
                Ok(Value::empty())
            }),
            "Listener",
        );

        let runner = {
            let instance = instance.clone();
            thread::spawn(move || run_with(&instance, ret(call("hold", Vec::new()))))
        };
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("script should start");

        let (done_tx, done_rx) = mpsc::channel();
        let caller = thread::spawn(move || {
            let result =
                listener.invoke("fire", vec![Dynamic::from(ImmutableString::from("ping"))]);
            done_tx.send(result.is_ok()).expect("done");
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(log.lock().expect("lock").is_empty());

        release_tx.send(()).expect("release");
        assert!(done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("proxy call should finish after the script"));
        assert_eq!(runner.join().expect("runner"), Value::from("held"));
        caller.join().expect("caller");
        assert_eq!(*log.lock().expect("lock"), vec!["hold", "fire"]);
    }
}
