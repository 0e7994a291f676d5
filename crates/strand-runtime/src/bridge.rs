//! Marshalling bridge between script values and host objects.

mod convert;
mod matching;
mod proxy;
mod registry;

use std::sync::Arc;

use indexmap::IndexSet;
use rhai::Dynamic;
use strand_core::HostType;

pub use convert::{build_argument, value_from_host};
pub use matching::{grade, grade_call, infer_element_type, resolve_overload, Grade};
pub use proxy::{HostObject, HostObjectRef, ScriptProxy};
pub use registry::{
    HostClass, HostInterface, HostInvoker, HostMethod, HostRegistry, InterfaceMethod,
};

use crate::callable::Callable;
use crate::engine::{describe_call, Environment};
use crate::error::{Fault, HostFault};
use crate::instance::{Bridge, NameTable, ScriptInstance};
use crate::taint::reject_tainted;
use crate::value::{Value, ValueKind};

/// Static host methods exposed to scripts as `Class.method` functions.
#[derive(Debug)]
pub struct HostFunction {
    name: String,
    overloads: Vec<HostMethod>,
}

impl HostFunction {
    pub fn new(name: impl Into<String>, overloads: Vec<HostMethod>) -> Self {
        Self {
            name: name.into(),
            overloads,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overloads(&self) -> &[HostMethod] {
        &self.overloads
    }

    pub(crate) fn invoke(&self, env: &mut Environment, args: Vec<Value>) -> Result<Value, Fault> {
        call_overloads(env, &self.name, &self.overloads, None, args)
    }
}

impl Bridge for HostRegistry {
    fn install(&self, table: &mut NameTable, _instance: &Arc<ScriptInstance>) {
        for class in self.classes() {
            let names = class
                .methods
                .iter()
                .filter(|method| method.is_static)
                .map(|method| method.name.clone())
                .collect::<IndexSet<_>>();
            for name in names {
                let qualified = format!("{}.{}", class.name, name);
                let function = HostFunction::new(qualified.clone(), class.overloads(&name, true));
                table.function(qualified, Callable::Host(Arc::new(function)));
            }
        }
    }
}

/// Picks an overload for `args`, converts them and calls it.
fn call_overloads(
    env: &mut Environment,
    label: &str,
    candidates: &[HostMethod],
    receiver: Option<Dynamic>,
    args: Vec<Value>,
) -> Result<Value, Fault> {
    let instance = env.instance().clone();
    let registry = instance.registry().clone();
    let method = resolve_overload(candidates, &args, &registry).ok_or_else(|| {
        HostFault::new(format!("no overload matches {}", describe_call(label, &args)))
    })?;
    if instance.taint_mode() && method.sensitive {
        reject_tainted(label, &args)?;
    }
    let mut converted = Vec::with_capacity(args.len());
    for (value, param) in args.iter().zip(&method.params) {
        converted.push(build_argument(value, param, &instance)?);
    }
    let result = method.call(receiver, converted)?;
    if method.returns.is_void() {
        return Ok(Value::empty());
    }
    Ok(value_from_host(result))
}

/// `ObjectNew`: constructs a registered host class.
pub(crate) fn construct(env: &mut Environment, class: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let registry = env.instance().registry().clone();
    let Some(descriptor) = registry.class(class) else {
        return Err(HostFault::new(format!("unknown host class {}", class)).into());
    };
    call_overloads(
        env,
        &format!("new {}", descriptor.name),
        &descriptor.constructors,
        None,
        args,
    )
}

/// `ObjectAccess` on anything that is not a script callable.
///
/// Host references dispatch to their registered class, falling back to the
/// object's own `invoke`; a string naming a registered class reaches its
/// static methods.
pub(crate) fn invoke_method(
    env: &mut Environment,
    target: &Value,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, Fault> {
    let instance = env.instance().clone();
    let registry = instance.registry().clone();
    match target.kind() {
        ValueKind::HostRef(host) => {
            if let Some(class) = registry.class_of(host) {
                let overloads = class.overloads(method, false);
                if !overloads.is_empty() {
                    let label = format!("{}.{}", class.name, method);
                    return call_overloads(env, &label, &overloads, Some(host.clone()), args);
                }
            }
            if let Some(object) = host.clone().try_cast::<HostObjectRef>() {
                let mut converted = Vec::with_capacity(args.len());
                for value in &args {
                    converted.push(build_argument(value, &HostType::Any, &instance)?);
                }
                return Ok(value_from_host(object.invoke(method, converted)?));
            }
            Err(HostFault::new(format!("{} has no method {}", target.describe(), method)).into())
        }
        ValueKind::String(name) => match registry.class(name) {
            Some(class) => {
                let label = format!("{}.{}", class.name, method);
                call_overloads(env, &label, &class.overloads(method, true), None, args)
            }
            None => Err(HostFault::new(format!("unknown host class {}", name)).into()),
        },
        _ => Err(HostFault::new(format!(
            "cannot call method {} on {}",
            method,
            target.describe()
        ))
        .into()),
    }
}
