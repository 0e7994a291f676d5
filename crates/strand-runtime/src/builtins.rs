//! Functions installed into every instance.

use std::sync::Arc;

use rhai::Dynamic;
use strand_core::StrandError;

use crate::callable::Callable;
use crate::engine::Environment;
use crate::error::{Fault, HostFault};
use crate::instance::{Bridge, NameTable, ScriptInstance};
use crate::io::{ProcessRef, StreamResource};
use crate::taint::{Guard, GuardKind};
use crate::value::{ScriptArray, ScriptMap, Value, ValueKind};

pub const DEFAULT_WAIT_MILLIS: u64 = 60_000;

fn stream_fault(error: StrandError) -> Fault {
    HostFault::new(error.message).into()
}

fn first(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or_default()
}

fn text_of(args: &[Value]) -> String {
    args.iter().map(ToString::to_string).collect()
}

fn process_of(value: &Value) -> Option<ProcessRef> {
    value
        .as_host()
        .and_then(|host| host.clone().try_cast::<ProcessRef>())
}

fn println(env: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let console = env.instance().console();
    console.print_line(&text_of(&args)).map_err(stream_fault)?;
    Ok(Value::empty())
}

fn print(env: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let console = env.instance().console();
    console.print(&text_of(&args)).map_err(stream_fault)?;
    Ok(Value::empty())
}

/// Reads a line from the console, or from a process given as argument.
fn readln(env: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let stream: Arc<dyn StreamResource> = match args.first() {
        Some(value) if !value.is_empty() => match process_of(value) {
            Some(process) => process.0.output(),
            None => {
                return Err(
                    HostFault::new(format!("cannot read from {}", value.describe())).into(),
                )
            }
        },
        _ => env.instance().console(),
    };
    let line = stream.read_line().map_err(stream_fault)?;
    Ok(line.map(Value::from).unwrap_or_default())
}

fn size(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let value = first(args);
    let size = match value.kind() {
        ValueKind::Array(array) => array.len(),
        ValueKind::Map(map) => map.len(),
        ValueKind::String(text) => text.chars().count(),
        _ => 0,
    };
    Ok(Value::from(size as i64))
}

fn push(env: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let mut args = args.into_iter();
    let target = args.next().unwrap_or_default();
    let Some(array) = target.as_array() else {
        env.flag_error(Value::from(format!("cannot push onto {}", target.describe())));
        return Ok(Value::empty());
    };
    for value in args {
        array.push(value);
    }
    Ok(Value::from(array.len() as i64))
}

fn pop(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(first(args).pop_element().unwrap_or_default())
}

fn keys(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let map = first(args);
    let keys = map
        .items()
        .into_iter()
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
    Ok(Value::from(keys))
}

fn values(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let container = first(args);
    let values = container
        .items()
        .into_iter()
        .map(|(_, value)| value)
        .collect::<Vec<_>>();
    Ok(Value::from(values))
}

fn array(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(Value::array(ScriptArray::from_vec(args)))
}

/// `map(key, value, key, value, ...)`; a trailing key maps to empty.
fn map(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let map = ScriptMap::new();
    for pair in args.chunks(2) {
        let value = pair.get(1).cloned().unwrap_or_default();
        map.insert(&pair[0], value);
    }
    Ok(Value::map(map))
}

fn copy(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(first(args).copy())
}

fn identity(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(first(args))
}

fn is_tainted(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(Value::boolean(first(args).is_tainted()))
}

/// `exec(command, env, cwd)`: `command` is an argv array or a
/// whitespace-separated string, `env` an optional map.
fn exec(env: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let mut args = args.into_iter();
    let command = args.next().unwrap_or_default();
    let argv = match command.as_array() {
        Some(array) => array.snapshot().iter().map(ToString::to_string).collect(),
        None => command
            .to_string()
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>(),
    };
    let variables = args
        .next()
        .and_then(|value| value.as_map().map(ScriptMap::entries))
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect::<Vec<_>>();
    let cwd = args
        .next()
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string());

    let launcher = env.instance().process_launcher();
    let process = launcher
        .start(&argv, &variables, cwd.as_deref())
        .map_err(stream_fault)?;
    Ok(Value::host(Dynamic::from(ProcessRef(process))))
}

/// `wait(process, timeout_ms)`: exit code, or empty on timeout.
fn wait(_: &mut Environment, _: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let target = args.first().cloned().unwrap_or_default();
    let Some(process) = process_of(&target) else {
        return Err(HostFault::new(format!("cannot wait for {}", target.describe())).into());
    };
    let timeout = args
        .get(1)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_integer().max(0) as u64)
        .unwrap_or(DEFAULT_WAIT_MILLIS);
    let status = process.0.wait(timeout).map_err(stream_fault)?;
    Ok(status.map(|code| Value::from(i64::from(code))).unwrap_or_default())
}

/// Installs the built-in functions. `readln` and `exec` only carry their
/// taint guards when the instance runs in taint mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardLibrary;

impl Bridge for StandardLibrary {
    fn install(&self, table: &mut NameTable, instance: &Arc<ScriptInstance>) {
        let taint_mode = instance.taint_mode();
        let guarded = |kind: GuardKind, callable: Callable| {
            if taint_mode {
                Guard::wrap(kind, callable)
            } else {
                callable
            }
        };
        table
            .function("println", Callable::native(println))
            .function("print", Callable::native(print))
            .function("readln", guarded(GuardKind::Tainter, Callable::native(readln)))
            .function("size", Callable::native(size))
            .function("push", Callable::native(push))
            .function("pop", Callable::native(pop))
            .function("keys", Callable::native(keys))
            .function("values", Callable::native(values))
            .function("array", Callable::native(array))
            .function("map", Callable::native(map))
            .function("copy", Callable::native(copy))
            .function(
                "taint",
                Guard::wrap(GuardKind::Tainter, Callable::native(identity)),
            )
            .function(
                "untaint",
                Guard::wrap(GuardKind::Sanitizer, Callable::native(identity)),
            )
            .function(
                "is_tainted",
                Guard::wrap(GuardKind::Sanitizer, Callable::native(is_tainted)),
            )
            .function("exec", guarded(GuardKind::Sensitive, Callable::native(exec)))
            .function("wait", Callable::native(wait));
    }
}
