use std::time::Instant;

use super::environment::{Environment, Signal};
use crate::callable::Callable;
use crate::error::Fault;
use crate::instance::StackFrame;
use crate::value::Value;

pub(crate) fn describe_call(name: &str, args: &[Value]) -> String {
    format!(
        "{}({})",
        name,
        args.iter()
            .map(Value::describe)
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Invokes `target` with the argument frame on top of the frame stack.
///
/// On return the argument frame is gone and the result sits on the enclosing
/// frame. Continuation hand-offs (`callcc`) are run in a loop here rather than
/// by recursing into the target.
pub fn call_function(
    env: &mut Environment,
    target: &Callable,
    name: &str,
    line: usize,
) -> Result<Value, Fault> {
    let mut target = target.clone();
    let mut name = name.to_string();
    let mut line = line;
    loop {
        let result = call_once(env, &target, &name, line)?;
        let Signal::PassControl(next) = env.signal().clone() else {
            return Ok(result);
        };
        let instance = env.instance().clone();

        let popped = env.pop()?;
        if !popped.same_handle(&next) {
            instance.warn(
                format!(
                    "continuation expected {} on the frame, found {}",
                    next.describe(),
                    popped.describe()
                ),
                Some(line),
                env.current_file(),
            );
        }
        let Some(closure) = next.as_callable().and_then(Callable::as_closure).cloned() else {
            env.clear_signal();
            env.push(popped.clone())?;
            return Ok(popped);
        };

        let continuation = match closure.take_continuation() {
            Some(meta) => {
                line = meta.source_line;
                meta.continuation
            }
            None => {
                instance.warn(
                    format!("{} has no pending continuation", closure),
                    Some(line),
                    env.current_file(),
                );
                Value::empty()
            }
        };
        env.clear_signal();
        env.create_frame();
        env.push(continuation)?;
        name = closure.to_string();
        target = Callable::Closure(closure);
    }
}

fn call_once(
    env: &mut Environment,
    target: &Callable,
    name: &str,
    line: usize,
) -> Result<Value, Fault> {
    let instance = env.instance().clone();
    let flags = instance.debug_flags();
    let mark = env.frame_depth();
    let args = env.pop_all()?;
    let arguments = args.clone();

    if let Err(fault) = env.enter_call() {
        env.clean_to(mark);
        env.kill_frame();
        return Err(fault.or_line(line));
    }
    let started = flags.is_profiling().then(|| {
        env.start_nested_timer();
        Instant::now()
    });
    let outcome = target.invoke(env, name, args);
    env.exit_call();
    let exclusive = started.map(|started| env.stop_nested_timer(started.elapsed()));

    let value = match outcome {
        Ok(value) => value,
        Err(Fault::ForeignInvocation(fault)) => {
            env.flag_error(Value::host_fault(fault));
            Value::empty()
        }
        Err(fault) => {
            env.clean_to(mark);
            env.kill_frame();
            return Err(fault.or_line(line));
        }
    };

    if let Some(exclusive) = exclusive {
        instance.record_profile(name, line, exclusive);
    }
    if flags.is_tracing_calls() {
        let call = describe_call(name, &arguments);
        let message = match env.signal() {
            Signal::Thrown(_) => format!("{} - FAILED!", call),
            Signal::PassControl(next) => format!("{} -goto- {}", call, next.describe()),
            _ if value.is_empty() => call,
            _ => format!("{} = {}", call, value.describe()),
        };
        instance.trace(message, Some(line), env.current_file());
    }
    if matches!(env.signal(), Signal::Thrown(_)) {
        instance.push_stack_frame(StackFrame {
            description: describe_call(name, &arguments),
            file: env.current_file(),
            line,
        });
    }

    env.clean_to(mark);
    env.kill_frame();
    env.push(value.clone())?;
    Ok(value)
}
