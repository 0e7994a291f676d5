pub mod bridge;
pub mod builtins;
pub mod callable;
pub mod engine;
pub mod error;
pub mod instance;
pub mod io;
pub mod taint;
pub mod value;

pub use bridge::{
    HostClass, HostFunction, HostInterface, HostMethod, HostObject, HostObjectRef, HostRegistry,
    InterfaceMethod, ScriptProxy,
};
pub use callable::{Callable, Function};
pub use engine::{
    call_function, evaluate, run_script, Block, Closure, Completion, Environment, GeneratedSteps,
    Linker, Signal, Step, StepFactory,
};
pub use error::{Fault, HostFault};
pub use instance::{
    Bridge, CollectingSink, Diagnostic, DiagnosticSink, InstanceOptions, NameTable,
    ProfileStatistic, ScriptInstance, StackFrame, DEFAULT_MAX_CALL_DEPTH,
};
pub use io::{
    ConsoleStream, MemoryStream, ProcessHandle, ProcessLauncher, ProcessRef, StreamResource,
    SystemProcessLauncher,
};
pub use taint::{Guard, GuardKind, TaintModeSteps};
pub use value::{ScriptArray, ScriptMap, Value, ValueKind};

#[cfg(test)]
pub(crate) mod test_support {
    //! IR builders and instance fixtures shared by the unit tests.
    //!
    //! Expression builders return the steps that push exactly one value onto
    //! the current frame.

    use std::sync::Arc;

    use strand_core::{ir, Flow, Literal, Op, StepNode, VarScope};

    use crate::callable::Callable;
    use crate::engine::Completion;
    use crate::error::Fault;
    use crate::instance::{Bridge, InstanceOptions, NameTable, ScriptInstance};
    use crate::value::Value;

    pub(crate) const LINE: usize = 1;

    pub(crate) fn node(op: Op) -> StepNode {
        StepNode::new(LINE, op)
    }

    pub(crate) fn test_instance() -> Arc<ScriptInstance> {
        ScriptInstance::new(InstanceOptions::default())
    }

    pub(crate) fn taint_instance() -> Arc<ScriptInstance> {
        instance_with(|options| options.taint_mode = Some(true))
    }

    pub(crate) fn instance_with(configure: impl FnOnce(&mut InstanceOptions)) -> Arc<ScriptInstance> {
        let mut options = InstanceOptions::default();
        configure(&mut options);
        ScriptInstance::new(options)
    }

    pub(crate) fn lit(value: impl Into<Literal>) -> Vec<StepNode> {
        vec![node(Op::Literal {
            value: value.into(),
        })]
    }

    pub(crate) fn empty() -> Vec<StepNode> {
        vec![node(Op::Literal {
            value: Literal::Empty,
        })]
    }

    pub(crate) fn var(name: &str) -> Vec<StepNode> {
        vec![node(Op::Get {
            name: name.to_string(),
        })]
    }

    pub(crate) fn template(text: &str) -> Vec<StepNode> {
        vec![node(Op::Template {
            text: text.to_string(),
        })]
    }

    /// Opens a frame, pushes `operands` in reverse and finishes with `consumer`.
    pub(crate) fn framed(operands: Vec<Vec<StepNode>>, consumer: Op) -> Vec<StepNode> {
        let mut steps = vec![node(Op::CreateFrame)];
        for operand in operands.into_iter().rev() {
            steps.extend(operand);
        }
        steps.push(node(consumer));
        steps
    }

    pub(crate) fn op(operator: &str, operands: Vec<Vec<StepNode>>) -> Vec<StepNode> {
        framed(
            operands,
            Op::Operate {
                operator: operator.to_string(),
            },
        )
    }

    pub(crate) fn call(function: &str, args: Vec<Vec<StepNode>>) -> Vec<StepNode> {
        framed(
            args,
            Op::Call {
                function: function.to_string(),
            },
        )
    }

    pub(crate) fn method(target: Vec<StepNode>, name: &str, args: Vec<Vec<StepNode>>) -> Vec<StepNode> {
        let mut operands = vec![target];
        operands.extend(args);
        framed(
            operands,
            Op::ObjectAccess {
                method: name.to_string(),
            },
        )
    }

    pub(crate) fn index(container: Vec<StepNode>, key: Vec<StepNode>) -> Vec<StepNode> {
        framed(vec![container, key], Op::Index)
    }

    pub(crate) fn assign(name: &str, value: Vec<StepNode>) -> Vec<StepNode> {
        assign_scoped(name, VarScope::Auto, value)
    }

    pub(crate) fn assign_scoped(name: &str, scope: VarScope, value: Vec<StepNode>) -> Vec<StepNode> {
        framed(
            vec![value],
            Op::Assign {
                name: name.to_string(),
                scope,
            },
        )
    }

    pub(crate) fn flow(flow: Flow, value: Vec<StepNode>) -> Vec<StepNode> {
        framed(vec![value], Op::Return { flow })
    }

    pub(crate) fn ret(value: Vec<StepNode>) -> Vec<StepNode> {
        flow(Flow::Return, value)
    }

    pub(crate) fn throw(value: Vec<StepNode>) -> Vec<StepNode> {
        flow(Flow::Throw, value)
    }

    pub(crate) fn block(steps: Vec<StepNode>) -> ir::Block {
        ir::Block::new(steps)
    }

    pub(crate) fn closure(params: &[&str], body: Vec<StepNode>) -> Vec<StepNode> {
        vec![node(Op::CreateClosure {
            params: params.iter().map(|param| param.to_string()).collect(),
            body: block(body),
        })]
    }

    pub(crate) fn bind(function: &str, params: &[&str], body: Vec<StepNode>) -> Vec<StepNode> {
        vec![node(Op::Bind {
            function: function.to_string(),
            params: params.iter().map(|param| param.to_string()).collect(),
            body: block(body),
        })]
    }

    pub(crate) fn program(steps: Vec<StepNode>) -> ir::Program {
        ir::Program {
            name: "test".to_string(),
            source_file: Some("test.strand".to_string()),
            block: block(steps),
        }
    }

    pub(crate) fn run_outcome(
        instance: &Arc<ScriptInstance>,
        steps: Vec<StepNode>,
    ) -> Result<Completion, Fault> {
        instance.run(&program(steps))
    }

    /// Runs `steps` and returns the returned value; panics on a thrown value.
    pub(crate) fn run_with(instance: &Arc<ScriptInstance>, steps: Vec<StepNode>) -> Value {
        match run_outcome(instance, steps).expect("program should not fault") {
            Completion::Returned(value) => value,
            Completion::Thrown(value) => panic!("program threw {}", value.describe()),
        }
    }

    pub(crate) fn run(steps: Vec<StepNode>) -> Value {
        run_with(&test_instance(), steps)
    }

    /// Installs one operator.
    pub(crate) struct OperatorBridge(pub &'static str, pub Callable);

    impl Bridge for OperatorBridge {
        fn install(&self, table: &mut NameTable, _instance: &Arc<ScriptInstance>) {
            table.operator(self.0, self.1.clone());
        }
    }

    /// Installs one function.
    pub(crate) struct FunctionBridge(pub &'static str, pub Callable);

    impl Bridge for FunctionBridge {
        fn install(&self, table: &mut NameTable, _instance: &Arc<ScriptInstance>) {
            table.function(self.0, self.1.clone());
        }
    }
}
