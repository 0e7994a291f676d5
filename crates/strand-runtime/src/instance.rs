use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use indexmap::IndexMap;
use strand_core::{ir, DebugFlags, StrandError};
use tracing::{debug, trace, warn};

use crate::bridge::HostRegistry;
use crate::builtins::StandardLibrary;
use crate::callable::Callable;
use crate::engine::{
    run_script, standard_operators, Block, Completion, GeneratedSteps, Linker, StepFactory,
};
use crate::error::Fault;
use crate::io::{ConsoleStream, ProcessLauncher, StreamResource, SystemProcessLauncher};
use crate::taint::TaintModeSteps;
use crate::value::Value;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;
pub const DEFAULT_INSTANCE_NAME: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<usize>,
    pub trace_only: bool,
    pub file: Option<String>,
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.diagnostics)
            .iter()
            .map(|diagnostic| diagnostic.message.clone())
            .collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        lock(&self.diagnostics).push(diagnostic.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub description: String,
    pub file: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStatistic {
    pub function: String,
    pub line: usize,
    pub calls: u64,
    pub total: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Instance lock that the owning thread may take again while holding it.
#[derive(Debug, Default)]
pub struct InvocationLock {
    state: Mutex<LockState>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

pub struct InvocationGuard<'a> {
    lock: &'a InvocationLock,
}

impl InvocationLock {
    pub fn acquire(&self) -> InvocationGuard<'_> {
        let current = thread::current().id();
        let mut state = lock(&self.state);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(current);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == current => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        InvocationGuard { lock: self }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        lock(&self.state).owner == Some(thread::current().id())
    }
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.lock.state);
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.lock.released.notify_one();
        }
    }
}

/// Names contributed by a [`Bridge`] during installation.
#[derive(Default)]
pub struct NameTable {
    functions: IndexMap<String, Callable>,
    variables: IndexMap<String, Value>,
    operators: IndexMap<String, Callable>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&mut self, name: impl Into<String>, callable: Callable) -> &mut Self {
        self.functions.insert(name.into(), callable);
        self
    }

    pub fn variable(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn operator(&mut self, name: impl Into<String>, callable: Callable) -> &mut Self {
        self.operators.insert(name.into(), callable);
        self
    }

    pub fn get_function(&self, name: &str) -> Option<&Callable> {
        self.functions.get(name)
    }
}

pub trait Bridge {
    fn install(&self, table: &mut NameTable, instance: &Arc<ScriptInstance>);
}

#[derive(Clone, Default)]
pub struct InstanceOptions {
    pub name: Option<String>,
    pub debug_flags: Option<DebugFlags>,
    pub taint_mode: Option<bool>,
    pub max_call_depth: Option<usize>,
    pub diagnostics: Option<Arc<dyn DiagnosticSink>>,
    pub console: Option<Arc<dyn StreamResource>>,
    pub process_launcher: Option<Arc<dyn ProcessLauncher>>,
    pub host_registry: Option<Arc<HostRegistry>>,
}

pub struct ScriptInstance {
    name: String,
    flags: AtomicU32,
    taint_mode: bool,
    max_call_depth: usize,
    globals: RwLock<IndexMap<String, Value>>,
    functions: RwLock<IndexMap<String, Callable>>,
    inline_functions: RwLock<IndexMap<String, Callable>>,
    operators: RwLock<IndexMap<String, Callable>>,
    profiler: Mutex<IndexMap<String, ProfileStatistic>>,
    stack_trace: Mutex<Vec<StackFrame>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    console: Arc<dyn StreamResource>,
    launcher: Arc<dyn ProcessLauncher>,
    registry: Arc<HostRegistry>,
    lock: InvocationLock,
}

impl ScriptInstance {
    /// Builds an instance with the operator table and standard library installed.
    pub fn new(options: InstanceOptions) -> Arc<Self> {
        let flags = options
            .debug_flags
            .unwrap_or(DebugFlags::SHOW_ERRORS | DebugFlags::SHOW_WARNINGS);
        let instance = Arc::new(Self {
            name: options
                .name
                .unwrap_or_else(|| DEFAULT_INSTANCE_NAME.to_string()),
            flags: AtomicU32::new(flags.bits()),
            taint_mode: options.taint_mode.unwrap_or(false),
            max_call_depth: options.max_call_depth.unwrap_or(DEFAULT_MAX_CALL_DEPTH),
            globals: RwLock::new(IndexMap::new()),
            functions: RwLock::new(IndexMap::new()),
            inline_functions: RwLock::new(IndexMap::new()),
            operators: RwLock::new(standard_operators()
                .into_iter()
                .map(|(name, callable)| (name.to_string(), callable))
                .collect()),
            profiler: Mutex::new(IndexMap::new()),
            stack_trace: Mutex::new(Vec::new()),
            diagnostics: options.diagnostics,
            console: options
                .console
                .unwrap_or_else(|| Arc::new(ConsoleStream::default())),
            launcher: options
                .process_launcher
                .unwrap_or_else(|| Arc::new(SystemProcessLauncher)),
            registry: options.host_registry.unwrap_or_default(),
            lock: InvocationLock::default(),
        });
        instance.register_bridge(&StandardLibrary);
        let registry = instance.registry.clone();
        instance.register_bridge(registry.as_ref());
        debug!(
            instance = %instance.name,
            taint_mode = instance.taint_mode,
            flags = %flags,
            "script instance created"
        );
        instance
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug_flags(&self) -> DebugFlags {
        DebugFlags::from_bits(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_debug_flags(&self, flags: DebugFlags) {
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn taint_mode(&self) -> bool {
        self.taint_mode
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    pub fn invocation_lock(&self) -> &InvocationLock {
        &self.lock
    }

    pub fn console(&self) -> Arc<dyn StreamResource> {
        self.console.clone()
    }

    pub fn process_launcher(&self) -> Arc<dyn ProcessLauncher> {
        self.launcher.clone()
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    // bindings

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    /// Inline functions shadow regular ones.
    pub fn function(&self, name: &str) -> Option<Callable> {
        let inline = self
            .inline_functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        inline.or_else(|| {
            self.functions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned()
        })
    }

    pub fn bind_function(&self, name: &str, callable: Callable) {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), callable);
    }

    pub fn bind_inline(&self, name: &str, callable: Callable) {
        self.inline_functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), callable);
    }

    pub fn operator(&self, name: &str) -> Option<Callable> {
        self.operators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn register_bridge(self: &Arc<Self>, bridge: &dyn Bridge) {
        let mut table = NameTable::new();
        bridge.install(&mut table, self);
        for (name, callable) in table.functions {
            self.bind_function(&name, callable);
        }
        for (name, value) in table.variables {
            self.set_global(&name, value);
        }
        let mut operators = self.operators.write().unwrap_or_else(PoisonError::into_inner);
        for (name, callable) in table.operators {
            operators.insert(name, callable);
        }
    }

    // linking and running

    pub fn step_factory(&self) -> &'static dyn StepFactory {
        if self.taint_mode {
            &TaintModeSteps
        } else {
            &GeneratedSteps
        }
    }

    pub fn link(&self, block: &ir::Block) -> Result<Block, StrandError> {
        Linker::new(self.step_factory())?.link(block)
    }

    pub fn run(self: &Arc<Self>, program: &ir::Program) -> Result<Completion, Fault> {
        let block = self.link(&program.block)?;
        lock(&self.stack_trace).clear();
        run_script(self, &program.name, &block, program.source_file.clone())
    }

    // profiling and traces

    pub fn record_profile(&self, function: &str, line: usize, elapsed: Duration) {
        let mut profiler = lock(&self.profiler);
        let statistic = profiler
            .entry(function.to_string())
            .or_insert_with(|| ProfileStatistic {
                function: function.to_string(),
                line,
                calls: 0,
                total: Duration::ZERO,
            });
        statistic.calls += 1;
        statistic.total += elapsed;
    }

    /// Per-function exclusive time, largest first.
    pub fn profiler_statistics(&self) -> Vec<ProfileStatistic> {
        let mut statistics = lock(&self.profiler).values().cloned().collect::<Vec<_>>();
        statistics.sort_by(|left, right| right.total.cmp(&left.total));
        statistics
    }

    pub fn push_stack_frame(&self, frame: StackFrame) {
        lock(&self.stack_trace).push(frame);
    }

    pub fn stack_trace(&self) -> Vec<StackFrame> {
        lock(&self.stack_trace).clone()
    }

    pub fn clear_stack_trace(&self) {
        lock(&self.stack_trace).clear();
    }

    fn emit(&self, diagnostic: Diagnostic) {
        if let Some(sink) = &self.diagnostics {
            sink.emit(&diagnostic);
        }
    }

    pub fn trace(&self, message: String, line: Option<usize>, file: Option<String>) {
        trace!(instance = %self.name, ?line, "{}", message);
        self.emit(Diagnostic {
            message,
            line,
            trace_only: true,
            file,
        });
    }

    pub fn trace_taint(&self, message: String, line: Option<usize>, file: Option<String>) {
        if self.debug_flags().contains(DebugFlags::TRACE_TAINT) {
            self.trace(message, line, file);
        }
    }

    pub fn warn(&self, message: String, line: Option<usize>, file: Option<String>) {
        warn!(instance = %self.name, ?line, "{}", message);
        if self.debug_flags().contains(DebugFlags::SHOW_WARNINGS) {
            self.emit(Diagnostic {
                message,
                line,
                trace_only: false,
                file,
            });
        }
    }
}
