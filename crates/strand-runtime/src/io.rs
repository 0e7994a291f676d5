//! Stream and process resources consumed by the built-in library.

use std::collections::VecDeque;
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use strand_core::StrandError;

pub trait StreamResource: Send + Sync {
    fn read_line(&self) -> Result<Option<String>, StrandError>;
    fn read_character(&self) -> Result<Option<char>, StrandError>;
    fn print(&self, text: &str) -> Result<(), StrandError>;
    fn print_line(&self, text: &str) -> Result<(), StrandError> {
        self.print(&format!("{}\n", text))
    }
    fn close(&self);
    fn is_end(&self) -> bool;
}

pub trait ProcessHandle: Send + Sync {
    /// Exit code, or `None` when the process is still running after the timeout.
    fn wait(&self, timeout_millis: u64) -> Result<Option<i32>, StrandError>;
    fn output(&self) -> Arc<dyn StreamResource>;
}

pub trait ProcessLauncher: Send + Sync {
    fn start(
        &self,
        argv: &[String],
        env: &[(String, String)],
        cwd: Option<&str>,
    ) -> Result<Arc<dyn ProcessHandle>, StrandError>;
}

/// Host-visible handle stored inside a `HostRef` value.
#[derive(Clone)]
pub struct ProcessRef(pub Arc<dyn ProcessHandle>);

impl fmt::Debug for ProcessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessRef")
    }
}

fn io_error(error: std::io::Error) -> StrandError {
    StrandError::new("IO_STREAM", error.to_string())
}

#[derive(Debug, Default)]
pub struct ConsoleStream {
    closed: Mutex<bool>,
}

impl StreamResource for ConsoleStream {
    fn read_line(&self) -> Result<Option<String>, StrandError> {
        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line).map_err(io_error)?;
        if read == 0 {
            *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn read_character(&self) -> Result<Option<char>, StrandError> {
        let mut buffer = [0u8; 1];
        let read = std::io::stdin().lock().read(&mut buffer).map_err(io_error)?;
        Ok((read == 1).then(|| char::from(buffer[0])))
    }

    fn print(&self, text: &str) -> Result<(), StrandError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes()).map_err(io_error)?;
        stdout.flush().map_err(io_error)
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    fn is_end(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory stream: queued input lines, captured output.
#[derive(Debug, Default)]
pub struct MemoryStream {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    input: VecDeque<String>,
    output: String,
    closed: bool,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stream = Self::default();
        stream
            .lock()
            .input
            .extend(lines.into_iter().map(Into::into));
        stream
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn output(&self) -> String {
        self.lock().output.clone()
    }
}

impl StreamResource for MemoryStream {
    fn read_line(&self) -> Result<Option<String>, StrandError> {
        Ok(self.lock().input.pop_front())
    }

    fn read_character(&self) -> Result<Option<char>, StrandError> {
        let mut state = self.lock();
        let Some(line) = state.input.front_mut() else {
            return Ok(None);
        };
        if line.is_empty() {
            state.input.pop_front();
            return Ok(Some('\n'));
        }
        Ok(Some(line.remove(0)))
    }

    fn print(&self, text: &str) -> Result<(), StrandError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StrandError::new("IO_STREAM_CLOSED", "Stream is closed."));
        }
        state.output.push_str(text);
        Ok(())
    }

    fn close(&self) {
        self.lock().closed = true;
    }

    fn is_end(&self) -> bool {
        let state = self.lock();
        state.closed || state.input.is_empty()
    }
}

/// Launches real operating-system processes.
#[derive(Debug, Default)]
pub struct SystemProcessLauncher;

impl ProcessLauncher for SystemProcessLauncher {
    fn start(
        &self,
        argv: &[String],
        env: &[(String, String)],
        cwd: Option<&str>,
    ) -> Result<Arc<dyn ProcessHandle>, StrandError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(StrandError::new("IO_PROCESS_EMPTY", "No command given."));
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let mut child = command.spawn().map_err(|error| {
            StrandError::new(
                "IO_PROCESS_START",
                format!("Cannot start \"{}\": {}", program, error),
            )
        })?;
        let stdout = child.stdout.take();
        Ok(Arc::new(SystemProcess {
            child: Mutex::new(child),
            output: Arc::new(ChildOutput {
                reader: Mutex::new(stdout.map(BufReader::new)),
            }),
        }))
    }
}

struct SystemProcess {
    child: Mutex<Child>,
    output: Arc<ChildOutput>,
}

impl ProcessHandle for SystemProcess {
    fn wait(&self, timeout_millis: u64) -> Result<Option<i32>, StrandError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_millis);
        loop {
            let status = self
                .child
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_wait()
                .map_err(io_error)?;
            if let Some(status) = status {
                return Ok(Some(status.code().unwrap_or(-1)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn output(&self) -> Arc<dyn StreamResource> {
        self.output.clone()
    }
}

struct ChildOutput {
    reader: Mutex<Option<BufReader<ChildStdout>>>,
}

impl StreamResource for ChildOutput {
    fn read_line(&self) -> Result<Option<String>, StrandError> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(reader) = reader.as_mut() else {
            return Ok(None);
        };
        let mut line = String::new();
        if reader.read_line(&mut line).map_err(io_error)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn read_character(&self) -> Result<Option<char>, StrandError> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(reader) = reader.as_mut() else {
            return Ok(None);
        };
        let mut buffer = [0u8; 1];
        let read = reader.read(&mut buffer).map_err(io_error)?;
        Ok((read == 1).then(|| char::from(buffer[0])))
    }

    fn print(&self, _text: &str) -> Result<(), StrandError> {
        Err(StrandError::new(
            "IO_STREAM_READ_ONLY",
            "Process output is read-only.",
        ))
    }

    fn close(&self) {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_end(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
