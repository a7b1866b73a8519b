//! Cross-runtime execution over line-delimited JSON-RPC.
//!
//! One runner process is kept alive per workspace, interpreter and import
//! strategy. A runner that fails a request in any transport-level way is
//! killed and forgotten; the next request spawns a fresh one.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use super::{ErrorInfo, ErrorKind, InvocationRequest, InvocationResult};
use crate::config::{DEFAULT_TIMEOUT_MS, ENV_IMPORT_STRATEGY, ImportStrategy};
use crate::jsonrpc::{METHOD_EXIT, METHOD_RUN, Request, Response, RpcError, RunParams, RunReply, encode_line};

/// Grace period for a runner to exit after the `exit` notification
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Where and under which runtime a request should run
#[derive(Debug, Clone, Copy)]
pub struct RpcTarget<'a> {
    pub workspace: &'a Path,
    /// Runtime command line; the runner arguments are appended to it
    pub interpreter: &'a [String],
    pub module: &'a str,
    pub import_strategy: ImportStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProcessKey {
    workspace: PathBuf,
    interpreter: Vec<String>,
    import_strategy: ImportStrategy,
}

/// Transport-level failures; all of them surface as `RpcTransportError`
#[derive(Debug, thiserror::Error)]
enum TransportError {
    #[error("No interpreter configured")]
    NoInterpreter,
    #[error("Failed to start runner '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Failed to send request: {0}")]
    Write(io::Error),
    #[error("Failed to read response: {0}")]
    Read(io::Error),
    #[error("Runner closed the connection")]
    Closed,
    #[error("No response within {0}ms")]
    Timeout(u64),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: Value },
    #[error("Runner returned error {}: {}", .0.code, .0.message)]
    Remote(RpcError),
}

struct RunnerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<io::Result<String>>,
}

impl RunnerProcess {
    fn spawn(key: &ProcessKey, runner_args: &[String]) -> Result<Self, TransportError> {
        let (program, interpreter_args) = key.interpreter.split_first().ok_or(TransportError::NoInterpreter)?;

        let mut cmd = Command::new(program);
        cmd.args(interpreter_args)
            .args(runner_args)
            .env(ENV_IMPORT_STRATEGY, key.import_strategy.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if key.workspace.is_dir() {
            cmd.current_dir(&key.workspace);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;
        log::debug!("Started runner {} for {}", key.interpreter.join(" "), key.workspace.display());

        let (tx, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let label = program.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    log::debug!("[runner {label}] {line}");
                }
            });
        }

        Ok(Self {
            stdin: child.stdin.take(),
            child,
            lines,
        })
    }

    fn send(&mut self, line: &str) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(TransportError::Write)
    }

    fn receive(&self, timeout_ms: u64) -> Result<String, TransportError> {
        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        loop {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.lines.recv_timeout(remaining).map_err(|e| match e {
                        RecvTimeoutError::Timeout => TransportError::Timeout(timeout_ms),
                        RecvTimeoutError::Disconnected => TransportError::Closed,
                    })?
                }
                None => self.lines.recv().map_err(|_| TransportError::Closed)?,
            };
            let line = received.map_err(TransportError::Read)?;
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
    }

    /// Ask the runner to exit, then make sure it does.
    fn terminate(&mut self) {
        if let Ok(line) = encode_line(&Request::new(None, METHOD_EXIT, Value::Null)) {
            let _ = self.send(&line);
        }
        // Closing stdin is the runner's other cue to stop
        self.stdin = None;

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if start.elapsed() < EXIT_GRACE => thread::sleep(Duration::from_millis(10)),
                _ => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn kill(&mut self) {
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Client side of the runner protocol
pub struct RpcBackend {
    runner_args: Vec<String>,
    timeout_ms: u64,
    processes: Mutex<HashMap<ProcessKey, Arc<Mutex<RunnerProcess>>>>,
    next_id: AtomicU64,
}

impl RpcBackend {
    pub fn new(runner_args: Vec<String>, timeout_ms: u64) -> Self {
        Self {
            runner_args,
            timeout_ms,
            processes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `request` in the runner for `target`.
    ///
    /// Transport failures yield `RpcTransportError`. A fault raised by the remote
    /// module yields `InProcessException` with the remote trace as cause. Both come
    /// back with empty stdout and stderr.
    pub fn invoke(&self, target: &RpcTarget<'_>, request: &InvocationRequest) -> InvocationResult {
        let key = ProcessKey {
            workspace: target.workspace.to_path_buf(),
            interpreter: target.interpreter.to_vec(),
            import_strategy: target.import_strategy,
        };

        let process = match self.process_for(&key) {
            Ok(process) => process,
            Err(e) => return InvocationResult::failed(ErrorInfo::new(ErrorKind::RpcTransportError, e.to_string())),
        };

        match self.call(&process, target, request) {
            Ok(RunReply {
                exception: Some(exception),
                ..
            }) => {
                let summary = exception
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("Remote module raised")
                    .to_string();
                InvocationResult::failed(ErrorInfo::new(ErrorKind::InProcessException, summary).with_cause(exception))
            }
            Ok(reply) => InvocationResult::new(reply.stdout, reply.stderr),
            Err(e) => {
                self.evict(&key, &process);
                InvocationResult::failed(ErrorInfo::new(ErrorKind::RpcTransportError, e.to_string()))
            }
        }
    }

    fn call(
        &self,
        process: &Mutex<RunnerProcess>,
        target: &RpcTarget<'_>,
        request: &InvocationRequest,
    ) -> Result<RunReply, TransportError> {
        let mut process = process.lock().unwrap_or_else(PoisonError::into_inner);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = RunParams {
            module: target.module.to_string(),
            argv: request.argv.clone(),
            use_stdin: request.use_stdin,
            cwd: request.working_dir.clone(),
            source: request.source_text.clone(),
            workspace: Some(target.workspace.display().to_string()),
        };
        let params = serde_json::to_value(&params).map_err(|e| TransportError::Malformed(e.to_string()))?;
        let line = encode_line(&Request::new(Some(json!(id)), METHOD_RUN, params))
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        process.send(&line)?;
        let line = process.receive(self.timeout_ms)?;

        let response: Response = serde_json::from_str(&line).map_err(|e| TransportError::Malformed(e.to_string()))?;
        if response.id != json!(id) {
            return Err(TransportError::IdMismatch {
                expected: id,
                got: response.id,
            });
        }
        if let Some(error) = response.error {
            return Err(TransportError::Remote(error));
        }
        let result = response
            .result
            .ok_or_else(|| TransportError::Malformed("response has neither result nor error".to_string()))?;
        serde_json::from_value(result).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    fn process_for(&self, key: &ProcessKey) -> Result<Arc<Mutex<RunnerProcess>>, TransportError> {
        let mut processes = self.pool();
        if let Some(process) = processes.get(key) {
            return Ok(Arc::clone(process));
        }
        let process = Arc::new(Mutex::new(RunnerProcess::spawn(key, &self.runner_args)?));
        processes.insert(key.clone(), Arc::clone(&process));
        Ok(process)
    }

    /// Kill `failed` and drop it from the pool, unless the pool already holds a
    /// newer runner for the same key.
    fn evict(&self, key: &ProcessKey, failed: &Arc<Mutex<RunnerProcess>>) {
        {
            let mut pool = self.pool();
            if pool.get(key).is_some_and(|current| Arc::ptr_eq(current, failed)) {
                pool.remove(key);
            }
        }
        log::debug!("Discarding runner {} for {}", key.interpreter.join(" "), key.workspace.display());
        failed.lock().unwrap_or_else(PoisonError::into_inner).kill();
    }

    /// Number of live runner processes
    pub fn running(&self) -> usize {
        self.pool().len()
    }

    /// Stop every runner. Later requests start new ones.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.pool().drain().collect();
        for (key, process) in drained {
            log::debug!("Stopping runner {} for {}", key.interpreter.join(" "), key.workspace.display());
            process.lock().unwrap_or_else(PoisonError::into_inner).terminate();
        }
    }

    fn pool(&self) -> MutexGuard<'_, HashMap<ProcessKey, Arc<Mutex<RunnerProcess>>>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RpcBackend {
    fn default() -> Self {
        Self::new(vec!["runner".to_string()], DEFAULT_TIMEOUT_MS)
    }
}

impl Drop for RpcBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
