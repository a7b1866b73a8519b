//! Execution of tool executables as child processes.
//!
//! Output is drained on reader threads so a chatty tool never blocks on a full
//! pipe, and stdin is fed from a thread of its own. The optional timeout bounds
//! the whole call: runaway children are killed and pipes still held open by
//! their descendants are abandoned.

use std::io::{self, Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use super::{ErrorInfo, ErrorKind, InvocationRequest, InvocationResult};
use crate::config::DEFAULT_TIMEOUT_MS;
use crate::utils::line_ending::{LineEnding, detect_line_ending, normalize_line_ending};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the executable named by `argv[0]`
pub struct DirectPathBackend {
    /// Timeout in milliseconds; 0 waits forever
    timeout_ms: u64,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Chunk = (Stream, io::Result<String>);

/// Why captured output could not be collected
enum CaptureError {
    /// The deadline passed with a pipe still open, typically held by a grandchild
    Deadline,
    Read(String),
}

impl DirectPathBackend {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }

    /// Spawn the executable and capture its output.
    ///
    /// A non-zero exit is reported through `exit_code` only; the tool may well be
    /// reporting findings that way. Failing to launch is `ExecutableNotFound`.
    /// The timeout covers feeding stdin, waiting and collecting output.
    pub fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        let Some(program) = request.argv.first() else {
            return InvocationResult::failed(ErrorInfo::new(ErrorKind::ExecutableNotFound, "Empty command"));
        };

        let mut cmd = Command::new(program);
        cmd.args(&request.argv[1..])
            .current_dir(&request.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let stdin_text = request.stdin_text();
        if stdin_text.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return InvocationResult::failed(
                    ErrorInfo::new(ErrorKind::ExecutableNotFound, format!("Failed to launch '{program}'"))
                        .with_cause(format!("{e} (cwd: {})", request.working_dir.display())),
                );
            }
        };
        let deadline = (self.timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(self.timeout_ms));

        let (tx, output) = mpsc::channel();
        let mut pending = 0;
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(Stream::Stdout, stdout, tx.clone());
            pending += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(Stream::Stderr, stderr, tx.clone());
            pending += 1;
        }
        drop(tx);

        let writer = match (stdin_text, child.stdin.take()) {
            (Some(text), Some(stdin)) => {
                let text = match detect_line_ending(text) {
                    LineEnding::Lf => text.to_string(),
                    LineEnding::Crlf | LineEnding::Mixed => normalize_line_ending(text, LineEnding::Lf),
                };
                let label = program.clone();
                Some(thread::spawn(move || feed_stdin(stdin, &text, &label)))
            }
            _ => None,
        };

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return wait_failed(program, e),
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let _ = child.kill();
                let _ = child.wait();
                // Reader and writer threads are left to finish on their own
                return self.timed_out(program);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let (stdout, stderr) = match collect_output(&output, pending, deadline) {
            Ok(captured) => captured,
            Err(CaptureError::Deadline) => return self.timed_out(program),
            Err(CaptureError::Read(cause)) => {
                return InvocationResult::failed(
                    ErrorInfo::new(ErrorKind::ProcessFailed, format!("Failed to capture output of '{program}'"))
                        .with_cause(cause),
                );
            }
        };

        // A writer still blocked here is stuck on a pipe some grandchild kept open
        if let Some(writer) = writer.filter(|w| w.is_finished())
            && let Ok(Err(e)) = writer.join()
        {
            return InvocationResult::failed(
                ErrorInfo::new(ErrorKind::ProcessFailed, format!("Failed to write to stdin of '{program}'"))
                    .with_cause(e.to_string()),
            );
        }

        InvocationResult {
            stdout,
            stderr,
            failure: None,
            exit_code: Some(status.code().unwrap_or(-1)),
        }
    }

    fn timed_out(&self, program: &str) -> InvocationResult {
        InvocationResult::failed(ErrorInfo::new(
            ErrorKind::ProcessFailed,
            format!("'{program}' timed out after {}ms", self.timeout_ms),
        ))
    }
}

impl Default for DirectPathBackend {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: Stream, mut pipe: R, tx: Sender<Chunk>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let text = pipe
            .read_to_end(&mut buf)
            .map(|_| String::from_utf8_lossy(&buf).into_owned());
        // The receiver is gone once the invocation gave up on this child
        let _ = tx.send((stream, text));
    });
}

/// Write the document and close the pipe. A tool that exits or closes stdin
/// without reading everything is not an error.
fn feed_stdin(mut stdin: ChildStdin, text: &str, program: &str) -> io::Result<()> {
    match stdin.write_all(text.as_bytes()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            log::debug!("'{program}' closed stdin early");
            Ok(())
        }
        other => other,
    }
}

/// Gather stdout and stderr from the reader threads, giving up at `deadline`.
fn collect_output(
    output: &Receiver<Chunk>,
    mut pending: usize,
    deadline: Option<Instant>,
) -> Result<(String, String), CaptureError> {
    let (mut stdout, mut stderr) = (String::new(), String::new());
    while pending > 0 {
        let (stream, text) = match deadline {
            Some(deadline) => output
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .map_err(|e| match e {
                    RecvTimeoutError::Timeout => CaptureError::Deadline,
                    RecvTimeoutError::Disconnected => CaptureError::Read("Output reader thread panicked".to_string()),
                })?,
            None => output
                .recv()
                .map_err(|_| CaptureError::Read("Output reader thread panicked".to_string()))?,
        };
        let text = text.map_err(|e| CaptureError::Read(format!("Failed to read output: {e}")))?;
        match stream {
            Stream::Stdout => stdout = text,
            Stream::Stderr => stderr = text,
        }
        pending -= 1;
    }
    Ok((stdout, stderr))
}

fn wait_failed(program: &str, e: io::Error) -> InvocationResult {
    InvocationResult::failed(
        ErrorInfo::new(ErrorKind::ProcessFailed, format!("Failed to wait for '{program}'")).with_cause(e.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(argv: &[&str], source: Option<&str>) -> InvocationRequest {
        InvocationRequest {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            use_stdin: source.is_some(),
            working_dir: std::env::temp_dir(),
            source_text: source.map(str::to_string),
        }
    }

    #[test]
    fn test_executable_not_found() {
        let backend = DirectPathBackend::default();
        let result = backend.invoke(&request(&["nonexistent-tool-xyz123"], None));
        assert_eq!(result.failure_kind(), Some(ErrorKind::ExecutableNotFound));
        assert!(result.stdout.is_empty());
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn test_empty_command() {
        let result = DirectPathBackend::default().invoke(&request(&[], None));
        assert_eq!(result.failure_kind(), Some(ErrorKind::ExecutableNotFound));
    }

    #[test]
    fn test_missing_working_dir_is_launch_failure() {
        let mut req = request(&["cat"], None);
        req.working_dir = PathBuf::from("/no/such/dir/for/toolbridge");
        let result = DirectPathBackend::default().invoke(&req);
        assert_eq!(result.failure_kind(), Some(ErrorKind::ExecutableNotFound));
    }

    #[test]
    #[cfg(unix)]
    fn test_stdin_is_normalized_to_lf() {
        let result = DirectPathBackend::default().invoke(&request(&["cat"], Some("a\r\nb\r\n")));
        assert!(result.is_success());
        assert_eq!(result.stdout, "a\nb\n");
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    #[cfg(unix)]
    fn test_non_zero_exit_is_not_a_failure() {
        let result = DirectPathBackend::default().invoke(&request(&["sh", "-c", "echo finding >&2; exit 3"], None));
        assert!(result.is_success());
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr, "finding\n");
    }

    #[test]
    #[cfg(unix)]
    fn test_working_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(&["pwd"], None);
        req.working_dir = dir.path().to_path_buf();
        let result = DirectPathBackend::default().invoke(&req);
        let reported = PathBuf::from(result.stdout.trim());
        assert_eq!(reported.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_kills_child() {
        let backend = DirectPathBackend::new(50);
        let result = backend.invoke(&request(&["sleep", "5"], None));
        assert_eq!(result.failure_kind(), Some(ErrorKind::ProcessFailed));
        assert!(result.failure.unwrap().message.contains("timed out"));
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_covers_unread_stdin() {
        // 4 MiB never fits in a pipe buffer, so the write blocks until the child dies
        let document = "x".repeat(4 * 1024 * 1024);
        let start = Instant::now();
        let result = DirectPathBackend::new(100).invoke(&request(&["sh", "-c", "sleep 3"], Some(document.as_str())));
        assert_eq!(result.failure_kind(), Some(ErrorKind::ProcessFailed));
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_does_not_wait_for_grandchild() {
        // The shell forks `sleep`, which inherits stdout and outlives the kill
        let start = Instant::now();
        let result = DirectPathBackend::new(100).invoke(&request(&["sh", "-c", "sleep 3; true"], None));
        assert_eq!(result.failure_kind(), Some(ErrorKind::ProcessFailed));
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    }

    #[test]
    #[cfg(unix)]
    fn test_background_grandchild_holding_stdout_hits_deadline() {
        let start = Instant::now();
        let result = DirectPathBackend::new(200).invoke(&request(&["sh", "-c", "sleep 3 & echo started"], None));
        assert_eq!(result.failure_kind(), Some(ErrorKind::ProcessFailed));
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    }

    #[test]
    #[cfg(unix)]
    fn test_large_stdin_is_fully_delivered() {
        let document = "line\n".repeat(100_000);
        let result = DirectPathBackend::default().invoke(&request(&["wc", "-l"], Some(document.as_str())));
        assert!(result.is_success());
        assert_eq!(result.stdout.trim(), "100000");
    }
}
