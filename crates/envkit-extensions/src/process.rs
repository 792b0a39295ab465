//! Timeout-bounded subprocess execution
//!
//! Every external program the engine runs (install scripts, package
//! managers, validation commands, init hooks) goes through [`run_bounded`].
//! Output is drained on background threads so a chatty child cannot fill
//! its pipe and stall. On unix each command runs in its own process group,
//! and that group is killed on timeout so grandchildren die with it.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::secrets::SecretValue;

/// Extra time granted to collect output already written when the child
/// exits right at its deadline.
const PIPE_GRACE: Duration = Duration::from_millis(100);

/// A program invocation with an explicit upper bound.
#[derive(Debug, Clone)]
pub struct BoundedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Plain environment additions.
    pub env: Vec<(String, String)>,
    /// Secret environment additions; only their names are ever logged.
    pub secret_env: Vec<(String, SecretValue)>,
    pub timeout: Duration,
}

impl BoundedCommand {
    pub fn new(program: impl Into<String>, cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            env: Vec::new(),
            secret_env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn secrets(mut self, secrets: &[(String, SecretValue)]) -> Self {
        self.secret_env.extend(secrets.iter().cloned());
        self
    }

    /// `program arg1 arg2` for messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Last `lines` lines of stderr, or of stdout when stderr is empty.
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail_lines(source, lines)
    }
}

/// How a bounded process ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    Finished(ProcessOutput),
    TimedOut,
}

/// Run `command`, killing it once its timeout has passed.
///
/// The timeout also bounds output collection: a background process that
/// keeps the output pipes open after the child exits is killed along with
/// the rest of the group once the deadline passes, and whatever output was
/// read so far is returned.
///
/// Returns `Err` only when the process could not be started or waited on.
pub fn run_bounded(command: &BoundedCommand) -> std::io::Result<ProcessOutcome> {
    let secret_names: Vec<&str> = command.secret_env.iter().map(|(k, _)| k.as_str()).collect();
    tracing::debug!(
        command = %command.display(),
        cwd = %command.cwd.display(),
        secrets = ?secret_names,
        timeout_secs = command.timeout.as_secs(),
        "Spawning bounded process"
    );

    let started = Instant::now();
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    for (key, value) in &command.secret_env {
        cmd.env(key, value.expose());
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let (tx, rx) = mpsc::channel();
    let mut open = 0;
    if let Some(out) = child.stdout.take() {
        drain(out, Stream::Stdout, tx.clone());
        open += 1;
    }
    if let Some(err) = child.stderr.take() {
        drain(err, Stream::Stderr, tx.clone());
        open += 1;
    }
    drop(tx);

    let Some(status) = child.wait_timeout(command.timeout)? else {
        kill(&mut child);
        tracing::warn!(
            command = %command.display(),
            timeout_secs = command.timeout.as_secs(),
            "Process timed out and was killed"
        );
        return Ok(ProcessOutcome::TimedOut);
    };

    let deadline = started + command.timeout;
    let (stdout, stderr) = collect(&rx, open, deadline, || {
        tracing::warn!(
            command = %command.display(),
            "Background process still holds the output pipes; killing its group"
        );
        kill_group(child.id());
    });

    Ok(ProcessOutcome::Finished(ProcessOutput {
        exit_code: status.code(),
        success: status.success(),
        stdout,
        stderr,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum Chunk {
    Data(Stream, Vec<u8>),
    Closed,
}

fn drain<R: Read + Send + 'static>(mut pipe: R, stream: Stream, tx: Sender<Chunk>) {
    thread::spawn(move || {
        let mut buffer = [0u8; 8192];
        loop {
            match pipe.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(Chunk::Data(stream, buffer[..n].to_vec())).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = tx.send(Chunk::Closed);
    });
}

/// Gather output until both pipes close or `deadline` (plus a short grace)
/// passes, calling `on_overrun` once in the latter case.
fn collect(rx: &Receiver<Chunk>, mut open: usize, deadline: Instant, on_overrun: impl FnOnce()) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while open > 0 {
        let wait = deadline.saturating_duration_since(Instant::now()).max(PIPE_GRACE);
        match rx.recv_timeout(wait) {
            Ok(Chunk::Data(Stream::Stdout, bytes)) => stdout.extend_from_slice(&bytes),
            Ok(Chunk::Data(Stream::Stderr, bytes)) => stderr.extend_from_slice(&bytes),
            Ok(Chunk::Closed) => open -= 1,
            Err(RecvTimeoutError::Timeout) => {
                on_overrun();
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Chunks that arrived before the overrun was noticed.
    while let Ok(chunk) = rx.try_recv() {
        match chunk {
            Chunk::Data(Stream::Stdout, bytes) => stdout.extend_from_slice(&bytes),
            Chunk::Data(Stream::Stderr, bytes) => stderr.extend_from_slice(&bytes),
            Chunk::Closed => {}
        }
    }
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

fn kill(child: &mut Child) {
    kill_group(child.id());
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "Timed-out process already gone");
    }
    let _ = child.wait();
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. A negative pid
    // addresses the process group created for this child at spawn.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "Process group already gone"
        );
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Last `lines` lines of `text`, trimmed.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
