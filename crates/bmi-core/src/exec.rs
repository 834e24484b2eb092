//! Bounded execution of external tools.
//!
//! Storage and export providers shell out to `rbd` and `service`. Keeping the
//! process plumbing here lets those crates stay focused on argument building
//! and output parsing, and lets tests swap in fake binaries.

use crate::error::{BmiError, BmiResult};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Prefer stderr, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        self.stdout.trim().to_string()
    }

    /// Diagnostic text suitable for an error message, never empty.
    pub fn describe(&self) -> String {
        let diagnostic = self.diagnostic();
        if diagnostic.is_empty() {
            format!("exit code {}", self.status)
        } else {
            format!("{diagnostic} (exit code {})", self.status)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    binary: PathBuf,
    prefix: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            prefix: Vec::new(),
            timeout: Some(timeout),
        }
    }

    /// Runner that waits for the child to exit however long it takes.
    pub fn unbounded(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            prefix: Vec::new(),
            timeout: None,
        }
    }

    /// Arguments inserted ahead of every invocation (e.g. `--id admin`).
    pub fn with_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the binary with `args`, feeding `input` on stdin when provided.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`CommandOutput::status`]. Spawn failures are reported as
    /// [`BmiError::Io`]; a bounded runner reports an expired deadline as
    /// [`BmiError::Storage`].
    pub fn run(&self, args: &[&str], input: Option<&[u8]>) -> BmiResult<CommandOutput> {
        let mut command = Command::new(&self.binary);
        command.args(&self.prefix);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        if input.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        log::debug!("exec: {} {}", self.binary.display(), args.join(" "));
        let mut child = command.spawn()?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload)?;
                stdin.flush().ok();
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> BmiResult<CommandOutput> {
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);

        let exit_status = match self.timeout {
            None => child.wait()?,
            Some(timeout) => {
                let start = Instant::now();
                let mut exit_status = None;
                while start.elapsed() <= timeout {
                    if let Some(status) = child.try_wait()? {
                        exit_status = Some(status);
                        break;
                    }
                    thread::sleep(POLL_INTERVAL);
                }

                let Some(exit_status) = exit_status else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BmiError::Storage(format!(
                        "{} timed out after {timeout:?}",
                        self.binary.display()
                    )));
                };
                exit_status
            }
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| BmiError::Storage("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| BmiError::Storage("stderr reader thread panicked".into()))??;

        Ok(CommandOutput {
            stdout,
            stderr,
            status: exit_status.code().unwrap_or(-1),
        })
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<BmiResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> BmiResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}
