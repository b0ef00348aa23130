//! Process execution capability.
//!
//! Everything the wrapper needs from the operating system goes through
//! [`ProcessEnv`]: reading the environment and working directory, writing to
//! the wrapper's own output streams, and running a child process. [`OsEnv`]
//! is the real implementation; [`crate::scripted::ScriptedEnv`] replays
//! pre-configured outcomes without spawning anything.

use crate::command::{Command, split_env_update};
use std::io::{self, Write};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tracing::{debug, trace};

/// Exit statuses above this value mean the child was killed by a signal.
pub const EXIT_SIGNAL_BASE: i32 = 128;

/// Why a child process did not finish with status 0.
#[derive(Debug, Error)]
pub enum RunError {
    /// The child ran and exited with a nonzero status.
    #[error("exit status {0}")]
    ExitCode(i32),

    /// The child could not be started at all.
    #[error("failed to start process: {0}")]
    Spawn(#[source] io::Error),
}

/// Where a child's output stream goes.
pub enum Sink<'a> {
    /// Hand the wrapper's own stream to the child.
    Inherit,
    /// Copy the child's stream into this writer.
    Writer(&'a mut (dyn Write + Send)),
}

impl<'a> Sink<'a> {
    pub fn writer(writer: &'a mut (dyn Write + Send)) -> Self {
        Self::Writer(writer)
    }
}

/// OS interaction used by the wrapper.
pub trait ProcessEnv {
    /// Value of an environment variable, empty if unset.
    fn getenv(&self, name: &str) -> String;

    /// Current working directory.
    fn getwd(&self) -> String;

    /// The wrapper's own standard output.
    fn stdout(&self) -> Box<dyn Write + Send + '_>;

    /// The wrapper's own standard error.
    fn stderr(&self) -> Box<dyn Write + Send + '_>;

    /// Run `cmd` to completion, routing its output to the given sinks.
    ///
    /// Returns `Ok(())` on exit status 0, [`RunError::ExitCode`] on a nonzero
    /// status and [`RunError::Spawn`] if the process never started.
    fn run(&self, cmd: &Command, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<(), RunError>;
}

impl<E: ProcessEnv + ?Sized> ProcessEnv for &E {
    fn getenv(&self, name: &str) -> String {
        (**self).getenv(name)
    }

    fn getwd(&self) -> String {
        (**self).getwd()
    }

    fn stdout(&self) -> Box<dyn Write + Send + '_> {
        (**self).stdout()
    }

    fn stderr(&self) -> Box<dyn Write + Send + '_> {
        (**self).stderr()
    }

    fn run(&self, cmd: &Command, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<(), RunError> {
        (**self).run(cmd, stdout, stderr)
    }
}

/// The real operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnv;

impl OsEnv {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessEnv for OsEnv {
    fn getenv(&self, name: &str) -> String {
        std::env::var(name).unwrap_or_default()
    }

    fn getwd(&self) -> String {
        std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn stdout(&self) -> Box<dyn Write + Send + '_> {
        Box::new(io::stdout())
    }

    fn stderr(&self) -> Box<dyn Write + Send + '_> {
        Box::new(io::stderr())
    }

    fn run(&self, cmd: &Command, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<(), RunError> {
        let mut child_cmd = std::process::Command::new(cmd.path());
        child_cmd.args(cmd.args());
        for update in cmd.env_updates() {
            let (key, value) = split_env_update(update);
            if value.is_empty() {
                child_cmd.env_remove(key);
            } else {
                child_cmd.env(key, value);
            }
        }
        child_cmd.stdin(Stdio::inherit());
        child_cmd.stdout(stdio_for(&stdout));
        child_cmd.stderr(stdio_for(&stderr));

        debug!(command = %cmd, "spawning child process");
        let mut child = child_cmd.spawn().map_err(RunError::Spawn)?;
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        // Both pipes are drained concurrently so neither can fill up and stall
        // the child while we block on the other.
        let copied = std::thread::scope(|scope| {
            let out_task = match (stdout, child_stdout) {
                (Sink::Writer(sink), Some(mut pipe)) => {
                    Some(scope.spawn(move || io::copy(&mut pipe, sink).map(|_| ())))
                }
                _ => None,
            };
            let err_result = match (stderr, child_stderr) {
                (Sink::Writer(sink), Some(mut pipe)) => io::copy(&mut pipe, sink).map(|_| ()),
                _ => Ok(()),
            };
            let out_result = match out_task {
                Some(task) => task
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("stdout copy thread panicked"))),
                None => Ok(()),
            };
            out_result.and(err_result)
        });

        let status = child.wait().map_err(RunError::Spawn)?;
        if let Err(err) = copied {
            // The child's status is authoritative; a broken sink only loses output.
            debug!(error = %err, command = %cmd, "failed to forward child output");
        }
        let code = exit_code(status);
        trace!(command = %cmd, code, "child exited");
        if code == 0 {
            Ok(())
        } else {
            Err(RunError::ExitCode(code))
        }
    }
}

fn stdio_for(sink: &Sink<'_>) -> Stdio {
    match sink {
        Sink::Inherit => Stdio::inherit(),
        Sink::Writer(_) => Stdio::piped(),
    }
}

/// Map an exit status to a shell-style code; signals become 128 + signal.
#[cfg(unix)]
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => EXIT_SIGNAL_BASE + signal,
        (None, None) => 1,
    }
}

#[cfg(not(unix))]
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
