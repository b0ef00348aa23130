//! Records every subprocess a run performs.

use crate::command::{Command, CommandResult};
use crate::process::{ProcessEnv, RunError, Sink};
use std::io::{self, Write};
use std::sync::Mutex;

/// Wraps a [`ProcessEnv`] and keeps a [`CommandResult`] for every command that
/// actually ran, in call order. Output still reaches the caller's sinks.
///
/// Recording needs a copy of the child's streams, so inherited streams are
/// piped through the wrapper's own stdout/stderr while recording.
pub struct RecordingEnv<E> {
    inner: E,
    results: Mutex<Vec<CommandResult>>,
}

impl<E: ProcessEnv> RecordingEnv<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            results: Mutex::new(Vec::new()),
        }
    }

    /// Results recorded so far.
    pub fn results(&self) -> Vec<CommandResult> {
        self.results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn into_results(self) -> Vec<CommandResult> {
        self.results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: ProcessEnv> ProcessEnv for RecordingEnv<E> {
    fn getenv(&self, name: &str) -> String {
        self.inner.getenv(name)
    }

    fn getwd(&self) -> String {
        self.inner.getwd()
    }

    fn stdout(&self) -> Box<dyn Write + Send + '_> {
        self.inner.stdout()
    }

    fn stderr(&self) -> Box<dyn Write + Send + '_> {
        self.inner.stderr()
    }

    fn run(&self, cmd: &Command, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<(), RunError> {
        let mut own_stdout = self.inner.stdout();
        let mut own_stderr = self.inner.stderr();
        let mut stdout_copy = Vec::new();
        let mut stderr_copy = Vec::new();

        let outcome = {
            let mut out = Tee {
                primary: match stdout {
                    Sink::Inherit => &mut *own_stdout,
                    Sink::Writer(writer) => writer,
                },
                copy: &mut stdout_copy,
            };
            let mut err = Tee {
                primary: match stderr {
                    Sink::Inherit => &mut *own_stderr,
                    Sink::Writer(writer) => writer,
                },
                copy: &mut stderr_copy,
            };
            self.inner
                .run(cmd, Sink::writer(&mut out), Sink::writer(&mut err))
        };

        let exit_code = match &outcome {
            Ok(()) => 0,
            Err(RunError::ExitCode(code)) => *code,
            Err(RunError::Spawn(_)) => return outcome,
        };
        let result = CommandResult {
            cmd: cmd.clone(),
            stdout: String::from_utf8_lossy(&stdout_copy).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_copy).into_owned(),
            exit_code,
        };
        match self.results.lock() {
            Ok(mut results) => results.push(result),
            Err(poisoned) => poisoned.into_inner().push(result),
        }
        outcome
    }
}

struct Tee<'a, 'b> {
    primary: &'a mut (dyn Write + Send),
    copy: &'b mut Vec<u8>,
}

impl Write for Tee<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.primary.write(buf)?;
        self.copy.extend_from_slice(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()
    }
}
