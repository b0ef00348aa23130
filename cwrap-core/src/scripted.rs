//! Deterministic, scripted implementation of [`ProcessEnv`].
//!
//! Each call to `run` consumes the next scripted step in order. A step either
//! replays fixed output and an exit status, fails to spawn, or runs a closure
//! that can inspect the command and write whatever it likes. Every invocation
//! is recorded, so tests can assert exactly which subprocesses were attempted.

use crate::command::{Command, CommandResult};
use crate::process::{ProcessEnv, RunError, Sink};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

type StepFn = Box<dyn FnMut(&Command, &mut dyn Write, &mut dyn Write) -> Result<(), RunError> + Send>;

/// One pre-configured outcome.
pub enum ScriptedStep {
    /// Write `stdout`/`stderr` and finish with `exit_code`.
    Output {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    /// The process cannot be started.
    SpawnError(io::ErrorKind, String),
    /// Arbitrary behavior decided at call time.
    Call(StepFn),
}

impl ScriptedStep {
    pub fn exit(exit_code: i32) -> Self {
        Self::Output {
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
        }
    }

    pub fn output(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self::Output {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn spawn_error(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::SpawnError(kind, message.into())
    }

    pub fn call<F>(f: F) -> Self
    where
        F: FnMut(&Command, &mut dyn Write, &mut dyn Write) -> Result<(), RunError> + Send + 'static,
    {
        Self::Call(Box::new(f))
    }
}

/// Scripted process environment.
pub struct ScriptedEnv {
    vars: HashMap<String, String>,
    wd: String,
    steps: Mutex<VecDeque<ScriptedStep>>,
    invocations: Mutex<Vec<Command>>,
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

impl ScriptedEnv {
    pub fn new(wd: impl Into<String>) -> Self {
        Self {
            vars: HashMap::new(),
            wd: wd.into(),
            steps: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
            stdout: Mutex::new(Vec::new()),
            stderr: Mutex::new(Vec::new()),
        }
    }

    /// A scripted environment that plays back a recorded run in call order.
    pub fn replaying(wd: impl Into<String>, results: &[CommandResult]) -> Self {
        let env = Self::new(wd);
        for result in results {
            env.push(ScriptedStep::output(
                result.stdout.clone(),
                result.stderr.clone(),
                result.exit_code,
            ));
        }
        env
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_step(self, step: ScriptedStep) -> Self {
        self.push(step);
        self
    }

    pub fn push(&self, step: ScriptedStep) {
        lock(&self.steps).push_back(step);
    }

    /// Commands passed to `run`, in call order.
    pub fn invocations(&self) -> Vec<Command> {
        lock(&self.invocations).clone()
    }

    /// Number of scripted steps not consumed yet.
    pub fn remaining_steps(&self) -> usize {
        lock(&self.steps).len()
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&lock(&self.stdout)).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&lock(&self.stderr)).into_owned()
    }
}

impl ProcessEnv for ScriptedEnv {
    fn getenv(&self, name: &str) -> String {
        self.vars.get(name).cloned().unwrap_or_default()
    }

    fn getwd(&self) -> String {
        self.wd.clone()
    }

    fn stdout(&self) -> Box<dyn Write + Send + '_> {
        Box::new(SharedBuffer(&self.stdout))
    }

    fn stderr(&self) -> Box<dyn Write + Send + '_> {
        Box::new(SharedBuffer(&self.stderr))
    }

    fn run(&self, cmd: &Command, stdout: Sink<'_>, stderr: Sink<'_>) -> Result<(), RunError> {
        lock(&self.invocations).push(cmd.clone());
        let step = lock(&self.steps).pop_front().ok_or_else(|| {
            RunError::Spawn(io::Error::other(format!("no scripted step left for {}", cmd)))
        })?;

        let mut own_stdout = SharedBuffer(&self.stdout);
        let mut own_stderr = SharedBuffer(&self.stderr);
        let out: &mut dyn Write = match stdout {
            Sink::Inherit => &mut own_stdout,
            Sink::Writer(writer) => writer,
        };
        let err: &mut dyn Write = match stderr {
            Sink::Inherit => &mut own_stderr,
            Sink::Writer(writer) => writer,
        };

        match step {
            ScriptedStep::Output {
                stdout,
                stderr,
                exit_code,
            } => {
                out.write_all(stdout.as_bytes()).map_err(RunError::Spawn)?;
                err.write_all(stderr.as_bytes()).map_err(RunError::Spawn)?;
                if exit_code == 0 {
                    Ok(())
                } else {
                    Err(RunError::ExitCode(exit_code))
                }
            }
            ScriptedStep::SpawnError(kind, message) => {
                Err(RunError::Spawn(io::Error::new(kind, message)))
            }
            ScriptedStep::Call(mut f) => f(cmd, out, err),
        }
    }
}

struct SharedBuffer<'a>(&'a Mutex<Vec<u8>>);

impl Write for SharedBuffer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_replay_in_order() {
        let env = ScriptedEnv::new("/work")
            .with_step(ScriptedStep::output("a", "b", 0))
            .with_step(ScriptedStep::exit(2));
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);

        assert!(env.run(&cmd, Sink::Inherit, Sink::Inherit).is_ok());
        assert!(matches!(
            env.run(&cmd, Sink::Inherit, Sink::Inherit),
            Err(RunError::ExitCode(2))
        ));
        assert_eq!(env.stdout_string(), "a");
        assert_eq!(env.stderr_string(), "b");
        assert_eq!(env.invocations().len(), 2);
        assert_eq!(env.remaining_steps(), 0);
    }

    #[test]
    fn test_writer_sinks_receive_output() {
        let env = ScriptedEnv::new("/work").with_step(ScriptedStep::output("out", "err", 0));
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);
        let mut out = Vec::new();
        let mut err = Vec::new();

        env.run(&cmd, Sink::writer(&mut out), Sink::writer(&mut err))
            .unwrap();

        assert_eq!(out, b"out");
        assert_eq!(err, b"err");
        assert!(env.stdout_string().is_empty());
    }

    #[test]
    fn test_exhausted_script_is_spawn_error() {
        let env = ScriptedEnv::new("/work");
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);
        assert!(matches!(
            env.run(&cmd, Sink::Inherit, Sink::Inherit),
            Err(RunError::Spawn(_))
        ));
    }

    #[test]
    fn test_replaying_recorded_results() {
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);
        let results = vec![CommandResult {
            cmd: cmd.clone(),
            stdout: "x".to_string(),
            stderr: "warning".to_string(),
            exit_code: 1,
        }];
        let env = ScriptedEnv::replaying("/work", &results);

        assert!(matches!(
            env.run(&cmd, Sink::Inherit, Sink::Inherit),
            Err(RunError::ExitCode(1))
        ));
        assert_eq!(env.stderr_string(), "warning");
    }

    #[test]
    fn test_vars_and_wd() {
        let env = ScriptedEnv::new("/work").with_var("GETRUSAGE", "/tmp/log");
        assert_eq!(env.getenv("GETRUSAGE"), "/tmp/log");
        assert_eq!(env.getenv("UNSET"), "");
        assert_eq!(env.getwd(), "/work");
    }
}
