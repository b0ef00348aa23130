#![allow(dead_code)]

use cwrap_core::{Command, OsEnv, ProcessEnv, RunError, Sink};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .with(filter)
            .init();
    });
}

#[ctor::ctor]
fn setup() {
    init_test_logging();
}

/// The real OS, with a private set of environment variables layered on top so
/// tests never mutate the process environment.
pub struct OverlayEnv {
    inner: OsEnv,
    vars: HashMap<String, String>,
}

impl OverlayEnv {
    pub fn new() -> Self {
        Self {
            inner: OsEnv::new(),
            vars: HashMap::new(),
        }
    }

    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }
}

impl ProcessEnv for OverlayEnv {
    fn getenv(&self, name: &str) -> String {
        match self.vars.get(name) {
            Some(value) => value.clone(),
            None => self.inner.getenv(name),
        }
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
        self.inner.run(cmd, stdout, stderr)
    }
}

/// Write a shell script into `dir`. Tests run it as `/bin/sh <script>` so it
/// never needs to be executable.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Marker line the legacy shim prints for one intercepted call.
pub fn legacy_marker(path: &str, args: &[&str], env_updates: &[&str]) -> String {
    format!(
        "command:{}\n",
        serde_json::json!({"path": path, "args": args, "env_updates": env_updates})
    )
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}
