//! Immutable description of one external process invocation.

use std::fmt;
use std::sync::Arc;

/// One external process invocation: executable path, ordered arguments and
/// environment updates (`KEY=VALUE`, or `KEY=` to clear a variable).
///
/// A `Command` is never mutated after construction. Variants are derived with
/// [`Command::with_args_appended`] and [`Command::with_env_update`], which copy
/// the value. Environment updates are shared behind an `Arc`, so a variant that
/// only appends arguments keeps pointing at the same update list.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    path: String,
    args: Vec<String>,
    env_updates: Arc<[String]>,
}

impl Command {
    pub fn new<P, A, S>(path: P, args: A) -> Self
    where
        P: Into<String>,
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            args: args.into_iter().map(Into::into).collect(),
            env_updates: Arc::from(Vec::<String>::new()),
        }
    }

    /// Replace the environment updates applied when this command runs.
    pub fn with_env_updates<E, S>(mut self, env_updates: E) -> Self
    where
        E: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_updates = env_updates.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env_updates(&self) -> &[String] {
        &self.env_updates
    }

    /// True if both commands share the same environment update list.
    pub fn shares_env_updates(&self, other: &Command) -> bool {
        Arc::ptr_eq(&self.env_updates, &other.env_updates)
    }

    /// A copy of this command with `extra` appended to its arguments.
    pub fn with_args_appended<A, S>(&self, extra: A) -> Self
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = self.args.clone();
        args.extend(extra.into_iter().map(Into::into));
        Self {
            path: self.path.clone(),
            args,
            env_updates: Arc::clone(&self.env_updates),
        }
    }

    /// A copy of this command with one more environment update at the end.
    ///
    /// Later updates win when keys collide.
    pub fn with_env_update(&self, update: impl Into<String>) -> Self {
        let mut env_updates = self.env_updates.to_vec();
        env_updates.push(update.into());
        Self {
            path: self.path.clone(),
            args: self.args.clone(),
            env_updates: env_updates.into(),
        }
    }

    /// Path followed by arguments, the way the process sees its argv.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.path.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("env_updates", &&*self.env_updates)
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Outcome of one executed invocation, kept in call order so a run can be
/// compared against or replayed into another implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub cmd: Command,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Split a `KEY=VALUE` update into its key and value.
///
/// An entry without `=` is treated as a key with an empty value.
pub fn split_env_update(update: &str) -> (&str, &str) {
    update.split_once('=').unwrap_or((update, ""))
}
