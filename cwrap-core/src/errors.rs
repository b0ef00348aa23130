//! Error taxonomy and terminal rendering for the compiler wrapper.
//!
//! | Kind       | Meaning                                   | Rendering                 |
//! |------------|-------------------------------------------|---------------------------|
//! | `User`     | Actionable problem in the user's setup    | message only              |
//! | `Internal` | Bug in the wrapper or its environment     | banner line, then message |
//! | `ExitCode` | Compiler exited nonzero on its own        | never rendered            |

use crate::command::Command;
use crate::process::RunError;
use std::fmt;
use std::io::{self, Write};
use std::panic::Location;
use thiserror::Error;

/// First line printed before every internal error.
pub const INTERNAL_ERROR_BANNER: &str = "Internal error. Please report to the toolchain maintainers.";

/// Errors produced by one wrapper invocation.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// Something the user can fix; printed verbatim.
    #[error("{0}")]
    User(String),

    /// A wrapper bug or an unexpected OS failure, tagged with where it was raised.
    #[error("{message} (at {location})")]
    Internal {
        message: String,
        location: &'static Location<'static>,
        #[source]
        source: Option<io::Error>,
    },

    /// The compiler's own nonzero exit status, passed through untouched.
    #[error("exit status {0}")]
    ExitCode(i32),
}

/// Result type for wrapper operations.
pub type Result<T> = std::result::Result<T, WrapperError>;

impl WrapperError {
    pub fn user(message: impl fmt::Display) -> Self {
        Self::User(message.to_string())
    }

    /// An internal error located at the caller.
    #[track_caller]
    pub fn internal(message: impl fmt::Display) -> Self {
        Self::Internal {
            message: message.to_string(),
            location: Location::caller(),
            source: None,
        }
    }

    /// An internal error wrapping an I/O failure; the OS error text is part of
    /// the message.
    #[track_caller]
    pub fn internal_io(source: io::Error, context: impl fmt::Display) -> Self {
        Self::Internal {
            message: format!("{}: {}", context, source),
            location: Location::caller(),
            source: Some(source),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Write `err` the way the wrapper reports it on the terminal.
///
/// This is the only formatting path for wrapper diagnostics. `ExitCode` is
/// never rendered: the compiler already printed its own diagnostics, and
/// callers map it straight to the process exit status.
pub fn render_error(out: &mut dyn Write, err: &WrapperError) -> io::Result<()> {
    debug_assert!(
        !matches!(err, WrapperError::ExitCode(_)),
        "compiler exit status passed to render_error"
    );
    match err {
        WrapperError::User(message) => writeln!(out, "{}", message),
        other => {
            writeln!(out, "{}", INTERNAL_ERROR_BANNER)?;
            writeln!(out, "{}", other)
        }
    }
}

/// Turn a subprocess outcome into the wrapper's view of it.
///
/// A clean exit becomes `Ok(0)`, a nonzero exit becomes `Ok(status)`, and a
/// failure to start the process becomes an internal error naming the command.
#[track_caller]
pub fn wrap_subprocess_error(cmd: &Command, outcome: std::result::Result<(), RunError>) -> Result<i32> {
    match outcome {
        Ok(()) => Ok(0),
        Err(RunError::ExitCode(code)) => Ok(code),
        Err(RunError::Spawn(source)) => Err(WrapperError::internal_io(
            source,
            format_args!("failed to execute {}", cmd),
        )),
    }
}

/// Like [`wrap_subprocess_error`], for a run of the compiler command itself.
///
/// When the cache tool fronts the compiler and its executable cannot be
/// started because it does not exist, the user needs to install it. Only the
/// spawn is classified this way; later failures stay internal.
#[track_caller]
pub fn wrap_compiler_error(
    use_cache_tool: bool,
    cmd: &Command,
    outcome: std::result::Result<(), RunError>,
) -> Result<i32> {
    match outcome {
        Err(RunError::Spawn(source)) if use_cache_tool && source.kind() == io::ErrorKind::NotFound => {
            Err(missing_cache_tool(cmd))
        }
        outcome => wrap_subprocess_error(cmd, outcome),
    }
}

fn missing_cache_tool(cmd: &Command) -> WrapperError {
    let tool = std::path::Path::new(cmd.path())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.path().to_string());
    WrapperError::user(format_args!(
        "{} not found under {}. Please install it",
        tool,
        cmd.path()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_user_error() {
        let mut buffer = Vec::new();
        render_error(&mut buffer, &WrapperError::user("abcd")).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "abcd\n");
    }

    #[test]
    fn test_render_internal_error_has_banner() {
        let mut buffer = Vec::new();
        render_error(&mut buffer, &WrapperError::internal("abcd")).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(INTERNAL_ERROR_BANNER));
        let second = lines.next().unwrap();
        assert!(second.starts_with("abcd (at "), "got: {}", second);
        assert!(second.contains("errors.rs"), "missing source location: {}", second);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_wrap_subprocess_error_passes_exit_codes() {
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);
        assert_eq!(wrap_subprocess_error(&cmd, Ok(())).unwrap(), 0);
        assert_eq!(
            wrap_subprocess_error(&cmd, Err(RunError::ExitCode(2))).unwrap(),
            2
        );
    }

    #[test]
    fn test_wrap_subprocess_error_spawn_is_internal() {
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);
        let err = wrap_subprocess_error(
            &cmd,
            Err(RunError::Spawn(io::Error::other("someerror"))),
        )
        .unwrap_err();
        assert!(err.is_internal());
        let text = err.to_string();
        assert!(text.contains("/usr/bin/gcc"));
        assert!(text.contains("someerror"));
    }

    #[test]
    fn test_missing_cache_tool_is_user_error() {
        let cmd = Command::new("/usr/bin/ccache", ["/usr/bin/gcc", "main.cc"]);
        let err = wrap_compiler_error(
            true,
            &cmd,
            Err(RunError::Spawn(io::Error::from(io::ErrorKind::NotFound))),
        )
        .unwrap_err();

        assert!(err.is_user());
        assert_eq!(
            err.to_string(),
            "ccache not found under /usr/bin/ccache. Please install it"
        );
    }

    #[test]
    fn test_missing_compiler_stays_internal_without_cache_tool() {
        let cmd = Command::new("/usr/bin/gcc", ["main.cc"]);
        let err = wrap_compiler_error(
            false,
            &cmd,
            Err(RunError::Spawn(io::Error::from(io::ErrorKind::NotFound))),
        )
        .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_cache_tool_other_spawn_failure_stays_internal() {
        let cmd = Command::new("/usr/bin/ccache", ["/usr/bin/gcc", "main.cc"]);
        let err = wrap_compiler_error(
            true,
            &cmd,
            Err(RunError::Spawn(io::Error::from(io::ErrorKind::PermissionDenied))),
        )
        .unwrap_err();
        assert!(err.is_internal());
        assert_eq!(wrap_compiler_error(true, &cmd, Err(RunError::ExitCode(3))).unwrap(), 3);
    }

    #[test]
    #[should_panic(expected = "compiler exit status passed to render_error")]
    #[cfg(debug_assertions)]
    fn test_render_exit_code_is_a_bug() {
        let mut buffer = Vec::new();
        let _ = render_error(&mut buffer, &WrapperError::ExitCode(1));
    }
}
