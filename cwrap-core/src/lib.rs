//! Core of the compiler wrapper.
//!
//! The wrapper stands in for a compiler binary. For each invocation it builds
//! the real compiler command, runs it (optionally through the Werror retry or
//! rusage instrumentation), classifies failures, and during migration can
//! forward to or cross-check against the legacy wrapper.
//!
//! All OS access goes through [`process::ProcessEnv`], so every path can be
//! driven by [`scripted::ScriptedEnv`] in tests.

pub mod builder;
pub mod command;
pub mod config;
pub mod errors;
pub mod legacy;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod recording;
pub mod rusage;
pub mod scripted;
pub mod werror;

pub use builder::{CompilerFlavor, build_command};
pub use command::{Command, CommandResult};
pub use config::WrapperConfig;
pub use errors::{Result, WrapperError, render_error};
pub use pipeline::{call_compiler, run_wrapper};
pub use process::{OsEnv, ProcessEnv, RunError, Sink};
pub use recording::RecordingEnv;
pub use scripted::{ScriptedEnv, ScriptedStep};
