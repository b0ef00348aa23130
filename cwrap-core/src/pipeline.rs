//! One wrapper invocation, end to end.

use crate::builder::{CompilerFlavor, build_command};
use crate::command::Command;
use crate::config::WrapperConfig;
use crate::errors::{Result, WrapperError, render_error, wrap_compiler_error};
use crate::legacy::{compare_to_legacy, forward_to_legacy, should_forward_to_legacy};
use crate::process::{ProcessEnv, Sink};
use crate::recording::RecordingEnv;
use crate::rusage::{log_rusage, rusage_log_path};
use crate::werror::{double_build_with_wno_error, should_force_disable_werror};
use std::path::Path;
use tracing::{debug, error, warn};

/// Exit code used when the wrapper itself fails.
pub const WRAPPER_FAILURE_EXIT_CODE: i32 = 1;

pub const RUSAGE_WITH_WERROR_MESSAGE: &str = "GETRUSAGE is meaningless with FORCE_DISABLE_WERROR";

/// Run one compiler invocation and return the process exit code.
///
/// Wrapper failures are rendered to the wrapper's stderr and map to
/// [`WRAPPER_FAILURE_EXIT_CODE`]. A nonzero compiler exit is passed through
/// without adding any text.
pub fn call_compiler(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    flavor: CompilerFlavor,
    input: &Command,
) -> i32 {
    match run_wrapper(env, cfg, flavor, input) {
        Ok(()) => 0,
        Err(WrapperError::ExitCode(code)) => code,
        Err(err) => {
            debug!(error = %err, "wrapper invocation failed");
            if let Err(write_err) = render_error(&mut env.stderr(), &err) {
                warn!(error = %write_err, "failed to report wrapper error");
            }
            WRAPPER_FAILURE_EXIT_CODE
        }
    }
}

/// Like [`call_compiler`], but surfaces the outcome as a `Result`.
///
/// A nonzero compiler exit becomes [`WrapperError::ExitCode`].
pub fn run_wrapper(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    flavor: CompilerFlavor,
    input: &Command,
) -> Result<()> {
    let rusage_log = rusage_log_path(env);
    if rusage_log.is_some() && should_force_disable_werror(env) {
        return Err(WrapperError::user(RUSAGE_WITH_WERROR_MESSAGE));
    }

    if should_forward_to_legacy(env, cfg) {
        return exit_status(forward_to_legacy(env, cfg, input)?);
    }

    let compiler_cmd = build_command(flavor, input, cfg);
    debug!(%flavor, command = %compiler_cmd, "built compiler command");

    if cfg.legacy_wrapper_path.is_none() {
        return exit_status(run_compiler(env, cfg, rusage_log.as_deref(), &compiler_cmd)?);
    }

    let recording = RecordingEnv::new(env);
    let exit_code = run_compiler(&recording, cfg, rusage_log.as_deref(), &compiler_cmd)?;
    if let Err(err) = compare_to_legacy(env, cfg, input, &recording.into_results(), exit_code) {
        error!(error = %err, "legacy wrapper comparison failed");
    }
    exit_status(exit_code)
}

fn run_compiler(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    rusage_log: Option<&Path>,
    compiler_cmd: &Command,
) -> Result<i32> {
    if let Some(log_path) = rusage_log {
        log_rusage(env, cfg, log_path, compiler_cmd)
    } else if should_force_disable_werror(env) {
        double_build_with_wno_error(env, cfg, compiler_cmd)
    } else {
        wrap_compiler_error(
            cfg.use_cache_tool,
            compiler_cmd,
            env.run(compiler_cmd, Sink::Inherit, Sink::Inherit),
        )
    }
}

fn exit_status(exit_code: i32) -> Result<()> {
    match exit_code {
        0 => Ok(()),
        code => Err(WrapperError::ExitCode(code)),
    }
}
