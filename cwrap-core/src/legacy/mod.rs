//! Forwarding to, and comparing against, the legacy wrapper.
//!
//! Forwarding hands a whole invocation to the legacy wrapper. Comparison runs
//! the legacy wrapper after the new implementation has finished, replays the
//! new implementation's subprocess results into it, and reports every way the
//! two disagree. Comparison never changes what the caller sees.

pub mod diff;
pub mod shim;

pub use diff::{CommandListDiff, DiffKind, diff_commands, parse_legacy_commands};
pub use shim::{MockResult, ShimParams};

use crate::command::{Command, CommandResult};
use crate::config::WrapperConfig;
use crate::errors::{Result, WrapperError, wrap_subprocess_error};
use crate::process::{ProcessEnv, Sink};
use crate::rusage::RUSAGE_LOG_VAR;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

pub const BISECT_STAGE_VAR: &str = "BISECT_STAGE";

/// Variables that hand the whole invocation to the legacy wrapper.
pub const FORWARD_TRIGGERS: [&str; 2] = [RUSAGE_LOG_VAR, BISECT_STAGE_VAR];

const FORWARD_FILE_PREFIX: &str = "legacy_wrapper_forward";
const COMPARE_FILE_PREFIX: &str = "legacy_wrapper_compare";

/// True if a forwarding trigger is set and a legacy wrapper is configured.
pub fn should_forward_to_legacy(env: &dyn ProcessEnv, cfg: &WrapperConfig) -> bool {
    cfg.legacy_wrapper_path.is_some()
        && FORWARD_TRIGGERS
            .iter()
            .any(|var| !env.getenv(var).is_empty())
}

/// Run the legacy wrapper in place of the new implementation.
///
/// Its output goes straight to the wrapper's streams and its exit code is
/// returned unchanged.
pub fn forward_to_legacy(env: &dyn ProcessEnv, cfg: &WrapperConfig, input: &Command) -> Result<i32> {
    let source = load_legacy_source(env, cfg, input)?;
    let params = ShimParams::new(cfg, input.path());
    info!(command = %input, "forwarding to legacy wrapper");
    call_legacy_wrapper(
        env,
        cfg,
        &source,
        &params,
        input,
        FORWARD_FILE_PREFIX,
        Sink::Inherit,
        Sink::Inherit,
    )
}

/// Replay `new_results` into the legacy wrapper and diff its behavior.
///
/// Returns `Ok(())` when both implementations agree. A mismatch comes back as
/// an internal error whose message lists every difference, both command lists
/// and the legacy wrapper's remaining stderr. The legacy wrapper's stdout is
/// discarded.
pub fn compare_to_legacy(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    input: &Command,
    new_results: &[CommandResult],
    new_exit_code: i32,
) -> Result<()> {
    let source = load_legacy_source(env, cfg, input)?;
    let mut params = ShimParams::new(cfg, input.path());
    params.log_cmds = true;
    params.mock_cmds = cfg.mock_legacy_cmds;
    params.mock_results = new_results.iter().map(MockResult::from).collect();
    params.overwrite_config = cfg.overwrite_legacy_config;

    let mut discarded = io::sink();
    let mut stderr = Vec::new();
    let old_exit_code = call_legacy_wrapper(
        env,
        cfg,
        &source,
        &params,
        input,
        COMPARE_FILE_PREFIX,
        Sink::writer(&mut discarded),
        Sink::writer(&mut stderr),
    )?;

    let (old_cmds, old_stderr) = parse_legacy_commands(&String::from_utf8_lossy(&stderr));
    let new_cmds: Vec<Command> = new_results.iter().map(|result| result.cmd.clone()).collect();

    let mut differences = Vec::new();
    if old_exit_code != new_exit_code {
        differences.push(format!(
            "exit codes differ: old {}, new {}",
            old_exit_code, new_exit_code
        ));
    }
    let cmd_diff = diff_commands(&old_cmds, &new_cmds);
    if cmd_diff.has_differences() {
        differences.push(cmd_diff.describe(&old_cmds, &new_cmds));
    }

    if differences.is_empty() {
        debug!(commands = new_cmds.len(), "legacy wrapper agrees");
        return Ok(());
    }
    Err(WrapperError::internal(format_args!(
        "wrappers differ:\n{}\nOld stderr:{}",
        differences.join("\n"),
        old_stderr
    )))
}

/// Absolute path of the legacy wrapper.
///
/// A relative configured path is taken relative to the directory holding the
/// invoked wrapper, after resolving symlinks.
pub fn resolve_legacy_path(env: &dyn ProcessEnv, cfg: &WrapperConfig, input: &Command) -> Result<PathBuf> {
    let configured = cfg
        .legacy_wrapper_path
        .as_deref()
        .ok_or_else(|| WrapperError::internal("no legacy wrapper configured"))?;
    if configured.is_absolute() {
        return Ok(configured.to_path_buf());
    }
    Ok(wrapper_dir(env, input)?.join(configured))
}

fn wrapper_dir(env: &dyn ProcessEnv, input: &Command) -> Result<PathBuf> {
    let invoked = Path::new(input.path());
    let absolute = if invoked.is_absolute() {
        invoked.to_path_buf()
    } else {
        Path::new(&env.getwd()).join(invoked)
    };
    let resolved = fs::canonicalize(&absolute).map_err(|err| {
        WrapperError::internal_io(
            err,
            format_args!("failed to resolve wrapper path {}", absolute.display()),
        )
    })?;
    resolved.parent().map(Path::to_path_buf).ok_or_else(|| {
        WrapperError::internal(format_args!(
            "wrapper path {} has no parent directory",
            resolved.display()
        ))
    })
}

fn load_legacy_source(env: &dyn ProcessEnv, cfg: &WrapperConfig, input: &Command) -> Result<String> {
    let path = resolve_legacy_path(env, cfg, input)?;
    let source = fs::read_to_string(&path).map_err(|err| {
        WrapperError::internal_io(
            err,
            format_args!("failed to read legacy wrapper {}", path.display()),
        )
    })?;
    shim::patch_legacy_source(&source, cfg.use_cache_tool)
}

/// Write the shimmed legacy wrapper to a temporary file and run it.
///
/// The temporary file lives until this function returns.
#[allow(clippy::too_many_arguments)]
fn call_legacy_wrapper(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    patched_source: &str,
    params: &ShimParams,
    input: &Command,
    file_prefix: &str,
    stdout: Sink<'_>,
    stderr: Sink<'_>,
) -> Result<i32> {
    let shim_path = write_shim(patched_source, params, file_prefix)?;

    let interpreter = cfg.legacy_interpreter.to_string_lossy().into_owned();
    let args = ["-S".to_string(), shim_path.to_string_lossy().into_owned()]
        .into_iter()
        .chain(input.args().iter().cloned());
    let legacy_cmd =
        Command::new(interpreter, args).with_env_updates(input.env_updates().iter().cloned());
    debug!(command = %legacy_cmd, mock = params.mock_cmds, "running legacy wrapper");

    let outcome = env.run(&legacy_cmd, stdout, stderr);
    let exit_code = wrap_subprocess_error(&legacy_cmd, outcome);
    drop(shim_path);
    exit_code
}

fn write_shim(patched_source: &str, params: &ShimParams, file_prefix: &str) -> Result<TempPath> {
    let contents = shim::render_shim(patched_source, params)?;
    let mut file = tempfile::Builder::new()
        .prefix(file_prefix)
        .suffix(".py")
        .tempfile()
        .map_err(|err| WrapperError::internal_io(err, "failed to create legacy shim file"))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| WrapperError::internal_io(err, "failed to write legacy shim file"))?;
    Ok(file.into_temp_path())
}
