//! Werror double-build.
//!
//! A build that fails because warnings were promoted to errors is retried
//! once with `-Wno-error`. Either way a warnings report is written so the
//! offending warnings can be tracked down later.

use crate::command::Command;
use crate::config::WrapperConfig;
use crate::errors::{Result, WrapperError, wrap_compiler_error};
use crate::process::{ProcessEnv, Sink};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Variable that turns on the double-build.
pub const FORCE_DISABLE_WERROR_VAR: &str = "FORCE_DISABLE_WERROR";

/// Substring of compiler stderr that implicates `-Werror`.
pub const WERROR_MARKER: &str = "-Werror";

/// Flag appended to the retry.
pub const NO_WERROR_FLAG: &str = "-Wno-error";

/// Suffix carried by a report until it is completely written.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

const REPORT_PREFIX: &str = "warnings_report";
const REPORT_SUFFIX: &str = ".json";

/// Contents of one warnings report file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningsReport {
    pub cwd: String,
    pub command: Vec<String>,
    pub stdout: String,
}

pub fn should_force_disable_werror(env: &dyn ProcessEnv) -> bool {
    !env.getenv(FORCE_DISABLE_WERROR_VAR).is_empty()
}

/// Run `original`, retrying with `-Wno-error` if it failed because of
/// `-Werror`.
///
/// Output is buffered so only one attempt's output ever reaches the caller:
/// the retry's when it succeeds, the original's otherwise. The returned exit
/// code matches the output shown.
pub fn double_build_with_wno_error(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    original: &Command,
) -> Result<i32> {
    let mut original_stdout = Vec::new();
    let mut original_stderr = Vec::new();
    let original_exit_code = wrap_compiler_error(
        cfg.use_cache_tool,
        original,
        env.run(
            original,
            Sink::writer(&mut original_stdout),
            Sink::writer(&mut original_stderr),
        ),
    )?;

    let original_stderr_text = String::from_utf8_lossy(&original_stderr);
    if original_exit_code == 0 || !original_stderr_text.contains(WERROR_MARKER) {
        flush_buffers(env, &original_stdout, &original_stderr)?;
        return Ok(original_exit_code);
    }

    let retry = original.with_args_appended([NO_WERROR_FLAG]);
    info!(command = %original, exit_code = original_exit_code, "retrying build with -Wno-error");
    let mut retry_stdout = Vec::new();
    let mut retry_stderr = Vec::new();
    let retry_exit_code = wrap_compiler_error(
        cfg.use_cache_tool,
        &retry,
        env.run(
            &retry,
            Sink::writer(&mut retry_stdout),
            Sink::writer(&mut retry_stderr),
        ),
    )?;

    let exit_code = if retry_exit_code == 0 {
        flush_buffers(env, &retry_stdout, &retry_stderr)?;
        0
    } else {
        flush_buffers(env, &original_stdout, &original_stderr)?;
        original_exit_code
    };

    let report = WarningsReport {
        cwd: env.getwd(),
        command: original.argv(),
        stdout: joined_output(&original_stderr, &original_stdout),
    };
    let path = write_warnings_report(&cfg.warnings_dir, &report)?;
    info!(
        report = %path.display(),
        retry_exit_code,
        "recorded -Werror failure"
    );

    Ok(exit_code)
}

fn flush_buffers(env: &dyn ProcessEnv, stdout: &[u8], stderr: &[u8]) -> Result<()> {
    env.stdout()
        .write_all(stdout)
        .map_err(|err| WrapperError::internal_io(err, "error writing compiler stdout"))?;
    env.stderr()
        .write_all(stderr)
        .map_err(|err| WrapperError::internal_io(err, "error writing compiler stderr"))?;
    Ok(())
}

/// Non-empty stderr, then non-empty stdout, newline-joined.
fn joined_output(stderr: &[u8], stdout: &[u8]) -> String {
    [stderr, stdout]
        .iter()
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Persist `report` under `dir` and return the final path.
///
/// The report is written to a `.json.incomplete` staging file and renamed
/// once fully written, so readers never see a partial report. The staging
/// file is removed on every failure path.
pub fn write_warnings_report(dir: &Path, report: &WarningsReport) -> Result<PathBuf> {
    create_shared_dir(dir).map_err(|err| {
        WrapperError::internal_io(
            err,
            format_args!("error creating warnings directory {}", dir.display()),
        )
    })?;

    let mut staged = tempfile::Builder::new()
        .prefix(REPORT_PREFIX)
        .suffix(&format!("{}{}", REPORT_SUFFIX, INCOMPLETE_SUFFIX))
        .tempfile_in(dir)
        .map_err(|err| WrapperError::internal_io(err, "error creating warnings file"))?;

    serde_json::to_writer(staged.as_file_mut(), report)
        .map_err(|err| WrapperError::internal_io(err.into(), "error writing warnings data"))?;
    staged
        .as_file_mut()
        .write_all(b"\n")
        .map_err(|err| WrapperError::internal_io(err, "error writing warnings data"))?;

    let staged_path = staged.path().to_path_buf();
    let final_path = strip_incomplete_suffix(&staged_path).ok_or_else(|| {
        WrapperError::internal(format_args!(
            "warnings file {} lacks the {} suffix",
            staged_path.display(),
            INCOMPLETE_SUFFIX
        ))
    })?;
    staged.persist(&final_path).map_err(|err| {
        WrapperError::internal_io(
            err.error,
            "error removing incomplete suffix from warnings file",
        )
    })?;
    debug!(path = %final_path.display(), "warnings report written");
    Ok(final_path)
}

fn strip_incomplete_suffix(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stripped = name.strip_suffix(INCOMPLETE_SUFFIX)?;
    Some(path.with_file_name(stripped))
}

/// Create `dir` (and parents) so that root and regular users can both write
/// into it.
#[cfg(unix)]
pub(crate) fn create_shared_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o777).create(dir)
}

#[cfg(not(unix))]
pub(crate) fn create_shared_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}
