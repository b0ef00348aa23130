//! Resource-usage instrumentation for a single compiler invocation.

use crate::command::Command;
use crate::config::WrapperConfig;
use crate::errors::{Result, WrapperError, wrap_compiler_error};
use crate::process::{ProcessEnv, Sink};
use crate::werror::create_shared_dir;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Variable naming the rusage log file. Presence enables instrumentation.
pub const RUSAGE_LOG_VAR: &str = "GETRUSAGE";

/// Rusage log destination requested by the environment, if any.
pub fn rusage_log_path(env: &dyn ProcessEnv) -> Option<PathBuf> {
    let value = env.getenv(RUSAGE_LOG_VAR);
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// CPU time and peak memory of the wrapper's reaped children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RusageSnapshot {
    pub user_time: Duration,
    pub system_time: Duration,
    /// Peak resident set size in kilobytes.
    pub max_rss_kb: i64,
}

impl RusageSnapshot {
    /// Accounting for all terminated and waited-for children of this process.
    #[cfg(unix)]
    pub fn children() -> Result<Self> {
        use nix::sys::resource::{UsageWho, getrusage};
        use nix::sys::time::TimeValLike;

        let usage = getrusage(UsageWho::RUSAGE_CHILDREN).map_err(|errno| {
            WrapperError::internal_io(errno.into(), "error reading child resource usage")
        })?;
        let micros = |tv: nix::sys::time::TimeVal| {
            Duration::from_micros(u64::try_from(tv.num_microseconds()).unwrap_or(0))
        };
        Ok(Self {
            user_time: micros(usage.user_time()),
            system_time: micros(usage.system_time()),
            max_rss_kb: i64::from(usage.max_rss()),
        })
    }

    #[cfg(not(unix))]
    pub fn children() -> Result<Self> {
        Ok(Self::default())
    }
}

/// One line of the rusage log.
#[derive(Debug, Clone, PartialEq)]
pub struct RusageRecord {
    pub wall_time: Duration,
    pub user_time: Duration,
    pub system_time: Duration,
    pub max_rss_kb: i64,
    /// Absolute path of the compiler.
    pub compiler_path: String,
    /// Compiler basename followed by the original arguments.
    pub command_line: String,
}

impl RusageRecord {
    /// Combine two snapshots taken around one compiler run.
    ///
    /// CPU times are deltas. Peak memory comes straight from `after`: the
    /// compiler is assumed to be the largest child this process ever reaped.
    pub fn from_snapshots(
        wall_time: Duration,
        before: &RusageSnapshot,
        after: &RusageSnapshot,
        compiler_path: String,
        args: &[String],
    ) -> Self {
        let basename = Path::new(&compiler_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| compiler_path.clone());
        let command_line = std::iter::once(basename.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            wall_time,
            user_time: after.user_time.saturating_sub(before.user_time),
            system_time: after.system_time.saturating_sub(before.system_time),
            max_rss_kb: after.max_rss_kb,
            compiler_path,
            command_line,
        }
    }
}

impl fmt::Display for RusageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.5} : {:.5} : {:.5} : {} : {} : {}",
            self.wall_time.as_secs_f64(),
            self.user_time.as_secs_f64(),
            self.system_time.as_secs_f64(),
            self.max_rss_kb,
            self.compiler_path,
            self.command_line
        )
    }
}

/// Run `compiler_cmd` with live output and append its resource usage to
/// `log_path`.
///
/// The child runs with `GETRUSAGE` cleared so nested wrapper invocations do
/// not log themselves again. Failing to write the log fails the call.
pub fn log_rusage(
    env: &dyn ProcessEnv,
    cfg: &WrapperConfig,
    log_path: &Path,
    compiler_cmd: &Command,
) -> Result<i32> {
    let before = RusageSnapshot::children()?;
    let child_cmd = compiler_cmd.with_env_update(format!("{}=", RUSAGE_LOG_VAR));

    let start = Instant::now();
    let exit_code = wrap_compiler_error(
        cfg.use_cache_tool,
        &child_cmd,
        env.run(&child_cmd, Sink::Inherit, Sink::Inherit),
    )?;
    let wall_time = start.elapsed();
    let after = RusageSnapshot::children()?;

    let record = RusageRecord::from_snapshots(
        wall_time,
        &before,
        &after,
        absolute_compiler_path(env, compiler_cmd.path()),
        compiler_cmd.args(),
    );
    append_record(log_path, &record)?;
    debug!(log = %log_path.display(), record = %record, "appended rusage record");
    Ok(exit_code)
}

fn absolute_compiler_path(env: &dyn ProcessEnv, path: &str) -> String {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_string_lossy().into_owned()
    } else {
        Path::new(&env.getwd())
            .join(path)
            .to_string_lossy()
            .into_owned()
    }
}

fn append_record(log_path: &Path, record: &RusageRecord) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_shared_dir(parent).map_err(|err| {
            WrapperError::internal_io(
                err,
                format_args!("error creating rusage log directory {}", log_path.display()),
            )
        })?;
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        // A root-created log must stay writable by regular users.
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    let mut file = options.open(log_path).map_err(|err| {
        WrapperError::internal_io(
            err,
            format_args!("error creating rusage logfile {}", log_path.display()),
        )
    })?;

    file.write_all(format!("{}\n", record).as_bytes())
        .map_err(|err| {
            WrapperError::internal_io(
                err,
                format_args!("error writing rusage logfile {}", log_path.display()),
            )
        })?;
    close_file(file).map_err(|err| {
        WrapperError::internal_io(
            err,
            format_args!("error closing rusage logfile {}", log_path.display()),
        )
    })
}

/// Close `file`, reporting the error `Drop` would swallow.
#[cfg(unix)]
fn close_file(file: std::fs::File) -> std::io::Result<()> {
    use std::os::fd::IntoRawFd;
    nix::unistd::close(file.into_raw_fd()).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn close_file(file: std::fs::File) -> std::io::Result<()> {
    file.sync_all()
}
