//! Wrapper configuration.
//!
//! [`WrapperConfig`] is built once at process start and passed by reference to
//! every component that needs it. Nothing mutates it afterwards.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_WARNINGS_DIR: &str = "/tmp/fatal_clang_warnings";
pub const DEFAULT_CACHE_TOOL: &str = "/usr/bin/ccache";
pub const DEFAULT_LEGACY_INTERPRETER: &str = "/usr/bin/python2";

/// Process-wide, read-only configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperConfig {
    /// Flags added to every compiler invocation.
    pub common_flags: Vec<String>,
    /// Flags added to gcc invocations.
    pub gcc_flags: Vec<String>,
    /// Flags added to clang invocations.
    pub clang_flags: Vec<String>,
    /// The legacy wrapper script. Relative paths resolve against the
    /// directory of the invoked wrapper. Forwarding and comparison are off
    /// while this is unset.
    pub legacy_wrapper_path: Option<PathBuf>,
    /// Interpreter that runs the legacy wrapper.
    pub legacy_interpreter: PathBuf,
    /// Path assigned to the legacy wrapper's `ROOT_REL_PATH`.
    pub root_rel_path: String,
    /// Where warnings reports are written.
    pub warnings_dir: PathBuf,
    /// Run the compiler through the cache tool.
    pub use_cache_tool: bool,
    pub cache_tool_path: PathBuf,
    /// Replay recorded results to the legacy wrapper instead of letting it
    /// run real subprocesses during comparison.
    pub mock_legacy_cmds: bool,
    /// Replace the legacy wrapper's embedded flag sets with ours.
    pub overwrite_legacy_config: bool,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            common_flags: Vec::new(),
            gcc_flags: Vec::new(),
            clang_flags: Vec::new(),
            legacy_wrapper_path: None,
            legacy_interpreter: PathBuf::from(DEFAULT_LEGACY_INTERPRETER),
            root_rel_path: String::new(),
            warnings_dir: PathBuf::from(DEFAULT_WARNINGS_DIR),
            use_cache_tool: false,
            cache_tool_path: PathBuf::from(DEFAULT_CACHE_TOOL),
            mock_legacy_cmds: true,
            overwrite_legacy_config: false,
        }
    }
}

impl WrapperConfig {
    pub fn builder() -> WrapperConfigBuilder {
        WrapperConfigBuilder::default()
    }

    /// Read the configuration from `CWRAP_*` variables.
    ///
    /// All invalid values are collected and returned together.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let defaults = Self::default();

        let common_flags = parser.flag_list("COMMON_FLAGS");
        let gcc_flags = parser.flag_list("GCC_FLAGS");
        let clang_flags = parser.flag_list("CLANG_FLAGS");
        let legacy_wrapper_path = parser.optional_path("LEGACY_WRAPPER");
        let legacy_interpreter =
            parser.path("LEGACY_INTERPRETER", DEFAULT_LEGACY_INTERPRETER);
        let root_rel_path = parser.string("ROOT_REL_PATH", &defaults.root_rel_path);
        let warnings_dir = parser.path("WARNINGS_DIR", DEFAULT_WARNINGS_DIR);
        let use_cache_tool = parser.boolean("USE_CACHE_TOOL", defaults.use_cache_tool);
        let cache_tool = parser.path("CACHE_TOOL", DEFAULT_CACHE_TOOL);
        let mock_legacy_cmds = parser.boolean("MOCK_LEGACY_CMDS", defaults.mock_legacy_cmds);
        let overwrite_legacy_config =
            parser.boolean("OVERWRITE_LEGACY_CONFIG", defaults.overwrite_legacy_config);

        if parser.has_errors() {
            return Err(parser.take_errors());
        }

        debug!(
            legacy_wrapper = ?legacy_wrapper_path.value,
            legacy_wrapper_source = %legacy_wrapper_path.source,
            warnings_dir = %warnings_dir.value.display(),
            warnings_dir_source = %warnings_dir.source,
            use_cache_tool = use_cache_tool.value,
            "loaded wrapper configuration"
        );

        Ok(Self {
            common_flags: common_flags.into_value(),
            gcc_flags: gcc_flags.into_value(),
            clang_flags: clang_flags.into_value(),
            legacy_wrapper_path: legacy_wrapper_path.into_value(),
            legacy_interpreter: legacy_interpreter.into_value(),
            root_rel_path: root_rel_path.into_value(),
            warnings_dir: warnings_dir.into_value(),
            use_cache_tool: use_cache_tool.value,
            cache_tool_path: resolve_cache_tool(&cache_tool.value),
            mock_legacy_cmds: mock_legacy_cmds.value,
            overwrite_legacy_config: overwrite_legacy_config.value,
        })
    }
}

/// Resolve a bare tool name through `PATH`; paths are kept as given.
fn resolve_cache_tool(tool: &Path) -> PathBuf {
    if tool.components().count() > 1 {
        return tool.to_path_buf();
    }
    which::which(tool).unwrap_or_else(|_| tool.to_path_buf())
}

/// Builder for [`WrapperConfig`].
#[derive(Debug, Clone, Default)]
pub struct WrapperConfigBuilder {
    config: WrapperConfig,
}

impl WrapperConfigBuilder {
    pub fn common_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.common_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn gcc_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.gcc_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn clang_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.clang_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn legacy_wrapper_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.legacy_wrapper_path = Some(path.into());
        self
    }

    pub fn legacy_interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.legacy_interpreter = path.into();
        self
    }

    pub fn root_rel_path(mut self, path: impl Into<String>) -> Self {
        self.config.root_rel_path = path.into();
        self
    }

    pub fn warnings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.warnings_dir = dir.into();
        self
    }

    pub fn use_cache_tool(mut self, enabled: bool) -> Self {
        self.config.use_cache_tool = enabled;
        self
    }

    pub fn cache_tool_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_tool_path = path.into();
        self
    }

    pub fn mock_legacy_cmds(mut self, enabled: bool) -> Self {
        self.config.mock_legacy_cmds = enabled;
        self
    }

    pub fn overwrite_legacy_config(mut self, enabled: bool) -> Self {
        self.config.overwrite_legacy_config = enabled;
        self
    }

    pub fn build(self) -> WrapperConfig {
        self.config
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
