//! Source generation for running the legacy wrapper under our control.
//!
//! The legacy wrapper is a Python script. We load its text, disable its
//! entry-point guard, and append a fixed shim that intercepts the subprocess
//! primitives it uses. Every shim parameter is embedded as one JSON document,
//! so the skeleton below is the only Python this crate ever emits.

use crate::command::CommandResult;
use crate::config::WrapperConfig;
use crate::errors::{Result, WrapperError};
use regex::Regex;
use serde::Serialize;

/// Token replaced to keep the legacy script's `main()` from running on load.
const MAIN_GUARD_TOKEN: &str = "__name__";
const MAIN_GUARD_REPLACEMENT: &str = "'none'";

/// Embedded cache-tool default in the legacy script.
const CACHE_DEFAULT_PATTERN: &str = r"True\s+#\s+@CCACHE_DEFAULT@";
const CACHE_DISABLED_REPLACEMENT: &str = "False #";

const PARAMS_PLACEHOLDER: &str = "@SHIM_PARAMS@";

const SHIM_SKELETON: &str = r#"
import json as _cwrap_json
import os
import subprocess
import sys



def _cwrap_native(value):
    if sys.version_info[0] != 2:
        return value
    if isinstance(value, dict):
        return dict((_cwrap_native(k), _cwrap_native(v)) for k, v in value.items())
    if isinstance(value, list):
        return [_cwrap_native(v) for v in value]
    if isinstance(value, unicode):
        return value.encode('utf-8')
    return value


_cwrap = _cwrap_native(_cwrap_json.loads(@SHIM_PARAMS@))
_cwrap_init_env = os.environ.copy()
_cwrap_mock_results = list(_cwrap['mock_results'])
_cwrap_string_types = (str, unicode) if sys.version_info[0] == 2 else (str,)


def _cwrap_log_cmd(args):
    if not _cwrap['log_cmds']:
        return
    if isinstance(args, _cwrap_string_types):
        args = [args]
    args = list(args)
    current_env = os.environ
    keys = set(list(current_env.keys()) + list(_cwrap_init_env.keys()))
    env_updates = sorted(k + '=' + current_env.get(k, '') for k in keys
                         if current_env.get(k, '') != _cwrap_init_env.get(k, ''))
    payload = {'path': args[0], 'args': args[1:], 'env_updates': env_updates}
    sys.stderr.write('command:' + _cwrap_json.dumps(payload) + '\n')
    sys.stderr.flush()


def _cwrap_next_result():
    return _cwrap_mock_results.pop(0)


def _cwrap_check_output(args, *popenargs, **kwargs):
    _cwrap_log_cmd(args)
    if not _cwrap['mock_cmds']:
        return _cwrap_real_check_output(args, *popenargs, **kwargs)
    result = _cwrap_next_result()
    sys.stderr.write(result['stderr'])
    if result['exit_code']:
        raise subprocess.CalledProcessError(result['exit_code'], args, result['stdout'])
    return result['stdout']


class _CwrapMockProcess(object):
    def __init__(self, result):
        self._result = result
        self.returncode = result['exit_code']

    def wait(self):
        return self.returncode

    def poll(self):
        return self.returncode

    def communicate(self, input=None):
        return (self._result['stdout'], self._result['stderr'])


def _cwrap_popen(args, *popenargs, **kwargs):
    _cwrap_log_cmd(args)
    if not _cwrap['mock_cmds']:
        return _cwrap_real_popen(args, *popenargs, **kwargs)
    result = _cwrap_next_result()
    if kwargs.get('stdout') is None:
        sys.stdout.write(result['stdout'])
    if kwargs.get('stderr') is None:
        sys.stderr.write(result['stderr'])
    return _CwrapMockProcess(result)


def _cwrap_execv(binary, args):
    _cwrap_log_cmd([binary] + list(args[1:]))
    if not _cwrap['mock_cmds']:
        return _cwrap_real_execv(binary, args)
    result = _cwrap_next_result()
    sys.stdout.write(result['stdout'])
    sys.stderr.write(result['stderr'])
    sys.stdout.flush()
    sys.stderr.flush()
    sys.exit(result['exit_code'])


_cwrap_real_check_output = subprocess.check_output
subprocess.check_output = _cwrap_check_output
_cwrap_real_popen = subprocess.Popen
subprocess.Popen = _cwrap_popen
_cwrap_real_execv = os.execv
os.execv = _cwrap_execv

sys.argv[0] = _cwrap['cmd_path']

ROOT_REL_PATH = _cwrap['root_rel_path']

if _cwrap['overwrite_config']:
    FLAGS_TO_ADD = set(_cwrap['common_flags'])
    GCC_FLAGS_TO_ADD = set(_cwrap['gcc_flags'])
    CLANG_FLAGS_TO_ADD = set(_cwrap['clang_flags'])

sys.exit(main())
"#;

/// Outcome replayed to one intercepted legacy subprocess call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MockResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl From<&CommandResult> for MockResult {
    fn from(result: &CommandResult) -> Self {
        Self {
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
        }
    }
}

/// Substitution parameters for the shim skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShimParams {
    /// Replaces `sys.argv[0]`.
    pub cmd_path: String,
    pub root_rel_path: String,
    /// Emit a marker line on stderr for every intercepted call.
    pub log_cmds: bool,
    /// Replay `mock_results` instead of running real subprocesses.
    pub mock_cmds: bool,
    pub mock_results: Vec<MockResult>,
    /// Replace the legacy flag sets with the lists below.
    pub overwrite_config: bool,
    pub common_flags: Vec<String>,
    pub gcc_flags: Vec<String>,
    pub clang_flags: Vec<String>,
}

impl ShimParams {
    /// Parameters that let the legacy wrapper run unobserved and unmocked.
    pub fn new(cfg: &WrapperConfig, cmd_path: impl Into<String>) -> Self {
        Self {
            cmd_path: cmd_path.into(),
            root_rel_path: cfg.root_rel_path.clone(),
            log_cmds: false,
            mock_cmds: false,
            mock_results: Vec::new(),
            overwrite_config: false,
            common_flags: cfg.common_flags.clone(),
            gcc_flags: cfg.gcc_flags.clone(),
            clang_flags: cfg.clang_flags.clone(),
        }
    }
}

/// Make the legacy source safe to load as a library.
///
/// The entry-point guard is neutralized. With the cache tool disabled, the
/// embedded cache default is flipped to `False`.
pub fn patch_legacy_source(source: &str, use_cache_tool: bool) -> Result<String> {
    let patched = source.replace(MAIN_GUARD_TOKEN, MAIN_GUARD_REPLACEMENT);
    if use_cache_tool {
        return Ok(patched);
    }
    let cache_default = Regex::new(CACHE_DEFAULT_PATTERN).map_err(|err| {
        WrapperError::internal(format_args!("failed to compile cache default pattern: {}", err))
    })?;
    Ok(cache_default
        .replace_all(&patched, CACHE_DISABLED_REPLACEMENT)
        .into_owned())
}

/// The patched legacy source followed by the shim.
pub fn render_shim(patched_source: &str, params: &ShimParams) -> Result<String> {
    let json = serde_json::to_string(params).map_err(|err| {
        WrapperError::internal(format_args!("failed to encode legacy shim parameters: {}", err))
    })?;
    let skeleton =
        SHIM_SKELETON.replace(PARAMS_PLACEHOLDER, &python_string_literal(&ascii_json(&json)));

    let mut out = String::with_capacity(patched_source.len() + skeleton.len() + 1);
    out.push_str(patched_source);
    if !patched_source.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&skeleton);
    Ok(out)
}

/// Escape every non-ASCII character of a JSON text as `\uXXXX`, so the text
/// can live in a Python source file without an encoding declaration.
fn ascii_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Single-quoted Python literal for printable ASCII text.
fn python_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ShimParams {
        let cfg = WrapperConfig::builder()
            .common_flags(["-fstack-protector-strong"])
            .clang_flags(["-Qunused-arguments"])
            .root_rel_path("../../..")
            .build();
        ShimParams::new(&cfg, "/usr/bin/x86_64-cros-linux-gnu-clang")
    }

    #[test]
    fn test_patch_disables_main_guard() {
        let source = "def main():\n  pass\n\nif __name__ == '__main__':\n  sys.exit(main())\n";
        let patched = patch_legacy_source(source, true).unwrap();
        assert!(patched.contains("if 'none' == '__main__':"));
        assert!(!patched.contains("__name__"));
    }

    #[test]
    fn test_patch_flips_cache_default_only_when_disabled() {
        let source = "USE_CCACHE = True  #  @CCACHE_DEFAULT@\n";
        assert_eq!(patch_legacy_source(source, true).unwrap(), source);
        assert_eq!(
            patch_legacy_source(source, false).unwrap(),
            "USE_CCACHE = False #\n"
        );
    }

    #[test]
    fn test_render_appends_skeleton_after_source() {
        let rendered = render_shim("def main():\n  return 0", &params()).unwrap();
        assert!(rendered.starts_with("def main():\n  return 0\n"));
        assert!(rendered.contains("subprocess.check_output = _cwrap_check_output"));
        assert!(rendered.contains("subprocess.Popen = _cwrap_popen"));
        assert!(rendered.contains("os.execv = _cwrap_execv"));
        assert!(rendered.trim_end().ends_with("sys.exit(main())"));
        assert!(!rendered.contains(PARAMS_PLACEHOLDER));
    }

    #[test]
    fn test_params_survive_quoting() {
        let mut params = params();
        params.mock_cmds = true;
        params.mock_results.push(MockResult {
            stdout: "it's \"quoted\"\\n".to_string(),
            stderr: "caf\u{e9} \u{1f600}\n".to_string(),
            exit_code: 1,
        });
        let rendered = render_shim("", &params).unwrap();

        let line = rendered
            .lines()
            .find(|line| line.starts_with("_cwrap = _cwrap_native(_cwrap_json.loads("))
            .unwrap();
        assert!(line.is_ascii());
        let literal = line
            .strip_prefix("_cwrap = _cwrap_native(_cwrap_json.loads('")
            .and_then(|rest| rest.strip_suffix("'))"))
            .unwrap();
        // Undo the Python literal escaping, then decode the JSON.
        let unescaped = literal.replace("\\'", "'").replace("\\\\", "\\");
        let decoded: serde_json::Value = serde_json::from_str(&unescaped).unwrap();

        assert_eq!(decoded["cmd_path"], "/usr/bin/x86_64-cros-linux-gnu-clang");
        assert_eq!(decoded["root_rel_path"], "../../..");
        assert_eq!(decoded["mock_cmds"], true);
        assert_eq!(decoded["mock_results"][0]["stdout"], "it's \"quoted\"\\n");
        assert_eq!(decoded["mock_results"][0]["stderr"], "caf\u{e9} \u{1f600}\n");
        assert_eq!(decoded["mock_results"][0]["exit_code"], 1);
        assert_eq!(decoded["clang_flags"][0], "-Qunused-arguments");
    }

    #[test]
    fn test_ascii_json_uses_surrogate_pairs() {
        assert_eq!(ascii_json("\"\u{1f600}\""), "\"\\ud83d\\ude00\"");
    }
}
