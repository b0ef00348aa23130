//! Recovering and diffing the legacy wrapper's subprocess invocations.

use crate::command::Command;
use serde::Deserialize;
use std::fmt;
use tracing::warn;

/// Prefix of the stderr lines the legacy shim emits for each intercepted call.
pub const COMMAND_MARKER: &str = "command:";

#[derive(Debug, Deserialize)]
struct MarkerPayload {
    path: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env_updates: Vec<String>,
}

/// Split the legacy wrapper's stderr into the commands it reported and the
/// remaining diagnostic text.
///
/// The remaining text keeps its line order and is trimmed at both ends. A
/// marker line whose payload does not parse is kept as diagnostic text.
pub fn parse_legacy_commands(stderr: &str) -> (Vec<Command>, String) {
    let mut commands = Vec::new();
    let mut remaining = Vec::new();

    for line in stderr.split('\n') {
        let Some(payload) = line.strip_prefix(COMMAND_MARKER) else {
            remaining.push(line);
            continue;
        };
        match serde_json::from_str::<MarkerPayload>(payload) {
            Ok(payload) => commands.push(
                Command::new(payload.path, payload.args).with_env_updates(payload.env_updates),
            ),
            Err(err) => {
                warn!(line, error = %err, "unparseable legacy command marker");
                remaining.push(line);
            }
        }
    }

    (commands, remaining.join("\n").trim().to_string())
}

/// One way two commands at the same index differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Path,
    Args,
    EnvUpdates,
    /// The legacy wrapper ran a command the new implementation did not.
    MissingCommand,
    /// The new implementation ran a command the legacy wrapper did not.
    ExtraCommand,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => write!(f, "path"),
            Self::Args => write!(f, "args"),
            Self::EnvUpdates => write!(f, "env updates"),
            Self::MissingCommand => write!(f, "missing command"),
            Self::ExtraCommand => write!(f, "extra command"),
        }
    }
}

/// Index-by-index comparison of two command lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandListDiff {
    /// Differences found at each index, empty where the commands agree.
    pub per_index: Vec<Vec<DiffKind>>,
}

impl CommandListDiff {
    pub fn has_differences(&self) -> bool {
        self.per_index.iter().any(|kinds| !kinds.is_empty())
    }

    /// `(index, kind)` for every difference found.
    pub fn differences(&self) -> impl Iterator<Item = (usize, DiffKind)> + '_ {
        self.per_index
            .iter()
            .enumerate()
            .flat_map(|(index, kinds)| kinds.iter().map(move |kind| (index, *kind)))
    }

    /// Human-readable report listing every index followed by both command
    /// lists.
    pub fn describe(&self, old: &[Command], new: &[Command]) -> String {
        let mut out = String::from("commands differ:");
        for (index, kinds) in self.per_index.iter().enumerate() {
            let kinds = if kinds.is_empty() {
                "none".to_string()
            } else {
                kinds
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            };
            out.push_str(&format!("\nIndex {}: {}", index, kinds));
        }
        out.push_str(&format!("\nOld:\n{}", dump_commands(old)));
        out.push_str(&format!("\nNew:\n{}", dump_commands(new)));
        out
    }
}

/// Compare `old` (legacy) against `new` index by index.
///
/// Paths and arguments must match exactly. Environment updates are compared
/// as sorted copies, so only the set of updates matters.
pub fn diff_commands(old: &[Command], new: &[Command]) -> CommandListDiff {
    let len = old.len().max(new.len());
    let per_index = (0..len)
        .map(|index| match (old.get(index), new.get(index)) {
            (Some(_), None) => vec![DiffKind::MissingCommand],
            (None, Some(_)) => vec![DiffKind::ExtraCommand],
            (Some(old_cmd), Some(new_cmd)) => diff_pair(old_cmd, new_cmd),
            (None, None) => Vec::new(),
        })
        .collect();
    CommandListDiff { per_index }
}

fn diff_pair(old: &Command, new: &Command) -> Vec<DiffKind> {
    let mut kinds = Vec::new();
    if old.path() != new.path() {
        kinds.push(DiffKind::Path);
    }
    if old.args() != new.args() {
        kinds.push(DiffKind::Args);
    }
    if sorted(old.env_updates()) != sorted(new.env_updates()) {
        kinds.push(DiffKind::EnvUpdates);
    }
    kinds
}

fn sorted(updates: &[String]) -> Vec<&str> {
    let mut updates: Vec<&str> = updates.iter().map(String::as_str).collect();
    updates.sort_unstable();
    updates
}

fn dump_commands(cmds: &[Command]) -> String {
    cmds.iter()
        .map(|cmd| format!("{:?}", cmd))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(path: &str, args: &[&str], env: &[&str]) -> Command {
        Command::new(path, args.iter().copied()).with_env_updates(env.iter().copied())
    }

    #[test]
    fn test_env_update_order_is_ignored() {
        let old = vec![cmd("/usr/bin/gcc", &["-c", "a.c"], &["B=2", "A=1"])];
        let new = vec![cmd("/usr/bin/gcc", &["-c", "a.c"], &["A=1", "B=2"])];

        let diff = diff_commands(&old, &new);
        assert!(!diff.has_differences());
        // Inputs are left untouched.
        assert_eq!(old[0].env_updates(), ["B=2", "A=1"]);
    }

    #[test]
    fn test_arg_order_matters() {
        let old = vec![
            cmd("/usr/bin/gcc", &["-c", "a.c"], &[]),
            cmd("/usr/bin/gcc", &["-o", "a", "a.o"], &[]),
        ];
        let new = vec![
            cmd("/usr/bin/gcc", &["-c", "a.c"], &[]),
            cmd("/usr/bin/gcc", &["a.o", "-o", "a"], &[]),
        ];

        let diff = diff_commands(&old, &new);
        assert_eq!(diff.differences().collect::<Vec<_>>(), vec![(1, DiffKind::Args)]);
    }

    #[test]
    fn test_each_field_reported_independently() {
        let old = vec![cmd("/usr/bin/gcc", &["a.c"], &["A=1"])];
        let new = vec![cmd("/usr/bin/clang", &["b.c"], &["A=2"])];

        let diff = diff_commands(&old, &new);
        assert_eq!(
            diff.per_index,
            vec![vec![DiffKind::Path, DiffKind::Args, DiffKind::EnvUpdates]]
        );
    }

    #[test]
    fn test_longer_legacy_list_reports_one_missing_command() {
        let shared = cmd("/usr/bin/gcc", &["-c", "a.c"], &[]);
        let old = vec![shared.clone(), cmd("/usr/bin/objcopy", &["a.o"], &[])];
        let new = vec![shared];

        let diff = diff_commands(&old, &new);
        assert_eq!(
            diff.differences().collect::<Vec<_>>(),
            vec![(1, DiffKind::MissingCommand)]
        );
    }

    #[test]
    fn test_longer_new_list_reports_extra_command() {
        let shared = cmd("/usr/bin/gcc", &["-c", "a.c"], &[]);
        let old = vec![shared.clone()];
        let new = vec![shared.clone(), shared];

        let diff = diff_commands(&old, &new);
        assert_eq!(
            diff.differences().collect::<Vec<_>>(),
            vec![(1, DiffKind::ExtraCommand)]
        );
    }

    #[test]
    fn test_describe_lists_every_index() {
        let old = vec![cmd("/usr/bin/gcc", &["a.c"], &[]), cmd("/bin/true", &[], &[])];
        let new = vec![cmd("/usr/bin/gcc", &["a.c"], &[])];

        let text = diff_commands(&old, &new).describe(&old, &new);
        assert!(text.starts_with("commands differ:\nIndex 0: none\nIndex 1: missing command\n"));
        assert!(text.contains("\nOld:\n"));
        assert!(text.contains("/bin/true"));
        assert!(text.contains("\nNew:\n"));
    }

    #[test]
    fn test_parse_legacy_commands() {
        let stderr = concat!(
            "warning: something\n",
            "command:{\"path\":\"/usr/bin/gcc\",\"args\":[\"-c\",\"a file.c\"],\"env_updates\":[\"X=1\"]}\n",
            "command:{\"path\":\"/bin/true\"}\n",
            "last line\n",
        );

        let (cmds, remaining) = parse_legacy_commands(stderr);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].path(), "/usr/bin/gcc");
        assert_eq!(cmds[0].args(), ["-c", "a file.c"]);
        assert_eq!(cmds[0].env_updates(), ["X=1"]);
        assert!(cmds[1].args().is_empty());
        assert!(cmds[1].env_updates().is_empty());
        assert_eq!(remaining, "warning: something\nlast line");
    }

    #[test]
    fn test_marker_must_start_the_line() {
        let (cmds, remaining) = parse_legacy_commands("  command:{\"path\":\"x\"}\ncommand:not json");
        assert!(cmds.is_empty());
        assert_eq!(remaining, "command:{\"path\":\"x\"}\ncommand:not json");
    }
}
