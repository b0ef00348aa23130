//! `CWRAP_*` environment variables.
//!
//! Every reader records where its value came from and pushes parse failures
//! onto the parser, so `from_env` can report all bad variables in one go.

use super::source::Sourced;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

const PREFIX: &str = "CWRAP_";

/// Escape that keeps a literal comma inside one flag, as in `-Wl\,-z\,now`.
const FLAG_ESCAPE: char = '\\';
const FLAG_SEPARATOR: char = ',';

/// A `CWRAP_*` variable that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    /// One entry of a compiler flag list is malformed.
    #[error("Invalid flag #{index} in {var}: {reason} ('{entry}')")]
    InvalidFlag {
        var: String,
        index: usize,
        entry: String,
        reason: &'static str,
    },
}

/// Reader for the wrapper's environment variables.
#[derive(Debug, Default)]
pub struct EnvParser {
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Full variable name and its value, if set and valid unicode.
    fn lookup(name: &str) -> (String, Option<String>) {
        let var = format!("{}{}", PREFIX, name);
        let value = env::var(&var).ok();
        (var, value)
    }

    pub fn string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match Self::lookup(name) {
            (var, Some(value)) => Sourced::from_env(value, var),
            (_, None) => Sourced::default_value(default.to_string()),
        }
    }

    /// `1/true/yes/on` or `0/false/no/off`, any case. Empty means false.
    pub fn boolean(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(value)) = Self::lookup(name) else {
            return Sourced::default_value(default);
        };
        let parsed = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var.clone(),
                    expected: "boolean (true/false/1/0/yes/no)",
                    value,
                });
                default
            }
        };
        Sourced::from_env(parsed, var)
    }

    /// A path with `~` expanded. An empty value keeps the default.
    pub fn path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match Self::lookup(name) {
            (var, Some(value)) if !value.is_empty() => Sourced::from_env(expand(&value), var),
            _ => Sourced::default_value(expand(default)),
        }
    }

    /// A path that is unset unless the variable holds a non-empty value.
    pub fn optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        match Self::lookup(name) {
            (var, Some(value)) if value.is_empty() => Sourced::from_env(None, var),
            (var, Some(value)) => Sourced::from_env(Some(expand(&value)), var),
            (_, None) => Sourced::default_value(None),
        }
    }

    /// Comma-separated compiler flags.
    ///
    /// `\,` is a literal comma, so `-Wl\,-z\,now` stays one flag. Entries are
    /// trimmed; an empty entry, or one that is not a `-` flag, is an error and
    /// the whole list falls back to empty.
    pub fn flag_list(&mut self, name: &str) -> Sourced<Vec<String>> {
        let (var, Some(value)) = Self::lookup(name) else {
            return Sourced::default_value(Vec::new());
        };
        if value.trim().is_empty() {
            return Sourced::from_env(Vec::new(), var);
        }
        match parse_flags(&var, &value) {
            Ok(flags) => Sourced::from_env(flags, var),
            Err(err) => {
                self.errors.push(err);
                Sourced::from_env(Vec::new(), var)
            }
        }
    }
}

fn expand(value: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(value).as_ref())
}

fn parse_flags(var: &str, value: &str) -> Result<Vec<String>, EnvError> {
    let invalid = |index: usize, entry: &str, reason: &'static str| EnvError::InvalidFlag {
        var: var.to_string(),
        index,
        entry: entry.to_string(),
        reason,
    };

    let mut entries = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            FLAG_ESCAPE => match chars.next() {
                Some(escaped @ (FLAG_SEPARATOR | FLAG_ESCAPE)) => current.push(escaped),
                Some(other) => {
                    current.push(FLAG_ESCAPE);
                    current.push(other);
                }
                None => {
                    return Err(invalid(entries.len() + 1, value, "dangling escape at end of list"));
                }
            },
            FLAG_SEPARATOR => entries.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    entries.push(current);

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let flag = entry.trim();
            if flag.is_empty() {
                Err(invalid(i + 1, flag, "empty entry"))
            } else if !flag.starts_with('-') {
                Err(invalid(i + 1, flag, "not a compiler flag"))
            } else {
                Ok(flag.to_string())
            }
        })
        .collect()
}
