//! Script configuration file parser.
//!
//! | Line | Action |
//! |------|--------|
//! | `script <path>` | compile one script file |
//! | `dir <path>` | compile every `*.mos` file in a directory |
//! | `set <name>=<value>` or `set <name> <value>` | initial global variable |
//! | `tracks <n>` | number of simulated tracks |
//! | Lines starting with `#` | comment, ignored |
//!
//! Relative paths are taken relative to the directory holding the file.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::warn;

use crate::script::value::Value;

/// Extension of script source files.
pub const SCRIPT_EXTENSION: &str = "mos";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Default)]
pub struct Config {
    pub scripts: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    pub globals: Vec<(String, Value)>,
    pub tracks: Option<usize>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/mscript/scripts.cfg` for the current user.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mscript").map(|d| d.config_dir().join("scripts.cfg"))
    }

    /// Parse config text.  Bad lines are reported and skipped.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (cmd, args_str) = line
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((line, ""));
            let tokens = split_args(args_str.trim());
            let result = match cmd.to_ascii_lowercase().as_str() {
                "script" => one_path(cmd, &tokens).map(|p| config.scripts.push(p)),
                "dir" => one_path(cmd, &tokens).map(|p| config.dirs.push(p)),
                "set" => parse_set(&tokens).map(|kv| config.globals.push(kv)),
                "tracks" => match tokens.first().map(|t| t.parse::<usize>()) {
                    Some(Ok(n)) if n > 0 => {
                        config.tracks = Some(n);
                        Ok(())
                    }
                    _ => Err("tracks: expected a positive number".to_string()),
                },
                _ => Err(format!("unknown directive {cmd:?}")),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        let (mut config, errors) = Self::load_str(&s);
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok((config, errors))
    }

    fn rebase(&mut self, base: &Path) {
        for p in self.scripts.iter_mut().chain(self.dirs.iter_mut()) {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }

    /// Every script file named by the config: `script` lines first, then the
    /// contents of each `dir` in name order.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files = self.scripts.clone();
        for dir in &self.dirs {
            files.extend(scripts_in(dir));
        }
        files
    }
}

/// `*.mos` files directly inside `dir`, sorted by name.
pub fn scripts_in(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("{}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == SCRIPT_EXTENSION))
        .collect();
    files.sort();
    files
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

fn one_path(cmd: &str, tokens: &[String]) -> Result<PathBuf, String> {
    match tokens {
        [path] => Ok(PathBuf::from(path)),
        [] => Err(format!("{cmd}: missing path")),
        _ => Err(format!("{cmd}: expected one path (quote paths with spaces)")),
    }
}

/// `set <name>=<value>` or `set <name> <value>`.
fn parse_set(tokens: &[String]) -> Result<(String, Value), String> {
    let Some(first) = tokens.first() else {
        return Err("set: requires an argument".into());
    };
    let (name, value) = if let Some((name, value)) = first.split_once('=') {
        let rest = &tokens[1..];
        let value = if rest.is_empty() { value.to_owned() } else { format!("{value} {}", rest.join(" ")) };
        (name.to_owned(), value)
    } else if tokens.len() >= 2 {
        (first.clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("set: missing value for '{first}'"));
    };
    if name.is_empty() {
        return Err("set: variable name cannot be empty".into());
    }
    Ok((name, Value::parse_literal(&value)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#""My Scripts/a.mos" x"#), ["My Scripts/a.mos", "x"]);
        assert_eq!(split_args(r#""say \"hi\"""#), [r#"say "hi""#]);
    }

    #[test]
    fn set_forms() {
        let (cfg, errs) = Config::load_str("set depth=4\nset label big loop\nset ratio 0.5\n");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(
            cfg.globals,
            vec![
                ("depth".to_string(), Value::Int(4)),
                ("label".to_string(), Value::from("big loop")),
                ("ratio".to_string(), Value::Float(0.5)),
            ]
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let (cfg, errs) = Config::load_str("# scripts\n\nscript\ntracks zero\nfrobnicate 1\nscript a.mos\n");
        assert_eq!(cfg.scripts, vec![PathBuf::from("a.mos")]);
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 5]);
        assert_eq!(errs[2].to_string(), "line 5: unknown directive \"frobnicate\"");
    }

    #[test]
    fn file_paths_are_relative_to_the_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/b.mos"), "Mute\n").unwrap();
        std::fs::write(dir.path().join("lib/a.mos"), "Record\n").unwrap();
        std::fs::write(dir.path().join("lib/notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("main.mos"), "Mute\n").unwrap();
        let cfg_path = dir.path().join("scripts.cfg");
        std::fs::write(&cfg_path, "script main.mos\ndir lib\ntracks 2\n").unwrap();

        let (cfg, errs) = Config::load_file(&cfg_path).unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.tracks, Some(2));
        let names: Vec<String> = cfg
            .source_files()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["main.mos", "a.mos", "b.mos"]);
    }

    #[test]
    fn default_path_ends_with_file_name() {
        if let Some(p) = Config::default_path() {
            assert!(p.ends_with("scripts.cfg"));
        }
    }
}
