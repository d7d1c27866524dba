//! Command-line argument parsing.
//!
//! Usage:
//!   mscript [-f[<file>]] [-L<dir>] [-r<script>]... [-t<n>] [-b<n>] [-s<frames>]
//!           [-cdqy] [<script.mos>...]

use std::path::PathBuf;

// ── Public types ──────────────────────────────────────────────────────────────

pub const DEFAULT_BLOCKS: u64 = 1000;
pub const DEFAULT_BLOCK_FRAMES: u64 = 256;

/// Parsed command-line arguments.
#[derive(Debug)]
pub struct CliArgs {
    /// Which config file to load.
    pub config: ConfigFile,
    /// Extra script directories (`-L<dir>`).
    pub dirs: Vec<PathBuf>,
    /// Script files named on the command line.
    pub files: Vec<PathBuf>,
    /// Scripts to trigger once compiled (`-r<script>`), in order.
    pub run: Vec<String>,
    /// Simulated track count (`-t<n>`), overriding the config file.
    pub tracks: Option<usize>,
    /// Upper bound on simulated audio blocks (`-b<n>`).
    pub blocks: u64,
    /// Frames per simulated block (`-s<frames>`).
    pub block_frames: u64,
    /// Compile and report only (`-c`).
    pub check: bool,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Errors only (`-q`).
    pub quiet: bool,
    /// Answer every prompt with "yes" instead of reading stdin (`-y`).
    pub yes: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        CliArgs {
            config: ConfigFile::default(),
            dirs: Vec::new(),
            files: Vec::new(),
            run: Vec::new(),
            tracks: None,
            blocks: DEFAULT_BLOCKS,
            block_frames: DEFAULT_BLOCK_FRAMES,
            check: false,
            debug: false,
            quiet: false,
            yes: false,
        }
    }
}

/// How to choose the script config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Use the per-user default location if it exists.
    #[default]
    Default,
    /// `-f` with no file argument: skip the config file.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Value for an option that requires one: the rest of this argument, or the
/// next argument.
fn option_value(
    flag: char,
    chars: &[char],
    j: &mut usize,
    argv: &[String],
    i: &mut usize,
) -> Result<String, String> {
    if *j + 1 < chars.len() {
        let s: String = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Ok(s)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Ok(argv[*i].clone())
    } else {
        Err(format!("-{flag} requires an argument"))
    }
}

fn number<T: std::str::FromStr>(flag: char, s: &str) -> Result<T, String> {
    s.parse().map_err(|_| format!("-{flag}: invalid number: {s}"))
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            args.files.extend(argv[i + 1..].iter().map(PathBuf::from));
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            args.files.push(PathBuf::from(arg));
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'c' => args.check = true,
                'd' => args.debug = true,
                'q' => args.quiet = true,
                'y' => args.yes = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                'L' => args.dirs.push(PathBuf::from(option_value('L', &chars, &mut j, argv, &mut i)?)),
                'r' => args.run.push(option_value('r', &chars, &mut j, argv, &mut i)?),
                't' => {
                    let n: usize = number('t', &option_value('t', &chars, &mut j, argv, &mut i)?)?;
                    if n == 0 {
                        return Err("-t: need at least one track".to_owned());
                    }
                    args.tracks = Some(n);
                }
                'b' => args.blocks = number('b', &option_value('b', &chars, &mut j, argv, &mut i)?)?,
                's' => {
                    let n: u64 = number('s', &option_value('s', &chars, &mut j, argv, &mut i)?)?;
                    if n == 0 {
                        return Err("-s: block size must be positive".to_owned());
                    }
                    args.block_frames = n;
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    if args.check && !args.run.is_empty() {
        return Err("-c and -r cannot be combined".to_owned());
    }
    Ok(args)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args() {
        let a = parse_argv(&argv(&[])).unwrap();
        assert!(matches!(a.config, ConfigFile::Default));
        assert_eq!(a.blocks, DEFAULT_BLOCKS);
        assert_eq!(a.block_frames, DEFAULT_BLOCK_FRAMES);
        assert!(a.files.is_empty() && a.run.is_empty());
    }

    #[test]
    fn combined_bool_flags() {
        let a = parse_argv(&argv(&["-dqy"])).unwrap();
        assert!(a.debug && a.quiet && a.yes && !a.check);
    }

    #[test]
    fn config_forms() {
        assert!(matches!(parse_argv(&argv(&["-f"])).unwrap().config, ConfigFile::Skip));
        let a = parse_argv(&argv(&["-fmy.cfg"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.cfg")));
        let a = parse_argv(&argv(&["-f", "my.cfg", "a.mos"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.cfg")));
        assert_eq!(a.files, vec![PathBuf::from("a.mos")]);
    }

    #[test]
    fn repeated_run_and_dirs() {
        let a = parse_argv(&argv(&["-rIntro", "-r", "Outro", "-Llib", "-L", "more"])).unwrap();
        assert_eq!(a.run, vec!["Intro", "Outro"]);
        assert_eq!(a.dirs, vec![PathBuf::from("lib"), PathBuf::from("more")]);
    }

    #[test]
    fn numeric_options() {
        let a = parse_argv(&argv(&["-t8", "-b", "50", "-s128"])).unwrap();
        assert_eq!(a.tracks, Some(8));
        assert_eq!(a.blocks, 50);
        assert_eq!(a.block_frames, 128);
        assert!(parse_argv(&argv(&["-tmany"])).is_err());
        assert!(parse_argv(&argv(&["-t0"])).is_err());
        assert!(parse_argv(&argv(&["-s", "0"])).is_err());
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(parse_argv(&argv(&["-r"])).is_err());
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["--", "-odd.mos"])).unwrap();
        assert_eq!(a.files, vec![PathBuf::from("-odd.mos")]);
    }

    #[test]
    fn check_excludes_run() {
        assert!(parse_argv(&argv(&["-c", "-rA"])).is_err());
    }

    #[test]
    fn unknown_flag() {
        assert!(parse_argv(&argv(&["-z"])).is_err());
    }
}
