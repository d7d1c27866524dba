/// Run the `mscript` binary against script files in a temporary directory and
/// check what it prints.  Only script messages go to stdout; diagnostics go
/// through the logger on stderr.
use std::path::Path;
use std::process::{Command, Output};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_mscript"))
}

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(binary())
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to spawn mscript")
}

fn stdout_lines(out: &Output) -> Vec<String> {
    String::from_utf8_lossy(&out.stdout).lines().map(str::to_owned).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn lists_compiled_scripts() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.mos", "!button\nMute\n");
    write(dir.path(), "b.mos", "!name Second\nRecord\n");
    let out = run(dir.path(), &["-f", "-q", "a.mos", "b.mos"]);
    assert!(out.status.success());
    assert_eq!(stdout_lines(&out), vec!["a (button)", "Second"]);
}

#[test]
fn runs_a_script_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "hello.mos", "Variable n = 6 * 7\nWait frames 1000\nMessage n\n");
    let out = run(dir.path(), &["-f", "-q", "-rhello", "hello.mos"]);
    assert!(out.status.success());
    assert_eq!(stdout_lines(&out), vec!["42"]);
}

#[test]
fn config_file_supplies_scripts_and_globals() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("lib")).unwrap();
    write(&dir.path().join("lib"), "show.mos", "Variable global greeting\nMessage greeting\n");
    let cfg = write(dir.path(), "scripts.cfg", "dir lib\nset greeting=hi\ntracks 2\n");
    let out = run(dir.path(), &["-q", "-f", cfg.to_str().unwrap(), "-rshow"]);
    assert!(out.status.success());
    assert_eq!(stdout_lines(&out), vec!["hi"]);
}

#[test]
fn check_mode_reports_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ok.mos", "Mute\n");
    write(dir.path(), "bad.mos", "Proc P\n Mute\n");
    let out = run(dir.path(), &["-f", "-q", "-c", "ok.mos", "bad.mos"]);
    assert!(!out.status.success());
    let lines = stdout_lines(&out);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("bad:0: structure error"), "{lines:?}");
}

#[test]
fn bad_option_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["-z"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage: mscript"));
}
