use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn, LevelFilter};
use tokio::runtime::Handle;

use mscript::cli::{self, CliArgs, ConfigFile};
use mscript::config::{Config, ConfigError};
use mscript::engine::{Catalog, Direction};
use mscript::script::{Compiler, ScriptRuntime, SourceUnit};
use mscript::sim::SimEngine;
use mscript::worker::{FileWorker, Prompter};

const DEFAULT_TRACKS: usize = 4;
/// Loop length of every simulated track: four seconds at 44.1 kHz.
const LOOP_FRAMES: u64 = 4 * 44_100;
/// Blocks between checks for changed autoload scripts.
const AUTOLOAD_PERIOD: u64 = 100;

const USAGE: &str = "Usage: mscript [-f[<file>]] [-L<dir>] [-r<script>]... [-t<n>] [-b<n>] [-s<frames>] [-cdqy] [<script.mos>...]";

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("mscript: {e}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };
    init_logging(&args);

    // ── Config ────────────────────────────────────────────────────────────────
    let mut config = match &args.config {
        ConfigFile::Skip => Config::new(),
        ConfigFile::Explicit(path) => match Config::load_file(path) {
            Ok((config, errors)) => {
                report_config(path, &errors);
                config
            }
            Err(e) => {
                eprintln!("mscript: {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        ConfigFile::Default => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => match Config::load_file(&path) {
                Ok((config, errors)) => {
                    report_config(&path, &errors);
                    config
                }
                Err(e) => {
                    warn!("{}: {e}", path.display());
                    Config::new()
                }
            },
            None => Config::new(),
        },
    };
    config.scripts.extend(args.files.iter().cloned());
    config.dirs.extend(args.dirs.iter().cloned());

    // ── Compile ───────────────────────────────────────────────────────────────
    let mut units = Vec::new();
    for path in config.source_files() {
        match SourceUnit::from_file(&path) {
            Ok(unit) => units.push(unit),
            Err(e) => error!("{}: {e}", path.display()),
        }
    }
    if units.is_empty() {
        eprintln!("mscript: no scripts to compile");
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let catalog = Catalog::standard();
    let (env, errors) = Compiler::new(&catalog).compile(&units);
    info!("compiled {} of {} script(s), {} diagnostic(s)", env.len(), units.len(), errors.len());

    if args.check {
        for e in &errors {
            println!("{e}");
        }
        std::process::exit(if errors.is_empty() { 0 } else { 1 });
    }

    if args.run.is_empty() {
        for script in env.scripts() {
            let flags = if script.flags.button { " (button)" } else { "" };
            println!("{}{flags}", script.name);
        }
        return;
    }

    // ── Run ───────────────────────────────────────────────────────────────────
    let mut runtime = ScriptRuntime::new(catalog, env);
    for (name, value) in config.globals {
        if let Err(e) = runtime.set_global(&name, value) {
            warn!("set {name}: {e}");
        }
    }

    let prompter: Prompter = if args.yes { Arc::new(|_: &str| 1) } else { Arc::new(ask) };
    let worker = FileWorker::new(Handle::current()).with_prompter(prompter);
    let tracks = args.tracks.or(config.tracks).unwrap_or(DEFAULT_TRACKS);
    let mut engine = SimEngine::new(tracks, LOOP_FRAMES).with_worker(worker);

    for name in &args.run {
        // A command-line trigger is a full press: down then up.
        let pressed = runtime
            .trigger(&mut engine, name, Direction::Down, Vec::new())
            .and_then(|()| runtime.trigger(&mut engine, name, Direction::Up, Vec::new()));
        if let Err(e) = pressed {
            error!("{e}");
        }
        flush_messages(&mut engine);
    }

    let mut blocks = 0;
    while !runtime.is_idle() && blocks < args.blocks {
        for notice in engine.advance(args.block_frames) {
            runtime.handle(&notice);
        }
        if let Some(worker) = engine.worker_mut() {
            for done in worker.poll() {
                runtime.thread_event_completed(done.id, done.code);
            }
        }
        runtime.run_block(&mut engine);
        flush_messages(&mut engine);
        blocks += 1;
        if blocks % AUTOLOAD_PERIOD == 0 {
            runtime.reload_changed();
        }
        tokio::task::yield_now().await;
    }

    if !runtime.is_idle() {
        warn!("still running after {blocks} block(s); canceling");
        runtime.cancel_all(&mut engine);
    }
    info!("{} function call(s) over {blocks} block(s)", engine.invoked.len());
}

fn init_logging(args: &CliArgs) {
    let level = if args.debug {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn report_config(path: &Path, errors: &[ConfigError]) {
    for e in errors {
        warn!("{}: {e}", path.display());
    }
}

fn flush_messages(engine: &mut SimEngine) {
    for m in engine.messages.drain(..) {
        println!("{m}");
    }
}

/// Ask on the terminal.  Anything but "n"/"no" counts as yes.
fn ask(text: &str) -> i64 {
    let mut err = std::io::stderr();
    let _ = write!(err, "{text} [Y/n] ");
    let _ = err.flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return 0;
    }
    match line.trim().to_ascii_lowercase().as_str() {
        "n" | "no" => 0,
        _ => 1,
    }
}
