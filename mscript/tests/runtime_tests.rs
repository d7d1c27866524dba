//! End-to-end behaviour of compiled scripts running against the simulated
//! engine.

use std::sync::Arc;

use mscript::engine::{Catalog, Direction, EngineNotice};
use mscript::script::compile::CompileErrorKind;
use mscript::script::interp::{RunContext, RunState};
use mscript::script::stack::Frame;
use mscript::script::vars::{TrackVariables, Variables};
use mscript::script::{Compiler, Environment, Interpreter, ScriptRuntime, SourceUnit};
use mscript::sim::SimEngine;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn runtime(sources: &[(&str, &str)]) -> ScriptRuntime {
    let catalog = Catalog::standard();
    let units: Vec<SourceUnit> = sources.iter().map(|(n, t)| SourceUnit::new(n, t)).collect();
    let (env, errors) = Compiler::new(&catalog).compile(&units);
    assert!(errors.iter().all(|e| !e.kind.is_fatal()), "{errors:?}");
    ScriptRuntime::new(catalog, env)
}

fn press(rt: &mut ScriptRuntime, engine: &mut SimEngine, name: &str) {
    rt.trigger(engine, name, Direction::Down, Vec::new()).unwrap();
}

/// Advance the transport by one block and let the runtime react.
fn block(rt: &mut ScriptRuntime, engine: &mut SimEngine, frames: u64) {
    for notice in engine.advance(frames) {
        rt.handle(&notice);
    }
    rt.run_block(engine);
}

fn invoked(engine: &SimEngine) -> Vec<String> {
    engine.invoked.iter().map(|c| c.name.clone()).collect()
}

/// Run one interpreter directly, with its own variable tables.
fn run_alone(
    engine: &mut SimEngine,
    catalog: &Catalog,
    env: &Environment,
    it: &mut Interpreter,
) -> RunState {
    let mut globals = Variables::new();
    let mut track_vars = TrackVariables::new();
    let mut ctx = RunContext { engine, catalog, env, globals: &mut globals, track_vars: &mut track_vars };
    it.run(&mut ctx, false)
}

// ── Waits ─────────────────────────────────────────────────────────────────────

#[test]
fn wait_frame_then_mute() {
    let mut rt = runtime(&[("s", "Wait frame 100\nMute\n")]);
    let mut engine = SimEngine::new(2, 1000);
    press(&mut rt, &mut engine, "s");

    let it = rt.interpreters().next().unwrap();
    assert!(it.is_waiting());
    assert!(matches!(it.stack().top(), Some(Frame::Wait(w)) if w.target_frame == Some(100)));

    block(&mut rt, &mut engine, 60);
    assert!(invoked(&engine).is_empty());
    block(&mut rt, &mut engine, 40);
    assert_eq!(invoked(&engine), vec!["Mute"]);
    assert!(rt.is_idle());
}

#[test]
fn event_wait_ignores_block_boundaries() {
    let mut rt = runtime(&[("s", "Wait frame 500\nMessage after\n")]);
    let mut engine = SimEngine::new(1, 1000);
    press(&mut rt, &mut engine, "s");

    // No transport movement: block boundaries alone change nothing.
    for _ in 0..5 {
        rt.run_block(&mut engine);
    }
    assert!(engine.messages.is_empty());
    assert!(!rt.is_idle());

    let notices = engine.advance(500);
    assert!(notices.iter().any(|n| matches!(n, EngineNotice::EventCompleted(_))));
    for n in &notices {
        rt.handle(n);
    }
    rt.run_block(&mut engine);
    assert_eq!(engine.messages, vec!["after"]);
}

#[test]
fn canceled_wait_releases_its_event_without_running_it() {
    let mut rt = runtime(&[("s", "Wait frame 300\nMute\n")]);
    let mut engine = SimEngine::new(1, 1000);
    press(&mut rt, &mut engine, "s");
    let pending = engine.pending_events();
    assert_eq!(pending.len(), 1);

    rt.cancel_all(&mut engine);
    assert_eq!(engine.canceled, pending);
    assert!(engine.pending_events().is_empty());
    assert!(rt.is_idle());

    for _ in 0..4 {
        block(&mut rt, &mut engine, 100);
    }
    assert!(invoked(&engine).is_empty());
}

#[test]
fn wait_last_follows_the_most_recent_event() {
    let src = "Wait frame 50\nMessage first\nWait last\nMessage second\n";
    let mut rt = runtime(&[("s", src)]);
    let mut engine = SimEngine::new(1, 1000);
    press(&mut rt, &mut engine, "s");
    block(&mut rt, &mut engine, 50);
    // The frame wait already completed; nothing is outstanding.
    assert_eq!(engine.messages, vec!["first", "second"]);
}

// ── Compile and link ──────────────────────────────────────────────────────────

#[test]
fn missing_script_call_is_a_no_op() {
    let catalog = Catalog::standard();
    let units = [SourceUnit::new("s", "Call Foo\nMute\n")];
    let (env, errors) = Compiler::new(&catalog).compile(&units);
    assert_eq!(env.len(), 1);
    assert!(errors.iter().any(|e| e.kind == CompileErrorKind::Link && e.message.contains("Foo")));

    let mut rt = ScriptRuntime::new(catalog, env);
    let mut engine = SimEngine::new(1, 1000);
    press(&mut rt, &mut engine, "s");
    assert_eq!(invoked(&engine), vec!["Mute"]);
    assert!(rt.is_idle());
}

#[test]
fn local_procedures_do_not_need_the_registry() {
    let src = "Variable total = 0\n\
               Proc Twice\n Set total total + $1 * 2\nEndproc\n\
               Call Twice 3\nCall Twice 4\nMessage total\n";
    let catalog = Catalog::standard();
    let compiler = Compiler::new(&catalog);

    let mut errors = Vec::new();
    let alone = compiler.prepare(&SourceUnit::new("s", src), &mut errors).unwrap();
    assert!(errors.is_empty(), "{errors:?}");

    let (batch, _) = compiler.compile(&[
        SourceUnit::new("s", src),
        SourceUnit::new("Other", "Mute\n"),
    ]);

    let mut with_registry = SimEngine::new(1, 1000);
    let mut it = Interpreter::new(1, Arc::clone(batch.find("s").unwrap()));
    assert_eq!(run_alone(&mut with_registry, &catalog, &batch, &mut it), RunState::Finished);

    let mut without = SimEngine::new(1, 1000);
    let empty = Environment::new(Vec::new());
    let mut it = Interpreter::new(1, Arc::new(alone));
    assert_eq!(run_alone(&mut without, &catalog, &empty, &mut it), RunState::Finished);

    assert_eq!(with_registry.messages, vec!["14"]);
    assert_eq!(without.messages, with_registry.messages);
}

#[test]
fn unclosed_proc_drops_only_that_script() {
    let catalog = Catalog::standard();
    let units = [
        SourceUnit::new("Broken", "Proc P\n Mute\n"),
        SourceUnit::new("Fine", "Mute\n"),
    ];
    let (env, errors) = Compiler::new(&catalog).compile(&units);
    assert!(env.find("Broken").is_none());
    assert!(env.find("Fine").is_some());
    assert!(errors.iter().any(|e| e.kind == CompileErrorKind::Structure && e.script == "Broken"));
}

#[test]
fn scripts_call_each_other_with_arguments() {
    let mut rt = runtime(&[
        ("Main", "Call Helper 5\nMessage back\n"),
        ("Helper", "Message $1\n"),
    ]);
    let mut engine = SimEngine::new(1, 1000);
    press(&mut rt, &mut engine, "Main");
    assert_eq!(engine.messages, vec!["5", "back"]);
}

// ── Iteration ─────────────────────────────────────────────────────────────────

#[test]
fn for_each_uses_a_snapshot_of_matching_tracks() {
    // Each pass unmutes its track, so the selector's live answer shrinks.
    let mut rt = runtime(&[("s", "For muted\n Mute\n Message trackNumber\nNext\nMessage done\n")]);
    let mut engine = SimEngine::new(6, 1000);
    for i in [0, 2, 5] {
        engine.tracks[i].muted = true;
    }
    press(&mut rt, &mut engine, "s");
    assert_eq!(engine.messages, vec!["1", "3", "6", "done"]);
    assert!(engine.tracks.iter().all(|t| !t.muted));
}

#[test]
fn waits_inside_iteration_resume_the_loop() {
    let src = "For all\n Wait frames 10\n Message trackNumber\nNext\n";
    let mut rt = runtime(&[("s", src)]);
    let mut engine = SimEngine::new(2, 1000);
    press(&mut rt, &mut engine, "s");
    assert!(engine.messages.is_empty());
    for _ in 0..4 {
        block(&mut rt, &mut engine, 10);
    }
    assert_eq!(engine.messages, vec!["1", "2"]);
    assert!(rt.is_idle());
}

// ── Variables ─────────────────────────────────────────────────────────────────

#[test]
fn global_variables_outlive_invocations() {
    let mut rt = runtime(&[("Count", "Variable global hits\nSet hits hits + 1\nMessage hits\n")]);
    let mut engine = SimEngine::new(1, 1000);
    for _ in 0..3 {
        press(&mut rt, &mut engine, "Count");
    }
    assert_eq!(engine.messages, vec!["1", "2", "3"]);
}

#[test]
fn track_variables_are_per_track() {
    let src = "Variable track takes\nSet takes takes + 1\nMessage takes\n";
    let mut rt = runtime(&[("s", src)]);
    let mut engine = SimEngine::new(2, 1000);
    press(&mut rt, &mut engine, "s");
    press(&mut rt, &mut engine, "s");
    engine.active = mscript::engine::TrackId(1);
    press(&mut rt, &mut engine, "s");
    assert_eq!(engine.messages, vec!["1", "2", "1"]);
}
