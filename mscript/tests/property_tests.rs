use std::sync::Arc;

use proptest::prelude::*;

use mscript::engine::Catalog;
use mscript::script::interp::{RunContext, RunState, MAX_LOOPS};
use mscript::script::parse::parse_script;
use mscript::script::vars::{TrackVariables, Variables};
use mscript::script::{Compiler, Environment, Interpreter, SourceUnit};
use mscript::sim::SimEngine;

/// Compile one script and run it once from the top.
fn run_once(src: &str, engine: &mut SimEngine) -> (RunState, Interpreter) {
    let catalog = Catalog::standard();
    let (env, errors) = Compiler::new(&catalog).compile(&[SourceUnit::new("s", src)]);
    assert!(errors.is_empty(), "{errors:?}");
    let script = env.find("s").map(Arc::clone).unwrap();
    let mut it = Interpreter::new(1, script);
    let mut globals = Variables::new();
    let mut track_vars = TrackVariables::new();
    let state = run_in(engine, &catalog, &env, &mut globals, &mut track_vars, &mut it);
    (state, it)
}

fn run_in(
    engine: &mut SimEngine,
    catalog: &Catalog,
    env: &Environment,
    globals: &mut Variables,
    track_vars: &mut TrackVariables,
    it: &mut Interpreter,
) -> RunState {
    let mut ctx = RunContext { engine, catalog, env, globals, track_vars };
    it.run(&mut ctx, false)
}

proptest! {
    /// Arbitrary text parses to a script or to diagnostics, never a panic.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = parse_script("fuzz", &s);
    }

    /// Line-shaped input built from real keywords is just as safe.
    #[test]
    fn keyword_soup_does_not_panic(lines in prop::collection::vec(
        (prop::sample::select(vec![
            "Wait", "For", "Next", "If", "Else", "Endif", "Proc", "Endproc", "Param",
            "Endparam", "Jump", "Label", "Call", "Set", "Variable", "Repeat", "While",
            "Break", "!sustain", "!name", "Mute", "Message",
        ]), "[ a-z0-9$=<>+*()!\"-]{0,16}"),
        0..24,
    )) {
        let src: String = lines.iter().map(|(k, rest)| format!("{k} {rest}\n")).collect();
        let catalog = Catalog::standard();
        let _ = Compiler::new(&catalog).compile(&[SourceUnit::new("soup", &src)]);
    }
}

proptest! {
    /// A script with no waits or loops finishes in one run and executes
    /// every statement.
    #[test]
    fn straight_line_runs_everything(values in prop::collection::vec(-1000i64..1000, 1..40)) {
        let src: String = values.iter().map(|v| format!("Message {v}\n")).collect();
        let mut engine = SimEngine::new(1, 1000);
        let (state, it) = run_once(&src, &mut engine);
        prop_assert_eq!(state, RunState::Finished);
        prop_assert!(it.is_finished());
        let expected: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        prop_assert_eq!(engine.messages, expected);
    }

    /// `For muted` visits exactly the tracks muted when the loop started,
    /// even though every pass unmutes the track it is on.
    #[test]
    fn for_each_runs_once_per_snapshot_track(muted in prop::collection::vec(any::<bool>(), 1..8)) {
        let mut engine = SimEngine::new(muted.len(), 1000);
        for (t, &m) in engine.tracks.iter_mut().zip(&muted) {
            t.muted = m;
        }
        let k = muted.iter().filter(|&&m| m).count();
        let src = "Variable n = 0\nFor muted\n Mute\n Set n n + 1\nNext\nMessage n\n";
        let (state, _) = run_once(src, &mut engine);
        prop_assert_eq!(state, RunState::Finished);
        prop_assert_eq!(engine.messages, vec![k.to_string()]);
        prop_assert_eq!(engine.invoked.len(), k);
    }

    /// `Repeat` runs its body the requested number of times.
    #[test]
    fn repeat_count(n in 0i64..50) {
        let src = format!("Variable c = 0\nRepeat {n}\n Set c c + 1\nNext\nMessage c\n");
        let mut engine = SimEngine::new(1, 1000);
        let (state, _) = run_once(&src, &mut engine);
        prop_assert_eq!(state, RunState::Finished);
        prop_assert_eq!(engine.messages, vec![n.to_string()]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Length alone never trips the runaway guard: only loops count.
    #[test]
    fn long_straight_line_runs_everything(extra in 0usize..500) {
        let n = MAX_LOOPS + extra;
        let src = "Mute\n".repeat(n);
        let mut engine = SimEngine::new(1, 1000);
        let (state, it) = run_once(&src, &mut engine);
        prop_assert_eq!(state, RunState::Finished);
        prop_assert!(it.is_finished());
        prop_assert_eq!(engine.invoked.len(), n);
    }
}
