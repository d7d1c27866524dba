use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mscript::engine::{Catalog, Direction};
use mscript::script::{Compiler, ScriptRuntime, SourceUnit};
use mscript::sim::SimEngine;

/// One representative script: procedures, branches, iteration and waits.
fn make_script(i: usize) -> String {
    format!(
        "!name Script{i}\n\
         !button\n\
         Variable count = 0\n\
         Variable global shared{i}\n\
         Proc Bump\n Set count count + $1\n If count > 10\n  Set count 0\n Endif\nEndproc\n\
         For all\n Call Bump {i}\n Mute\nNext\n\
         Repeat 4\n Call Bump 1\nNext\n\
         Jump done count < 0\n\
         Message skipped\n\
         Label done\n\
         Call Script{next}\n\
         Message count\n",
        next = (i + 1) % 200,
    )
}

fn make_batch(n: usize) -> Vec<SourceUnit> {
    (0..n).map(|i| SourceUnit::new(&format!("Script{i}"), &make_script(i))).collect()
}

fn bench_compile(c: &mut Criterion) {
    let catalog = Catalog::standard();
    let small = make_batch(10);
    let large = make_batch(200);

    let mut g = c.benchmark_group("compile");
    g.bench_function("batch_10", |b| {
        b.iter(|| Compiler::new(&catalog).compile(black_box(&small)))
    });
    g.bench_function("batch_200", |b| {
        b.iter(|| Compiler::new(&catalog).compile(black_box(&large)))
    });
    g.finish();
}

fn bench_run(c: &mut Criterion) {
    let catalog = Catalog::standard();
    let src = "Variable n = 0\nRepeat 1000\n Set n n + 1\nNext\nFor all\n Mute\nNext\n";
    let (env, _) = Compiler::new(&catalog).compile(&[SourceUnit::new("Loop", src)]);
    let mut runtime = ScriptRuntime::new(catalog, env);
    let mut engine = SimEngine::new(8, 44_100);

    c.bench_function("run_loop_1000", |b| {
        b.iter(|| {
            let _ = runtime.trigger(&mut engine, black_box("Loop"), Direction::Down, Vec::new());
            engine.invoked.clear();
        })
    });
}

criterion_group!(benches, bench_compile, bench_run);
criterion_main!(benches);
