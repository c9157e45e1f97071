//! Pipeline stage benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kestrel_compiler::{Compiler, CompilerConfig, DumpOptions, Target};
use std::hint::black_box;

/// A few hundred lines of loops, closures and property traffic.
fn workload() -> String {
    let mut source = String::new();
    for i in 0..40 {
        source.push_str(&format!(
            "function work{i}(o, n) {{
                var total = 0;
                for (var k = 0; k < n; k++) {{
                    if (o.items[k] > {i}) {{ total = total + o.items[k] * 2; }} else {{ total = total - 1; }}
                }}
                function inner(x) {{ return x + total; }}
                return inner(o.base) + arguments.length;
            }}\n"
        ));
    }
    source
}

fn bench_parse(c: &mut Criterion) {
    let source = workload();
    let compiler = Compiler::default();
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.bench_function("workload", |b| {
        b.iter(|| compiler.parse(black_box(&source)).unwrap());
    });
    group.finish();
}

fn bench_optimize(c: &mut Criterion) {
    let source = workload();
    let compiler = Compiler::default();
    let lowered = compiler.lower(&source).unwrap();
    c.bench_function("optimize", |b| {
        b.iter(|| {
            let mut module = lowered.clone();
            compiler.optimize(&mut module, None).unwrap();
            module
        });
    });
}

fn bench_compile(c: &mut Criterion) {
    let source = workload();
    let mut group = c.benchmark_group("compile");
    for (label, optimize, target) in [
        ("O0", false, Target::Bytecode),
        ("O", true, Target::Bytecode),
        ("O", true, Target::Native),
    ] {
        let compiler = Compiler::new(CompilerConfig {
            optimize,
            target,
            ..CompilerConfig::default()
        });
        group.bench_with_input(BenchmarkId::new(label, format!("{:?}", target)), &source, |b, source| {
            b.iter(|| compiler.compile(black_box(source), &DumpOptions::default()).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_optimize, bench_compile);
criterion_main!(benches);
