//! Register assignment on fully lowered IR.

use kestrel_compiler::ir::{Function, InstId, Module, Opcode, Value, verify_module};
use kestrel_compiler::regalloc::LiveIntervals;
use kestrel_compiler::{Compiler, CompilerConfig, DumpOptions, Error};

const PROGRAMS: &[&str] = &[
    "function f(a, b) { return a * b + a; }",
    "function sum(n) { var s = 0; for (var i = 0; i < n; i++) { s = s + i; } return s; }",
    "function pick(c, x, y) { var r; if (c) { r = x.p; } else { r = y(1, 2); } return r + 1; }",
    "function nest(n) { var t = 0; for (var i = 0; i < n; i++) { for (var j = 0; j < i; j++) { t = t + i * j; } } return t; }",
    "var o = { a: 1 }; o.b = [1, 2, 3]; print(o.a + o.b.length);",
];

fn allocated(source: &str, config: CompilerConfig) -> Module {
    let compiler = Compiler::new(config);
    let mut module = compiler.lower(source).unwrap();
    compiler.optimize(&mut module, None).unwrap();
    compiler.allocate(&mut module, None).unwrap();
    verify_module(&module).unwrap();
    module
}

/// Follows copies back to the instruction that produced the value.
fn origin(f: &Function, mut id: InstId) -> InstId {
    while matches!(f.inst(id).op, Opcode::Mov | Opcode::HBCSpillMov) {
        match f.inst(id).operands.first().and_then(Value::as_inst) {
            Some(src) => id = src,
            None => break,
        }
    }
    id
}

fn same_contents(f: &Function, a: InstId, b: InstId) -> bool {
    let (a, b) = (origin(f, a), origin(f, b));
    if a == b {
        return true;
    }
    let (ia, ib) = (f.inst(a), f.inst(b));
    ia.op == Opcode::HBCLoadConst && ib.op == Opcode::HBCLoadConst && ia.operands == ib.operands
}

/// Two values holding different contents are never live in the same
/// register at the same time. Registers backing stack slots are skipped.
fn assert_no_conflicts(f: &Function) {
    let live = LiveIntervals::compute(f);
    let alloc = f.allocation.as_ref().unwrap();
    let slots: Vec<u32> = f
        .inst_ids()
        .filter(|&i| f.inst(i).op == Opcode::AllocStack)
        .filter_map(|i| alloc.get(i))
        .collect();
    let values: Vec<InstId> = f.inst_ids().filter(|&i| f.inst(i).op.has_value()).collect();
    for (i, &a) in values.iter().enumerate() {
        let Some(reg) = alloc.get(a) else { continue };
        if slots.contains(&reg) {
            continue;
        }
        for &b in &values[i + 1..] {
            if alloc.get(b) != Some(reg) || same_contents(f, a, b) {
                continue;
            }
            assert!(
                !live.interval(a).overlaps(live.interval(b)),
                "%{} and %{} both live in r{} of {}",
                a.0,
                b.0,
                reg,
                f.name
            );
        }
    }
}

#[test]
fn test_live_values_never_share_a_register() {
    for optimize in [true, false] {
        let config = CompilerConfig {
            optimize,
            ..CompilerConfig::default()
        };
        for source in PROGRAMS {
            let module = allocated(source, config.clone());
            for id in module.function_ids() {
                assert_no_conflicts(module.function(id));
            }
        }
    }
}

#[test]
fn test_frame_covers_every_register() {
    for source in PROGRAMS {
        let module = allocated(source, CompilerConfig::default());
        for id in module.function_ids() {
            let f = module.function(id);
            let alloc = f.allocation.as_ref().unwrap();
            for inst in f.inst_ids().filter(|&i| f.inst(i).op.has_value()) {
                let reg = alloc.get(inst).unwrap();
                assert!(reg < alloc.frame_size, "r{} outside frame of {} in {}", reg, alloc.frame_size, f.name);
            }
        }
    }
}

#[test]
fn test_register_limit_is_a_resource_error() {
    let mut config = CompilerConfig::default();
    config.set("max_registers", "8").unwrap();
    let err = Compiler::new(config)
        .compile(
            "function big(g) { return g(1, 2, 3, 4, 5, 6, 7, 8, 9); }",
            &DumpOptions::default(),
        )
        .unwrap_err();
    match err {
        Error::ResourceLimit { function, .. } => assert_eq!(function, "big"),
        other => panic!("expected a resource limit, got {:?}", other),
    }
}

#[test]
fn test_long_registers_are_spilled() {
    let mut config = CompilerConfig::default();
    config.set("short_register_limit", "8").unwrap();
    let source = "function wide(g, a, b, c, d, e, h, i, j, k) {
        return g(a * 2, b * 2, c * 2, d * 2, e * 2, h * 2, i * 2, j * 2, k * 2);
    }";
    let output = Compiler::new(config).compile(source, &DumpOptions::default()).unwrap();
    let f = output
        .module
        .functions
        .iter()
        .find(|f| f.name == "wide" && !f.erased)
        .unwrap();
    let alloc = f.allocation.as_ref().unwrap();
    assert!(alloc.scratch_registers > 0);
    assert!(f.inst_ids().any(|i| f.inst(i).op == Opcode::HBCSpillMov));
}
