//! Properties every pass of both pipelines must keep.

use kestrel_compiler::ir::analysis::DominatorTree;
use kestrel_compiler::ir::{Function, Module, Opcode, Type, dump_module};
use kestrel_compiler::opt::{lowering_passes, optimizer_passes};
use kestrel_compiler::{Compiler, CompilerConfig};

const PROGRAMS: &[&str] = &[
    "function f(a, b) { return a < b ? a : b; } f(1, 2);",
    "function sum(n) { var s = 0; for (var i = 0; i < n; i++) { if (i % 2) continue; s += i; } return s; }",
    "function g(o) { try { o.run(); } catch (e) { return e.message; } finally { o.done = true; } return 0; }",
    "function h() { return arguments.length + arguments[0]; }",
    "function outer() { var count = 0; function inc() { count++; } inc(); inc(); return count; }",
    "var x = [1, , 3]; var y = { a: x, b: typeof missing }; delete y.a;",
    "function sw(k) { switch (k) { case 1: return 'one'; case 2: break; default: k = 0; } return k; }",
    "function loop(n) { outer: while (n > 0) { for (var j = 0; j < n; j++) { if (j == 3) break outer; } n--; } return n; }",
];

fn configs() -> Vec<CompilerConfig> {
    vec![
        CompilerConfig::default(),
        CompilerConfig {
            optimize: false,
            ..CompilerConfig::default()
        },
    ]
}

/// Every phi has exactly one entry per predecessor, and each incoming
/// value is defined somewhere that dominates that predecessor.
fn assert_phis_consistent(module: &Module, context: &str) {
    for id in module.function_ids() {
        let f = module.function(id);
        let preds = f.predecessors();
        let dt = DominatorTree::compute(f);
        for b in f.block_ids() {
            let mut expected = preds[b.index()].clone();
            expected.sort();
            for phi in f.phis(b) {
                let mut incoming: Vec<_> = f.inst(phi).phi_entries().map(|(_, p)| p).collect();
                incoming.sort();
                assert_eq!(incoming, expected, "{}: phi %{} in {} out of step with the CFG", context, phi.0, f.name);
                for (value, pred) in f.inst(phi).phi_entries() {
                    if let Some(def) = value.as_inst() {
                        let def_block = f.inst(def).block;
                        assert!(
                            !dt.is_reachable(pred) || dt.dominates(def_block, pred),
                            "{}: %{} does not dominate predecessor %BB{} in {}",
                            context,
                            def.0,
                            pred.0,
                            f.name
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_every_pass_is_idempotent() {
    for config in configs() {
        let compiler = Compiler::new(config.clone());
        for source in PROGRAMS {
            let mut module = compiler.lower(source).unwrap();
            for pass in optimizer_passes(&config).iter().chain(lowering_passes(&config)) {
                pass.run(&mut module, &config).unwrap();
                let once = dump_module(&module);
                pass.run(&mut module, &config).unwrap();
                assert_eq!(once, dump_module(&module), "{} is not idempotent on {}", pass.name(), source);
            }
        }
    }
}

#[test]
fn test_phis_match_predecessors_after_every_pass() {
    for config in configs() {
        let compiler = Compiler::new(config.clone());
        for source in PROGRAMS {
            let mut module = compiler.lower(source).unwrap();
            assert_phis_consistent(&module, "initial state");
            for pass in optimizer_passes(&config).iter().chain(lowering_passes(&config)) {
                pass.run(&mut module, &config).unwrap();
                assert_phis_consistent(&module, pass.name());
            }
        }
    }
}

fn optimized(source: &str) -> Module {
    let compiler = Compiler::default();
    let mut module = compiler.lower(source).unwrap();
    compiler.optimize(&mut module, None).unwrap();
    module
}

fn function<'m>(module: &'m Module, name: &str) -> &'m Function {
    module.functions.iter().find(|f| f.name == name && !f.erased).unwrap()
}

#[test]
fn test_number_types_are_sound() {
    let module = optimized(
        "function f(a, s) { var x = a * 2; var y = s + 1; var z = x - 1; return [x, y, z]; } f(1, 'str');",
    );
    let f = function(&module, "f");
    for id in f.inst_ids() {
        let inst = f.inst(id);
        if inst.ty != Type::number() {
            continue;
        }
        // a number result never comes from an addition that may concatenate
        if inst.op == Opcode::Add {
            for operand in &inst.operands {
                assert!(!f.value_type(operand).can_be_string(), "%{} may be a string", id.0);
            }
        }
    }
    let adds: Vec<_> = f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Add).collect();
    assert!(!adds.is_empty());
    for add in adds {
        assert_ne!(f.inst(add).ty, Type::number());
    }
}

#[test]
fn test_numeric_loop_is_narrowed() {
    let module = optimized("function f() { var s = 0; for (var i = 0; i < 10; i++) { s = s + i; } return s; } f();");
    let f = function(&module, "f");
    for phi in f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Phi) {
        assert_eq!(f.inst(phi).ty, Type::number());
    }
    assert_eq!(f.return_type, Type::number());
}
