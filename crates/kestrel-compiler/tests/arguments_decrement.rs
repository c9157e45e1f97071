//! A loop that stores the arguments object into a variable captured by a
//! dead closure, then reads it after the loop.

use kestrel_compiler::backend::OpCode;
use kestrel_compiler::backend::hbc::decode;
use kestrel_compiler::ir::analysis::{DominatorTree, loop_depths};
use kestrel_compiler::ir::{Function, Module, Opcode, Type, verify_module};
use kestrel_compiler::{Compiler, CompilerConfig, DumpOptions, Output, Target};

const SOURCE: &str = "
function decrementArguments() {
    for (var i = 0; i < 2; i++) {
        var var1 = () => var3 = 0;
        var var3 = arguments;
    }
    return var3 - 1;
}
";

fn function<'m>(module: &'m Module) -> &'m Function {
    module
        .functions
        .iter()
        .find(|f| f.name == "decrementArguments" && !f.erased)
        .unwrap()
}

#[test]
fn test_subtraction_is_a_number() {
    let compiler = Compiler::default();
    let mut module = compiler.lower(SOURCE).unwrap();
    compiler.optimize(&mut module, None).unwrap();
    verify_module(&module).unwrap();

    let f = function(&module);
    let subs: Vec<_> = f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Subtract).collect();
    assert_eq!(subs.len(), 1);
    assert_eq!(f.inst(subs[0]).ty, Type::number());
    assert_eq!(f.return_type, Type::number());
}

#[test]
fn test_arguments_are_reified_inside_the_loop() {
    let compiler = Compiler::default();
    let mut module = compiler.lower(SOURCE).unwrap();
    compiler.optimize(&mut module, None).unwrap();
    compiler.allocate(&mut module, None).unwrap();
    verify_module(&module).unwrap();

    let f = function(&module);
    let dt = DominatorTree::compute(f);
    let depths = loop_depths(f, &dt);
    let reifies: Vec<_> = f
        .inst_ids()
        .filter(|&i| f.inst(i).op == Opcode::HBCReifyArgumentsLoose)
        .collect();
    assert!(!reifies.is_empty());
    for reify in reifies {
        let block = f.inst(reify).block;
        assert!(depths[block.index()] > 0, "reify in %BB{} is outside the loop", block.0);
    }
    assert_eq!(
        f.inst_ids().filter(|&i| f.inst(i).op == Opcode::CreateArgumentsLoose).count(),
        0
    );
}

#[test]
fn test_bytecode_reifies_and_subtracts() {
    let output = Compiler::default().compile(SOURCE, &DumpOptions::default()).unwrap();
    let Output::Bytecode(bytecode) = output.output else {
        panic!("expected bytecode");
    };
    let name = bytecode.strings.iter().find(|(_, s)| *s == "decrementArguments").map(|(id, _)| id);
    let func = bytecode.functions.iter().find(|f| Some(f.name) == name).unwrap();
    let ops: Vec<OpCode> = decode(&func.code).unwrap().into_iter().map(|i| i.op).collect();
    assert!(ops.contains(&OpCode::ReifyArgumentsLoose));
    assert!(ops.contains(&OpCode::Sub) || ops.contains(&OpCode::SubN));
}

#[test]
fn test_native_output_checks_every_reify() {
    let config = CompilerConfig {
        target: Target::Native,
        ..CompilerConfig::default()
    };
    let output = Compiler::new(config).compile(SOURCE, &DumpOptions::default()).unwrap();
    let Output::Native(text) = output.output else {
        panic!("expected native source");
    };
    assert!(text.contains("decrementArguments"));
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("res = ") {
            assert!(lines[i + 1].starts_with("if (res == ExecutionStatus::EXCEPTION)"), "{}", line);
        }
    }
}
