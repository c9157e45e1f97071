//! Inlining of small strict closures into their only creator.

use rustc_hash::FxHashMap;

use super::Pass;
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::analysis::reachable;
use crate::ir::{BlockId, FunctionId, InsertPoint, InstId, Module, Opcode, Type, Value};

pub struct Inlining;

impl Pass for Inlining {
    fn name(&self) -> &'static str {
        "Inlining"
    }

    fn run(&self, module: &mut Module, config: &CompilerConfig) -> Result<()> {
        for caller in module.function_ids() {
            while let Some((call, callee)) = find_candidate(module, caller, config.inline_max_instructions) {
                inline_call(module, caller, call, callee);
            }
        }
        Ok(())
    }
}

fn find_candidate(module: &Module, caller: FunctionId, max_instructions: usize) -> Option<(InstId, FunctionId)> {
    let f = module.function(caller);
    f.inst_ids().find_map(|id| {
        let inst = f.inst(id);
        if inst.op != Opcode::Call {
            return None;
        }
        let closure = inst.operands[0].as_inst()?;
        let create = f.inst(closure);
        if create.op != Opcode::CreateFunction {
            return None;
        }
        let target = create.operands[0].as_function()?;
        can_inline(module, caller, target, max_instructions).then_some((id, target))
    })
}

fn can_inline(module: &Module, caller: FunctionId, target: FunctionId, max_instructions: usize) -> bool {
    let callee = module.function(target);
    target != caller
        && !callee.erased
        && callee.all_callsites_known
        && callee.strict
        && callee.parent == Some(caller)
        && callee.instruction_count() <= max_instructions
        && !callee.inst_ids().any(|i| {
            matches!(
                callee.inst(i).op,
                Opcode::CreateFunction
                    | Opcode::CreateArgumentsLoose
                    | Opcode::CreateArgumentsStrict
                    | Opcode::TryStart
                    | Opcode::Catch
            )
        })
}

fn inline_call(module: &mut Module, caller: FunctionId, call: InstId, target: FunctionId) {
    let callee = module.function(target).clone();
    tracing::trace!(
        caller = %module.function(caller).name,
        callee = %callee.name,
        "inlining call"
    );
    reown_variables(module, target, caller);

    let f = module.function_mut(caller);
    let call_inst = f.inst(call).clone();
    let closure = call_inst.operands[0].as_inst().map(|c| f.inst(c).clone());
    let scope = closure
        .and_then(|c| c.operands.get(1).cloned())
        .unwrap_or_else(Value::undefined);
    let before = call_inst.block;
    let cont = f.split_block(call);

    let live = reachable(&callee);
    let mut blocks: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for b in callee.block_ids().filter(|b| live[b.index()]) {
        blocks.insert(b, f.add_block());
    }

    // Clone instructions; operands are remapped once every clone exists.
    let mut values: FxHashMap<InstId, Value> = FxHashMap::default();
    let mut cloned: Vec<InstId> = Vec::new();
    let mut returns: Vec<(Value, BlockId)> = Vec::new();
    for b in callee.block_ids().filter(|b| live[b.index()]) {
        let into = blocks[&b];
        for &id in &callee.block(b).insts {
            let inst = callee.inst(id);
            match inst.op {
                Opcode::LoadParam => {
                    let index = match inst.operands[0] {
                        Value::Param(i) => i as usize,
                        _ => 0,
                    };
                    let arg = call_inst
                        .operands
                        .get(1 + index)
                        .cloned()
                        .unwrap_or_else(Value::undefined);
                    values.insert(id, arg);
                }
                Opcode::CreateScope | Opcode::GetParentScope => {
                    values.insert(id, scope.clone());
                }
                Opcode::Return => {
                    returns.push((inst.operands[0].clone(), into));
                    f.insert(InsertPoint::End(into), Opcode::Branch, vec![Value::Block(cont)]);
                }
                _ => {
                    let copy = f.insert_typed(InsertPoint::End(into), inst.op, inst.operands.clone(), inst.ty);
                    values.insert(id, Value::Inst(copy));
                    cloned.push(copy);
                }
            }
        }
    }

    let remap = |v: &Value| match v {
        Value::Inst(old) => values.get(old).cloned().unwrap_or_else(Value::undefined),
        Value::Block(old) => Value::Block(blocks.get(old).copied().unwrap_or(*old)),
        other => other.clone(),
    };
    for &id in &cloned {
        let operands: Vec<Value> = f.inst(id).operands.iter().map(remap).collect();
        f.inst_mut(id).operands = operands;
    }
    let returns: Vec<(Value, BlockId)> = returns.iter().map(|(v, b)| (remap(v), *b)).collect();

    f.insert(
        InsertPoint::End(before),
        Opcode::Branch,
        vec![Value::Block(blocks[&callee.entry()])],
    );

    let result = match returns.as_slice() {
        [] => Value::undefined(),
        [(value, _)] => value.clone(),
        entries => {
            let ty = entries
                .iter()
                .fold(Type::none(), |acc, (v, _)| acc.union(f.value_type(v)));
            let operands = entries
                .iter()
                .flat_map(|(v, b)| [v.clone(), Value::Block(*b)])
                .collect();
            Value::Inst(f.insert_typed(InsertPoint::Start(cont), Opcode::Phi, operands, ty))
        }
    };
    f.replace_all_uses(&Value::Inst(call), &result);
    f.erase_inst(call);
}

/// Gives the callee's frame variables to the caller, renaming any that
/// collide with a caller variable.
fn reown_variables(module: &mut Module, from: FunctionId, to: FunctionId) {
    let mut taken: Vec<String> = module
        .frame_vars(to)
        .into_iter()
        .map(|v| module.variable(v).name.clone())
        .collect();
    for var in module.frame_vars(from) {
        let mut name = module.variable(var).name.clone();
        let mut n = 1;
        while taken.contains(&name) {
            name = format!("{}#{}", module.variable(var).name, n);
            n += 1;
        }
        taken.push(name.clone());
        let v = &mut module.variables[var.index()];
        v.owner = to;
        v.name = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, dump_function, verify_module};
    use crate::opt::test_util::*;
    use crate::opt::{FunctionAnalysis, InstSimplify, Mem2Reg};

    /// True when `f` still calls a closure it creates itself.
    fn has_local_calls(f: &Function) -> bool {
        f.inst_ids().any(|i| {
            let inst = f.inst(i);
            inst.op == Opcode::Call
                && inst.operands[0]
                    .as_inst()
                    .is_some_and(|c| f.inst(c).op == Opcode::CreateFunction)
        })
    }

    fn inline(source: &str) -> Module {
        let mut module = lower(source);
        let config = config();
        Mem2Reg.run(&mut module, &config).unwrap();
        FunctionAnalysis.run(&mut module, &config).unwrap();
        Inlining.run(&mut module, &config).unwrap();
        verify_module(&module).unwrap();
        module
    }

    #[test]
    fn test_small_strict_callee_is_inlined() {
        let mut module = inline("function f() { 'use strict'; function add(a, b) { return a + b; } return add(1, 2); }");
        assert!(!has_local_calls(function(&module, "f")));
        InstSimplify.run(&mut module, &config()).unwrap();
        let text = dump_function(&module, function(&module, "f"));
        assert!(text.contains("ReturnInst 3: number"), "{}", text);
    }

    #[test]
    fn test_multiple_returns_join_in_phi() {
        let module = inline(
            "function f(c) { 'use strict'; function pick(x) { if (x) { return 1; } return 2; } return pick(c); }",
        );
        assert!(!has_local_calls(function(&module, "f")));
        assert_eq!(count(&module, "f", Opcode::Phi), 1);
    }

    #[test]
    fn test_sloppy_callee_is_kept() {
        let module = inline("function f() { function add(a, b) { return a + b; } return add(1, 2); }");
        assert!(has_local_calls(function(&module, "f")));
    }

    #[test]
    fn test_missing_arguments_are_undefined() {
        let module = inline("function f() { 'use strict'; function id(a) { return a; } return id(); }");
        let text = dump_function(&module, function(&module, "f"));
        assert!(text.contains("ReturnInst undefined: undefined"), "{}", text);
    }
}
