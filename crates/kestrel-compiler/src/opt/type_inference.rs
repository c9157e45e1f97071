//! Module-wide type inference.
//!
//! Types start empty and only grow: every step replaces a type with the
//! union of its old value and the newly computed one, so the iteration
//! reaches the least fixpoint. An instruction is not evaluated until all
//! of its instruction operands have a type; phis are the exception and
//! union whatever has arrived, which is what lets loops converge.
//!
//! Parameters of functions whose call sites are all known get the union
//! of the matching arguments; every other parameter is `any`.

use rustc_hash::FxHashMap;

use super::Pass;
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{Function, FunctionId, InstId, Module, Opcode, Type, Value, VarId};

pub struct TypeInference;

impl Pass for TypeInference {
    fn name(&self) -> &'static str {
        "TypeInference"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        let facts = Facts::collect(module);
        reset(module);
        let mut rounds = 0;
        while step(module, &facts) {
            rounds += 1;
        }
        tracing::debug!(rounds, "type inference converged");
        Ok(())
    }
}

/// Def-use facts that do not change while types are computed.
#[derive(Default)]
struct Facts {
    /// (function, slot) -> values stored into the slot
    stack_stores: FxHashMap<(FunctionId, InstId), Vec<Value>>,
    /// variable -> (function, value) stored into it
    frame_stores: FxHashMap<VarId, Vec<(FunctionId, Value)>>,
    /// callee -> (caller, call instruction)
    call_sites: FxHashMap<FunctionId, Vec<(FunctionId, InstId)>>,
}

impl Facts {
    fn collect(module: &Module) -> Self {
        let mut facts = Facts::default();
        for fid in module.function_ids() {
            let f = module.function(fid);
            for id in f.inst_ids() {
                let inst = f.inst(id);
                match inst.op {
                    Opcode::StoreStack => {
                        if let Some(slot) = inst.operands[1].as_inst() {
                            facts
                                .stack_stores
                                .entry((fid, slot))
                                .or_default()
                                .push(inst.operands[0].clone());
                        }
                    }
                    Opcode::StoreFrame => {
                        if let Some(var) = inst.operands[2].as_var() {
                            facts
                                .frame_stores
                                .entry(var)
                                .or_default()
                                .push((fid, inst.operands[1].clone()));
                        }
                    }
                    Opcode::Call => {
                        if let Some(target) = direct_callee(f, id) {
                            facts.call_sites.entry(target).or_default().push((fid, id));
                        }
                    }
                    _ => {}
                }
            }
        }
        facts
    }
}

/// The function a call invokes when its callee is a closure created in
/// the same function.
fn direct_callee(f: &Function, call: InstId) -> Option<FunctionId> {
    let closure = f.inst(call).operands.first()?.as_inst()?;
    let create = f.inst(closure);
    (create.op == Opcode::CreateFunction).then(|| create.operands[0].as_function())?
}

fn reset(module: &mut Module) {
    for var in &mut module.variables {
        var.ty = Type::none();
    }
    for fid in module.function_ids() {
        let f = module.function_mut(fid);
        f.return_type = Type::none();
        let ids: Vec<InstId> = f.inst_ids().collect();
        for id in ids {
            let inst = f.inst_mut(id);
            if inst.op.has_value() && inst.op != Opcode::UnionNarrowTrusted {
                inst.ty = Type::none();
            }
        }
    }
}

/// One pass over the module. Returns true when any type grew.
fn step(module: &mut Module, facts: &Facts) -> bool {
    let mut changed = false;

    for (&var, stores) in &facts.frame_stores {
        let ty = stores.iter().fold(module.variable(var).ty, |acc, (fid, v)| {
            acc.union(module.function(*fid).value_type(v))
        });
        if ty != module.variable(var).ty {
            module.variables[var.index()].ty = ty;
            changed = true;
        }
    }

    for fid in module.function_ids() {
        let ids: Vec<InstId> = module.function(fid).inst_ids().collect();
        for id in ids {
            let Some(new) = infer(module, facts, fid, id) else {
                continue;
            };
            let inst = module.function_mut(fid).inst_mut(id);
            let ty = inst.ty.union(new);
            if ty != inst.ty {
                inst.ty = ty;
                changed = true;
            }
        }

        let f = module.function(fid);
        let returned = f
            .inst_ids()
            .filter(|&i| f.inst(i).op == Opcode::Return)
            .fold(f.return_type, |acc, i| acc.union(f.value_type(&f.inst(i).operands[0])));
        if returned != f.return_type {
            module.function_mut(fid).return_type = returned;
            changed = true;
        }
    }
    changed
}

/// The type an instruction produces given the current types, or `None`
/// when it must wait for an operand.
fn infer(module: &Module, facts: &Facts, fid: FunctionId, id: InstId) -> Option<Type> {
    let f = module.function(fid);
    let inst = f.inst(id);
    if !inst.op.has_value() || inst.op == Opcode::UnionNarrowTrusted {
        return None;
    }
    if inst.op == Opcode::Phi {
        return Some(
            inst.phi_entries()
                .fold(Type::none(), |acc, (v, _)| acc.union(f.value_type(v))),
        );
    }
    let waiting = inst
        .operands
        .iter()
        .any(|v| matches!(v, Value::Inst(d) if f.inst(*d).ty.is_none()));
    if waiting {
        return None;
    }

    Some(match inst.op {
        Opcode::LoadParam => {
            let index = match inst.operands[0] {
                Value::Param(i) => i as usize,
                _ => 0,
            };
            match facts.call_sites.get(&fid) {
                Some(calls) if f.all_callsites_known => calls.iter().fold(Type::none(), |acc, &(caller, call)| {
                    let caller = module.function(caller);
                    let arg = caller
                        .inst(call)
                        .operands
                        .get(1 + index)
                        .map_or(Type::undefined(), |v| caller.value_type(v));
                    acc.union(arg)
                }),
                _ => Type::any(),
            }
        }
        Opcode::LoadFrame => {
            let var = inst.operands[1].as_var()?;
            module.variable(var).ty.union(Type::undefined())
        }
        Opcode::Call => match direct_callee(f, id) {
            Some(target) => module.function(target).return_type,
            None => Type::any(),
        },
        Opcode::AllocStack => facts
            .stack_stores
            .get(&(fid, id))
            .map_or(Type::none(), |stores| {
                stores.iter().fold(Type::none(), |acc, v| acc.union(f.value_type(v)))
            })
            .union(Type::undefined()),
        op => {
            let tys: Vec<Type> = inst.operands.iter().map(|v| f.value_type(v)).collect();
            op.result_type(&tys)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::test_util::*;
    use crate::opt::{FunctionAnalysis, Mem2Reg};

    fn infer_types(source: &str) -> Module {
        let mut module = lower(source);
        let config = config();
        Mem2Reg.run(&mut module, &config).unwrap();
        FunctionAnalysis.run(&mut module, &config).unwrap();
        TypeInference.run(&mut module, &config).unwrap();
        module
    }

    fn type_of(module: &Module, name: &str, op: Opcode) -> Type {
        let f = function(module, name);
        f.inst_ids()
            .find(|&i| f.inst(i).op == op)
            .map(|i| f.inst(i).ty)
            .unwrap_or_else(|| panic!("no {:?} in {}", op, name))
    }

    #[test]
    fn test_parameters_flow_from_known_calls() {
        let module = infer_types("function f() { 'use strict'; function g(x) { return x - 1; } return g(2); }");
        assert_eq!(type_of(&module, "g", Opcode::LoadParam), Type::number());
        assert_eq!(function(&module, "g").return_type, Type::number());
        assert_eq!(type_of(&module, "f", Opcode::Call), Type::number());
    }

    #[test]
    fn test_unknown_parameters_are_any() {
        let module = infer_types("function f(x) { return x - 1; }");
        assert!(type_of(&module, "f", Opcode::LoadParam).is_any());
        assert_eq!(type_of(&module, "f", Opcode::Subtract), Type::numeric());
    }

    #[test]
    fn test_frame_loads_include_undefined() {
        let module = infer_types("function f() { var x = 1; function g() { return x; } x = 'a'; return g(); }");
        let expected = Type::undefined().union(Type::string()).union(Type::number());
        assert_eq!(type_of(&module, "g", Opcode::LoadFrame), expected);
    }

    #[test]
    fn test_loop_phi_converges() {
        let module = infer_types("function f(n) { var s = 0; for (var i = 0; i < n; i++) { s = s + 1; } return s; }");
        let f = function(&module, "f");
        for id in f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Phi) {
            assert!(!f.inst(id).ty.is_none());
        }
        assert!(!f.return_type.is_none());
    }

    #[test]
    fn test_rerun_is_stable() {
        let mut module = infer_types("function f(a) { return a + 1; }");
        let before = module.clone();
        TypeInference.run(&mut module, &config()).unwrap();
        assert_eq!(before, module);
    }
}
