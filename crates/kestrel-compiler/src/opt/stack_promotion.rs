//! Moves frame variables that no other function touches onto the stack.
//!
//! Once a closure that captured a variable has been removed, the variable
//! only needs an environment slot if some other function still reads or
//! writes it. Otherwise its accesses become stack accesses, which
//! `Mem2Reg` can then promote.

use rustc_hash::FxHashMap;

use super::Pass;
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{FunctionId, InsertPoint, InstId, Module, Opcode, Value, VarId};

pub struct SimpleStackPromotion;

impl Pass for SimpleStackPromotion {
    fn name(&self) -> &'static str {
        "SimpleStackPromotion"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        // var -> (accesses, all accesses are local to the owner)
        let mut accesses: FxHashMap<VarId, (Vec<InstId>, bool)> = FxHashMap::default();
        for fid in module.function_ids() {
            let f = module.function(fid);
            let own_scope = f.inst_ids().find(|&i| f.inst(i).op == Opcode::CreateScope);
            for id in f.inst_ids() {
                let inst = f.inst(id);
                let var_operand = match inst.op {
                    Opcode::LoadFrame => 1,
                    Opcode::StoreFrame => 2,
                    _ => continue,
                };
                let Some(var) = inst.operands.get(var_operand).and_then(Value::as_var) else {
                    continue;
                };
                let local = module.variable(var).owner == fid
                    && own_scope.is_some_and(|s| inst.operands[0] == Value::Inst(s));
                let entry = accesses.entry(var).or_insert_with(|| (Vec::new(), true));
                entry.0.push(id);
                entry.1 &= local;
            }
        }

        let mut promoted: Vec<(VarId, Vec<InstId>)> = accesses
            .into_iter()
            .filter(|(var, (_, local))| *local && !module.variable(*var).erased)
            .map(|(var, (ids, _))| (var, ids))
            .collect();
        promoted.sort_by_key(|(var, _)| *var);

        let mut last_slot: FxHashMap<FunctionId, InstId> = FxHashMap::default();
        for (var, ids) in promoted {
            let owner = module.variable(var).owner;
            let name = module.variable(var).name.clone();
            let f = module.function_mut(owner);
            let at = match last_slot.get(&owner) {
                Some(&prev) => InsertPoint::After(prev),
                None => InsertPoint::Start(f.entry()),
            };
            let slot = f.insert(at, Opcode::AllocStack, vec![Value::Label(name.clone())]);
            last_slot.insert(owner, slot);
            for id in ids {
                let inst = f.inst_mut(id);
                match inst.op {
                    Opcode::StoreFrame => {
                        let value = inst.operands[1].clone();
                        inst.op = Opcode::StoreStack;
                        inst.operands = vec![value, Value::Inst(slot)];
                    }
                    _ => {
                        inst.op = Opcode::LoadStack;
                        inst.operands = vec![Value::Inst(slot)];
                    }
                }
            }
            tracing::trace!(function = %f.name, var = %name, "frame variable moved to stack");
            module.variables[var.index()].erased = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::Dce;
    use crate::opt::test_util::*;

    #[test]
    fn test_variable_of_removed_closure_moves_to_stack() {
        let mut module = lower("function f() { var x = 1; var g = () => x; return x; }");
        Dce.run(&mut module, &config()).unwrap();
        SimpleStackPromotion.run(&mut module, &config()).unwrap();
        let id = function(&module, "f").id;
        assert!(module.frame_vars(id).is_empty());
        assert_eq!(count(&module, "f", Opcode::LoadFrame), 0);
        assert_eq!(count(&module, "f", Opcode::LoadStack), 1);
        crate::ir::verify_module(&module).unwrap();
    }

    #[test]
    fn test_shared_variable_stays_in_frame() {
        let mut module = lower("function f() { var x = 1; function g() { return x; } return g(); }");
        SimpleStackPromotion.run(&mut module, &config()).unwrap();
        let id = function(&module, "f").id;
        assert_eq!(module.frame_vars(id).len(), 1);
        assert!(count(&module, "g", Opcode::LoadFrame) == 1);
    }
}
