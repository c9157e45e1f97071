//! Stack slots live in registers once allocation is done, so stores and
//! loads become plain moves.

use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{InsertPoint, InstId, Module, Opcode};
use crate::opt::Pass;

pub struct LowerStoreInstrs;

impl Pass for LowerStoreInstrs {
    fn name(&self) -> &'static str {
        "LowerStoreInstrs"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for id in module.function_ids() {
            let f = module.function_mut(id);
            let Some(mut allocation) = f.allocation.take() else {
                continue;
            };
            let ids: Vec<InstId> = f.inst_ids().collect();
            for id in ids {
                match f.inst(id).op {
                    Opcode::StoreStack => {
                        let (value, slot) = (f.inst(id).operands[0].clone(), f.inst(id).operands[1].clone());
                        let Some(reg) = slot.as_inst().and_then(|s| allocation.get(s)) else {
                            continue;
                        };
                        let mov = f.insert(InsertPoint::Before(id), Opcode::Mov, vec![value]);
                        allocation.set(mov, reg);
                        f.erase_inst(id);
                    }
                    Opcode::LoadStack => {
                        let inst = f.inst_mut(id);
                        inst.op = Opcode::Mov;
                        inst.operands.truncate(1);
                    }
                    _ => {}
                }
            }
            f.allocation = Some(allocation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::test_util::*;
    use crate::opt::{LoadConstants, LowerArgumentsArray};
    use crate::regalloc::RegisterAllocation;

    #[test]
    fn test_slots_become_moves() {
        // Without Mem2Reg every local stays in a stack slot.
        let mut module = lower("function f(a) { var x = a; return x; }");
        let config = config();
        for pass in [&LowerArgumentsArray as &dyn Pass, &LoadConstants, &RegisterAllocation, &LowerStoreInstrs] {
            pass.run(&mut module, &config).unwrap();
        }
        verify_module(&module).unwrap();
        assert_eq!(count(&module, "f", Opcode::StoreStack), 0);
        assert_eq!(count(&module, "f", Opcode::LoadStack), 0);

        let f = function(&module, "f");
        let alloc = f.allocation.as_ref().unwrap();
        let slot_regs: Vec<u32> = f
            .inst_ids()
            .filter(|&i| f.inst(i).op == Opcode::AllocStack)
            .filter_map(|i| alloc.get(i))
            .collect();
        // every store landed in the register of its slot
        let stores = f.inst_ids().filter(|&i| {
            let inst = f.inst(i);
            inst.op == Opcode::Mov && alloc.get(i).is_some_and(|r| slot_regs.contains(&r))
        });
        assert!(stores.count() >= 2);
    }
}
