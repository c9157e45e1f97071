//! Re-materializes cheap constants next to their users.
//!
//! A constant load used in other blocks keeps its register busy across
//! the whole path. Reloading it at the top of each using block costs one
//! short instruction and lets the emitter skip the long-range value.

use rustc_hash::FxHashMap;

use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{BlockId, InsertPoint, InstId, Module, Opcode, Value};
use crate::opt::Pass;

pub struct RecreateCheapValues;

impl Pass for RecreateCheapValues {
    fn name(&self) -> &'static str {
        "RecreateCheapValues"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for id in module.function_ids() {
            let f = module.function_mut(id);
            let Some(mut allocation) = f.allocation.take() else {
                continue;
            };
            let users = f.users();
            let loads: Vec<InstId> = f
                .inst_ids()
                .filter(|&i| {
                    f.inst(i).op == Opcode::HBCLoadConst && f.literal_operand(i, 0).is_some_and(|lit| lit.is_cheap())
                })
                .collect();

            for load in loads {
                let Some(reg) = allocation.get(load) else { continue };
                let home = f.inst(load).block;
                // block -> (first user, users in the block)
                let mut remote: FxHashMap<BlockId, (InstId, Vec<InstId>)> = FxHashMap::default();
                for &u in &users[load.index()] {
                    let inst = f.inst(u);
                    if inst.block == home || inst.op == Opcode::Phi {
                        continue;
                    }
                    remote.entry(inst.block).or_insert_with(|| (u, Vec::new())).1.push(u);
                }
                let mut blocks: Vec<BlockId> = remote.keys().copied().collect();
                blocks.sort();
                for b in blocks {
                    let (first, list) = &remote[&b];
                    let ty = f.inst(load).ty;
                    let operands = f.inst(load).operands.clone();
                    let copy = f.insert_typed(InsertPoint::Before(*first), Opcode::HBCLoadConst, operands, ty);
                    allocation.set(copy, reg);
                    for &u in list {
                        for op in &mut f.inst_mut(u).operands {
                            if *op == Value::Inst(load) {
                                *op = Value::Inst(copy);
                            }
                        }
                    }
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
    use crate::ir::{FunctionId, FunctionKind, verify_module};
    use crate::opt::test_util::*;
    use crate::regalloc::RegisterAllocation;

    #[test]
    fn test_constant_is_reloaded_in_using_block() {
        let mut module = Module::new();
        let id = module.add_function("f", vec!["c".into()], None, FunctionKind::Normal, true);
        let f = module.function_mut(id);
        let entry = BlockId(0);
        let (then, exit) = (f.add_block(), f.add_block());
        let c = f.insert(InsertPoint::End(entry), Opcode::LoadParam, vec![Value::Param(1)]);
        let one = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(1.0)]);
        f.insert(
            InsertPoint::End(entry),
            Opcode::CondBranch,
            vec![Value::Inst(c), Value::Block(then), Value::Block(exit)],
        );
        let sum = f.insert(InsertPoint::End(then), Opcode::Add, vec![Value::Inst(c), Value::Inst(one)]);
        f.insert(InsertPoint::End(then), Opcode::Return, vec![Value::Inst(sum)]);
        f.insert(InsertPoint::End(exit), Opcode::Return, vec![Value::Inst(one)]);

        let config = config();
        RegisterAllocation.run(&mut module, &config).unwrap();
        RecreateCheapValues.run(&mut module, &config).unwrap();
        verify_module(&module).unwrap();

        let f = module.function(FunctionId(0));
        let alloc = f.allocation.as_ref().unwrap();
        for b in [then, exit] {
            let local = f.block(b).insts[0];
            assert_eq!(f.inst(local).op, Opcode::HBCLoadConst);
            assert_eq!(alloc.get(local), alloc.get(one));
        }
        assert_eq!(f.inst(sum).operands[1], Value::Inst(f.block(then).insts[0]));

        let once = module.clone();
        RecreateCheapValues.run(&mut module, &config).unwrap();
        assert_eq!(once, module);
    }
}
