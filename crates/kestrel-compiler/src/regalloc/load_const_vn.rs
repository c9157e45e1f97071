//! Drops constant loads into a register that already holds the constant.
//!
//! Tracked per block: the first instruction of a block may be reached
//! from anywhere, so nothing is known on entry.

use rustc_hash::FxHashMap;

use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{InstId, Literal, Module, Opcode, Value};
use crate::opt::Pass;

pub struct LoadConstantValueNumbering;

impl Pass for LoadConstantValueNumbering {
    fn name(&self) -> &'static str {
        "LoadConstantValueNumbering"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for id in module.function_ids() {
            let f = module.function_mut(id);
            let Some(allocation) = f.allocation.take() else {
                continue;
            };
            let mut redundant: Vec<(InstId, InstId)> = Vec::new();
            for b in f.block_ids().collect::<Vec<_>>() {
                // register -> (load, constant it holds)
                let mut known: FxHashMap<u32, (InstId, Literal)> = FxHashMap::default();
                for &id in &f.block(b).insts {
                    let inst = f.inst(id);
                    if matches!(inst.op, Opcode::HBCReifyArgumentsLoose | Opcode::HBCReifyArgumentsStrict) {
                        if let Some(slot) = inst.operands[0].as_inst().and_then(|s| allocation.get(s)) {
                            known.remove(&slot);
                        }
                        continue;
                    }
                    let Some(reg) = allocation.get(id) else { continue };
                    let constant = match (inst.op, inst.operands.first()) {
                        (Opcode::HBCLoadConst, Some(Value::Literal(lit))) => Some(lit.clone()),
                        _ => None,
                    };
                    match constant {
                        Some(lit) => match known.get(&reg) {
                            Some((earlier, held)) if *held == lit => redundant.push((id, *earlier)),
                            _ => {
                                known.insert(reg, (id, lit));
                            }
                        },
                        None => {
                            known.remove(&reg);
                        }
                    }
                }
            }

            for &(load, earlier) in &redundant {
                f.replace_all_uses(&Value::Inst(load), &Value::Inst(earlier));
                f.erase_inst(load);
            }
            f.allocation = Some(allocation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Allocation, BlockId, FunctionId, FunctionKind, InsertPoint, verify_module};
    use crate::opt::test_util::*;

    #[test]
    fn test_reload_of_same_register_is_dropped() {
        let mut module = Module::new();
        let id = module.add_function("f", vec![], None, FunctionKind::Normal, true);
        let f = module.function_mut(id);
        let entry = BlockId(0);
        let a = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(3.0)]);
        let t = f.insert(InsertPoint::End(entry), Opcode::UnaryTypeof, vec![Value::Inst(a)]);
        let b = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(3.0)]);
        let c = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(4.0)]);
        let d = f.insert(InsertPoint::End(entry), Opcode::Add, vec![Value::Inst(b), Value::Inst(c)]);
        f.insert(InsertPoint::End(entry), Opcode::Return, vec![Value::Inst(d)]);

        let mut alloc = Allocation::default();
        alloc.set(a, 0);
        alloc.set(t, 1);
        alloc.set(b, 0);
        alloc.set(c, 2);
        alloc.set(d, 0);
        f.allocation = Some(alloc);

        LoadConstantValueNumbering.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        let f = module.function(FunctionId(0));
        assert!(f.inst(b).erased);
        assert_eq!(f.inst(d).operands[0], Value::Inst(a));
        assert!(!f.inst(c).erased);
    }

    #[test]
    fn test_overwritten_register_forgets_constant() {
        let mut module = Module::new();
        let id = module.add_function("f", vec!["x".into()], None, FunctionKind::Normal, true);
        let f = module.function_mut(id);
        let entry = BlockId(0);
        let a = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(3.0)]);
        let p = f.insert(InsertPoint::End(entry), Opcode::LoadParam, vec![Value::Param(1)]);
        let s = f.insert(InsertPoint::End(entry), Opcode::Add, vec![Value::Inst(a), Value::Inst(p)]);
        let b = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(3.0)]);
        let d = f.insert(InsertPoint::End(entry), Opcode::Add, vec![Value::Inst(s), Value::Inst(b)]);
        f.insert(InsertPoint::End(entry), Opcode::Return, vec![Value::Inst(d)]);

        let mut alloc = Allocation::default();
        alloc.set(a, 0);
        alloc.set(p, 1);
        alloc.set(s, 0);
        alloc.set(b, 1);
        alloc.set(d, 0);
        f.allocation = Some(alloc);

        LoadConstantValueNumbering.run(&mut module, &config()).unwrap();
        assert!(!module.function(FunctionId(0)).inst(b).erased);
    }
}
