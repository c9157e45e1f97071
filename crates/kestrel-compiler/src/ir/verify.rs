//! IR verifier.
//!
//! Run between passes when `verify_ir` is set. Any violation is a
//! compiler bug and is reported as [`Error::Internal`].

use super::analysis::DominatorTree;
use super::function::{Function, Module};
use super::instr::{BlockId, InstId, Opcode, Value};
use crate::error::{Error, Result};

/// Verifies every live function of the module.
pub fn verify_module(module: &Module) -> Result<()> {
    for id in module.function_ids() {
        verify_function(module, module.function(id))?;
    }
    Ok(())
}

/// Verifies block structure, phi/predecessor agreement and dominance.
pub fn verify_function(module: &Module, f: &Function) -> Result<()> {
    let fail = |msg: String| Err(Error::internal(f.name.clone(), msg));
    let preds = f.predecessors();
    let dt = DominatorTree::compute(f);

    if f.block(f.entry()).erased {
        return fail("entry block erased".into());
    }
    if !preds[f.entry().index()].is_empty() {
        return fail("entry block has predecessors".into());
    }

    for b in f.block_ids() {
        let insts = &f.block(b).insts;
        let Some(&last) = insts.last() else {
            return fail(format!("block {} is empty", b.0));
        };
        if !f.inst(last).op.is_terminator() {
            return fail(format!("block {} does not end in a terminator", b.0));
        }

        let mut seen_non_phi = false;
        for (pos, &id) in insts.iter().enumerate() {
            let inst = f.inst(id);
            if inst.erased {
                return fail(format!("erased instruction {} still in block {}", id.0, b.0));
            }
            if inst.block != b {
                return fail(format!("instruction {} has stale block {}", id.0, inst.block.0));
            }
            if inst.op.is_terminator() && pos + 1 != insts.len() {
                return fail(format!("{} in the middle of block {}", inst.op.name(), b.0));
            }
            match inst.op {
                Opcode::Phi if seen_non_phi => {
                    return fail(format!("phi {} after a non-phi in block {}", id.0, b.0));
                }
                Opcode::Phi => verify_phi(f, id, &preds[b.index()])?,
                Opcode::Catch if pos != 0 => {
                    return fail(format!("catch is not first in block {}", b.0));
                }
                _ => seen_non_phi = true,
            }
            verify_operands(module, f, &dt, id)?;
        }
    }
    Ok(())
}

fn verify_phi(f: &Function, phi: InstId, preds: &[BlockId]) -> Result<()> {
    let inst = f.inst(phi);
    if inst.operands.len() % 2 != 0 {
        return Err(Error::internal(&f.name, format!("phi {} has an odd operand count", phi.0)));
    }
    let mut entries: Vec<BlockId> = inst.phi_entries().map(|(_, b)| b).collect();
    if entries.len() * 2 != inst.operands.len() {
        return Err(Error::internal(&f.name, format!("phi {} has a malformed entry", phi.0)));
    }
    entries.sort();
    let before = entries.len();
    entries.dedup();
    if entries.len() != before {
        return Err(Error::internal(&f.name, format!("phi {} names a predecessor twice", phi.0)));
    }
    if entries != preds {
        return Err(Error::internal(
            &f.name,
            format!(
                "phi {} has {} entries but block {} has {} predecessors",
                phi.0,
                entries.len(),
                inst.block.0,
                preds.len()
            ),
        ));
    }
    Ok(())
}

fn verify_operands(module: &Module, f: &Function, dt: &DominatorTree, id: InstId) -> Result<()> {
    let inst = f.inst(id);
    let fail = |msg: String| Err(Error::internal(f.name.clone(), msg));
    for (i, op) in inst.operands.iter().enumerate() {
        match op {
            Value::Inst(def) => {
                if def.index() >= f.insts.len() || f.inst(*def).erased {
                    return fail(format!("{} {} uses erased instruction {}", inst.op.name(), id.0, def.0));
                }
                if !f.inst(*def).op.has_value() {
                    return fail(format!("{} {} uses valueless instruction {}", inst.op.name(), id.0, def.0));
                }
                if !dt.is_reachable(inst.block) {
                    continue;
                }
                let ok = if inst.op == Opcode::Phi {
                    match inst.operands.get(i + 1).and_then(Value::as_block) {
                        Some(pred) => !dt.is_reachable(pred) || dt.dominates(f.inst(*def).block, pred),
                        None => false,
                    }
                } else {
                    dt.inst_dominates(f, *def, id)
                };
                if !ok {
                    return fail(format!(
                        "{} {} is not dominated by its operand {}",
                        inst.op.name(),
                        id.0,
                        def.0
                    ));
                }
            }
            Value::Block(b) => {
                if b.index() >= f.blocks.len() || f.block(*b).erased {
                    return fail(format!("{} {} names erased block {}", inst.op.name(), id.0, b.0));
                }
            }
            Value::Function(callee) => {
                if callee.index() >= module.functions.len() || module.function(*callee).erased {
                    return fail(format!("{} {} names an erased function", inst.op.name(), id.0));
                }
            }
            Value::Var(v) => {
                if v.index() >= module.variables.len() || module.variable(*v).erased {
                    return fail(format!("{} {} names an erased variable", inst.op.name(), id.0));
                }
            }
            Value::Literal(_) | Value::Param(_) | Value::Global | Value::Label(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionKind, InsertPoint};

    fn with_phi(extra_entry: bool) -> Module {
        let mut m = Module::new();
        let id = m.add_function("f", vec![], None, FunctionKind::Normal, true);
        let f = m.function_mut(id);
        let (a, b, join) = (f.add_block(), f.add_block(), f.add_block());
        let c = f.insert(InsertPoint::End(BlockId(0)), Opcode::LoadParam, vec![Value::Param(1)]);
        f.insert(
            InsertPoint::End(BlockId(0)),
            Opcode::CondBranch,
            vec![Value::Inst(c), Value::Block(a), Value::Block(b)],
        );
        f.insert(InsertPoint::End(a), Opcode::Branch, vec![Value::Block(join)]);
        f.insert(InsertPoint::End(b), Opcode::Branch, vec![Value::Block(join)]);
        let mut ops = vec![Value::number(1.0), Value::Block(a)];
        if extra_entry {
            ops.extend([Value::number(2.0), Value::Block(b)]);
        }
        let phi = f.insert(InsertPoint::End(join), Opcode::Phi, ops);
        f.insert(InsertPoint::End(join), Opcode::Return, vec![Value::Inst(phi)]);
        m
    }

    #[test]
    fn test_valid_phi() {
        assert!(verify_module(&with_phi(true)).is_ok());
    }

    #[test]
    fn test_missing_phi_entry() {
        let err = verify_module(&with_phi(false)).unwrap_err();
        assert!(err.to_string().contains("1 entries but block 3 has 2 predecessors"));
    }

    #[test]
    fn test_missing_terminator() {
        let mut m = with_phi(true);
        let f = m.function_mut(crate::ir::FunctionId(0));
        let ret = f.terminator(BlockId(3)).unwrap();
        f.erase_inst(ret);
        assert!(verify_module(&m).is_err());
    }

    #[test]
    fn test_dominance_violation() {
        let mut m = with_phi(true);
        let f = m.function_mut(crate::ir::FunctionId(0));
        let in_a = f.insert(InsertPoint::Start(BlockId(1)), Opcode::AllocObject, vec![]);
        f.insert(InsertPoint::Start(BlockId(2)), Opcode::Mov, vec![Value::Inst(in_a)]);
        let err = verify_module(&m).unwrap_err();
        assert!(err.to_string().contains("not dominated"));
    }
}
