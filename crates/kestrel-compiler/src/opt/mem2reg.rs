//! Promotion of stack slots to SSA values.
//!
//! A slot qualifies when it is only ever loaded from and stored to. Phis
//! go on the iterated dominance frontier of the storing blocks, and the
//! dominator tree is walked once to rename loads. Every predecessor of a
//! phi block gets an entry; paths that never stored see `undefined`.

use rustc_hash::FxHashMap;

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::analysis::DominatorTree;
use crate::ir::{BlockId, Function, InsertPoint, InstId, Module, Opcode, Type, Value};

pub struct Mem2Reg;

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "Mem2Reg"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, promote);
        Ok(())
    }
}

/// Slots whose every use is a load from it or a store into it.
fn promotable_slots(f: &Function) -> Vec<InstId> {
    let users = f.users();
    f.inst_ids()
        .filter(|&slot| f.inst(slot).op == Opcode::AllocStack)
        .filter(|&slot| {
            let me = Value::Inst(slot);
            users[slot.index()].iter().all(|&u| {
                let inst = f.inst(u);
                match inst.op {
                    Opcode::LoadStack => inst.operands[0] == me,
                    Opcode::StoreStack => inst.operands[1] == me && inst.operands[0] != me,
                    _ => false,
                }
            })
        })
        .collect()
}

fn promote(f: &mut Function) -> bool {
    // Values live across a handler edge stay in memory.
    if f.inst_ids().any(|i| f.inst(i).op == Opcode::TryStart) {
        return false;
    }
    let slots = promotable_slots(f);
    if slots.is_empty() {
        return false;
    }
    let index_of: FxHashMap<InstId, usize> = slots.iter().enumerate().map(|(k, &s)| (s, k)).collect();
    let slot_of = |f: &Function, id: InstId, operand: usize| {
        f.inst(id)
            .operands
            .get(operand)
            .and_then(Value::as_inst)
            .and_then(|s| index_of.get(&s).copied())
    };

    let dt = DominatorTree::compute(f);
    let frontiers = dt.frontiers(f);
    let preds = f.predecessors();

    // Phi placement.
    let mut phi_slot: FxHashMap<InstId, usize> = FxHashMap::default();
    let mut block_phis: Vec<Vec<(InstId, usize)>> = vec![Vec::new(); f.blocks.len()];
    for k in 0..slots.len() {
        let mut def_blocks: Vec<BlockId> = f
            .inst_ids()
            .filter(|&i| f.inst(i).op == Opcode::StoreStack && slot_of(f, i, 1) == Some(k))
            .map(|i| f.inst(i).block)
            .filter(|&b| dt.is_reachable(b))
            .collect();
        def_blocks.dedup();
        let mut has_phi = vec![false; f.blocks.len()];
        let mut queued = vec![false; f.blocks.len()];
        for &b in &def_blocks {
            queued[b.index()] = true;
        }
        let mut work = def_blocks;
        while let Some(b) = work.pop() {
            for &d in &frontiers[b.index()] {
                if has_phi[d.index()] {
                    continue;
                }
                has_phi[d.index()] = true;
                let phi = f.insert_typed(InsertPoint::Start(d), Opcode::Phi, Vec::new(), Type::none());
                phi_slot.insert(phi, k);
                block_phis[d.index()].push((phi, k));
                if !queued[d.index()] {
                    queued[d.index()] = true;
                    work.push(d);
                }
            }
        }
    }

    // Renaming over the dominator tree.
    let mut replacement: FxHashMap<InstId, Value> = FxHashMap::default();
    let resolve = |replacement: &FxHashMap<InstId, Value>, mut v: Value| {
        while let Some(next) = v.as_inst().and_then(|i| replacement.get(&i)) {
            v = next.clone();
        }
        v
    };
    let mut block_out: Vec<Option<Vec<Value>>> = vec![None; f.blocks.len()];
    for b in dt.preorder() {
        let mut current = match dt.idom(b).and_then(|d| block_out[d.index()].clone()) {
            Some(values) => values,
            None => vec![Value::undefined(); slots.len()],
        };
        for &(phi, k) in &block_phis[b.index()] {
            current[k] = Value::Inst(phi);
        }
        for id in f.block(b).insts.clone() {
            let op = f.inst(id).op;
            match op {
                Opcode::LoadStack => {
                    if let Some(k) = slot_of(f, id, 0) {
                        replacement.insert(id, current[k].clone());
                    }
                }
                Opcode::StoreStack => {
                    if let Some(k) = slot_of(f, id, 1) {
                        current[k] = resolve(&replacement, f.inst(id).operands[0].clone());
                        f.erase_inst(id);
                    }
                }
                _ => {}
            }
        }
        block_out[b.index()] = Some(current);
    }

    for (&phi, &k) in &phi_slot {
        let block = f.inst(phi).block;
        for &p in &preds[block.index()] {
            let value = block_out[p.index()]
                .as_ref()
                .map_or_else(Value::undefined, |values| values[k].clone());
            f.set_phi_entry(phi, p, value);
        }
    }

    // Accesses in unreachable blocks see nothing.
    let leftovers: Vec<InstId> = f
        .inst_ids()
        .filter(|&i| !dt.is_reachable(f.inst(i).block))
        .collect();
    for id in leftovers {
        let op = f.inst(id).op;
        match op {
            Opcode::LoadStack if slot_of(f, id, 0).is_some() => {
                replacement.insert(id, Value::undefined());
            }
            Opcode::StoreStack if slot_of(f, id, 1).is_some() => f.erase_inst(id),
            _ => {}
        }
    }

    let ids: Vec<InstId> = f.inst_ids().collect();
    for id in ids {
        let operands = std::mem::take(&mut f.inst_mut(id).operands);
        f.inst_mut(id).operands = operands.into_iter().map(|v| resolve(&replacement, v)).collect();
    }
    for &load in replacement.keys() {
        f.erase_inst(load);
    }
    for &slot in &slots {
        f.erase_inst(slot);
    }

    infer_phi_types(f, phi_slot.keys().copied().collect());
    tracing::trace!(function = %f.name, slots = slots.len(), phis = phi_slot.len(), "promoted stack slots");
    true
}

/// Types the new phis as the least fixpoint of the union of their
/// entries.
fn infer_phi_types(f: &mut Function, phis: Vec<InstId>) {
    let mut changed = true;
    while changed {
        changed = false;
        for &phi in &phis {
            let ty = f
                .inst(phi)
                .phi_entries()
                .fold(Type::none(), |acc, (v, _)| acc.union(f.value_type(v)));
            if ty != f.inst(phi).ty {
                f.inst_mut(phi).ty = ty;
                changed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{dump_module, verify_module};
    use crate::opt::test_util::*;

    #[test]
    fn test_diamond_gets_phi() {
        let mut module = lower("function f(c) { var x = 1; if (c) { x = 2; } return x; }");
        Mem2Reg.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        assert_eq!(count(&module, "f", Opcode::AllocStack), 0);
        assert_eq!(count(&module, "f", Opcode::LoadStack), 0);
        assert!(dump_module(&module).contains("PhiInst (:number) 1: number, %BB0, 2: number, %BB1"));
    }

    #[test]
    fn test_loop_values_are_promoted() {
        let mut module = lower("function f(n) { var s = 0; for (var i = 0; i < n; i++) { s = s + i; } return s; }");
        Mem2Reg.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        assert_eq!(count(&module, "f", Opcode::StoreStack), 0);
        assert!(count(&module, "f", Opcode::Phi) >= 2);
    }

    #[test]
    fn test_read_before_write_is_undefined() {
        let mut module = lower("function f() { return x; var x = 1; }");
        Mem2Reg.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        assert!(dump_module(&module).contains("ReturnInst undefined: undefined"));
    }

    #[test]
    fn test_functions_with_try_are_skipped() {
        let mut module = lower("function f() { var x = 1; try { x = 2; } catch (e) {} return x; }");
        Mem2Reg.run(&mut module, &config()).unwrap();
        assert!(count(&module, "f", Opcode::AllocStack) > 0);
    }

    #[test]
    fn test_idempotent() {
        let mut module = lower("function f(c) { var x = 1; while (c) { x = x + 1; } return x; }");
        Mem2Reg.run(&mut module, &config()).unwrap();
        let once = dump_module(&module);
        Mem2Reg.run(&mut module, &config()).unwrap();
        assert_eq!(once, dump_module(&module));
    }
}
