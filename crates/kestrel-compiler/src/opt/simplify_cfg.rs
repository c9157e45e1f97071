//! Control-flow graph cleanup.

use super::{Pass, for_each_function, remove_unreachable_blocks};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{BlockId, Function, InsertPoint, Module, Opcode, Value};

pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "SimplifyCFG"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, |f| {
            let mut changed = false;
            loop {
                let step = fold_same_target_branches(f)
                    | remove_unreachable_blocks(f)
                    | merge_into_predecessor(f)
                    | skip_empty_block(f);
                if !step {
                    break;
                }
                changed = true;
            }
            changed
        });
        Ok(())
    }
}

/// `CondBranch c, B, B` becomes `Branch B`.
fn fold_same_target_branches(f: &mut Function) -> bool {
    let blocks: Vec<BlockId> = f.block_ids().collect();
    let mut changed = false;
    for b in blocks {
        let Some(t) = f.terminator(b) else { continue };
        let inst = f.inst_mut(t);
        if inst.op == Opcode::CondBranch && inst.operands[1] == inst.operands[2] {
            let target = inst.operands[1].clone();
            inst.op = Opcode::Branch;
            inst.operands = vec![target];
            changed = true;
        }
    }
    changed
}

/// Appends a block to its only predecessor when that predecessor jumps
/// to it unconditionally. Performs at most one merge.
fn merge_into_predecessor(f: &mut Function) -> bool {
    let preds = f.predecessors();
    let entry = f.entry();
    let candidate = f.block_ids().find_map(|b| {
        let [p] = preds[b.index()][..] else { return None };
        let branch = f.terminator(p)?;
        (b != entry && p != b && f.inst(branch).op == Opcode::Branch).then_some((p, b, branch))
    });
    let Some((pred, block, branch)) = candidate else {
        return false;
    };

    for phi in f.phis(block) {
        let value = f
            .phi_entry(phi, pred)
            .cloned()
            .unwrap_or_else(Value::undefined);
        f.replace_all_uses(&Value::Inst(phi), &value);
        f.erase_inst(phi);
    }
    for s in f.successors(block) {
        f.rename_phi_pred(s, block, pred);
    }
    f.erase_inst(branch);
    let moved = f.block(block).insts.clone();
    for id in moved {
        f.move_inst(id, InsertPoint::End(pred));
    }
    f.erase_block(block);
    true
}

/// Routes the predecessors of a block holding nothing but `Branch C`
/// straight to `C`. Performs at most one rewrite.
fn skip_empty_block(f: &mut Function) -> bool {
    let preds = f.predecessors();
    let entry = f.entry();
    let candidate = f.block_ids().find_map(|b| {
        let [only] = f.block(b).insts[..] else { return None };
        let inst = f.inst(only);
        let target = inst.operands.first().and_then(Value::as_block)?;
        if b == entry || inst.op != Opcode::Branch || target == b {
            return None;
        }
        let incoming = &preds[b.index()];
        let has_phis = !f.phis(target).is_empty();
        let redirectable = !incoming.is_empty()
            && incoming.iter().all(|&p| {
                let kind = f.terminator(p).map(|t| f.inst(t).op);
                matches!(kind, Some(Opcode::Branch | Opcode::CondBranch))
                    && !(has_phis && preds[target.index()].contains(&p))
            });
        redirectable.then_some((b, target))
    });
    let Some((block, target)) = candidate else {
        return false;
    };

    let incoming = preds[block.index()].clone();
    for phi in f.phis(target) {
        let value = f
            .phi_entry(phi, block)
            .cloned()
            .unwrap_or_else(Value::undefined);
        for &p in &incoming {
            f.set_phi_entry(phi, p, value.clone());
        }
    }
    f.remove_phi_entries(target, block);
    for &p in &incoming {
        f.redirect_edge(p, block, target);
    }
    f.erase_block(block);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::test_util::*;

    #[test]
    fn test_empty_if_collapses() {
        let mut module = lower("function f(c) { if (c) {} return 1; }");
        SimplifyCfg.run(&mut module, &config()).unwrap();
        assert_eq!(function(&module, "f").block_ids().count(), 1);
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_phi_conflict_keeps_one_arm() {
        let mut module = lower("function f(c) { var x = c ? 1 : 2; return x; }");
        SimplifyCfg.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        assert_eq!(count(&module, "f", Opcode::Phi), 1);
        assert_eq!(function(&module, "f").block_ids().count(), 3);
    }

    #[test]
    fn test_loops_survive() {
        let mut module = lower("function f(n) { var i = 0; while (i < n) { i = i + 1; } return i; }");
        SimplifyCfg.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        assert_eq!(count(&module, "f", Opcode::CondBranch), 1);
    }
}
