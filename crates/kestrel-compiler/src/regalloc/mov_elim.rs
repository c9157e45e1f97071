//! Removes moves whose source already sits in the destination register.

use rustc_hash::FxHashMap;

use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{InstId, Module, Opcode, Value};
use crate::opt::Pass;

pub struct MovElimination;

impl Pass for MovElimination {
    fn name(&self) -> &'static str {
        "MovElimination"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for id in module.function_ids() {
            let f = module.function_mut(id);
            let Some(allocation) = f.allocation.take() else {
                continue;
            };
            let users = f.users();
            let redundant: Vec<(InstId, InstId)> = f
                .inst_ids()
                .filter_map(|mov| {
                    let inst = f.inst(mov);
                    if inst.op != Opcode::Mov {
                        return None;
                    }
                    let src = inst.operands.first()?.as_inst()?;
                    let same = allocation.get(mov).is_some() && allocation.get(mov) == allocation.get(src);
                    // phi moves stay: the phi names them as its incoming value
                    let feeds_phi = users[mov.index()].iter().any(|&u| f.inst(u).op == Opcode::Phi);
                    (same && !feeds_phi).then_some((mov, src))
                })
                .collect();

            let mut forward: FxHashMap<InstId, InstId> = FxHashMap::default();
            for &(mov, src) in &redundant {
                let mut src = src;
                while let Some(&next) = forward.get(&src) {
                    src = next;
                }
                forward.insert(mov, src);
                f.replace_all_uses(&Value::Inst(mov), &Value::Inst(src));
                f.erase_inst(mov);
            }
            if !redundant.is_empty() {
                tracing::trace!(function = %f.name, removed = redundant.len(), "eliminated moves");
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
    use crate::regalloc::test_util::allocate_source;

    #[test]
    fn test_coalesced_phi_copies_disappear() {
        let mut module = allocate_source("function f(n) { var s = 0; for (var i = 0; i < n; i++) { s = s + i; } return s; }");
        let before = count(&module, "f", Opcode::Mov);
        MovElimination.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();

        let f = function(&module, "f");
        let alloc = f.allocation.as_ref().unwrap();
        assert!(count(&module, "f", Opcode::Mov) <= before);
        for id in f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Mov) {
            let src = f.inst(id).operands[0].as_inst().unwrap();
            let feeds_phi = f.inst_ids().any(|u| f.inst(u).op == Opcode::Phi && f.inst(u).operands.contains(&Value::Inst(id)));
            assert!(feeds_phi || alloc.get(id) != alloc.get(src));
        }
    }
}
