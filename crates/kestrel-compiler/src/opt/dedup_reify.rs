//! Removes reifications of `arguments` that an earlier one already
//! performed on every path.

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::analysis::DominatorTree;
use crate::ir::{Function, InstId, Module, Opcode};

pub struct DedupReifyArguments;

impl Pass for DedupReifyArguments {
    fn name(&self) -> &'static str {
        "DedupReifyArguments"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, dedup);
        Ok(())
    }
}

fn dedup(f: &mut Function) -> bool {
    let reifies: Vec<InstId> = f
        .inst_ids()
        .filter(|&i| {
            matches!(
                f.inst(i).op,
                Opcode::HBCReifyArgumentsLoose | Opcode::HBCReifyArgumentsStrict
            )
        })
        .collect();
    if reifies.len() < 2 {
        return false;
    }

    let dt = DominatorTree::compute(f);
    let redundant: Vec<InstId> = reifies
        .iter()
        .copied()
        .filter(|&r| {
            let inst = f.inst(r);
            reifies.iter().any(|&other| {
                other != r
                    && f.inst(other).op == inst.op
                    && f.inst(other).operands == inst.operands
                    && dt.inst_dominates(f, other, r)
            })
        })
        .collect();
    for &r in &redundant {
        f.erase_inst(r);
    }
    !redundant.is_empty()
}
