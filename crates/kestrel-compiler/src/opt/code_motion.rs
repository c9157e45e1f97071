//! Sinks constant loads into the block that uses them, shortening their
//! live ranges. A load never moves into a deeper loop.

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::analysis::{DominatorTree, loop_depths};
use crate::ir::{Function, InsertPoint, InstId, Module, Opcode};

pub struct CodeMotion;

impl Pass for CodeMotion {
    fn name(&self) -> &'static str {
        "CodeMotion"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, sink_constants);
        Ok(())
    }
}

fn sink_constants(f: &mut Function) -> bool {
    let dt = DominatorTree::compute(f);
    let depth = loop_depths(f, &dt);
    let users = f.users();
    let loads: Vec<InstId> = f
        .inst_ids()
        .filter(|&i| matches!(f.inst(i).op, Opcode::HBCLoadConst | Opcode::HBCGetGlobalObject))
        .collect();

    let mut moved = 0;
    for load in loads {
        let uses = &users[load.index()];
        let Some(&first) = uses.first() else { continue };
        let from = f.inst(load).block;
        let to = f.inst(first).block;
        let movable = to != from
            && depth[to.index()] <= depth[from.index()]
            && uses.iter().all(|&u| f.inst(u).op != Opcode::Phi && f.inst(u).block == to);
        if !movable {
            continue;
        }
        // users are in layout order
        f.move_inst(load, InsertPoint::Before(first));
        moved += 1;
    }
    if moved > 0 {
        tracing::trace!(function = %f.name, moved, "sank constant loads");
    }
    moved > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, FunctionId, FunctionKind, Value, verify_module};
    use crate::opt::test_util::*;

    /// entry: load 7; cond -> then | exit. then: return load.
    fn module_with_hoisted_load(loop_then: bool) -> (Module, InstId) {
        let mut module = Module::new();
        let id = module.add_function("f", vec!["c".into()], None, FunctionKind::Normal, true);
        let f = module.function_mut(id);
        let entry = BlockId(0);
        let (then, exit) = (f.add_block(), f.add_block());
        let c = f.insert(InsertPoint::End(entry), Opcode::LoadParam, vec![Value::Param(1)]);
        let k = f.insert(InsertPoint::End(entry), Opcode::HBCLoadConst, vec![Value::number(7.0)]);
        let header = if loop_then {
            let header = f.add_block();
            f.insert(InsertPoint::End(entry), Opcode::Branch, vec![Value::Block(header)]);
            f.insert(
                InsertPoint::End(header),
                Opcode::CondBranch,
                vec![Value::Inst(c), Value::Block(then), Value::Block(exit)],
            );
            header
        } else {
            f.insert(
                InsertPoint::End(entry),
                Opcode::CondBranch,
                vec![Value::Inst(c), Value::Block(then), Value::Block(exit)],
            );
            entry
        };
        f.insert(InsertPoint::End(then), Opcode::Add, vec![Value::Inst(k), Value::Inst(k)]);
        if loop_then {
            f.insert(InsertPoint::End(then), Opcode::Branch, vec![Value::Block(header)]);
        } else {
            f.insert(InsertPoint::End(then), Opcode::Return, vec![Value::Inst(k)]);
        }
        f.insert(InsertPoint::End(exit), Opcode::Return, vec![Value::undefined()]);
        (module, k)
    }

    #[test]
    fn test_load_sinks_to_single_using_block() {
        let (mut module, k) = module_with_hoisted_load(false);
        CodeMotion.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        let f = module.function(FunctionId(0));
        assert_eq!(f.inst(k).block, BlockId(1));
        assert_eq!(f.index_in_block(k), 0);
    }

    #[test]
    fn test_load_stays_out_of_loops() {
        let (mut module, k) = module_with_hoisted_load(true);
        CodeMotion.run(&mut module, &config()).unwrap();
        let f = module.function(FunctionId(0));
        assert_eq!(f.inst(k).block, BlockId(0));
    }
}
