//! Block-local forwarding of frame stores to frame loads, and removal of
//! frame stores that are overwritten before anything can observe them.

use rustc_hash::FxHashMap;

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{BlockId, Function, InstId, Module, Opcode, Value, VarId};

pub struct FrameLoadStoreOpts;

impl Pass for FrameLoadStoreOpts {
    fn name(&self) -> &'static str {
        "FrameLoadStoreOpts"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, |f| {
            let blocks: Vec<BlockId> = f.block_ids().collect();
            let mut changed = false;
            for b in blocks {
                changed |= forward_loads(f, b);
                changed |= remove_dead_stores(f, b);
            }
            changed
        });
        Ok(())
    }
}

type FrameKey = (Value, VarId);

fn frame_access(f: &Function, id: InstId) -> Option<FrameKey> {
    let inst = f.inst(id);
    let var = match inst.op {
        Opcode::LoadFrame => inst.operands.get(1),
        Opcode::StoreFrame => inst.operands.get(2),
        _ => None,
    }?
    .as_var()?;
    Some((inst.operands[0].clone(), var))
}

/// True for instructions that may read or write frames behind our back.
fn clobbers(f: &Function, id: InstId) -> bool {
    !matches!(f.inst(id).op, Opcode::StoreFrame | Opcode::StoreStack) && f.has_side_effects(id)
}

fn forward_loads(f: &mut Function, b: BlockId) -> bool {
    let mut known: FxHashMap<FrameKey, Value> = FxHashMap::default();
    let mut changed = false;
    for id in f.block(b).insts.clone() {
        let op = f.inst(id).op;
        match op {
            Opcode::LoadFrame => {
                let Some(key) = frame_access(f, id) else { continue };
                match known.get(&key).cloned() {
                    Some(value) => {
                        f.replace_all_uses(&Value::Inst(id), &value);
                        f.erase_inst(id);
                        changed = true;
                    }
                    None => {
                        known.insert(key, Value::Inst(id));
                    }
                }
            }
            Opcode::StoreFrame => {
                let Some(key) = frame_access(f, id) else { continue };
                // Another scope value may name the same environment.
                known.retain(|(_, var), _| *var != key.1);
                known.insert(key, f.inst(id).operands[1].clone());
            }
            _ if clobbers(f, id) => known.clear(),
            _ => {}
        }
    }
    changed
}

fn remove_dead_stores(f: &mut Function, b: BlockId) -> bool {
    let mut pending: FxHashMap<FrameKey, InstId> = FxHashMap::default();
    let mut changed = false;
    for id in f.block(b).insts.clone() {
        let op = f.inst(id).op;
        match op {
            Opcode::StoreFrame => {
                let Some(key) = frame_access(f, id) else { continue };
                if let Some(previous) = pending.insert(key, id) {
                    f.erase_inst(previous);
                    changed = true;
                }
            }
            Opcode::LoadFrame => {
                if let Some((_, var)) = frame_access(f, id) {
                    pending.retain(|(_, v), _| *v != var);
                }
            }
            _ if clobbers(f, id) => pending.clear(),
            _ => {}
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::test_util::*;

    #[test]
    fn test_loads_forward_from_store() {
        let mut module = lower(
            "function f() { var x = 1; function g() { return x; } x = 2; var a = x; var b = x; return a + b; }",
        );
        FrameLoadStoreOpts.run(&mut module, &config()).unwrap();
        assert_eq!(count(&module, "f", Opcode::LoadFrame), 0);
        assert_eq!(count(&module, "f", Opcode::StoreFrame), 1);
        crate::ir::verify_module(&module).unwrap();
    }

    #[test]
    fn test_calls_invalidate() {
        let mut module = lower("function f() { var x = 1; function g() { x = 5; } g(); return x; }");
        FrameLoadStoreOpts.run(&mut module, &config()).unwrap();
        assert_eq!(count(&module, "f", Opcode::LoadFrame), 1);
        assert_eq!(count(&module, "f", Opcode::StoreFrame), 1);
    }
}
