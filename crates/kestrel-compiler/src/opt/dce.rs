//! Dead code elimination.
//!
//! Removes unreachable blocks, stack slots and frame variables that are
//! written but never read, unused side-effect-free instructions
//! (including dead phi cycles), and functions no closure refers to.

use rustc_hash::FxHashSet;

use super::{Pass, for_each_function, remove_unreachable_blocks};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{Function, FunctionId, InstId, Module, Opcode, Value, VarId};

pub struct Dce;

impl Pass for Dce {
    fn name(&self) -> &'static str {
        "DCE"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        loop {
            let mut changed = for_each_function(module, |f| {
                let mut changed = remove_unreachable_blocks(f);
                changed |= remove_dead_stack_slots(f);
                changed |= sweep(f);
                changed
            });
            changed |= remove_dead_frame_stores(module);
            changed |= remove_unused_functions(module);
            if !changed {
                break;
            }
        }
        Ok(())
    }
}

/// Erases slots that are only ever stored to.
fn remove_dead_stack_slots(f: &mut Function) -> bool {
    let users = f.users();
    let slots: Vec<InstId> = f.inst_ids().filter(|&i| f.inst(i).op == Opcode::AllocStack).collect();
    let mut changed = false;
    for slot in slots {
        let only_stored = users[slot.index()].iter().all(|&u| {
            let inst = f.inst(u);
            inst.op == Opcode::StoreStack
                && inst.operands[1] == Value::Inst(slot)
                && inst.operands[0] != Value::Inst(slot)
        });
        if !only_stored {
            continue;
        }
        for &store in &users[slot.index()] {
            f.erase_inst(store);
        }
        f.erase_inst(slot);
        changed = true;
    }
    changed
}

/// Marks everything a side effect or terminator depends on and erases
/// the rest.
fn sweep(f: &mut Function) -> bool {
    let mut live = vec![false; f.insts.len()];
    let mut work: Vec<InstId> = f
        .inst_ids()
        .filter(|&i| !f.inst(i).op.has_value() || f.has_side_effects(i))
        .collect();
    while let Some(id) = work.pop() {
        if live[id.index()] {
            continue;
        }
        live[id.index()] = true;
        for op in &f.inst(id).operands {
            if let Value::Inst(def) = op {
                if !live[def.index()] {
                    work.push(*def);
                }
            }
        }
    }
    let dead: Vec<InstId> = f.inst_ids().filter(|i| !live[i.index()]).collect();
    for &id in &dead {
        f.erase_inst(id);
    }
    !dead.is_empty()
}

/// Erases stores to frame variables that no function reads, and the
/// variables themselves.
fn remove_dead_frame_stores(module: &mut Module) -> bool {
    let mut read: FxHashSet<VarId> = FxHashSet::default();
    for id in module.function_ids() {
        let f = module.function(id);
        for i in f.inst_ids() {
            let inst = f.inst(i);
            if inst.op == Opcode::LoadFrame {
                read.extend(inst.operands.get(1).and_then(Value::as_var));
            }
        }
    }

    let mut changed = for_each_function(module, |f| {
        let dead: Vec<InstId> = f
            .inst_ids()
            .filter(|&i| {
                let inst = f.inst(i);
                inst.op == Opcode::StoreFrame && inst.operands.get(2).and_then(Value::as_var).is_some_and(|v| !read.contains(&v))
            })
            .collect();
        for &i in &dead {
            f.erase_inst(i);
        }
        !dead.is_empty()
    });

    for (i, var) in module.variables.iter_mut().enumerate() {
        if !var.erased && !read.contains(&VarId(i as u32)) {
            var.erased = true;
            changed = true;
        }
    }
    changed
}

/// Erases functions whose closure is never created by a live function.
fn remove_unused_functions(module: &mut Module) -> bool {
    let mut changed = false;
    loop {
        let mut referenced: FxHashSet<FunctionId> = FxHashSet::default();
        referenced.insert(module.top_level());
        for id in module.function_ids() {
            let f = module.function(id);
            for i in f.inst_ids() {
                let inst = f.inst(i);
                if inst.op == Opcode::CreateFunction {
                    referenced.extend(inst.operands.first().and_then(Value::as_function));
                }
            }
        }
        let unused: Vec<FunctionId> = module
            .function_ids()
            .into_iter()
            .filter(|id| !referenced.contains(id))
            .collect();
        if unused.is_empty() {
            return changed;
        }
        for id in unused {
            tracing::trace!(function = %module.function(id).name, "removing unused function");
            module.function_mut(id).erased = true;
            for var in &mut module.variables {
                if var.owner == id {
                    var.erased = true;
                }
            }
        }
        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::test_util::*;

    #[test]
    fn test_store_only_slots_are_removed() {
        let mut module = lower("function f(a) { var t = a; return 1; }");
        Dce.run(&mut module, &config()).unwrap();
        assert_eq!(count(&module, "f", Opcode::AllocStack), 0);
        assert_eq!(count(&module, "f", Opcode::StoreStack), 0);
        assert_eq!(count(&module, "f", Opcode::LoadParam), 0);
    }

    #[test]
    fn test_side_effects_are_kept() {
        let mut module = lower("function f(o) { o.x; return 1; }");
        Dce.run(&mut module, &config()).unwrap();
        assert_eq!(count(&module, "f", Opcode::LoadProperty), 1);
    }

    #[test]
    fn test_unused_closure_is_removed() {
        let mut module = lower("function f() { function g() {} var h = function () {}; return 1; }");
        Dce.run(&mut module, &config()).unwrap();
        assert!(module.functions.iter().filter(|f| f.name != "global" && f.name != "f").all(|f| f.erased));
        assert_eq!(count(&module, "f", Opcode::CreateFunction), 0);
    }

    #[test]
    fn test_write_only_frame_variable_is_removed() {
        let mut module = lower("function f() { var x = 1; function g() { x = 2; } g(); return 0; }");
        Dce.run(&mut module, &config()).unwrap();
        let f = function(&module, "f").id;
        assert!(module.frame_vars(f).is_empty());
        assert_eq!(count(&module, "f", Opcode::StoreFrame), 0);
        assert_eq!(count(&module, "g", Opcode::StoreFrame), 0);
    }

    #[test]
    fn test_read_frame_variable_is_kept() {
        let mut module = lower("function f() { var x = 1; function g() { return x; } return g(); }");
        Dce.run(&mut module, &config()).unwrap();
        let f = function(&module, "f").id;
        assert_eq!(module.frame_vars(f).len(), 1);
    }
}
