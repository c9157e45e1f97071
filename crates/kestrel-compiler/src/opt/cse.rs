//! Common subexpression elimination over the dominator tree.

use rustc_hash::FxHashMap;

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::analysis::DominatorTree;
use crate::ir::{Function, InstId, Module, Opcode, Value};

pub struct Cse;

impl Pass for Cse {
    fn name(&self) -> &'static str {
        "CSE"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, eliminate);
        Ok(())
    }
}

fn candidate(f: &Function, id: InstId) -> bool {
    let op = f.inst(id).op;
    op.has_value() && !matches!(op, Opcode::Mov | Opcode::HBCSpillMov | Opcode::UnionNarrowTrusted) && f.is_pure(id)
}

fn eliminate(f: &mut Function) -> bool {
    let dt = DominatorTree::compute(f);
    let mut available: FxHashMap<(Opcode, Vec<Value>), Vec<InstId>> = FxHashMap::default();
    let mut replacement: FxHashMap<InstId, InstId> = FxHashMap::default();
    let resolve = |replacement: &FxHashMap<InstId, InstId>, v: &Value| match v {
        Value::Inst(i) => Value::Inst(replacement.get(i).copied().unwrap_or(*i)),
        other => other.clone(),
    };

    for b in dt.preorder() {
        for id in f.block(b).insts.clone() {
            let operands: Vec<Value> = f.inst(id).operands.iter().map(|v| resolve(&replacement, v)).collect();
            f.inst_mut(id).operands = operands;
            if !candidate(f, id) {
                continue;
            }
            let key = (f.inst(id).op, f.inst(id).operands.clone());
            let existing = available
                .get(&key)
                .and_then(|defs| defs.iter().copied().find(|&d| dt.dominates(f.inst(d).block, b)));
            match existing {
                Some(def) => {
                    replacement.insert(id, def);
                }
                None => available.entry(key).or_default().push(id),
            }
        }
    }
    if replacement.is_empty() {
        return false;
    }

    let ids: Vec<InstId> = f.inst_ids().collect();
    for id in ids {
        let operands: Vec<Value> = f.inst(id).operands.iter().map(|v| resolve(&replacement, v)).collect();
        f.inst_mut(id).operands = operands;
    }
    for &dead in replacement.keys() {
        f.erase_inst(dead);
    }
    tracing::trace!(function = %f.name, removed = replacement.len(), "eliminated common subexpressions");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::Mem2Reg;
    use crate::opt::test_util::*;

    fn cse(source: &str) -> Module {
        let mut module = lower(source);
        Mem2Reg.run(&mut module, &config()).unwrap();
        Cse.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();
        module
    }

    #[test]
    fn test_repeated_expression_is_shared() {
        let module = cse("function f(x) { return typeof x + typeof x; }");
        assert_eq!(count(&module, "f", Opcode::UnaryTypeof), 1);
    }

    #[test]
    fn test_dominating_definition_is_reused() {
        let module = cse("function f(c, x) { var t = typeof x; if (c) { return typeof x; } return t; }");
        assert_eq!(count(&module, "f", Opcode::UnaryTypeof), 1);
    }

    #[test]
    fn test_sibling_blocks_are_not_merged() {
        let module = cse("function f(c, x) { if (c) { return typeof x; } return typeof x; }");
        assert_eq!(count(&module, "f", Opcode::UnaryTypeof), 2);
    }

    #[test]
    fn test_impure_operations_are_kept() {
        let module = cse("function f(o) { return o.x + o.x; }");
        assert_eq!(count(&module, "f", Opcode::LoadProperty), 2);
    }
}
