//! Materializes literal and global-object operands into registers.
//!
//! Bytecode instructions take registers, so every literal an instruction
//! reads becomes an `HBCLoadConst` placed right before it. Property names
//! and a few other operands are encoded in the instruction itself and
//! stay literal.

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{Function, InsertPoint, InstId, Module, Opcode, Value};

pub struct LoadConstants;

impl Pass for LoadConstants {
    fn name(&self) -> &'static str {
        "LoadConstants"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, materialize);
        Ok(())
    }
}

/// True when operand `index` of `op` is encoded in the instruction.
fn stays_literal(op: Opcode, index: usize, value: &Value) -> bool {
    let is_string = value.as_str().is_some();
    match op {
        Opcode::LoadProperty | Opcode::DeleteProperty => index == 1 && is_string,
        Opcode::StoreProperty => index == 2 && is_string,
        Opcode::TryLoadGlobalProperty => index == 1,
        Opcode::DeclareGlobalVar | Opcode::AllocArray | Opcode::HBCLoadConst => true,
        _ => false,
    }
}

fn needs_register(value: &Value) -> bool {
    matches!(value, Value::Literal(_) | Value::Global)
}

/// Emits the instruction that loads `value` at `at`.
fn load(f: &mut Function, at: InsertPoint, value: &Value) -> Value {
    let id = match value {
        Value::Literal(lit) => f.insert_typed(at, Opcode::HBCLoadConst, vec![value.clone()], lit.ty()),
        _ => f.insert(at, Opcode::HBCGetGlobalObject, vec![]),
    };
    Value::Inst(id)
}

fn materialize(f: &mut Function) -> bool {
    let ids: Vec<InstId> = f.inst_ids().collect();
    let mut changed = false;
    for id in ids {
        let inst = f.inst(id);
        let op = inst.op;
        if op == Opcode::Phi {
            let entries: Vec<(Value, _)> = inst
                .phi_entries()
                .filter(|(v, _)| needs_register(v))
                .map(|(v, b)| (v.clone(), b))
                .collect();
            for (value, pred) in entries {
                let loaded = load(f, InsertPoint::BeforeTerminator(pred), &value);
                f.set_phi_entry(id, pred, loaded);
                changed = true;
            }
            continue;
        }

        let operands: Vec<(usize, Value)> = inst
            .operands
            .iter()
            .enumerate()
            .filter(|(i, v)| needs_register(v) && !stays_literal(op, *i, v))
            .map(|(i, v)| (i, v.clone()))
            .collect();
        for (i, value) in operands {
            let loaded = load(f, InsertPoint::Before(id), &value);
            f.inst_mut(id).operands[i] = loaded;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::Mem2Reg;
    use crate::opt::test_util::*;

    fn load_constants(source: &str) -> Module {
        let mut module = lower(source);
        let config = config();
        Mem2Reg.run(&mut module, &config).unwrap();
        LoadConstants.run(&mut module, &config).unwrap();
        verify_module(&module).unwrap();
        module
    }

    fn operands_of(module: &Module, name: &str, op: Opcode) -> Vec<Value> {
        let f = function(module, name);
        f.inst_ids()
            .find(|&i| f.inst(i).op == op)
            .map(|i| f.inst(i).operands.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_arithmetic_operands_are_loaded() {
        let module = load_constants("function f(a) { return a - 1; }");
        assert_eq!(count(&module, "f", Opcode::HBCLoadConst), 1);
        let sub = operands_of(&module, "f", Opcode::Subtract);
        assert!(sub.iter().all(|v| v.as_inst().is_some()));
    }

    #[test]
    fn test_property_names_stay_literal() {
        let module = load_constants("function f(o) { o.x = 2; return o.y; }");
        assert_eq!(operands_of(&module, "f", Opcode::LoadProperty)[1], Value::string("y"));
        let store = operands_of(&module, "f", Opcode::StoreProperty);
        assert_eq!(store[2], Value::string("x"));
        assert!(store[0].as_inst().is_some());
    }

    #[test]
    fn test_global_object_is_loaded() {
        let module = load_constants("function f() { return missing; }");
        assert_eq!(count(&module, "f", Opcode::HBCGetGlobalObject), 1);
        let load = operands_of(&module, "f", Opcode::TryLoadGlobalProperty);
        assert_eq!(load[1], Value::string("missing"));
    }

    #[test]
    fn test_phi_constants_load_in_predecessors() {
        let module = load_constants("function f(c) { var x = 1; if (c) { x = 2; } return x; }");
        let f = function(&module, "f");
        let phi = f.inst_ids().find(|&i| f.inst(i).op == Opcode::Phi).unwrap();
        for (value, pred) in f.inst(phi).phi_entries() {
            let def = value.as_inst().unwrap();
            assert_eq!(f.inst(def).op, Opcode::HBCLoadConst);
            assert_eq!(f.inst(def).block, pred);
        }
    }
}
