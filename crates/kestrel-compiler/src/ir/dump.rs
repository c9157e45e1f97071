//! Textual IR dumps.
//!
//! ```text
//! function f(x): number
//! frame = [y: number]
//! %BB0:
//!   %0 = LoadParamInst (:any) %x
//!   %1 = BinarySubtractInst (:number) %0: any, 1: number
//!        ReturnInst %1: number
//! ```
//!
//! Instructions are numbered in print order. Once registers are assigned
//! every line is prefixed with its register.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use super::function::{Function, Module};
use super::instr::{BlockId, InstId, Value};

/// Dumps every live function of the module, separated by blank lines.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    for (i, id) in module.function_ids().into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&dump_function(module, module.function(id)));
    }
    out
}

/// Dumps one function.
pub fn dump_function(module: &Module, f: &Function) -> String {
    let printer = Printer::new(module, f);
    let mut out = String::new();
    printer.write(&mut out);
    out
}

struct Printer<'a> {
    module: &'a Module,
    f: &'a Function,
    inst_numbers: FxHashMap<InstId, usize>,
    block_numbers: FxHashMap<BlockId, usize>,
}

impl<'a> Printer<'a> {
    fn new(module: &'a Module, f: &'a Function) -> Self {
        let mut inst_numbers = FxHashMap::default();
        let mut block_numbers = FxHashMap::default();
        for (bi, b) in f.block_ids().enumerate() {
            block_numbers.insert(b, bi);
        }
        for (k, id) in f.inst_ids().enumerate() {
            inst_numbers.insert(id, k);
        }
        Self {
            module,
            f,
            inst_numbers,
            block_numbers,
        }
    }

    fn write(&self, out: &mut String) {
        let f = self.f;
        let _ = writeln!(out, "function {}({}): {}", f.name, f.params.join(", "), f.return_type);

        let frame: Vec<String> = self
            .module
            .frame_vars(f.id)
            .into_iter()
            .map(|v| {
                let var = self.module.variable(v);
                if var.ty.is_none() {
                    var.name.clone()
                } else {
                    format!("{}: {}", var.name, var.ty)
                }
            })
            .collect();
        let _ = writeln!(out, "frame = [{}]", frame.join(", "));

        for b in f.block_ids() {
            let _ = writeln!(out, "%BB{}:", self.block_numbers[&b]);
            for &id in &f.block(b).insts {
                self.write_inst(out, id);
            }
        }
    }

    fn write_inst(&self, out: &mut String, id: InstId) {
        let inst = self.f.inst(id);
        if let Some(alloc) = &self.f.allocation {
            let reg = alloc.get(id).map(|r| format!("{{r{}}}", r)).unwrap_or_default();
            let _ = write!(out, "{:<8}", reg);
        }
        let operands: Vec<String> = inst.operands.iter().map(|v| self.operand(v)).collect();
        if inst.op.has_value() {
            let _ = write!(out, "  %{} = {} (:{})", self.inst_numbers[&id], inst.op.name(), inst.ty);
        } else {
            let _ = write!(out, "       {}", inst.op.name());
        }
        if !operands.is_empty() {
            let _ = write!(out, " {}", operands.join(", "));
        }
        out.push('\n');
    }

    fn operand(&self, value: &Value) -> String {
        match value {
            Value::Inst(id) => match self.inst_numbers.get(id) {
                Some(k) => format!("%{}: {}", k, self.f.inst(*id).ty),
                None => "%<erased>".to_string(),
            },
            Value::Literal(lit) => format!("{}: {}", lit, lit.ty()),
            Value::Param(0) => "%this".to_string(),
            Value::Param(i) => match self.f.params.get(*i as usize - 1) {
                Some(name) => format!("%{}", name),
                None => format!("%arg{}", i),
            },
            Value::Var(v) => {
                let var = self.module.variable(*v);
                if var.ty.is_none() {
                    format!("[{}]", var.name)
                } else {
                    format!("[{}]: {}", var.name, var.ty)
                }
            }
            Value::Function(id) => format!("%{}()", self.module.function(*id).name),
            Value::Block(b) => match self.block_numbers.get(b) {
                Some(n) => format!("%BB{}", n),
                None => "%BB<erased>".to_string(),
            },
            Value::Global => "globalObject: object".to_string(),
            Value::Label(name) => name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Allocation, FunctionKind, InsertPoint, Opcode};

    fn module() -> Module {
        let mut m = Module::new();
        let g = m.add_function("f", vec!["x".into()], None, FunctionKind::Normal, true);
        let f = m.function_mut(g);
        let p = f.insert(InsertPoint::End(BlockId(0)), Opcode::LoadParam, vec![Value::Param(1)]);
        let sub = f.insert(
            InsertPoint::End(BlockId(0)),
            Opcode::Subtract,
            vec![Value::Inst(p), Value::number(1.0)],
        );
        f.insert(InsertPoint::End(BlockId(0)), Opcode::Return, vec![Value::Inst(sub)]);
        m
    }

    #[test]
    fn test_dump_format() {
        let m = module();
        let text = dump_module(&m);
        let expected = "\
function f(x): any
frame = []
%BB0:
  %0 = LoadParamInst (:any) %x
  %1 = BinarySubtractInst (:number|bigint) %0: any, 1: number
       ReturnInst %1: number|bigint
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_register_prefix() {
        let mut m = module();
        let f = m.function_mut(crate::ir::FunctionId(0));
        let mut alloc = Allocation::default();
        alloc.set(InstId(0), 0);
        alloc.set(InstId(1), 1);
        f.allocation = Some(alloc);
        let text = dump_module(&m);
        assert!(text.contains("{r1}      %1 = BinarySubtractInst"));
        assert!(text.contains("               ReturnInst"));
    }
}
