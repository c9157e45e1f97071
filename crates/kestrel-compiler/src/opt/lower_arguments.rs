//! Lowering of the lazy `arguments` object.
//!
//! `arguments.length` and `arguments[k]` read the caller's argument
//! registers directly. Any other use first reifies the object into a
//! stack slot and then loads it from there. A use through a phi reifies
//! at the end of the incoming edge, so every path into the phi reads a
//! materialized object.

use super::{Pass, for_each_function};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{Function, InsertPoint, InstId, Module, Opcode, Type, Value};

pub struct LowerArgumentsArray;

impl Pass for LowerArgumentsArray {
    fn name(&self) -> &'static str {
        "LowerArgumentsArray"
    }

    fn run(&self, module: &mut Module, _config: &CompilerConfig) -> Result<()> {
        for_each_function(module, |f| {
            let args: Vec<InstId> = f
                .inst_ids()
                .filter(|&i| {
                    matches!(
                        f.inst(i).op,
                        Opcode::CreateArgumentsLoose | Opcode::CreateArgumentsStrict
                    )
                })
                .collect();
            for &a in &args {
                reify_at_uses(f, a);
            }
            !args.is_empty()
        });
        Ok(())
    }
}

fn reify_at_uses(f: &mut Function, args: InstId) {
    let strict = f.inst(args).op == Opcode::CreateArgumentsStrict;
    let (reify, by_val) = if strict {
        (Opcode::HBCReifyArgumentsStrict, Opcode::HBCGetArgumentsPropByValStrict)
    } else {
        (Opcode::HBCReifyArgumentsLoose, Opcode::HBCGetArgumentsPropByValLoose)
    };
    let me = Value::Inst(args);

    let slot = f.insert(
        InsertPoint::Before(args),
        Opcode::AllocStack,
        vec![Value::Label("arguments".to_string())],
    );
    f.insert(
        InsertPoint::Before(args),
        Opcode::StoreStack,
        vec![Value::undefined(), Value::Inst(slot)],
    );

    let users = f.users()[args.index()].clone();
    for user in users {
        let inst = f.inst(user);
        let direct_load = inst.op == Opcode::LoadProperty && inst.operands[0] == me && inst.operands[1] != me;
        if direct_load {
            let key = inst.operands[1].clone();
            let inst = f.inst_mut(user);
            if key.as_str() == Some("length") {
                inst.op = Opcode::HBCGetArgumentsLength;
                inst.operands = vec![Value::Inst(slot)];
                inst.ty = Type::number();
            } else {
                inst.op = by_val;
                inst.operands = vec![key, Value::Inst(slot)];
            }
        } else if inst.op == Opcode::Phi {
            let block = inst.block;
            loop {
                let entry = f.inst(user).phi_entries().find(|(v, _)| **v == me).map(|(_, p)| p);
                let Some(mut pred) = entry else {
                    break;
                };
                if f.successors(pred).len() > 1 {
                    pred = f.split_edge(pred, block);
                }
                f.insert(InsertPoint::BeforeTerminator(pred), reify, vec![Value::Inst(slot)]);
                let load = f.insert_typed(
                    InsertPoint::BeforeTerminator(pred),
                    Opcode::LoadStack,
                    vec![Value::Inst(slot)],
                    Type::object(),
                );
                f.set_phi_entry(user, pred, Value::Inst(load));
            }
        } else {
            f.insert(InsertPoint::Before(user), reify, vec![Value::Inst(slot)]);
            let load = f.insert_typed(
                InsertPoint::Before(user),
                Opcode::LoadStack,
                vec![Value::Inst(slot)],
                Type::object(),
            );
            for op in &mut f.inst_mut(user).operands {
                if *op == me {
                    *op = Value::Inst(load);
                }
            }
        }
    }
    f.erase_inst(args);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::test_util::*;
    use crate::opt::{Dce, Mem2Reg, SimpleStackPromotion};

    fn lower_args(source: &str) -> Module {
        let mut module = lower(source);
        let config = config();
        Mem2Reg.run(&mut module, &config).unwrap();
        LowerArgumentsArray.run(&mut module, &config).unwrap();
        verify_module(&module).unwrap();
        module
    }

    #[test]
    fn test_length_reads_registers() {
        let module = lower_args("function f() { return arguments.length; }");
        assert_eq!(count(&module, "f", Opcode::HBCGetArgumentsLength), 1);
        assert_eq!(count(&module, "f", Opcode::CreateArgumentsLoose), 0);
        assert_eq!(count(&module, "f", Opcode::HBCReifyArgumentsLoose), 0);
    }

    #[test]
    fn test_indexed_read() {
        let module = lower_args("function f(i) { 'use strict'; return arguments[i]; }");
        assert_eq!(count(&module, "f", Opcode::HBCGetArgumentsPropByValStrict), 1);
    }

    #[test]
    fn test_escaping_use_reifies() {
        let module = lower_args("function f(o) { return o.h(arguments); }");
        assert_eq!(count(&module, "f", Opcode::HBCReifyArgumentsLoose), 1);
        assert_eq!(count(&module, "f", Opcode::LoadStack), 1);
    }

    #[test]
    fn test_phi_use_reifies_on_the_edge() {
        let source = "
            function decrementArguments() {
                for (var i = 0; i < 2; i++) {
                    var var1 = () => var3 = 0;
                    var var3 = arguments;
                }
                return var3 - 1;
            }";
        let mut module = lower(source);
        let config = config();
        for pass in [&Dce as &dyn Pass, &SimpleStackPromotion, &Mem2Reg, &LowerArgumentsArray] {
            pass.run(&mut module, &config).unwrap();
        }
        verify_module(&module).unwrap();
        assert_eq!(count(&module, "decrementArguments", Opcode::HBCReifyArgumentsLoose), 1);
        let f = function(&module, "decrementArguments");
        let phi_reads_load = f.inst_ids().filter(|&i| f.inst(i).op == Opcode::Phi).any(|phi| {
            f.inst(phi)
                .phi_entries()
                .any(|(v, _)| v.as_inst().is_some_and(|d| f.inst(d).op == Opcode::LoadStack))
        });
        assert!(phi_reads_load);
    }
}
