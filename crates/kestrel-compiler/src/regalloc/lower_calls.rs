//! Moves outgoing call arguments into consecutive registers.
//!
//! Calls read `this` and the arguments from a window of registers above
//! every allocated value, so the window never needs liveness: it starts
//! at the frame size computed by the allocator and the frame grows by the
//! widest call.

use super::check_frame_size;
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{InsertPoint, InstId, Module, Opcode, Value};
use crate::opt::Pass;

pub struct LowerCalls;

impl Pass for LowerCalls {
    fn name(&self) -> &'static str {
        "LowerCalls"
    }

    fn run(&self, module: &mut Module, config: &CompilerConfig) -> Result<()> {
        for id in module.function_ids() {
            let f = module.function_mut(id);
            let Some(mut allocation) = f.allocation.take() else {
                continue;
            };
            if allocation.calls_lowered {
                f.allocation = Some(allocation);
                continue;
            }

            let base = allocation.frame_size;
            let calls: Vec<InstId> = f
                .inst_ids()
                .filter(|&i| matches!(f.inst(i).op, Opcode::Call | Opcode::Construct))
                .collect();
            for call in calls {
                let args: Vec<Value> = f.inst(call).operands[1..].to_vec();
                for (i, arg) in args.into_iter().enumerate() {
                    let mov = f.insert(InsertPoint::Before(call), Opcode::Mov, vec![arg]);
                    allocation.set(mov, base + i as u32);
                    f.inst_mut(call).operands[1 + i] = Value::Inst(mov);
                }
            }
            allocation.calls_lowered = true;
            tracing::trace!(function = %f.name, frame_size = allocation.frame_size, "lowered calls");
            check_frame_size(f, allocation.frame_size, config)?;
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
    fn test_arguments_land_in_consecutive_registers() {
        let mut module = allocate_source("function f(g, a, b) { return g(a, b); }");
        let base = function(&module, "f").allocation.as_ref().unwrap().frame_size;
        LowerCalls.run(&mut module, &config()).unwrap();
        verify_module(&module).unwrap();

        let f = function(&module, "f");
        let alloc = f.allocation.as_ref().unwrap();
        let call = f.inst_ids().find(|&i| f.inst(i).op == Opcode::Call).unwrap();
        let regs: Vec<Option<u32>> = f.inst(call).operands[1..]
            .iter()
            .map(|v| v.as_inst().and_then(|m| alloc.get(m)))
            .collect();
        assert_eq!(regs, vec![Some(base), Some(base + 1), Some(base + 2)]);
        assert_eq!(alloc.frame_size, base + 3);
        assert!(alloc.calls_lowered);
    }

    #[test]
    fn test_lowering_twice_changes_nothing() {
        let mut module = allocate_source("function f(g) { return g(1) + g(2, 3); }");
        LowerCalls.run(&mut module, &config()).unwrap();
        let once = module.clone();
        LowerCalls.run(&mut module, &config()).unwrap();
        assert_eq!(once, module);
    }
}
