//! Routes registers that do not fit a short operand through scratch
//! registers.
//!
//! Most bytecode instructions encode registers in a single byte. When a
//! frame is larger than that, every register is shifted up by `k` and the
//! low `k` registers become scratch space: a long operand is copied into a
//! scratch register right before the instruction, and a long result is
//! written to a scratch register and copied out right after it. Moves have
//! long forms and need no help.

use rustc_hash::FxHashSet;

use super::check_frame_size;
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::ir::{Allocation, Function, InsertPoint, InstId, Module, Opcode, Value};
use crate::opt::Pass;

pub struct SpillRegisters;

impl Pass for SpillRegisters {
    fn name(&self) -> &'static str {
        "SpillRegisters"
    }

    fn run(&self, module: &mut Module, config: &CompilerConfig) -> Result<()> {
        let limit = config.short_register_limit;
        for id in module.function_ids() {
            let f = module.function_mut(id);
            let Some(mut allocation) = f.allocation.take() else {
                continue;
            };
            if allocation.scratch_registers > 0 || allocation.frame_size <= limit {
                f.allocation = Some(allocation);
                continue;
            }

            let mut k = 0;
            loop {
                let n = scratch_needed(f, &allocation, k, limit);
                if n <= k {
                    break;
                }
                k = n;
            }
            if k == 0 {
                f.allocation = Some(allocation);
                continue;
            }

            for reg in allocation.registers.iter_mut().flatten() {
                *reg += k;
            }
            allocation.frame_size += k;
            allocation.scratch_registers = k;
            tracing::debug!(function = %f.name, scratch = k, frame_size = allocation.frame_size, "spilling registers");
            check_frame_size(f, allocation.frame_size, config)?;

            let ids: Vec<InstId> = f.inst_ids().collect();
            for id in ids {
                spill_instruction(f, &mut allocation, id, limit);
            }
            f.allocation = Some(allocation);
        }
        Ok(())
    }
}

/// Instructions whose registers are not limited to short operands.
fn is_exempt(op: Opcode) -> bool {
    matches!(op, Opcode::Mov | Opcode::HBCSpillMov | Opcode::Phi | Opcode::AllocStack)
}

/// Operand positions read from a register by the short encoding.
/// Call arguments are addressed as a window from the first one, which
/// takes a wide operand.
fn short_operands(f: &Function, id: InstId) -> Vec<(usize, InstId)> {
    let inst = f.inst(id);
    let count = match inst.op {
        Opcode::Call | Opcode::Construct => 1,
        _ => inst.operands.len(),
    };
    inst.operands[..count.min(inst.operands.len())]
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.as_inst().map(|src| (i, src)))
        .collect()
}

fn is_reify(op: Opcode) -> bool {
    matches!(op, Opcode::HBCReifyArgumentsLoose | Opcode::HBCReifyArgumentsStrict)
}

/// Scratch registers needed if every register were shifted up by `shift`.
fn scratch_needed(f: &Function, allocation: &Allocation, shift: u32, limit: u32) -> u32 {
    let long = |id: InstId| allocation.get(id).is_some_and(|r| r + shift >= limit);
    let mut needed = 0;
    for id in f.inst_ids() {
        let op = f.inst(id).op;
        if is_exempt(op) {
            continue;
        }
        let operands: FxHashSet<InstId> = short_operands(f, id)
            .into_iter()
            .map(|(_, src)| src)
            .filter(|&src| long(src))
            .collect();
        let result = u32::from(long(id));
        needed = needed.max(operands.len() as u32).max(result);
    }
    needed
}

fn spill_instruction(f: &mut Function, allocation: &mut Allocation, id: InstId, limit: u32) {
    let op = f.inst(id).op;
    if is_exempt(op) {
        return;
    }
    let long = |a: &Allocation, v: InstId| a.get(v).is_some_and(|r| r >= limit);

    let mut copies: Vec<(InstId, InstId)> = Vec::new();
    for (i, src) in short_operands(f, id) {
        if !long(allocation, src) {
            continue;
        }
        let copy = match copies.iter().find(|(s, _)| *s == src) {
            Some(&(_, copy)) => copy,
            None => {
                let ty = f.inst(src).ty;
                let copy = f.insert_typed(InsertPoint::Before(id), Opcode::HBCSpillMov, vec![Value::Inst(src)], ty);
                allocation.set(copy, copies.len() as u32);
                copies.push((src, copy));
                copy
            }
        };
        f.inst_mut(id).operands[i] = Value::Inst(copy);

        // the reified object lands in the scratch copy; write it back
        if is_reify(op) {
            if let Some(home) = allocation.get(src) {
                let ty = f.inst(src).ty;
                let back = f.insert_typed(InsertPoint::After(id), Opcode::HBCSpillMov, vec![Value::Inst(copy)], ty);
                allocation.set(back, home);
            }
        }
    }

    if long(allocation, id) {
        let Some(home) = allocation.get(id) else { return };
        let ty = f.inst(id).ty;
        let out = f.insert_typed(InsertPoint::After(id), Opcode::HBCSpillMov, vec![Value::Inst(id)], ty);
        f.replace_all_uses(&Value::Inst(id), &Value::Inst(out));
        f.inst_mut(out).operands[0] = Value::Inst(id);
        allocation.set(out, home);
        allocation.set(id, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify_module;
    use crate::opt::test_util::*;
    use crate::regalloc::LowerCalls;
    use crate::regalloc::test_util::allocate_source;

    const WIDE: &str = "function f(a, b, c, d, e, g, h, i, j, k, l) {
        return a * l + b * k + c * j + d * i + e * h + g;
    }";

    fn narrow() -> CompilerConfig {
        CompilerConfig {
            short_register_limit: 8,
            ..config()
        }
    }

    #[test]
    fn test_long_registers_go_through_scratch() {
        let mut module = allocate_source(WIDE);
        let config = narrow();
        assert!(function(&module, "f").allocation.as_ref().unwrap().frame_size > 8);
        SpillRegisters.run(&mut module, &config).unwrap();
        verify_module(&module).unwrap();

        let f = function(&module, "f");
        let alloc = f.allocation.as_ref().unwrap();
        let k = alloc.scratch_registers;
        assert!(k > 0);
        assert!(count(&module, "f", Opcode::HBCSpillMov) > 0);
        for id in f.inst_ids() {
            let op = f.inst(id).op;
            if is_exempt(op) {
                continue;
            }
            if let Some(r) = alloc.get(id) {
                assert!(r < 8, "%{} {:?} kept r{}", id.0, op, r);
            }
            for (_, src) in short_operands(f, id) {
                assert!(alloc.get(src).is_none_or(|r| r < 8));
            }
        }
        // scratch registers only ever hold spill copies
        for id in f.inst_ids().filter(|&i| alloc.get(i).is_some_and(|r| r < k)) {
            let inst = f.inst(id);
            let copy_in = inst.op == Opcode::HBCSpillMov;
            let copied_out = f.inst_ids().any(|u| {
                f.inst(u).op == Opcode::HBCSpillMov && f.inst(u).operands[0] == Value::Inst(id)
            });
            assert!(copy_in || copied_out, "%{} uses scratch r{:?}", id.0, alloc.get(id));
        }
    }

    #[test]
    fn test_small_frames_are_untouched() {
        let mut module = allocate_source("function f(a) { return a + 1; }");
        let before = module.clone();
        SpillRegisters.run(&mut module, &config()).unwrap();
        assert_eq!(before, module);
    }

    #[test]
    fn test_spilling_twice_changes_nothing() {
        let mut module = allocate_source(WIDE);
        let config = narrow();
        LowerCalls.run(&mut module, &config).unwrap();
        SpillRegisters.run(&mut module, &config).unwrap();
        let once = module.clone();
        SpillRegisters.run(&mut module, &config).unwrap();
        assert_eq!(once, module);
    }
}
