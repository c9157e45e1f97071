//! Backends: turn register-allocated IR into output.
//!
//! [`hbc`] packs a bytecode container for the register VM and can print
//! it back as text. [`native`] writes C-like source with one native
//! function per source function. Both read the same allocation.

pub mod hbc;
pub mod native;

pub use hbc::{BytecodeFunction, BytecodeModule, ExceptionEntry, OpCode};
pub use native::emit_native;

use crate::error::{Error, Result};
use crate::ir::{Allocation, Function, FunctionId, InstId, Module, Value};

/// Register of an allocated instruction.
pub(crate) fn register(f: &Function, id: InstId) -> Result<u32> {
    allocation(f)?
        .get(id)
        .ok_or_else(|| Error::internal(f.name.clone(), format!("%{} has no register", id.0)))
}

/// Register holding operand `value`, which must be an instruction.
pub(crate) fn operand_register(f: &Function, value: &Value) -> Result<u32> {
    match value.as_inst() {
        Some(id) => register(f, id),
        None => Err(Error::internal(
            f.name.clone(),
            format!("operand {:?} was not materialized into a register", value),
        )),
    }
}

pub(crate) fn allocation(f: &Function) -> Result<&Allocation> {
    f.allocation
        .as_ref()
        .ok_or_else(|| Error::internal(f.name.clone(), "function reached the backend without registers"))
}

/// Dense index of every live function, in creation order.
pub(crate) fn function_indices(module: &Module) -> Vec<Option<u32>> {
    let mut out = vec![None; module.functions.len()];
    for (i, id) in module.function_ids().into_iter().enumerate() {
        out[id.index()] = Some(i as u32);
    }
    out
}

pub(crate) fn function_index(indices: &[Option<u32>], f: &Function, target: FunctionId) -> Result<u32> {
    indices
        .get(target.index())
        .copied()
        .flatten()
        .ok_or_else(|| Error::internal(f.name.clone(), format!("reference to erased function #{}", target.0)))
}
