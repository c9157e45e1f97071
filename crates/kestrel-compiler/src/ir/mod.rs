//! Control-flow-graph intermediate representation.
//!
//! A [`Module`] owns functions and frame variables. Each [`Function`] owns
//! arenas of blocks and instructions addressed by [`BlockId`] and
//! [`InstId`]. Instructions are SSA values; merges use `Phi` instructions
//! whose operands are `(value, predecessor)` pairs kept in step with the
//! CFG by the editing helpers on [`Function`].

pub mod analysis;
pub mod builder;
pub mod dump;
mod function;
mod instr;
pub mod types;
pub mod verify;

pub use builder::Builder;
pub use dump::{dump_function, dump_module};
pub use function::{Allocation, BasicBlock, Function, FunctionKind, InsertPoint, Module, Variable};
pub use instr::{
    BlockId, Effect, FunctionId, InstId, Instruction, Literal, Opcode, Value, VarId, is_negative_zero,
    string_to_number,
};
pub use types::Type;
pub use verify::{verify_function, verify_module};
