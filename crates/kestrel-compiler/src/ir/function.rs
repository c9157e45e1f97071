//! Arena storage for modules, functions, blocks and instructions.
//!
//! Instructions and blocks live in per-function vectors and are referred
//! to by index. Removing something only sets its `erased` flag so that
//! ids stay stable while a pass rewrites the function. Predecessor lists
//! are always derived from terminators, never cached.

use super::instr::{BlockId, Effect, FunctionId, InstId, Instruction, Literal, Opcode, Value, VarId};
use super::types::Type;

/// Syntactic flavour of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// The implicit top-level function.
    Global,
    Normal,
    /// Arrows see the `this` and `arguments` of their enclosing function.
    Arrow,
}

/// A variable stored in a function's environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Function whose environment holds the slot.
    pub owner: FunctionId,
    /// Union of the types stored into the variable.
    pub ty: Type,
    pub erased: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub insts: Vec<InstId>,
    pub erased: bool,
}

/// Register assignment produced by the allocator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    /// Register per instruction, indexed by [`InstId`].
    pub registers: Vec<Option<u32>>,
    /// Number of registers the frame needs.
    pub frame_size: u32,
    /// Set once outgoing call arguments have been moved into place.
    pub calls_lowered: bool,
    /// Low registers reserved for spill copies; zero until spilling ran.
    pub scratch_registers: u32,
}

impl Allocation {
    pub fn get(&self, inst: InstId) -> Option<u32> {
        self.registers.get(inst.index()).copied().flatten()
    }

    pub fn set(&mut self, inst: InstId, reg: u32) {
        if self.registers.len() <= inst.index() {
            self.registers.resize(inst.index() + 1, None);
        }
        self.registers[inst.index()] = Some(reg);
        self.frame_size = self.frame_size.max(reg + 1);
    }
}

/// Where [`Function::insert`] places a new instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// After the last instruction of the block.
    End(BlockId),
    /// Before the block's terminator, or at the end when it has none.
    BeforeTerminator(BlockId),
    /// After the leading phis and catch of the block.
    Start(BlockId),
    Before(InstId),
    After(InstId),
}

/// One function of the module.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    /// Formal parameter names. `Param(0)` is `this`, `Param(i)` is
    /// `params[i - 1]`.
    pub params: Vec<String>,
    /// Lexically enclosing function.
    pub parent: Option<FunctionId>,
    pub kind: FunctionKind,
    pub strict: bool,
    pub return_type: Type,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Instruction>,
    pub allocation: Option<Allocation>,
    /// Every use of every closure for this function is a direct call.
    pub all_callsites_known: bool,
    pub erased: bool,
}

impl Function {
    /// Creates a function with an empty entry block.
    pub fn new(
        id: FunctionId,
        name: impl Into<String>,
        params: Vec<String>,
        parent: Option<FunctionId>,
        kind: FunctionKind,
        strict: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            params,
            parent,
            kind,
            strict,
            return_type: Type::any(),
            blocks: vec![BasicBlock::default()],
            insts: Vec::new(),
            allocation: None,
            all_callsites_known: false,
            erased: false,
        }
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        BlockId(self.blocks.len() as u32 - 1)
    }

    /// Live blocks in layout order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.erased)
            .map(|(i, _)| BlockId(i as u32))
    }

    pub fn block(&self, b: BlockId) -> &BasicBlock {
        &self.blocks[b.index()]
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    /// Live instructions in layout order.
    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> + '_ {
        self.block_ids()
            .flat_map(move |b| self.blocks[b.index()].insts.iter().copied())
    }

    pub fn instruction_count(&self) -> usize {
        self.block_ids().map(|b| self.block(b).insts.len()).sum()
    }

    /// Static type of an operand.
    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Inst(id) => self.inst(*id).ty,
            Value::Literal(lit) => lit.ty(),
            Value::Function(_) => Type::closure(),
            Value::Global => Type::object(),
            Value::Param(_) | Value::Var(_) => Type::any(),
            Value::Block(_) | Value::Label(_) => Type::none(),
        }
    }

    /// Appends a new instruction whose type is derived from its operands.
    pub fn insert(&mut self, at: InsertPoint, op: Opcode, operands: Vec<Value>) -> InstId {
        let tys: Vec<Type> = operands.iter().map(|v| self.value_type(v)).collect();
        let ty = op.result_type(&tys);
        self.insert_typed(at, op, operands, ty)
    }

    /// Adds an instruction with an explicit result type.
    pub fn insert_typed(&mut self, at: InsertPoint, op: Opcode, operands: Vec<Value>, ty: Type) -> InstId {
        let id = InstId(self.insts.len() as u32);
        let (block, pos) = self.position_of(at);
        self.insts.push(Instruction {
            op,
            operands,
            ty: if op.has_value() { ty } else { Type::none() },
            block,
            erased: false,
        });
        self.blocks[block.index()].insts.insert(pos, id);
        id
    }

    fn position_of(&self, at: InsertPoint) -> (BlockId, usize) {
        match at {
            InsertPoint::End(b) => (b, self.block(b).insts.len()),
            InsertPoint::BeforeTerminator(b) => {
                let len = self.block(b).insts.len();
                match self.terminator(b) {
                    Some(_) => (b, len - 1),
                    None => (b, len),
                }
            }
            InsertPoint::Start(b) => (b, self.first_insertion_index(b)),
            InsertPoint::Before(anchor) => {
                let b = self.inst(anchor).block;
                (b, self.index_in_block(anchor))
            }
            InsertPoint::After(anchor) => {
                let b = self.inst(anchor).block;
                (b, self.index_in_block(anchor) + 1)
            }
        }
    }

    /// Position of an instruction inside its block.
    pub fn index_in_block(&self, id: InstId) -> usize {
        let b = self.inst(id).block;
        self.block(b)
            .insts
            .iter()
            .position(|&i| i == id)
            .unwrap_or(self.block(b).insts.len())
    }

    /// Index of the first instruction that is neither a phi nor a catch.
    pub fn first_insertion_index(&self, b: BlockId) -> usize {
        self.block(b)
            .insts
            .iter()
            .take_while(|&&i| matches!(self.inst(i).op, Opcode::Phi | Opcode::Catch))
            .count()
    }

    /// Removes an instruction from its block.
    pub fn erase_inst(&mut self, id: InstId) {
        let b = self.inst(id).block;
        self.blocks[b.index()].insts.retain(|&i| i != id);
        self.insts[id.index()].erased = true;
    }

    /// Moves an existing instruction to a new position.
    pub fn move_inst(&mut self, id: InstId, at: InsertPoint) {
        let b = self.inst(id).block;
        self.blocks[b.index()].insts.retain(|&i| i != id);
        let (block, pos) = self.position_of(at);
        self.blocks[block.index()].insts.insert(pos, id);
        self.insts[id.index()].block = block;
    }

    /// Erases a block and everything in it. Phis of its successors still
    /// name it; callers fix them with [`Function::remove_phi_entries`].
    pub fn erase_block(&mut self, b: BlockId) {
        let insts = std::mem::take(&mut self.blocks[b.index()].insts);
        for id in insts {
            self.insts[id.index()].erased = true;
        }
        self.blocks[b.index()].erased = true;
    }

    pub fn terminator(&self, b: BlockId) -> Option<InstId> {
        self.block(b)
            .insts
            .last()
            .copied()
            .filter(|&i| self.inst(i).op.is_terminator())
    }

    pub fn successors(&self, b: BlockId) -> Vec<BlockId> {
        self.terminator(b)
            .map(|t| self.inst(t).successors())
            .unwrap_or_default()
    }

    /// Predecessors of every block, indexed by block, each list sorted and
    /// free of duplicates.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for b in self.block_ids() {
            for s in self.successors(b) {
                let list: &mut Vec<BlockId> = &mut preds[s.index()];
                if !list.contains(&b) {
                    list.push(b);
                }
            }
        }
        for list in &mut preds {
            list.sort();
        }
        preds
    }

    /// Users of every instruction, indexed by instruction, in layout order.
    pub fn users(&self) -> Vec<Vec<InstId>> {
        let mut users = vec![Vec::new(); self.insts.len()];
        for id in self.inst_ids() {
            for op in &self.inst(id).operands {
                if let Value::Inst(def) = op {
                    let list: &mut Vec<InstId> = &mut users[def.index()];
                    if list.last() != Some(&id) {
                        list.push(id);
                    }
                }
            }
        }
        users
    }

    /// Rewrites every operand equal to `old`. Returns the number of
    /// rewritten operands.
    pub fn replace_all_uses(&mut self, old: &Value, new: &Value) -> usize {
        let mut count = 0;
        let ids: Vec<InstId> = self.inst_ids().collect();
        for id in ids {
            for op in &mut self.insts[id.index()].operands {
                if op == old {
                    *op = new.clone();
                    count += 1;
                }
            }
        }
        count
    }

    /// Leading phi instructions of a block.
    pub fn phis(&self, b: BlockId) -> Vec<InstId> {
        self.block(b)
            .insts
            .iter()
            .copied()
            .take_while(|&i| self.inst(i).op == Opcode::Phi)
            .collect()
    }

    /// Drops the entries for `pred` from every phi in `b`.
    pub fn remove_phi_entries(&mut self, b: BlockId, pred: BlockId) {
        for phi in self.phis(b) {
            let ops = &mut self.insts[phi.index()].operands;
            let kept: Vec<Value> = ops
                .chunks(2)
                .filter(|pair| pair.get(1) != Some(&Value::Block(pred)))
                .flatten()
                .cloned()
                .collect();
            *ops = kept;
        }
    }

    /// Renames the predecessor `old` to `new` in every phi of `b`.
    pub fn rename_phi_pred(&mut self, b: BlockId, old: BlockId, new: BlockId) {
        for phi in self.phis(b) {
            for op in self.insts[phi.index()].operands.iter_mut().skip(1).step_by(2) {
                if *op == Value::Block(old) {
                    *op = Value::Block(new);
                }
            }
        }
    }

    /// Sets the incoming value for `pred` in a phi.
    pub fn set_phi_entry(&mut self, phi: InstId, pred: BlockId, value: Value) {
        let ops = &mut self.insts[phi.index()].operands;
        let mut i = 0;
        while i + 1 < ops.len() {
            if ops[i + 1] == Value::Block(pred) {
                ops[i] = value;
                return;
            }
            i += 2;
        }
        ops.push(value);
        ops.push(Value::Block(pred));
    }

    /// The incoming value for `pred` in a phi.
    pub fn phi_entry(&self, phi: InstId, pred: BlockId) -> Option<&Value> {
        self.inst(phi)
            .phi_entries()
            .find(|(_, b)| *b == pred)
            .map(|(v, _)| v)
    }

    /// Points the edge `from -> old` at `new` by rewriting the terminator.
    pub fn redirect_edge(&mut self, from: BlockId, old: BlockId, new: BlockId) {
        if let Some(t) = self.terminator(from) {
            let op = self.inst(t).op;
            for &i in op.successor_operands() {
                if self.insts[t.index()].operands[i] == Value::Block(old) {
                    self.insts[t.index()].operands[i] = Value::Block(new);
                }
            }
        }
    }

    /// Moves `at` and everything after it into a fresh block. The old
    /// block is left without a terminator; phis of the moved terminator's
    /// successors are renamed to the new block.
    pub fn split_block(&mut self, at: InstId) -> BlockId {
        let old = self.inst(at).block;
        let pos = self.index_in_block(at);
        let new = self.add_block();
        let moved: Vec<InstId> = self.blocks[old.index()].insts.split_off(pos);
        for &id in &moved {
            self.insts[id.index()].block = new;
        }
        self.blocks[new.index()].insts = moved;
        for s in self.successors(new) {
            self.rename_phi_pred(s, old, new);
        }
        new
    }

    /// Inserts a block on the edge `from -> to` and returns it. The new
    /// block ends in a branch to `to`, and phis of `to` are updated.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> BlockId {
        let mid = self.add_block();
        self.insert(InsertPoint::End(mid), Opcode::Branch, vec![Value::Block(to)]);
        self.redirect_edge(from, to, mid);
        self.rename_phi_pred(to, from, mid);
        mid
    }

    /// True when the instruction cannot be removed even if unused.
    pub fn has_side_effects(&self, id: InstId) -> bool {
        let inst = self.inst(id);
        match inst.op.effect() {
            Effect::Pure | Effect::ReadOnly => false,
            Effect::Unknown => true,
            Effect::Coercing => !self.operands_are_plain_primitives(id),
        }
    }

    /// True when the result depends only on the operands, so two copies
    /// with equal operands compute the same value.
    pub fn is_pure(&self, id: InstId) -> bool {
        let inst = self.inst(id);
        match inst.op.effect() {
            Effect::Pure => !matches!(
                inst.op,
                Opcode::AllocStack
                    | Opcode::AllocObject
                    | Opcode::AllocArray
                    | Opcode::CreateFunction
                    | Opcode::CreateScope
                    | Opcode::CreateArgumentsLoose
                    | Opcode::CreateArgumentsStrict
                    | Opcode::Phi
            ),
            Effect::Coercing => self.operands_are_plain_primitives(id),
            Effect::ReadOnly | Effect::Unknown => false,
        }
    }

    fn operands_are_plain_primitives(&self, id: InstId) -> bool {
        self.inst(id).operands.iter().all(|v| {
            let ty = self.value_type(v);
            ty.is_primitive() && !ty.can_be_bigint()
        })
    }

    /// Literal operand at `i`, if any.
    pub fn literal_operand(&self, id: InstId, i: usize) -> Option<&Literal> {
        self.inst(id).operands.get(i).and_then(Value::as_literal)
    }
}

/// A compilation unit: every function of one source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub functions: Vec<Function>,
    pub variables: Vec<Variable>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// The implicit top-level function, always the first one created.
    pub fn top_level(&self) -> FunctionId {
        FunctionId(0)
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<String>,
        parent: Option<FunctionId>,
        kind: FunctionKind,
        strict: bool,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions
            .push(Function::new(id, name, params, parent, kind, strict));
        id
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    /// Live functions in creation order.
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.functions
            .iter()
            .filter(|f| !f.erased)
            .map(|f| f.id)
            .collect()
    }

    pub fn add_variable(&mut self, owner: FunctionId, name: impl Into<String>) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            owner,
            ty: Type::none(),
            erased: false,
        });
        VarId(self.variables.len() as u32 - 1)
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    /// Live frame variables of a function in declaration order.
    pub fn frame_vars(&self, owner: FunctionId) -> Vec<VarId> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.owner == owner && !v.erased)
            .map(|(i, _)| VarId(i as u32))
            .collect()
    }

    /// Slot of a variable inside its owner's environment.
    pub fn frame_slot(&self, id: VarId) -> u32 {
        let owner = self.variable(id).owner;
        self.variables[..id.index()]
            .iter()
            .filter(|v| v.owner == owner && !v.erased)
            .count() as u32
    }

    /// Number of `parent` links from `from` up to `target`, or `None`
    /// when `target` does not enclose `from`.
    pub fn scope_distance(&self, from: FunctionId, target: FunctionId) -> Option<u32> {
        let mut cur = Some(from);
        let mut depth = 0;
        while let Some(f) = cur {
            if f == target {
                return Some(depth);
            }
            cur = self.function(f).parent;
            depth += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Function {
        let mut f = Function::new(FunctionId(0), "f", vec![], None, FunctionKind::Normal, false);
        let (a, b, c) = (f.add_block(), f.add_block(), f.add_block());
        let cond = f.insert(InsertPoint::End(f.entry()), Opcode::LoadParam, vec![Value::Param(1)]);
        f.insert(
            InsertPoint::End(BlockId(0)),
            Opcode::CondBranch,
            vec![Value::Inst(cond), Value::Block(a), Value::Block(b)],
        );
        f.insert(InsertPoint::End(a), Opcode::Branch, vec![Value::Block(c)]);
        f.insert(InsertPoint::End(b), Opcode::Branch, vec![Value::Block(c)]);
        let phi = f.insert(
            InsertPoint::End(c),
            Opcode::Phi,
            vec![Value::number(1.0), Value::Block(a), Value::number(2.0), Value::Block(b)],
        );
        f.insert(InsertPoint::End(c), Opcode::Return, vec![Value::Inst(phi)]);
        f
    }

    #[test]
    fn test_predecessors_and_users() {
        let f = diamond();
        let preds = f.predecessors();
        assert_eq!(preds[3], vec![BlockId(1), BlockId(2)]);
        assert!(preds[0].is_empty());
        let users = f.users();
        assert_eq!(users[0], vec![InstId(1)]);
    }

    #[test]
    fn test_split_edge_updates_phi() {
        let mut f = diamond();
        let mid = f.split_edge(BlockId(1), BlockId(3));
        let phi = f.phis(BlockId(3))[0];
        assert_eq!(f.phi_entry(phi, mid), Some(&Value::number(1.0)));
        assert_eq!(f.phi_entry(phi, BlockId(1)), None);
        assert_eq!(f.predecessors()[3], vec![BlockId(2), mid]);
    }

    #[test]
    fn test_insert_points() {
        let mut f = diamond();
        let ret = f.terminator(BlockId(3)).unwrap_or(InstId(0));
        let mov = f.insert(InsertPoint::Before(ret), Opcode::Mov, vec![Value::number(3.0)]);
        assert_eq!(f.index_in_block(mov), 1);
        assert_eq!(f.inst(mov).ty, Type::number());
        let start = f.insert(InsertPoint::Start(BlockId(3)), Opcode::Mov, vec![Value::number(4.0)]);
        assert_eq!(f.index_in_block(start), 1);
        f.erase_inst(mov);
        assert!(f.inst(mov).erased);
        assert_eq!(f.block(BlockId(3)).insts.len(), 3);
    }

    #[test]
    fn test_split_block() {
        let mut f = diamond();
        let ret = f.terminator(BlockId(3)).unwrap_or(InstId(0));
        let tail = f.split_block(ret);
        assert_eq!(f.inst(ret).block, tail);
        assert_eq!(f.terminator(BlockId(3)), None);
    }

    #[test]
    fn test_frame_slots() {
        let mut m = Module::new();
        let g = m.add_function("global", vec![], None, FunctionKind::Global, false);
        let f = m.add_function("f", vec![], Some(g), FunctionKind::Normal, false);
        let a = m.add_variable(g, "a");
        let b = m.add_variable(f, "b");
        let c = m.add_variable(g, "c");
        assert_eq!(m.frame_slot(a), 0);
        assert_eq!(m.frame_slot(b), 0);
        assert_eq!(m.frame_slot(c), 1);
        assert_eq!(m.scope_distance(f, g), Some(1));
        assert_eq!(m.scope_distance(g, f), None);
    }
}
