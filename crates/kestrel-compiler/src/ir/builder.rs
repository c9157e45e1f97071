//! Cursor-style instruction builder.

use super::function::{Function, InsertPoint};
use super::instr::{BlockId, InstId, Literal, Opcode, Value};
use super::types::Type;

/// Inserts instructions at a moving position in one function.
///
/// Consecutive inserts keep their program order: after inserting at
/// `After(x)` the cursor advances past the new instruction.
pub struct Builder<'f> {
    func: &'f mut Function,
    point: InsertPoint,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut Function, point: InsertPoint) -> Self {
        Self { func, point }
    }

    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        Self::new(func, InsertPoint::End(block))
    }

    pub fn set_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    pub fn function(&mut self) -> &mut Function {
        self.func
    }

    /// Creates an instruction typed from its operands.
    pub fn create(&mut self, op: Opcode, operands: Vec<Value>) -> InstId {
        let id = self.func.insert(self.point, op, operands);
        self.advance(id);
        id
    }

    /// Creates an instruction with an explicit type.
    pub fn create_typed(&mut self, op: Opcode, operands: Vec<Value>, ty: Type) -> InstId {
        let id = self.func.insert_typed(self.point, op, operands, ty);
        self.advance(id);
        id
    }

    fn advance(&mut self, id: InstId) {
        if let InsertPoint::After(_) = self.point {
            self.point = InsertPoint::After(id);
        }
    }

    pub fn branch(&mut self, target: BlockId) -> InstId {
        self.create(Opcode::Branch, vec![Value::Block(target)])
    }

    pub fn cond_branch(&mut self, cond: Value, on_true: BlockId, on_false: BlockId) -> InstId {
        self.create(
            Opcode::CondBranch,
            vec![cond, Value::Block(on_true), Value::Block(on_false)],
        )
    }

    pub fn ret(&mut self, value: Value) -> InstId {
        self.create(Opcode::Return, vec![value])
    }

    pub fn mov(&mut self, value: Value) -> InstId {
        self.create(Opcode::Mov, vec![value])
    }

    pub fn load_const(&mut self, lit: Literal) -> InstId {
        let ty = lit.ty();
        self.create_typed(Opcode::HBCLoadConst, vec![Value::Literal(lit)], ty)
    }

    /// Creates a phi from `(value, predecessor)` pairs, typed as the union
    /// of the incoming values.
    pub fn phi(&mut self, entries: Vec<(Value, BlockId)>) -> InstId {
        let ty = entries
            .iter()
            .fold(Type::none(), |acc, (v, _)| acc.union(self.func.value_type(v)));
        let operands = entries
            .into_iter()
            .flat_map(|(v, b)| [v, Value::Block(b)])
            .collect();
        self.create_typed(Opcode::Phi, operands, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, FunctionKind};

    #[test]
    fn test_after_keeps_order() {
        let mut f = Function::new(FunctionId(0), "f", vec![], None, FunctionKind::Normal, true);
        let first = f.insert(InsertPoint::End(BlockId(0)), Opcode::CreateScope, vec![]);
        let mut b = Builder::new(&mut f, InsertPoint::After(first));
        let x = b.load_const(Literal::Number(1.0));
        let y = b.load_const(Literal::Null);
        assert_eq!(f.block(BlockId(0)).insts, vec![first, x, y]);
        assert_eq!(f.inst(y).ty, Type::null());
    }

    #[test]
    fn test_phi_type_is_union() {
        let mut f = Function::new(FunctionId(0), "f", vec![], None, FunctionKind::Normal, true);
        let other = f.add_block();
        let mut b = Builder::at_end(&mut f, other);
        let phi = b.phi(vec![
            (Value::number(1.0), BlockId(0)),
            (Value::undefined(), BlockId(0)),
        ]);
        assert_eq!(f.inst(phi).ty, Type::undefined().union(Type::number()));
    }
}
