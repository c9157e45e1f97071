//! Expression lowering.

use super::scope::refers_to;
use super::{Binding, FunctionBody, IrGen, Resolved, literal_value};
use crate::ast::*;
use crate::error::Result;
use crate::ir::{BlockId, FunctionKind, Literal, Opcode, Value};

/// Left-hand side of an assignment or update.
enum Target<'a> {
    Name(&'a str),
    Property { object: Value, key: Value },
}

fn binary_opcode(op: BinaryOperator) -> Option<Opcode> {
    Some(match op {
        BinaryOperator::Add => Opcode::Add,
        BinaryOperator::Subtract => Opcode::Subtract,
        BinaryOperator::Multiply => Opcode::Multiply,
        BinaryOperator::Divide => Opcode::Divide,
        BinaryOperator::Modulo => Opcode::Modulo,
        BinaryOperator::Exponent => Opcode::Exponent,
        BinaryOperator::Equal => Opcode::Equal,
        BinaryOperator::NotEqual => Opcode::NotEqual,
        BinaryOperator::StrictEqual => Opcode::StrictlyEqual,
        BinaryOperator::StrictNotEqual => Opcode::StrictlyNotEqual,
        BinaryOperator::LessThan => Opcode::LessThan,
        BinaryOperator::LessThanEqual => Opcode::LessThanOrEqual,
        BinaryOperator::GreaterThan => Opcode::GreaterThan,
        BinaryOperator::GreaterThanEqual => Opcode::GreaterThanOrEqual,
        BinaryOperator::BitwiseAnd => Opcode::BitAnd,
        BinaryOperator::BitwiseOr => Opcode::BitOr,
        BinaryOperator::BitwiseXor => Opcode::BitXor,
        BinaryOperator::LeftShift => Opcode::LeftShift,
        BinaryOperator::RightShift => Opcode::RightShift,
        BinaryOperator::UnsignedRightShift => Opcode::UnsignedRightShift,
        BinaryOperator::In => Opcode::In,
        BinaryOperator::InstanceOf => Opcode::InstanceOf,
        BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr | BinaryOperator::NullishCoalescing => {
            return None;
        }
    })
}

/// Property name of a non-computed object literal key.
fn key_name(key: &crate::ast::Literal) -> String {
    literal_value(key).to_js_string()
}

impl<'a> IrGen<'a> {
    /// Lowers an expression that initializes `name`, so that an anonymous
    /// function gets that name.
    pub(super) fn expression_named(&mut self, expr: &'a Expression, name: &str) -> Result<Value> {
        match expr {
            Expression::Function(_) | Expression::Arrow(_) => {
                self.name_hint = Some(name.to_string());
                let result = self.expression(expr);
                self.name_hint = None;
                result
            }
            _ => self.expression(expr),
        }
    }

    pub(super) fn expression(&mut self, expr: &'a Expression) -> Result<Value> {
        match expr {
            Expression::Literal(lit) => Ok(Value::Literal(literal_value(lit))),
            Expression::Identifier(id) => self.load_name(&id.name),
            Expression::This => self.load_name("this"),
            Expression::Array(a) => self.array_literal(a),
            Expression::Object(o) => self.object_literal(o),
            Expression::Binary(b) => self.binary_chain(b),
            Expression::Unary(u) => self.unary(u),
            Expression::Assignment(a) => self.assignment(a),
            Expression::Call(c) => {
                let (callee, this) = match &*c.callee {
                    Expression::Member(m) => {
                        let object = self.expression(&m.object)?;
                        let key = self.property_key(&m.property)?;
                        let callee = self.emit_value(Opcode::LoadProperty, vec![object.clone(), key]);
                        (callee, object)
                    }
                    other => (self.expression(other)?, Value::undefined()),
                };
                let mut operands = vec![callee, this];
                for arg in &c.arguments {
                    operands.push(self.expression(arg)?);
                }
                Ok(self.emit_value(Opcode::Call, operands))
            }
            Expression::New(n) => {
                let mut operands = vec![self.expression(&n.callee)?, Value::undefined()];
                for arg in &n.arguments {
                    operands.push(self.expression(arg)?);
                }
                Ok(self.emit_value(Opcode::Construct, operands))
            }
            Expression::Member(m) => {
                let object = self.expression(&m.object)?;
                let key = self.property_key(&m.property)?;
                Ok(self.emit_value(Opcode::LoadProperty, vec![object, key]))
            }
            Expression::Conditional(c) => {
                let test = self.expression(&c.test)?;
                let then_block = self.new_block();
                let else_block = self.new_block();
                let exit = self.new_block();
                self.cond_branch(test, then_block, else_block);

                let mut entries = Vec::new();
                for (block, arm) in [(then_block, &c.consequent), (else_block, &c.alternate)] {
                    self.set_block(block);
                    let value = self.expression(arm)?;
                    self.join_to(exit, value, &mut entries);
                }
                self.set_block(exit);
                Ok(self.merge(entries))
            }
            Expression::Function(f) => self.function_expression(f),
            Expression::Arrow(a) => {
                let name = self.name_hint.take().unwrap_or_default();
                let body = match &a.body {
                    ArrowBody::Block(statements) => FunctionBody::Statements(statements),
                    ArrowBody::Expression(e) => FunctionBody::Expression(e),
                };
                self.function_closure(name, FunctionKind::Arrow, &a.params, body, false)
            }
            Expression::Update(u) => {
                let target = self.target(&u.argument)?;
                let old = self.load_target(&target)?;
                let number = self.emit_value(Opcode::AsNumber, vec![old]);
                let op = match u.operator {
                    UpdateOperator::Increment => Opcode::UnaryInc,
                    UpdateOperator::Decrement => Opcode::UnaryDec,
                };
                let updated = self.emit_value(op, vec![number.clone()]);
                self.store_target(target, updated.clone())?;
                Ok(if u.prefix { updated } else { number })
            }
            Expression::Sequence(s) => {
                let mut last = Value::undefined();
                for e in &s.expressions {
                    last = self.expression(e)?;
                }
                Ok(last)
            }
            Expression::TsAs(t) => self.expression(&t.expression),
        }
    }

    /// Records `value` as flowing from the current block into `exit`.
    /// Nothing flows when the block already ended, e.g. in a throw.
    fn join_to(&mut self, exit: BlockId, value: Value, entries: &mut Vec<(Value, BlockId)>) {
        if !self.is_terminated() {
            entries.push((value, self.current_block()));
            self.branch_to(exit);
        }
    }

    fn merge(&mut self, entries: Vec<(Value, BlockId)>) -> Value {
        if entries.is_empty() {
            return Value::undefined();
        }
        self.emit_phi(entries)
    }

    fn property_key(&mut self, property: &'a MemberProperty) -> Result<Value> {
        match property {
            MemberProperty::Identifier(id) => Ok(Value::string(id.name.clone())),
            MemberProperty::Expression(e) => self.expression(e),
        }
    }

    fn array_literal(&mut self, a: &'a ArrayExpression) -> Result<Value> {
        let mut operands = vec![Value::number(a.elements.len() as f64)];
        let mut pending = Vec::new();
        for (i, element) in a.elements.iter().enumerate() {
            match element {
                Some(Expression::Literal(lit)) => operands.push(Value::Literal(literal_value(lit))),
                Some(e) => {
                    operands.push(Value::Literal(Literal::Empty));
                    pending.push((i, e));
                }
                None => operands.push(Value::Literal(Literal::Empty)),
            }
        }
        let array = self.emit_value(Opcode::AllocArray, operands);
        for (i, e) in pending {
            let value = self.expression(e)?;
            self.emit(
                Opcode::StoreProperty,
                vec![value, array.clone(), Value::number(i as f64)],
            );
        }
        Ok(array)
    }

    fn object_literal(&mut self, o: &'a ObjectExpression) -> Result<Value> {
        let object = self.emit_value(Opcode::AllocObject, vec![]);
        for property in &o.properties {
            if property.kind != PropertyKind::Init {
                return Err(self.unsupported("accessor property"));
            }
            let (key, hint) = match &property.key {
                PropertyKey::Identifier(id) => (Value::string(id.name.clone()), Some(id.name.clone())),
                PropertyKey::Literal(lit) => {
                    let name = key_name(lit);
                    (Value::string(name.clone()), Some(name))
                }
                PropertyKey::Computed(e) => (self.expression(e)?, None),
            };
            let value = match &hint {
                Some(name) => self.expression_named(&property.value, name)?,
                None => self.expression(&property.value)?,
            };
            self.emit(Opcode::StoreProperty, vec![value, object.clone(), key]);
        }
        Ok(object)
    }

    /// Lowers a left-nested operator chain such as `a + b + c` along its
    /// left spine with a loop, so long chains do not deepen the call stack.
    fn binary_chain(&mut self, b: &'a BinaryExpression) -> Result<Value> {
        let mut spine = vec![b];
        let mut leftmost = &*b.left;
        while let Expression::Binary(inner) = leftmost {
            spine.push(inner);
            leftmost = &*inner.left;
        }

        let mut left = self.expression(leftmost)?;
        for node in spine.into_iter().rev() {
            left = match binary_opcode(node.operator) {
                Some(op) => {
                    let right = self.expression(&node.right)?;
                    self.emit_value(op, vec![left, right])
                }
                None => self.short_circuit(node.operator, left, &node.right)?,
            };
        }
        Ok(left)
    }

    /// `&&`, `||` and `??` select between the left value and the right one
    /// through a phi.
    fn short_circuit(&mut self, op: BinaryOperator, left: Value, right: &'a Expression) -> Result<Value> {
        let rhs = self.new_block();
        let exit = self.new_block();
        self.branch_on_short_circuit(op, left.clone(), rhs, exit);
        let mut entries = vec![(left, self.current_block())];

        self.set_block(rhs);
        let right = self.expression(right)?;
        self.join_to(exit, right, &mut entries);
        self.set_block(exit);
        Ok(self.merge(entries))
    }

    /// Branches to `evaluate` when the right operand of `op` must run and
    /// to `skip` otherwise.
    fn branch_on_short_circuit(&mut self, op: BinaryOperator, left: Value, evaluate: BlockId, skip: BlockId) {
        match op {
            BinaryOperator::LogicalAnd => self.cond_branch(left, evaluate, skip),
            BinaryOperator::LogicalOr => self.cond_branch(left, skip, evaluate),
            _ => {
                let nullish = self.emit_value(Opcode::Equal, vec![left, Value::Literal(Literal::Null)]);
                self.cond_branch(nullish, evaluate, skip);
            }
        }
    }

    fn unary(&mut self, u: &'a UnaryExpression) -> Result<Value> {
        match u.operator {
            UnaryOperator::Typeof => {
                if let Expression::Identifier(id) = &*u.argument {
                    if let Resolved::Global { declared: false } = self.resolve(&id.name)? {
                        if id.name != "undefined" {
                            // typeof of a missing global is "undefined", not an error
                            let value = self.emit_value(
                                Opcode::LoadProperty,
                                vec![Value::Global, Value::string(id.name.clone())],
                            );
                            return Ok(self.emit_value(Opcode::UnaryTypeof, vec![value]));
                        }
                    }
                }
                let value = self.expression(&u.argument)?;
                Ok(self.emit_value(Opcode::UnaryTypeof, vec![value]))
            }
            UnaryOperator::Delete => match &*u.argument {
                Expression::Member(m) => {
                    let object = self.expression(&m.object)?;
                    let key = self.property_key(&m.property)?;
                    Ok(self.emit_value(Opcode::DeleteProperty, vec![object, key]))
                }
                Expression::Identifier(id) => match self.resolve(&id.name)? {
                    Resolved::Global { declared: false } => Ok(self.emit_value(
                        Opcode::DeleteProperty,
                        vec![Value::Global, Value::string(id.name.clone())],
                    )),
                    _ => Ok(Value::Literal(Literal::Bool(false))),
                },
                other => {
                    self.expression(other)?;
                    Ok(Value::Literal(Literal::Bool(true)))
                }
            },
            UnaryOperator::Void => {
                self.expression(&u.argument)?;
                Ok(Value::undefined())
            }
            op => {
                let value = self.expression(&u.argument)?;
                let opcode = match op {
                    UnaryOperator::Minus => Opcode::UnaryMinus,
                    UnaryOperator::Plus => Opcode::AsNumber,
                    UnaryOperator::LogicalNot => Opcode::UnaryNot,
                    _ => Opcode::UnaryTilde,
                };
                Ok(self.emit_value(opcode, vec![value]))
            }
        }
    }

    fn target(&mut self, expr: &'a Expression) -> Result<Target<'a>> {
        match expr {
            Expression::Identifier(id) => Ok(Target::Name(&id.name)),
            Expression::Member(m) => {
                let object = self.expression(&m.object)?;
                let key = self.property_key(&m.property)?;
                Ok(Target::Property { object, key })
            }
            Expression::TsAs(t) => self.target(&t.expression),
            _ => Err(self.error("invalid assignment target")),
        }
    }

    fn load_target(&mut self, target: &Target<'a>) -> Result<Value> {
        match target {
            Target::Name(name) => self.load_name(name),
            Target::Property { object, key } => {
                Ok(self.emit_value(Opcode::LoadProperty, vec![object.clone(), key.clone()]))
            }
        }
    }

    fn store_target(&mut self, target: Target<'a>, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => self.store_name(name, value, false),
            Target::Property { object, key } => {
                self.emit(Opcode::StoreProperty, vec![value, object, key]);
                Ok(())
            }
        }
    }

    fn assignment(&mut self, a: &'a AssignmentExpression) -> Result<Value> {
        let target = self.target(&a.left)?;
        match a.operator.binary_operator() {
            None => {
                let hint = match &target {
                    Target::Name(name) => Some(name.to_string()),
                    Target::Property { key, .. } => key.as_str().map(str::to_string),
                };
                let value = match hint {
                    Some(name) => self.expression_named(&a.right, &name)?,
                    None => self.expression(&a.right)?,
                };
                self.store_target(target, value.clone())?;
                Ok(value)
            }
            Some(op) => match binary_opcode(op) {
                Some(opcode) => {
                    let old = self.load_target(&target)?;
                    let right = self.expression(&a.right)?;
                    let result = self.emit_value(opcode, vec![old, right]);
                    self.store_target(target, result.clone())?;
                    Ok(result)
                }
                None => {
                    let old = self.load_target(&target)?;
                    let assign = self.new_block();
                    let exit = self.new_block();
                    self.branch_on_short_circuit(op, old.clone(), assign, exit);
                    let mut entries = vec![(old, self.current_block())];

                    self.set_block(assign);
                    let value = self.expression(&a.right)?;
                    self.store_target(target, value.clone())?;
                    self.join_to(exit, value, &mut entries);
                    self.set_block(exit);
                    Ok(self.merge(entries))
                }
            },
        }
    }

    fn function_expression(&mut self, f: &'a FunctionExpression) -> Result<Value> {
        let hint = self.name_hint.take();
        let name = match &f.id {
            Some(id) => id.name.clone(),
            None => hint.unwrap_or_default(),
        };
        let body = FunctionBody::Statements(&f.body);
        match &f.id {
            // The name of a function expression is visible inside it only.
            Some(id) if refers_to(&f.params, &f.body, false, &id.name) => {
                let var = self.module.add_variable(self.ctx().id, id.name.clone());
                self.ctx_mut().scope.begin_scope();
                self.ctx_mut()
                    .scope
                    .declare(id.name.clone(), Binding::Frame(var), false);
                let closure = self.function_closure(name, FunctionKind::Normal, &f.params, body, false);
                self.ctx_mut().scope.end_scope();
                let closure = closure?;
                self.store_binding(Binding::Frame(var), closure.clone());
                Ok(closure)
            }
            _ => self.function_closure(name, FunctionKind::Normal, &f.params, body, false),
        }
    }
}
