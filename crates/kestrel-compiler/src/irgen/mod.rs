//! Lowering from the AST to IR.
//!
//! Every syntactic function becomes one IR [`Function`], plus the implicit
//! `global` function for the program body. Locals that a nested closure
//! refers to live in the function's environment (`CreateScope`,
//! `LoadFrame`/`StoreFrame`); all other locals get a stack slot
//! (`AllocStack`) that the optimizer later promotes to SSA values.

mod expressions;
mod scope;

pub use scope::{Binding, Local, Scope};

use rustc_hash::FxHashSet;

use crate::ast::*;
use crate::error::{Error, Result};
use crate::ir::{
    BlockId, FunctionId, FunctionKind, InsertPoint, InstId, Literal, Module, Opcode, Type, Value, VarId,
};
use scope::{captured_names, collect_hoisted, lexical_declarations};

/// Lowers a parsed program. `force_strict` treats every function as
/// strict mode code.
pub fn generate(program: &Program, force_strict: bool) -> Result<Module> {
    let mut irgen = IrGen {
        module: Module::new(),
        force_strict,
        contexts: Vec::new(),
        name_hint: None,
    };
    irgen.function(
        "global".to_string(),
        FunctionKind::Global,
        &[],
        FunctionBody::Statements(&program.body),
    )?;
    Ok(irgen.module)
}

/// Body of a function being lowered.
#[derive(Clone, Copy)]
enum FunctionBody<'a> {
    Statements(&'a [Statement]),
    /// Concise arrow body.
    Expression(&'a Expression),
}

/// An entry of the break/continue/unwind stack.
#[derive(Debug, Clone)]
enum Control<'a> {
    Loop {
        labels: Vec<&'a str>,
        break_to: BlockId,
        continue_to: BlockId,
    },
    /// A `switch` (reachable by unlabeled break) or a labeled statement.
    Breakable {
        labels: Vec<&'a str>,
        break_to: BlockId,
        unlabeled: bool,
    },
    /// A protected region. Jumps out of it leave the region and run the
    /// finalizer inline.
    Try {
        handler: BlockId,
        finalizer: Option<&'a BlockStatement>,
    },
}

/// Per-function lowering state.
struct FunctionContext<'a> {
    id: FunctionId,
    /// Block receiving new instructions
    block: BlockId,
    /// The function's own environment
    scope_inst: InstId,
    /// The environment captured by the closure
    parent_scope: Option<InstId>,
    /// Last instruction of the entry prologue
    prologue: InstId,
    scope: Scope,
    captured: FxHashSet<String>,
    control: Vec<Control<'a>>,
    pending_labels: Vec<&'a str>,
    this_value: Option<InstId>,
    arguments_value: Option<InstId>,
}

/// Result of resolving a name against the scope chain.
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Local(Binding, bool),
    /// Environment slot of an enclosing function.
    Outer {
        owner: FunctionId,
        var: VarId,
        mutable: bool,
    },
    Global {
        declared: bool,
    },
}

pub(crate) struct IrGen<'a> {
    module: Module,
    force_strict: bool,
    contexts: Vec<FunctionContext<'a>>,
    /// Name given to the next anonymous function expression.
    name_hint: Option<String>,
}

impl<'a> IrGen<'a> {
    // ========================================================================
    // Emission helpers
    // ========================================================================

    fn ctx(&self) -> &FunctionContext<'a> {
        // A context is pushed before any statement is lowered.
        &self.contexts[self.contexts.len() - 1]
    }

    fn ctx_mut(&mut self) -> &mut FunctionContext<'a> {
        let last = self.contexts.len() - 1;
        &mut self.contexts[last]
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let name = self
            .contexts
            .last()
            .map(|c| self.module.function(c.id).name.clone())
            .unwrap_or_default();
        Error::internal(name, message)
    }

    fn unsupported(&self, construct: &str) -> Error {
        self.error(format!("unsupported construct: {}", construct))
    }

    fn is_terminated(&self) -> bool {
        let ctx = self.ctx();
        self.module.function(ctx.id).terminator(ctx.block).is_some()
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.ctx().id;
        self.module.function_mut(id).add_block()
    }

    fn set_block(&mut self, block: BlockId) {
        self.ctx_mut().block = block;
    }

    fn current_block(&self) -> BlockId {
        self.ctx().block
    }

    /// Appends to the current block. Code following a terminator lands in
    /// a fresh unreachable block.
    fn emit(&mut self, op: Opcode, operands: Vec<Value>) -> InstId {
        if self.is_terminated() {
            let fresh = self.new_block();
            self.set_block(fresh);
        }
        let (id, block) = (self.ctx().id, self.ctx().block);
        self.module
            .function_mut(id)
            .insert(InsertPoint::End(block), op, operands)
    }

    fn emit_value(&mut self, op: Opcode, operands: Vec<Value>) -> Value {
        Value::Inst(self.emit(op, operands))
    }

    /// Appends to the entry prologue, ahead of the function body.
    fn emit_prologue(&mut self, op: Opcode, operands: Vec<Value>) -> InstId {
        let (id, anchor) = (self.ctx().id, self.ctx().prologue);
        let inst = self
            .module
            .function_mut(id)
            .insert(InsertPoint::After(anchor), op, operands);
        self.ctx_mut().prologue = inst;
        inst
    }

    fn emit_phi(&mut self, entries: Vec<(Value, BlockId)>) -> Value {
        let (id, block) = (self.ctx().id, self.ctx().block);
        let f = self.module.function_mut(id);
        let ty = entries
            .iter()
            .fold(Type::none(), |acc, (v, _)| acc.union(f.value_type(v)));
        let operands = entries
            .into_iter()
            .flat_map(|(v, b)| [v, Value::Block(b)])
            .collect();
        Value::Inst(f.insert_typed(InsertPoint::End(block), Opcode::Phi, operands, ty))
    }

    fn branch_to(&mut self, target: BlockId) {
        if !self.is_terminated() {
            self.emit(Opcode::Branch, vec![Value::Block(target)]);
        }
    }

    fn cond_branch(&mut self, cond: Value, on_true: BlockId, on_false: BlockId) {
        self.emit(
            Opcode::CondBranch,
            vec![cond, Value::Block(on_true), Value::Block(on_false)],
        );
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Lowers one function and returns its id. The caller creates the
    /// closure.
    fn function(
        &mut self,
        name: String,
        kind: FunctionKind,
        params: &'a [Identifier],
        body: FunctionBody<'a>,
    ) -> Result<FunctionId> {
        let parent = self.contexts.last().map(|c| c.id);
        let statements: &[Statement] = match body {
            FunctionBody::Statements(s) => s,
            FunctionBody::Expression(_) => &[],
        };
        let strict = self.force_strict
            || parent.is_some_and(|p| self.module.function(p).strict)
            || has_use_strict(statements);
        let param_names = params.iter().map(|p| p.name.clone()).collect();
        let id = self.module.add_function(name, param_names, parent, kind, strict);

        let captured = match body {
            FunctionBody::Statements(s) => captured_names(params, s, kind == FunctionKind::Arrow),
            FunctionBody::Expression(e) => {
                let wrapped = [Statement::Return(ReturnStatement {
                    argument: Some(e.clone()),
                })];
                captured_names(params, &wrapped, true)
            }
        };

        let f = self.module.function_mut(id);
        let entry = f.entry();
        let scope_inst = f.insert(InsertPoint::End(entry), Opcode::CreateScope, vec![]);
        let parent_scope = parent.map(|_| f.insert(InsertPoint::End(entry), Opcode::GetParentScope, vec![]));

        self.contexts.push(FunctionContext {
            id,
            block: entry,
            scope_inst,
            parent_scope,
            prologue: parent_scope.unwrap_or(scope_inst),
            scope: Scope::new(),
            captured,
            control: Vec::new(),
            pending_labels: Vec::new(),
            this_value: None,
            arguments_value: None,
        });
        tracing::trace!(function = %self.module.function(id).name, "lowering");

        let result = self.function_body(kind, params, body);
        self.contexts.pop();
        result.map(|_| id)
    }

    fn function_body(&mut self, kind: FunctionKind, params: &'a [Identifier], body: FunctionBody<'a>) -> Result<()> {
        let statements: &'a [Statement] = match body {
            FunctionBody::Statements(s) => s,
            FunctionBody::Expression(_) => &[],
        };
        let hoisted = collect_hoisted(statements);
        let global = kind == FunctionKind::Global;

        if kind != FunctionKind::Arrow {
            let binding = if self.ctx().captured.contains("this") {
                let this = self.emit_prologue(Opcode::LoadParam, vec![Value::Param(0)]);
                self.ctx_mut().this_value = Some(this);
                let var = self.module.add_variable(self.ctx().id, "this");
                self.store_at_prologue(Binding::Frame(var), Value::Inst(this));
                Binding::Frame(var)
            } else {
                Binding::This
            };
            self.ctx_mut().scope.declare("this", binding, false);
        }

        if kind == FunctionKind::Normal {
            let shadowed = params.iter().any(|p| p.name == "arguments")
                || hoisted.vars.iter().any(|v| v == "arguments")
                || hoisted.functions.iter().any(|f| f.id.name == "arguments");
            if !shadowed {
                let binding = if self.ctx().captured.contains("arguments") {
                    let args = self.arguments_value();
                    let var = self.module.add_variable(self.ctx().id, "arguments");
                    self.store_at_prologue(Binding::Frame(var), args);
                    Binding::Frame(var)
                } else {
                    Binding::Arguments
                };
                self.ctx_mut().scope.declare("arguments", binding, false);
            }
        }

        for (i, param) in params.iter().enumerate() {
            let binding = self.new_binding(&param.name);
            let value = self.emit_prologue(Opcode::LoadParam, vec![Value::Param(i as u32 + 1)]);
            self.store_at_prologue(binding, Value::Inst(value));
            self.ctx_mut().scope.declare(param.name.clone(), binding, true);
        }

        let mut declared: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        let function_names = hoisted.functions.iter().map(|f| f.id.name.as_str());
        for name in hoisted.vars.iter().map(String::as_str).chain(function_names) {
            if declared.contains(&name) {
                continue;
            }
            declared.push(name);
            if global {
                self.emit_prologue(Opcode::DeclareGlobalVar, vec![Value::string(name)]);
                self.ctx_mut().scope.declare(name, Binding::Global, true);
            } else {
                let binding = self.new_binding(name);
                self.store_at_prologue(binding, Value::undefined());
                self.ctx_mut().scope.declare(name, binding, true);
            }
        }
        if global {
            for (name, mutable) in lexical_declarations(statements) {
                if !declared.contains(&name) {
                    self.emit_prologue(Opcode::DeclareGlobalVar, vec![Value::string(name)]);
                    self.ctx_mut().scope.declare(name, Binding::Global, mutable);
                }
            }
        } else {
            self.declare_lexical(statements)?;
        }

        for func in hoisted.functions {
            let closure = self.function_closure(
                func.id.name.clone(),
                FunctionKind::Normal,
                &func.params,
                FunctionBody::Statements(&func.body),
                true,
            )?;
            self.store_name_at_prologue(&func.id.name, closure)?;
        }

        match body {
            FunctionBody::Statements(s) => self.statements(s)?,
            FunctionBody::Expression(e) => {
                let value = self.expression(e)?;
                self.emit(Opcode::Return, vec![value]);
            }
        }
        if !self.is_terminated() {
            self.emit(Opcode::Return, vec![Value::undefined()]);
        }
        Ok(())
    }

    /// Lowers a nested function and creates its closure, either at the
    /// current position or in the prologue (hoisted declarations).
    fn function_closure(
        &mut self,
        name: String,
        kind: FunctionKind,
        params: &'a [Identifier],
        body: FunctionBody<'a>,
        in_prologue: bool,
    ) -> Result<Value> {
        let id = self.function(name, kind, params, body)?;
        let operands = vec![Value::Function(id), Value::Inst(self.ctx().scope_inst)];
        Ok(Value::Inst(if in_prologue {
            self.emit_prologue(Opcode::CreateFunction, operands)
        } else {
            self.emit(Opcode::CreateFunction, operands)
        }))
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Storage for a new declaration in the current function.
    fn new_binding(&mut self, name: &str) -> Binding {
        if self.ctx().captured.contains(name) {
            Binding::Frame(self.module.add_variable(self.ctx().id, name))
        } else {
            Binding::Stack(self.emit_prologue(Opcode::AllocStack, vec![Value::Label(name.to_string())]))
        }
    }

    /// Declares the `let`/`const` names of a statement list in the current
    /// block scope, initialized to `undefined`.
    fn declare_lexical(&mut self, statements: &[Statement]) -> Result<()> {
        let in_loop = self.in_loop();
        for (name, mutable) in lexical_declarations(statements) {
            self.check_per_iteration(name, in_loop)?;
            let binding = self.new_binding(name);
            self.store_binding(binding, Value::undefined());
            self.ctx_mut().scope.declare(name, binding, mutable);
        }
        Ok(())
    }

    fn in_loop(&self) -> bool {
        self.ctx().control.iter().any(|c| matches!(c, Control::Loop { .. }))
    }

    /// A `let` or `const` inside a loop is a fresh binding on every
    /// iteration, but an environment slot lives for the whole call. A
    /// closure capturing such a binding cannot be lowered.
    fn check_per_iteration(&self, name: &str, in_loop: bool) -> Result<()> {
        if in_loop && self.ctx().captured.contains(name) {
            return Err(self.unsupported(&format!("closure capturing per-iteration binding '{}'", name)));
        }
        Ok(())
    }

    fn store_at_prologue(&mut self, binding: Binding, value: Value) {
        match binding {
            Binding::Stack(slot) => {
                self.emit_prologue(Opcode::StoreStack, vec![value, Value::Inst(slot)]);
            }
            Binding::Frame(var) => {
                let scope = Value::Inst(self.ctx().scope_inst);
                self.emit_prologue(Opcode::StoreFrame, vec![scope, value, Value::Var(var)]);
            }
            Binding::Global | Binding::This | Binding::Arguments => {}
        }
    }

    fn store_name_at_prologue(&mut self, name: &str, value: Value) -> Result<()> {
        match self.resolve(name)? {
            Resolved::Local(Binding::Global, _) => {
                self.emit_prologue(Opcode::StoreProperty, vec![value, Value::Global, Value::string(name)]);
            }
            Resolved::Local(binding, _) => self.store_at_prologue(binding, value),
            _ => return Err(self.error(format!("hoisted function '{}' has no binding", name))),
        }
        Ok(())
    }

    /// Stores into a local binding at the current position.
    fn store_binding(&mut self, binding: Binding, value: Value) {
        match binding {
            Binding::Stack(slot) => {
                self.emit(Opcode::StoreStack, vec![value, Value::Inst(slot)]);
            }
            Binding::Frame(var) => {
                let scope = Value::Inst(self.ctx().scope_inst);
                self.emit(Opcode::StoreFrame, vec![scope, value, Value::Var(var)]);
            }
            Binding::Global | Binding::This | Binding::Arguments => {}
        }
    }

    fn resolve(&self, name: &str) -> Result<Resolved> {
        let innermost = self.contexts.len() - 1;
        for (depth, ctx) in self.contexts.iter().enumerate().rev() {
            let Some(local) = ctx.scope.resolve(name) else {
                continue;
            };
            if depth == innermost {
                return Ok(Resolved::Local(local.binding, local.mutable));
            }
            return match local.binding {
                Binding::Frame(var) => Ok(Resolved::Outer {
                    owner: ctx.id,
                    var,
                    mutable: local.mutable,
                }),
                Binding::Global => Ok(Resolved::Global { declared: true }),
                _ => Err(self.error(format!(
                    "'{}' of {} is captured but has no environment slot",
                    name,
                    self.module.function(ctx.id).name
                ))),
            };
        }
        Ok(Resolved::Global { declared: false })
    }

    /// The environment of `owner`, seen from the current function.
    fn scope_of(&mut self, owner: FunctionId) -> Result<Value> {
        let ctx = self.ctx();
        if owner == ctx.id {
            return Ok(Value::Inst(ctx.scope_inst));
        }
        let parent = self.module.function(ctx.id).parent;
        let (Some(parent), Some(parent_scope)) = (parent, ctx.parent_scope) else {
            return Err(self.error("environment of an enclosing function requested at top level"));
        };
        if owner == parent {
            return Ok(Value::Inst(parent_scope));
        }
        Ok(self.emit_value(
            Opcode::ResolveScope,
            vec![
                Value::Function(owner),
                Value::Function(parent),
                Value::Inst(parent_scope),
            ],
        ))
    }

    fn this_value(&mut self) -> Value {
        if let Some(this) = self.ctx().this_value {
            return Value::Inst(this);
        }
        let this = self.emit_prologue(Opcode::LoadParam, vec![Value::Param(0)]);
        self.ctx_mut().this_value = Some(this);
        Value::Inst(this)
    }

    fn arguments_value(&mut self) -> Value {
        if let Some(args) = self.ctx().arguments_value {
            return Value::Inst(args);
        }
        let op = if self.module.function(self.ctx().id).strict {
            Opcode::CreateArgumentsStrict
        } else {
            Opcode::CreateArgumentsLoose
        };
        let args = self.emit_prologue(op, vec![]);
        self.ctx_mut().arguments_value = Some(args);
        Value::Inst(args)
    }

    /// Reads a variable.
    fn load_name(&mut self, name: &str) -> Result<Value> {
        Ok(match self.resolve(name)? {
            Resolved::Local(Binding::Stack(slot), _) => self.emit_value(Opcode::LoadStack, vec![Value::Inst(slot)]),
            Resolved::Local(Binding::Frame(var), _) => {
                let scope = Value::Inst(self.ctx().scope_inst);
                self.emit_value(Opcode::LoadFrame, vec![scope, Value::Var(var)])
            }
            Resolved::Local(Binding::This, _) => self.this_value(),
            Resolved::Local(Binding::Arguments, _) => self.arguments_value(),
            Resolved::Local(Binding::Global, _) | Resolved::Global { declared: true } => {
                self.emit_value(Opcode::LoadProperty, vec![Value::Global, Value::string(name)])
            }
            Resolved::Global { declared: false } if name == "undefined" => Value::undefined(),
            Resolved::Global { declared: false } => {
                self.emit_value(Opcode::TryLoadGlobalProperty, vec![Value::Global, Value::string(name)])
            }
            Resolved::Outer { owner, var, .. } => {
                let scope = self.scope_of(owner)?;
                self.emit_value(Opcode::LoadFrame, vec![scope, Value::Var(var)])
            }
        })
    }

    /// Assigns a variable. `initializing` permits the first write to a
    /// `const`.
    fn store_name(&mut self, name: &str, value: Value, initializing: bool) -> Result<()> {
        let resolved = self.resolve(name)?;
        let mutable = match resolved {
            Resolved::Local(_, m) | Resolved::Outer { mutable: m, .. } => m,
            Resolved::Global { .. } => true,
        };
        if !mutable && !initializing {
            return self.throw_type_error(&format!("assignment to constant variable '{}'", name));
        }
        match resolved {
            Resolved::Local(Binding::This, _) => return Err(self.error("invalid assignment to 'this'")),
            Resolved::Local(Binding::Arguments, _) => return Err(self.unsupported("assignment to 'arguments'")),
            Resolved::Local(Binding::Global, _) | Resolved::Global { .. } => {
                self.emit(Opcode::StoreProperty, vec![value, Value::Global, Value::string(name)]);
            }
            Resolved::Local(binding, _) => self.store_binding(binding, value),
            Resolved::Outer { owner, var, .. } => {
                let scope = self.scope_of(owner)?;
                self.emit(Opcode::StoreFrame, vec![scope, value, Value::Var(var)]);
            }
        }
        Ok(())
    }

    /// Emits `throw new TypeError(message)`.
    fn throw_type_error(&mut self, message: &str) -> Result<()> {
        let ctor = self.emit_value(
            Opcode::TryLoadGlobalProperty,
            vec![Value::Global, Value::string("TypeError")],
        );
        let error = self.emit_value(
            Opcode::Construct,
            vec![ctor, Value::undefined(), Value::string(message)],
        );
        self.emit(Opcode::Throw, vec![error]);
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statements(&mut self, statements: &'a [Statement]) -> Result<()> {
        for stmt in statements {
            self.statement(stmt)?;
        }
        Ok(())
    }

    /// Lowers a block with its own lexical scope.
    fn block(&mut self, statements: &'a [Statement]) -> Result<()> {
        self.ctx_mut().scope.begin_scope();
        if let Err(err) = self.declare_lexical(statements) {
            self.ctx_mut().scope.end_scope();
            return Err(err);
        }
        let result = self.statements(statements);
        self.ctx_mut().scope.end_scope();
        result
    }

    fn statement(&mut self, stmt: &'a Statement) -> Result<()> {
        match stmt {
            Statement::VariableDeclaration(decl) => self.variable_declaration(decl),
            // Hoisted to the prologue.
            Statement::FunctionDeclaration(_) => Ok(()),
            Statement::Expression(e) => self.expression(&e.expression).map(|_| ()),
            Statement::Block(b) => self.block(&b.body),
            Statement::If(s) => self.if_statement(s),
            Statement::Switch(s) => self.switch_statement(s),
            Statement::While(s) => self.while_statement(s),
            Statement::DoWhile(s) => self.do_while_statement(s),
            Statement::For(s) => self.for_statement(s),
            Statement::ForIn(_) => Err(self.unsupported("for-in")),
            Statement::ForOf(_) => Err(self.unsupported("for-of")),
            Statement::With(_) => Err(self.unsupported("with")),
            Statement::Return(r) => {
                let value = match &r.argument {
                    Some(e) => self.expression(e)?,
                    None => Value::undefined(),
                };
                self.unwind_to(0)?;
                self.emit(Opcode::Return, vec![value]);
                Ok(())
            }
            Statement::Throw(t) => {
                let value = self.expression(&t.argument)?;
                self.emit(Opcode::Throw, vec![value]);
                Ok(())
            }
            Statement::Break(s) => self.jump(s.label.as_ref().map(|l| l.name.as_str()), false),
            Statement::Continue(s) => self.jump(s.label.as_ref().map(|l| l.name.as_str()), true),
            Statement::Try(t) => self.try_statement(t),
            Statement::Labeled(l) => self.labeled_statement(l),
            Statement::Export(e) => self.statement(&e.declaration),
            Statement::Debugger | Statement::Empty | Statement::TypeAlias(_) | Statement::Interface(_) => Ok(()),
        }
    }

    fn variable_declaration(&mut self, decl: &'a VariableDeclaration) -> Result<()> {
        for declarator in &decl.declarations {
            if let Some(init) = &declarator.init {
                let value = self.expression_named(init, &declarator.id.name)?;
                self.store_name(&declarator.id.name, value, true)?;
            }
        }
        Ok(())
    }

    fn if_statement(&mut self, s: &'a IfStatement) -> Result<()> {
        let cond = self.expression(&s.test)?;
        let then_block = self.new_block();
        let exit = self.new_block();
        let else_block = if s.alternate.is_some() { self.new_block() } else { exit };
        self.cond_branch(cond, then_block, else_block);

        self.set_block(then_block);
        self.statement(&s.consequent)?;
        self.branch_to(exit);

        if let Some(alt) = &s.alternate {
            self.set_block(else_block);
            self.statement(alt)?;
            self.branch_to(exit);
        }
        self.set_block(exit);
        Ok(())
    }

    fn take_labels(&mut self) -> Vec<&'a str> {
        std::mem::take(&mut self.ctx_mut().pending_labels)
    }

    fn while_statement(&mut self, s: &'a WhileStatement) -> Result<()> {
        let labels = self.take_labels();
        let header = self.new_block();
        let body = self.new_block();
        let exit = self.new_block();
        self.branch_to(header);

        self.set_block(header);
        let cond = self.expression(&s.test)?;
        self.cond_branch(cond, body, exit);

        self.set_block(body);
        self.loop_body(&s.body, labels, exit, header)?;
        self.branch_to(header);
        self.set_block(exit);
        Ok(())
    }

    fn do_while_statement(&mut self, s: &'a DoWhileStatement) -> Result<()> {
        let labels = self.take_labels();
        let body = self.new_block();
        let test = self.new_block();
        let exit = self.new_block();
        self.branch_to(body);

        self.set_block(body);
        self.loop_body(&s.body, labels, exit, test)?;
        self.branch_to(test);

        self.set_block(test);
        let cond = self.expression(&s.test)?;
        self.cond_branch(cond, body, exit);
        self.set_block(exit);
        Ok(())
    }

    fn for_statement(&mut self, s: &'a ForStatement) -> Result<()> {
        let labels = self.take_labels();
        self.ctx_mut().scope.begin_scope();
        let result = self.for_statement_inner(s, labels);
        self.ctx_mut().scope.end_scope();
        result
    }

    fn for_statement_inner(&mut self, s: &'a ForStatement, labels: Vec<&'a str>) -> Result<()> {
        match &s.init {
            Some(ForInit::Declaration(decl)) => {
                if decl.kind != VariableKind::Var {
                    for d in &decl.declarations {
                        self.check_per_iteration(&d.id.name, true)?;
                        let binding = self.new_binding(&d.id.name);
                        self.store_binding(binding, Value::undefined());
                        self.ctx_mut()
                            .scope
                            .declare(d.id.name.clone(), binding, decl.kind == VariableKind::Let);
                    }
                }
                self.variable_declaration(decl)?;
            }
            Some(ForInit::Expression(e)) => {
                self.expression(e)?;
            }
            None => {}
        }

        let header = self.new_block();
        let body = self.new_block();
        let update = self.new_block();
        let exit = self.new_block();
        self.branch_to(header);

        self.set_block(header);
        match &s.test {
            Some(test) => {
                let cond = self.expression(test)?;
                self.cond_branch(cond, body, exit);
            }
            None => self.branch_to(body),
        }

        self.set_block(body);
        self.loop_body(&s.body, labels, exit, update)?;
        self.branch_to(update);

        self.set_block(update);
        if let Some(u) = &s.update {
            self.expression(u)?;
        }
        self.branch_to(header);
        self.set_block(exit);
        Ok(())
    }

    fn loop_body(
        &mut self,
        body: &'a Statement,
        labels: Vec<&'a str>,
        break_to: BlockId,
        continue_to: BlockId,
    ) -> Result<()> {
        self.ctx_mut().control.push(Control::Loop {
            labels,
            break_to,
            continue_to,
        });
        let result = self.statement(body);
        self.ctx_mut().control.pop();
        result
    }

    fn labeled_statement(&mut self, l: &'a LabeledStatement) -> Result<()> {
        let is_loop = matches!(
            *l.body,
            Statement::While(_) | Statement::DoWhile(_) | Statement::For(_) | Statement::Labeled(_)
        );
        self.ctx_mut().pending_labels.push(&l.label.name);
        if is_loop {
            return self.statement(&l.body);
        }
        let labels = self.take_labels();
        let exit = self.new_block();
        self.ctx_mut().control.push(Control::Breakable {
            labels,
            break_to: exit,
            unlabeled: false,
        });
        let result = self.statement(&l.body);
        self.ctx_mut().control.pop();
        result?;
        self.branch_to(exit);
        self.set_block(exit);
        Ok(())
    }

    /// Lowers the cases as a chain of strict comparisons followed by the
    /// case bodies in source order, so that fallthrough is a branch to
    /// the next body.
    fn switch_statement(&mut self, s: &'a SwitchStatement) -> Result<()> {
        let labels = self.take_labels();
        let discriminant = self.expression(&s.discriminant)?;
        let exit = self.new_block();
        let bodies: Vec<BlockId> = s.cases.iter().map(|_| self.new_block()).collect();

        self.ctx_mut().scope.begin_scope();
        for case in &s.cases {
            if let Err(err) = self.declare_lexical(&case.consequent) {
                self.ctx_mut().scope.end_scope();
                return Err(err);
            }
        }

        let mut default = None;
        for (case, &body) in s.cases.iter().zip(&bodies) {
            match &case.test {
                Some(test) => {
                    let value = self.expression(test)?;
                    let eq = self.emit_value(Opcode::StrictlyEqual, vec![discriminant.clone(), value]);
                    let next = self.new_block();
                    self.cond_branch(eq, body, next);
                    self.set_block(next);
                }
                None => default = Some(body),
            }
        }
        self.branch_to(default.unwrap_or(exit));

        self.ctx_mut().control.push(Control::Breakable {
            labels,
            break_to: exit,
            unlabeled: true,
        });
        let mut result = Ok(());
        for (i, case) in s.cases.iter().enumerate() {
            self.set_block(bodies[i]);
            result = self.statements(&case.consequent);
            if result.is_err() {
                break;
            }
            self.branch_to(bodies.get(i + 1).copied().unwrap_or(exit));
        }
        self.ctx_mut().control.pop();
        self.ctx_mut().scope.end_scope();
        result?;
        self.set_block(exit);
        Ok(())
    }

    fn jump(&mut self, label: Option<&str>, is_continue: bool) -> Result<()> {
        let control = &self.ctx().control;
        let found = control.iter().enumerate().rev().find_map(|(i, entry)| match entry {
            Control::Loop {
                labels,
                break_to,
                continue_to,
            } => {
                let matches = label.is_none_or(|l| labels.contains(&l));
                matches.then_some((i, if is_continue { *continue_to } else { *break_to }))
            }
            Control::Breakable {
                labels,
                break_to,
                unlabeled,
            } if !is_continue => {
                let matches = match label {
                    None => *unlabeled,
                    Some(l) => labels.contains(&l),
                };
                matches.then_some((i, *break_to))
            }
            _ => None,
        });
        let Some((index, target)) = found else {
            let what = if is_continue { "continue" } else { "break" };
            return Err(self.error(match label {
                Some(l) => format!("{} to unknown label '{}'", what, l),
                None => format!("{} outside of a loop", what),
            }));
        };
        self.unwind_to(index + 1)?;
        self.branch_to(target);
        Ok(())
    }

    /// Leaves every protected region above `depth` on the control stack,
    /// running finalizers inline from the innermost outwards.
    fn unwind_to(&mut self, depth: usize) -> Result<()> {
        let mut i = self.ctx().control.len();
        while i > depth {
            i -= 1;
            let Control::Try { handler, finalizer } = self.ctx().control[i].clone() else {
                continue;
            };
            let next = self.new_block();
            self.emit(Opcode::TryEnd, vec![Value::Block(handler), Value::Block(next)]);
            self.set_block(next);
            if let Some(finalizer) = finalizer {
                let saved = self.ctx_mut().control.split_off(i);
                let result = self.block(&finalizer.body);
                self.ctx_mut().control.extend(saved);
                result?;
            }
        }
        Ok(())
    }

    /// `try`/`catch`/`finally`. A finalizer is emitted on every exit: the
    /// normal fallthrough, each jump out of the region, and a catch-all
    /// handler that rethrows.
    fn try_statement(&mut self, t: &'a TryStatement) -> Result<()> {
        let exit = self.new_block();
        match &t.finalizer {
            Some(finalizer) => {
                let handler = self.new_block();
                let body = self.new_block();
                self.emit(Opcode::TryStart, vec![Value::Block(handler), Value::Block(body)]);
                self.set_block(body);
                self.ctx_mut().control.push(Control::Try {
                    handler,
                    finalizer: Some(finalizer),
                });
                let result = self.try_catch(t);
                self.ctx_mut().control.pop();
                result?;
                if !self.is_terminated() {
                    let next = self.new_block();
                    self.emit(Opcode::TryEnd, vec![Value::Block(handler), Value::Block(next)]);
                    self.set_block(next);
                    self.block(&finalizer.body)?;
                    self.branch_to(exit);
                }

                self.set_block(handler);
                let thrown = self.emit_value(Opcode::Catch, vec![]);
                self.block(&finalizer.body)?;
                if !self.is_terminated() {
                    self.emit(Opcode::Throw, vec![thrown]);
                }
            }
            None => {
                self.try_catch(t)?;
                self.branch_to(exit);
            }
        }
        self.set_block(exit);
        Ok(())
    }

    fn try_catch(&mut self, t: &'a TryStatement) -> Result<()> {
        let Some(clause) = &t.handler else {
            return self.block(&t.block.body);
        };
        let handler = self.new_block();
        let body = self.new_block();
        let after = self.new_block();
        self.emit(Opcode::TryStart, vec![Value::Block(handler), Value::Block(body)]);

        self.set_block(body);
        self.ctx_mut().control.push(Control::Try { handler, finalizer: None });
        let result = self.block(&t.block.body);
        self.ctx_mut().control.pop();
        result?;
        if !self.is_terminated() {
            let next = self.new_block();
            self.emit(Opcode::TryEnd, vec![Value::Block(handler), Value::Block(next)]);
            self.set_block(next);
            self.branch_to(after);
        }

        self.set_block(handler);
        let thrown = self.emit_value(Opcode::Catch, vec![]);
        self.ctx_mut().scope.begin_scope();
        if let Some(param) = &clause.param {
            let binding = self.new_binding(&param.name);
            self.store_binding(binding, thrown);
            self.ctx_mut().scope.declare(param.name.clone(), binding, true);
        }
        let result = self.block(&clause.body.body);
        self.ctx_mut().scope.end_scope();
        result?;
        self.branch_to(after);
        self.set_block(after);
        Ok(())
    }
}

/// Returns the literal value of an AST literal.
fn literal_value(lit: &crate::ast::Literal) -> Literal {
    match lit {
        crate::ast::Literal::Number(n) => Literal::Number(*n),
        crate::ast::Literal::String(s) => Literal::String(s.clone()),
        crate::ast::Literal::Boolean(b) => Literal::Bool(*b),
        crate::ast::Literal::Null => Literal::Null,
        crate::ast::Literal::BigInt(s) => {
            Literal::BigInt(crate::ast::bigint_value(s).map_or_else(|| s.clone(), |v| v.to_string()))
        }
    }
}
