//! Scope management and capture analysis for IR generation.

use rustc_hash::FxHashSet;

use crate::ast::*;
use crate::ir::{InstId, VarId};

/// Where a declared name lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    /// Stack slot of the declaring function (`AllocStack`).
    Stack(InstId),
    /// Environment slot, visible to nested closures.
    Frame(VarId),
    /// Property of the global object.
    Global,
    /// `this` of a non-arrow function, loaded lazily.
    This,
    /// The lazily created arguments object.
    Arguments,
}

/// A name declared in a scope.
#[derive(Debug, Clone)]
pub struct Local {
    /// The variable name
    pub name: String,
    /// Storage of the variable
    pub binding: Binding,
    /// The scope depth where this was declared
    pub depth: usize,
    /// Whether the variable is mutable (var/let vs const)
    pub mutable: bool,
}

/// Lexical scopes of one function.
#[derive(Debug, Default)]
pub struct Scope {
    /// Local variables in this scope
    pub locals: Vec<Local>,
    /// Current scope depth (0 = function level)
    pub depth: usize,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new block scope.
    pub fn begin_scope(&mut self) {
        self.depth += 1;
    }

    /// End the current block scope and return the number of names dropped.
    pub fn end_scope(&mut self) -> usize {
        let keep = self
            .locals
            .iter()
            .rposition(|l| l.depth < self.depth)
            .map_or(0, |i| i + 1);
        let count = self.locals.len() - keep;
        self.locals.truncate(keep);
        self.depth = self.depth.saturating_sub(1);
        count
    }

    /// Declares a name in the current block scope.
    pub fn declare(&mut self, name: impl Into<String>, binding: Binding, mutable: bool) {
        self.locals.push(Local {
            name: name.into(),
            binding,
            depth: self.depth,
            mutable,
        });
    }

    /// Innermost declaration of `name`.
    pub fn resolve(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find(|l| l.name == name)
    }

    /// Declaration of `name` in the current block scope only.
    pub fn resolve_current(&self, name: &str) -> Option<&Local> {
        self.locals
            .iter()
            .rev()
            .take_while(|l| l.depth == self.depth)
            .find(|l| l.name == name)
    }
}

// ========================================================================
// Hoisting
// ========================================================================

/// Declarations hoisted to function level.
#[derive(Debug, Default)]
pub struct Hoisted<'a> {
    /// `var` names in first-declaration order
    pub vars: Vec<String>,
    /// Function declarations, including those nested in blocks
    pub functions: Vec<&'a FunctionDeclaration>,
}

/// Collects `var` names and function declarations of a function body.
pub fn collect_hoisted(statements: &[Statement]) -> Hoisted<'_> {
    let mut hoisted = Hoisted::default();
    for stmt in statements {
        collect_hoisted_from_statement(stmt, &mut hoisted);
    }
    hoisted
}

fn push_var_names(decl: &VariableDeclaration, vars: &mut Vec<String>) {
    if decl.kind == VariableKind::Var {
        for declarator in &decl.declarations {
            if !vars.contains(&declarator.id.name) {
                vars.push(declarator.id.name.clone());
            }
        }
    }
}

fn collect_hoisted_from_statement<'a>(stmt: &'a Statement, hoisted: &mut Hoisted<'a>) {
    match stmt {
        Statement::VariableDeclaration(decl) => push_var_names(decl, &mut hoisted.vars),
        Statement::FunctionDeclaration(func) => hoisted.functions.push(func),
        Statement::Block(block) => {
            for inner in &block.body {
                collect_hoisted_from_statement(inner, hoisted);
            }
        }
        Statement::If(if_stmt) => {
            collect_hoisted_from_statement(&if_stmt.consequent, hoisted);
            if let Some(alt) = &if_stmt.alternate {
                collect_hoisted_from_statement(alt, hoisted);
            }
        }
        Statement::While(w) => collect_hoisted_from_statement(&w.body, hoisted),
        Statement::DoWhile(d) => collect_hoisted_from_statement(&d.body, hoisted),
        Statement::For(for_stmt) => {
            if let Some(ForInit::Declaration(decl)) = &for_stmt.init {
                push_var_names(decl, &mut hoisted.vars);
            }
            collect_hoisted_from_statement(&for_stmt.body, hoisted);
        }
        Statement::ForIn(ForInStatement { left, body, .. })
        | Statement::ForOf(ForOfStatement { left, body, .. }) => {
            if let ForInLeft::Declaration(decl) = left {
                push_var_names(decl, &mut hoisted.vars);
            }
            collect_hoisted_from_statement(body, hoisted);
        }
        Statement::Switch(switch_stmt) => {
            for case in &switch_stmt.cases {
                for inner in &case.consequent {
                    collect_hoisted_from_statement(inner, hoisted);
                }
            }
        }
        Statement::Try(try_stmt) => {
            for inner in &try_stmt.block.body {
                collect_hoisted_from_statement(inner, hoisted);
            }
            if let Some(handler) = &try_stmt.handler {
                for inner in &handler.body.body {
                    collect_hoisted_from_statement(inner, hoisted);
                }
            }
            if let Some(finalizer) = &try_stmt.finalizer {
                for inner in &finalizer.body {
                    collect_hoisted_from_statement(inner, hoisted);
                }
            }
        }
        Statement::Labeled(labeled) => collect_hoisted_from_statement(&labeled.body, hoisted),
        Statement::With(with) => collect_hoisted_from_statement(&with.body, hoisted),
        Statement::Export(export) => collect_hoisted_from_statement(&export.declaration, hoisted),
        _ => {}
    }
}

/// `let`/`const` names declared directly in a statement list.
pub fn lexical_declarations(statements: &[Statement]) -> Vec<(&str, bool)> {
    let mut names = Vec::new();
    for stmt in statements {
        let stmt = match stmt {
            Statement::Export(export) => &*export.declaration,
            other => other,
        };
        if let Statement::VariableDeclaration(decl) = stmt {
            if decl.kind != VariableKind::Var {
                for d in &decl.declarations {
                    names.push((d.id.name.as_str(), decl.kind == VariableKind::Let));
                }
            }
        }
    }
    names
}

// ========================================================================
// Capture analysis
// ========================================================================

/// Names of a function that some nested function refers to.
///
/// The result is by name: every declaration of a captured name in the
/// function is given an environment slot. `this` and `arguments` appear
/// when an arrow function uses them.
pub fn captured_names(params: &[Identifier], body: &[Statement], is_arrow: bool) -> FxHashSet<String> {
    NameWalker::function(params, body, is_arrow).captured
}

/// True when the function body mentions `name` outside nested scopes
/// that redeclare it.
pub fn refers_to(params: &[Identifier], body: &[Statement], is_arrow: bool, name: &str) -> bool {
    NameWalker::function(params, body, is_arrow).free.contains(name)
}

#[derive(Default)]
struct NameWalker {
    scopes: Vec<FxHashSet<String>>,
    free: FxHashSet<String>,
    captured: FxHashSet<String>,
}

impl NameWalker {
    fn function(params: &[Identifier], body: &[Statement], is_arrow: bool) -> Self {
        let mut walker = NameWalker::default();
        let hoisted = collect_hoisted(body);
        let mut names: FxHashSet<String> = params.iter().map(|p| p.name.clone()).collect();
        names.extend(hoisted.vars.iter().cloned());
        names.extend(hoisted.functions.iter().map(|f| f.id.name.clone()));
        names.extend(lexical_declarations(body).into_iter().map(|(n, _)| n.to_string()));
        if !is_arrow {
            names.insert("this".into());
            names.insert("arguments".into());
        }
        walker.scopes.push(names);
        for func in &hoisted.functions {
            walker.inner(&func.params, &func.body, false);
        }
        walker.statements(body);
        walker
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn reference(&mut self, name: &str) {
        if !self.is_declared(name) {
            self.free.insert(name.to_string());
        }
    }

    fn inner(&mut self, params: &[Identifier], body: &[Statement], is_arrow: bool) {
        let inner = NameWalker::function(params, body, is_arrow);
        for name in inner.free {
            if self.is_declared(&name) {
                self.captured.insert(name);
            } else {
                self.free.insert(name);
            }
        }
    }

    fn with_scope(&mut self, names: impl IntoIterator<Item = String>, f: impl FnOnce(&mut Self)) {
        self.scopes.push(names.into_iter().collect());
        f(self);
        self.scopes.pop();
    }

    fn statements(&mut self, statements: &[Statement]) {
        for stmt in statements {
            self.statement(stmt);
        }
    }

    fn block(&mut self, statements: &[Statement]) {
        let names: Vec<String> = lexical_declarations(statements)
            .into_iter()
            .map(|(n, _)| n.to_string())
            .collect();
        self.with_scope(names, |w| w.statements(statements));
    }

    fn declaration(&mut self, decl: &VariableDeclaration) {
        for d in &decl.declarations {
            self.reference(&d.id.name);
            if let Some(init) = &d.init {
                self.expression(init);
            }
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::VariableDeclaration(decl) => self.declaration(decl),
            // Hoisted declarations were visited at function level.
            Statement::FunctionDeclaration(_) => {}
            Statement::Expression(e) => self.expression(&e.expression),
            Statement::Block(b) => self.block(&b.body),
            Statement::If(s) => {
                self.expression(&s.test);
                self.statement(&s.consequent);
                if let Some(alt) = &s.alternate {
                    self.statement(alt);
                }
            }
            Statement::Switch(s) => {
                self.expression(&s.discriminant);
                let names: Vec<String> = s
                    .cases
                    .iter()
                    .flat_map(|c| lexical_declarations(&c.consequent))
                    .map(|(n, _)| n.to_string())
                    .collect();
                self.with_scope(names, |w| {
                    for case in &s.cases {
                        if let Some(test) = &case.test {
                            w.expression(test);
                        }
                        w.statements(&case.consequent);
                    }
                });
            }
            Statement::While(s) => {
                self.expression(&s.test);
                self.statement(&s.body);
            }
            Statement::DoWhile(s) => {
                self.statement(&s.body);
                self.expression(&s.test);
            }
            Statement::For(s) => {
                let names: Vec<String> = match &s.init {
                    Some(ForInit::Declaration(decl)) if decl.kind != VariableKind::Var => {
                        decl.declarations.iter().map(|d| d.id.name.clone()).collect()
                    }
                    _ => Vec::new(),
                };
                self.with_scope(names, |w| {
                    match &s.init {
                        Some(ForInit::Declaration(decl)) => w.declaration(decl),
                        Some(ForInit::Expression(e)) => w.expression(e),
                        None => {}
                    }
                    if let Some(test) = &s.test {
                        w.expression(test);
                    }
                    if let Some(update) = &s.update {
                        w.expression(update);
                    }
                    w.statement(&s.body);
                });
            }
            Statement::ForIn(ForInStatement { left, right, body, .. })
            | Statement::ForOf(ForOfStatement { left, right, body, .. }) => {
                match left {
                    ForInLeft::Declaration(decl) => self.declaration(decl),
                    ForInLeft::Expression(e) => self.expression(e),
                }
                self.expression(right);
                self.statement(body);
            }
            Statement::Return(r) => {
                if let Some(arg) = &r.argument {
                    self.expression(arg);
                }
            }
            Statement::Throw(t) => self.expression(&t.argument),
            Statement::Try(t) => {
                self.block(&t.block.body);
                if let Some(handler) = &t.handler {
                    let param: Vec<String> = handler.param.iter().map(|p| p.name.clone()).collect();
                    self.with_scope(param, |w| w.block(&handler.body.body));
                }
                if let Some(finalizer) = &t.finalizer {
                    self.block(&finalizer.body);
                }
            }
            Statement::With(w) => {
                self.expression(&w.object);
                self.statement(&w.body);
            }
            Statement::Labeled(l) => self.statement(&l.body),
            Statement::Export(e) => self.statement(&e.declaration),
            Statement::Break(_)
            | Statement::Continue(_)
            | Statement::Debugger
            | Statement::Empty
            | Statement::TypeAlias(_)
            | Statement::Interface(_) => {}
        }
    }

    fn expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Literal(_) => {}
            Expression::Identifier(id) => self.reference(&id.name),
            Expression::This => self.reference("this"),
            Expression::Array(a) => {
                for e in a.elements.iter().flatten() {
                    self.expression(e);
                }
            }
            Expression::Object(o) => {
                for p in &o.properties {
                    if let PropertyKey::Computed(k) = &p.key {
                        self.expression(k);
                    }
                    self.expression(&p.value);
                }
            }
            Expression::Binary(b) => {
                let mut spine = vec![b];
                let mut last = b;
                while let Expression::Binary(inner) = &*last.left {
                    spine.push(inner);
                    last = inner;
                }
                self.expression(&last.left);
                for node in spine.iter().rev() {
                    self.expression(&node.right);
                }
            }
            Expression::Unary(u) => self.expression(&u.argument),
            Expression::Assignment(a) => {
                self.expression(&a.left);
                self.expression(&a.right);
            }
            Expression::Call(c) => {
                self.expression(&c.callee);
                for arg in &c.arguments {
                    self.expression(arg);
                }
            }
            Expression::New(n) => {
                self.expression(&n.callee);
                for arg in &n.arguments {
                    self.expression(arg);
                }
            }
            Expression::Member(m) => {
                self.expression(&m.object);
                if let MemberProperty::Expression(p) = &m.property {
                    self.expression(p);
                }
            }
            Expression::Conditional(c) => {
                self.expression(&c.test);
                self.expression(&c.consequent);
                self.expression(&c.alternate);
            }
            Expression::Function(f) => match &f.id {
                Some(id) => {
                    let own = vec![id.name.clone()];
                    self.with_scope(own, |w| w.inner(&f.params, &f.body, false));
                }
                None => self.inner(&f.params, &f.body, false),
            },
            Expression::Arrow(a) => match &a.body {
                ArrowBody::Block(body) => self.inner(&a.params, body, true),
                ArrowBody::Expression(e) => {
                    let body = [Statement::Return(ReturnStatement {
                        argument: Some((**e).clone()),
                    })];
                    self.inner(&a.params, &body, true);
                }
            },
            Expression::Update(u) => self.expression(&u.argument),
            Expression::Sequence(s) => {
                for e in &s.expressions {
                    self.expression(e);
                }
            }
            Expression::TsAs(t) => self.expression(&t.expression),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn function_body(source: &str) -> (Vec<Identifier>, Vec<Statement>) {
        let program = parse(source, false).unwrap();
        match program.body.into_iter().next() {
            Some(Statement::FunctionDeclaration(f)) => (f.params, f.body),
            other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn test_scope_shadowing() {
        let mut scope = Scope::new();
        scope.declare("x", Binding::Global, true);
        scope.begin_scope();
        scope.declare("x", Binding::This, false);
        assert_eq!(scope.resolve("x").map(|l| l.binding), Some(Binding::This));
        assert!(scope.resolve_current("x").is_some());
        assert_eq!(scope.end_scope(), 1);
        assert_eq!(scope.resolve("x").map(|l| l.binding), Some(Binding::Global));
        assert!(scope.resolve("y").is_none());
    }

    #[test]
    fn test_hoisting() {
        let (_, body) = function_body(
            "function f() { if (a) { var x = 1; function g() {} } for (var i = 0;;) {} let y; }",
        );
        let hoisted = collect_hoisted(&body);
        assert_eq!(hoisted.vars, vec!["x", "i"]);
        assert_eq!(hoisted.functions.len(), 1);
        assert_eq!(lexical_declarations(&body), vec![("y", true)]);
    }

    #[test]
    fn test_captures_through_arrow() {
        let (params, body) = function_body(
            "function f(p, q) { for (var i = 0; i < 2; i++) { var a = () => v = 0; var v = arguments; } return q; }",
        );
        let captured = captured_names(&params, &body, false);
        assert!(captured.contains("v"));
        assert!(!captured.contains("i"));
        assert!(!captured.contains("arguments"));
        assert!(!captured.contains("q"));
    }

    #[test]
    fn test_arrow_this_and_arguments() {
        let (params, body) = function_body("function f() { return () => this.x + arguments[0]; }");
        let captured = captured_names(&params, &body, false);
        assert!(captured.contains("this"));
        assert!(captured.contains("arguments"));
    }

    #[test]
    fn test_shadowed_name_is_not_captured() {
        let (params, body) = function_body("function f() { var x; function g() { var x; return x; } }");
        assert!(captured_names(&params, &body, false).is_empty());
        let (params, body) = function_body("function f() { var x; function g() { return x; } }");
        assert!(captured_names(&params, &body, false).contains("x"));
        assert!(!refers_to(&params, &body, false, "g"));
    }
}
