//! ESTree JSON serialization.
//!
//! Produces the node layout consumed by ESTree tooling: every node is an
//! object whose first key is `type`. Identifier annotations and optional
//! markers are only emitted when present, matching the compact dumps of
//! the reference parser.

use serde_json::{Map, Value, json};

use super::*;

/// Serializes a whole program.
pub fn program_to_json(program: &Program) -> Value {
    json!({
        "type": "Program",
        "body": program.body.iter().map(statement).collect::<Vec<_>>(),
    })
}

/// Serializes a program as indented JSON text.
pub fn program_to_string_pretty(program: &Program) -> String {
    // Serializing a Value cannot fail.
    serde_json::to_string_pretty(&program_to_json(program)).unwrap_or_default()
}

fn node(kind: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("type".into(), Value::String(kind.into()));
    map
}

fn opt<T>(value: Option<&T>, f: impl Fn(&T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

fn list<T>(items: &[T], f: impl Fn(&T) -> Value) -> Value {
    Value::Array(items.iter().map(f).collect())
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 && !(n == 0.0 && n.is_sign_negative()) {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Serializes an identifier.
pub fn identifier(id: &Identifier) -> Value {
    let mut map = node("Identifier");
    map.insert("name".into(), Value::String(id.name.clone()));
    if let Some(annotation) = &id.type_annotation {
        map.insert("typeAnnotation".into(), type_annotation(annotation));
    }
    if id.optional {
        map.insert("optional".into(), Value::Bool(true));
    }
    Value::Object(map)
}

fn block(body: &[Statement]) -> Value {
    json!({ "type": "BlockStatement", "body": list(body, statement) })
}

fn function_node(
    kind: &str,
    id: Option<&Identifier>,
    params: &[Identifier],
    body: Value,
    type_parameters: Option<&TsTypeParameterDeclaration>,
    return_type: Option<&TsTypeAnnotation>,
    expression: bool,
) -> Value {
    let mut map = node(kind);
    if kind != "ArrowFunctionExpression" {
        map.insert("id".into(), opt(id, identifier));
    }
    map.insert("params".into(), list(params, identifier));
    map.insert("body".into(), body);
    if let Some(tp) = type_parameters {
        map.insert("typeParameters".into(), type_parameter_declaration(tp));
    }
    if let Some(rt) = return_type {
        map.insert("returnType".into(), type_annotation(rt));
    }
    map.insert("generator".into(), Value::Bool(false));
    map.insert("async".into(), Value::Bool(false));
    if kind == "ArrowFunctionExpression" {
        map.insert("expression".into(), Value::Bool(expression));
    }
    Value::Object(map)
}

fn variable_declaration(decl: &VariableDeclaration) -> Value {
    let kind = match decl.kind {
        VariableKind::Var => "var",
        VariableKind::Let => "let",
        VariableKind::Const => "const",
    };
    json!({
        "type": "VariableDeclaration",
        "kind": kind,
        "declarations": list(&decl.declarations, |d| json!({
            "type": "VariableDeclarator",
            "init": opt(d.init.as_ref(), expression),
            "id": identifier(&d.id),
        })),
    })
}

fn for_left(left: &ForInLeft) -> Value {
    match left {
        ForInLeft::Declaration(decl) => variable_declaration(decl),
        ForInLeft::Expression(expr) => expression(expr),
    }
}

/// Serializes a statement.
pub fn statement(stmt: &Statement) -> Value {
    match stmt {
        Statement::VariableDeclaration(decl) => variable_declaration(decl),
        Statement::FunctionDeclaration(f) => function_node(
            "FunctionDeclaration",
            Some(&f.id),
            &f.params,
            block(&f.body),
            f.type_parameters.as_ref(),
            f.return_type.as_deref(),
            false,
        ),
        Statement::Expression(s) => {
            let mut map = node("ExpressionStatement");
            map.insert("expression".into(), expression(&s.expression));
            if let Expression::Literal(Literal::String(text)) = &s.expression {
                map.insert("directive".into(), Value::String(text.clone()));
            } else {
                map.insert("directive".into(), Value::Null);
            }
            Value::Object(map)
        }
        Statement::Block(b) => block(&b.body),
        Statement::If(s) => json!({
            "type": "IfStatement",
            "test": expression(&s.test),
            "consequent": statement(&s.consequent),
            "alternate": opt(s.alternate.as_deref(), statement),
        }),
        Statement::Switch(s) => json!({
            "type": "SwitchStatement",
            "discriminant": expression(&s.discriminant),
            "cases": list(&s.cases, |c| json!({
                "type": "SwitchCase",
                "test": opt(c.test.as_ref(), expression),
                "consequent": list(&c.consequent, statement),
            })),
        }),
        Statement::While(s) => json!({
            "type": "WhileStatement",
            "body": statement(&s.body),
            "test": expression(&s.test),
        }),
        Statement::DoWhile(s) => json!({
            "type": "DoWhileStatement",
            "body": statement(&s.body),
            "test": expression(&s.test),
        }),
        Statement::For(s) => json!({
            "type": "ForStatement",
            "init": match &s.init {
                Some(ForInit::Declaration(d)) => variable_declaration(d),
                Some(ForInit::Expression(e)) => expression(e),
                None => Value::Null,
            },
            "test": opt(s.test.as_ref(), expression),
            "update": opt(s.update.as_ref(), expression),
            "body": statement(&s.body),
        }),
        Statement::ForIn(s) => json!({
            "type": "ForInStatement",
            "left": for_left(&s.left),
            "right": expression(&s.right),
            "body": statement(&s.body),
        }),
        Statement::ForOf(s) => json!({
            "type": "ForOfStatement",
            "left": for_left(&s.left),
            "right": expression(&s.right),
            "body": statement(&s.body),
            "await": s.is_await,
        }),
        Statement::Return(s) => json!({
            "type": "ReturnStatement",
            "argument": opt(s.argument.as_ref(), expression),
        }),
        Statement::Break(s) => json!({
            "type": "BreakStatement",
            "label": opt(s.label.as_ref(), identifier),
        }),
        Statement::Continue(s) => json!({
            "type": "ContinueStatement",
            "label": opt(s.label.as_ref(), identifier),
        }),
        Statement::Throw(s) => json!({
            "type": "ThrowStatement",
            "argument": expression(&s.argument),
        }),
        Statement::Try(s) => json!({
            "type": "TryStatement",
            "block": block(&s.block.body),
            "handler": opt(s.handler.as_ref(), |h| json!({
                "type": "CatchClause",
                "param": opt(h.param.as_ref(), identifier),
                "body": block(&h.body.body),
            })),
            "finalizer": opt(s.finalizer.as_ref(), |f| block(&f.body)),
        }),
        Statement::With(s) => json!({
            "type": "WithStatement",
            "object": expression(&s.object),
            "body": statement(&s.body),
        }),
        Statement::Labeled(s) => json!({
            "type": "LabeledStatement",
            "label": identifier(&s.label),
            "body": statement(&s.body),
        }),
        Statement::Debugger => json!({ "type": "DebuggerStatement" }),
        Statement::Empty => json!({ "type": "EmptyStatement" }),
        Statement::TypeAlias(alias) => json!({
            "type": "TSTypeAliasDeclaration",
            "id": identifier(&alias.id),
            "typeParameters": opt(alias.type_parameters.as_ref(), type_parameter_declaration),
            "typeAnnotation": ts_type(&alias.type_annotation),
        }),
        Statement::Interface(decl) => json!({
            "type": "TSInterfaceDeclaration",
            "id": identifier(&decl.id),
            "body": {
                "type": "TSInterfaceBody",
                "body": list(&decl.body, type_member),
            },
            "extends": list(&decl.extends, |h| json!({
                "type": "TSInterfaceHeritage",
                "expression": identifier(&h.type_name),
                "typeParameters": opt(h.type_parameters.as_ref(), |args| type_arguments(args)),
            })),
            "typeParameters": opt(decl.type_parameters.as_ref(), type_parameter_declaration),
        }),
        Statement::Export(export) => json!({
            "type": "ExportNamedDeclaration",
            "declaration": statement(&export.declaration),
            "specifiers": [],
            "source": null,
            "exportKind": "type",
        }),
    }
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Number(n) => json!({
            "type": "NumericLiteral",
            "value": number(*n),
            "raw": number_to_js_string(*n),
        }),
        Literal::String(s) => json!({ "type": "StringLiteral", "value": s }),
        Literal::Boolean(b) => json!({ "type": "BooleanLiteral", "value": b }),
        Literal::Null => json!({ "type": "NullLiteral" }),
        Literal::BigInt(digits) => json!({
            "type": "BigIntLiteral",
            "bigint": digits,
        }),
    }
}

/// Left-nested operator chains are folded with a loop rather than by
/// recursing down the left operand.
fn binary_chain(b: &BinaryExpression) -> Value {
    let mut spine = vec![b];
    let mut last = b;
    while let Expression::Binary(inner) = &*last.left {
        spine.push(inner);
        last = inner;
    }
    let mut left = expression(&last.left);
    for node in spine.into_iter().rev() {
        left = json!({
            "type": if node.operator.is_logical() { "LogicalExpression" } else { "BinaryExpression" },
            "left": left,
            "right": expression(&node.right),
            "operator": node.operator.as_str(),
        });
    }
    left
}

fn property_key(key: &PropertyKey) -> Value {
    match key {
        PropertyKey::Identifier(id) => identifier(id),
        PropertyKey::Computed(expr) => expression(expr),
        PropertyKey::Literal(lit) => literal(lit),
    }
}

/// Serializes an expression.
pub fn expression(expr: &Expression) -> Value {
    match expr {
        Expression::Literal(lit) => literal(lit),
        Expression::Identifier(id) => identifier(id),
        Expression::This => json!({ "type": "ThisExpression" }),
        Expression::Array(a) => json!({
            "type": "ArrayExpression",
            "elements": a.elements.iter().map(|e| opt(e.as_ref(), expression)).collect::<Vec<_>>(),
            "trailingComma": false,
        }),
        Expression::Object(o) => json!({
            "type": "ObjectExpression",
            "properties": list(&o.properties, |p| json!({
                "type": "Property",
                "key": property_key(&p.key),
                "value": expression(&p.value),
                "kind": match p.kind {
                    PropertyKind::Init => "init",
                    PropertyKind::Get => "get",
                    PropertyKind::Set => "set",
                },
                "computed": matches!(p.key, PropertyKey::Computed(_)),
                "method": p.method,
                "shorthand": p.shorthand,
            })),
        }),
        Expression::Binary(b) => binary_chain(b),
        Expression::Unary(u) => json!({
            "type": "UnaryExpression",
            "operator": u.operator.as_str(),
            "argument": expression(&u.argument),
            "prefix": true,
        }),
        Expression::Assignment(a) => json!({
            "type": "AssignmentExpression",
            "operator": a.operator.as_str(),
            "left": expression(&a.left),
            "right": expression(&a.right),
        }),
        Expression::Call(c) => json!({
            "type": "CallExpression",
            "callee": expression(&c.callee),
            "arguments": list(&c.arguments, expression),
        }),
        Expression::Member(m) => json!({
            "type": "MemberExpression",
            "object": expression(&m.object),
            "property": match &m.property {
                MemberProperty::Identifier(id) => identifier(id),
                MemberProperty::Expression(e) => expression(e),
            },
            "computed": m.computed,
        }),
        Expression::Conditional(c) => json!({
            "type": "ConditionalExpression",
            "test": expression(&c.test),
            "alternate": expression(&c.alternate),
            "consequent": expression(&c.consequent),
        }),
        Expression::Function(f) => function_node(
            "FunctionExpression",
            f.id.as_ref(),
            &f.params,
            block(&f.body),
            f.type_parameters.as_ref(),
            f.return_type.as_deref(),
            false,
        ),
        Expression::Arrow(a) => {
            let (body, is_expression) = match &a.body {
                ArrowBody::Expression(e) => (expression(e), true),
                ArrowBody::Block(stmts) => (block(stmts), false),
            };
            function_node(
                "ArrowFunctionExpression",
                None,
                &a.params,
                body,
                None,
                a.return_type.as_deref(),
                is_expression,
            )
        }
        Expression::New(n) => json!({
            "type": "NewExpression",
            "callee": expression(&n.callee),
            "arguments": list(&n.arguments, expression),
        }),
        Expression::Update(u) => json!({
            "type": "UpdateExpression",
            "operator": match u.operator {
                UpdateOperator::Increment => "++",
                UpdateOperator::Decrement => "--",
            },
            "argument": expression(&u.argument),
            "prefix": u.prefix,
        }),
        Expression::Sequence(s) => json!({
            "type": "SequenceExpression",
            "expressions": list(&s.expressions, expression),
        }),
        Expression::TsAs(a) => json!({
            "type": "TSAsExpression",
            "expression": expression(&a.expression),
            "typeAnnotation": ts_type(&a.type_annotation),
        }),
    }
}

fn type_annotation(annotation: &TsTypeAnnotation) -> Value {
    json!({
        "type": "TSTypeAnnotation",
        "typeAnnotation": ts_type(&annotation.type_annotation),
    })
}

fn type_arguments(args: &[TsType]) -> Value {
    json!({
        "type": "TSTypeParameterInstantiation",
        "params": list(args, ts_type),
    })
}

fn type_parameter_declaration(decl: &TsTypeParameterDeclaration) -> Value {
    json!({
        "type": "TSTypeParameterDeclaration",
        "params": list(&decl.params, |p| json!({
            "type": "TSTypeParameter",
            "name": p.name,
            "constraint": opt(p.constraint.as_ref(), ts_type),
            "default": opt(p.default.as_ref(), ts_type),
        })),
    })
}

/// Serializes a type expression.
pub fn ts_type(ty: &TsType) -> Value {
    match ty {
        TsType::Keyword(k) => json!({ "type": k.node_type() }),
        TsType::Reference(r) => json!({
            "type": "TSTypeReference",
            "typeName": identifier(&r.type_name),
            "typeParameters": opt(r.type_parameters.as_ref(), |args| type_arguments(args)),
        }),
        TsType::Union(types) => json!({ "type": "TSUnionType", "types": list(types, ts_type) }),
        TsType::Intersection(types) => json!({
            "type": "TSIntersectionType",
            "types": list(types, ts_type),
        }),
        TsType::Array(element) => json!({ "type": "TSArrayType", "elementType": ts_type(element) }),
        TsType::Function(f) => json!({
            "type": "TSFunctionType",
            "params": list(&f.params, identifier),
            "returnType": ts_type(&f.return_type),
        }),
        TsType::TypeLiteral(lit) => json!({
            "type": "TSTypeLiteral",
            "members": list(&lit.members, type_member),
        }),
        TsType::Literal(lit) => json!({ "type": "TSLiteralType", "literal": literal(lit) }),
    }
}

/// Serializes an object-type member.
pub fn type_member(member: &TsTypeMember) -> Value {
    match member {
        TsTypeMember::Property(p) => json!({
            "type": "TSPropertySignature",
            "key": expression(&p.key),
            "typeAnnotation": opt(p.type_annotation.as_deref(), type_annotation),
            "initializer": opt(p.initializer.as_ref(), expression),
            "optional": p.optional,
            "computed": p.computed,
            "readonly": p.readonly,
            "static": p.is_static,
            "export": p.export,
        }),
        TsTypeMember::Method(m) => json!({
            "type": "TSMethodSignature",
            "key": expression(&m.key),
            "params": list(&m.params, identifier),
            "returnType": opt(m.return_type.as_deref(), type_annotation),
            "computed": m.computed,
        }),
        TsTypeMember::Call(c) => json!({
            "type": "TSCallSignatureDeclaration",
            "params": list(&c.params, identifier),
            "returnType": opt(c.return_type.as_deref(), ts_type),
        }),
        TsTypeMember::Index(i) => json!({
            "type": "TSIndexSignature",
            "parameters": list(&i.parameters, identifier),
            "typeAnnotation": opt(i.type_annotation.as_deref(), type_annotation),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_omits_empty_annotation() {
        let value = identifier(&Identifier::new("x"));
        assert_eq!(value, json!({ "type": "Identifier", "name": "x" }));
    }

    #[test]
    fn test_type_key_comes_first() {
        let program = Program { body: vec![Statement::Empty] };
        let text = serde_json::to_string(&program_to_json(&program)).unwrap();
        assert!(text.starts_with("{\"type\":\"Program\""));
    }

    #[test]
    fn test_numeric_literal_integral_value() {
        let value = literal(&Literal::Number(42.0));
        assert_eq!(value["value"], json!(42));
        assert_eq!(value["raw"], json!("42"));
    }

    #[test]
    fn test_logical_expression_type() {
        let expr = Expression::Binary(BinaryExpression {
            operator: BinaryOperator::LogicalAnd,
            left: Box::new(Expression::Identifier(Identifier::new("a"))),
            right: Box::new(Expression::Identifier(Identifier::new("b"))),
        });
        assert_eq!(expression(&expr)["type"], json!("LogicalExpression"));
    }

    #[test]
    fn test_number_to_js_string() {
        assert_eq!(number_to_js_string(1.0), "1");
        assert_eq!(number_to_js_string(0.5), "0.5");
        assert_eq!(number_to_js_string(-0.0), "0");
        assert_eq!(number_to_js_string(1e21), "1e+21");
        assert_eq!(number_to_js_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_long_operator_chain_nests_left() {
        let source = format!("x{};", " - y".repeat(1000));
        let value = std::thread::Builder::new()
            .stack_size(8 * 1024 * 1024)
            .spawn(move || {
                let program = crate::parser::parse(&source, false).unwrap();
                program_to_json(&program)
            })
            .unwrap()
            .join()
            .unwrap();
        let mut node = &value["body"][0]["expression"];
        for _ in 0..1000 {
            assert_eq!(node["type"], json!("BinaryExpression"));
            assert_eq!(node["operator"], json!("-"));
            assert_eq!(node["right"]["name"], json!("y"));
            node = &node["left"];
        }
        assert_eq!(node["name"], json!("x"));
    }
}
