//! Syntax tree produced by the parser.
//!
//! Node and field names follow ESTree so that [`json`] can map them one to
//! one. The tree is built once and then only read: IR generation walks it
//! by reference and never rewrites it.

pub mod json;
mod typescript;

use num_bigint::BigUint;

pub use typescript::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Statement>,
}

/// An identifier. In binding position it may carry a type annotation and
/// the `?` optional marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    /// Type annotation (`x: T`), typed-superset mode only
    pub type_annotation: Option<Box<TsTypeAnnotation>>,
    /// Optional marker (`x?`)
    pub optional: bool,
}

impl Identifier {
    /// Creates a plain identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_annotation: None,
            optional: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(FunctionDeclaration),
    Expression(ExpressionStatement),
    Block(BlockStatement),
    If(IfStatement),
    Switch(SwitchStatement),
    While(WhileStatement),
    DoWhile(DoWhileStatement),
    For(ForStatement),
    ForIn(ForInStatement),
    ForOf(ForOfStatement),
    Return(ReturnStatement),
    Break(JumpStatement),
    Continue(JumpStatement),
    Throw(ThrowStatement),
    Try(TryStatement),
    With(WithStatement),
    Labeled(LabeledStatement),
    Debugger,
    Empty,
    /// `type Name<T> = ...`
    TypeAlias(TsTypeAliasDeclaration),
    /// `interface Name { ... }`
    Interface(TsInterfaceDeclaration),
    /// `export` applied to a type declaration
    Export(ExportNamedDeclaration),
}

/// An `export` wrapping a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportNamedDeclaration {
    pub declaration: Box<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub kind: VariableKind,
    pub declarations: Vec<VariableDeclarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarator {
    pub id: Identifier,
    pub init: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub id: Identifier,
    pub params: Vec<Identifier>,
    pub body: Vec<Statement>,
    pub type_parameters: Option<TsTypeParameterDeclaration>,
    pub return_type: Option<Box<TsTypeAnnotation>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionStatement {
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub test: Expression,
    pub consequent: Box<Statement>,
    pub alternate: Option<Box<Statement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    pub test: Expression,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    pub init: Option<ForInit>,
    pub test: Option<Expression>,
    pub update: Option<Expression>,
    pub body: Box<Statement>,
}

/// `for (init; ...)`
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Declaration(Box<VariableDeclaration>),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStatement {
    pub discriminant: Expression,
    pub cases: Vec<SwitchCase>,
}

/// `case test:` or, with no test, `default:`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expression>,
    pub consequent: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoWhileStatement {
    pub body: Box<Statement>,
    pub test: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForInStatement {
    pub left: ForInLeft,
    pub right: Expression,
    pub body: Box<Statement>,
}

/// `for (left of right)`; `is_await` marks `for await`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForOfStatement {
    pub left: ForInLeft,
    pub right: Expression,
    pub body: Box<Statement>,
    pub is_await: bool,
}

/// Binding side of `for-in` and `for-of`.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInLeft {
    Declaration(Box<VariableDeclaration>),
    Expression(Expression),
}

/// `break` or `continue`, optionally naming a label.
#[derive(Debug, Clone, PartialEq)]
pub struct JumpStatement {
    pub label: Option<Identifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatement {
    pub argument: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrowStatement {
    pub argument: Expression,
}

/// At least one of `handler` and `finalizer` is present.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStatement {
    pub block: BlockStatement,
    pub handler: Option<CatchClause>,
    pub finalizer: Option<BlockStatement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<Identifier>,
    pub body: BlockStatement,
}

/// Parsed so the tree is complete; IR generation rejects it.
#[derive(Debug, Clone, PartialEq)]
pub struct WithStatement {
    pub object: Expression,
    pub body: Box<Statement>,
}

/// `label: body`
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledStatement {
    pub label: Identifier,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Identifier(Identifier),
    This,
    Array(ArrayExpression),
    Object(ObjectExpression),
    Binary(BinaryExpression),
    Unary(UnaryExpression),
    Assignment(AssignmentExpression),
    Call(CallExpression),
    Member(MemberExpression),
    Conditional(ConditionalExpression),
    Function(FunctionExpression),
    Arrow(ArrowFunctionExpression),
    New(NewExpression),
    Update(UpdateExpression),
    Sequence(SequenceExpression),
    /// `expr as T`, typed-superset mode only
    TsAs(TsAsExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    BigInt(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayExpression {
    pub elements: Vec<Option<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExpression {
    pub properties: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: PropertyKey,
    pub value: Expression,
    pub shorthand: bool,
    /// Whether this is method syntax (`f() {}`)
    pub method: bool,
    pub kind: PropertyKind,
}

/// The kind of an object literal property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// `key: value`
    Init,
    /// `get key() {}`
    Get,
    /// `set key(v) {}`
    Set,
}

/// A property key.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Identifier(Identifier),
    Computed(Box<Expression>),
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    pub operator: BinaryOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    LogicalAnd,
    LogicalOr,
    NullishCoalescing,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    pub operator: UnaryOperator,
    pub argument: Box<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// -
    Minus,
    /// +
    Plus,
    /// !
    LogicalNot,
    /// ~
    BitwiseNot,
    Typeof,
    Void,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentExpression {
    pub operator: AssignmentOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,
    ExponentAssign,
    LeftShiftAssign,
    RightShiftAssign,
    UnsignedRightShiftAssign,
    BitwiseAndAssign,
    BitwiseOrAssign,
    BitwiseXorAssign,
    LogicalAndAssign,
    LogicalOrAssign,
    NullishCoalescingAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    pub callee: Box<Expression>,
    pub arguments: Vec<Expression>,
}

/// A member access expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpression {
    pub object: Box<Expression>,
    pub property: MemberProperty,
    pub computed: bool,
}

/// Member property.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    Identifier(Identifier),
    Expression(Box<Expression>),
}

/// A conditional (ternary) expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalExpression {
    pub test: Box<Expression>,
    pub consequent: Box<Expression>,
    pub alternate: Box<Expression>,
}

/// A function expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpression {
    pub id: Option<Identifier>,
    pub params: Vec<Identifier>,
    pub body: Vec<Statement>,
    pub type_parameters: Option<TsTypeParameterDeclaration>,
    pub return_type: Option<Box<TsTypeAnnotation>>,
}

/// An arrow function expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrowFunctionExpression {
    pub params: Vec<Identifier>,
    pub body: ArrowBody,
    pub return_type: Option<Box<TsTypeAnnotation>>,
}

/// Arrow function body.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    Expression(Box<Expression>),
    Block(Vec<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExpression {
    pub callee: Box<Expression>,
    pub arguments: Vec<Expression>,
}

/// An update expression (++/--)
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpression {
    pub operator: UpdateOperator,
    pub argument: Box<Expression>,
    pub prefix: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    /// ++
    Increment,
    /// --
    Decrement,
}

/// A sequence expression (comma operator).
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceExpression {
    pub expressions: Vec<Expression>,
}

/// `expr as T`.
#[derive(Debug, Clone, PartialEq)]
pub struct TsAsExpression {
    pub expression: Box<Expression>,
    pub type_annotation: TsType,
}

impl BinaryOperator {
    /// Source spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Exponent => "**",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::StrictEqual => "===",
            BinaryOperator::StrictNotEqual => "!==",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanEqual => ">=",
            BinaryOperator::LogicalAnd => "&&",
            BinaryOperator::LogicalOr => "||",
            BinaryOperator::NullishCoalescing => "??",
            BinaryOperator::BitwiseAnd => "&",
            BinaryOperator::BitwiseOr => "|",
            BinaryOperator::BitwiseXor => "^",
            BinaryOperator::LeftShift => "<<",
            BinaryOperator::RightShift => ">>",
            BinaryOperator::UnsignedRightShift => ">>>",
            BinaryOperator::In => "in",
            BinaryOperator::InstanceOf => "instanceof",
        }
    }

    /// Short-circuiting operators serialize as `LogicalExpression`.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr | BinaryOperator::NullishCoalescing
        )
    }
}

impl UnaryOperator {
    /// Source spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Minus => "-",
            UnaryOperator::Plus => "+",
            UnaryOperator::LogicalNot => "!",
            UnaryOperator::BitwiseNot => "~",
            UnaryOperator::Typeof => "typeof",
            UnaryOperator::Void => "void",
            UnaryOperator::Delete => "delete",
        }
    }
}

impl AssignmentOperator {
    /// Source spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentOperator::Assign => "=",
            AssignmentOperator::AddAssign => "+=",
            AssignmentOperator::SubtractAssign => "-=",
            AssignmentOperator::MultiplyAssign => "*=",
            AssignmentOperator::DivideAssign => "/=",
            AssignmentOperator::ModuloAssign => "%=",
            AssignmentOperator::ExponentAssign => "**=",
            AssignmentOperator::LeftShiftAssign => "<<=",
            AssignmentOperator::RightShiftAssign => ">>=",
            AssignmentOperator::UnsignedRightShiftAssign => ">>>=",
            AssignmentOperator::BitwiseAndAssign => "&=",
            AssignmentOperator::BitwiseOrAssign => "|=",
            AssignmentOperator::BitwiseXorAssign => "^=",
            AssignmentOperator::LogicalAndAssign => "&&=",
            AssignmentOperator::LogicalOrAssign => "||=",
            AssignmentOperator::NullishCoalescingAssign => "??=",
        }
    }

    /// The binary operator a compound assignment applies, `None` for `=`.
    pub fn binary_operator(&self) -> Option<BinaryOperator> {
        Some(match self {
            AssignmentOperator::Assign => return None,
            AssignmentOperator::AddAssign => BinaryOperator::Add,
            AssignmentOperator::SubtractAssign => BinaryOperator::Subtract,
            AssignmentOperator::MultiplyAssign => BinaryOperator::Multiply,
            AssignmentOperator::DivideAssign => BinaryOperator::Divide,
            AssignmentOperator::ModuloAssign => BinaryOperator::Modulo,
            AssignmentOperator::ExponentAssign => BinaryOperator::Exponent,
            AssignmentOperator::LeftShiftAssign => BinaryOperator::LeftShift,
            AssignmentOperator::RightShiftAssign => BinaryOperator::RightShift,
            AssignmentOperator::UnsignedRightShiftAssign => BinaryOperator::UnsignedRightShift,
            AssignmentOperator::BitwiseAndAssign => BinaryOperator::BitwiseAnd,
            AssignmentOperator::BitwiseOrAssign => BinaryOperator::BitwiseOr,
            AssignmentOperator::BitwiseXorAssign => BinaryOperator::BitwiseXor,
            AssignmentOperator::LogicalAndAssign => BinaryOperator::LogicalAnd,
            AssignmentOperator::LogicalOrAssign => BinaryOperator::LogicalOr,
            AssignmentOperator::NullishCoalescingAssign => BinaryOperator::NullishCoalescing,
        })
    }
}

impl Statement {
    /// Returns true for the `"use strict"` directive.
    pub fn is_use_strict(&self) -> bool {
        matches!(
            self,
            Statement::Expression(ExpressionStatement {
                expression: Expression::Literal(Literal::String(s)),
            }) if s == "use strict"
        )
    }
}

/// Returns true when a function body's directive prologue contains
/// `"use strict"`.
pub fn has_use_strict(body: &[Statement]) -> bool {
    body.iter()
        .take_while(|s| {
            matches!(
                s,
                Statement::Expression(ExpressionStatement {
                    expression: Expression::Literal(Literal::String(_)),
                })
            )
        })
        .any(Statement::is_use_strict)
}

/// Value of BigInt literal digits as the scanner produces them: decimal, or
/// with a lowercase `0x`, `0o` or `0b` prefix.
pub fn bigint_value(digits: &str) -> Option<BigUint> {
    let (radix, body) = match digits.get(..2) {
        Some("0x") => (16, &digits[2..]),
        Some("0o") => (8, &digits[2..]),
        Some("0b") => (2, &digits[2..]),
        _ => (10, digits),
    };
    BigUint::parse_bytes(body.as_bytes(), radix)
}

/// Formats a number the way `Number.prototype.toString` does for the
/// values the compiler folds and prints.
pub fn number_to_js_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{}", n);
    }
    let text = format!("{:e}", n);
    match text.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigint_value_reads_prefixes() {
        assert_eq!(bigint_value("0x1F").unwrap().to_string(), "31");
        assert_eq!(bigint_value("0b101").unwrap().to_string(), "5");
        assert_eq!(bigint_value("12345678901234567890123").unwrap().to_string(), "12345678901234567890123");
        assert!(bigint_value("0x").is_none());
    }

    #[test]
    fn test_number_to_js_string() {
        assert_eq!(number_to_js_string(1.5), "1.5");
        assert_eq!(number_to_js_string(-0.0), "0");
        assert_eq!(number_to_js_string(1e21), "1e+21");
        assert_eq!(number_to_js_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_use_strict_only_in_prologue() {
        let directive = |text: &str| {
            Statement::Expression(ExpressionStatement {
                expression: Expression::Literal(Literal::String(text.into())),
            })
        };
        assert!(has_use_strict(&[directive("other"), directive("use strict")]));
        assert!(!has_use_strict(&[Statement::Empty, directive("use strict")]));
    }
}
