//! Type-level nodes of the typed-superset grammar.
//!
//! Types are parsed and kept in the tree for tooling (`--dump-ast`) but
//! have no effect on code generation.

use super::{Expression, Identifier, Literal};

/// Wrapper node that ESTree places between a binding and its type.
#[derive(Debug, Clone, PartialEq)]
pub struct TsTypeAnnotation {
    /// The annotated type
    pub type_annotation: TsType,
}

/// A type expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TsType {
    /// `number`, `string`, ...
    Keyword(TsKeyword),
    /// `Foo` or `Foo<A, B>`
    Reference(TsTypeReference),
    /// `A | B`
    Union(Vec<TsType>),
    /// `A & B`
    Intersection(Vec<TsType>),
    /// `T[]`
    Array(Box<TsType>),
    /// `(a: A) => R`
    Function(TsFunctionType),
    /// `{ ... }`
    TypeLiteral(TsTypeLiteral),
    /// `"a"`, `1`, `true`
    Literal(Literal),
}

/// Built-in keyword types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsKeyword {
    Any,
    Unknown,
    Number,
    String,
    Boolean,
    BigInt,
    Symbol,
    Object,
    Void,
    Undefined,
    Null,
    Never,
}

impl TsKeyword {
    /// Maps a source word to a keyword type.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "any" => TsKeyword::Any,
            "unknown" => TsKeyword::Unknown,
            "number" => TsKeyword::Number,
            "string" => TsKeyword::String,
            "boolean" => TsKeyword::Boolean,
            "bigint" => TsKeyword::BigInt,
            "symbol" => TsKeyword::Symbol,
            "object" => TsKeyword::Object,
            "void" => TsKeyword::Void,
            "undefined" => TsKeyword::Undefined,
            "null" => TsKeyword::Null,
            "never" => TsKeyword::Never,
            _ => return None,
        })
    }

    /// ESTree node type.
    pub fn node_type(&self) -> &'static str {
        match self {
            TsKeyword::Any => "TSAnyKeyword",
            TsKeyword::Unknown => "TSUnknownKeyword",
            TsKeyword::Number => "TSNumberKeyword",
            TsKeyword::String => "TSStringKeyword",
            TsKeyword::Boolean => "TSBooleanKeyword",
            TsKeyword::BigInt => "TSBigIntKeyword",
            TsKeyword::Symbol => "TSSymbolKeyword",
            TsKeyword::Object => "TSObjectKeyword",
            TsKeyword::Void => "TSVoidKeyword",
            TsKeyword::Undefined => "TSUndefinedKeyword",
            TsKeyword::Null => "TSNullKeyword",
            TsKeyword::Never => "TSNeverKeyword",
        }
    }
}

/// A named type with optional type arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct TsTypeReference {
    /// Referenced name
    pub type_name: Identifier,
    /// `<A, B>`
    pub type_parameters: Option<Vec<TsType>>,
}

/// A function type.
#[derive(Debug, Clone, PartialEq)]
pub struct TsFunctionType {
    /// Parameters with their annotations
    pub params: Vec<Identifier>,
    /// Result type
    pub return_type: Box<TsType>,
}

/// An object type literal.
#[derive(Debug, Clone, PartialEq)]
pub struct TsTypeLiteral {
    /// Members in source order
    pub members: Vec<TsTypeMember>,
}

/// One member of an object type literal or interface body.
#[derive(Debug, Clone, PartialEq)]
pub enum TsTypeMember {
    /// `name?: T`, `[key]: T`, or a bare `name`
    Property(TsPropertySignature),
    /// `name(params): R`
    Method(TsMethodSignature),
    /// `(params): R`
    Call(TsCallSignatureDeclaration),
    /// `[key: K]: V`
    Index(TsIndexSignature),
}

/// A property signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TsPropertySignature {
    /// Key; an arbitrary expression when `computed`
    pub key: Expression,
    /// Type, or `None` for a shorthand member
    pub type_annotation: Option<Box<TsTypeAnnotation>>,
    /// `= value`, accepted for declaration files
    pub initializer: Option<Expression>,
    /// `?`
    pub optional: bool,
    /// `[key]`
    pub computed: bool,
    /// `readonly`
    pub readonly: bool,
    /// `static`
    pub is_static: bool,
    /// `export`
    pub export: bool,
}

/// A method signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TsMethodSignature {
    /// Method name
    pub key: Expression,
    /// Parameters, parsed with the function parameter grammar
    pub params: Vec<Identifier>,
    /// Declared return type
    pub return_type: Option<Box<TsTypeAnnotation>>,
    /// `[key](...)`
    pub computed: bool,
}

/// A call signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TsCallSignatureDeclaration {
    /// Parameters
    pub params: Vec<Identifier>,
    /// Declared return type
    pub return_type: Option<Box<TsType>>,
}

/// An index signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TsIndexSignature {
    /// The bracketed key parameters (usually one)
    pub parameters: Vec<Identifier>,
    /// Value type
    pub type_annotation: Option<Box<TsTypeAnnotation>>,
}

/// `<T extends C = D, ...>`
#[derive(Debug, Clone, PartialEq)]
pub struct TsTypeParameterDeclaration {
    /// The parameters
    pub params: Vec<TsTypeParameter>,
}

/// One generic parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct TsTypeParameter {
    /// Parameter name
    pub name: String,
    /// `extends` bound
    pub constraint: Option<TsType>,
    /// `= default`
    pub default: Option<TsType>,
}

/// `type Name<T> = T`.
#[derive(Debug, Clone, PartialEq)]
pub struct TsTypeAliasDeclaration {
    /// Alias name
    pub id: Identifier,
    /// Generic parameters
    pub type_parameters: Option<TsTypeParameterDeclaration>,
    /// Aliased type
    pub type_annotation: TsType,
}

/// `interface Name<T> extends A, B { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct TsInterfaceDeclaration {
    /// Interface name
    pub id: Identifier,
    /// Members
    pub body: Vec<TsTypeMember>,
    /// Heritage clauses
    pub extends: Vec<TsTypeReference>,
    /// Generic parameters
    pub type_parameters: Option<TsTypeParameterDeclaration>,
}
