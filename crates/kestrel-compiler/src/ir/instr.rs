//! Instruction kinds, operands and literals.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::types::Type;
use crate::ast::number_to_js_string;

/// Index of a function in its [`Module`](super::Module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Index of a basic block in its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of an instruction in its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Index of a frame variable in the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

macro_rules! id_index {
    ($($t:ty),*) => {
        $(impl $t {
            /// The id as a vector index.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        })*
    };
}

id_index!(FunctionId, BlockId, InstId, VarId);

/// A compile-time constant.
#[derive(Debug, Clone)]
pub enum Literal {
    Undefined,
    Null,
    /// Internal marker for array holes and unset slots.
    Empty,
    Bool(bool),
    Number(f64),
    String(String),
    /// Decimal digits of a BigInt literal.
    BigInt(String),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Undefined, Literal::Undefined)
            | (Literal::Null, Literal::Null)
            | (Literal::Empty, Literal::Empty) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            // Bitwise so that 0 and -0 stay distinct and NaN equals itself.
            (Literal::Number(a), Literal::Number(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::BigInt(a), Literal::BigInt(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Bool(b) => b.hash(state),
            Literal::Number(n) => n.to_bits().hash(state),
            Literal::String(s) | Literal::BigInt(s) => s.hash(state),
            Literal::Undefined | Literal::Null | Literal::Empty => {}
        }
    }
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Undefined => Type::undefined(),
            Literal::Null => Type::null(),
            Literal::Empty => Type::empty(),
            Literal::Bool(_) => Type::boolean(),
            Literal::Number(_) => Type::number(),
            Literal::String(_) => Type::string(),
            Literal::BigInt(_) => Type::bigint(),
        }
    }

    /// ToBoolean.
    pub fn to_boolean(&self) -> bool {
        match self {
            Literal::Undefined | Literal::Null | Literal::Empty => false,
            Literal::Bool(b) => *b,
            Literal::Number(n) => !(n.is_nan() || *n == 0.0),
            Literal::String(s) => !s.is_empty(),
            Literal::BigInt(digits) => !digits.trim_start_matches('0').is_empty(),
        }
    }

    /// ToNumber, or `None` where the conversion throws (BigInt).
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Literal::Undefined | Literal::Empty => Some(f64::NAN),
            Literal::Null => Some(0.0),
            Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Literal::Number(n) => Some(*n),
            Literal::String(s) => Some(string_to_number(s)),
            Literal::BigInt(_) => None,
        }
    }

    /// ToString.
    pub fn to_js_string(&self) -> String {
        match self {
            Literal::Undefined | Literal::Empty => "undefined".to_string(),
            Literal::Null => "null".to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Number(n) => number_to_js_string(*n),
            Literal::String(s) => s.clone(),
            Literal::BigInt(s) => s.clone(),
        }
    }

    /// `typeof` of the constant.
    pub fn type_of(&self) -> &'static str {
        match self {
            Literal::Undefined | Literal::Empty => "undefined",
            Literal::Null => "object",
            Literal::Bool(_) => "boolean",
            Literal::Number(_) => "number",
            Literal::String(_) => "string",
            Literal::BigInt(_) => "bigint",
        }
    }

    /// Constants that a single short instruction can materialize.
    pub fn is_cheap(&self) -> bool {
        match self {
            Literal::Undefined | Literal::Null | Literal::Empty | Literal::Bool(_) => true,
            Literal::Number(n) => n.fract() == 0.0 && (0.0..256.0).contains(n) && !is_negative_zero(*n),
            _ => false,
        }
    }
}

/// True for `-0`.
pub fn is_negative_zero(n: f64) -> bool {
    n == 0.0 && n.is_sign_negative()
}

/// StringToNumber for the literal forms the folder meets.
pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let radix = |digits: &str, radix: u32| {
        if digits.is_empty() {
            f64::NAN
        } else {
            u64::from_str_radix(digits, radix).map_or(f64::NAN, |v| v as f64)
        }
    };
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return radix(hex, 16);
    }
    if let Some(oct) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        return radix(oct, 8);
    }
    if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        return radix(bin, 2);
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts spellings such as "inf" and "nan" that JS does not.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse().unwrap_or(f64::NAN)
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Undefined => f.write_str("undefined"),
            Literal::Null => f.write_str("null"),
            Literal::Empty => f.write_str("empty"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) if is_negative_zero(*n) => f.write_str("-0"),
            Literal::Number(n) => f.write_str(&number_to_js_string(*n)),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::BigInt(s) => write!(f, "{}n", s),
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Result of another instruction in the same function.
    Inst(InstId),
    Literal(Literal),
    /// Formal parameter; index 0 is `this`.
    Param(u32),
    /// A frame variable.
    Var(VarId),
    /// A function of the module, as referenced by `CreateFunction`.
    Function(FunctionId),
    /// A basic block: branch targets and phi predecessors.
    Block(BlockId),
    /// The global object.
    Global,
    /// A name attached to a stack slot.
    Label(String),
}

impl Value {
    pub fn undefined() -> Self {
        Value::Literal(Literal::Undefined)
    }

    pub fn number(n: f64) -> Self {
        Value::Literal(Literal::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Literal(Literal::String(s.into()))
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Value::Block(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Value::Literal(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Value::Var(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FunctionId> {
        match self {
            Value::Function(f) => Some(*f),
            _ => None,
        }
    }

    /// Property names appear as string literals.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Literal(Literal::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Memory behaviour of an opcode, independent of operand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Computes a value from its operands only.
    Pure,
    /// Reads frame, stack or arguments state but cannot write or throw.
    ReadOnly,
    /// May write memory, throw, or run user code.
    Unknown,
    /// Pure when every operand is a non-BigInt primitive; otherwise a
    /// coercion may call `valueOf` or throw.
    Coercing,
}

macro_rules! opcodes {
    ($($(#[$doc:meta])* $name:ident => $text:literal, $valued:literal, $effect:ident;)*) => {
        /// Every instruction kind.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($(#[$doc])* $name,)*
        }

        impl Opcode {
            /// Name used in IR dumps.
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text,)*
                }
            }

            /// True when the instruction defines a value.
            pub fn has_value(self) -> bool {
                match self {
                    $(Opcode::$name => $valued,)*
                }
            }

            pub fn effect(self) -> Effect {
                match self {
                    $(Opcode::$name => Effect::$effect,)*
                }
            }
        }
    };
}

opcodes! {
    /// `[Param(i)]`
    LoadParam => "LoadParamInst", true, Pure;
    /// `[]`: the environment of the running function.
    CreateScope => "CreateScopeInst", true, Pure;
    /// `[]`: the environment captured by the running closure.
    GetParentScope => "GetParentScopeInst", true, Pure;
    /// `[Function(target), Function(from), scope]`: walks from the
    /// environment of `from` up to the one of `target`.
    ResolveScope => "ResolveScopeInst", true, Pure;
    /// `[scope, Var]`
    LoadFrame => "LoadFrameInst", true, ReadOnly;
    /// `[scope, value, Var]`
    StoreFrame => "StoreFrameInst", false, Unknown;
    /// `[Label]`
    AllocStack => "AllocStackInst", true, Pure;
    /// `[slot]`
    LoadStack => "LoadStackInst", true, ReadOnly;
    /// `[value, slot]`
    StoreStack => "StoreStackInst", false, Unknown;
    /// `[Function, scope]`
    CreateFunction => "CreateFunctionInst", true, Pure;
    /// `[]`: the lazily created arguments object of sloppy code.
    CreateArgumentsLoose => "CreateArgumentsLooseInst", true, Pure;
    /// `[]`
    CreateArgumentsStrict => "CreateArgumentsStrictInst", true, Pure;
    /// `[slot]`: materializes the arguments object into `slot` once.
    HBCReifyArgumentsLoose => "HBCReifyArgumentsLooseInst", false, Unknown;
    /// `[slot]`
    HBCReifyArgumentsStrict => "HBCReifyArgumentsStrictInst", false, Unknown;
    /// `[slot]`
    HBCGetArgumentsLength => "HBCGetArgumentsLengthInst", true, ReadOnly;
    /// `[index, slot]`
    HBCGetArgumentsPropByValLoose => "HBCGetArgumentsPropByValLooseInst", true, Unknown;
    /// `[index, slot]`
    HBCGetArgumentsPropByValStrict => "HBCGetArgumentsPropByValStrictInst", true, Unknown;
    /// `[value]`: asserts the instruction's own type.
    UnionNarrowTrusted => "UnionNarrowTrustedInst", true, Pure;
    /// `[object, property]`
    LoadProperty => "LoadPropertyInst", true, Unknown;
    /// `[value, object, property]`
    StoreProperty => "StorePropertyInst", false, Unknown;
    /// `[Global, name]`: throws when the global does not exist.
    TryLoadGlobalProperty => "TryLoadGlobalPropertyInst", true, Unknown;
    /// `[name]`
    DeclareGlobalVar => "DeclareGlobalVarInst", false, Unknown;
    /// `[object, property]`
    DeleteProperty => "DeletePropertyInst", true, Unknown;
    /// `[]`
    AllocObject => "AllocObjectInst", true, Pure;
    /// `[length, elements...]`: elements are literals, `empty` for holes.
    AllocArray => "AllocArrayInst", true, Pure;
    /// `[callee, this, args...]`
    Call => "CallInst", true, Unknown;
    /// `[callee, this, args...]`
    Construct => "ConstructInst", true, Unknown;
    UnaryMinus => "UnaryMinusInst", true, Coercing;
    UnaryNot => "UnaryNotInst", true, Pure;
    UnaryTypeof => "UnaryTypeofInst", true, Pure;
    UnaryTilde => "UnaryTildeInst", true, Coercing;
    UnaryInc => "UnaryIncInst", true, Coercing;
    UnaryDec => "UnaryDecInst", true, Coercing;
    /// ToNumeric.
    AsNumber => "AsNumberInst", true, Coercing;
    /// ToInt32.
    AsInt32 => "AsInt32Inst", true, Coercing;
    Add => "BinaryAddInst", true, Coercing;
    Subtract => "BinarySubtractInst", true, Coercing;
    Multiply => "BinaryMultiplyInst", true, Coercing;
    Divide => "BinaryDivideInst", true, Coercing;
    Modulo => "BinaryModuloInst", true, Coercing;
    Exponent => "BinaryExponentiationInst", true, Coercing;
    Equal => "BinaryEqualInst", true, Coercing;
    NotEqual => "BinaryNotEqualInst", true, Coercing;
    StrictlyEqual => "BinaryStrictlyEqualInst", true, Pure;
    StrictlyNotEqual => "BinaryStrictlyNotEqualInst", true, Pure;
    LessThan => "BinaryLessThanInst", true, Coercing;
    LessThanOrEqual => "BinaryLessThanOrEqualInst", true, Coercing;
    GreaterThan => "BinaryGreaterThanInst", true, Coercing;
    GreaterThanOrEqual => "BinaryGreaterThanOrEqualInst", true, Coercing;
    LeftShift => "BinaryLeftShiftInst", true, Coercing;
    RightShift => "BinaryRightShiftInst", true, Coercing;
    UnsignedRightShift => "BinaryUnsignedRightShiftInst", true, Coercing;
    BitAnd => "BinaryAndInst", true, Coercing;
    BitOr => "BinaryOrInst", true, Coercing;
    BitXor => "BinaryXorInst", true, Coercing;
    In => "BinaryInInst", true, Unknown;
    InstanceOf => "BinaryInstanceOfInst", true, Unknown;
    FAdd => "FAddInst", true, Pure;
    FSub => "FSubtractInst", true, Pure;
    FMul => "FMultiplyInst", true, Pure;
    FDiv => "FDivideInst", true, Pure;
    FModulo => "FModuloInst", true, Pure;
    FLessThan => "FLessThanInst", true, Pure;
    FLessThanOrEqual => "FLessThanOrEqualInst", true, Pure;
    FGreaterThan => "FGreaterThanInst", true, Pure;
    FGreaterThanOrEqual => "FGreaterThanOrEqualInst", true, Pure;
    FEqual => "FEqualInst", true, Pure;
    FNotEqual => "FNotEqualInst", true, Pure;
    FNegate => "FNegateInst", true, Pure;
    /// `[value]`: register copy.
    Mov => "MovInst", true, Pure;
    /// `[value]`: copy between a spilled and a scratch register.
    HBCSpillMov => "HBCSpillMovInst", true, Pure;
    /// `[value, Block, value, Block, ...]`
    Phi => "PhiInst", true, Pure;
    /// `[Literal]`
    HBCLoadConst => "HBCLoadConstInst", true, Pure;
    /// `[]`
    HBCGetGlobalObject => "HBCGetGlobalObjectInst", true, Pure;
    /// `[]`: the thrown value, first instruction of a handler block.
    Catch => "CatchInst", true, Unknown;
    /// `[Block]`
    Branch => "BranchInst", false, Unknown;
    /// `[cond, Block(true), Block(false)]`
    CondBranch => "CondBranchInst", false, Unknown;
    /// `[value]`
    Return => "ReturnInst", false, Unknown;
    /// `[value]`
    Throw => "ThrowInst", false, Unknown;
    Unreachable => "UnreachableInst", false, Unknown;
    /// `[Block(handler), Block(body)]`: enters a protected region.
    TryStart => "TryStartInst", false, Unknown;
    /// `[Block(handler), Block(next)]`: leaves the region of `handler`.
    TryEnd => "TryEndInst", false, Unknown;
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Branch
                | Opcode::CondBranch
                | Opcode::Return
                | Opcode::Throw
                | Opcode::Unreachable
                | Opcode::TryStart
                | Opcode::TryEnd
        )
    }

    /// Operand positions of a terminator that name successor blocks.
    pub fn successor_operands(self) -> &'static [usize] {
        match self {
            Opcode::Branch => &[0],
            Opcode::CondBranch => &[1, 2],
            Opcode::TryStart => &[0, 1],
            Opcode::TryEnd => &[1],
            _ => &[],
        }
    }

    /// True for the polymorphic binary operators.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Modulo
                | Opcode::Exponent
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::StrictlyEqual
                | Opcode::StrictlyNotEqual
                | Opcode::LessThan
                | Opcode::LessThanOrEqual
                | Opcode::GreaterThan
                | Opcode::GreaterThanOrEqual
                | Opcode::LeftShift
                | Opcode::RightShift
                | Opcode::UnsignedRightShift
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor
                | Opcode::In
                | Opcode::InstanceOf
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Opcode::UnaryMinus
                | Opcode::UnaryNot
                | Opcode::UnaryTypeof
                | Opcode::UnaryTilde
                | Opcode::UnaryInc
                | Opcode::UnaryDec
                | Opcode::AsNumber
                | Opcode::AsInt32
        )
    }

    /// The fixed-width variant used when both operands are numbers.
    pub fn numeric_variant(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Add => Opcode::FAdd,
            Opcode::Subtract => Opcode::FSub,
            Opcode::Multiply => Opcode::FMul,
            Opcode::Divide => Opcode::FDiv,
            Opcode::Modulo => Opcode::FModulo,
            Opcode::LessThan => Opcode::FLessThan,
            Opcode::LessThanOrEqual => Opcode::FLessThanOrEqual,
            Opcode::GreaterThan => Opcode::FGreaterThan,
            Opcode::GreaterThanOrEqual => Opcode::FGreaterThanOrEqual,
            Opcode::Equal | Opcode::StrictlyEqual => Opcode::FEqual,
            Opcode::NotEqual | Opcode::StrictlyNotEqual => Opcode::FNotEqual,
            Opcode::UnaryMinus => Opcode::FNegate,
            _ => return None,
        })
    }

    /// Result type from operand types alone. Instructions whose type
    /// depends on the rest of the module (parameters, frame loads, calls)
    /// get `any` here and are refined by type inference.
    pub fn result_type(self, operands: &[Type]) -> Type {
        let arg = |i: usize| operands.get(i).copied().unwrap_or_else(Type::any);
        let numeric = |tys: &[Type]| {
            if tys.iter().any(|t| t.can_be_bigint()) {
                Type::numeric()
            } else {
                Type::number()
            }
        };
        match self {
            _ if !self.has_value() => Type::none(),
            Opcode::CreateScope | Opcode::GetParentScope | Opcode::ResolveScope => Type::environment(),
            Opcode::CreateFunction => Type::closure(),
            Opcode::CreateArgumentsLoose
            | Opcode::CreateArgumentsStrict
            | Opcode::AllocObject
            | Opcode::AllocArray
            | Opcode::Construct
            | Opcode::HBCGetGlobalObject => Type::object(),
            Opcode::HBCGetArgumentsLength => Type::number(),
            Opcode::DeleteProperty
            | Opcode::UnaryNot
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::StrictlyEqual
            | Opcode::StrictlyNotEqual
            | Opcode::LessThan
            | Opcode::LessThanOrEqual
            | Opcode::GreaterThan
            | Opcode::GreaterThanOrEqual
            | Opcode::In
            | Opcode::InstanceOf
            | Opcode::FLessThan
            | Opcode::FLessThanOrEqual
            | Opcode::FGreaterThan
            | Opcode::FGreaterThanOrEqual
            | Opcode::FEqual
            | Opcode::FNotEqual => Type::boolean(),
            Opcode::UnaryTypeof => Type::string(),
            Opcode::UnaryMinus | Opcode::UnaryTilde | Opcode::UnaryInc | Opcode::UnaryDec => {
                numeric(&[arg(0)])
            }
            Opcode::AsNumber => numeric(&[arg(0)]),
            Opcode::AsInt32 | Opcode::UnsignedRightShift => Type::number(),
            Opcode::Add => {
                let (l, r) = (arg(0), arg(1));
                if l.is_string() || r.is_string() {
                    Type::string()
                } else if l.can_be_string() || r.can_be_string() || l.can_be_object() || r.can_be_object() {
                    Type::string().union(numeric(&[l, r]))
                } else {
                    numeric(&[l, r])
                }
            }
            Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Modulo
            | Opcode::Exponent
            | Opcode::LeftShift
            | Opcode::RightShift
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor => numeric(&[arg(0), arg(1)]),
            Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv
            | Opcode::FModulo
            | Opcode::FNegate => Type::number(),
            Opcode::Mov | Opcode::HBCSpillMov | Opcode::LoadStack => arg(0),
            _ => Type::any(),
        }
    }
}

/// One instruction in a function's arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Opcode,
    pub operands: Vec<Value>,
    /// Result type; [`Type::none`] for instructions without a value.
    pub ty: Type,
    /// Block the instruction currently lives in.
    pub block: BlockId,
    /// Set when the instruction has been removed from its block.
    pub erased: bool,
}

impl Instruction {
    /// Successor blocks named by a terminator, deduplicated in order.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(2);
        for &i in self.op.successor_operands() {
            if let Some(b) = self.operands.get(i).and_then(Value::as_block) {
                if !out.contains(&b) {
                    out.push(b);
                }
            }
        }
        out
    }

    /// `(value, predecessor)` pairs of a phi.
    pub fn phi_entries(&self) -> impl Iterator<Item = (&Value, BlockId)> + '_ {
        self.operands
            .chunks(2)
            .filter_map(|pair| match pair {
                [v, Value::Block(b)] => Some((v, *b)),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_identity() {
        assert_eq!(Literal::Number(f64::NAN), Literal::Number(f64::NAN));
        assert_ne!(Literal::Number(0.0), Literal::Number(-0.0));
        assert_eq!(Literal::Number(-0.0).to_string(), "-0");
        assert_eq!(Literal::String("a\"b".into()).to_string(), "\"a\\\"b\"");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Literal::String(" 12 ".into()).to_number(), Some(12.0));
        assert_eq!(Literal::String("0x10".into()).to_number(), Some(16.0));
        assert!(Literal::String("inf".into()).to_number().is_some_and(f64::is_nan));
        assert_eq!(Literal::Null.to_number(), Some(0.0));
        assert!(!Literal::String(String::new()).to_boolean());
        assert!(Literal::BigInt("10".into()).to_boolean());
        assert_eq!(Literal::Number(1.5).to_js_string(), "1.5");
    }

    #[test]
    fn test_result_types() {
        let any = Type::any();
        assert_eq!(Opcode::Subtract.result_type(&[any, Type::number()]), Type::numeric());
        assert_eq!(
            Opcode::Subtract.result_type(&[Type::undefined().union(Type::object()), Type::number()]),
            Type::number()
        );
        assert_eq!(Opcode::Add.result_type(&[Type::string(), any]), Type::string());
        assert_eq!(Opcode::Add.result_type(&[Type::number(), Type::number()]), Type::number());
        assert_eq!(Opcode::Branch.result_type(&[]), Type::none());
    }

    #[test]
    fn test_successors_dedup() {
        let inst = Instruction {
            op: Opcode::CondBranch,
            operands: vec![
                Value::Literal(Literal::Bool(true)),
                Value::Block(BlockId(1)),
                Value::Block(BlockId(1)),
            ],
            ty: Type::none(),
            block: BlockId(0),
            erased: false,
        };
        assert_eq!(inst.successors(), vec![BlockId(1)]);
    }
}
