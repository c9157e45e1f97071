//! Static types of IR values.
//!
//! A [`Type`] is a set of primitive kinds. Inference only ever unions
//! kinds into a set, so the lattice is the powerset of the kinds below
//! ordered by inclusion, with the empty set meaning "no value".

use std::fmt;

/// A union of value kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Type(u16);

const UNDEFINED: u16 = 1 << 0;
const NULL: u16 = 1 << 1;
const BOOLEAN: u16 = 1 << 2;
const STRING: u16 = 1 << 3;
const NUMBER: u16 = 1 << 4;
const BIGINT: u16 = 1 << 5;
const OBJECT: u16 = 1 << 6;
const CLOSURE: u16 = 1 << 7;
const ENVIRONMENT: u16 = 1 << 8;
const EMPTY: u16 = 1 << 9;

const ANY: u16 = UNDEFINED | NULL | BOOLEAN | STRING | NUMBER | BIGINT | OBJECT | CLOSURE;
const PRIMITIVE: u16 = UNDEFINED | NULL | BOOLEAN | STRING | NUMBER | BIGINT;

const NAMES: [(u16, &str); 10] = [
    (UNDEFINED, "undefined"),
    (NULL, "null"),
    (BOOLEAN, "boolean"),
    (STRING, "string"),
    (NUMBER, "number"),
    (BIGINT, "bigint"),
    (OBJECT, "object"),
    (CLOSURE, "closure"),
    (ENVIRONMENT, "environment"),
    (EMPTY, "empty"),
];

impl Type {
    /// The empty set: instructions that produce no value.
    pub const fn none() -> Self {
        Type(0)
    }

    pub const fn any() -> Self {
        Type(ANY)
    }

    pub const fn undefined() -> Self {
        Type(UNDEFINED)
    }

    pub const fn null() -> Self {
        Type(NULL)
    }

    pub const fn boolean() -> Self {
        Type(BOOLEAN)
    }

    pub const fn string() -> Self {
        Type(STRING)
    }

    pub const fn number() -> Self {
        Type(NUMBER)
    }

    pub const fn bigint() -> Self {
        Type(BIGINT)
    }

    pub const fn object() -> Self {
        Type(OBJECT)
    }

    pub const fn closure() -> Self {
        Type(CLOSURE)
    }

    pub const fn environment() -> Self {
        Type(ENVIRONMENT)
    }

    /// The type of the internal "empty" sentinel (array holes, unset slots).
    pub const fn empty() -> Self {
        Type(EMPTY)
    }

    /// Result of a numeric operator: `number`, or `number|bigint` when an
    /// operand may be a BigInt.
    pub const fn numeric() -> Self {
        Type(NUMBER | BIGINT)
    }

    pub const fn union(self, other: Type) -> Type {
        Type(self.0 | other.0)
    }

    pub const fn intersect(self, other: Type) -> Type {
        Type(self.0 & other.0)
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn is_any(self) -> bool {
        self.0 & ANY == ANY
    }

    /// True when every kind in `self` is also in `other`.
    pub const fn is_subset_of(self, other: Type) -> bool {
        self.0 & !other.0 == 0
    }

    /// True when the value is certainly a number.
    pub const fn is_number(self) -> bool {
        self.0 == NUMBER
    }

    pub const fn is_string(self) -> bool {
        self.0 == STRING
    }

    /// True when no kind in the set can run user code on coercion.
    pub const fn is_primitive(self) -> bool {
        self.0 != 0 && self.0 & !PRIMITIVE == 0
    }

    pub const fn can_be_string(self) -> bool {
        self.0 & STRING != 0
    }

    pub const fn can_be_bigint(self) -> bool {
        self.0 & BIGINT != 0
    }

    pub const fn can_be_object(self) -> bool {
        self.0 & (OBJECT | CLOSURE) != 0
    }

    pub const fn can_be_undefined(self) -> bool {
        self.0 & UNDEFINED != 0
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        if self.0 == ANY {
            return f.write_str("any");
        }
        let mut first = true;
        for (bit, name) in NAMES {
            if self.0 & bit != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::any().to_string(), "any");
        assert_eq!(Type::number().to_string(), "number");
        assert_eq!(
            Type::undefined().union(Type::object()).to_string(),
            "undefined|object"
        );
        assert_eq!(Type::none().to_string(), "none");
    }

    #[test]
    fn test_lattice() {
        let num_str = Type::number().union(Type::string());
        assert!(Type::number().is_subset_of(num_str));
        assert!(!num_str.is_subset_of(Type::number()));
        assert!(num_str.is_primitive());
        assert!(!Type::any().is_primitive());
        assert!(Type::any().can_be_object());
        assert_eq!(num_str.intersect(Type::string()), Type::string());
        assert!(Type::none().is_subset_of(Type::number()));
    }
}
