//! Recursive descent over the token stream.
//!
//! Statements and expressions live in `parser`; annotations, type aliases
//! and interfaces are parsed in `typescript` and are only reachable when the
//! parser was created for the typed grammar. Labeled jumps keep their label:
//!
//! ```rust
//! use kestrel_compiler::ast::Statement;
//! use kestrel_compiler::parser::parse;
//!
//! let program = parse("outer: for (;;) { break outer; }", false).unwrap();
//! assert!(matches!(program.body[0], Statement::Labeled(_)));
//! assert!(parse("let n: number = 1;", false).is_err());
//! assert_eq!(parse("type P = { x: number };\nlet n: number = 1;", true).unwrap().body.len(), 2);
//! ```

#[allow(clippy::module_inception)]
mod parser;
mod typescript;

pub use parser::{MAX_EXPRESSION_OPERATORS, MAX_NESTING_DEPTH, Parser};

use crate::Result;
use crate::ast::Program;

/// Parses `source`, selecting the typed-superset grammar with `typescript`.
pub fn parse(source: &str, typescript: bool) -> Result<Program> {
    Parser::with_mode(source, typescript).parse_program()
}
