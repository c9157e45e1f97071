//! Tokenizer shared by the plain and typed grammars.
//!
//! The scanner is pull-based: the parser asks for one token at a time and
//! clones the scanner when it needs to look further ahead. Words that are
//! only keywords in some positions (`of`, `type`, `interface`, `readonly`,
//! `declare`, `as`) come out as identifiers.
//!
//! ```rust
//! use kestrel_compiler::lexer::{Scanner, TokenKind};
//!
//! let mut scanner = Scanner::new("let x = 42;");
//! assert_eq!(scanner.next_token().kind, TokenKind::Let);
//! assert_eq!(scanner.next_token().kind, TokenKind::Identifier("x".into()));
//! ```

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Span, Token, TokenKind};
