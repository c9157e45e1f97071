//! Compiler error taxonomy.
//!
//! Every fallible stage of the pipeline returns [`Result`]. Syntax errors
//! carry a 1-based source position; internal errors and resource-limit
//! errors name the function whose compilation failed.

use thiserror::Error;

/// Errors produced while compiling a unit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed source text.
    #[error("{line}:{column}: SyntaxError: {message}")]
    Syntax {
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// Human readable description
        message: String,
    },

    /// An IR invariant was violated, or lowering met a construct it should
    /// have handled. Always a compiler bug or an unsupported construct.
    #[error("internal compiler error in {function}: {message}")]
    Internal {
        /// Function (or pass) where the violation surfaced
        function: String,
        /// Human readable description
        message: String,
    },

    /// A single function exhausted the register file.
    #[error("resource limit exceeded in {function}: {message}")]
    ResourceLimit {
        /// Function whose compilation failed
        function: String,
        /// Human readable description
        message: String,
    },

    /// Reading sources or writing output failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The configuration could not be loaded or an override was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Builds an [`Error::Internal`].
    pub fn internal(function: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Internal {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Builds an [`Error::ResourceLimit`].
    pub fn resource_limit(function: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ResourceLimit {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the input program rather than the compiler.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::Syntax { .. } | Error::ResourceLimit { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = Error::Syntax {
            line: 3,
            column: 7,
            message: "Expected ';'".into(),
        };
        assert_eq!(err.to_string(), "3:7: SyntaxError: Expected ';'");
        assert!(err.is_user_error());
    }

    #[test]
    fn test_internal_error_names_function() {
        let err = Error::internal("decrementArguments", "dangling phi operand");
        assert!(err.to_string().contains("decrementArguments"));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.js");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(msg) if msg.contains("missing.js")));
    }
}
