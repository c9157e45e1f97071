//! Tokens and the fixed word and punctuator tables.

/// Byte range `[start, end)` in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line terminator separates this token from the previous one.
    /// Automatic semicolon insertion keys off this.
    pub newline_before: bool,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self {
            kind,
            span,
            newline_before: false,
        }
    }
}

macro_rules! tokens {
    (
        words { $($word:ident => $wtext:literal,)* }
        punctuators { $($punct:ident => $ptext:literal,)* }
    ) => {
        /// Token kinds. Contextual words such as `of`, `type`, `as` and
        /// `interface` are plain identifiers.
        #[derive(Debug, Clone, PartialEq)]
        pub enum TokenKind {
            Number(f64),
            BigInt(String),
            String(String),
            Identifier(String),
            $($word,)*
            $($punct,)*
            Eof,
            /// Malformed input: unterminated strings, bad escapes, stray characters.
            Invalid,
        }

        impl TokenKind {
            /// The reserved word (or `true`/`false`/`null`) spelled `text`.
            pub fn word(text: &str) -> Option<TokenKind> {
                Some(match text {
                    $($wtext => TokenKind::$word,)*
                    _ => return None,
                })
            }

            /// Spelling of a reserved word. Reserved words are still valid
            /// property names after `.` and in object literals.
            pub fn keyword_text(&self) -> Option<&'static str> {
                Some(match self {
                    $(TokenKind::$word => $wtext,)*
                    _ => return None,
                })
            }

            /// Spelling of an operator or delimiter.
            pub fn punctuator_text(&self) -> Option<&'static str> {
                Some(match self {
                    $(TokenKind::$punct => $ptext,)*
                    _ => return None,
                })
            }
        }

        /// Every punctuator, longest spelling first so a prefix scan
        /// finds the maximal munch.
        pub(crate) fn punctuators() -> Vec<(&'static str, TokenKind)> {
            let mut all = vec![$(($ptext, TokenKind::$punct),)*];
            all.sort_by_key(|(text, _)| std::cmp::Reverse(text.len()));
            all
        }
    };
}

tokens! {
    words {
        Await => "await",
        Break => "break",
        Case => "case",
        Catch => "catch",
        Class => "class",
        Const => "const",
        Continue => "continue",
        Debugger => "debugger",
        Default => "default",
        Delete => "delete",
        Do => "do",
        Else => "else",
        Enum => "enum",
        Export => "export",
        Extends => "extends",
        False => "false",
        Finally => "finally",
        For => "for",
        Function => "function",
        If => "if",
        Import => "import",
        In => "in",
        Instanceof => "instanceof",
        Let => "let",
        New => "new",
        Null => "null",
        Return => "return",
        Static => "static",
        Super => "super",
        Switch => "switch",
        This => "this",
        Throw => "throw",
        True => "true",
        Try => "try",
        Typeof => "typeof",
        Var => "var",
        Void => "void",
        While => "while",
        With => "with",
        Yield => "yield",
    }
    punctuators {
        LeftBrace => "{",
        RightBrace => "}",
        LeftParen => "(",
        RightParen => ")",
        LeftBracket => "[",
        RightBracket => "]",
        Dot => ".",
        Ellipsis => "...",
        Semicolon => ";",
        Comma => ",",
        LessThan => "<",
        GreaterThan => ">",
        LessThanEqual => "<=",
        GreaterThanEqual => ">=",
        EqualEqual => "==",
        NotEqual => "!=",
        StrictEqual => "===",
        StrictNotEqual => "!==",
        Plus => "+",
        Minus => "-",
        Star => "*",
        Slash => "/",
        Percent => "%",
        StarStar => "**",
        PlusPlus => "++",
        MinusMinus => "--",
        LeftShift => "<<",
        RightShift => ">>",
        UnsignedRightShift => ">>>",
        Ampersand => "&",
        Pipe => "|",
        Caret => "^",
        Bang => "!",
        Tilde => "~",
        AmpersandAmpersand => "&&",
        PipePipe => "||",
        QuestionQuestion => "??",
        Question => "?",
        QuestionDot => "?.",
        Colon => ":",
        Equal => "=",
        PlusEqual => "+=",
        MinusEqual => "-=",
        StarEqual => "*=",
        SlashEqual => "/=",
        PercentEqual => "%=",
        StarStarEqual => "**=",
        LeftShiftEqual => "<<=",
        RightShiftEqual => ">>=",
        UnsignedRightShiftEqual => ">>>=",
        AmpersandEqual => "&=",
        PipeEqual => "|=",
        CaretEqual => "^=",
        AmpersandAmpersandEqual => "&&=",
        PipePipeEqual => "||=",
        QuestionQuestionEqual => "??=",
        Arrow => "=>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_table_roundtrip() {
        for text in ["default", "instanceof", "null", "yield"] {
            let kind = TokenKind::word(text).unwrap();
            assert_eq!(kind.keyword_text(), Some(text));
        }
        assert_eq!(TokenKind::word("type"), None);
        assert_eq!(TokenKind::word("of"), None);
    }

    #[test]
    fn test_punctuators_are_longest_first() {
        let table = punctuators();
        let pos = |text: &str| table.iter().position(|(t, _)| *t == text).unwrap();
        assert!(pos(">>>=") < pos(">>>"));
        assert!(pos(">>>") < pos(">>"));
        assert!(pos("...") < pos("."));
        assert!(pos("?.") < pos("?"));
        for (text, kind) in &table {
            assert_eq!(kind.punctuator_text(), Some(*text));
        }
    }

    #[test]
    fn test_non_words_have_no_spelling() {
        assert_eq!(TokenKind::Plus.keyword_text(), None);
        assert_eq!(TokenKind::Identifier("type".into()).keyword_text(), None);
        assert_eq!(TokenKind::If.punctuator_text(), None);
    }

    #[test]
    fn test_span() {
        let span = Span::new(5, 15);
        assert_eq!(span.len(), 10);
        assert!(!span.is_empty());
        assert!(Span::new(3, 3).is_empty());
    }

    #[test]
    fn test_token_new_has_no_newline() {
        let token = Token::new(TokenKind::Semicolon, Span::new(3, 4));
        assert!(!token.newline_before);
    }
}
