//! Typed-superset grammar: annotations, type expressions, type aliases
//! and interfaces.
//!
//! Types are kept in the tree for `--dump-ast` and otherwise ignored by
//! lowering. Object type members are disambiguated with bounded
//! lookahead:
//!
//! | Source              | Member                        |
//! |---------------------|-------------------------------|
//! | `p: T`, `p?: T`     | property signature            |
//! | `p`                 | property, no annotation       |
//! | `p(a: T): R`        | method signature              |
//! | `(a: T): R`         | call signature                |
//! | `[k: K]: V`         | index signature               |
//! | `[k]`, `[k]: T`     | computed property signature   |

use super::Parser;
use crate::Result;
use crate::ast::*;
use crate::lexer::{Span, Token, TokenKind};

impl<'a> Parser<'a> {
    /// True when the statement starting with the contextual word `word` is
    /// a `type` alias or an `interface`.
    pub(super) fn starts_type_declaration(&self, word: &str) -> bool {
        (word == "type" || word == "interface")
            && matches!(self.scanner.peek_token().kind, TokenKind::Identifier(_))
    }

    /// `type Name<T> = ...;` or `interface Name<T> extends A { ... }`.
    pub(super) fn parse_type_declaration(&mut self) -> Result<Statement> {
        if self.check_identifier("type") {
            self.advance();
            let id = self.expect_identifier()?;
            let type_parameters = self.parse_optional_type_parameters()?;
            self.expect(&TokenKind::Equal)?;
            let type_annotation = self.parse_type()?;
            self.consume_semicolon()?;
            return Ok(Statement::TypeAlias(TsTypeAliasDeclaration {
                id,
                type_parameters,
                type_annotation,
            }));
        }

        self.advance(); // consume 'interface'
        let id = self.expect_identifier()?;
        let type_parameters = self.parse_optional_type_parameters()?;
        let mut extends = Vec::new();
        if self.check(&TokenKind::Extends) {
            self.advance();
            loop {
                extends.push(self.parse_type_reference()?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(&TokenKind::LeftBrace)?;
        let body = self.parse_type_members()?;
        Ok(Statement::Interface(TsInterfaceDeclaration {
            id,
            body,
            extends,
            type_parameters,
        }))
    }

    /// `export type ...` / `export interface ...`.
    pub(super) fn parse_export_declaration(&mut self) -> Result<Statement> {
        let export = self.current.clone();
        self.advance(); // consume 'export'
        let declaration = match &self.current.kind {
            TokenKind::Identifier(word) if self.starts_type_declaration(word) => {
                self.parse_type_declaration()?
            }
            _ => return Err(self.error_at(&export, "unsupported syntax: 'export'")),
        };
        Ok(Statement::Export(ExportNamedDeclaration {
            declaration: Box::new(declaration),
        }))
    }

    /// Parses `: T` when in typed mode and a colon follows.
    pub(super) fn parse_optional_type_annotation(&mut self) -> Result<Option<Box<TsTypeAnnotation>>> {
        if !self.typescript || !self.check(&TokenKind::Colon) {
            return Ok(None);
        }
        self.advance();
        Ok(Some(Box::new(TsTypeAnnotation {
            type_annotation: self.parse_type()?,
        })))
    }

    /// Parses a full type: `A | B`, `A & B`, `T[]` and primaries.
    pub(super) fn parse_type(&mut self) -> Result<TsType> {
        self.nested(Self::parse_union_type)
    }

    fn parse_union_type(&mut self) -> Result<TsType> {
        // A leading `|` is permitted
        if self.check(&TokenKind::Pipe) {
            self.advance();
        }
        let first = self.parse_intersection_type()?;
        if !self.check(&TokenKind::Pipe) {
            return Ok(first);
        }
        let mut types = vec![first];
        while self.check(&TokenKind::Pipe) {
            self.advance();
            types.push(self.parse_intersection_type()?);
        }
        Ok(TsType::Union(types))
    }

    fn parse_intersection_type(&mut self) -> Result<TsType> {
        let first = self.parse_array_type()?;
        if !self.check(&TokenKind::Ampersand) {
            return Ok(first);
        }
        let mut types = vec![first];
        while self.check(&TokenKind::Ampersand) {
            self.advance();
            types.push(self.parse_array_type()?);
        }
        Ok(TsType::Intersection(types))
    }

    fn parse_array_type(&mut self) -> Result<TsType> {
        let mut ty = self.parse_primary_type()?;
        while self.check(&TokenKind::LeftBracket)
            && !self.current.newline_before
            && self.peek_nth(1).kind == TokenKind::RightBracket
        {
            self.advance();
            self.advance();
            ty = TsType::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn parse_primary_type(&mut self) -> Result<TsType> {
        let literal = match &self.current.kind {
            TokenKind::String(s) => Some(Literal::String(s.clone())),
            TokenKind::Number(n) => Some(Literal::Number(*n)),
            TokenKind::True => Some(Literal::Boolean(true)),
            TokenKind::False => Some(Literal::Boolean(false)),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(TsType::Literal(literal));
        }

        match &self.current.kind {
            TokenKind::Minus => {
                self.advance();
                match self.current.kind {
                    TokenKind::Number(n) => {
                        self.advance();
                        Ok(TsType::Literal(Literal::Number(-n)))
                    }
                    _ => Err(self.error("expected number after '-' in type")),
                }
            }
            TokenKind::Void => {
                self.advance();
                Ok(TsType::Keyword(TsKeyword::Void))
            }
            TokenKind::Null => {
                self.advance();
                Ok(TsType::Keyword(TsKeyword::Null))
            }
            TokenKind::LeftBrace => {
                self.advance();
                Ok(TsType::TypeLiteral(TsTypeLiteral {
                    members: self.parse_type_members()?,
                }))
            }
            TokenKind::LeftParen => {
                if let Some(function) = self.try_parse(Self::parse_function_type) {
                    return Ok(function);
                }
                self.advance();
                let ty = self.parse_type()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(ty)
            }
            TokenKind::Identifier(name) => match TsKeyword::from_name(name) {
                Some(keyword) if self.scanner.peek_token().kind != TokenKind::Dot => {
                    self.advance();
                    Ok(TsType::Keyword(keyword))
                }
                _ => Ok(TsType::Reference(self.parse_type_reference()?)),
            },
            _ => Err(self.error(format!("unexpected token '{}' in type", self.current_text()))),
        }
    }

    /// `(a: A, b?: B) => R`
    fn parse_function_type(&mut self) -> Result<TsType> {
        self.expect(&TokenKind::LeftParen)?;
        let params = self.parse_parameters()?;
        self.expect(&TokenKind::Arrow)?;
        let return_type = self.parse_type()?;
        Ok(TsType::Function(TsFunctionType {
            params,
            return_type: Box::new(return_type),
        }))
    }

    /// `Name`, `A.B` or `Name<Args>`.
    fn parse_type_reference(&mut self) -> Result<TsTypeReference> {
        let mut type_name = self.expect_identifier()?;
        while self.check(&TokenKind::Dot) {
            self.advance();
            let member = self.expect_property_name()?;
            type_name.name = format!("{}.{}", type_name.name, member.name);
        }
        let type_parameters = if self.check(&TokenKind::LessThan) && !self.current.newline_before {
            Some(self.parse_type_arguments()?)
        } else {
            None
        };
        Ok(TsTypeReference {
            type_name,
            type_parameters,
        })
    }

    fn parse_type_arguments(&mut self) -> Result<Vec<TsType>> {
        self.expect(&TokenKind::LessThan)?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect_closing_angle()?;
        Ok(args)
    }

    fn parse_optional_type_parameters(&mut self) -> Result<Option<TsTypeParameterDeclaration>> {
        if self.check(&TokenKind::LessThan) {
            Ok(Some(self.parse_type_parameters()?))
        } else {
            Ok(None)
        }
    }

    /// `<T, U extends C = D>`
    pub(super) fn parse_type_parameters(&mut self) -> Result<TsTypeParameterDeclaration> {
        self.expect(&TokenKind::LessThan)?;
        let mut params = Vec::new();
        loop {
            let name = self.expect_identifier()?.name;
            let constraint = if self.check(&TokenKind::Extends) {
                self.advance();
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.check(&TokenKind::Equal) {
                self.advance();
                Some(self.parse_type()?)
            } else {
                None
            };
            params.push(TsTypeParameter {
                name,
                constraint,
                default,
            });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect_closing_angle()?;
        Ok(TsTypeParameterDeclaration { params })
    }

    /// Consumes one `>`, splitting `>>`, `>>>` and `>=` tokens so nested
    /// generic argument lists close correctly.
    fn expect_closing_angle(&mut self) -> Result<()> {
        let rest = match self.current.kind {
            TokenKind::GreaterThan => {
                self.advance();
                return Ok(());
            }
            TokenKind::RightShift => TokenKind::GreaterThan,
            TokenKind::UnsignedRightShift => TokenKind::RightShift,
            TokenKind::GreaterThanEqual => TokenKind::Equal,
            TokenKind::RightShiftEqual => TokenKind::GreaterThanEqual,
            _ => return self.expect(&TokenKind::GreaterThan),
        };
        let span = self.current.span;
        self.current = Token::new(rest, Span::new(span.start + 1, span.end));
        Ok(())
    }

    /// Parses object type members after `{`, consuming the closing `}`.
    pub(super) fn parse_type_members(&mut self) -> Result<Vec<TsTypeMember>> {
        let mut members = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error("unterminated object type"));
            }
            members.push(self.parse_type_member()?);

            if self.check(&TokenKind::Comma) || self.check(&TokenKind::Semicolon) {
                self.advance();
            } else if !self.check(&TokenKind::RightBrace) && !self.current.newline_before {
                return Err(self.error(format!(
                    "expected ',' or ';' between type members, found '{}'",
                    self.current_text()
                )));
            }
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(members)
    }

    /// True when the current word is a member modifier rather than a key.
    fn at_member_modifier(&self, word: &str) -> bool {
        let is_word = match &self.current.kind {
            TokenKind::Static => word == "static",
            TokenKind::Identifier(name) => name == word,
            _ => false,
        };
        is_word
            && !matches!(
                self.scanner.peek_token().kind,
                TokenKind::Colon
                    | TokenKind::Question
                    | TokenKind::LeftParen
                    | TokenKind::Comma
                    | TokenKind::Semicolon
                    | TokenKind::RightBrace
            )
    }

    fn parse_type_member(&mut self) -> Result<TsTypeMember> {
        let mut readonly = false;
        let mut is_static = false;
        loop {
            if self.at_member_modifier("readonly") {
                readonly = true;
            } else if self.at_member_modifier("static") {
                is_static = true;
            } else {
                break;
            }
            self.advance();
        }

        // Call signature: `(params): R`
        if self.check(&TokenKind::LeftParen) {
            self.advance();
            let params = self.parse_parameters()?;
            let return_type = match self.parse_optional_type_annotation()? {
                Some(annotation) => Some(Box::new(annotation.type_annotation)),
                None => None,
            };
            return Ok(TsTypeMember::Call(TsCallSignatureDeclaration {
                params,
                return_type,
            }));
        }

        let (key, computed) = if self.check(&TokenKind::LeftBracket) {
            // Index signature: `[name: K]: V`
            if matches!(self.peek_nth(1).kind, TokenKind::Identifier(_))
                && self.peek_nth(2).kind == TokenKind::Colon
            {
                self.advance();
                let mut parameter = self.expect_identifier()?;
                parameter.type_annotation = self.parse_optional_type_annotation()?;
                self.expect(&TokenKind::RightBracket)?;
                let type_annotation = self.parse_optional_type_annotation()?;
                return Ok(TsTypeMember::Index(TsIndexSignature {
                    parameters: vec![parameter],
                    type_annotation,
                }));
            }
            self.advance();
            let key = self.parse_assignment()?;
            self.expect(&TokenKind::RightBracket)?;
            (key, true)
        } else {
            (self.parse_member_key()?, false)
        };

        let optional = if self.check(&TokenKind::Question) {
            self.advance();
            true
        } else {
            false
        };

        if self.check(&TokenKind::LeftParen) {
            self.advance();
            let params = self.parse_parameters()?;
            let return_type = self.parse_optional_type_annotation()?;
            return Ok(TsTypeMember::Method(TsMethodSignature {
                key,
                params,
                return_type,
                computed,
            }));
        }

        let type_annotation = self.parse_optional_type_annotation()?;
        Ok(TsTypeMember::Property(TsPropertySignature {
            key,
            type_annotation,
            initializer: None,
            optional,
            computed,
            readonly,
            is_static,
            export: false,
        }))
    }

    fn parse_member_key(&mut self) -> Result<Expression> {
        let literal = match &self.current.kind {
            TokenKind::String(s) => Literal::String(s.clone()),
            TokenKind::Number(n) => Literal::Number(*n),
            _ => return Ok(Expression::Identifier(self.expect_property_name()?)),
        };
        self.advance();
        Ok(Expression::Literal(literal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ts(src: &str) -> Program {
        Parser::new_typescript(src).parse_program().unwrap()
    }

    fn alias_members(src: &str) -> Vec<TsTypeMember> {
        match parse_ts(src).body.into_iter().next() {
            Some(Statement::TypeAlias(TsTypeAliasDeclaration {
                type_annotation: TsType::TypeLiteral(lit),
                ..
            })) => lit.members,
            other => panic!("expected type alias of a type literal, got {:?}", other),
        }
    }

    #[test]
    fn test_member_disambiguation() {
        let members = alias_members(
            "type A = { p1: number, p2, p3(a1: number), (a1: number): number, [p4], [p9: number]: number, };",
        );
        assert_eq!(members.len(), 6);
        assert!(matches!(&members[0], TsTypeMember::Property(p) if p.type_annotation.is_some()));
        assert!(matches!(&members[1], TsTypeMember::Property(p) if p.type_annotation.is_none()));
        assert!(matches!(&members[2], TsTypeMember::Method(m) if m.params.len() == 1));
        assert!(matches!(&members[3], TsTypeMember::Call(c) if c.return_type.is_some()));
        assert!(matches!(&members[4], TsTypeMember::Property(p) if p.computed && p.type_annotation.is_none()));
        assert!(matches!(&members[5], TsTypeMember::Index(i) if i.parameters.len() == 1));
    }

    #[test]
    fn test_modifiers_and_optional() {
        let members = alias_members("type A = { readonly a?: string; static b: number; readonly: number }");
        let TsTypeMember::Property(a) = &members[0] else {
            panic!("expected property");
        };
        assert!(a.readonly && a.optional && !a.is_static);
        let TsTypeMember::Property(b) = &members[1] else {
            panic!("expected property");
        };
        assert!(b.is_static);
        let TsTypeMember::Property(c) = &members[2] else {
            panic!("expected property");
        };
        assert!(!c.readonly);
        assert!(matches!(&c.key, Expression::Identifier(id) if id.name == "readonly"));
    }

    #[test]
    fn test_annotations_are_recorded() {
        let program = parse_ts("function f(a: number, b?: string): void { let x: number[] = []; }");
        let Statement::FunctionDeclaration(f) = &program.body[0] else {
            panic!("expected function");
        };
        assert!(f.params[0].type_annotation.is_some());
        assert!(f.params[1].optional);
        assert!(f.return_type.is_some());
    }

    #[test]
    fn test_union_and_generics() {
        let program = parse_ts("type M<T> = Map<string, Array<T>> | null;");
        let Statement::TypeAlias(alias) = &program.body[0] else {
            panic!("expected alias");
        };
        let TsType::Union(types) = &alias.type_annotation else {
            panic!("expected union");
        };
        assert_eq!(types.len(), 2);
        assert!(matches!(&types[0], TsType::Reference(r) if r.type_parameters.as_ref().map(Vec::len) == Some(2)));
    }

    #[test]
    fn test_interface_and_export() {
        let program = parse_ts("export interface I<T> extends Base { x: T; m(): void }\ninterface J {}");
        assert_eq!(program.body.len(), 2);
        let Statement::Export(export) = &program.body[0] else {
            panic!("expected export");
        };
        let Statement::Interface(decl) = export.declaration.as_ref() else {
            panic!("expected interface");
        };
        assert_eq!(decl.extends.len(), 1);
        assert_eq!(decl.body.len(), 2);
    }

    #[test]
    fn test_function_type_and_arrow_return_type() {
        parse_ts("let f: (x: number) => number = (x: number): number => x * 2;");
        parse_ts("let g = (a, b) => a;");
        parse_ts("let h = c ? (d) : e;");
    }

    #[test]
    fn test_as_expression() {
        let program = parse_ts("let y = x as string;");
        let Statement::VariableDeclaration(decl) = &program.body[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(decl.declarations[0].init, Some(Expression::TsAs(_))));
    }

    #[test]
    fn test_type_is_identifier_in_plain_mode() {
        let program = Parser::new("var type = 1; type = 2;").parse_program().unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(Parser::new("type A = number;").parse_program().is_err());
    }
}
