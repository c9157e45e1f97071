//! Statement and expression grammar.

use crate::ast::*;
use crate::lexer::{Scanner, Span, Token, TokenKind};
use crate::{Error, Result};

/// Deepest recursion the grammar may take: nested statements, parenthesized
/// and unary expressions, member and call chains, and types.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Most binary operators one expression may contain. Operator chains are
/// parsed and lowered with loops, but still form a tree this deep.
pub const MAX_EXPRESSION_OPERATORS: usize = 1024;

/// A recursive descent parser for JavaScript and its typed superset.
pub struct Parser<'a> {
    pub(super) scanner: Scanner<'a>,
    pub(super) current: Token,
    pub(super) typescript: bool,
    /// Set while parsing a `for` initializer, where `in` ends the expression.
    no_in: bool,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for plain JavaScript.
    pub fn new(source: &'a str) -> Self {
        Self::with_mode(source, false)
    }

    /// Creates a new parser that accepts type annotations, type aliases and
    /// interfaces.
    pub fn new_typescript(source: &'a str) -> Self {
        Self::with_mode(source, true)
    }

    /// Creates a parser, choosing the grammar with `typescript`.
    pub fn with_mode(source: &'a str, typescript: bool) -> Self {
        let mut scanner = Scanner::new(source);
        let current = scanner.next_token();
        Self {
            scanner,
            current,
            typescript,
            no_in: false,
            depth: 0,
            operators: 0,
        }
    }

    /// Parses statements until end of input.
    pub fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();

        while !self.is_at_end() {
            body.push(self.parse_statement()?);
        }

        Ok(Program { body })
    }

    /// Parses a single statement.
    pub fn parse_statement(&mut self) -> Result<Statement> {
        self.nested(Self::parse_statement_kind)
    }

    fn parse_statement_kind(&mut self) -> Result<Statement> {
        match &self.current.kind {
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                let decl = self.parse_variable_declaration()?;
                self.consume_semicolon()?;
                Ok(Statement::VariableDeclaration(decl))
            }
            TokenKind::Function => self.parse_function_declaration(),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::Switch => self.parse_switch_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::Do => self.parse_do_while_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Break | TokenKind::Continue => self.parse_jump_statement(),
            TokenKind::Throw => self.parse_throw_statement(),
            TokenKind::Try => self.parse_try_statement(),
            TokenKind::With => self.parse_with_statement(),
            TokenKind::Debugger => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Statement::Debugger)
            }
            TokenKind::LeftBrace => self.parse_block_statement(),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Statement::Empty)
            }
            TokenKind::Export if self.typescript => self.parse_export_declaration(),
            TokenKind::Identifier(word) if self.typescript && self.starts_type_declaration(word) => {
                self.parse_type_declaration()
            }
            TokenKind::Class | TokenKind::Import | TokenKind::Export | TokenKind::Enum => Err(
                self.error(format!("unsupported syntax: '{}'", self.current_text())),
            ),
            _ => self.parse_expression_statement(),
        }
    }

    /// `break` or `continue`, with a label only when it sits on the same line.
    fn parse_jump_statement(&mut self) -> Result<Statement> {
        let is_continue = self.current.kind == TokenKind::Continue;
        self.advance();

        let label = match &self.current.kind {
            TokenKind::Identifier(name) if !self.current.newline_before => {
                let label = Identifier::new(name.clone());
                self.advance();
                Some(label)
            }
            _ => None,
        };
        self.consume_semicolon()?;

        let jump = JumpStatement { label };
        Ok(if is_continue {
            Statement::Continue(jump)
        } else {
            Statement::Break(jump)
        })
    }

    /// `with (object) body`
    fn parse_with_statement(&mut self) -> Result<Statement> {
        self.advance();
        self.expect(&TokenKind::LeftParen)?;
        let object = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = self.parse_statement()?;
        Ok(Statement::With(WithStatement {
            object,
            body: Box::new(body),
        }))
    }

    fn parse_variable_declaration(&mut self) -> Result<VariableDeclaration> {
        let kind = match &self.current.kind {
            TokenKind::Var => VariableKind::Var,
            TokenKind::Let => VariableKind::Let,
            TokenKind::Const => VariableKind::Const,
            _ => return Err(self.error("expected variable keyword")),
        };
        self.advance();

        let mut declarations = Vec::new();

        loop {
            let id = self.parse_binding_identifier(false)?;
            let init = if self.check(&TokenKind::Equal) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };

            declarations.push(VariableDeclarator { id, init });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        Ok(VariableDeclaration { kind, declarations })
    }

    fn parse_function_declaration(&mut self) -> Result<Statement> {
        self.advance();

        let id = self.expect_identifier()?;
        let (params, type_parameters, return_type, body) = self.parse_function_rest()?;

        Ok(Statement::FunctionDeclaration(FunctionDeclaration {
            id,
            params,
            body,
            type_parameters,
            return_type,
        }))
    }

    /// Parses `<T>(params): R { body }` after a function's name.
    #[allow(clippy::type_complexity)]
    fn parse_function_rest(
        &mut self,
    ) -> Result<(
        Vec<Identifier>,
        Option<TsTypeParameterDeclaration>,
        Option<Box<TsTypeAnnotation>>,
        Vec<Statement>,
    )> {
        let type_parameters = if self.typescript && self.check(&TokenKind::LessThan) {
            Some(self.parse_type_parameters()?)
        } else {
            None
        };
        self.expect(&TokenKind::LeftParen)?;
        let params = self.parse_parameters()?;
        let return_type = self.parse_optional_type_annotation()?;
        self.expect(&TokenKind::LeftBrace)?;
        let body = self.parse_function_body()?;
        Ok((params, type_parameters, return_type, body))
    }

    /// Parses a parameter list after `(`, consuming the closing `)`.
    pub(super) fn parse_parameters(&mut self) -> Result<Vec<Identifier>> {
        let mut params = Vec::new();

        while !self.check(&TokenKind::RightParen) {
            params.push(self.parse_binding_identifier(true)?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightParen)?;

        Ok(params)
    }

    /// Parses a binding name with its optional `?` marker and annotation.
    fn parse_binding_identifier(&mut self, allow_optional: bool) -> Result<Identifier> {
        let mut id = self.expect_identifier()?;
        if self.typescript {
            if allow_optional && self.check(&TokenKind::Question) {
                self.advance();
                id.optional = true;
            }
            id.type_annotation = self.parse_optional_type_annotation()?;
        }
        Ok(id)
    }

    /// Parses statements up to and including the closing `}`.
    fn parse_function_body(&mut self) -> Result<Vec<Statement>> {
        let mut body = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RightBrace)?;

        Ok(body)
    }

    fn parse_if_statement(&mut self) -> Result<Statement> {
        self.advance();
        self.expect(&TokenKind::LeftParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.check(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(Statement::If(IfStatement {
            test,
            consequent,
            alternate,
        }))
    }

    fn parse_switch_statement(&mut self) -> Result<Statement> {
        self.advance();
        self.expect(&TokenKind::LeftParen)?;
        let discriminant = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        self.expect(&TokenKind::LeftBrace)?;

        let mut cases = Vec::new();
        let mut seen_default = false;

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let test = if self.check(&TokenKind::Case) {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::Colon)?;
                Some(expr)
            } else if self.check(&TokenKind::Default) {
                if seen_default {
                    return Err(self.error("more than one default clause in switch statement"));
                }
                seen_default = true;
                self.advance();
                self.expect(&TokenKind::Colon)?;
                None
            } else {
                return Err(self.error("expected 'case' or 'default'"));
            };

            let mut consequent = Vec::new();
            while !self.check(&TokenKind::Case)
                && !self.check(&TokenKind::Default)
                && !self.check(&TokenKind::RightBrace)
                && !self.is_at_end()
            {
                consequent.push(self.parse_statement()?);
            }

            cases.push(SwitchCase { test, consequent });
        }

        self.expect(&TokenKind::RightBrace)?;

        Ok(Statement::Switch(SwitchStatement {
            discriminant,
            cases,
        }))
    }

    fn parse_while_statement(&mut self) -> Result<Statement> {
        self.advance();
        self.expect(&TokenKind::LeftParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = Box::new(self.parse_statement()?);

        Ok(Statement::While(WhileStatement { test, body }))
    }

    fn parse_do_while_statement(&mut self) -> Result<Statement> {
        self.advance();
        let body = Box::new(self.parse_statement()?);
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LeftParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        // `do ... while (x)` is always followed by an inserted semicolon
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }

        Ok(Statement::DoWhile(DoWhileStatement { body, test }))
    }

    fn parse_for_statement(&mut self) -> Result<Statement> {
        self.advance();
        self.expect(&TokenKind::LeftParen)?;

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else if matches!(
            self.current.kind,
            TokenKind::Var | TokenKind::Let | TokenKind::Const
        ) {
            let decl = self.without_in(Self::parse_variable_declaration)?;
            if let Some(stmt) = self.parse_for_in_of_rest(|| ForInLeft::Declaration(Box::new(decl.clone())))? {
                return Ok(stmt);
            }
            Some(ForInit::Declaration(Box::new(decl)))
        } else {
            let expr = self.without_in(Self::parse_expression)?;
            if let Some(stmt) = self.parse_for_in_of_rest(|| ForInLeft::Expression(expr.clone()))? {
                return Ok(stmt);
            }
            Some(ForInit::Expression(expr))
        };

        self.expect(&TokenKind::Semicolon)?;
        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;
        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RightParen)?;

        let body = Box::new(self.parse_statement()?);

        Ok(Statement::For(ForStatement {
            init,
            test,
            update,
            body,
        }))
    }

    /// Finishes a `for (left in right)` or `for (left of right)` head when
    /// the current token is `in` or `of`.
    fn parse_for_in_of_rest(&mut self, left: impl FnOnce() -> ForInLeft) -> Result<Option<Statement>> {
        let is_of = self.check_identifier("of");
        if !is_of && !self.check(&TokenKind::In) {
            return Ok(None);
        }
        self.advance();
        let right = if is_of {
            self.parse_assignment()?
        } else {
            self.parse_expression()?
        };
        self.expect(&TokenKind::RightParen)?;
        let body = Box::new(self.parse_statement()?);
        let left = left();

        Ok(Some(if is_of {
            Statement::ForOf(ForOfStatement {
                left,
                right,
                body,
                is_await: false,
            })
        } else {
            Statement::ForIn(ForInStatement { left, right, body })
        }))
    }

    fn without_in<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = std::mem::replace(&mut self.no_in, true);
        let result = f(self);
        self.no_in = saved;
        result
    }

    fn parse_throw_statement(&mut self) -> Result<Statement> {
        self.advance();
        if self.current.newline_before {
            return Err(self.error("illegal newline after throw"));
        }
        let argument = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Statement::Throw(ThrowStatement { argument }))
    }

    fn parse_try_statement(&mut self) -> Result<Statement> {
        self.advance();
        self.expect(&TokenKind::LeftBrace)?;
        let block = self.parse_block_body()?;

        let handler = if self.check(&TokenKind::Catch) {
            self.advance();
            let param = if self.check(&TokenKind::LeftParen) {
                self.advance();
                let id = self.parse_binding_identifier(false)?;
                self.expect(&TokenKind::RightParen)?;
                Some(id)
            } else {
                None
            };
            self.expect(&TokenKind::LeftBrace)?;
            let body = self.parse_block_body()?;
            Some(CatchClause { param, body })
        } else {
            None
        };

        let finalizer = if self.check(&TokenKind::Finally) {
            self.advance();
            self.expect(&TokenKind::LeftBrace)?;
            Some(self.parse_block_body()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("try statement must have catch or finally"));
        }

        Ok(Statement::Try(TryStatement {
            block,
            handler,
            finalizer,
        }))
    }

    fn parse_block_body(&mut self) -> Result<BlockStatement> {
        Ok(BlockStatement {
            body: self.parse_function_body()?,
        })
    }

    fn parse_return_statement(&mut self) -> Result<Statement> {
        self.advance();
        let argument = if self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
            || self.current.newline_before
            || self.is_at_end()
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_semicolon()?;

        Ok(Statement::Return(ReturnStatement { argument }))
    }

    fn parse_block_statement(&mut self) -> Result<Statement> {
        self.advance();
        Ok(Statement::Block(self.parse_block_body()?))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement> {
        // Labeled statement: identifier followed by colon
        if let TokenKind::Identifier(name) = &self.current.kind {
            if self.scanner.peek_token().kind == TokenKind::Colon {
                let label = Identifier::new(name.clone());
                self.advance();
                self.advance();
                let body = self.parse_statement()?;
                return Ok(Statement::Labeled(LabeledStatement {
                    label,
                    body: Box::new(body),
                }));
            }
        }

        let expression = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Statement::Expression(ExpressionStatement { expression }))
    }

    /// Parses an expression, including comma sequences.
    pub fn parse_expression(&mut self) -> Result<Expression> {
        let first = self.parse_assignment()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }

        let mut expressions = vec![first];
        while self.check(&TokenKind::Comma) {
            self.advance();
            expressions.push(self.parse_assignment()?);
        }
        Ok(Expression::Sequence(SequenceExpression { expressions }))
    }

    pub(super) fn parse_assignment(&mut self) -> Result<Expression> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expression> {
        if let Some(arrow) = self.parse_arrow_function()? {
            return Ok(arrow);
        }

        let start = self.current.clone();
        let expr = self.parse_conditional()?;

        let operator = match &self.current.kind {
            TokenKind::Equal => AssignmentOperator::Assign,
            TokenKind::PlusEqual => AssignmentOperator::AddAssign,
            TokenKind::MinusEqual => AssignmentOperator::SubtractAssign,
            TokenKind::StarEqual => AssignmentOperator::MultiplyAssign,
            TokenKind::SlashEqual => AssignmentOperator::DivideAssign,
            TokenKind::PercentEqual => AssignmentOperator::ModuloAssign,
            TokenKind::StarStarEqual => AssignmentOperator::ExponentAssign,
            TokenKind::LeftShiftEqual => AssignmentOperator::LeftShiftAssign,
            TokenKind::RightShiftEqual => AssignmentOperator::RightShiftAssign,
            TokenKind::UnsignedRightShiftEqual => AssignmentOperator::UnsignedRightShiftAssign,
            TokenKind::AmpersandEqual => AssignmentOperator::BitwiseAndAssign,
            TokenKind::PipeEqual => AssignmentOperator::BitwiseOrAssign,
            TokenKind::CaretEqual => AssignmentOperator::BitwiseXorAssign,
            TokenKind::AmpersandAmpersandEqual => AssignmentOperator::LogicalAndAssign,
            TokenKind::PipePipeEqual => AssignmentOperator::LogicalOrAssign,
            TokenKind::QuestionQuestionEqual => AssignmentOperator::NullishCoalescingAssign,
            _ => return Ok(expr),
        };

        if !is_assignment_target(&expr) {
            return Err(self.error_at(&start, "invalid assignment target"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expression::Assignment(AssignmentExpression {
            operator,
            left: Box::new(expr),
            right: Box::new(value),
        }))
    }

    /// Parse conditional (ternary) expression: test ? consequent : alternate
    fn parse_conditional(&mut self) -> Result<Expression> {
        let test = self.parse_nullish()?;

        if self.check(&TokenKind::Question) {
            self.advance();
            let saved = std::mem::replace(&mut self.no_in, false);
            let consequent = self.parse_assignment();
            self.no_in = saved;
            let consequent = consequent?;
            self.expect(&TokenKind::Colon)?;
            let alternate = self.parse_assignment()?;

            return Ok(Expression::Conditional(ConditionalExpression {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            }));
        }

        Ok(test)
    }

    fn parse_nullish(&mut self) -> Result<Expression> {
        let mut left = self.parse_logical_or()?;

        while self.check(&TokenKind::QuestionQuestion) {
            self.advance();
            self.count_operator()?;
            let right = self.parse_logical_or()?;
            left = binary(BinaryOperator::NullishCoalescing, left, right);
        }

        Ok(left)
    }

    fn parse_logical_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_logical_and()?;

        while self.check(&TokenKind::PipePipe) {
            self.advance();
            self.count_operator()?;
            let right = self.parse_logical_and()?;
            left = binary(BinaryOperator::LogicalOr, left, right);
        }

        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_bitwise_or()?;

        while self.check(&TokenKind::AmpersandAmpersand) {
            self.advance();
            self.count_operator()?;
            let right = self.parse_bitwise_or()?;
            left = binary(BinaryOperator::LogicalAnd, left, right);
        }

        Ok(left)
    }

    fn parse_bitwise_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_bitwise_xor()?;

        while self.check(&TokenKind::Pipe) {
            self.advance();
            self.count_operator()?;
            let right = self.parse_bitwise_xor()?;
            left = binary(BinaryOperator::BitwiseOr, left, right);
        }

        Ok(left)
    }

    fn parse_bitwise_xor(&mut self) -> Result<Expression> {
        let mut left = self.parse_bitwise_and()?;

        while self.check(&TokenKind::Caret) {
            self.advance();
            self.count_operator()?;
            let right = self.parse_bitwise_and()?;
            left = binary(BinaryOperator::BitwiseXor, left, right);
        }

        Ok(left)
    }

    fn parse_bitwise_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_equality()?;

        while self.check(&TokenKind::Ampersand) {
            self.advance();
            self.count_operator()?;
            let right = self.parse_equality()?;
            left = binary(BinaryOperator::BitwiseAnd, left, right);
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expression> {
        let mut left = self.parse_comparison()?;

        loop {
            let operator = match &self.current.kind {
                TokenKind::EqualEqual => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::StrictEqual => BinaryOperator::StrictEqual,
                TokenKind::StrictNotEqual => BinaryOperator::StrictNotEqual,
                _ => break,
            };
            self.advance();
            self.count_operator()?;
            let right = self.parse_comparison()?;
            left = binary(operator, left, right);
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut left = self.parse_shift()?;

        loop {
            if self.typescript && self.check_identifier("as") && !self.current.newline_before {
                self.advance();
                self.count_operator()?;
                let type_annotation = self.parse_type()?;
                left = Expression::TsAs(TsAsExpression {
                    expression: Box::new(left),
                    type_annotation,
                });
                continue;
            }
            let operator = match &self.current.kind {
                TokenKind::LessThan => BinaryOperator::LessThan,
                TokenKind::LessThanEqual => BinaryOperator::LessThanEqual,
                TokenKind::GreaterThan => BinaryOperator::GreaterThan,
                TokenKind::GreaterThanEqual => BinaryOperator::GreaterThanEqual,
                TokenKind::In if !self.no_in => BinaryOperator::In,
                TokenKind::Instanceof => BinaryOperator::InstanceOf,
                _ => break,
            };
            self.advance();
            self.count_operator()?;
            let right = self.parse_shift()?;
            left = binary(operator, left, right);
        }

        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expression> {
        let mut left = self.parse_additive()?;

        loop {
            let operator = match &self.current.kind {
                TokenKind::LeftShift => BinaryOperator::LeftShift,
                TokenKind::RightShift => BinaryOperator::RightShift,
                TokenKind::UnsignedRightShift => BinaryOperator::UnsignedRightShift,
                _ => break,
            };
            self.advance();
            self.count_operator()?;
            let right = self.parse_additive()?;
            left = binary(operator, left, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let operator = match &self.current.kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            self.count_operator()?;
            let right = self.parse_multiplicative()?;
            left = binary(operator, left, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.parse_exponent()?;

        loop {
            let operator = match &self.current.kind {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                TokenKind::Percent => BinaryOperator::Modulo,
                _ => break,
            };
            self.advance();
            self.count_operator()?;
            let right = self.parse_exponent()?;
            left = binary(operator, left, right);
        }

        Ok(left)
    }

    /// `**` is right associative and its left operand may not be a bare
    /// unary expression.
    fn parse_exponent(&mut self) -> Result<Expression> {
        let starts_unary = matches!(
            self.current.kind,
            TokenKind::Bang
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Typeof
                | TokenKind::Void
                | TokenKind::Delete
        );
        let left = self.parse_unary()?;

        if self.check(&TokenKind::StarStar) {
            if starts_unary {
                return Err(self.error("unary operator before '**' must be parenthesized"));
            }
            self.advance();
            self.count_operator()?;
            let right = self.nested(Self::parse_exponent)?;
            return Ok(binary(BinaryOperator::Exponent, left, right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let update = match &self.current.kind {
            TokenKind::PlusPlus => Some(UpdateOperator::Increment),
            TokenKind::MinusMinus => Some(UpdateOperator::Decrement),
            _ => None,
        };
        if let Some(operator) = update {
            let start = self.current.clone();
            self.advance();
            let argument = self.nested(Self::parse_unary)?;
            if !is_assignment_target(&argument) {
                return Err(self.error_at(&start, "invalid update target"));
            }
            return Ok(Expression::Update(UpdateExpression {
                operator,
                argument: Box::new(argument),
                prefix: true,
            }));
        }

        let operator = match &self.current.kind {
            TokenKind::Bang => Some(UnaryOperator::LogicalNot),
            TokenKind::Minus => Some(UnaryOperator::Minus),
            TokenKind::Plus => Some(UnaryOperator::Plus),
            TokenKind::Typeof => Some(UnaryOperator::Typeof),
            TokenKind::Void => Some(UnaryOperator::Void),
            TokenKind::Delete => Some(UnaryOperator::Delete),
            TokenKind::Tilde => Some(UnaryOperator::BitwiseNot),
            _ => None,
        };

        if let Some(op) = operator {
            self.advance();
            let argument = self.nested(Self::parse_unary)?;
            return Ok(Expression::Unary(UnaryExpression {
                operator: op,
                argument: Box::new(argument),
            }));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let start = self.current.clone();
        let expr = self.parse_call()?;

        // No line terminator is allowed before a postfix operator
        let operator = match &self.current.kind {
            _ if self.current.newline_before => return Ok(expr),
            TokenKind::PlusPlus => UpdateOperator::Increment,
            TokenKind::MinusMinus => UpdateOperator::Decrement,
            _ => return Ok(expr),
        };
        if !is_assignment_target(&expr) {
            return Err(self.error_at(&start, "invalid update target"));
        }
        self.advance();
        Ok(Expression::Update(UpdateExpression {
            operator,
            argument: Box::new(expr),
            prefix: false,
        }))
    }

    fn parse_call(&mut self) -> Result<Expression> {
        let expr = self.parse_primary()?;
        self.parse_call_tail(expr, true)
    }

    /// Applies member accesses and, when `allow_calls` is set, calls.
    fn parse_call_tail(&mut self, expr: Expression, allow_calls: bool) -> Result<Expression> {
        let depth = self.depth;
        let result = self.parse_call_links(expr, allow_calls);
        self.depth = depth;
        result
    }

    fn parse_call_links(&mut self, mut expr: Expression, allow_calls: bool) -> Result<Expression> {
        loop {
            if matches!(self.current.kind, TokenKind::LeftParen | TokenKind::Dot | TokenKind::LeftBracket) {
                self.deepen()?;
            }
            if allow_calls && self.check(&TokenKind::LeftParen) {
                self.advance();
                let arguments = self.parse_arguments()?;
                expr = Expression::Call(CallExpression {
                    callee: Box::new(expr),
                    arguments,
                });
            } else if self.check(&TokenKind::Dot) {
                self.advance();
                let property = self.expect_property_name()?;
                expr = Expression::Member(MemberExpression {
                    object: Box::new(expr),
                    property: MemberProperty::Identifier(property),
                    computed: false,
                });
            } else if self.check(&TokenKind::LeftBracket) {
                self.advance();
                let saved = std::mem::replace(&mut self.no_in, false);
                let property = self.parse_expression();
                self.no_in = saved;
                let property = property?;
                self.expect(&TokenKind::RightBracket)?;
                expr = Expression::Member(MemberExpression {
                    object: Box::new(expr),
                    property: MemberProperty::Expression(Box::new(property)),
                    computed: true,
                });
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parses call arguments after `(`, consuming the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expression>> {
        let mut args = Vec::new();

        while !self.check(&TokenKind::RightParen) {
            args.push(self.parse_assignment()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightParen)?;

        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        let literal = match &self.current.kind {
            TokenKind::Number(n) => Some(Literal::Number(*n)),
            TokenKind::BigInt(digits) => Some(Literal::BigInt(digits.clone())),
            TokenKind::String(s) => Some(Literal::String(s.clone())),
            TokenKind::True => Some(Literal::Boolean(true)),
            TokenKind::False => Some(Literal::Boolean(false)),
            TokenKind::Null => Some(Literal::Null),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Expression::Literal(literal));
        }

        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let id = Identifier::new(name.clone());
                self.advance();
                Ok(Expression::Identifier(id))
            }
            TokenKind::This => {
                self.advance();
                Ok(Expression::This)
            }
            TokenKind::Function => self.parse_function_expression(),
            TokenKind::LeftParen => {
                self.advance();
                let saved = std::mem::replace(&mut self.no_in, false);
                let expr = self.parse_expression();
                self.no_in = saved;
                let expr = expr?;
                self.expect(&TokenKind::RightParen)?;
                Ok(expr)
            }
            TokenKind::LeftBracket => self.parse_array_literal(),
            TokenKind::LeftBrace => self.parse_object_literal(),
            TokenKind::New => self.parse_new_expression(),
            TokenKind::Eof => Err(self.error("unexpected end of input")),
            TokenKind::Invalid => Err(self.error(format!("invalid token '{}'", self.current_text()))),
            _ => Err(self.error(format!("unexpected token '{}'", self.current_text()))),
        }
    }

    fn parse_function_expression(&mut self) -> Result<Expression> {
        self.advance();

        let id = if let TokenKind::Identifier(name) = &self.current.kind {
            let id = Identifier::new(name.clone());
            self.advance();
            Some(id)
        } else {
            None
        };

        let (params, type_parameters, return_type, body) = self.parse_function_rest()?;

        Ok(Expression::Function(FunctionExpression {
            id,
            params,
            body,
            type_parameters,
            return_type,
        }))
    }

    /// Recognizes `x => ...` and `(params): R => ...`. The parameter list is
    /// parsed speculatively; the body is not, so errors inside it are
    /// reported rather than backtracked.
    fn parse_arrow_function(&mut self) -> Result<Option<Expression>> {
        let head = match &self.current.kind {
            TokenKind::Identifier(name)
                if self.scanner.peek_token().kind == TokenKind::Arrow =>
            {
                let param = Identifier::new(name.clone());
                self.advance();
                Some((vec![param], None))
            }
            TokenKind::LeftParen => self.try_parse(|p| {
                p.advance();
                let params = p.parse_parameters()?;
                let return_type = p.parse_optional_type_annotation()?;
                if !p.check(&TokenKind::Arrow) || p.current.newline_before {
                    return Err(p.error("expected '=>'"));
                }
                Ok((params, return_type))
            }),
            _ => None,
        };

        let Some((params, return_type)) = head else {
            return Ok(None);
        };
        self.advance();

        let body = if self.check(&TokenKind::LeftBrace) {
            self.advance();
            ArrowBody::Block(self.parse_function_body()?)
        } else {
            ArrowBody::Expression(Box::new(self.parse_assignment()?))
        };

        Ok(Some(Expression::Arrow(ArrowFunctionExpression {
            params,
            body,
            return_type,
        })))
    }

    fn parse_new_expression(&mut self) -> Result<Expression> {
        self.advance();

        let callee = if self.check(&TokenKind::New) {
            self.nested(Self::parse_new_expression)?
        } else {
            let primary = self.parse_primary()?;
            self.parse_call_tail(primary, false)?
        };

        // Arguments are optional with 'new'
        let arguments = if self.check(&TokenKind::LeftParen) {
            self.advance();
            self.parse_arguments()?
        } else {
            vec![]
        };

        Ok(Expression::New(NewExpression {
            callee: Box::new(callee),
            arguments,
        }))
    }

    fn parse_array_literal(&mut self) -> Result<Expression> {
        self.advance();
        let mut elements = Vec::new();

        while !self.check(&TokenKind::RightBracket) && !self.is_at_end() {
            if self.check(&TokenKind::Comma) {
                self.advance();
                elements.push(None); // Hole in array
                continue;
            }
            elements.push(Some(self.parse_assignment()?));
            if !self.check(&TokenKind::RightBracket) {
                self.expect(&TokenKind::Comma)?;
            }
        }

        self.expect(&TokenKind::RightBracket)?;

        Ok(Expression::Array(ArrayExpression { elements }))
    }

    fn parse_object_literal(&mut self) -> Result<Expression> {
        self.advance();
        let mut properties = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            properties.push(self.parse_object_property()?);
            if !self.check(&TokenKind::RightBrace) {
                self.expect(&TokenKind::Comma)?;
            }
        }

        self.expect(&TokenKind::RightBrace)?;

        Ok(Expression::Object(ObjectExpression { properties }))
    }

    fn parse_object_property(&mut self) -> Result<Property> {
        // `get`/`set` are accessors unless used as plain keys
        let accessor = match &self.current.kind {
            TokenKind::Identifier(word) if word == "get" || word == "set" => {
                let next = self.scanner.peek_token().kind;
                let is_key = matches!(
                    next,
                    TokenKind::Colon | TokenKind::Comma | TokenKind::RightBrace | TokenKind::LeftParen
                );
                match (is_key, word.as_str()) {
                    (false, "get") => Some(PropertyKind::Get),
                    (false, _) => Some(PropertyKind::Set),
                    _ => None,
                }
            }
            _ => None,
        };
        if accessor.is_some() {
            self.advance();
        }

        let key = self.parse_property_key()?;

        if self.check(&TokenKind::LeftParen) || accessor.is_some() {
            let (params, type_parameters, return_type, body) = self.parse_function_rest()?;
            return Ok(Property {
                key,
                value: Expression::Function(FunctionExpression {
                    id: None,
                    params,
                    body,
                    type_parameters,
                    return_type,
                }),
                shorthand: false,
                method: accessor.is_none(),
                kind: accessor.unwrap_or(PropertyKind::Init),
            });
        }

        if let PropertyKey::Identifier(id) = &key {
            if self.check(&TokenKind::Comma) || self.check(&TokenKind::RightBrace) {
                let value = Expression::Identifier(id.clone());
                return Ok(Property {
                    key,
                    value,
                    shorthand: true,
                    method: false,
                    kind: PropertyKind::Init,
                });
            }
        }

        self.expect(&TokenKind::Colon)?;
        let value = self.parse_assignment()?;
        Ok(Property {
            key,
            value,
            shorthand: false,
            method: false,
            kind: PropertyKind::Init,
        })
    }

    fn parse_property_key(&mut self) -> Result<PropertyKey> {
        let key = match &self.current.kind {
            TokenKind::String(s) => PropertyKey::Literal(Literal::String(s.clone())),
            TokenKind::Number(n) => PropertyKey::Literal(Literal::Number(*n)),
            TokenKind::LeftBracket => {
                self.advance();
                let expr = self.parse_assignment()?;
                self.expect(&TokenKind::RightBracket)?;
                return Ok(PropertyKey::Computed(Box::new(expr)));
            }
            _ => return Ok(PropertyKey::Identifier(self.expect_property_name()?)),
        };
        self.advance();
        Ok(key)
    }


    /// Runs `parse` one nesting level deeper. Chain links and operators
    /// counted inside `parse` are released when it returns, so only the
    /// enclosing path counts toward the limits.
    pub(super) fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let (depth, operators) = (self.depth, self.operators);
        self.deepen()?;
        let result = parse(self);
        self.depth = depth;
        self.operators = operators;
        result
    }

    pub(super) fn deepen(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error("too many nested expressions and statements"));
        }
        Ok(())
    }

    fn count_operator(&mut self) -> Result<()> {
        self.operators += 1;
        if self.operators > MAX_EXPRESSION_OPERATORS {
            return Err(self.error("too many operators in one expression"));
        }
        Ok(())
    }

    pub(super) fn advance(&mut self) {
        self.current = self.scanner.next_token();
    }

    pub(super) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    pub(super) fn check_identifier(&self, name: &str) -> bool {
        matches!(&self.current.kind, TokenKind::Identifier(s) if s == name)
    }

    pub(super) fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found '{}'",
                describe(kind),
                self.current_text()
            )))
        }
    }

    pub(super) fn expect_identifier(&mut self) -> Result<Identifier> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let id = Identifier::new(name.clone());
            self.advance();
            Ok(id)
        } else {
            Err(self.error(format!("expected identifier, found '{}'", self.current_text())))
        }
    }

    /// Identifiers and reserved words are both valid property names.
    pub(super) fn expect_property_name(&mut self) -> Result<Identifier> {
        if let Some(word) = self.current.kind.keyword_text() {
            self.advance();
            return Ok(Identifier::new(word));
        }
        self.expect_identifier()
    }

    /// Automatic semicolon insertion: a `;` is optional before `}`, at the
    /// end of input, and after a line terminator.
    pub(super) fn consume_semicolon(&mut self) -> Result<()> {
        if self.check(&TokenKind::Semicolon) {
            self.advance();
            return Ok(());
        }
        if self.check(&TokenKind::RightBrace) || self.is_at_end() || self.current.newline_before {
            return Ok(());
        }
        Err(self.error(format!("expected ';', found '{}'", self.current_text())))
    }

    /// Runs `f`, rewinding the token stream when it fails.
    pub(super) fn try_parse<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Option<T> {
        let scanner = self.scanner.clone();
        let current = self.current.clone();
        let (no_in, depth, operators) = (self.no_in, self.depth, self.operators);
        match f(self) {
            Ok(value) => Some(value),
            Err(_) => {
                self.scanner = scanner;
                self.current = current;
                self.no_in = no_in;
                self.depth = depth;
                self.operators = operators;
                None
            }
        }
    }

    /// Returns the `n`th token after the current one without consuming
    /// anything.
    pub(super) fn peek_nth(&self, n: usize) -> Token {
        let mut scanner = self.scanner.clone();
        let mut token = self.current.clone();
        for _ in 0..n {
            token = scanner.next_token();
        }
        token
    }

    pub(super) fn is_at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }

    pub(super) fn current_text(&self) -> &'a str {
        if self.is_at_end() {
            "end of input"
        } else {
            self.scanner.slice(self.current.span)
        }
    }

    pub(super) fn error(&self, message: impl Into<String>) -> Error {
        self.error_at(&self.current, message)
    }

    pub(super) fn error_at(&self, token: &Token, message: impl Into<String>) -> Error {
        self.error_at_span(token.span, message)
    }

    fn error_at_span(&self, span: Span, message: impl Into<String>) -> Error {
        let (line, column) = self.scanner.position(span.start);
        Error::Syntax {
            line,
            column,
            message: message.into(),
        }
    }
}

fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::Binary(BinaryExpression {
        operator,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn is_assignment_target(expr: &Expression) -> bool {
    match expr {
        Expression::Identifier(_) | Expression::Member(_) => true,
        Expression::TsAs(as_expr) => is_assignment_target(&as_expr.expression),
        _ => false,
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind.punctuator_text().or_else(|| kind.keyword_text()) {
        Some(text) => format!("'{}'", text),
        None if matches!(kind, TokenKind::Identifier(_)) => "identifier".into(),
        None => "token".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_stmt(src: &str) -> Statement {
        let mut parser = Parser::new(src);
        let program = parser.parse_program().unwrap();
        program.body.into_iter().next().unwrap()
    }

    fn parse_ok(src: &str) -> Program {
        let mut parser = Parser::new(src);
        parser.parse_program().unwrap()
    }

    fn parse_err(src: &str) -> Error {
        let mut parser = Parser::new(src);
        parser.parse_program().unwrap_err()
    }

    fn parse_expr(src: &str) -> Expression {
        match parse_stmt(src) {
            Statement::Expression(stmt) => stmt.expression,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_variable_declaration() {
        let program = parse_ok("let x = 42;");
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_parse_function_declaration() {
        let stmt = parse_stmt("function add(a, b) { return a + b; }");
        let Statement::FunctionDeclaration(f) = stmt else {
            panic!("expected function declaration");
        };
        assert_eq!(f.id.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn test_parse_var_let_const() {
        parse_ok("var x = 1;");
        parse_ok("let y = 2;");
        parse_ok("const z = 3;");
    }

    #[test]
    fn test_parse_multiple_declarations() {
        let Statement::VariableDeclaration(decl) = parse_stmt("let a = 1, b = 2, c;") else {
            panic!("expected declaration");
        };
        assert_eq!(decl.declarations.len(), 3);
        assert!(decl.declarations[2].init.is_none());
    }

    #[test]
    fn test_parse_if_statement() {
        parse_ok("if (x > 0) { y = 1; }");
        parse_ok("if (x) y = 1;");
        parse_ok("if (x) y = 1; else z = 2;");
        parse_ok("if (a) { } else if (b) { } else { }");
    }

    #[test]
    fn test_parse_loops() {
        parse_ok("while (x > 0) { x = x - 1; }");
        parse_ok("do { x = x + 1; } while (x < 10);");
        parse_ok("do x++; while (x < 10) y = 1;");
        parse_ok("for (let i = 0; i < 10; i++) { }");
        parse_ok("for (;;) break;");
        parse_ok("for (i = 0, j = 1; i < n;) { i = i + 1; }");
    }

    #[test]
    fn test_parse_for_in_of() {
        assert!(matches!(parse_stmt("for (var k in o) {}"), Statement::ForIn(_)));
        assert!(matches!(parse_stmt("for (k in o) {}"), Statement::ForIn(_)));
        assert!(matches!(parse_stmt("for (const v of list) {}"), Statement::ForOf(_)));
    }

    #[test]
    fn test_parse_switch_statement() {
        let Statement::Switch(s) =
            parse_stmt("switch (x) { case 1: break; case 2: y = 2; break; default: z = 0; }")
        else {
            panic!("expected switch");
        };
        assert_eq!(s.cases.len(), 3);
        assert!(s.cases[2].test.is_none());
    }

    #[test]
    fn test_parse_duplicate_default_fails() {
        let err = parse_err("switch (x) { default: break; default: break; }");
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_parse_try_catch_finally() {
        parse_ok("try { x = 1; } catch (e) { }");
        parse_ok("try { } finally { cleanup(); }");
        parse_ok("try { } catch (e) { } finally { }");
        parse_err("try { }");
    }

    #[test]
    fn test_parse_labels() {
        let Statement::Labeled(l) = parse_stmt("outer: for (;;) { break outer; }") else {
            panic!("expected labeled statement");
        };
        assert_eq!(l.label.name, "outer");
        parse_ok("a: while (1) { continue a; }");
    }

    #[test]
    fn test_jump_label_must_share_the_line() {
        let body = |src: &str| match parse_stmt(src) {
            Statement::While(w) => match *w.body {
                Statement::Block(b) => b.body,
                other => panic!("expected block, got {:?}", other),
            },
            other => panic!("expected while, got {:?}", other),
        };
        let same_line = body("while (1) { break done; }");
        assert!(matches!(&same_line[0], Statement::Break(j) if j.label.as_ref().unwrap().name == "done"));

        let next_line = body("while (1) { continue\ndone; }");
        assert!(matches!(&next_line[0], Statement::Continue(j) if j.label.is_none()));
        assert!(matches!(next_line[1], Statement::Expression(_)));
    }

    #[test]
    fn test_asi() {
        assert_eq!(parse_ok("let x = 1\nlet y = 2").body.len(), 2);
        assert_eq!(parse_ok("{ x = 1 }").body.len(), 1);
        parse_ok("x = 1");
    }

    #[test]
    fn test_asi_return_newline() {
        let Statement::FunctionDeclaration(f) = parse_stmt("function f() { return\n1; }") else {
            panic!("expected function");
        };
        assert!(matches!(
            &f.body[0],
            Statement::Return(ReturnStatement { argument: None })
        ));
        assert_eq!(f.body.len(), 2);
    }

    #[test]
    fn test_asi_postfix_newline() {
        // `a\n++b` is `a; ++b;`
        assert_eq!(parse_ok("a\n++b").body.len(), 2);
    }

    #[test]
    fn test_parse_error_missing_semicolon() {
        let err = parse_err("let x = 1 let y = 2;");
        let Error::Syntax { line, column, .. } = err else {
            panic!("expected syntax error");
        };
        assert_eq!((line, column), (1, 11));
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_err("let a = 1;\nlet = 42;");
        assert!(matches!(err, Error::Syntax { line: 2, column: 5, .. }));
    }

    #[test]
    fn test_parse_invalid_assignment_target() {
        assert!(matches!(parse_err("1 = 2;"), Error::Syntax { .. }));
        assert!(matches!(parse_err("f()++;"), Error::Syntax { .. }));
    }

    #[test]
    fn test_parse_compound_assignment() {
        let Expression::Assignment(a) = parse_expr("x += 2;") else {
            panic!("expected assignment");
        };
        assert_eq!(a.operator, AssignmentOperator::AddAssign);
        parse_ok("x ??= y; x **= 2; x >>>= 1;");
    }

    #[test]
    fn test_parse_operator_precedence() {
        // 1 + 2 * 3 should parse as 1 + (2 * 3)
        let Expression::Binary(bin) = parse_expr("1 + 2 * 3;") else {
            panic!("expected binary expression");
        };
        assert_eq!(bin.operator, BinaryOperator::Add);
        assert!(matches!(*bin.right, Expression::Binary(ref r) if r.operator == BinaryOperator::Multiply));
    }

    #[test]
    fn test_parse_exponent_right_assoc() {
        let Expression::Binary(bin) = parse_expr("2 ** 3 ** 2;") else {
            panic!("expected binary expression");
        };
        assert_eq!(bin.operator, BinaryOperator::Exponent);
        assert!(matches!(*bin.left, Expression::Literal(Literal::Number(n)) if n == 2.0));
        assert!(parse_err("-2 ** 2;").to_string().contains("parenthesized"));
    }

    #[test]
    fn test_parse_logical_and_nullish() {
        let Expression::Binary(bin) = parse_expr("a || b && c;") else {
            panic!("expected binary expression");
        };
        assert_eq!(bin.operator, BinaryOperator::LogicalOr);
        let Expression::Binary(bin) = parse_expr("a ?? b;") else {
            panic!("expected binary expression");
        };
        assert_eq!(bin.operator, BinaryOperator::NullishCoalescing);
    }

    #[test]
    fn test_parse_unary_operators() {
        parse_ok("-x; +x; !x; ~x; typeof x; void 0; delete o.p;");
    }

    #[test]
    fn test_parse_member_and_call() {
        parse_ok("a.b.c; a[0]; a.b[c].d; a.default; o.new;");
        parse_ok("f(); f(a, b, c); obj.method(); a()();");
    }

    #[test]
    fn test_parse_new_expression() {
        let Expression::New(n) = parse_expr("new a.b.C(1, 2);") else {
            panic!("expected new expression");
        };
        assert_eq!(n.arguments.len(), 2);
        assert!(matches!(*n.callee, Expression::Member(_)));
        let Expression::Member(m) = parse_expr("new Foo().bar;") else {
            panic!("expected member of new");
        };
        assert!(matches!(*m.object, Expression::New(_)));
    }

    #[test]
    fn test_parse_array_literal() {
        let Expression::Array(a) = parse_expr("[1, , 3];") else {
            panic!("expected array");
        };
        assert_eq!(a.elements.len(), 3);
        assert!(a.elements[1].is_none());
    }

    #[test]
    fn test_parse_object_literal() {
        let Statement::VariableDeclaration(decl) =
            parse_stmt("let o = { a: 1, 'b': 2, 3: c, [k]: 4, d, m() { return 1; }, get g() { return 2; } };")
        else {
            panic!("expected declaration");
        };
        let Some(Expression::Object(o)) = &decl.declarations[0].init else {
            panic!("expected object");
        };
        assert_eq!(o.properties.len(), 7);
        assert!(o.properties[4].shorthand);
        assert!(o.properties[5].method);
        assert_eq!(o.properties[6].kind, PropertyKind::Get);
    }

    #[test]
    fn test_parse_get_as_plain_key() {
        parse_ok("let o = { get: 1, set };");
    }

    #[test]
    fn test_parse_arrow_function() {
        parse_ok("let f = () => 42;");
        parse_ok("let f = (a, b) => a + b;");
        parse_ok("let f = x => { return x; };");
        let Expression::Arrow(a) = parse_expr("(a, b) => a;") else {
            panic!("expected arrow");
        };
        assert_eq!(a.params.len(), 2);
    }

    #[test]
    fn test_parse_grouping_is_not_arrow() {
        let Expression::Binary(_) = parse_expr("(a) + b;") else {
            panic!("expected binary");
        };
        let Expression::Sequence(s) = parse_expr("(a, b);") else {
            panic!("expected sequence");
        };
        assert_eq!(s.expressions.len(), 2);
    }

    #[test]
    fn test_parse_function_expression() {
        parse_ok("let f = function() { };");
        parse_ok("let f = function add(a, b) { return a + b; };");
    }

    #[test]
    fn test_parse_literals() {
        parse_ok("42; 3.14; 'hello'; \"world\"; true; false; null; 10n;");
    }

    #[test]
    fn test_use_strict_directive() {
        let program = parse_ok("'use strict'; var x;");
        assert!(has_use_strict(&program.body));
        let program = parse_ok("var x; 'use strict';");
        assert!(!has_use_strict(&program.body));
    }

    #[test]
    fn test_parse_ternary_operator() {
        parse_ok("true ? 1 : 2;");
        parse_ok("x > 0 ? x : -x;");
        parse_ok("a ? b : c ? d : e;");
        parse_ok("let x = a > b ? a : b;");
    }

    #[test]
    fn test_class_is_rejected() {
        assert!(parse_err("class A {}").to_string().contains("unsupported"));
    }

    #[test]
    fn test_parse_empty_program() {
        assert!(parse_ok("").body.is_empty());
        assert_eq!(parse_ok(";;;").body.len(), 3);
    }

    /// Runs `f` on a thread with a generous stack so deep inputs reach the
    /// nesting limit instead of the debug-build stack size.
    fn on_large_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    fn parse_owned(src: String) -> Result<Program> {
        Parser::new(&src).parse_program()
    }

    #[test]
    fn test_nesting_within_limit() {
        let depth = MAX_NESTING_DEPTH / 4;
        let source = format!("x = {}1{};", "(".repeat(depth), ")".repeat(depth));
        assert!(on_large_stack(move || parse_owned(source)).is_ok());
    }

    #[test]
    fn test_deep_parentheses_are_a_syntax_error() {
        let source = format!("x = {}1{};", "(".repeat(10_000), ")".repeat(10_000));
        let err = on_large_stack(move || parse_owned(source)).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
        assert!(err.to_string().contains("too many nested"));
    }

    #[test]
    fn test_deep_unary_and_blocks_are_syntax_errors() {
        for source in [
            format!("x = {}1;", "-".repeat(10_000)),
            format!("x = {}1;", "typeof ".repeat(10_000)),
            format!("{}{}", "{".repeat(10_000), "}".repeat(10_000)),
            format!("{}x;", "if (a) ".repeat(10_000)),
            format!("x = {}y;", "new ".repeat(10_000)),
            format!("x = 2{};", " ** 2".repeat(10_000)),
            format!("x = a{};", ".b".repeat(10_000)),
        ] {
            let err = on_large_stack(move || parse_owned(source)).unwrap_err();
            assert!(matches!(err, Error::Syntax { .. }), "{}", err);
        }
    }

    #[test]
    fn test_nesting_is_released_between_siblings() {
        let chain = format!("a{}", ".b".repeat(MAX_NESTING_DEPTH / 2));
        let unary = format!("{}1", "!".repeat(MAX_NESTING_DEPTH / 2));
        let source = format!("x = [{c}, {c}, {c}]; y = {u} + {u} + {u};", c = chain, u = unary);
        assert!(on_large_stack(move || parse_owned(source)).is_ok());
    }

    #[test]
    fn test_long_operator_chain_parses() {
        let source = format!("x = a{};", " + a".repeat(MAX_EXPRESSION_OPERATORS - 1));
        let program = on_large_stack(move || parse_owned(source)).unwrap();
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_too_many_operators_is_a_syntax_error() {
        let source = format!("x = a{};", " || a".repeat(MAX_EXPRESSION_OPERATORS + 1));
        let err = on_large_stack(move || parse_owned(source)).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
        assert!(err.to_string().contains("too many operators"));
    }

    #[test]
    fn test_operator_count_is_per_expression() {
        let half = format!("a{}", " * a".repeat(MAX_EXPRESSION_OPERATORS / 2));
        let source = format!("x = {h}; y = {h}; f({h}, {h}); z = {h};", h = half);
        assert!(on_large_stack(move || parse_owned(source)).is_ok());
    }
}
