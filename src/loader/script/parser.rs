//! Pratt parser producing [`Program`]s.
//!
//! Errors are collected rather than returned; after a failed statement the
//! parser skips to the next line and keeps going.

use std::sync::Arc;

use super::{
    ast::{Block, Expression, Program, Statement},
    error::ScriptError,
    lexer::Lexer,
    precedence::{Precedence, token_precedence},
    token::{Token, TokenType},
};

/// Deepest nesting of blocks, `elif` chains and expressions a program may use.
pub const MAX_NESTING: usize = 256;

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    peek_token: Token,
    depth: usize,
    pub errors: Vec<ScriptError>,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        let mut parser = Parser {
            lexer,
            current_token: Token::new(TokenType::Eof, "", 0, 0),
            peek_token: Token::new(TokenType::Eof, "", 0, 0),
            depth: 0,
            errors: Vec::new(),
        };
        parser.next_token();
        parser.next_token();
        parser
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();

        while !self.is_current_token(TokenType::Eof) {
            match self.current_token.token_type {
                TokenType::Newline => {}
                TokenType::Dedent if !self.errors.is_empty() => {}
                TokenType::Indent | TokenType::Dedent => {
                    self.error_at_current("unexpected indent");
                    self.synchronize();
                }
                _ => match self.parse_statement() {
                    Some(statement) => program.statements.push(statement),
                    None => self.synchronize(),
                },
            }
            self.next_token();
        }
        program
    }

    // Token navigation
    fn next_token(&mut self) {
        self.current_token = std::mem::replace(&mut self.peek_token, self.lexer.next_token());
    }

    fn is_current_token(&self, token_type: TokenType) -> bool {
        self.current_token.token_type == token_type
    }

    fn is_peek_token(&self, token_type: TokenType) -> bool {
        self.peek_token.token_type == token_type
    }

    fn expect_peek(&mut self, token_type: TokenType) -> bool {
        if self.is_peek_token(token_type) {
            self.next_token();
            true
        } else {
            self.peek_error(token_type);
            false
        }
    }

    fn peek_precedence(&self) -> Precedence {
        token_precedence(&self.peek_token.token_type)
    }

    fn synchronize(&mut self) {
        while !self.is_current_token(TokenType::Newline) && !self.is_current_token(TokenType::Eof)
        {
            self.next_token();
        }
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        let entered = self.depth;
        let result = self.descend().and_then(|()| parse(self));
        self.depth = entered;
        result
    }

    fn descend(&mut self) -> Option<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            self.error_at_current("expression nested too deeply");
            return None;
        }
        Some(())
    }

    // Errors
    fn peek_error(&mut self, expected: TokenType) {
        let message = match self.peek_token.token_type {
            TokenType::Illegal => illegal_message(&self.peek_token),
            found => format!("expected `{expected}`, found `{found}`"),
        };
        self.errors
            .push(ScriptError::syntax(self.peek_token.position, message));
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        self.errors
            .push(ScriptError::syntax(self.current_token.position, message));
    }

    // Statements
    fn parse_statement(&mut self) -> Option<Statement> {
        match self.current_token.token_type {
            TokenType::Def => self.parse_def(),
            TokenType::Return => self.parse_return(),
            TokenType::If => self.parse_if(),
            TokenType::From => self.parse_import(),
            TokenType::Pass => {
                if !self.expect_peek(TokenType::Newline) {
                    return None;
                }
                Some(Statement::Pass)
            }
            TokenType::Ident if self.is_peek_token(TokenType::Assign) => self.parse_assign(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_def(&mut self) -> Option<Statement> {
        let position = self.current_token.position;
        if !self.expect_peek(TokenType::Ident) {
            return None;
        }
        let name = self.current_token.literal.clone();
        if !self.expect_peek(TokenType::LParen) {
            return None;
        }
        let params = self.parse_parameters(TokenType::RParen)?;
        if !self.expect_peek(TokenType::Colon) {
            return None;
        }
        let body = self.parse_block()?;
        Some(Statement::Def {
            name,
            params,
            body: Arc::new(body),
            position,
        })
    }

    fn parse_return(&mut self) -> Option<Statement> {
        let position = self.current_token.position;
        if self.is_peek_token(TokenType::Newline) {
            self.next_token();
            return Some(Statement::Return {
                value: None,
                position,
            });
        }
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenType::Newline) {
            return None;
        }
        Some(Statement::Return {
            value: Some(value),
            position,
        })
    }

    /// Handles `if` and, recursively, `elif` chains.
    fn parse_if(&mut self) -> Option<Statement> {
        let position = self.current_token.position;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenType::Colon) {
            return None;
        }
        let consequence = self.parse_block()?;

        let alternative = if self.is_peek_token(TokenType::Elif) {
            self.next_token();
            Some(vec![self.nested(Self::parse_if)?])
        } else if self.is_peek_token(TokenType::Else) {
            self.next_token();
            if !self.expect_peek(TokenType::Colon) {
                return None;
            }
            Some(self.parse_block()?)
        } else {
            None
        };

        Some(Statement::If {
            condition,
            consequence,
            alternative,
            position,
        })
    }

    fn parse_import(&mut self) -> Option<Statement> {
        let position = self.current_token.position;
        if !self.expect_peek(TokenType::Ident) {
            return None;
        }
        let mut path = vec![self.current_token.literal.clone()];
        while self.is_peek_token(TokenType::Dot) {
            self.next_token();
            if !self.expect_peek(TokenType::Ident) {
                return None;
            }
            path.push(self.current_token.literal.clone());
        }

        if !self.expect_peek(TokenType::Import) || !self.expect_peek(TokenType::Ident) {
            return None;
        }
        let mut names = vec![self.current_token.literal.clone()];
        while self.is_peek_token(TokenType::Comma) {
            self.next_token();
            if !self.expect_peek(TokenType::Ident) {
                return None;
            }
            names.push(self.current_token.literal.clone());
        }

        if !self.expect_peek(TokenType::Newline) {
            return None;
        }
        Some(Statement::Import {
            path,
            names,
            position,
        })
    }

    fn parse_assign(&mut self) -> Option<Statement> {
        let position = self.current_token.position;
        let name = self.current_token.literal.clone();
        self.next_token(); // '='
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenType::Newline) {
            return None;
        }
        Some(Statement::Assign {
            name,
            value,
            position,
        })
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let position = self.current_token.position;
        let expression = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenType::Newline) {
            return None;
        }
        Some(Statement::Expression {
            expression,
            position,
        })
    }

    /// `: NEWLINE INDENT statement+ DEDENT`, entered with the colon current.
    /// Leaves the closing `Dedent` current.
    fn parse_block(&mut self) -> Option<Block> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> Option<Block> {
        if !self.expect_peek(TokenType::Newline) || !self.expect_peek(TokenType::Indent) {
            return None;
        }
        self.next_token();

        let mut block = Block::new();
        while !self.is_current_token(TokenType::Dedent) && !self.is_current_token(TokenType::Eof)
        {
            if !self.is_current_token(TokenType::Newline) {
                block.push(self.parse_statement()?);
            }
            self.next_token();
        }
        Some(block)
    }

    fn parse_parameters(&mut self, end: TokenType) -> Option<Vec<String>> {
        let mut params = Vec::new();
        if self.is_peek_token(end) {
            self.next_token();
            return Some(params);
        }

        if !self.expect_peek(TokenType::Ident) {
            return None;
        }
        params.push(self.current_token.literal.clone());
        while self.is_peek_token(TokenType::Comma) {
            self.next_token();
            if !self.expect_peek(TokenType::Ident) {
                return None;
            }
            params.push(self.current_token.literal.clone());
        }

        if !self.expect_peek(end) {
            return None;
        }
        Some(params)
    }

    // Expressions
    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        self.nested(|parser| parser.parse_operators(precedence))
    }

    /// Each infix link nests the tree one level, so chains count too.
    fn parse_operators(&mut self, precedence: Precedence) -> Option<Expression> {
        let mut left = self.parse_prefix()?;

        while precedence < self.peek_precedence() {
            self.descend()?;
            self.next_token();
            left = self.parse_infix(left)?;
        }

        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expression> {
        let token = &self.current_token;
        match token.token_type {
            TokenType::Ident => Some(Expression::Identifier(token.literal.clone())),
            TokenType::Int => match token.literal.parse::<i64>() {
                Ok(value) => Some(Expression::Integer(value)),
                Err(_) => {
                    let message = format!("integer literal `{}` is out of range", token.literal);
                    self.error_at_current(message);
                    None
                }
            },
            TokenType::Float => match token.literal.parse::<f64>() {
                Ok(value) => Some(Expression::Float(value)),
                Err(_) => {
                    let message = format!("invalid float literal `{}`", token.literal);
                    self.error_at_current(message);
                    None
                }
            },
            TokenType::String => Some(Expression::String(token.literal.clone())),
            TokenType::True => Some(Expression::Boolean(true)),
            TokenType::False => Some(Expression::Boolean(false)),
            TokenType::None => Some(Expression::None),
            TokenType::Minus => self.parse_prefix_expression("-", Precedence::Prefix),
            TokenType::Not => self.parse_prefix_expression("not", Precedence::Not),
            TokenType::LParen => self.parse_grouped_expression(),
            TokenType::LBracket => {
                let items = self.parse_expression_list(TokenType::RBracket)?;
                Some(Expression::List(items))
            }
            TokenType::LBrace => self.parse_dict(),
            TokenType::Lambda => self.parse_lambda(),
            TokenType::Illegal => {
                let message = illegal_message(token);
                self.error_at_current(message);
                None
            }
            found => {
                self.error_at_current(format!("unexpected `{found}`"));
                None
            }
        }
    }

    fn parse_infix(&mut self, left: Expression) -> Option<Expression> {
        match self.current_token.token_type {
            TokenType::LParen => {
                let arguments = self.parse_expression_list(TokenType::RParen)?;
                Some(Expression::Call {
                    function: Box::new(left),
                    arguments,
                })
            }
            TokenType::LBracket => {
                self.next_token();
                let index = self.parse_expression(Precedence::Lowest)?;
                if !self.expect_peek(TokenType::RBracket) {
                    return None;
                }
                Some(Expression::Index {
                    left: Box::new(left),
                    index: Box::new(index),
                })
            }
            _ => {
                let operator = self.current_token.literal.clone();
                let precedence = token_precedence(&self.current_token.token_type);
                self.next_token();
                let right = self.parse_expression(precedence)?;
                Some(Expression::Infix {
                    left: Box::new(left),
                    operator,
                    right: Box::new(right),
                })
            }
        }
    }

    fn parse_prefix_expression(
        &mut self,
        operator: &str,
        precedence: Precedence,
    ) -> Option<Expression> {
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Expression::Prefix {
            operator: operator.to_string(),
            right: Box::new(right),
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Expression> {
        self.next_token();
        let expression = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenType::RParen) {
            return None;
        }
        Some(expression)
    }

    fn parse_expression_list(&mut self, end: TokenType) -> Option<Vec<Expression>> {
        let mut items = Vec::new();
        if self.is_peek_token(end) {
            self.next_token();
            return Some(items);
        }

        self.next_token();
        items.push(self.parse_expression(Precedence::Lowest)?);
        while self.is_peek_token(TokenType::Comma) {
            self.next_token();
            if self.is_peek_token(end) {
                break;
            }
            self.next_token();
            items.push(self.parse_expression(Precedence::Lowest)?);
        }

        if !self.expect_peek(end) {
            return None;
        }
        Some(items)
    }

    fn parse_dict(&mut self) -> Option<Expression> {
        let mut pairs = Vec::new();
        while !self.is_peek_token(TokenType::RBrace) {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;
            if !self.expect_peek(TokenType::Colon) {
                return None;
            }
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if !self.is_peek_token(TokenType::Comma) {
                break;
            }
            self.next_token();
        }

        if !self.expect_peek(TokenType::RBrace) {
            return None;
        }
        Some(Expression::Dict(pairs))
    }

    fn parse_lambda(&mut self) -> Option<Expression> {
        let params = self.parse_parameters(TokenType::Colon)?;
        self.next_token();
        let body = self.parse_expression(Precedence::Lowest)?;
        Some(Expression::Lambda {
            params,
            body: Arc::new(body),
        })
    }
}

fn illegal_message(token: &Token) -> String {
    if token.literal.chars().count() == 1 {
        format!("illegal character `{}`", token.literal)
    } else {
        token.literal.clone()
    }
}

/// Parses `source`, returning the first syntax error if there is one.
pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let mut parser = Parser::new(Lexer::new(source));
    let program = parser.parse_program();
    match parser.errors.into_iter().next() {
        Some(error) => Err(error),
        None => Ok(program),
    }
}
