//! Tokenizer for the script runtime.
//!
//! Indentation is significant: the lexer keeps a stack of indentation widths
//! and emits `Indent`/`Dedent` tokens at the start of logical lines. Newlines
//! inside brackets are ignored. Blank and comment-only lines never produce
//! tokens.

use std::collections::VecDeque;

use super::token::{Token, TokenType, lookup_ident};

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    read_position: usize,
    current_char: Option<char>,
    line: usize,
    column: usize,
    indents: Vec<usize>,
    pending: VecDeque<Token>,
    at_line_start: bool,
    nesting: usize,
    last: TokenType,
}

impl Lexer {
    pub fn new(input: impl Into<String>) -> Self {
        let mut lexer = Self {
            input: input.into().chars().collect(),
            position: 0,
            read_position: 0,
            current_char: None,
            line: 1,
            column: 1,
            indents: vec![0],
            pending: VecDeque::new(),
            at_line_start: true,
            nesting: 0,
            last: TokenType::Newline,
        };
        lexer.read_char();
        lexer
    }

    pub fn next_token(&mut self) -> Token {
        let token = self.produce();
        self.last = token.token_type;
        token
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.token_type == TokenType::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn produce(&mut self) -> Token {
        if let Some(token) = self.pending.pop_front() {
            return token;
        }
        if self.at_line_start {
            self.at_line_start = false;
            self.read_indentation();
            if let Some(token) = self.pending.pop_front() {
                return token;
            }
        }

        self.skip_ignorable();

        let line = self.line;
        let col = self.column;

        let token = match self.current_char {
            None => return self.end_of_input(),
            Some('\n') => {
                self.read_char();
                if self.nesting > 0 {
                    return self.produce();
                }
                self.at_line_start = true;
                return Token::new(TokenType::Newline, "\\n", line, col);
            }

            // Two-character operators
            Some('=') if self.peek_char() == Some('=') => {
                self.read_char();
                Token::new(TokenType::Eq, "==", line, col)
            }
            Some('!') if self.peek_char() == Some('=') => {
                self.read_char();
                Token::new(TokenType::NotEq, "!=", line, col)
            }
            Some('<') if self.peek_char() == Some('=') => {
                self.read_char();
                Token::new(TokenType::Lte, "<=", line, col)
            }
            Some('>') if self.peek_char() == Some('=') => {
                self.read_char();
                Token::new(TokenType::Gte, ">=", line, col)
            }

            Some('=') => Token::new(TokenType::Assign, "=", line, col),
            Some('+') => Token::new(TokenType::Plus, "+", line, col),
            Some('-') => Token::new(TokenType::Minus, "-", line, col),
            Some('*') => Token::new(TokenType::Asterisk, "*", line, col),
            Some('/') => Token::new(TokenType::Slash, "/", line, col),
            Some('%') => Token::new(TokenType::Percent, "%", line, col),
            Some('<') => Token::new(TokenType::Lt, "<", line, col),
            Some('>') => Token::new(TokenType::Gt, ">", line, col),
            Some(',') => Token::new(TokenType::Comma, ",", line, col),
            Some(':') => Token::new(TokenType::Colon, ":", line, col),
            Some('.') => Token::new(TokenType::Dot, ".", line, col),

            Some(c @ ('(' | '[' | '{')) => {
                self.nesting += 1;
                let token_type = match c {
                    '(' => TokenType::LParen,
                    '[' => TokenType::LBracket,
                    _ => TokenType::LBrace,
                };
                Token::new(token_type, c.to_string(), line, col)
            }
            Some(c @ (')' | ']' | '}')) => {
                self.nesting = self.nesting.saturating_sub(1);
                let token_type = match c {
                    ')' => TokenType::RParen,
                    ']' => TokenType::RBracket,
                    _ => TokenType::RBrace,
                };
                Token::new(token_type, c.to_string(), line, col)
            }

            Some(quote @ ('"' | '\'')) => return self.read_string(quote, line, col),

            Some(ch) if is_letter(ch) => {
                let ident = self.read_identifier();
                return Token::new(lookup_ident(&ident), ident, line, col);
            }

            Some(ch) if ch.is_ascii_digit() => {
                let (number, is_float) = self.read_number();
                let token_type = if is_float {
                    TokenType::Float
                } else {
                    TokenType::Int
                };
                return Token::new(token_type, number, line, col);
            }

            Some(ch) => Token::new(TokenType::Illegal, ch.to_string(), line, col),
        };

        self.read_char();
        token
    }

    fn read_char(&mut self) {
        if self.current_char == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else if self.current_char.is_some() {
            self.column += 1;
        }

        self.current_char = self.input.get(self.read_position).copied();
        self.position = self.read_position;
        self.read_position += 1;
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.read_position).copied()
    }

    fn skip_comment(&mut self) {
        while !matches!(self.current_char, None | Some('\n')) {
            self.read_char();
        }
    }

    fn skip_ignorable(&mut self) {
        loop {
            match self.current_char {
                Some(' ' | '\t' | '\r') => self.read_char(),
                Some('#') => self.skip_comment(),
                Some('\\') if self.peek_char() == Some('\n') => {
                    self.read_char();
                    self.read_char();
                }
                _ => break,
            }
        }
    }

    /// Measures the indentation of the next non-blank line and queues the
    /// matching `Indent`/`Dedent` tokens.
    fn read_indentation(&mut self) {
        loop {
            let mut width = 0;
            while let Some(c @ (' ' | '\t')) = self.current_char {
                width += if c == '\t' { TAB_WIDTH - width % TAB_WIDTH } else { 1 };
                self.read_char();
            }

            if self.current_char == Some('#') {
                self.skip_comment();
            }
            if self.current_char == Some('\r') && self.peek_char() == Some('\n') {
                self.read_char();
            }

            match self.current_char {
                Some('\n') => self.read_char(),
                None => return,
                _ => {
                    self.indent_to(width);
                    return;
                }
            }
        }
    }

    fn indent_to(&mut self, width: usize) {
        let line = self.line;
        let current = self.indents.last().copied().unwrap_or(0);

        if width > current {
            self.indents.push(width);
            self.pending
                .push_back(Token::new(TokenType::Indent, "", line, 1));
            return;
        }

        while self.indents.last().is_some_and(|&top| top > width) {
            self.indents.pop();
            self.pending
                .push_back(Token::new(TokenType::Dedent, "", line, 1));
        }
        if self.indents.last().copied() != Some(width) {
            self.indents.push(width);
            self.pending.push_back(Token::new(
                TokenType::Illegal,
                "unindent does not match any outer indentation level",
                line,
                1,
            ));
        }
    }

    fn end_of_input(&mut self) -> Token {
        let (line, col) = (self.line, self.column);
        if !matches!(
            self.last,
            TokenType::Newline | TokenType::Dedent | TokenType::Eof
        ) {
            return Token::new(TokenType::Newline, "\\n", line, col);
        }
        if self.indents.len() > 1 {
            self.indents.pop();
            return Token::new(TokenType::Dedent, "", line, col);
        }
        Token::new(TokenType::Eof, "", line, col)
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while self
            .current_char
            .is_some_and(|c| is_letter(c) || c.is_ascii_digit())
        {
            self.read_char();
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_number(&mut self) -> (String, bool) {
        let start = self.position;
        let mut is_float = false;

        self.consume_digits();
        if self.current_char == Some('.') && self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.read_char();
            self.consume_digits();
        }
        if matches!(self.current_char, Some('e' | 'E')) {
            let signed = matches!(self.peek_char(), Some('+' | '-'));
            let exponent = if signed {
                self.input.get(self.read_position + 1).copied()
            } else {
                self.peek_char()
            };
            if exponent.is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.read_char();
                if signed {
                    self.read_char();
                }
                self.consume_digits();
            }
        }

        let literal: String = self.input[start..self.position]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        (literal, is_float)
    }

    fn consume_digits(&mut self) {
        while self.current_char.is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.read_char();
        }
    }

    fn read_string(&mut self, quote: char, line: usize, col: usize) -> Token {
        self.read_char(); // opening quote
        let mut value = String::new();

        loop {
            match self.current_char {
                None | Some('\n') => {
                    return Token::new(TokenType::Illegal, "unterminated string", line, col);
                }
                Some(c) if c == quote => {
                    self.read_char();
                    return Token::new(TokenType::String, value, line, col);
                }
                Some('\\') => {
                    self.read_char();
                    let escaped = match self.current_char {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some(c @ ('\\' | '"' | '\'')) => c,
                        Some(other) => {
                            value.push('\\');
                            other
                        }
                        None => continue,
                    };
                    value.push(escaped);
                    self.read_char();
                }
                Some(c) => {
                    value.push(c);
                    self.read_char();
                }
            }
        }
    }
}

fn is_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}
