//! Lexer and Pratt parser for the expression front end.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Ident(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// `/`, always floating point.
    Div,
    /// `÷`, truncating integer division.
    IntDiv,
    Rem,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IntDiv => "÷",
            BinOp::Rem => "%",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub offset: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    IntDiv,
    Percent,
    LParen,
    RParen,
    Comma,
    Separator,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Sum,     // +, -
    Product, // *, /, ÷, %
    Prefix,  // -x
}

impl Token {
    fn infix(&self) -> Option<(BinOp, Precedence)> {
        match self {
            Token::Plus => Some((BinOp::Add, Precedence::Sum)),
            Token::Minus => Some((BinOp::Sub, Precedence::Sum)),
            Token::Star => Some((BinOp::Mul, Precedence::Product)),
            Token::Slash => Some((BinOp::Div, Precedence::Product)),
            Token::IntDiv => Some((BinOp::IntDiv, Precedence::Product)),
            Token::Percent => Some((BinOp::Rem, Precedence::Product)),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Token::Int(v) => v.to_string(),
            Token::Float(v) => v.to_string(),
            Token::Ident(name) => format!("`{name}`"),
            Token::Plus => "`+`".into(),
            Token::Minus => "`-`".into(),
            Token::Star => "`*`".into(),
            Token::Slash => "`/`".into(),
            Token::IntDiv => "`÷`".into(),
            Token::Percent => "`%`".into(),
            Token::LParen => "`(`".into(),
            Token::RParen => "`)`".into(),
            Token::Comma => "`,`".into(),
            Token::Separator => "end of statement".into(),
            Token::Eof => "end of input".into(),
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let start = self.pos;
            let Some(c) = self.peek() else {
                tokens.push((Token::Eof, start));
                return Ok(tokens);
            };

            let token = match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                    continue;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                    continue;
                }
                '\n' if self.depth > 0 => {
                    self.bump();
                    continue;
                }
                '\n' | ';' => {
                    self.bump();
                    Token::Separator
                }
                '0'..='9' => self.number()?,
                '.' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.ident(),
                _ => {
                    self.bump();
                    match c {
                        '+' => Token::Plus,
                        '-' | '−' => Token::Minus,
                        '*' => Token::Star,
                        '/' => Token::Slash,
                        '÷' => Token::IntDiv,
                        '%' => Token::Percent,
                        '(' => {
                            self.depth += 1;
                            Token::LParen
                        }
                        ')' => {
                            self.depth = self.depth.saturating_sub(1);
                            Token::RParen
                        }
                        ',' => Token::Comma,
                        other => {
                            return Err(SyntaxError::new(
                                start,
                                format!("unexpected character `{other}`"),
                            ));
                        }
                    }
                }
            };
            tokens.push((token, start));
        }
    }

    fn number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        let mut is_float = false;

        self.digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_follows = match self.peek_second() {
                Some('+' | '-') => self.src[self.pos + 2..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent_follows {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                self.digits();
            }
        }

        let text: String = self.src[start..self.pos].chars().filter(|&c| c != '_').collect();
        if is_float {
            text.parse()
                .map(Token::Float)
                .map_err(|_| SyntaxError::new(start, format!("invalid number `{text}`")))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| SyntaxError::new(start, format!("integer literal `{text}` is too large")))
        }
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.bump();
        }
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '!')
        {
            self.bump();
        }
        Token::Ident(self.src[start..self.pos].to_string())
    }
}

/// Deepest expression tree a statement may build, counting parentheses and
/// prefix operators as levels. Lowering walks the tree recursively.
pub const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn next(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), SyntaxError> {
        if *self.peek() == expected {
            self.next();
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", expected.describe())))
        }
    }

    fn unexpected(&self, context: &str) -> SyntaxError {
        SyntaxError::new(
            self.offset(),
            format!("unexpected {}, {context}", self.peek().describe()),
        )
    }

    fn too_deep(&self) -> SyntaxError {
        SyntaxError::new(
            self.offset(),
            format!("expression nested too deeply (limit {MAX_DEPTH})"),
        )
    }

    /// Height of a node whose tallest child is `height` high.
    fn grow(&self, height: usize) -> Result<usize, SyntaxError> {
        if height >= MAX_DEPTH {
            Err(self.too_deep())
        } else {
            Ok(height + 1)
        }
    }

    /// Parse an expression and report the height of its tree.
    fn parse_expression(&mut self, precedence: Precedence) -> Result<(Expr, usize), SyntaxError> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(self.too_deep());
        }

        let (mut left, mut height) = self.parse_prefix()?;

        while let Some((op, next)) = self.peek().infix() {
            if precedence >= next {
                break;
            }
            self.next();
            let (right, right_height) = self.parse_expression(next)?;
            height = self.grow(height.max(right_height))?;
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }

        self.nesting -= 1;
        Ok((left, height))
    }

    fn parse_prefix(&mut self) -> Result<(Expr, usize), SyntaxError> {
        let offset = self.offset();
        match self.next() {
            Token::Int(v) => Ok((Expr::Int(v), 1)),
            Token::Float(v) => Ok((Expr::Float(v), 1)),
            Token::Minus => {
                let (inner, height) = self.parse_expression(Precedence::Prefix)?;
                Ok((Expr::Neg(Box::new(inner)), self.grow(height)?))
            }
            Token::Plus => self.parse_expression(Precedence::Prefix),
            Token::LParen => {
                let inner = self.parse_expression(Precedence::Lowest)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.next();
                    let (args, height) = self.parse_arguments()?;
                    Ok((Expr::Call { name, args }, self.grow(height)?))
                } else {
                    Ok((Expr::Ident(name), 1))
                }
            }
            other => Err(SyntaxError::new(
                offset,
                format!("unexpected {}, expected an expression", other.describe()),
            )),
        }
    }

    /// Arguments up to the closing `)`, with the height of the tallest one.
    fn parse_arguments(&mut self) -> Result<(Vec<Expr>, usize), SyntaxError> {
        let mut args = Vec::new();
        let mut height = 0;
        if *self.peek() == Token::RParen {
            self.next();
            return Ok((args, height));
        }
        loop {
            let (arg, arg_height) = self.parse_expression(Precedence::Lowest)?;
            args.push(arg);
            height = height.max(arg_height);
            match self.peek() {
                Token::Comma => {
                    self.next();
                }
                Token::RParen => {
                    self.next();
                    return Ok((args, height));
                }
                _ => return Err(self.unexpected("expected `,` or `)`")),
            }
        }
    }
}

/// Parse a program: expressions separated by `;` or newlines.
///
/// Statements deeper than [`MAX_DEPTH`] are rejected rather than parsed, so a
/// hostile unit cannot exhaust the stack of the thread that evaluates it.
pub fn parse_program(src: &str) -> Result<Vec<Expr>, SyntaxError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let mut statements = Vec::new();

    loop {
        while *parser.peek() == Token::Separator {
            parser.next();
        }
        if *parser.peek() == Token::Eof {
            return Ok(statements);
        }
        let (statement, _) = parser.parse_expression(Precedence::Lowest)?;
        statements.push(statement);
        match parser.peek() {
            Token::Separator | Token::Eof => {}
            _ => return Err(parser.unexpected("expected end of statement")),
        }
    }
}
