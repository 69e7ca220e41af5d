//! Tokenizer and recursive-descent parser for enablement expressions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("." ident | "[" or "]")*
//! primary := number | string | true | false | null | ident | "(" or ")"
//! ```

use super::ExpressionError;

/// Nesting limit for parenthesised and prefix expressions
const MAX_DEPTH: usize = 64;

/// Upper bound on expression source length
const MAX_SOURCE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Symbol(&'static str),
}

pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    if input.len() > MAX_SOURCE_LEN {
        return Err(ExpressionError::TooLong(MAX_SOURCE_LEN));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken(describe(token))),
    }
}

/// Two-character symbols must come before their one-character prefixes
const SYMBOLS: &[&str] = &[
    "||", "&&", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%", "(", ")", "[",
    "]", ".",
];

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while let Some(ch) = rest.chars().next() {
        if ch.is_whitespace() {
            rest = &rest[ch.len_utf8()..];
            continue;
        }

        if ch == '\'' || ch == '"' {
            let (value, consumed) = read_string(rest, ch)?;
            tokens.push(Token::Str(value));
            rest = &rest[consumed..];
            continue;
        }

        let after_operand = matches!(
            tokens.last(),
            Some(Token::Ident(_) | Token::Number(_) | Token::Symbol(")") | Token::Symbol("]"))
        );
        // A leading '.' is a number only when a digit follows (`.5`)
        let starts_number = ch.is_ascii_digit()
            || (ch == '.'
                && !after_operand
                && rest[1..].starts_with(|c: char| c.is_ascii_digit()));
        if starts_number {
            // Positional segment of a path (`items.0.name`) is digits only
            let positional = matches!(tokens.last(), Some(Token::Symbol(".")));
            let len = rest
                .find(|c: char| !(c.is_ascii_digit() || (c == '.' && !positional)))
                .unwrap_or(rest.len());
            let text = &rest[..len];
            let value: f64 = text
                .parse()
                .map_err(|_| ExpressionError::InvalidNumber(text.to_string()))?;
            tokens.push(Token::Number(value));
            rest = &rest[len..];
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            tokens.push(Token::Ident(rest[..len].to_string()));
            rest = &rest[len..];
            continue;
        }

        match SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            Some(symbol) => {
                tokens.push(Token::Symbol(symbol));
                rest = &rest[symbol.len()..];
            }
            None => return Err(ExpressionError::UnexpectedToken(ch.to_string())),
        }
    }

    Ok(tokens)
}

/// Read a quoted string starting at `input[0]`; returns the value and the
/// number of bytes consumed including both quotes
fn read_string(input: &str, quote: char) -> Result<(String, usize), ExpressionError> {
    let mut value = String::new();
    let mut chars = input.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        if c == quote {
            return Ok((value, idx + c.len_utf8()));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ExpressionError::UnexpectedEof),
            }
            continue;
        }
        value.push(c);
    }
    Err(ExpressionError::UnexpectedEof)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(s) => s.clone(),
        Token::Str(s) => format!("{:?}", s),
        Token::Number(n) => n.to_string(),
        Token::Symbol(s) => s.to_string(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEof)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), ExpressionError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            match self.peek() {
                Some(token) => Err(ExpressionError::UnexpectedToken(describe(token))),
                None => Err(ExpressionError::UnexpectedEof),
            }
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let mut lhs = self.parse_and()?;
        while self.eat_symbol("||") || self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_not()?;
        while self.eat_symbol("&&") || self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_symbol("!") || self.eat_keyword("not") {
            self.enter()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Symbol("==")) => BinaryOp::Eq,
            Some(Token::Symbol("!=")) => BinaryOp::Ne,
            Some(Token::Symbol("<")) => BinaryOp::Lt,
            Some(Token::Symbol("<=")) => BinaryOp::Le,
            Some(Token::Symbol(">")) => BinaryOp::Gt,
            Some(Token::Symbol(">=")) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol("+")) => BinaryOp::Add,
                Some(Token::Symbol("-")) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol("*")) => BinaryOp::Mul,
                Some(Token::Symbol("/")) => BinaryOp::Div,
                Some(Token::Symbol("%")) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_symbol("-") {
            self.enter()?;
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_symbol(".") {
                match self.next()? {
                    Token::Ident(name) => expr = Expr::Field(Box::new(expr), name),
                    // `data.items.0` style positional access
                    Token::Number(n) if n.fract() == 0.0 && n >= 0.0 => {
                        expr = Expr::Index(Box::new(expr), Box::new(Expr::Number(n)))
                    }
                    other => return Err(ExpressionError::UnexpectedToken(describe(&other))),
                }
            } else if self.eat_symbol("[") {
                let index = self.parse_or()?;
                self.expect_symbol("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next()? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" | "True" => Expr::Bool(true),
                "false" | "False" => Expr::Bool(false),
                "null" | "None" => Expr::Null,
                _ => Expr::Ident(name),
            }),
            Token::Symbol("(") => {
                let expr = self.parse_or()?;
                self.expect_symbol(")")?;
                Ok(expr)
            }
            other => Err(ExpressionError::UnexpectedToken(describe(&other))),
        }
    }
}
