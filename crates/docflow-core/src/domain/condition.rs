//! Branch condition evaluation
//!
//! Conditions are parsed into a small typed AST (comparisons, boolean
//! connectives, literals, variables) and evaluated against an instance's
//! data map. There is no general-purpose expression engine behind this:
//! the error set is closed and evaluation can never execute code or touch
//! engine internals.

use crate::{DataMap, EngineError};
use serde_json::Value;

/// Evaluates a branch condition against instance data
///
/// Implementations must be side-effect free; the engine may evaluate the
/// same condition speculatively while selecting an edge.
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the expression with the data map as the only variable scope
    fn evaluate(&self, expression: &str, data: &DataMap) -> Result<bool, EngineError>;
}

/// Default evaluator backed by the typed expression AST in this module
pub struct DefaultConditionEvaluator;

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(&self, expression: &str, data: &DataMap) -> Result<bool, EngineError> {
        let expr = parse(expression)?;
        match expr.eval(data)? {
            Scalar::Bool(b) => Ok(b),
            other => Err(fault(format!(
                "expression '{}' evaluated to {} instead of a boolean",
                expression,
                other.type_name()
            ))),
        }
    }
}

fn fault(msg: String) -> EngineError {
    EngineError::ConditionEvaluationFault(msg)
}

/// Runtime value of an operand
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Numeric value; integers and floats share one representation
    Number(f64),
    /// String value
    Text(String),
    /// Boolean value
    Bool(bool),
}

impl Scalar {
    fn type_name(&self) -> &'static str {
        match self {
            Scalar::Number(_) => "a number",
            Scalar::Text(_) => "a string",
            Scalar::Bool(_) => "a boolean",
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal operand
    Literal(Scalar),
    /// Variable bound from the instance data map
    Var(String),
    /// Boolean negation
    Not(Box<Expr>),
    /// Boolean conjunction, short-circuiting
    And(Box<Expr>, Box<Expr>),
    /// Boolean disjunction, short-circuiting
    Or(Box<Expr>, Box<Expr>),
    /// Comparison between two operands of the same type
    Compare {
        /// Operator
        op: CompareOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate against a data map
    pub fn eval(&self, data: &DataMap) -> Result<Scalar, EngineError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => resolve(name, data),
            Expr::Not(inner) => Ok(Scalar::Bool(!as_bool(inner.eval(data)?)?)),
            Expr::And(lhs, rhs) => {
                if !as_bool(lhs.eval(data)?)? {
                    return Ok(Scalar::Bool(false));
                }
                Ok(Scalar::Bool(as_bool(rhs.eval(data)?)?))
            }
            Expr::Or(lhs, rhs) => {
                if as_bool(lhs.eval(data)?)? {
                    return Ok(Scalar::Bool(true));
                }
                Ok(Scalar::Bool(as_bool(rhs.eval(data)?)?))
            }
            Expr::Compare { op, lhs, rhs } => {
                compare(*op, lhs.eval(data)?, rhs.eval(data)?).map(Scalar::Bool)
            }
        }
    }
}

fn as_bool(value: Scalar) -> Result<bool, EngineError> {
    match value {
        Scalar::Bool(b) => Ok(b),
        other => Err(fault(format!(
            "expected a boolean operand, got {}",
            other.type_name()
        ))),
    }
}

fn resolve(name: &str, data: &DataMap) -> Result<Scalar, EngineError> {
    match data.get(name) {
        None => Err(fault(format!("unknown variable '{}'", name))),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Scalar::Number)
            .ok_or_else(|| fault(format!("variable '{}' is not a finite number", name))),
        Some(Value::String(s)) => Ok(Scalar::Text(s.clone())),
        Some(Value::Bool(b)) => Ok(Scalar::Bool(*b)),
        Some(other) => Err(fault(format!(
            "variable '{}' has unsupported type: {}",
            name,
            match other {
                Value::Null => "null",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
                _ => "unknown",
            }
        ))),
    }
}

fn compare(op: CompareOp, lhs: Scalar, rhs: Scalar) -> Result<bool, EngineError> {
    match (&lhs, &rhs) {
        (Scalar::Number(a), Scalar::Number(b)) => Ok(match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }),
        (Scalar::Text(a), Scalar::Text(b)) => Ok(match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }),
        (Scalar::Bool(a), Scalar::Bool(b)) => match op {
            CompareOp::Eq => Ok(a == b),
            CompareOp::Ne => Ok(a != b),
            _ => Err(fault("booleans only support == and !=".to_string())),
        },
        _ => Err(fault(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Eof,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    pos += 2;
                } else {
                    return Err(fault(format!(
                        "unexpected '=' at position {}, did you mean '=='?",
                        pos
                    )));
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    pos += 2;
                } else {
                    tokens.push(Token::Bang);
                    pos += 1;
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    pos += 2;
                } else {
                    tokens.push(Token::Lt);
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    pos += 2;
                } else {
                    tokens.push(Token::Gt);
                    pos += 1;
                }
            }
            '&' => {
                if chars.get(pos + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    pos += 2;
                } else {
                    return Err(fault(format!("unexpected '&' at position {}", pos)));
                }
            }
            '|' => {
                if chars.get(pos + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    pos += 2;
                } else {
                    return Err(fault(format!("unexpected '|' at position {}", pos)));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                pos += 1;
                loop {
                    match chars.get(pos) {
                        Some(&ch) if ch == quote => {
                            pos += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            pos += 1;
                        }
                        None => {
                            return Err(fault("unterminated string literal".to_string()));
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '0'..='9' | '.' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_ascii_digit() || chars[pos] == '.')
                {
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| fault(format!("malformed number '{}'", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "and" => Token::AndAnd,
                    "or" => Token::OrOr,
                    "not" => Token::Bang,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(fault(format!(
                    "unexpected character '{}' at position {}",
                    other, pos
                )));
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

/// Parse an expression string into its AST
pub fn parse(expression: &str) -> Result<Expr, EngineError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    parser.expect(Token::Eof)?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), EngineError> {
        let token = self.advance();
        if token == expected {
            Ok(())
        } else {
            Err(fault(format!(
                "expected {:?}, found {:?}",
                expected, token
            )))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.and_expr()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.unary()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EngineError> {
        if *self.peek() == Token::Bang {
            self.advance();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, EngineError> {
        let lhs = self.operand()?;

        let op = match self.peek() {
            Token::EqEq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();

        let rhs = self.operand()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn operand(&mut self) -> Result<Expr, EngineError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Scalar::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Scalar::Text(s))),
            Token::True => Ok(Expr::Literal(Scalar::Bool(true))),
            Token::False => Ok(Expr::Literal(Scalar::Bool(false))),
            Token::Ident(name) => Ok(Expr::Var(name)),
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(fault(format!("unexpected token {:?}", other))),
        }
    }
}
