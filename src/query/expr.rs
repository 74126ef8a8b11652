//! The Compute expression language.
//!
//! A small arithmetic and boolean language evaluated per row:
//!
//! ```text
//! (UnitPrice * Quantity) * (1 - DiscountPercent / 100)
//! UnitPrice > 100 && Quantity >= 2
//! IF([Unit Price] > 10, 'high', 'low')
//! ```
//!
//! Arithmetic always yields `Float`, comparisons and logic yield `Boolean`, and a
//! null operand makes the result null. Division by zero is null as well.

use crate::error::{Error, Result};
use crate::query::predicate::{ComparisonOperator, RowView};
use crate::schema::Schema;
use crate::value::Value;

/// Deepest nesting the parser accepts.
const MAX_DEPTH: usize = 128;

/// Most binary operators in one expression. Operator chains nest in the tree
/// without nesting in the source.
const MAX_OPERATORS: usize = 256;

/// Outcome of [`validate_expression`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionCheck {
    /// The expression parses and every column exists.
    Valid,
    /// Why the expression is rejected.
    Invalid(String),
}

impl ExpressionCheck {
    /// Returns true for [`ExpressionCheck::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, ExpressionCheck::Valid)
    }

    /// The rejection message, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            ExpressionCheck::Valid => None,
            ExpressionCheck::Invalid(msg) => Some(msg),
        }
    }
}

/// Checks syntax and column references of `expression` against `schema`.
pub fn validate_expression(expression: &str, schema: &Schema) -> ExpressionCheck {
    match Expr::compile(expression, schema) {
        Ok(_) => ExpressionCheck::Valid,
        Err(Error::ColumnNotFound(name)) => ExpressionCheck::Invalid(format!("unknown column '{}'", name)),
        Err(e) => ExpressionCheck::Invalid(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Cmp(ComparisonOperator),
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Abs,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Power,
    Exp,
    Log,
    Min,
    Max,
    If,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "ABS" => Function::Abs,
            "ROUND" => Function::Round,
            "FLOOR" => Function::Floor,
            "CEIL" | "CEILING" => Function::Ceil,
            "SQRT" => Function::Sqrt,
            "POWER" | "POW" => Function::Power,
            "EXP" => Function::Exp,
            "LOG" => Function::Log,
            "MIN" => Function::Min,
            "MAX" => Function::Max,
            "IF" => Function::If,
            _ => return None,
        })
    }

    /// Accepted argument counts (inclusive).
    fn arity(&self) -> (usize, usize) {
        match self {
            Function::Abs | Function::Floor | Function::Ceil | Function::Sqrt | Function::Exp => (1, 1),
            Function::Round | Function::Log => (1, 2),
            Function::Power => (2, 2),
            Function::Min | Function::Max => (2, usize::MAX),
            Function::If => (3, 3),
        }
    }
}

/// A compiled expression with columns resolved to positions.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Column(usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Parses `source` and resolves its columns against `schema`.
    pub(crate) fn compile(source: &str, schema: &Schema) -> Result<Expr> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(Error::expression("empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0, schema, depth: 0, operators: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(Error::expression(format!("unexpected {:?} after expression", token)));
        }
        Ok(expr)
    }

    /// Evaluates the expression against one row.
    pub(crate) fn eval<R: RowView + ?Sized>(&self, row: &R) -> Result<Value> {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Column(i) => row.cell(*i).clone(),
            Expr::Unary(op, inner) => {
                let v = inner.eval(row)?;
                match (op, v) {
                    (_, Value::Null) => Value::Null,
                    (UnaryOp::Neg, v) => v.as_f64().map_or(Value::Null, |f| Value::Float(-f)),
                    (UnaryOp::Not, v) => v.as_bool().map_or(Value::Null, |b| Value::Boolean(!b)),
                }
            }
            Expr::Binary(BinaryOp::And, l, r) => match l.eval(row)?.as_bool() {
                Some(false) => Value::Boolean(false),
                Some(true) => r.eval(row)?.as_bool().map_or(Value::Null, Value::Boolean),
                None => Value::Null,
            },
            Expr::Binary(BinaryOp::Or, l, r) => match l.eval(row)?.as_bool() {
                Some(true) => Value::Boolean(true),
                Some(false) => r.eval(row)?.as_bool().map_or(Value::Null, Value::Boolean),
                None => Value::Null,
            },
            Expr::Binary(op, l, r) => binary(*op, l.eval(row)?, r.eval(row)?),
            Expr::Call(Function::If, args) => {
                let branch = if args[0].eval(row)?.as_bool().unwrap_or(false) { &args[1] } else { &args[2] };
                branch.eval(row)?
            }
            Expr::Call(function, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match arg.eval(row)?.as_f64() {
                        Some(v) => values.push(v),
                        None => return Ok(Value::Null),
                    }
                }
                call(*function, &values)
            }
        })
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    if let BinaryOp::Cmp(cmp) = op {
        return Value::Boolean(cmp.test(&left, &right));
    }
    if op == BinaryOp::Add {
        match (&left, &right) {
            (Value::String(a), b) => return Value::String(format!("{}{}", a, b)),
            (a, Value::String(b)) => return Value::String(format!("{}{}", a, b)),
            _ => {}
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Value::Null;
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Value::Null,
        BinaryOp::Div => a / b,
        BinaryOp::Rem if b == 0.0 => return Value::Null,
        BinaryOp::Rem => a % b,
        _ => return Value::Null,
    };
    Value::Float(result)
}

fn call(function: Function, args: &[f64]) -> Value {
    let x = args[0];
    let result = match function {
        Function::Abs => x.abs(),
        Function::Round => {
            let digits = args.get(1).copied().unwrap_or(0.0).clamp(-15.0, 15.0) as i32;
            let scale = 10f64.powi(digits);
            (x * scale).round() / scale
        }
        Function::Floor => x.floor(),
        Function::Ceil => x.ceil(),
        Function::Sqrt if x < 0.0 => return Value::Null,
        Function::Sqrt => x.sqrt(),
        Function::Power => x.powf(args[1]),
        Function::Exp => x.exp(),
        Function::Log if x <= 0.0 => return Value::Null,
        Function::Log => match args.get(1) {
            Some(base) if *base > 0.0 && *base != 1.0 => x.log(*base),
            Some(_) => return Value::Null,
            None => x.ln(),
        },
        Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::If => return Value::Null,
    };
    if result.is_finite() {
        Value::Float(result)
    } else {
        Value::Null
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    Op(&'static str),
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| Error::expression(format!("invalid number '{}'", text)))?;
            tokens.push(Token::Number(n));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::expression("unterminated string literal")),
                        Some(&ch) if ch == quote => {
                            // A doubled quote is an escaped quote.
                            if chars.get(i + 1) == Some(&quote) {
                                text.push(quote);
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '[' => {
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|&ch| ch == ']') else {
                    return Err(Error::expression("unterminated [column] reference"));
                };
                let name: String = chars[start..start + len].iter().collect();
                if name.trim().is_empty() {
                    return Err(Error::expression("empty [column] reference"));
                }
                tokens.push(Token::Quoted(name));
                i = start + len + 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('!', Some('=')) => ("!=", 2),
                    ('<', Some('>')) => ("!=", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('&', Some('&')) => ("&&", 2),
                    ('|', Some('|')) => ("||", 2),
                    ('=', _) => ("==", 1),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    ('!', _) => ("!", 1),
                    ('+', _) => ("+", 1),
                    ('-', _) => ("-", 1),
                    ('*', _) => ("*", 1),
                    ('/', _) => ("/", 1),
                    ('%', _) => ("%", 1),
                    _ => return Err(Error::expression(format!("unexpected character '{}'", c))),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    schema: &'a Schema,
    depth: usize,
    operators: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            Some(Token::Ident(word)) => {
                let mapped = match word.to_ascii_uppercase().as_str() {
                    "AND" => "&&",
                    "OR" => "||",
                    _ => return None,
                };
                if ops.contains(&mapped) {
                    self.pos += 1;
                    Some(mapped)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::expression("expression nested too deeply"));
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, left: Expr, right: Expr) -> Result<Expr> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(Error::expression(format!("expression has more than {} operators", MAX_OPERATORS)));
        }
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.enter()?;
        let mut left = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::Or, left, right)?;
        }
        self.depth -= 1;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_op(&["&&"]).is_some() {
            let right = self.parse_equality()?;
            left = self.binary(BinaryOp::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while let Some(op) = self.eat_op(&["==", "!="]) {
            let cmp = if op == "==" { ComparisonOperator::Equal } else { ComparisonOperator::NotEqual };
            let right = self.parse_comparison()?;
            left = self.binary(BinaryOp::Cmp(cmp), left, right)?;
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.eat_op(&["<", "<=", ">", ">="]) {
            let cmp = match op {
                "<" => ComparisonOperator::LessThan,
                "<=" => ComparisonOperator::LessThanOrEqual,
                ">" => ComparisonOperator::GreaterThan,
                _ => ComparisonOperator::GreaterThanOrEqual,
            };
            let right = self.parse_additive()?;
            left = self.binary(BinaryOp::Cmp(cmp), left, right)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            let right = self.parse_unary()?;
            left = self.binary(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(op) = self.eat_op(&["!", "-", "+"]) {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(match op {
                "!" => Expr::Unary(UnaryOp::Not, Box::new(inner)),
                "-" => Expr::Unary(UnaryOp::Neg, Box::new(inner)),
                _ => inner,
            });
        }
        if let Some(Token::Ident(word)) = self.peek() {
            if word.eq_ignore_ascii_case("NOT") {
                self.pos += 1;
                self.enter()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            None => Err(Error::expression("unexpected end of expression")),
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Float(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Quoted(name)) => Ok(Expr::Column(self.schema.require(&name)?)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::expression("missing ')'")),
                }
            }
            Some(Token::Ident(word)) => {
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_call(&word);
                }
                match word.to_ascii_lowercase().as_str() {
                    "true" => return Ok(Expr::Literal(Value::Boolean(true))),
                    "false" => return Ok(Expr::Literal(Value::Boolean(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                Ok(Expr::Column(self.schema.require(&word)?))
            }
            Some(token) => Err(Error::expression(format!("unexpected {:?}", token))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        let function =
            Function::lookup(name).ok_or_else(|| Error::expression(format!("unknown function '{}'", name)))?;
        self.pos += 1; // '('
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.parse_or()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(Error::expression(format!("expected ',' or ')' in {}()", name))),
                }
            }
        }
        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(Error::expression(format!(
                "{}() takes {} argument(s), got {}",
                name.to_ascii_uppercase(),
                if min == max { min.to_string() } else if max == usize::MAX { format!("at least {}", min) } else { format!("{}-{}", min, max) },
                args.len()
            )));
        }
        Ok(Expr::Call(function, args))
    }
}
