//! Row expressions for `derive_column`.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr       := additive (("=" | "==" | "!=" | "<>" | "<" | "<=" | ">" | ">=") additive)?
//! additive   := term (("+" | "-") term)*
//! term       := unary (("*" | "/" | "%") unary)*
//! unary      := "-" unary | primary
//! primary    := number | 'text' | "text" | true | false | null
//!             | column | `quoted column` | [quoted column]
//!             | name "(" (expr ("," expr)*)? ")"
//!             | "(" expr ")"
//! ```
//!
//! Column names are resolved against the dataset once, when the expression is compiled.

use crate::dataset::{Dataset, Value};
use crate::error::{StepError, StepResult};
use crate::tools::filter::{compare_values, values_equal};
use std::cmp::Ordering;

/// Nesting limit for parentheses, calls and unary minus.
const MAX_DEPTH: usize = 64;
/// Token limit; bounds the size (and so the depth) of any compiled tree.
const MAX_TOKENS: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    QuotedIdent(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Round,
    Lower,
    Upper,
    Len,
    Concat,
    Coalesce,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "abs" => Some(Function::Abs),
            "round" => Some(Function::Round),
            "lower" => Some(Function::Lower),
            "upper" => Some(Function::Upper),
            "len" | "length" => Some(Function::Len),
            "concat" => Some(Function::Concat),
            "coalesce" => Some(Function::Coalesce),
            _ => None,
        }
    }

    /// Inclusive (min, max) argument count; `None` means variadic.
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Abs | Function::Lower | Function::Upper | Function::Len => (1, Some(1)),
            Function::Round => (1, Some(2)),
            Function::Concat | Function::Coalesce => (1, None),
        }
    }
}

/// A compiled expression bound to one dataset's column layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(usize),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    pub fn compile(source: &str, dataset: &Dataset) -> StepResult<Expr> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(StepError::InvalidExpression("expression is empty".to_string()));
        }
        if tokens.len() > MAX_TOKENS {
            return Err(StepError::InvalidExpression(format!(
                "expression has {} tokens, limit is {}",
                tokens.len(),
                MAX_TOKENS
            )));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            dataset,
        };
        let expr = parser.parse_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(StepError::InvalidExpression(format!(
                "unexpected {:?} after end of expression",
                tok
            )));
        }
        Ok(expr)
    }

    pub fn eval(&self, row: &[Value]) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Column(idx) => row[*idx].clone(),
            Expr::Neg(inner) => match inner.eval(row).as_f64() {
                Some(n) => Value::Number(-n),
                None => Value::Null,
            },
            Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs.eval(row), rhs.eval(row)),
            Expr::Call(func, args) => {
                let values: Vec<Value> = args.iter().map(|a| a.eval(row)).collect();
                eval_call(*func, values)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinaryOp::Add => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Value::Number(a + b),
            _ if lhs.is_null() || rhs.is_null() => Value::Null,
            // A text operand turns `+` into concatenation.
            _ if matches!(lhs, Value::Text(_)) || matches!(rhs, Value::Text(_)) => {
                Value::Text(format!("{}{}", lhs, rhs))
            }
            _ => Value::Null,
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Value::Null;
            };
            let result = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b == 0.0 => return Value::Null,
                BinaryOp::Div => a / b,
                BinaryOp::Rem if b == 0.0 => return Value::Null,
                _ => a % b,
            };
            if result.is_finite() {
                Value::Number(result)
            } else {
                Value::Null
            }
        }
        BinaryOp::Eq => Value::Bool(values_equal(&lhs, &rhs)),
        BinaryOp::Ne => Value::Bool(!values_equal(&lhs, &rhs)),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            match compare_values(&lhs, &rhs) {
                Some(ord) => Value::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Lte => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }),
                None => Value::Null,
            }
        }
    }
}

fn eval_call(func: Function, mut args: Vec<Value>) -> Value {
    match func {
        Function::Abs => args[0].as_f64().map(|n| Value::Number(n.abs())).unwrap_or(Value::Null),
        Function::Round => {
            let digits = args.get(1).and_then(|v| v.as_f64()).unwrap_or(0.0).clamp(0.0, 12.0) as i32;
            match args[0].as_f64() {
                Some(n) => {
                    let scale = 10f64.powi(digits);
                    Value::Number((n * scale).round() / scale)
                }
                None => Value::Null,
            }
        }
        Function::Lower => match &args[0] {
            Value::Null => Value::Null,
            other => Value::Text(other.to_string().to_lowercase()),
        },
        Function::Upper => match &args[0] {
            Value::Null => Value::Null,
            other => Value::Text(other.to_string().to_uppercase()),
        },
        Function::Len => match &args[0] {
            Value::Null => Value::Null,
            other => Value::Number(other.to_string().chars().count() as f64),
        },
        Function::Concat => Value::Text(args.iter().map(|v| v.to_string()).collect()),
        Function::Coalesce => {
            let idx = args.iter().position(|v| !v.is_null());
            idx.map(|i| args.swap_remove(i)).unwrap_or(Value::Null)
        }
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    dataset: &'a Dataset,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> StepResult<T>) -> StepResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(StepError::InvalidExpression(format!(
                "expression nests deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek_op(&self, candidates: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if candidates.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn parse_expr(&mut self) -> StepResult<Expr> {
        let lhs = self.parse_additive()?;
        let Some(op) = self.peek_op(&["=", "==", "!=", "<>", "<", "<=", ">", ">="]) else {
            return Ok(lhs);
        };
        self.pos += 1;
        let rhs = self.parse_additive()?;
        let op = match op {
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Lte,
            ">" => BinaryOp::Gt,
            _ => BinaryOp::Gte,
        };
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> StepResult<Expr> {
        let mut lhs = self.parse_term()?;
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.pos += 1;
            let rhs = self.parse_term()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> StepResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_op(&["*", "/", "%"]) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> StepResult<Expr> {
        if self.peek_op(&["-"]).is_some() {
            self.pos += 1;
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> StepResult<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Text(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::QuotedIdent(name)) => Ok(Expr::Column(self.dataset.require_column(&name)?)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    return self.nested(|p| p.parse_call(&name));
                }
                match name.to_lowercase().as_str() {
                    "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                Ok(Expr::Column(self.dataset.require_column(&name)?))
            }
            Some(Token::LParen) => {
                let inner = self.nested(Self::parse_expr)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(StepError::InvalidExpression("missing closing parenthesis".to_string())),
                }
            }
            Some(tok) => Err(StepError::InvalidExpression(format!("unexpected {:?}", tok))),
            None => Err(StepError::InvalidExpression("unexpected end of expression".to_string())),
        }
    }

    fn parse_call(&mut self, name: &str) -> StepResult<Expr> {
        let func = Function::lookup(name)
            .ok_or_else(|| StepError::InvalidExpression(format!("unknown function '{}'", name)))?;

        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.parse_expr()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => {
                        return Err(StepError::InvalidExpression(format!(
                            "expected ',' or ')' in call to {}",
                            name
                        )))
                    }
                }
            }
        }

        let (min, max) = func.arity();
        if args.len() < min || max.map(|m| args.len() > m).unwrap_or(false) {
            return Err(StepError::InvalidExpression(format!(
                "{} takes {} argument(s), got {}",
                name,
                match max {
                    Some(m) if m == min => format!("{}", m),
                    Some(m) => format!("{}-{}", min, m),
                    None => format!("at least {}", min),
                },
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}

fn tokenize(source: &str) -> StepResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
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
            '\'' | '"' => {
                let (text, next) = read_delimited(&chars, i + 1, c)?;
                tokens.push(Token::Text(text));
                i = next;
            }
            '`' => {
                let (name, next) = read_delimited(&chars, i + 1, '`')?;
                tokens.push(Token::QuotedIdent(name));
                i = next;
            }
            '[' => {
                let (name, next) = read_delimited(&chars, i + 1, ']')?;
                tokens.push(Token::QuotedIdent(name));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| StepError::InvalidExpression(format!("bad number '{}'", literal)))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                if let Some(op) = ["==", "!=", "<>", "<=", ">="].into_iter().find(|op| *op == two) {
                    tokens.push(Token::Op(op));
                    i += 2;
                    continue;
                }
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '=' => "=",
                    '<' => "<",
                    '>' => ">",
                    other => {
                        return Err(StepError::InvalidExpression(format!(
                            "unexpected character '{}'",
                            other
                        )))
                    }
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Reads up to the closing delimiter; returns the content and the index after it.
fn read_delimited(chars: &[char], start: usize, close: char) -> StepResult<(String, usize)> {
    let mut out = String::new();
    let mut i = start;
    while i < chars.len() {
        if chars[i] == close {
            return Ok((out, i + 1));
        }
        // backslash escapes only inside string literals
        if chars[i] == '\\' && close != ']' && close != '`' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    Err(StepError::InvalidExpression(format!("unterminated '{}'", close)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        Dataset::new(
            vec!["price".to_string(), "qty".to_string(), "name".to_string(), "unit cost".to_string()],
            vec![vec![Value::Number(2.5), Value::from("4"), Value::from("Widget"), Value::Number(1.0)]],
        )
        .unwrap()
    }

    fn eval(source: &str) -> Value {
        let ds = dataset();
        Expr::compile(source, &ds).unwrap().eval(&ds.rows()[0])
    }

    #[test]
    fn test_precedence_and_numeric_text() {
        assert_eq!(eval("price * qty + 1"), Value::Number(11.0));
        assert_eq!(eval("price * (qty + 1)"), Value::Number(12.5));
        assert_eq!(eval("-price + 3"), Value::Number(0.5));
        assert_eq!(eval("qty % 3"), Value::Number(1.0));
    }

    #[test]
    fn test_quoted_columns_and_division_by_zero() {
        assert_eq!(eval("price - `unit cost`"), Value::Number(1.5));
        assert_eq!(eval("[unit cost] * 2"), Value::Number(2.0));
        assert_eq!(eval("price / 0"), Value::Null);
    }

    #[test]
    fn test_text_concatenation_and_functions() {
        assert_eq!(eval("name + '-' + qty"), Value::from("Widget-4"));
        assert_eq!(eval("upper(name)"), Value::from("WIDGET"));
        assert_eq!(eval("len(name)"), Value::Number(6.0));
        assert_eq!(eval("round(price / 3, 2)"), Value::Number(0.83));
        assert_eq!(eval("coalesce(null, name)"), Value::from("Widget"));
        assert_eq!(eval("concat(name, \" x\", qty)"), Value::from("Widget x4"));
    }

    #[test]
    fn test_comparisons_yield_booleans() {
        assert_eq!(eval("price > 2"), Value::Bool(true));
        assert_eq!(eval("qty == 4"), Value::Bool(true));
        assert_eq!(eval("name != 'Widget'"), Value::Bool(false));
        assert_eq!(eval("null < 3"), Value::Null);
    }

    #[test]
    fn test_compile_errors() {
        let ds = dataset();
        assert!(matches!(
            Expr::compile("prise * 2", &ds),
            Err(StepError::MissingColumn { suggestion: Some(ref s), .. }) if s == "price"
        ));
        assert!(matches!(Expr::compile("price *", &ds), Err(StepError::InvalidExpression(_))));
        assert!(matches!(Expr::compile("sqrt(price)", &ds), Err(StepError::InvalidExpression(_))));
        assert!(matches!(Expr::compile("abs(price, 2)", &ds), Err(StepError::InvalidExpression(_))));
        assert!(matches!(Expr::compile("'open", &ds), Err(StepError::InvalidExpression(_))));
        assert!(matches!(Expr::compile("  ", &ds), Err(StepError::InvalidExpression(_))));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let ds = dataset();
        let parens = format!("{}price{}", "(".repeat(2000), ")".repeat(2000));
        assert!(matches!(Expr::compile(&parens, &ds), Err(StepError::InvalidExpression(_))));
        let minus = format!("{}price", "-".repeat(100_000));
        assert!(matches!(Expr::compile(&minus, &ds), Err(StepError::InvalidExpression(_))));
        let calls = format!("{}price{}", "abs(".repeat(200), ")".repeat(200));
        assert!(matches!(Expr::compile(&calls, &ds), Err(StepError::InvalidExpression(_))));

        let shallow = format!("{}price{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(Expr::compile(&shallow, &ds).unwrap().eval(&ds.rows()[0]), Value::Number(2.5));
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let ds = dataset();
        let chain = format!("price{}", "+price".repeat(100_000));
        assert!(matches!(Expr::compile(&chain, &ds), Err(StepError::InvalidExpression(_))));

        let short = format!("price{}", "+price".repeat(99));
        assert_eq!(Expr::compile(&short, &ds).unwrap().eval(&ds.rows()[0]), Value::Number(250.0));
    }
}
