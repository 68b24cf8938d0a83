//! Test / bind expressions.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | cmp
//! cmp     := add (("==" | "!=" | "<" | "<=" | ">" | ">=") add)?
//! add     := mul (("+" | "-") mul)*
//! mul     := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := number | 'str' | "str" | null | true | false | path | "(" or ")"
//! ```
//!
//! `eq`, `neq`, `lt`, `lte`, `gt`, `gte` are accepted as comparison words.
//! Paths resolve through the interpreter scope; an absent path evaluates to
//! `null`. `path.length` yields the length of an array or string.

use crate::error::{SqlError, SqlResult};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Path(String),
    Null,
    True,
    False,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Op(BinOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
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

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

fn tokenize(src: &str) -> SqlResult<Vec<Token>> {
    let err = |msg: String| SqlError::condition(src, msg);
    let chars: Vec<char> = src.chars().collect();
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
            '\'' | '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string literal".into())),
                        Some('\\') => {
                            if let Some(n) = chars.get(i + 1) {
                                s.push(*n);
                            }
                            i += 2;
                        }
                        Some(&q) if q == c => {
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            s.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid number '{text}'")))?;
                tokens.push(Token::Num(n));
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (tok, len) = match (c, next) {
                    ('=', Some('=')) => {
                        let len = if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                        (Token::Op(BinOp::Eq), len)
                    }
                    ('!', Some('=')) => {
                        let len = if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                        (Token::Op(BinOp::Ne), len)
                    }
                    ('!', _) => (Token::Not, 1),
                    ('<', Some('=')) => (Token::Op(BinOp::Le), 2),
                    ('<', _) => (Token::Op(BinOp::Lt), 1),
                    ('>', Some('=')) => (Token::Op(BinOp::Ge), 2),
                    ('>', _) => (Token::Op(BinOp::Gt), 1),
                    _ => return Err(err(format!("unexpected '{c}'"))),
                };
                tokens.push(tok);
                i += len;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(err(format!("unexpected '{c}'")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op(BinOp::Sub));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '%' => {
                tokens.push(Token::Op(BinOp::Rem));
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.' | '[' | ']'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let tok = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "null" | "undefined" => Token::Null,
                    "true" => Token::True,
                    "false" => Token::False,
                    "eq" => Token::Op(BinOp::Eq),
                    "neq" => Token::Op(BinOp::Ne),
                    "lt" => Token::Op(BinOp::Lt),
                    "lte" => Token::Op(BinOp::Le),
                    "gt" => Token::Op(BinOp::Gt),
                    "gte" => Token::Op(BinOp::Ge),
                    _ => Token::Path(word),
                };
                tokens.push(tok);
            }
            other => return Err(err(format!("unexpected '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn err(&self, msg: impl Into<String>) -> SqlError {
        SqlError::condition(self.src, msg)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn or(&mut self) -> SqlResult<Expr> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> SqlResult<Expr> {
        let mut lhs = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> SqlResult<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.cmp()
    }

    fn cmp(&mut self) -> SqlResult<Expr> {
        let lhs = self.add()?;
        if let Some(Token::Op(
            op @ (BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge),
        )) = self.peek().cloned()
        {
            self.bump();
            let rhs = self.add()?;
            return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn add(&mut self) -> SqlResult<Expr> {
        let mut lhs = self.mul()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.bump();
            let rhs = self.mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn mul(&mut self) -> SqlResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Rem))) = self.peek().cloned() {
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> SqlResult<Expr> {
        if self.peek() == Some(&Token::Op(BinOp::Sub)) {
            self.bump();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> SqlResult<Expr> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Path(p)) => Ok(Expr::Path(p)),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.err("expected ')'")),
                }
            }
            Some(other) => Err(self.err(format!("unexpected token {other:?}"))),
            None => Err(self.err("unexpected end of expression")),
        }
    }
}

impl Expr {
    /// Parse an expression.
    pub fn parse(src: &str) -> SqlResult<Self> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(SqlError::condition(src, "empty expression"));
        }
        let mut parser = Parser {
            src,
            tokens,
            pos: 0,
        };
        let expr = parser.or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.err("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Evaluate with `lookup` resolving paths.
    pub fn eval<F>(&self, lookup: &F) -> SqlResult<Value>
    where
        F: Fn(&str) -> Option<Value>,
    {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(p) => resolve_path(p, lookup),
            Expr::Not(e) => Value::Bool(!truthy(&e.eval(lookup)?)),
            Expr::Neg(e) => {
                let v = e.eval(lookup)?;
                let n = to_number(&v).ok_or_else(|| eval_err(self, "operand is not a number"))?;
                number(-n)
            }
            Expr::And(a, b) => {
                let l = a.eval(lookup)?;
                if !truthy(&l) {
                    l
                } else {
                    b.eval(lookup)?
                }
            }
            Expr::Or(a, b) => {
                let l = a.eval(lookup)?;
                if truthy(&l) {
                    l
                } else {
                    b.eval(lookup)?
                }
            }
            Expr::Binary(op, a, b) => {
                let l = a.eval(lookup)?;
                let r = b.eval(lookup)?;
                binary(*op, &l, &r).map_err(|msg| eval_err(self, msg))?
            }
        })
    }

    /// Evaluate to a boolean.
    pub fn test<F>(&self, lookup: &F) -> SqlResult<bool>
    where
        F: Fn(&str) -> Option<Value>,
    {
        Ok(truthy(&self.eval(lookup)?))
    }
}

fn eval_err(expr: &Expr, msg: &str) -> SqlError {
    SqlError::condition(format!("{expr:?}"), msg)
}

fn resolve_path<F>(path: &str, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<Value>,
{
    if let Some(v) = lookup(path) {
        return v;
    }
    if let Some(base) = path.strip_suffix(".length") {
        return match lookup(base) {
            Some(Value::Array(a)) => Value::from(a.len()),
            Some(Value::String(s)) => Value::from(s.chars().count()),
            Some(Value::Object(m)) => Value::from(m.len()),
            _ => Value::Null,
        };
    }
    Value::Null
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn to_number(v: &Value) -> Option<f64> {
    match v {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Some(0.0)
            } else {
                t.parse().ok()
            }
        }
        _ => None,
    }
}

fn to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dynamic truthiness: null, false, 0, NaN and `""` are false.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Loose equality: null equals only null; numbers compare with numeric strings.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => a == b,
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, &'static str> {
    let num = |v: &Value| to_number(v).ok_or("operand is not a number");
    Ok(match op {
        BinOp::Eq => Value::Bool(loose_eq(l, r)),
        BinOp::Ne => Value::Bool(!loose_eq(l, r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (l, r) {
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => match (to_number(l), to_number(r)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            };
            let Some(ord) = ord else {
                return Ok(Value::Bool(false));
            };
            Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
        BinOp::Add => {
            if l.is_string() || r.is_string() {
                Value::String(format!("{}{}", to_text(l), to_text(r)))
            } else {
                number(num(l)? + num(r)?)
            }
        }
        BinOp::Sub => number(num(l)? - num(r)?),
        BinOp::Mul => number(num(l)? * num(r)?),
        BinOp::Div | BinOp::Rem => {
            let d = num(r)?;
            if d == 0.0 {
                return Err("division by zero");
            }
            if op == BinOp::Div {
                number(num(l)? / d)
            } else {
                number(num(l)? % d)
            }
        }
    })
}
