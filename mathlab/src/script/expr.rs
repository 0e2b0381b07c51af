//! Numeric expressions for plot scripts
//!
//! A small array language: scalars and 1-D arrays, element-wise arithmetic
//! with broadcasting, and the `np` function set. Parsing is recursive
//! descent with an explicit depth limit; evaluation never touches anything
//! outside the namespace it is given.

use super::{Binding, Namespace, Value};
use crate::SandboxConfig;
use thiserror::Error;

/// Errors from parsing or evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected '{0}'")]
    UnexpectedToken(String),

    #[error("name '{0}' is not defined")]
    UndefinedName(String),

    #[error("'{0}' is not a number or array")]
    NotNumeric(String),

    #[error("'{0}' is not a function")]
    NotCallable(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{name}() got {got} argument(s), expected {expected}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("shape mismatch: arrays of length {0} and {1}")]
    ShapeMismatch(usize, usize),

    #[error("expression nested too deeply (limit {0})")]
    TooDeep(usize),

    #[error("array of {len} elements exceeds the limit of {limit}")]
    TooLarge { len: usize, limit: usize },

    #[error("{0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Assign,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::Pow => "**".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Assign => "=".into(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' if c != '.' || chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent only when digits follow, so `2e` stays `2 * e`
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
                    .map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            _ => {
                let tok = match c {
                    '+' => Token::Plus,
                    '-' | '\u{2212}' => Token::Minus,
                    '*' | '\u{00d7}' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Pow,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '=' => Token::Assign,
                    other => return Err(ExprError::UnexpectedChar(other, i)),
                };
                tokens.push(tok);
                i += 1;
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Dotted name such as `x` or `np.pi`
    Name(Vec<String>),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call {
        path: Vec<String>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExprError::TooDeep(self.max_depth));
        }
        Ok(())
    }

    /// Operator chains build left-deep trees; bound their height as well
    fn check_chain(&self, chain: usize) -> Result<(), ExprError> {
        if self.depth + chain > self.max_depth {
            return Err(ExprError::TooDeep(self.max_depth));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.parse_term()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            chain += 1;
            self.check_chain(chain)?;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            chain += 1;
            self.check_chain(chain)?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Expr::Neg(Box::new(self.parse_unary()?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_unary()?
            }
            _ => self.parse_power()?,
        };
        self.depth -= 1;
        Ok(expr)
    }

    /// `a ** b`, right associative; the exponent may carry a sign
    fn parse_power(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_primary()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => {
                // implicit multiplication: `3x`, `2(x + 1)`, `4x**2`
                if matches!(self.peek(), Some(Token::Ident(_)) | Some(Token::LParen)) {
                    self.enter()?;
                    let rhs = self.parse_power()?;
                    self.depth -= 1;
                    return Ok(Expr::Binary(BinOp::Mul, Box::new(Expr::Number(n)), Box::new(rhs)));
                }
                Ok(Expr::Number(n))
            }
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(part)) => path.push(part),
                        Some(tok) => return Err(ExprError::UnexpectedToken(tok.describe())),
                        None => return Err(ExprError::UnexpectedEnd),
                    }
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let (args, kwargs) = self.parse_args()?;
                    return Ok(Expr::Call { path, args, kwargs });
                }
                Ok(Expr::Name(path))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    match self.next() {
                        Some(Token::Comma) => {
                            if self.peek() == Some(&Token::RBracket) {
                                self.pos += 1;
                                break;
                            }
                        }
                        Some(Token::RBracket) => break,
                        Some(tok) => return Err(ExprError::UnexpectedToken(tok.describe())),
                        None => return Err(ExprError::UnexpectedEnd),
                    }
                }
                Ok(Expr::List(items))
            }
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    /// Arguments after `(`, through the closing `)`
    fn parse_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ExprError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok((args, kwargs));
        }
        loop {
            let is_kwarg = matches!(self.peek(), Some(Token::Ident(_)))
                && self.peek_at(1) == Some(&Token::Assign);
            if is_kwarg {
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(ExprError::UnexpectedEnd);
                };
                self.pos += 1;
                kwargs.push((name, self.parse_expr()?));
            } else if !kwargs.is_empty() {
                return Err(ExprError::InvalidArgument(
                    "positional argument follows keyword argument".to_string(),
                ));
            } else {
                args.push(self.parse_expr()?);
            }
            match self.next() {
                Some(Token::Comma) => {
                    if self.peek() == Some(&Token::RParen) {
                        self.pos += 1;
                        break;
                    }
                }
                Some(Token::RParen) => break,
                Some(tok) => return Err(ExprError::UnexpectedToken(tok.describe())),
                None => return Err(ExprError::UnexpectedEnd),
            }
        }
        Ok((args, kwargs))
    }
}

/// Parse an expression, rejecting trailing input
pub fn parse(src: &str, max_depth: usize) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.parse_expr()?;
    match parser.next() {
        None => Ok(expr),
        Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
    }
}

/// Parse and evaluate in one step
pub fn evaluate(src: &str, ns: &Namespace, limits: &SandboxConfig) -> Result<Value, ExprError> {
    let expr = parse(src, limits.max_expr_depth)?;
    Evaluator { ns, limits }.eval(&expr)
}

struct Evaluator<'a> {
    ns: &'a Namespace,
    limits: &'a SandboxConfig,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Number(n) => Ok(Value::Scalar(*n)),
            Expr::Name(path) => self.lookup(path),
            Expr::List(items) => {
                self.check_len(items.len())?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.eval(item)? {
                        Value::Scalar(v) => out.push(v),
                        Value::Array(_) => {
                            return Err(ExprError::InvalidArgument(
                                "nested lists are not supported".to_string(),
                            ));
                        }
                    }
                }
                Ok(Value::Array(out))
            }
            Expr::Neg(inner) => Ok(self.eval(inner)?.map(|v| -v)),
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                let f: fn(f64, f64) -> f64 = match op {
                    BinOp::Add => |a, b| a + b,
                    BinOp::Sub => |a, b| a - b,
                    BinOp::Mul => |a, b| a * b,
                    BinOp::Div => |a, b| a / b,
                    BinOp::Mod => |a, b| a - b * (a / b).floor(),
                    BinOp::Pow => f64::powf,
                };
                a.zip_with(&b, f)
            }
            Expr::Call { path, args, kwargs } => self.call(path, args, kwargs),
        }
    }

    fn check_len(&self, len: usize) -> Result<(), ExprError> {
        if len > self.limits.max_points {
            return Err(ExprError::TooLarge {
                len,
                limit: self.limits.max_points,
            });
        }
        Ok(())
    }

    fn lookup(&self, path: &[String]) -> Result<Value, ExprError> {
        let dotted = path.join(".");
        match path {
            [name] => match self.ns.get(name) {
                Some(Binding::Value(v)) => Ok(v.clone()),
                Some(_) => Err(ExprError::NotNumeric(dotted)),
                None => constant(name).ok_or(ExprError::UndefinedName(dotted)),
            },
            [module, member] => match self.ns.get(module) {
                Some(Binding::Numeric) => {
                    constant(member).ok_or(ExprError::UndefinedName(dotted))
                }
                Some(Binding::Plot) => Err(ExprError::InvalidArgument(format!(
                    "'{}' is not available in expressions",
                    dotted
                ))),
                Some(_) => Err(ExprError::NotNumeric(dotted)),
                None => Err(ExprError::UndefinedName(module.clone())),
            },
            _ => Err(ExprError::UndefinedName(dotted)),
        }
    }

    fn call(
        &self,
        path: &[String],
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, ExprError> {
        let dotted = path.join(".");
        let name = match path {
            [name] => match self.ns.get(name) {
                Some(_) => return Err(ExprError::NotCallable(dotted)),
                None => name.as_str(),
            },
            [module, member] => match self.ns.get(module) {
                Some(Binding::Numeric) => member.as_str(),
                Some(Binding::Plot) => {
                    return Err(ExprError::InvalidArgument(format!(
                        "'{}' is not available in expressions",
                        dotted
                    )));
                }
                Some(_) => return Err(ExprError::NotCallable(dotted)),
                None => return Err(ExprError::UndefinedName(module.clone())),
            },
            _ => return Err(ExprError::UnknownFunction(dotted)),
        };

        let func = Function::lookup(name).ok_or(ExprError::UnknownFunction(dotted))?;
        let values = self.bind_args(name, func.params(), func.required(), args, kwargs)?;
        func.apply(name, &values, self.limits)
    }

    /// Match positional and keyword arguments to parameter slots
    fn bind_args(
        &self,
        name: &str,
        params: &'static [&'static str],
        required: usize,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Vec<Option<Value>>, ExprError> {
        let got = args.len() + kwargs.len();
        let arity_err = || ExprError::Arity {
            name: name.to_string(),
            expected: arity_text(params.len(), required),
            got,
        };
        if args.len() > params.len() {
            return Err(arity_err());
        }
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (i, arg) in args.iter().enumerate() {
            slots[i] = Some(self.eval(arg)?);
        }
        for (key, arg) in kwargs {
            let idx = params.iter().position(|p| p == key).ok_or_else(|| {
                ExprError::InvalidArgument(format!("{}() got an unexpected keyword '{}'", name, key))
            })?;
            if slots[idx].is_some() {
                return Err(ExprError::InvalidArgument(format!(
                    "{}() got multiple values for '{}'",
                    name, key
                )));
            }
            slots[idx] = Some(self.eval(arg)?);
        }
        if slots.iter().take(required).any(Option::is_none) {
            return Err(arity_err());
        }
        Ok(slots)
    }
}

fn arity_text(params: usize, required: usize) -> &'static str {
    match (required, params) {
        (1, 1) => "1",
        (2, 2) => "2",
        (1, 2) => "1 or 2",
        (1, 3) => "1 to 3",
        (2, 3) => "2 or 3",
        _ => "a different number",
    }
}

fn constant(name: &str) -> Option<Value> {
    let v = match name {
        "pi" | "π" => std::f64::consts::PI,
        "e" => std::f64::consts::E,
        "tau" => std::f64::consts::TAU,
        "inf" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => return None,
    };
    Some(Value::Scalar(v))
}

#[derive(Debug, Clone, Copy)]
enum Function {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Reduce(fn(&[f64]) -> f64),
    Linspace,
    Arange,
    Fill(f64),
    Array,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        use Function::*;
        let f = match name {
            "sin" => Unary(f64::sin),
            "cos" => Unary(f64::cos),
            "tan" => Unary(f64::tan),
            "arcsin" | "asin" => Unary(f64::asin),
            "arccos" | "acos" => Unary(f64::acos),
            "arctan" | "atan" => Unary(f64::atan),
            "sinh" => Unary(f64::sinh),
            "cosh" => Unary(f64::cosh),
            "tanh" => Unary(f64::tanh),
            "exp" => Unary(f64::exp),
            "log" => Unary(f64::ln),
            "log10" => Unary(f64::log10),
            "log2" => Unary(f64::log2),
            "sqrt" => Unary(f64::sqrt),
            "cbrt" => Unary(f64::cbrt),
            "abs" | "fabs" | "absolute" => Unary(f64::abs),
            "floor" => Unary(f64::floor),
            "ceil" => Unary(f64::ceil),
            "round" => Unary(f64::round_ties_even),
            "sign" => Unary(|v| {
                if v > 0.0 {
                    1.0
                } else if v < 0.0 {
                    -1.0
                } else {
                    v
                }
            }),
            "radians" | "deg2rad" => Unary(f64::to_radians),
            "degrees" | "rad2deg" => Unary(f64::to_degrees),
            "power" => Binary(f64::powf),
            "maximum" => Binary(f64::max),
            "minimum" => Binary(f64::min),
            "arctan2" | "atan2" => Binary(f64::atan2),
            "hypot" => Binary(f64::hypot),
            "sum" => Reduce(|xs| xs.iter().sum()),
            "mean" => Reduce(|xs| {
                if xs.is_empty() {
                    f64::NAN
                } else {
                    xs.iter().sum::<f64>() / xs.len() as f64
                }
            }),
            "min" | "amin" => Reduce(|xs| xs.iter().copied().fold(f64::NAN, f64::min)),
            "max" | "amax" => Reduce(|xs| xs.iter().copied().fold(f64::NAN, f64::max)),
            "linspace" => Linspace,
            "arange" => Arange,
            "zeros" => Fill(0.0),
            "ones" => Fill(1.0),
            "array" | "asarray" => Array,
            _ => return None,
        };
        Some(f)
    }

    fn params(&self) -> &'static [&'static str] {
        match self {
            Function::Unary(_) | Function::Reduce(_) | Function::Array => &["x"],
            Function::Binary(_) => &["x1", "x2"],
            Function::Linspace => &["start", "stop", "num"],
            Function::Arange => &["start", "stop", "step"],
            Function::Fill(_) => &["shape"],
        }
    }

    fn required(&self) -> usize {
        match self {
            Function::Binary(_) | Function::Linspace => 2,
            _ => 1,
        }
    }

    fn apply(
        &self,
        name: &str,
        args: &[Option<Value>],
        limits: &SandboxConfig,
    ) -> Result<Value, ExprError> {
        let arg = |i: usize| args.get(i).and_then(|a| a.as_ref());
        let scalar = |i: usize, param: &str| -> Result<Option<f64>, ExprError> {
            match arg(i) {
                None => Ok(None),
                Some(Value::Scalar(v)) => Ok(Some(*v)),
                Some(Value::Array(_)) => Err(ExprError::InvalidArgument(format!(
                    "{}(): '{}' must be a number",
                    name, param
                ))),
            }
        };
        let required = |i: usize| arg(i).ok_or(ExprError::UnexpectedEnd);

        match self {
            Function::Unary(f) => Ok(required(0)?.map(*f)),
            Function::Binary(f) => required(0)?.zip_with(required(1)?, *f),
            Function::Reduce(f) => Ok(Value::Scalar(match required(0)? {
                Value::Scalar(v) => f(std::slice::from_ref(v)),
                Value::Array(xs) => f(xs),
            })),
            Function::Array => Ok(match required(0)? {
                Value::Scalar(v) => Value::Array(vec![*v]),
                arr => arr.clone(),
            }),
            Function::Fill(v) => {
                let n = count_arg(name, scalar(0, "shape")?.unwrap_or(0.0))?;
                check_points(n, limits)?;
                Ok(Value::Array(vec![*v; n]))
            }
            Function::Linspace => {
                let start = finite(name, "start", scalar(0, "start")?.unwrap_or(0.0))?;
                let stop = finite(name, "stop", scalar(1, "stop")?.unwrap_or(0.0))?;
                let num = count_arg(name, scalar(2, "num")?.unwrap_or(50.0))?;
                check_points(num, limits)?;
                let values = match num {
                    0 => Vec::new(),
                    1 => vec![start],
                    n => {
                        let step = (stop - start) / (n - 1) as f64;
                        (0..n)
                            .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                            .collect()
                    }
                };
                Ok(Value::Array(values))
            }
            Function::Arange => {
                // arange(stop) or arange(start, stop[, step])
                let first = finite(name, "start", scalar(0, "start")?.unwrap_or(0.0))?;
                let (start, stop) = match scalar(1, "stop")? {
                    Some(stop) => (first, finite(name, "stop", stop)?),
                    None => (0.0, first),
                };
                let step = finite(name, "step", scalar(2, "step")?.unwrap_or(1.0))?;
                if step == 0.0 {
                    return Err(ExprError::InvalidArgument(format!("{}(): step must not be zero", name)));
                }
                let span = ((stop - start) / step).ceil();
                let n = if span > 0.0 { span } else { 0.0 };
                if n > limits.max_points as f64 {
                    return Err(ExprError::TooLarge {
                        len: n.min(usize::MAX as f64) as usize,
                        limit: limits.max_points,
                    });
                }
                let n = n as usize;
                Ok(Value::Array((0..n).map(|i| start + step * i as f64).collect()))
            }
        }
    }
}

fn finite(name: &str, param: &str, v: f64) -> Result<f64, ExprError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ExprError::InvalidArgument(format!("{}(): '{}' must be finite", name, param)))
    }
}

fn count_arg(name: &str, v: f64) -> Result<usize, ExprError> {
    if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
        return Err(ExprError::InvalidArgument(format!(
            "{}(): expected a non-negative whole number, got {}",
            name, v
        )));
    }
    if v > usize::MAX as f64 {
        return Err(ExprError::InvalidArgument(format!("{}(): {} is too large", name, v)));
    }
    Ok(v as usize)
}

fn check_points(n: usize, limits: &SandboxConfig) -> Result<(), ExprError> {
    if n > limits.max_points {
        return Err(ExprError::TooLarge {
            len: n,
            limit: limits.max_points,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> Result<Value, ExprError> {
        evaluate(src, &Namespace::fresh(), &SandboxConfig::default())
    }

    fn scalar(src: &str) -> f64 {
        match eval(src).unwrap() {
            Value::Scalar(v) => v,
            other => panic!("expected scalar from {:?}, got {:?}", src, other),
        }
    }

    fn array(src: &str) -> Vec<f64> {
        match eval(src).unwrap() {
            Value::Array(v) => v,
            other => panic!("expected array from {:?}, got {:?}", src, other),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(scalar("1 + 2 * 3"), 7.0);
        assert_eq!(scalar("(1 + 2) * 3"), 9.0);
        assert_eq!(scalar("2 ** 3 ** 2"), 512.0);
        assert_eq!(scalar("-2 ** 2"), -4.0);
        assert_eq!(scalar("2 ** -1"), 0.5);
        assert_eq!(scalar("2^3"), 8.0);
        assert_eq!(scalar("10 - 4 - 3"), 3.0);
    }

    #[test]
    fn test_modulo_follows_divisor_sign() {
        assert_eq!(scalar("7 % 3"), 1.0);
        assert_eq!(scalar("-7 % 3"), 2.0);
    }

    #[test]
    fn test_implicit_multiplication() {
        let mut ns = Namespace::fresh();
        ns.bind_value("x", Value::Scalar(2.0)).unwrap();
        let limits = SandboxConfig::default();
        let v = |s: &str| evaluate(s, &ns, &limits).unwrap();
        assert_eq!(v("3x - 2"), Value::Scalar(4.0));
        assert_eq!(v("4x**2"), Value::Scalar(16.0));
        assert_eq!(v("2(x + 1)"), Value::Scalar(6.0));
        assert_eq!(v("2e"), Value::Scalar(2.0 * std::f64::consts::E));
        assert_eq!(v("2e3"), Value::Scalar(2000.0));
    }

    #[test]
    fn test_constants_and_module_access() {
        assert_eq!(scalar("np.pi"), std::f64::consts::PI);
        assert_eq!(scalar("pi"), std::f64::consts::PI);
        assert!((scalar("np.sin(np.pi / 2)") - 1.0).abs() < 1e-12);
        assert!((scalar("cos(0)") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_linspace() {
        let xs = array("np.linspace(-10, 10, 5)");
        assert_eq!(xs, vec![-10.0, -5.0, 0.0, 5.0, 10.0]);
        assert_eq!(array("np.linspace(0, 1)").len(), 50);
        assert_eq!(array("np.linspace(0, 1, num=3)"), vec![0.0, 0.5, 1.0]);
        assert_eq!(array("np.linspace(3, 9, 1)"), vec![3.0]);
        assert!(array("np.linspace(0, 1, 0)").is_empty());
    }

    #[test]
    fn test_arange() {
        assert_eq!(array("np.arange(4)"), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(array("np.arange(1, 2, 0.25)"), vec![1.0, 1.25, 1.5, 1.75]);
        assert_eq!(array("np.arange(5, 1, -2)"), vec![5.0, 3.0]);
        assert!(array("np.arange(5, 1)").is_empty());
        assert!(matches!(eval("np.arange(0, 1, 0)"), Err(ExprError::InvalidArgument(_))));
    }

    #[test]
    fn test_broadcasting() {
        assert_eq!(array("[1, 2, 3] * 2 + 1"), vec![3.0, 5.0, 7.0]);
        assert_eq!(array("[1, 2] + [10, 20]"), vec![11.0, 22.0]);
        assert_eq!(
            eval("[1, 2] + [1, 2, 3]"),
            Err(ExprError::ShapeMismatch(2, 3))
        );
    }

    #[test]
    fn test_reductions() {
        assert_eq!(scalar("np.sum([1, 2, 3])"), 6.0);
        assert_eq!(scalar("np.mean([1, 2, 3])"), 2.0);
        assert_eq!(scalar("np.max([1, 5, 3])"), 5.0);
        assert_eq!(scalar("np.min(4)"), 4.0);
    }

    #[test]
    fn test_round_and_sign_match_numpy() {
        assert_eq!(array("np.round([0.5, 1.5, 2.5])"), vec![0.0, 2.0, 2.0]);
        assert_eq!(array("np.sign([-3, 0, 2])"), vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_division_by_zero_is_not_an_error() {
        assert!(scalar("1 / 0").is_infinite());
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval("y + 1"), Err(ExprError::UndefinedName("y".to_string())));
        assert_eq!(eval("np.frobnicate(1)"), Err(ExprError::UnknownFunction("np.frobnicate".to_string())));
        assert!(matches!(eval("plt.plot(1)"), Err(ExprError::InvalidArgument(_))));
        assert!(matches!(eval("np"), Err(ExprError::NotNumeric(_))));
        assert!(matches!(eval("np.sin()"), Err(ExprError::Arity { .. })));
        assert!(matches!(eval("np.sin(1, 2)"), Err(ExprError::Arity { .. })));
        assert!(matches!(eval("np.linspace(0, 1, step=2)"), Err(ExprError::InvalidArgument(_))));
        assert_eq!(eval("1 +"), Err(ExprError::UnexpectedEnd));
        assert_eq!(eval(""), Err(ExprError::UnexpectedEnd));
        assert!(matches!(eval("1 2"), Err(ExprError::UnexpectedToken(_))));
        assert!(matches!(eval("x @ y"), Err(ExprError::UnexpectedChar('@', 2))));
        assert!(matches!(eval("__import__('os')"), Err(ExprError::UnexpectedChar('\'', 11))));
    }

    #[test]
    fn test_user_binding_is_not_callable() {
        let mut ns = Namespace::fresh();
        ns.bind_value("f", Value::Scalar(1.0)).unwrap();
        let err = evaluate("f(2)", &ns, &SandboxConfig::default()).unwrap_err();
        assert_eq!(err, ExprError::NotCallable("f".to_string()));
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(eval(&deep), Err(ExprError::TooDeep(64))));
        let negs = format!("{}1", "-".repeat(500));
        assert!(matches!(eval(&negs), Err(ExprError::TooDeep(64))));
        let long_sum = vec!["1"; 5000].join(" + ");
        assert!(matches!(eval(&long_sum), Err(ExprError::TooDeep(64))));
        let poly = "x**4 - 3*x**3 + 2*x**2 - x + 7".replace('x', "2");
        assert_eq!(scalar(&poly), 16.0 - 24.0 + 8.0 - 2.0 + 7.0);
    }

    #[test]
    fn test_point_limit() {
        let limits = SandboxConfig {
            max_points: 100,
            ..SandboxConfig::default()
        };
        let ns = Namespace::fresh();
        let err = evaluate("np.linspace(0, 1, 1000000)", &ns, &limits).unwrap_err();
        assert_eq!(err, ExprError::TooLarge { len: 1_000_000, limit: 100 });
        let err = evaluate("np.arange(0, 1e12)", &ns, &limits).unwrap_err();
        assert!(matches!(err, ExprError::TooLarge { .. }));
        let err = evaluate("np.zeros(101)", &ns, &limits).unwrap_err();
        assert!(matches!(err, ExprError::TooLarge { .. }));
    }
}
