//! Expression parsing and evaluation for the executable form. The
//! grammar is deliberately small: variables with paths, literals,
//! arithmetic/comparison/boolean operators, a ternary, and calls into
//! a fixed builtin table. Values are `serde_json::Value`.

use serde_json::{Number, Value};

use crate::error::{Result, ScytheError};
use crate::escape::html_escape;

use super::Ctx;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Expr>),
    Var(String),
    /// `base.key`, `base->key` or `base[key]`
    Index(Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
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

fn syntax(msg: impl Into<String>) -> ScytheError {
    ScytheError::Syntax(msg.into())
}

fn exec_err(msg: impl Into<String>) -> ScytheError {
    ScytheError::Exec(msg.into())
}

impl Expr {
    /// Parse `src` as a complete expression.
    pub fn parse(src: &str) -> Result<Expr> {
        let mut p = Parser {
            bytes: src.as_bytes(),
            src,
            pos: 0,
        };
        let e = p.ternary()?;
        p.skip_ws();
        if p.pos != p.bytes.len() {
            return Err(syntax(format!(
                "trailing input in expression '{src}' at offset {}",
                p.pos
            )));
        }
        Ok(e)
    }
}

struct Parser<'s> {
    bytes: &'s [u8],
    src: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, tok: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(tok) {
            self.pos += tok.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &str) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(syntax(format!(
                "expected '{tok}' at offset {} in '{}'",
                self.pos, self.src
            )))
        }
    }

    fn ternary(&mut self) -> Result<Expr> {
        let cond = self.or()?;
        self.skip_ws();
        // `?` but not `?>`; the tag scanner never hands us one, still
        if self.src[self.pos..].starts_with('?') && !self.src[self.pos..].starts_with("?>") {
            self.pos += 1;
            let t = self.ternary()?;
            self.expect(":")?;
            let f = self.ternary()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(t), Box::new(f)));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut e = self.and()?;
        while self.eat("||") {
            let rhs = self.and()?;
            e = Expr::Binary(BinOp::Or, Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut e = self.equality()?;
        while self.eat("&&") {
            let rhs = self.equality()?;
            e = Expr::Binary(BinOp::And, Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut e = self.comparison()?;
        loop {
            let op = if self.eat("==") {
                BinOp::Eq
            } else if self.eat("!=") {
                BinOp::Ne
            } else {
                return Ok(e);
            };
            let rhs = self.comparison()?;
            e = Expr::Binary(op, Box::new(e), Box::new(rhs));
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut e = self.additive()?;
        loop {
            let op = if self.eat("<=") {
                BinOp::Le
            } else if self.eat(">=") {
                BinOp::Ge
            } else if self.peek() == Some(b'<') {
                self.pos += 1;
                BinOp::Lt
            } else if self.peek() == Some(b'>') {
                self.pos += 1;
                BinOp::Gt
            } else {
                return Ok(e);
            };
            let rhs = self.additive()?;
            e = Expr::Binary(op, Box::new(e), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut e = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(b'+') => BinOp::Add,
                Some(b'-') => BinOp::Sub,
                _ => return Ok(e),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            e = Expr::Binary(op, Box::new(e), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut e = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(b'*') => BinOp::Mul,
                Some(b'/') => BinOp::Div,
                Some(b'%') => BinOp::Rem,
                _ => return Ok(e),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            e = Expr::Binary(op, Box::new(e), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        self.skip_ws();
        if self.src[self.pos..].starts_with('!') && !self.src[self.pos..].starts_with("!=") {
            self.pos += 1;
            let e = self.unary()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(e)));
        }
        if self.peek() == Some(b'-') {
            self.pos += 1;
            let e = self.unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(e)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut e = self.primary()?;
        loop {
            self.skip_ws();
            if self.eat("->") || self.eat(".") {
                let key = self.ident()?;
                e = Expr::Index(Box::new(e), Box::new(Expr::Str(key)));
            } else if self.peek() == Some(b'[') {
                self.pos += 1;
                let key = self.ternary()?;
                self.expect("]")?;
                e = Expr::Index(Box::new(e), Box::new(key));
            } else {
                return Ok(e);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek() {
            None => Err(syntax(format!("empty expression in '{}'", self.src))),
            Some(b'(') => {
                self.pos += 1;
                let e = self.ternary()?;
                self.expect(")")?;
                Ok(e)
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.peek() != Some(b']') {
                    loop {
                        items.push(self.ternary()?);
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
                self.expect("]")?;
                Ok(Expr::Array(items))
            }
            Some(b'$') => {
                self.pos += 1;
                let name = self.ident()?;
                Ok(Expr::Var(name))
            }
            Some(q @ (b'\'' | b'"')) => self.string(q),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let name = self.ident()?;
                match name.as_str() {
                    "true" => return Ok(Expr::Bool(true)),
                    "false" => return Ok(Expr::Bool(false)),
                    "null" => return Ok(Expr::Null),
                    _ => {}
                }
                self.expect("(")?;
                let mut args = Vec::new();
                if self.peek() != Some(b')') {
                    loop {
                        args.push(self.ternary()?);
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
                self.expect(")")?;
                Ok(Expr::Call(name, args))
            }
            Some(c) => Err(syntax(format!(
                "unexpected character '{}' in expression '{}'",
                c as char, self.src
            ))),
        }
    }

    fn ident(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(syntax(format!(
                "expected identifier at offset {start} in '{}'",
                self.src
            )));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn string(&mut self, quote: u8) -> Result<Expr> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        while let Some(&c) = self.bytes.get(self.pos) {
            if c == b'\\' {
                let esc = self
                    .bytes
                    .get(self.pos + 1)
                    .ok_or_else(|| syntax("unterminated escape in string literal"))?;
                out.push(match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    other => *other as char,
                });
                self.pos += 2;
                continue;
            }
            if c == quote {
                self.pos += 1;
                return Ok(Expr::Str(out));
            }
            let ch = self.src[self.pos..].chars().next().unwrap();
            out.push(ch);
            self.pos += ch.len_utf8();
        }
        Err(syntax(format!("unterminated string literal in '{}'", self.src)))
    }

    fn number(&mut self) -> Result<Expr> {
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_digit() || self.bytes[self.pos] == b'.')
        {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        if text.contains('.') {
            text.parse::<f64>()
                .map(Expr::Float)
                .map_err(|_| syntax(format!("bad number literal '{text}'")))
        } else {
            text.parse::<i64>()
                .map(Expr::Int)
                .map_err(|_| syntax(format!("bad number literal '{text}'")))
        }
    }
}

// ------------------------------------------------------------------
// Evaluation

/// Loose truthiness: null, false, 0, "", "0" and empty collections
/// are false.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Text form as echoed: null is empty, booleans echo as "1"/"".
pub fn to_display(v: &Value) -> Result<String> {
    match v {
        Value::Null => Ok(String::new()),
        Value::Bool(true) => Ok("1".to_string()),
        Value::Bool(false) => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            Err(exec_err("cannot render an array or object as text"))
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) | Value::Null => Some(0.0),
        _ => None,
    }
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Loose equality: numeric when both sides look numeric, otherwise
/// by display form.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        if matches!(a, Value::Number(_) | Value::Bool(_) | Value::Null)
            || matches!(b, Value::Number(_) | Value::Bool(_) | Value::Null)
            || (matches!(a, Value::String(_)) && matches!(b, Value::String(_)))
        {
            return x == y;
        }
    }
    match (to_display(a), to_display(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

pub fn eval(e: &Expr, ctx: &Ctx) -> Result<Value> {
    match e {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::from(*i)),
        Expr::Float(f) => Ok(number_value(*f)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Array(items) => {
            let vals: Result<Vec<Value>> = items.iter().map(|i| eval(i, ctx)).collect();
            Ok(Value::Array(vals?))
        }
        Expr::Var(name) => {
            if name == "loop" {
                return Err(exec_err(
                    "the loop context is only accessible through its properties",
                ));
            }
            // an unbound variable reads as null
            Ok(ctx.lookup(name).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, key) => {
            if let Expr::Var(name) = base.as_ref() {
                if name == "loop" {
                    let key = eval(key, ctx)?;
                    let key = key
                        .as_str()
                        .ok_or_else(|| exec_err("loop property name must be a string"))?
                        .to_string();
                    return ctx.loops.property(&key);
                }
            }
            let base = eval(base, ctx)?;
            let key = eval(key, ctx)?;
            Ok(index_value(&base, &key))
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!truthy(&v))),
                UnOp::Neg => {
                    let n = as_number(&v)
                        .ok_or_else(|| exec_err("cannot negate a non-numeric value"))?;
                    Ok(number_value(-n))
                }
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary(c, t, f) => {
            if truthy(&eval(c, ctx)?) {
                eval(t, ctx)
            } else {
                eval(f, ctx)
            }
        }
        Expr::Call(name, args) => {
            let vals: Result<Vec<Value>> = args.iter().map(|a| eval(a, ctx)).collect();
            call_builtin(name, &vals?)
        }
    }
}

fn index_value(base: &Value, key: &Value) -> Value {
    match base {
        Value::Array(items) => key
            .as_u64()
            .or_else(|| key.as_str().and_then(|s| s.parse().ok()))
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        Value::Object(map) => match key {
            Value::String(s) => map.get(s).cloned().unwrap_or(Value::Null),
            other => match to_display(other) {
                Ok(s) => map.get(&s).cloned().unwrap_or(Value::Null),
                Err(_) => Value::Null,
            },
        },
        _ => Value::Null,
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &Ctx) -> Result<Value> {
    // short-circuiting first
    match op {
        BinOp::Or => {
            if truthy(&eval(lhs, ctx)?) {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(truthy(&eval(rhs, ctx)?)));
        }
        BinOp::And => {
            if !truthy(&eval(lhs, ctx)?) {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(truthy(&eval(rhs, ctx)?)));
        }
        _ => {}
    }
    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&l, &r) {
                (Value::String(a), Value::String(b))
                    if as_number(&l).is_none() || as_number(&r).is_none() =>
                {
                    a.cmp(b) as i32 as f64
                }
                _ => {
                    let a = as_number(&l)
                        .ok_or_else(|| exec_err("cannot compare a non-numeric value"))?;
                    let b = as_number(&r)
                        .ok_or_else(|| exec_err("cannot compare a non-numeric value"))?;
                    if a < b {
                        -1.0
                    } else if a > b {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering < 0.0,
                BinOp::Le => ordering <= 0.0,
                BinOp::Gt => ordering > 0.0,
                _ => ordering >= 0.0,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let a = as_number(&l).ok_or_else(|| exec_err("arithmetic on a non-numeric value"))?;
            let b = as_number(&r).ok_or_else(|| exec_err("arithmetic on a non-numeric value"))?;
            let f = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(exec_err("division by zero"));
                    }
                    a / b
                }
                _ => {
                    if b == 0.0 {
                        return Err(exec_err("division by zero"));
                    }
                    a % b
                }
            };
            Ok(number_value(f))
        }
        BinOp::Or | BinOp::And => unreachable!(),
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value> {
    let arg = |i: usize| -> Result<&Value> {
        args.get(i)
            .ok_or_else(|| exec_err(format!("{name}() is missing argument {}", i + 1)))
    };
    match name {
        "html" => Ok(Value::String(html_escape(&to_display(arg(0)?)?))),
        "lower" => Ok(Value::String(to_display(arg(0)?)?.to_lowercase())),
        "upper" => Ok(Value::String(to_display(arg(0)?)?.to_uppercase())),
        "ucfirst" => Ok(Value::String(ucfirst(&to_display(arg(0)?)?.to_lowercase()))),
        "ucwords" => Ok(Value::String(ucwords(&to_display(arg(0)?)?.to_lowercase()))),
        "json" => serde_json::to_string(arg(0)?)
            .map(Value::String)
            .map_err(|e| exec_err(format!("json(): {e}"))),
        "format" => {
            let fmt = to_display(arg(0)?)?;
            sprintf(&fmt, &args[1..]).map(Value::String)
        }
        "wrap" => {
            let s = to_display(arg(0)?)?;
            let width = match args.get(1) {
                Some(v) => as_number(v)
                    .ok_or_else(|| exec_err("wrap(): width must be numeric"))?
                    as usize,
                None => 75,
            };
            let brk = match args.get(2) {
                Some(v) => to_display(v)?,
                None => "\n".to_string(),
            };
            Ok(Value::String(wordwrap(&s, width.max(1), &brk)))
        }
        "count" => match arg(0)? {
            Value::Array(a) => Ok(Value::from(a.len() as u64)),
            Value::Object(o) => Ok(Value::from(o.len() as u64)),
            _ => Err(exec_err("count(): argument is not countable")),
        },
        "isset" => Ok(Value::Bool(!arg(0)?.is_null())),
        "empty" => Ok(Value::Bool(!truthy(arg(0)?))),
        other => Err(exec_err(format!("call to unknown function {other}()"))),
    }
}

fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn ucwords(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

/// Minimal sprintf: %s %d %f %x %X %o %b %%, with 0-padding, width
/// and precision (`%05d`, `%.2f`).
fn sprintf(fmt: &str, args: &[Value]) -> Result<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 0usize;
    let mut take = |next_arg: &mut usize| -> Result<Value> {
        let v = args
            .get(*next_arg)
            .cloned()
            .ok_or_else(|| exec_err("format(): not enough arguments"))?;
        *next_arg += 1;
        Ok(v)
    };
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut zero_pad = false;
        let mut width = 0usize;
        let mut precision: Option<usize> = None;
        while let Some(&p) = chars.peek() {
            match p {
                '0' if width == 0 && !zero_pad => {
                    zero_pad = true;
                    chars.next();
                }
                '1'..='9' => {
                    width = width * 10 + (p as usize - '0' as usize);
                    chars.next();
                }
                '.' => {
                    chars.next();
                    let mut prec = 0;
                    while let Some(&d) = chars.peek() {
                        if let Some(dv) = d.to_digit(10) {
                            prec = prec * 10 + dv as usize;
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    precision = Some(prec);
                }
                _ => break,
            }
        }
        let conv = chars
            .next()
            .ok_or_else(|| exec_err("format(): dangling % at end of format string"))?;
        let rendered = match conv {
            '%' => "%".to_string(),
            's' => to_display(&take(&mut next_arg)?)?,
            'd' => {
                let n = as_number(&take(&mut next_arg)?)
                    .ok_or_else(|| exec_err("format(): %d needs a number"))?;
                format!("{}", n as i64)
            }
            'f' => {
                let n = as_number(&take(&mut next_arg)?)
                    .ok_or_else(|| exec_err("format(): %f needs a number"))?;
                format!("{:.*}", precision.unwrap_or(6), n)
            }
            'x' => format!("{:x}", integer_arg(&take(&mut next_arg)?)?),
            'X' => format!("{:X}", integer_arg(&take(&mut next_arg)?)?),
            'o' => format!("{:o}", integer_arg(&take(&mut next_arg)?)?),
            'b' => format!("{:b}", integer_arg(&take(&mut next_arg)?)?),
            other => {
                return Err(exec_err(format!(
                    "format(): unsupported conversion %{other}"
                )))
            }
        };
        if rendered.len() < width {
            let pad = if zero_pad { '0' } else { ' ' };
            for _ in 0..width - rendered.len() {
                out.push(pad);
            }
        }
        out.push_str(&rendered);
    }
    Ok(out)
}

fn integer_arg(v: &Value) -> Result<i64> {
    as_number(v)
        .map(|f| f as i64)
        .ok_or_else(|| exec_err("format(): integer conversion needs a number"))
}

/// Greedy word wrap, the wordwrap() the @wrap mutator is built on.
fn wordwrap(s: &str, width: usize, brk: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, line) in s.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut col = 0;
        for (j, word) in line.split(' ').enumerate() {
            if j > 0 {
                if col + 1 + word.chars().count() > width && col > 0 {
                    out.push_str(brk);
                    col = 0;
                } else {
                    out.push(' ');
                    col += 1;
                }
            }
            out.push_str(word);
            col += word.chars().count();
        }
    }
    out
}
