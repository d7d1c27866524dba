//! Expression lexer, AST, parser, and evaluator.
//!
//! Expressions appear as the argument tail of `Set`, `If`, `While`,
//! `Repeat`, `Jump`, `Wait` and function-call statements.  They support
//! integer/float arithmetic, string comparison (case-insensitive), the
//! ternary operator, glob (`=~`) and regex (`=/`) matching, and calls to a
//! few numeric built-ins.
//!
//! Bare identifiers parse to [`Reference::Name`]; the compiler's resolve
//! phase rewrites them in place through [`Expr::for_each_ref_mut`], so at
//! run time every name is already bound to its backing store.
//!
//! Operator precedence (lowest → highest):
//!   ternary  →  or  →  and  →  relational  →  additive  →
//!   multiplicative  →  unary  →  primary

use std::cmp::Ordering;

use regex::RegexBuilder;

use super::reference::Reference;
use super::value::Value;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Symbol-resolution contract used by the evaluator.
///
/// The [`Interpreter`](super::interp::Interpreter) implements this so that
/// references read from the right store (call arguments, internal
/// variables, user variables or engine parameters).
pub trait EvalContext {
    /// Read the current value of a resolved reference.
    fn get(&mut self, reference: &Reference) -> Value;

    /// Invoke a named function.  The default knows only the numeric built-ins.
    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        builtin(name, &args).unwrap_or_else(|| Err(format!("unknown function {name}")))
    }
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Lit(Value),
    Name(String),
    Sym(&'static str),
}

/// Operator and punctuation spellings, longest first so `<=` wins over `<`.
const SYMBOLS: &[&str] = &[
    "==", "!=", "<>", "<=", ">=", "=~", "=/", "!~", "!/", "&&", "||",
    "+", "-", "*", "/", "%", "!", "<", ">", "=", "&", "|", "?", ":", ",", "(", ")",
];

fn tokenize(src: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut rest = src.trim_start();
    while let Some(c) = rest.chars().next() {
        let (tok, len) = if c.is_ascii_digit() {
            number(rest)?
        } else if c == '"' || c == '\'' {
            string(rest, c)
        } else if c.is_ascii_alphabetic() || c == '_' {
            let len = rest.bytes().take_while(|b| b.is_ascii_alphanumeric() || *b == b'_').count();
            let tok = match rest[..len].to_ascii_lowercase().as_str() {
                "and" => Tok::Sym("&&"),
                "or" => Tok::Sym("||"),
                "not" => Tok::Sym("!"),
                _ => Tok::Name(rest[..len].to_owned()),
            };
            (tok, len)
        } else if c == '$' && rest[1..].starts_with(|d: char| d.is_ascii_digit()) {
            let len = 1 + rest[1..].bytes().take_while(u8::is_ascii_digit).count();
            (Tok::Name(rest[..len].to_owned()), len)
        } else if let Some(sym) = SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            (Tok::Sym(*sym), sym.len())
        } else {
            return Err(format!("unexpected character {c:?}"));
        };
        toks.push(tok);
        rest = rest[len..].trim_start();
    }
    Ok(toks)
}

/// Decimal integer, real (`1.5`) or hex integer (`0x1f`).
fn number(s: &str) -> Result<(Tok, usize), String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let digits = hex.bytes().take_while(u8::is_ascii_hexdigit).count();
        let n = i64::from_str_radix(&hex[..digits], 16).map_err(|e| format!("bad number {s:?}: {e}"))?;
        return Ok((Tok::Lit(Value::Int(n)), 2 + digits));
    }
    let whole = s.bytes().take_while(u8::is_ascii_digit).count();
    let frac = match s[whole..].strip_prefix('.') {
        Some(tail) => tail.bytes().take_while(u8::is_ascii_digit).count(),
        None => 0,
    };
    let bad = |e: &dyn std::fmt::Display| format!("bad number {:?}: {e}", &s[..whole]);
    if frac > 0 {
        let len = whole + 1 + frac;
        let x: f64 = s[..len].parse().map_err(|e| bad(&e))?;
        Ok((Tok::Lit(Value::Float(x)), len))
    } else {
        let n: i64 = s[..whole].parse().map_err(|e| bad(&e))?;
        Ok((Tok::Lit(Value::Int(n)), whole))
    }
}

/// Quoted string with `\n`, `\t` and `\<char>` escapes.  An unterminated
/// string runs to the end of the line.
fn string(s: &str, quote: char) -> (Tok, usize) {
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => return (Tok::Lit(Value::Str(out)), i),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => return (Tok::Lit(Value::Str(out)), i + 1),
            c => out.push(c),
        }
    }
    (Tok::Lit(Value::Str(out)), s.len())
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    GlobMatch,
    RegexMatch,
    NotGlobMatch,
    NotRegexMatch,
}

impl BinOp {
    fn from_symbol(sym: &str) -> Option<BinOp> {
        Some(match sym {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            // Statements have no assignment operator, so `=` compares too.
            "==" | "=" => BinOp::Eq,
            "!=" | "<>" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "&&" | "&" => BinOp::And,
            "||" | "|" => BinOp::Or,
            "=~" => BinOp::GlobMatch,
            "=/" => BinOp::RegexMatch,
            "!~" => BinOp::NotGlobMatch,
            "!/" => BinOp::NotRegexMatch,
            _ => return None,
        })
    }

    /// Binding strength; every level is left associative.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 5,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ref(Reference),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Visit every reference in the tree, allowing it to be rebound.
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut Reference)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref(r) => f(r),
            Expr::Unary(_, e) => e.for_each_ref_mut(f),
            Expr::Binary(_, l, r) => {
                l.for_each_ref_mut(f);
                r.for_each_ref_mut(f);
            }
            Expr::Ternary(c, t, e) => {
                c.for_each_ref_mut(f);
                t.for_each_ref_mut(f);
                e.for_each_ref_mut(f);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.for_each_ref_mut(f);
                }
            }
        }
    }

    /// The reference when the whole expression is a single name.
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Expr::Ref(r) => Some(r),
            _ => None,
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek_sym(&self) -> Option<&'static str> {
        match self.toks.get(self.pos) {
            Some(Tok::Sym(s)) => Some(*s),
            _ => None,
        }
    }

    fn eat(&mut self, sym: &str) -> bool {
        let hit = self.peek_sym() == Some(sym);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect(&mut self, sym: &str, context: &str) -> Result<(), String> {
        if self.eat(sym) {
            Ok(())
        } else {
            Err(format!("expected '{sym}' {context}"))
        }
    }

    /// `cond ? a : b`, binding looser than any binary operator.
    fn ternary(&mut self) -> Result<Expr, String> {
        let cond = self.binary(1)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.binary(1)?;
        self.expect(":", "in conditional")?;
        let other = self.ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(other)))
    }

    fn binary(&mut self, min: u8) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_sym().and_then(BinOp::from_symbol) {
            let prec = op.precedence();
            if prec < min {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("!") {
            UnaryOp::Not
        } else {
            return self.primary();
        };
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let tok = self.toks.get(self.pos).cloned().ok_or("unexpected end of expression")?;
        self.pos += 1;
        match tok {
            Tok::Lit(v) => Ok(Expr::Literal(v)),
            Tok::Name(name) if self.eat("(") => {
                let mut args = Vec::new();
                if !self.eat(")") {
                    loop {
                        args.push(self.ternary()?);
                        if self.eat(")") {
                            break;
                        }
                        self.expect(",", &format!("in arguments to {name}"))?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Tok::Name(name) => Ok(Expr::Ref(Reference::Name(name))),
            Tok::Sym("(") => {
                let inner = self.ternary()?;
                self.expect(")", "to close group")?;
                Ok(inner)
            }
            Tok::Sym(s) => Err(format!("unexpected '{s}'")),
        }
    }
}

/// Parse an expression string into an AST.  Trailing tokens are an error.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let mut parser = Parser { toks: tokenize(src)?, pos: 0 };
    let expr = parser.ternary()?;
    match parser.toks.get(parser.pos) {
        None => Ok(expr),
        Some(extra) => Err(format!("unexpected trailing {extra:?}")),
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate an [`Expr`] AST node against the given context.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Ref(r) => Ok(ctx.get(r)),

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            Ok(match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Not => Value::from(!v.as_bool()),
            })
        }

        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !eval_expr(lhs, ctx)?.as_bool() {
                return Ok(Value::Int(0));
            }
            Ok(Value::from(eval_expr(rhs, ctx)?.as_bool()))
        }

        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if eval_expr(lhs, ctx)?.as_bool() {
                return Ok(Value::Int(1));
            }
            Ok(Value::from(eval_expr(rhs, ctx)?.as_bool()))
        }

        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(*op, l, r)
        }

        Expr::Ternary(cond, then, else_) => {
            if eval_expr(cond, ctx)?.as_bool() {
                eval_expr(then, ctx)
            } else {
                eval_expr(else_, ctx)
            }
        }

        Expr::Call(name, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for ae in arg_exprs {
                args.push(eval_expr(ae, ctx)?);
            }
            ctx.call_fn(name, args)
        }
    }
}

fn eval_binop(op: BinOp, l: Value, r: Value) -> Result<Value, String> {
    let ord = || l.cmp_value(&r);
    Ok(match op {
        BinOp::Add => l.arith_add(&r),
        BinOp::Sub => l.arith_sub(&r),
        BinOp::Mul => l.arith_mul(&r),
        BinOp::Div => l.arith_div(&r)?,
        BinOp::Rem => l.arith_rem(&r)?,

        BinOp::Eq => Value::from(ord() == Ordering::Equal),
        BinOp::Ne => Value::from(ord() != Ordering::Equal),
        BinOp::Lt => Value::from(ord() == Ordering::Less),
        BinOp::Le => Value::from(ord() != Ordering::Greater),
        BinOp::Gt => Value::from(ord() == Ordering::Greater),
        BinOp::Ge => Value::from(ord() != Ordering::Less),

        BinOp::GlobMatch => Value::from(glob_match(&r.as_str(), &l.as_str())),
        BinOp::NotGlobMatch => Value::from(!glob_match(&r.as_str(), &l.as_str())),
        BinOp::RegexMatch => Value::from(regex_match(&r.as_str(), &l.as_str())?),
        BinOp::NotRegexMatch => Value::from(!regex_match(&r.as_str(), &l.as_str())?),

        BinOp::And => Value::from(l.as_bool() && r.as_bool()),
        BinOp::Or => Value::from(l.as_bool() || r.as_bool()),
    })
}

/// The numeric built-ins available to every expression.
pub fn builtin(name: &str, args: &[Value]) -> Option<Result<Value, String>> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{name}: expected {n} argument(s), got {}", args.len()))
        }
    };
    let result = match name.to_ascii_lowercase().as_str() {
        "abs" => arity(1).map(|()| match &args[0] {
            Value::Float(x) => Value::Float(x.abs()),
            v => Value::Int(v.as_int().abs()),
        }),
        "int" => arity(1).map(|()| Value::Int(args[0].as_int())),
        "min" | "max" => {
            let want = if name.eq_ignore_ascii_case("min") { Ordering::Less } else { Ordering::Greater };
            match args.split_first() {
                None => Err(format!("{name}: expected at least one argument")),
                Some((first, rest)) => Ok(rest
                    .iter()
                    .fold(first.clone(), |best, v| if v.cmp_value(&best) == want { v.clone() } else { best })),
            }
        }
        _ => return None,
    };
    Some(result)
}

// ── Pattern matching ──────────────────────────────────────────────────────────

/// Case-insensitive glob: `*` matches any run, `?` any single character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    match (p.first(), t.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            let rest_p = p.iter().position(|&c| c != '*').map(|i| &p[i..]).unwrap_or(&[]);
            (0..=t.len()).any(|i| glob_match_inner(rest_p, &t[i..]))
        }
        (Some('?'), Some(_)) => glob_match_inner(&p[1..], &t[1..]),
        (Some(pc), Some(tc)) if pc == tc => glob_match_inner(&p[1..], &t[1..]),
        _ => false,
    }
}

fn regex_match(pattern: &str, text: &str) -> Result<bool, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(text))
        .map_err(|e| format!("bad regex {pattern:?}: {e}"))
}

/// Convenience: parse and evaluate an expression string.
pub fn eval_str(src: &str, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    let expr = parse_expr(src)?;
    eval_expr(&expr, ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
