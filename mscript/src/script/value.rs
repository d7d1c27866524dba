//! Runtime value type for the script language.
//!
//! Values are loosely typed: the interpreter coerces freely between numbers
//! and strings when a statement needs one or the other.  `Null` is what an
//! unresolved reference or an uninitialised variable reads as.

use std::cmp::Ordering;
use std::fmt;

/// A script runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl Value {
    /// Parse a literal token: integers and reals become numbers, the
    /// words `true`/`false` become 1/0, anything else stays a string.
    pub fn parse_literal(text: &str) -> Value {
        let t = text.trim();
        if let Ok(n) = t.parse::<i64>() {
            Value::Int(n)
        } else if t.contains('.') && t.parse::<f64>().is_ok() {
            Value::Float(t.parse().unwrap_or(0.0))
        } else if t.eq_ignore_ascii_case("true") {
            Value::Int(1)
        } else if t.eq_ignore_ascii_case("false") {
            Value::Int(0)
        } else {
            Value::Str(t.to_owned())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `Null`, `0`, `""`, `"0"` and `"false"` are falsy.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        }
    }

    /// Coerce to `i64`; non-numeric strings read as 0.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Int(n) => *n,
            Value::Float(x) => *x as i64,
            Value::Str(s) => {
                let t = s.trim();
                t.parse()
                    .unwrap_or_else(|_| t.parse::<f64>().map(|x| x as i64).unwrap_or(0))
            }
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Int(n) => *n as f64,
            Value::Float(x) => *x,
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    pub fn as_str(&self) -> String {
        self.to_string()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Float(_) => "real",
            Value::Str(_) => "string",
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    /// The operand as a number; `None` for a string that is not one.
    fn number(&self) -> Option<Num> {
        match self {
            Value::Null => Some(Num::Int(0)),
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Float(x) => Some(Num::Real(*x)),
            Value::Str(s) => {
                let t = s.trim();
                t.parse().map(Num::Int).ok().or_else(|| t.parse().ok().map(Num::Real))
            }
        }
    }

    /// Integer arithmetic when both sides are integers, real otherwise.
    /// Non-numeric strings count as 0.
    fn numeric(
        &self,
        rhs: &Value,
        int: impl FnOnce(i64, i64) -> i64,
        real: impl FnOnce(f64, f64) -> f64,
    ) -> Value {
        let zero = Num::Int(0);
        match (self.number().unwrap_or(zero), rhs.number().unwrap_or(zero)) {
            (Num::Int(a), Num::Int(b)) => Value::Int(int(a, b)),
            (a, b) => Value::Float(real(a.real(), b.real())),
        }
    }

    fn is_zero(&self) -> bool {
        self.number().map_or(true, |n| n.real() == 0.0)
    }

    /// Numeric addition, or concatenation when either side is a
    /// non-numeric string.
    pub fn arith_add(&self, rhs: &Value) -> Value {
        if self.number().is_none() || rhs.number().is_none() {
            return Value::Str(format!("{self}{rhs}"));
        }
        self.numeric(rhs, i64::wrapping_add, |a, b| a + b)
    }

    pub fn arith_sub(&self, rhs: &Value) -> Value {
        self.numeric(rhs, i64::wrapping_sub, |a, b| a - b)
    }

    pub fn arith_mul(&self, rhs: &Value) -> Value {
        self.numeric(rhs, i64::wrapping_mul, |a, b| a * b)
    }

    pub fn arith_div(&self, rhs: &Value) -> Result<Value, String> {
        if rhs.is_zero() {
            return Err("division by zero".into());
        }
        Ok(self.numeric(rhs, i64::wrapping_div, |a, b| a / b))
    }

    pub fn arith_rem(&self, rhs: &Value) -> Result<Value, String> {
        if rhs.is_zero() {
            return Err("modulo by zero".into());
        }
        Ok(self.numeric(rhs, i64::wrapping_rem, |a, b| a % b))
    }

    pub fn arith_neg(&self) -> Value {
        match self.number() {
            Some(Num::Real(x)) => Value::Float(-x),
            Some(Num::Int(n)) => Value::Int(n.wrapping_neg()),
            None => Value::Int(0),
        }
    }

    /// Numeric comparison when both sides are numbers, otherwise a
    /// case-insensitive string comparison (mode names are compared this way).
    pub fn cmp_value(&self, rhs: &Value) -> Ordering {
        if !(self.is_null() && rhs.is_null()) {
            match (self.number(), rhs.number()) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => return a.cmp(&b),
                (Some(a), Some(b)) => return a.real().partial_cmp(&b.real()).unwrap_or(Ordering::Equal),
                _ => {}
            }
        }
        self.as_str()
            .to_ascii_lowercase()
            .cmp(&rhs.as_str().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    fn real(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Real(x) => x,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(if b { 1 } else { 0 })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
