//! Runtime values for the filter evaluator
//!
//! Every coercion here is total: any value can be read as a boolean, a number
//! or a string. Equality and ordering follow the loose comparison rules of the
//! rule language (see [`Value::loose_eq`] and [`Value::compare`]).

use std::cmp::Ordering;
use std::fmt;

/// A runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of an operation on an unavailable input
    Undefined,
    /// The `null` literal
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
}

/// A value coerced to a number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Int(n),
            Number::Float(n) => Value::Float(n),
        }
    }
}

impl Value {
    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Boolean coercion
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty() && s != "0",
            Value::Array(a) => !a.is_empty(),
        }
    }

    /// Numeric coercion; strings use their leading numeric prefix
    pub fn to_number(&self) -> Number {
        match self {
            Value::Undefined | Value::Null => Number::Int(0),
            Value::Bool(b) => Number::Int(i64::from(*b)),
            Value::Int(n) => Number::Int(*n),
            Value::Float(n) => Number::Float(*n),
            Value::String(s) => parse_numeric_prefix(s),
            Value::Array(a) => Number::Int(int_from_usize(a.len())),
        }
    }

    /// Integer coercion; floats truncate toward zero (saturating)
    pub fn to_int(&self) -> i64 {
        match self.to_number() {
            Number::Int(n) => n,
            Number::Float(f) if f.is_nan() => 0,
            Number::Float(f) => f as i64,
        }
    }

    pub fn to_float(&self) -> f64 {
        self.to_number().as_f64()
    }

    /// Loose equality (`==`).
    ///
    /// Scalars compare by their string forms, so `"5" == 5`, `1 == 1.0` and
    /// `true == "1"` all hold. Arrays compare element-wise. An array equals a
    /// scalar only when the array is empty and the scalar is `false` or `null`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Array(a), scalar) | (scalar, Value::Array(a)) => {
                a.is_empty()
                    && matches!(
                        scalar,
                        Value::Bool(false) | Value::Null | Value::Undefined
                    )
            }
            _ => self.to_string() == other.to_string(),
        }
    }

    /// Strict equality (`===`): same type, then loose equality
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            _ => self.type_name() == other.type_name() && self.loose_eq(other),
        }
    }

    /// Ordering for `< <= > >=`.
    ///
    /// Two strings that are not both numeric compare bytewise; every other
    /// pair is compared numerically. `None` when a NaN is involved.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Value::String(a), Value::String(b)) = (self, other) {
            if !(is_numeric_string(a) && is_numeric_string(b)) {
                return Some(a.as_bytes().cmp(b.as_bytes()));
            }
        }
        match (self.to_number(), other.to_number()) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    /// Literal-like rendering for tooling output (strings quoted, arrays bracketed)
    pub fn repr(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => format_float(*n),
            Value::String(s) => {
                serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
            }
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Convert to serde_json::Value; `undefined` becomes `null`
    pub fn to_serde_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::Number(serde_json::Number::from(*n)),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Value::to_serde_json).collect())
            }
        }
    }

    /// Convert a serde_json::Value; objects become arrays of their values
    pub fn from_serde_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_serde_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Array(
                obj.into_iter()
                    .map(|(_, v)| Value::from_serde_json(v))
                    .collect(),
            ),
        }
    }
}

/// Convert a length to an integer value
pub(crate) fn int_from_usize(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Length of the numeric prefix of `s` (after leading whitespace) and whether it is a float
fn numeric_prefix(s: &str) -> (usize, usize, bool) {
    let bytes = s.as_bytes();
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let mut i = start;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if digits > 0 || j > frac_start {
            digits += j - frac_start;
            is_float = true;
            i = j;
        }
    }
    if digits == 0 {
        return (start, start, false);
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_float = true;
            i = j;
        }
    }
    (start, i, is_float)
}

/// Parse the leading numeric prefix: `"12abc"` → 12, `"1.5x"` → 1.5, `""` → 0
pub fn parse_numeric_prefix(s: &str) -> Number {
    let (start, end, is_float) = numeric_prefix(s);
    let text = &s[start..end];
    if text.is_empty() {
        return Number::Int(0);
    }
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Number::Int(n);
        }
    }
    Number::Float(text.parse::<f64>().unwrap_or(0.0))
}

/// Whether the whole string (modulo surrounding whitespace) is a number
pub fn is_numeric_string(s: &str) -> bool {
    let (start, end, _) = numeric_prefix(s);
    end > start && s[end..].trim().is_empty()
}

/// Render a float the way the rule language prints numbers: 14 significant
/// digits, integral values without a fraction, exponent form below `1e-4`
/// and from `1e14` upward.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NAN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.13e}", f);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if !(-4..14).contains(&exponent) {
        let mut mantissa = trim_fraction(mantissa).to_string();
        if !mantissa.contains('.') {
            mantissa.push_str(".0");
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}E{}{}", mantissa, sign, exponent.abs())
    } else {
        let decimals = usize::try_from(13 - exponent).unwrap_or(0);
        let fixed = format!("{:.*}", decimals, f);
        trim_fraction(&fixed).to_string()
    }
}

/// Strip trailing zeros of a fraction, and the point if nothing remains
fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// String coercion
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined | Value::Null => Ok(()),
            Value::Bool(true) => write!(f, "1"),
            Value::Bool(false) => Ok(()),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                for item in items {
                    writeln!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}
