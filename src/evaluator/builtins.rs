//! Function registry and built-in functions
//!
//! Functions are looked up by lowercased name in a [`FunctionRegistry`]. The
//! registry is read-only during evaluation and can be shared across threads.
//! Embedders add their own functions with [`FunctionRegistry::register`].

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

use crate::errors::{Warning, WarningKind};
use crate::lexer::token::SourceLocation;

use super::patterns::{PatternCache, PatternKind};
use super::value::{int_from_usize, Value};
use super::variables::Variables;

/// Failure reported by a function implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What a function implementation can touch while it runs
pub struct CallContext<'a> {
    name: &'a str,
    location: &'a SourceLocation,
    variables: &'a mut Variables,
    warnings: &'a mut Vec<Warning>,
    patterns: &'a mut PatternCache,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        location: &'a SourceLocation,
        variables: &'a mut Variables,
        warnings: &'a mut Vec<Warning>,
        patterns: &'a mut PatternCache,
    ) -> Self {
        Self {
            name,
            location,
            variables,
            warnings,
            patterns,
        }
    }

    /// Name of the function being called
    pub fn name(&self) -> &str {
        self.name
    }

    /// Assign a user variable
    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.set(name, value);
    }

    /// Record a non-fatal warning at the call site
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = format!("{}(): {}", self.name, message.into());
        self.warnings
            .push(Warning::new(WarningKind::Function, message, self.location));
    }

    /// Compile a regex through the evaluation's pattern cache.
    /// A malformed pattern records a warning and yields `None`.
    pub fn regex(&mut self, pattern: &str, case_insensitive: bool) -> Option<Regex> {
        let kind = if case_insensitive {
            PatternKind::RegexNoCase
        } else {
            PatternKind::Regex
        };
        match self.patterns.get(kind, pattern) {
            Ok(re) => Some(re),
            Err(reason) => {
                let message = format!("{}(): malformed pattern: {}", self.name, reason);
                self.warnings.push(Warning::new(
                    WarningKind::MalformedPattern,
                    message,
                    self.location,
                ));
                None
            }
        }
    }
}

/// Signature of a function implementation
pub type NativeFn =
    dyn Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value, FunctionError> + Send + Sync;

/// A registered function
#[derive(Clone)]
pub struct Function {
    name: String,
    min_args: usize,
    max_args: Option<usize>,
    deprecated: Option<String>,
    propagates_undefined: bool,
    implementation: Arc<NativeFn>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_args(&self) -> usize {
        self.min_args
    }

    /// `None` means variadic
    pub fn max_args(&self) -> Option<usize> {
        self.max_args
    }

    /// Preferred replacement, if this function is deprecated
    pub fn deprecated_by(&self) -> Option<&str> {
        self.deprecated.as_deref()
    }

    /// Whether an `undefined` argument makes the call yield `undefined` without running
    pub fn propagates_undefined(&self) -> bool {
        self.propagates_undefined
    }

    /// Mark as deprecated in favour of `replacement`
    pub fn deprecate(&mut self, replacement: &str) -> &mut Self {
        self.deprecated = Some(replacement.to_lowercase());
        self
    }

    /// Let the implementation see `undefined` arguments
    pub fn keep_undefined(&mut self) -> &mut Self {
        self.propagates_undefined = false;
        self
    }

    /// Whether `count` arguments satisfy the arity
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    /// Human-readable arity, e.g. "exactly 1", "2 to 3", "at least 2"
    pub fn arity_description(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("exactly {}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }

    /// Run the implementation (arity is the caller's responsibility)
    pub fn call(&self, ctx: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
        (self.implementation)(ctx, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("deprecated", &self.deprecated)
            .field("propagates_undefined", &self.propagates_undefined)
            .finish_non_exhaustive()
    }
}

/// Name → function table
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, Function>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in function
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("lcase", 1, Some(1), builtin_lcase);
        registry.register("ucase", 1, Some(1), builtin_ucase);
        registry.register("length", 1, Some(1), builtin_length);
        registry.register("strlen", 1, Some(1), builtin_length);
        registry.register("string", 1, Some(1), builtin_string);
        registry.register("int", 1, Some(1), builtin_int);
        registry.register("float", 1, Some(1), builtin_float);
        registry.register("bool", 1, Some(1), builtin_bool);
        registry.register("count", 1, Some(2), builtin_count);
        registry.register("rcount", 1, Some(2), builtin_rcount);
        registry.register("get_matches", 2, Some(2), builtin_get_matches);
        registry.register("contains_any", 2, None, builtin_contains_any);
        registry.register("contains_all", 2, None, builtin_contains_all);
        registry.register("equals_to_any", 2, None, builtin_equals_to_any);
        registry.register("ccnorm", 1, Some(1), builtin_ccnorm);
        registry.register("ccnorm_contains_any", 2, None, builtin_ccnorm_contains_any);
        registry.register("ccnorm_contains_all", 2, None, builtin_ccnorm_contains_all);
        registry.register("norm", 1, Some(1), builtin_norm);
        registry.register("rmdoubles", 1, Some(1), builtin_rmdoubles);
        registry.register("rmspecials", 1, Some(1), builtin_rmspecials);
        registry.register("rmwhitespace", 1, Some(1), builtin_rmwhitespace);
        registry.register("specialratio", 1, Some(1), builtin_specialratio);
        registry.register("substr", 2, Some(3), builtin_substr);
        registry.register("strpos", 2, Some(3), builtin_strpos);
        registry.register("str_replace", 3, Some(3), builtin_str_replace);
        registry.register("str_replace_regexp", 3, Some(3), builtin_str_replace_regexp);
        registry.register("rescape", 1, Some(1), builtin_rescape);
        registry.register("sanitize", 1, Some(1), builtin_sanitize);
        registry.register("ip_in_range", 2, Some(2), builtin_ip_in_range);
        registry.register("ip_in_ranges", 2, None, builtin_ip_in_ranges);
        registry
            .register("set", 2, Some(2), builtin_set)
            .keep_undefined();
        registry
            .register("set_var", 2, Some(2), builtin_set)
            .keep_undefined()
            .deprecate("set");

        registry
    }

    /// Add (or replace) a function; the name is matched case-insensitively
    pub fn register<F>(
        &mut self,
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
        implementation: F,
    ) -> &mut Function
    where
        F: Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        let key = name.to_lowercase();
        let function = Function {
            name: key.clone(),
            min_args,
            max_args,
            deprecated: None,
            propagates_undefined: true,
            implementation: Arc::new(implementation),
        };
        match self.functions.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(function);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(function),
        }
    }

    /// Look up a function by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// String form of argument `i` (empty when absent)
fn text(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_string).unwrap_or_default()
}

/// Needles from argument `from` onward; array arguments contribute their elements
fn needles(args: &[Value], from: usize) -> Vec<String> {
    let mut out = Vec::new();
    for arg in args.iter().skip(from) {
        match arg {
            Value::Array(items) => out.extend(items.iter().map(Value::to_string)),
            other => out.push(other.to_string()),
        }
    }
    out
}

fn int(n: usize) -> Value {
    Value::Int(int_from_usize(n))
}

/// lcase(string) -> string
fn builtin_lcase(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(text(&args, 0).to_lowercase()))
}

/// ucase(string) -> string
fn builtin_ucase(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(text(&args, 0).to_uppercase()))
}

/// length(string) -> characters; length(array) -> elements
fn builtin_length(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    match args.first() {
        Some(Value::Array(items)) => Ok(int(items.len())),
        _ => Ok(int(text(&args, 0).chars().count())),
    }
}

fn builtin_string(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(text(&args, 0)))
}

fn builtin_int(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::Int(args.first().map_or(0, Value::to_int)))
}

fn builtin_float(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::Float(args.first().map_or(0.0, Value::to_float)))
}

fn builtin_bool(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
}

/// Element count of an array, or the number of comma-separated items
fn count_items(value: &Value) -> Value {
    match value {
        Value::Array(items) => int(items.len()),
        other => int(other.to_string().split(',').count()),
    }
}

/// count(list) -> items; count(needle, haystack) -> occurrences of needle
fn builtin_count(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    match args.as_slice() {
        [single] => Ok(count_items(single)),
        [needle, haystack] => {
            let needle = needle.to_string();
            if needle.is_empty() {
                return Ok(Value::Int(0));
            }
            Ok(int(haystack.to_string().matches(needle.as_str()).count()))
        }
        _ => Err(FunctionError::new("expected 1 or 2 arguments")),
    }
}

/// rcount(list) -> items; rcount(regex, haystack) -> number of matches
fn builtin_rcount(ctx: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    match args.as_slice() {
        [single] => Ok(count_items(single)),
        [pattern, haystack] => match ctx.regex(&pattern.to_string(), false) {
            Some(re) => Ok(int(re.find_iter(&haystack.to_string()).count())),
            None => Ok(Value::Int(0)),
        },
        _ => Err(FunctionError::new("expected 1 or 2 arguments")),
    }
}

/// get_matches(regex, haystack) -> [full match, group 1, ...]; unmatched slots are false
fn builtin_get_matches(
    ctx: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let Some(re) = ctx.regex(&text(&args, 0), false) else {
        return Ok(Value::Bool(false));
    };
    let haystack = text(&args, 1);
    let slots = re.captures_len();

    let matches = match re.captures(&haystack) {
        Some(caps) => (0..slots)
            .map(|i| {
                caps.get(i)
                    .map_or(Value::Bool(false), |m| Value::from(m.as_str()))
            })
            .collect(),
        None => vec![Value::Bool(false); slots],
    };
    Ok(Value::Array(matches))
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

fn contains_all(haystack: &str, needles: &[String]) -> bool {
    needles.iter().all(|n| haystack.contains(n.as_str()))
}

/// contains_any(haystack, needle, ...) -> bool
fn builtin_contains_any(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    Ok(Value::Bool(contains_any(&text(&args, 0), &needles(&args, 1))))
}

/// contains_all(haystack, needle, ...) -> bool
fn builtin_contains_all(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    Ok(Value::Bool(contains_all(&text(&args, 0), &needles(&args, 1))))
}

/// equals_to_any(value, candidate, ...) -> bool, using strict equality
fn builtin_equals_to_any(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let Some((value, candidates)) = args.split_first() else {
        return Ok(Value::Bool(false));
    };
    Ok(Value::Bool(candidates.iter().any(|c| value.strict_eq(c))))
}

/// Canonical form of a character that is commonly used to disguise another
fn confusable(ch: char) -> char {
    match ch {
        '0' => 'O',
        '1' | '|' | '!' => 'I',
        '3' => 'E',
        '4' | '@' => 'A',
        '5' | '$' => 'S',
        '7' => 'T',
        '8' => 'B',
        // Cyrillic
        'А' => 'A',
        'В' => 'B',
        'Е' | 'Ё' => 'E',
        'К' => 'K',
        'М' => 'M',
        'Н' => 'H',
        'О' => 'O',
        'Р' => 'P',
        'С' => 'C',
        'Т' => 'T',
        'У' => 'Y',
        'Х' => 'X',
        'І' => 'I',
        // Greek
        'Α' => 'A',
        'Β' => 'B',
        'Ε' => 'E',
        'Ζ' => 'Z',
        'Η' => 'H',
        'Ι' => 'I',
        'Κ' => 'K',
        'Μ' => 'M',
        'Ν' => 'N',
        'Ο' => 'O',
        'Ρ' => 'P',
        'Τ' => 'T',
        'Υ' => 'Y',
        'Χ' => 'X',
        other => other,
    }
}

/// Uppercase and fold look-alike characters onto ASCII letters
pub fn ccnorm(s: &str) -> String {
    s.to_uppercase().chars().map(confusable).collect()
}

fn rmdoubles(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last = None;
    for ch in s.chars() {
        if last != Some(ch) {
            out.push(ch);
        }
        last = Some(ch);
    }
    out
}

fn is_special(ch: char) -> bool {
    !(ch.is_alphanumeric() || ch.is_whitespace())
}

fn rmspecials(s: &str) -> String {
    s.chars().filter(|c| !is_special(*c)).collect()
}

fn rmwhitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn builtin_ccnorm(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(ccnorm(&text(&args, 0))))
}

fn builtin_ccnorm_contains_any(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let needles: Vec<String> = needles(&args, 1).iter().map(|n| ccnorm(n)).collect();
    Ok(Value::Bool(contains_any(&ccnorm(&text(&args, 0)), &needles)))
}

fn builtin_ccnorm_contains_all(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let needles: Vec<String> = needles(&args, 1).iter().map(|n| ccnorm(n)).collect();
    Ok(Value::Bool(contains_all(&ccnorm(&text(&args, 0)), &needles)))
}

/// norm(s) = rmwhitespace(rmspecials(rmdoubles(ccnorm(s))))
fn builtin_norm(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    let normalized = rmwhitespace(&rmspecials(&rmdoubles(&ccnorm(&text(&args, 0)))));
    Ok(Value::String(normalized))
}

fn builtin_rmdoubles(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(rmdoubles(&text(&args, 0))))
}

fn builtin_rmspecials(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(rmspecials(&text(&args, 0))))
}

fn builtin_rmwhitespace(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    Ok(Value::String(rmwhitespace(&text(&args, 0))))
}

/// Share of characters that are neither letters, digits nor whitespace
fn builtin_specialratio(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let s = text(&args, 0);
    let total = s.chars().count();
    if total == 0 {
        return Ok(Value::Float(0.0));
    }
    let specials = s.chars().filter(|c| is_special(*c)).count();
    Ok(Value::Float(specials as f64 / total as f64))
}

/// Resolve a possibly negative character offset against a length
fn clamp_offset(offset: i64, len: usize) -> usize {
    let len_i = int_from_usize(len);
    let resolved = if offset < 0 {
        (len_i + offset).max(0)
    } else {
        offset.min(len_i)
    };
    usize::try_from(resolved).unwrap_or(0)
}

/// substr(s, start, length?) with negative start/length counted from the end
fn builtin_substr(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    let chars: Vec<char> = text(&args, 0).chars().collect();
    let start = clamp_offset(args.get(1).map_or(0, Value::to_int), chars.len());
    let end = match args.get(2) {
        None | Some(Value::Null) => chars.len(),
        Some(length) => {
            let length = length.to_int();
            if length < 0 {
                clamp_offset(length, chars.len()).max(start)
            } else {
                let wanted = usize::try_from(length).unwrap_or(usize::MAX);
                start.saturating_add(wanted).min(chars.len())
            }
        }
    };
    Ok(Value::String(chars[start..end].iter().collect()))
}

/// strpos(haystack, needle, offset?) -> character index, or -1 when absent
fn builtin_strpos(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    let haystack = text(&args, 0);
    let needle = text(&args, 1);
    if needle.is_empty() {
        return Ok(Value::Int(-1));
    }

    let total = haystack.chars().count();
    let raw_offset = args.get(2).map_or(0, Value::to_int);
    if raw_offset > int_from_usize(total) {
        return Ok(Value::Int(-1));
    }
    let offset = clamp_offset(raw_offset, total);

    let byte_start = haystack
        .char_indices()
        .nth(offset)
        .map_or(haystack.len(), |(i, _)| i);
    match haystack[byte_start..].find(needle.as_str()) {
        Some(found) => {
            let chars_before = haystack[..byte_start + found].chars().count();
            Ok(int(chars_before))
        }
        None => Ok(Value::Int(-1)),
    }
}

/// str_replace(subject, search, replacement)
fn builtin_str_replace(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let subject = text(&args, 0);
    let search = text(&args, 1);
    if search.is_empty() {
        return Ok(Value::String(subject));
    }
    Ok(Value::String(subject.replace(&search, &text(&args, 2))))
}

/// str_replace_regexp(subject, regex, replacement); `$1` refers to groups
fn builtin_str_replace_regexp(
    ctx: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let subject = text(&args, 0);
    match ctx.regex(&text(&args, 1), false) {
        Some(re) => Ok(Value::String(
            re.replace_all(&subject, text(&args, 2).as_str()).into_owned(),
        )),
        None => Ok(Value::String(subject)),
    }
}

/// rescape(s) -> s with regex metacharacters escaped
fn builtin_rescape(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(regex::escape(&text(&args, 0))))
}

/// Decode HTML character references
fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => {
                    let code = if let Some(hex) = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn builtin_sanitize(_: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    Ok(Value::String(decode_entities(&text(&args, 0))))
}

fn parse_ip(raw: &str, what: &str) -> Result<IpAddr, FunctionError> {
    raw.trim()
        .parse()
        .map_err(|_| FunctionError::new(format!("invalid {} '{}'", what, raw.trim())))
}

/// Whether `ip` lies in `range` (CIDR `a/n`, span `a - b`, or a single address)
fn ip_in_range(ip: &str, range: &str) -> Result<bool, FunctionError> {
    let Ok(addr) = ip.trim().parse::<IpAddr>() else {
        return Ok(false);
    };

    if let Some((network, bits)) = range.split_once('/') {
        let network = parse_ip(network, "IP range")?;
        let bits: u32 = bits
            .trim()
            .parse()
            .map_err(|_| FunctionError::new(format!("invalid prefix length in '{}'", range)))?;
        return match (addr, network) {
            (IpAddr::V4(a), IpAddr::V4(n)) if bits <= 32 => {
                let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
                Ok(u32::from(a) & mask == u32::from(n) & mask)
            }
            (IpAddr::V6(a), IpAddr::V6(n)) if bits <= 128 => {
                let mask = if bits == 0 { 0 } else { u128::MAX << (128 - bits) };
                Ok(u128::from(a) & mask == u128::from(n) & mask)
            }
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => Err(
                FunctionError::new(format!("invalid prefix length in '{}'", range)),
            ),
            _ => Ok(false),
        };
    }

    if let Some((low, high)) = range.split_once('-') {
        let low = parse_ip(low, "IP range")?;
        let high = parse_ip(high, "IP range")?;
        return Ok(match (addr, low, high) {
            (IpAddr::V4(a), IpAddr::V4(l), IpAddr::V4(h)) => l <= a && a <= h,
            (IpAddr::V6(a), IpAddr::V6(l), IpAddr::V6(h)) => l <= a && a <= h,
            _ => false,
        });
    }

    Ok(addr == parse_ip(range, "IP range")?)
}

/// ip_in_range(ip, range) -> bool
fn builtin_ip_in_range(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    Ok(Value::Bool(ip_in_range(&text(&args, 0), &text(&args, 1))?))
}

/// ip_in_ranges(ip, range, ...) -> bool
fn builtin_ip_in_ranges(
    _: &mut CallContext<'_>,
    args: Vec<Value>,
) -> Result<Value, FunctionError> {
    let ip = text(&args, 0);
    for range in needles(&args, 1) {
        if ip_in_range(&ip, &range)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

/// set(name, value) -> value; assigns a user variable
fn builtin_set(ctx: &mut CallContext<'_>, args: Vec<Value>) -> Result<Value, FunctionError> {
    let mut args = args.into_iter();
    let name = args.next().map(|v| v.to_string()).unwrap_or_default();
    if name.is_empty() {
        return Err(FunctionError::new("variable name must not be empty"));
    }
    let value = args.next().unwrap_or(Value::Null);
    ctx.set_variable(&name, value.clone());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        registry: FunctionRegistry,
        variables: Variables,
        warnings: Vec<Warning>,
        patterns: PatternCache,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: FunctionRegistry::with_builtins(),
                variables: Variables::new(),
                warnings: Vec::new(),
                patterns: PatternCache::new(),
            }
        }

        fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, FunctionError> {
            let location = SourceLocation::default();
            let function = self.registry.get(name).unwrap().clone();
            let mut ctx = CallContext::new(
                name,
                &location,
                &mut self.variables,
                &mut self.warnings,
                &mut self.patterns,
            );
            function.call(&mut ctx, args)
        }
    }

    fn call(name: &str, args: Vec<Value>) -> Value {
        Harness::new().call(name, args).unwrap()
    }

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.contains("LCASE"));
        assert!(registry.get("Contains_Any").is_some());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_arity_metadata() {
        let registry = FunctionRegistry::with_builtins();
        let substr = registry.get("substr").unwrap();
        assert!(substr.accepts(2));
        assert!(substr.accepts(3));
        assert!(!substr.accepts(1));
        assert_eq!(substr.arity_description(), "2 to 3");
        assert_eq!(registry.get("lcase").unwrap().arity_description(), "exactly 1");
        assert_eq!(
            registry.get("contains_any").unwrap().arity_description(),
            "at least 2"
        );
        assert!(registry.get("contains_any").unwrap().accepts(10));
    }

    #[test]
    fn test_deprecation_metadata() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.get("set_var").unwrap().deprecated_by(), Some("set"));
        assert_eq!(registry.get("set").unwrap().deprecated_by(), None);
        assert!(!registry.get("set").unwrap().propagates_undefined());
        assert!(registry.get("lcase").unwrap().propagates_undefined());
    }

    #[test]
    fn test_register_custom_function() {
        let mut registry = FunctionRegistry::new();
        registry.register("Double", 1, Some(1), |_ctx, args| {
            Ok(Value::Int(args[0].to_int() * 2))
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["double"]);

        let mut variables = Variables::new();
        let mut warnings = Vec::new();
        let mut patterns = PatternCache::new();
        let location = SourceLocation::default();
        let mut ctx = CallContext::new(
            "double",
            &location,
            &mut variables,
            &mut warnings,
            &mut patterns,
        );
        let result = registry
            .get("double")
            .unwrap()
            .call(&mut ctx, vec![Value::Int(21)]);
        assert_eq!(result, Ok(Value::Int(42)));
    }

    #[test]
    fn test_case_functions() {
        assert_eq!(call("lcase", vec![s("ÀBC")]), s("àbc"));
        assert_eq!(call("ucase", vec![s("abc")]), s("ABC"));
    }

    #[test]
    fn test_length() {
        assert_eq!(call("length", vec![s("héllo")]), Value::Int(5));
        assert_eq!(call("strlen", vec![Value::Int(1234)]), Value::Int(4));
        assert_eq!(
            call("length", vec![Value::from(vec![1i64, 2, 3])]),
            Value::Int(3)
        );
    }

    #[test]
    fn test_casts() {
        assert_eq!(call("string", vec![Value::Float(2.0)]), s("2"));
        assert_eq!(call("int", vec![s("42abc")]), Value::Int(42));
        assert_eq!(call("float", vec![s("1.5")]), Value::Float(1.5));
        assert_eq!(call("bool", vec![s("0")]), Value::Bool(false));
        assert_eq!(call("bool", vec![s("a")]), Value::Bool(true));
    }

    #[test]
    fn test_count() {
        assert_eq!(call("count", vec![Value::from(vec![1i64, 2])]), Value::Int(2));
        assert_eq!(call("count", vec![s("a,b,c")]), Value::Int(3));
        assert_eq!(call("count", vec![s("a"), s("banana")]), Value::Int(3));
        assert_eq!(call("count", vec![s(""), s("banana")]), Value::Int(0));
    }

    #[test]
    fn test_rcount() {
        assert_eq!(call("rcount", vec![s("a+"), s("aa b aaa")]), Value::Int(2));

        let mut harness = Harness::new();
        let result = harness.call("rcount", vec![s("(x"), s("xx")]).unwrap();
        assert_eq!(result, Value::Int(0));
        assert_eq!(harness.warnings.len(), 1);
        assert_eq!(harness.warnings[0].kind, WarningKind::MalformedPattern);
    }

    #[test]
    fn test_get_matches() {
        assert_eq!(
            call("get_matches", vec![s("(a)(x)?(c)"), s("zac")]),
            Value::Array(vec![s("ac"), s("a"), Value::Bool(false), s("c")])
        );
        assert_eq!(
            call("get_matches", vec![s("(q)"), s("zac")]),
            Value::Array(vec![Value::Bool(false), Value::Bool(false)])
        );
    }

    #[test]
    fn test_contains_functions() {
        assert_eq!(
            call("contains_any", vec![s("hello world"), s("xyz"), s("wor")]),
            Value::Bool(true)
        );
        assert_eq!(
            call("contains_any", vec![s("hello"), s("")]),
            Value::Bool(false)
        );
        assert_eq!(
            call("contains_all", vec![s("hello world"), s("hell"), s("world")]),
            Value::Bool(true)
        );
        assert_eq!(
            call(
                "contains_any",
                vec![s("spam here"), Value::from(vec!["eggs", "spam"])]
            ),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_equals_to_any_is_strict() {
        assert_eq!(
            call("equals_to_any", vec![Value::Int(5), s("5"), Value::Int(5)]),
            Value::Bool(true)
        );
        assert_eq!(
            call("equals_to_any", vec![Value::Int(5), s("5")]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_normalization() {
        assert_eq!(call("ccnorm", vec![s("v1agr4")]), s("VIAGRA"));
        assert_eq!(call("ccnorm", vec![s("Ѕрам")]), s("ЅPAM"));
        assert_eq!(call("rmdoubles", vec![s("aabbbc")]), s("abc"));
        assert_eq!(call("rmspecials", vec![s("a-b c!")]), s("ab c"));
        assert_eq!(call("rmwhitespace", vec![s(" a b\tc\n")]), s("abc"));
        assert_eq!(call("norm", vec![s("vv1 a-g  r4")]), s("VIAGRA"));
        assert_eq!(
            call("ccnorm_contains_any", vec![s("Buy V1AGRA now"), s("viagra")]),
            Value::Bool(true)
        );
        assert_eq!(
            call("ccnorm_contains_all", vec![s("fr33 c4sh"), s("free"), s("money")]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_specialratio() {
        assert_eq!(call("specialratio", vec![s("a!b?")]), Value::Float(0.5));
        assert_eq!(call("specialratio", vec![s("")]), Value::Float(0.0));
    }

    #[test]
    fn test_substr() {
        assert_eq!(call("substr", vec![s("abcdef"), Value::Int(1), Value::Int(3)]), s("bcd"));
        assert_eq!(call("substr", vec![s("abcdef"), Value::Int(-2)]), s("ef"));
        assert_eq!(call("substr", vec![s("abcdef"), Value::Int(1), Value::Int(-1)]), s("bcde"));
        assert_eq!(call("substr", vec![s("abc"), Value::Int(10)]), s(""));
        assert_eq!(call("substr", vec![s("héllo"), Value::Int(1), Value::Int(2)]), s("él"));
    }

    #[test]
    fn test_strpos() {
        assert_eq!(call("strpos", vec![s("hello"), s("l")]), Value::Int(2));
        assert_eq!(call("strpos", vec![s("hello"), s("l"), Value::Int(3)]), Value::Int(3));
        assert_eq!(call("strpos", vec![s("hello"), s("z")]), Value::Int(-1));
        assert_eq!(call("strpos", vec![s("hello"), s("")]), Value::Int(-1));
        assert_eq!(call("strpos", vec![s("héllo"), s("l")]), Value::Int(2));
        assert_eq!(call("strpos", vec![s("hello"), s("h"), Value::Int(9)]), Value::Int(-1));
    }

    #[test]
    fn test_replacements() {
        assert_eq!(
            call("str_replace", vec![s("a-b-c"), s("-"), s("+")]),
            s("a+b+c")
        );
        assert_eq!(call("str_replace", vec![s("abc"), s(""), s("x")]), s("abc"));
        assert_eq!(
            call("str_replace_regexp", vec![s("a1b22"), s("[0-9]+"), s("#")]),
            s("a#b#")
        );
        assert_eq!(
            call("str_replace_regexp", vec![s("john smith"), s("(\\w+) (\\w+)"), s("$2 $1")]),
            s("smith john")
        );
        assert_eq!(call("rescape", vec![s("a.b*")]), s("a\\.b\\*"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(
            call("sanitize", vec![s("&lt;b&gt; &amp; &#65;&#x42; &bogus; & done")]),
            s("<b> & AB &bogus; & done")
        );
    }

    #[test]
    fn test_ip_ranges() {
        assert_eq!(
            call("ip_in_range", vec![s("192.168.1.7"), s("192.168.1.0/24")]),
            Value::Bool(true)
        );
        assert_eq!(
            call("ip_in_range", vec![s("192.168.2.7"), s("192.168.1.0/24")]),
            Value::Bool(false)
        );
        assert_eq!(
            call("ip_in_range", vec![s("10.0.0.5"), s("10.0.0.1 - 10.0.0.9")]),
            Value::Bool(true)
        );
        assert_eq!(
            call("ip_in_range", vec![s("2001:db8::1"), s("2001:db8::/32")]),
            Value::Bool(true)
        );
        assert_eq!(
            call("ip_in_range", vec![s("not an ip"), s("10.0.0.0/8")]),
            Value::Bool(false)
        );
        assert_eq!(
            call("ip_in_ranges", vec![s("10.1.2.3"), s("1.1.1.1"), s("10.0.0.0/8")]),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_invalid_ip_range_is_an_error() {
        let result = Harness::new().call("ip_in_range", vec![s("10.0.0.1"), s("10.0.0.0/99")]);
        assert!(result.is_err());
        let result = Harness::new().call("ip_in_range", vec![s("10.0.0.1"), s("garbage")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_assigns_variable() {
        let mut harness = Harness::new();
        let result = harness.call("set", vec![s("Counter"), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Int(3));
        assert_eq!(harness.variables.local("counter"), Some(&Value::Int(3)));
    }
}
