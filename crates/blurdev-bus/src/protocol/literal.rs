//! Literal coercion for parameter values.
//!
//! Parameter strings are interpreted against a small grammar and fall back to
//! the raw string whenever it does not match:
//!
//! ```text
//! value   := none | bool | number | string | list | tuple | dict
//! none    := "None" | "null"
//! bool    := "True" | "False" | "true" | "false"
//! number  := [+-]? (int | float)
//! string  := '...' | "..."
//! list    := "[" (value ("," value)* ","?)? "]"
//! tuple   := "(" (value "," (value ("," value)* ","?)?)? ")"
//! dict    := "{" (key ":" value ("," key ":" value)* ","?)? "}"
//! ```
//!
//! Digits may be grouped with single underscores (`1_000`). Integers must fit
//! in `i64` or `u64`; larger ones stay raw strings, as do floats that overflow
//! `f64`.
//!
//! Tuples become arrays, and dict keys that are not strings are rendered to
//! text. Nothing here evaluates expressions.

use serde_json::{Map, Number, Value};

/// Nesting limit for containers.
const MAX_DEPTH: usize = 32;

/// Coerce `raw` to a typed value, or keep it as a string.
pub fn coerce(raw: &str) -> Value {
    parse_literal(raw).unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Parse `raw` as a literal; `None` when it is not one.
pub fn parse_literal(raw: &str) -> Option<Value> {
    let mut parser = LiteralParser { src: raw, pos: 0 };
    let value = parser.value(0)?;
    parser.skip_ws();
    parser.at_end().then_some(value)
}

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl LiteralParser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            return None;
        }
        self.skip_ws();
        match self.peek()? {
            '[' => self.list(depth).map(Value::Array),
            '(' => self.tuple(depth),
            '{' => self.dict(depth).map(Value::Object),
            '\'' | '"' => self.string().map(Value::String),
            c if c == '+' || c == '-' || c == '.' || c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.keyword(),
            _ => None,
        }
    }

    fn list(&mut self, depth: usize) -> Option<Vec<Value>> {
        self.bump();
        let mut items = Vec::new();
        self.items_until(']', depth, &mut items)?;
        Some(items)
    }

    /// `(x)` is just `x`; a comma makes it a tuple.
    fn tuple(&mut self, depth: usize) -> Option<Value> {
        self.bump();
        self.skip_ws();
        if self.eat(')') {
            return Some(Value::Array(Vec::new()));
        }
        let first = self.value(depth + 1)?;
        self.skip_ws();
        if self.eat(')') {
            return Some(first);
        }
        if !self.eat(',') {
            return None;
        }
        let mut items = vec![first];
        self.items_until(')', depth, &mut items)?;
        Some(Value::Array(items))
    }

    /// Comma separated values up to `close`, trailing comma allowed.
    fn items_until(&mut self, close: char, depth: usize, items: &mut Vec<Value>) -> Option<()> {
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Some(());
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            if self.eat(close) {
                return Some(());
            }
            if !self.eat(',') {
                return None;
            }
        }
    }

    fn dict(&mut self, depth: usize) -> Option<Map<String, Value>> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Some(map);
            }
            let key = dict_key(self.value(depth + 1)?)?;
            self.skip_ws();
            if !self.eat(':') {
                return None;
            }
            let value = self.value(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            if self.eat('}') {
                return Some(map);
            }
            if !self.eat(',') {
                return None;
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    c @ ('\\' | '\'' | '"') => out.push(c),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('+' | '-')) {
            self.bump();
        }
        let mut is_float = false;
        let mut prev_digit = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '_' if prev_digit
                    && self.src[self.pos + 1..].starts_with(|n: char| n.is_ascii_digit()) => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    prev_digit = false;
                    self.bump();
                    if matches!(self.peek(), Some('+' | '-')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            prev_digit = c.is_ascii_digit();
            self.bump();
        }
        let text = self.src[start..self.pos].replace('_', "");
        let text = text.as_str();

        if is_float {
            let parsed: f64 = text.parse().ok()?;
            return Number::from_f64(parsed).map(Value::Number);
        }

        let digits = text.trim_start_matches(['+', '-']);
        if digits.len() > 1 && digits.starts_with('0') && digits.bytes().any(|b| b != b'0') {
            return None;
        }
        match text.parse::<i64>() {
            Ok(n) => Some(Value::from(n)),
            Err(_) => text.parse::<u64>().ok().map(Value::from),
        }
    }

    fn keyword(&mut self) -> Option<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "None" | "null" => Some(Value::Null),
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            _ => None,
        }
    }
}

fn dict_key(key: Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s),
        Value::Null => Some("None".to_string()),
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
