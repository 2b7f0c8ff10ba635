//! Restricted literal-expression parser.
//!
//! Decodes the Python-literal-like syntax agents produce when they do not
//! emit strict JSON: single-quoted strings, `True`/`False`/`None`, tuples,
//! sets and trailing commas. Only literal syntax is recognized. Names other
//! than the boolean/none constants, calls, attribute access, subscripts
//! and operators (besides a sign on a number) are rejected with the offset
//! where they appear. Nothing is ever evaluated.

use serde_json::{Map, Number, Value};
use thiserror::Error;

const MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

/// Parse a complete literal expression into a JSON value.
pub fn parse_literal(input: &str) -> Result<Value, LiteralError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Err(parser.error("empty input"));
    }
    let value = parser.parse_value()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> LiteralError {
        LiteralError {
            offset,
            message: message.into(),
        }
    }

    /// Skip whitespace, line continuations and `#` comments.
    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '\\' && matches!(self.peek_at(1), Some('\n')) {
                self.pos += 2;
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn enter(&mut self) -> Result<(), LiteralError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_DEPTH)));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_value(&mut self) -> Result<Value, LiteralError> {
        let value = match self.peek() {
            None => return Err(self.error("unexpected end of input")),
            Some('{') => self.parse_brace()?,
            Some('[') => self.parse_list()?,
            Some('(') => self.parse_paren()?,
            Some('\'') | Some('"') => self.parse_string_concat(None)?,
            Some('+') | Some('-') => self.parse_signed_number()?,
            Some(c) if c.is_ascii_digit() => self.parse_number(false)?,
            Some('.') if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                self.parse_number(false)?
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_name()?,
            Some(c) => return Err(self.error(format!("unexpected character '{}'", c))),
        };

        self.reject_postfix()?;
        Ok(value)
    }

    /// Literals cannot be followed by calls, attribute access, subscripts or
    /// binary operators.
    fn reject_postfix(&mut self) -> Result<(), LiteralError> {
        let save = self.pos;
        self.skip_ws();
        let message = match self.peek() {
            Some('(') => Some("function calls are not allowed"),
            Some('.') => Some("attribute access is not allowed"),
            Some('[') => Some("subscripts are not allowed"),
            Some('+' | '-' | '*' | '/' | '%' | '@' | '&' | '|' | '^' | '<' | '>' | '=' | '!' | '~') => {
                Some("operators are not allowed")
            }
            _ => None,
        };
        if let Some(message) = message {
            return Err(self.error(message));
        }
        self.pos = save;
        Ok(())
    }

    fn parse_name(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('\'') | Some('"')) {
            return self.parse_prefixed_string(start, &name);
        }

        match name.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => {
                self.skip_ws();
                let detail = match self.peek() {
                    Some('(') => "function calls are not allowed",
                    Some('.') => "attribute access is not allowed",
                    _ => "only literal values are allowed",
                };
                Err(self.error_at(
                    start,
                    format!("unexpected identifier '{}' ({})", name, detail),
                ))
            }
        }
    }

    fn parse_prefixed_string(&mut self, start: usize, prefix: &str) -> Result<Value, LiteralError> {
        let lower = prefix.to_ascii_lowercase();
        let raw = match lower.as_str() {
            "u" => false,
            "r" => true,
            "b" | "br" | "rb" => {
                return Err(self.error_at(start, "bytes literals are not supported"));
            }
            "f" | "fr" | "rf" => {
                return Err(self.error_at(start, "f-strings are not literals"));
            }
            _ => {
                return Err(self.error_at(
                    start,
                    format!("unexpected identifier '{}' (only literal values are allowed)", prefix),
                ));
            }
        };
        let first = self.parse_string_body(raw)?;
        self.parse_string_concat(Some(first))
    }

    /// Parse one or more adjacent string literals, concatenating them.
    fn parse_string_concat(&mut self, first: Option<String>) -> Result<Value, LiteralError> {
        let mut out = match first {
            Some(s) => s,
            None => self.parse_string_body(false)?,
        };

        loop {
            let save = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('\'') | Some('"') => out.push_str(&self.parse_string_body(false)?),
                Some(c) if (c == 'r' || c == 'R' || c == 'u' || c == 'U')
                    && matches!(self.peek_at(1), Some('\'') | Some('"')) =>
                {
                    self.pos += 1;
                    out.push_str(&self.parse_string_body(c == 'r' || c == 'R')?);
                }
                _ => {
                    self.pos = save;
                    break;
                }
            }
        }

        Ok(Value::String(out))
    }

    fn parse_string_body(&mut self, raw: bool) -> Result<String, LiteralError> {
        let start = self.pos;
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error_at(start, "expected a string")),
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error_at(start, "unterminated string"));
            };

            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.pos += 2;
                    return Ok(out);
                }
                out.push(c);
                continue;
            }

            if c == '\n' && !triple {
                return Err(self.error_at(start, "unterminated string"));
            }

            if c == '\\' {
                let Some(next) = self.bump() else {
                    return Err(self.error_at(start, "unterminated string"));
                };
                if raw {
                    out.push('\\');
                    out.push(next);
                    continue;
                }
                self.push_escape(next, &mut out)?;
                continue;
            }

            out.push(c);
        }
    }

    fn push_escape(&mut self, c: char, out: &mut String) -> Result<(), LiteralError> {
        match c {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            'a' => out.push('\u{7}'),
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                out.push(self.code_point(code)?);
            }
            'x' => {
                let code = self.hex_digits(2)?;
                out.push(self.code_point(code)?);
            }
            'u' => {
                let code = self.hex_digits(4)?;
                out.push(self.code_point(code)?);
            }
            'U' => {
                let code = self.hex_digits(8)?;
                out.push(self.code_point(code)?);
            }
            'N' => return Err(self.error("named unicode escapes are not supported")),
            other => {
                // Unknown escapes are kept verbatim.
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, LiteralError> {
        let mut code = 0u32;
        for _ in 0..count {
            match self.peek().and_then(|d| d.to_digit(16)) {
                Some(d) => {
                    code = code * 16 + d;
                    self.pos += 1;
                }
                None => return Err(self.error(format!("expected {} hex digits in escape", count))),
            }
        }
        Ok(code)
    }

    fn code_point(&self, code: u32) -> Result<char, LiteralError> {
        char::from_u32(code).ok_or_else(|| self.error(format!("invalid code point {:#x}", code)))
    }

    fn parse_signed_number(&mut self) -> Result<Value, LiteralError> {
        let mut negative = false;
        while let Some(c @ ('+' | '-')) = self.peek() {
            if c == '-' {
                negative = !negative;
            }
            self.pos += 1;
            self.skip_ws();
        }
        match self.peek() {
            Some(c) if c.is_ascii_digit() => self.parse_number(negative),
            Some('.') if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                self.parse_number(negative)
            }
            _ => Err(self.error("a sign must be followed by a number")),
        }
    }

    fn parse_number(&mut self, negative: bool) -> Result<Value, LiteralError> {
        let start = self.pos;

        if self.peek() == Some('0')
            && let Some(radix_char) = self.peek_at(1)
        {
            let radix = match radix_char {
                'x' | 'X' => Some(16),
                'o' | 'O' => Some(8),
                'b' | 'B' => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                // `0x_ff` is allowed: one separator may follow the prefix.
                let raw = &self.chars[digits_start..self.pos];
                let grouped = raw.strip_prefix(&['_']).unwrap_or(raw);
                if !well_grouped(grouped) {
                    return Err(self.error_at(start, "misplaced '_' in integer literal"));
                }
                let digits: String = grouped.iter().filter(|c| **c != '_').collect();
                let magnitude = i128::from_str_radix(&digits, radix)
                    .map_err(|_| self.error_at(start, "invalid integer literal"))?;
                return self.integer_value(start, magnitude, negative);
            }
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                is_float = true;
                while matches!(self.peek(), Some(d) if d.is_ascii_digit() || d == '_') {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        if matches!(self.peek(), Some('j' | 'J')) {
            return Err(self.error("complex numbers are not supported"));
        }
        if matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            return Err(self.error("invalid number literal"));
        }

        let raw = &self.chars[start..self.pos];
        if !raw
            .split(|c| matches!(*c, '.' | 'e' | 'E' | '+' | '-'))
            .all(well_grouped)
        {
            return Err(self.error_at(start, "misplaced '_' in number literal"));
        }
        let text: String = raw.iter().filter(|c| **c != '_').collect();

        if is_float {
            let magnitude: f64 = text
                .parse()
                .map_err(|_| self.error_at(start, "invalid float literal"))?;
            let value = if negative { -magnitude } else { magnitude };
            return Number::from_f64(value)
                .map(Value::Number)
                .ok_or_else(|| self.error_at(start, "float literal is not finite"));
        }

        if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
            return Err(self.error_at(
                start,
                "leading zeros are not allowed in decimal integers; use 0o for octal",
            ));
        }
        let magnitude: i128 = text
            .parse()
            .map_err(|_| self.error_at(start, "integer literal out of range"))?;
        self.integer_value(start, magnitude, negative)
    }

    fn integer_value(&self, start: usize, magnitude: i128, negative: bool) -> Result<Value, LiteralError> {
        let value = if negative { -magnitude } else { magnitude };
        if let Ok(i) = i64::try_from(value) {
            return Ok(Value::Number(i.into()));
        }
        if let Ok(u) = u64::try_from(value) {
            return Ok(Value::Number(u.into()));
        }
        Err(self.error_at(start, "integer literal out of range"))
    }

    fn parse_list(&mut self) -> Result<Value, LiteralError> {
        self.expect('[')?;
        self.enter()?;
        let items = self.parse_items(']')?;
        self.leave();
        Ok(Value::Array(items))
    }

    /// `(x)` is a parenthesized value; `()`, `(x,)` and `(x, y)` are tuples.
    fn parse_paren(&mut self) -> Result<Value, LiteralError> {
        self.expect('(')?;
        self.enter()?;
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            self.leave();
            return Ok(Value::Array(Vec::new()));
        }

        let first = self.parse_value()?;
        self.skip_ws();
        let value = match self.peek() {
            Some(')') => {
                self.pos += 1;
                first
            }
            Some(',') => {
                self.pos += 1;
                let mut items = vec![first];
                items.extend(self.parse_items(')')?);
                Value::Array(items)
            }
            _ => return Err(self.error("expected ',' or ')'")),
        };
        self.leave();
        Ok(value)
    }

    /// Comma-separated values up to `close`, trailing comma allowed.
    fn parse_items(&mut self, close: char) -> Result<Vec<Value>, LiteralError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error(format!("expected ',' or '{}'", close))),
            }
        }
    }

    /// `{}` and `{k: v}` are mappings; `{a, b}` is a set, decoded as a sequence.
    fn parse_brace(&mut self) -> Result<Value, LiteralError> {
        self.expect('{')?;
        self.enter()?;
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            self.leave();
            return Ok(Value::Object(Map::new()));
        }

        let first_offset = self.pos;
        let first = self.parse_value()?;
        self.skip_ws();

        let value = if self.peek() == Some(':') {
            self.pos += 1;
            let mut map = Map::new();
            let key = self.key_string(first_offset, first)?;
            self.skip_ws();
            let value = self.parse_value()?;
            map.insert(key, value);
            self.parse_entries(&mut map)?;
            Value::Object(map)
        } else {
            let mut items = vec![first];
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    items.extend(self.parse_items('}')?);
                }
                Some('}') => self.pos += 1,
                _ => return Err(self.error("expected ':', ',' or '}'")),
            }
            Value::Array(items)
        };
        self.leave();
        Ok(value)
    }

    fn parse_entries(&mut self, map: &mut Map<String, Value>) -> Result<(), LiteralError> {
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(',') => self.pos += 1,
                _ => return Err(self.error("expected ',' or '}'")),
            }
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(());
            }
            let key_offset = self.pos;
            let key = self.parse_value()?;
            let key = self.key_string(key_offset, key)?;
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.parse_value()?;
            map.insert(key, value);
        }
    }

    /// Mapping keys must be scalar literals; non-string keys keep their JSON text.
    fn key_string(&self, offset: usize, key: Value) -> Result<String, LiteralError> {
        match key {
            Value::String(s) => Ok(s),
            Value::Array(_) | Value::Object(_) => {
                Err(self.error_at(offset, "mapping keys must be scalar literals"))
            }
            other => Ok(other.to_string()),
        }
    }
}

/// `_` may only sit between two digits, one at a time.
fn well_grouped(digits: &[char]) -> bool {
    digits.first() != Some(&'_')
        && digits.last() != Some(&'_')
        && !digits.windows(2).any(|w| w == ['_', '_'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn python_style_mapping() {
        let value = parse_literal("{'a': 1, 'b': True}").unwrap();
        assert_eq!(value, json!({"a": 1, "b": true}));
    }

    #[test]
    fn nested_containers_and_constants() {
        let value =
            parse_literal("{'color': [1, 0.5, -2e3], 'shader': None, 'tags': ('x', 'y'), 'ok': False,}")
                .unwrap();
        assert_eq!(
            value,
            json!({"color": [1, 0.5, -2000.0], "shader": null, "tags": ["x", "y"], "ok": false})
        );
    }

    #[test]
    fn string_forms() {
        assert_eq!(parse_literal(r#"'it\'s'"#).unwrap(), json!("it's"));
        assert_eq!(parse_literal(r#""a\tb\u00e9""#).unwrap(), json!("a\tb\u{e9}"));
        assert_eq!(parse_literal(r"r'C:\path'").unwrap(), json!(r"C:\path"));
        assert_eq!(parse_literal("'ab' \"cd\"").unwrap(), json!("abcd"));
        assert_eq!(parse_literal("'''multi\nline'''").unwrap(), json!("multi\nline"));
    }

    #[test]
    fn integer_forms() {
        assert_eq!(parse_literal("0x1F").unwrap(), json!(31));
        assert_eq!(parse_literal("1_000").unwrap(), json!(1000));
        assert_eq!(parse_literal("-5").unwrap(), json!(-5));
        assert_eq!(parse_literal("(7)").unwrap(), json!(7));
        assert_eq!(parse_literal("(7,)").unwrap(), json!([7]));
        assert_eq!(parse_literal("0x_ff").unwrap(), json!(255));
        assert_eq!(parse_literal("00").unwrap(), json!(0));
        assert_eq!(parse_literal("0_0").unwrap(), json!(0));
        assert_eq!(parse_literal("01.5").unwrap(), json!(1.5));
        assert_eq!(parse_literal("1_0.2_5").unwrap(), json!(10.25));
    }

    #[test]
    fn rejects_malformed_integers() {
        let err = parse_literal("01").unwrap_err();
        assert!(err.message.contains("leading zeros"), "{}", err);
        assert!(parse_literal("-007").is_err());
        assert!(parse_literal("{'n': 010}").is_err());

        for bad in ["1__0", "1_", "0x__1", "0x1_", "1_.5", "1._5", "2.5e1_"] {
            let err = parse_literal(bad).unwrap_err();
            assert!(err.message.contains("misplaced '_'"), "{}: {}", bad, err);
        }
        assert!(parse_literal("1e_5").is_err());
    }

    #[test]
    fn sets_and_scalar_keys() {
        assert_eq!(parse_literal("{1, 2}").unwrap(), json!([1, 2]));
        assert_eq!(
            parse_literal("{1: 'one', True: 'yes'}").unwrap(),
            json!({"1": "one", "true": "yes"})
        );
    }

    #[test]
    fn rejects_calls_and_names() {
        let err = parse_literal("__import__('os').system('ls')").unwrap_err();
        assert!(err.message.contains("function calls are not allowed"), "{}", err);

        let err = parse_literal("{'a': os.environ}").unwrap_err();
        assert!(err.message.contains("attribute access"), "{}", err);

        let err = parse_literal("not json {}").unwrap_err();
        assert!(err.message.contains("unexpected identifier 'not'"), "{}", err);
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn rejects_operators_and_postfix() {
        assert!(parse_literal("1 + 2").is_err());
        assert!(parse_literal("[1][0]").is_err());
        assert!(parse_literal("{'a': 1}.keys()").is_err());
        assert!(parse_literal("2j").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_literal("").is_err());
        assert!(parse_literal("{'a': 1").is_err());
        assert!(parse_literal("{'a' 1}").is_err());
        assert!(parse_literal("'open").is_err());
        assert!(parse_literal("{[1]: 2}").is_err());
        assert!(parse_literal("b'bytes'").is_err());
    }

    #[test]
    fn depth_is_bounded() {
        let deep = format!("{}{}", "[".repeat(MAX_DEPTH + 5), "]".repeat(MAX_DEPTH + 5));
        let err = parse_literal(&deep).unwrap_err();
        assert!(err.message.contains("nesting"));
    }
}
