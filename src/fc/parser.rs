use memchr::memchr;
use serde_json::{Map, Number, Value};

use crate::protocol::canonical::FunctionCallResponse;

// Tool-call text as emitted by GLM models.
//
// The first line names the tool; the rest carries the arguments, either as a
// fenced call expression
//
//     get_weather
//     ```python
//     tool_call(location='Beijing', unit="celsius")
//     ```
//
// or as a bare JSON object on the following lines (GLM-4):
//
//     get_weather
//     {"location": "Beijing"}
//
// A blank first line means the model answered in prose.

const ASSISTANT_TAG: &str = "<|assistant|>";
const CALL_NAME: &str = "tool_call";
// Same bound serde_json applies to JSON bodies.
const MAX_NESTING: usize = 128;

/// Why a buffered completion could not be read as a tool call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallParseError {
    #[error("output has no tool name line")]
    NotAToolCall,
    #[error("tool call '{0}' has no argument body")]
    MissingBody(String),
    #[error("tool call arguments are malformed at offset {offset}: {reason}")]
    MalformedArguments { offset: usize, reason: String },
}

/// Parse a complete model output into a [`FunctionCallResponse`].
///
/// # Errors
///
/// Returns [`ToolCallParseError`] when the output is prose or the argument
/// body cannot be read.
pub fn parse_tool_call(output: &str) -> Result<FunctionCallResponse, ToolCallParseError> {
    // Only the last assistant turn counts.
    let segment = output.rsplit(ASSISTANT_TAG).next().unwrap_or(output);

    let (metadata, body) = segment
        .split_once('\n')
        .ok_or(ToolCallParseError::NotAToolCall)?;
    let name = metadata.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ToolCallParseError::NotAToolCall);
    }
    if body.trim().is_empty() {
        return Err(ToolCallParseError::MissingBody(name.to_owned()));
    }

    let arguments = match fenced_code(body) {
        Some(code) => parse_call_expression(code)?,
        None => parse_json_arguments(body.trim())?,
    };

    Ok(FunctionCallResponse {
        name: name.to_owned(),
        arguments: Value::Object(arguments).to_string(),
    })
}

/// The lines between an opening ```` ``` ```` fence and the last line.
fn fenced_code(body: &str) -> Option<&str> {
    let trimmed = body.trim();
    if !trimmed.starts_with("```") {
        return None;
    }
    let start = memchr(b'\n', trimmed.as_bytes())? + 1;
    let end = trimmed.rfind('\n')?;
    if end < start {
        return Some("");
    }
    Some(&trimmed[start..end])
}

fn parse_json_arguments(body: &str) -> Result<Map<String, Value>, ToolCallParseError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ToolCallParseError::MalformedArguments {
            offset: 0,
            reason: "arguments must be an object".into(),
        }),
        Err(err) => Err(ToolCallParseError::MalformedArguments {
            offset: err.column().saturating_sub(1),
            reason: err.to_string(),
        }),
    }
}

fn parse_call_expression(code: &str) -> Result<Map<String, Value>, ToolCallParseError> {
    let mut cursor = Cursor::new(code);
    cursor.skip_ws();
    if !cursor.eat_keyword(CALL_NAME) {
        return Err(cursor.error(format!("expected `{CALL_NAME}(`")));
    }
    cursor.skip_ws();
    cursor.expect(b'(')?;

    let mut arguments = Map::new();
    loop {
        cursor.skip_ws();
        if cursor.eat(b')') {
            break;
        }
        let key = cursor.identifier()?;
        cursor.skip_ws();
        cursor.expect(b'=')?;
        let value = cursor.value()?;
        arguments.insert(key.to_owned(), value);
        cursor.skip_ws();
        if cursor.eat(b',') {
            continue;
        }
        cursor.expect(b')')?;
        break;
    }

    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(cursor.error("trailing input after call".into()));
    }
    Ok(arguments)
}

/// Reader for the subset of Python literal syntax models emit in calls.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn error(&self, reason: String) -> ToolCallParseError {
        ToolCallParseError::MalformedArguments {
            offset: self.pos,
            reason,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ToolCallParseError> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", char::from(byte))))
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        let rest = self.rest();
        let Some(after) = rest.strip_prefix(word) else {
            return false;
        };
        if after
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return false;
        }
        self.pos += word.len();
        true
    }

    fn identifier(&mut self) -> Result<&'a str, ToolCallParseError> {
        let start = self.pos;
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(i, c)| !(c == '_' || c.is_alphanumeric()) || (i == 0 && c.is_numeric()))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return Err(self.error("expected keyword argument name".into()));
        }
        self.pos += len;
        Ok(&self.src[start..self.pos])
    }

    fn value(&mut self) -> Result<Value, ToolCallParseError> {
        self.skip_ws();
        match self.peek() {
            Some(b'\'' | b'"') => self.string().map(Value::String),
            Some(b'[') => {
                self.pos += 1;
                self.nested(|cursor| cursor.sequence(b']')).map(Value::Array)
            }
            Some(b'(') => {
                self.pos += 1;
                self.nested(|cursor| cursor.sequence(b')')).map(Value::Array)
            }
            Some(b'{') => {
                self.pos += 1;
                self.nested(Self::dict).map(Value::Object)
            }
            Some(b'-' | b'+' | b'.' | b'0'..=b'9') => self.number(),
            Some(_) => {
                if self.eat_keyword("True") {
                    Ok(Value::Bool(true))
                } else if self.eat_keyword("False") {
                    Ok(Value::Bool(false))
                } else if self.eat_keyword("None") {
                    Ok(Value::Null)
                } else {
                    Err(self.error("expected a literal value".into()))
                }
            }
            None => Err(self.error("unexpected end of input".into())),
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ToolCallParseError>,
    ) -> Result<T, ToolCallParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn sequence(&mut self, close: u8) -> Result<Vec<Value>, ToolCallParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            if !self.eat(b',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn dict(&mut self) -> Result<Map<String, Value>, ToolCallParseError> {
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat(b'}') {
                return Ok(map);
            }
            let key = match self.value()? {
                Value::String(key) => key,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => (if b { "True" } else { "False" }).to_owned(),
                _ => return Err(self.error("unsupported dict key".into())),
            };
            self.skip_ws();
            self.expect(b':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            if !self.eat(b',') {
                self.expect(b'}')?;
                return Ok(map);
            }
        }
    }

    fn string(&mut self) -> Result<String, ToolCallParseError> {
        let start = self.pos;
        let Some(quote) = self.peek() else {
            return Err(self.error("expected string".into()));
        };
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, ch)) = chars.next() {
            match ch {
                c if c == char::from(quote) => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        'u' => {
                            let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                            let decoded = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error(format!("bad \\u escape `{hex}`")))?;
                            out.push(decoded);
                        }
                        other => out.push(other),
                    }
                }
                '\n' => break,
                other => out.push(other),
            }
        }
        self.pos = start;
        Err(self.error("unterminated string".into()))
    }

    fn number(&mut self) -> Result<Value, ToolCallParseError> {
        let start = self.pos;
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_')))
            .unwrap_or(self.rest().len());
        let literal: String = self.rest()[..len].chars().filter(|c| *c != '_').collect();
        self.pos += len;

        let literal = literal.strip_prefix('+').unwrap_or(&literal);
        if let Ok(int) = literal.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        literal
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(ToolCallParseError::MalformedArguments {
                offset: start,
                reason: format!("invalid number `{literal}`"),
            })
    }
}
