use serde_json::{Number, Value as JsonValue};

use crate::error::{Result, SqlDbError};
use crate::types::RowValues;

/// Split a textual array literal into elements.
///
/// Two forms are recognised:
/// - `{a,"b c",NULL,{1,2}}` as produced by `PostgreSQL`. Elements may be
///   double-quoted with backslash escapes; unquoted `NULL` (any case) is SQL NULL;
///   nested braces become nested arrays. A leading dimension decoration such as
///   `[1:3]=` is skipped.
/// - `[1,"x",null,[2]]`, parsed as JSON, as produced when arrays are stored as
///   JSON text.
///
/// Unquoted brace elements come back as `Text`; callers scan them into the
/// element type.
///
/// # Errors
/// Returns `ConversionError` for unbalanced or otherwise malformed literals.
pub fn split_array_literal(literal: &str) -> Result<Vec<RowValues>> {
    let trimmed = literal.trim();
    if trimmed.starts_with('[') && !trimmed.contains("]={") {
        let parsed: JsonValue = serde_json::from_str(trimmed).map_err(|e| {
            SqlDbError::ConversionError(format!("invalid JSON array literal {literal:?}: {e}"))
        })?;
        return match parsed {
            JsonValue::Array(items) => Ok(items.iter().map(json_to_row_value).collect()),
            _ => Err(SqlDbError::ConversionError(format!(
                "expected JSON array, got {literal:?}"
            ))),
        };
    }

    let body = match trimmed.find("={") {
        Some(pos) if trimmed.starts_with('[') => &trimmed[pos + 1..],
        _ => trimmed,
    };
    let chars: Vec<char> = body.chars().collect();
    if chars.first() != Some(&'{') {
        return Err(SqlDbError::ConversionError(format!(
            "array literal must start with '{{' or '[': {literal:?}"
        )));
    }
    let mut parser = BraceParser { chars: &chars, pos: 0 };
    let items = parser.parse_array()?;
    parser.skip_ws();
    if parser.pos != chars.len() {
        return Err(SqlDbError::ConversionError(format!(
            "trailing characters after array literal {literal:?}"
        )));
    }
    Ok(items)
}

struct BraceParser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl BraceParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn malformed(&self, what: &str) -> SqlDbError {
        SqlDbError::ConversionError(format!("malformed array literal: {what} at offset {}", self.pos))
    }

    fn parse_array(&mut self) -> Result<Vec<RowValues>> {
        // opening brace
        self.pos += 1;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            self.skip_ws();
            let item = match self.peek() {
                Some('{') => RowValues::Array(self.parse_array()?),
                Some('"') => RowValues::Text(self.parse_quoted()?),
                Some(_) => self.parse_bare(),
                None => return Err(self.malformed("unexpected end")),
            };
            items.push(item);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => return Err(self.malformed("expected ',' or '}'")),
                None => return Err(self.malformed("unterminated array")),
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.malformed("dangling escape"))?;
                    out.push(escaped);
                    self.pos += 1;
                }
                Some('"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err(self.malformed("unterminated quoted element")),
            }
        }
    }

    fn parse_bare(&mut self) -> RowValues {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ',' || c == '}' {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let text = text.trim();
        if text.eq_ignore_ascii_case("null") {
            RowValues::Null
        } else {
            RowValues::Text(text.to_string())
        }
    }
}

/// Convert a JSON value into the closest driver value.
#[must_use]
pub fn json_to_row_value(value: &JsonValue) -> RowValues {
    match value {
        JsonValue::Null => RowValues::Null,
        JsonValue::Bool(b) => RowValues::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => RowValues::Int(i),
            None => n.as_f64().map_or(RowValues::Null, RowValues::Float),
        },
        JsonValue::String(s) => RowValues::Text(s.clone()),
        JsonValue::Array(items) => RowValues::Array(items.iter().map(json_to_row_value).collect()),
        JsonValue::Object(_) => RowValues::JSON(value.clone()),
    }
}

/// Render an array as a JSON array, for dialects without native arrays.
#[must_use]
pub fn array_to_json(items: &[RowValues]) -> JsonValue {
    JsonValue::Array(items.iter().map(element_to_json).collect())
}

fn element_to_json(value: &RowValues) -> JsonValue {
    match value {
        RowValues::Int(i) => JsonValue::Number((*i).into()),
        RowValues::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        RowValues::Text(s) => JsonValue::String(s.clone()),
        RowValues::Bool(b) => JsonValue::Bool(*b),
        RowValues::Timestamp(ts) => JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string()),
        RowValues::TimestampTz(ts) => JsonValue::String(ts.to_rfc3339()),
        RowValues::Null => JsonValue::Null,
        RowValues::JSON(v) => v.clone(),
        RowValues::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            JsonValue::String(format!("\\x{hex}"))
        }
        RowValues::Array(items) => array_to_json(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RowValues {
        RowValues::Text(s.to_string())
    }

    #[test]
    fn brace_form_with_quotes_and_nulls() -> Result<()> {
        let items = split_array_literal(r#"{plain, "with \"quote\"" ,"a,b",NULL,"NULL"}"#)?;
        assert_eq!(
            items,
            vec![
                text("plain"),
                text("with \"quote\""),
                text("a,b"),
                RowValues::Null,
                text("NULL"),
            ]
        );
        Ok(())
    }

    #[test]
    fn nested_and_empty_arrays() -> Result<()> {
        assert_eq!(split_array_literal("{}")?, Vec::new());
        assert_eq!(
            split_array_literal("{{1,2},{3}}")?,
            vec![
                RowValues::Array(vec![text("1"), text("2")]),
                RowValues::Array(vec![text("3")]),
            ]
        );
        assert_eq!(
            split_array_literal("[1:2]={7,8}")?,
            vec![text("7"), text("8")]
        );
        Ok(())
    }

    #[test]
    fn bracket_form_is_json() -> Result<()> {
        assert_eq!(
            split_array_literal(r#"[1, "x,y", null, [true]]"#)?,
            vec![
                RowValues::Int(1),
                text("x,y"),
                RowValues::Null,
                RowValues::Array(vec![RowValues::Bool(true)]),
            ]
        );
        Ok(())
    }

    #[test]
    fn malformed_literals_fail() {
        assert!(split_array_literal("{a,b").is_err());
        assert!(split_array_literal(r#"{"open}"#).is_err());
        assert!(split_array_literal("a,b").is_err());
        assert!(split_array_literal("{a} x").is_err());
    }

    #[test]
    fn arrays_render_as_json() {
        let json = array_to_json(&[RowValues::Int(1), text("a"), RowValues::Null]);
        assert_eq!(json.to_string(), r#"[1,"a",null]"#);
    }
}
