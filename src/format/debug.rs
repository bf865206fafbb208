use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Timelike};

use crate::types::RowValues;

use super::PlaceholderStyle;

/// Single-quote `s`, doubling embedded quotes.
#[must_use]
pub fn quote_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Render a value the way it would appear as a SQL literal.
#[must_use]
pub fn format_value(value: &RowValues) -> String {
    match value {
        RowValues::Null => "NULL".to_string(),
        RowValues::Bool(true) => "TRUE".to_string(),
        RowValues::Bool(false) => "FALSE".to_string(),
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) => f.to_string(),
        RowValues::Text(s) => quote_string_literal(s),
        RowValues::Timestamp(ts) => format!("'{}'", render_naive(ts, "Z")),
        RowValues::TimestampTz(ts) => format!("'{}'", render_zoned(ts)),
        RowValues::JSON(v) => quote_string_literal(&v.to_string()),
        RowValues::Blob(bytes) => format!("'\\x{}'", hex_upper(bytes)),
        RowValues::Array(items) => quote_string_literal(&pg_array_literal(items)),
    }
}

/// `PostgreSQL` array literal text (without the outer SQL quotes).
#[must_use]
pub fn pg_array_literal(items: &[RowValues]) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            RowValues::Null => out.push_str("NULL"),
            RowValues::Int(v) => out.push_str(&v.to_string()),
            RowValues::Float(v) => out.push_str(&v.to_string()),
            RowValues::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
            RowValues::Text(s) => push_array_quoted(&mut out, s),
            RowValues::Timestamp(ts) => push_array_quoted(&mut out, &render_naive(ts, "Z")),
            RowValues::TimestampTz(ts) => push_array_quoted(&mut out, &render_zoned(ts)),
            RowValues::JSON(v) => push_array_quoted(&mut out, &v.to_string()),
            RowValues::Blob(bytes) => {
                push_array_quoted(&mut out, &format!("\\x{}", hex_upper(bytes)));
            }
            RowValues::Array(nested) => out.push_str(&pg_array_literal(nested)),
        }
    }
    out.push('}');
    out
}

fn push_array_quoted(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

// Microsecond precision with trailing zeros trimmed.
fn render_naive(ts: &NaiveDateTime, zone: &str) -> String {
    let mut out = ts.format("%Y-%m-%d %H:%M:%S").to_string();
    let micros = ts.nanosecond() % 1_000_000_000 / 1_000;
    if micros > 0 {
        let frac = format!("{micros:06}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out.push_str(zone);
    out
}

fn render_zoned(ts: &DateTime<FixedOffset>) -> String {
    let seconds = ts.offset().fix().local_minus_utc();
    if seconds == 0 {
        return render_naive(&ts.naive_local(), "Z");
    }
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.unsigned_abs();
    let zone = format!(
        "{sign}{:02}:{:02}:{:02}",
        abs / 3600,
        abs % 3600 / 60,
        abs % 60
    );
    render_naive(&ts.naive_local(), &zone)
}

/// Substitute rendered arguments for placeholders in one left-to-right pass.
///
/// Numbered placeholders consume every following digit, so `$1` never matches
/// inside `$10`, and text already substituted is never scanned again.
/// Placeholders without a matching argument are left untouched, as is
/// anything inside single- or double-quoted spans.
#[must_use]
pub fn format_query_with(query: &str, style: PlaceholderStyle, rendered: &[String]) -> String {
    let mut out = String::with_capacity(query.len() + rendered.iter().map(String::len).sum::<usize>());
    let bytes = query.as_bytes();
    let mut quote: Option<u8> = None;
    let mut copied = 0;
    let mut positional = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'\'' || b == b'"' {
            quote = Some(b);
            i += 1;
            continue;
        }
        match style {
            PlaceholderStyle::Positional if b == b'?' => {
                out.push_str(&query[copied..i]);
                match rendered.get(positional) {
                    Some(value) => out.push_str(value),
                    None => out.push('?'),
                }
                positional += 1;
                i += 1;
                copied = i;
            }
            PlaceholderStyle::Numbered(prefix) if bytes[i..].starts_with(prefix.as_bytes()) => {
                let start = i + prefix.len();
                let digits = bytes[start..].iter().take_while(|c| c.is_ascii_digit()).count();
                let end = start + digits;
                let value = query[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| rendered.get(idx));
                out.push_str(&query[copied..i]);
                match value {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&query[i..end]),
                }
                i = end;
                copied = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&query[copied..]);
    out
}

/// Trim trailing whitespace, drop blank lines, and strip the longest common
/// leading whitespace.
#[must_use]
pub fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();

    let mut common: Option<&str> = None;
    for line in &lines {
        let indent = &line[..line.len() - line.trim_start().len()];
        common = Some(match common {
            None => indent,
            Some(prev) => {
                let shared = prev
                    .char_indices()
                    .zip(indent.chars())
                    .find(|((_, a), b)| a != b)
                    .map_or(prev.len().min(indent.len()), |((i, _), _)| i);
                &prev[..shared]
            }
        });
    }
    let strip = common.map_or(0, str::len);

    lines
        .iter()
        .map(|line| &line[strip..])
        .collect::<Vec<_>>()
        .join("\n")
}
