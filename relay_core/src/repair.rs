//! Best-effort recovery of a JSON object from model output.
//!
//! Models wrap their JSON in prose, forget to escape quotes, leave trailing
//! commas behind, or get cut off mid-stream. [`repair_structured_text`]
//! slices the outermost `{ ... }` span out of the text, patches the common
//! structural mistakes with [`repair_json`], and parses the result.
//!
//! Both functions are pure. A document that is already valid JSON passes
//! through [`repair_json`] unchanged.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("no JSON object found in text")]
    MalformedStructure,

    #[error("JSON parse failed after repair: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("repaired JSON is not an object")]
    NotAnObject,
}

/// Extract, repair and parse the JSON object embedded in `text`.
///
/// The object spans from the first `{` to the last `}`; anything outside is
/// discarded.
pub fn repair_structured_text(text: &str) -> Result<Map<String, Value>, RepairError> {
    let start = text.find('{').ok_or(RepairError::MalformedStructure)?;
    let end = text.rfind('}').ok_or(RepairError::MalformedStructure)?;
    if end < start {
        return Err(RepairError::MalformedStructure);
    }

    let span = &text[start..=end];
    let repaired = repair_json(span);
    if repaired != span {
        debug!("Repaired model JSON ({} -> {} bytes)", span.len(), repaired.len());
    }
    match serde_json::from_str::<Value>(&repaired)? {
        Value::Object(map) => Ok(map),
        _ => Err(RepairError::NotAnObject),
    }
}

/// What a quote character inside a string turned out to be.
enum QuoteRole {
    Close,
    /// Closing quote of a member that is missing its trailing comma.
    CloseBeforeMissingComma,
    Inner,
}

/// Patch structural mistakes in a JSON-ish document.
///
/// Handles unescaped quotes inside strings, single-quoted strings, raw
/// control characters in strings, invalid escapes, trailing commas, missing
/// commas between members on separate lines, unterminated strings, dangling
/// keys, stray closers and missing closing brackets.
#[must_use]
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => match c {
                '\\' => match chars.get(i + 1) {
                    Some(&next) if is_json_escape(next) => {
                        out.push('\\');
                        out.push(next);
                        i += 1;
                    }
                    Some('\'') => {
                        out.push('\'');
                        i += 1;
                    }
                    _ => out.push_str("\\\\"),
                },
                c if c == q => match quote_role(&chars, i + 1) {
                    QuoteRole::Close => {
                        out.push('"');
                        quote = None;
                    }
                    QuoteRole::CloseBeforeMissingComma => {
                        out.push_str("\",");
                        quote = None;
                    }
                    QuoteRole::Inner if q == '"' => out.push_str("\\\""),
                    QuoteRole::Inner => out.push(q),
                },
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if u32::from(c) < 0x20 => out.push_str(&format!("\\u{:04x}", u32::from(c))),
                c => out.push(c),
            },
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    out.push('"');
                }
                '{' => {
                    closers.push('}');
                    out.push(c);
                }
                '[' => {
                    closers.push(']');
                    out.push(c);
                }
                '}' | ']' => {
                    // A closer with no matching opener is dropped; one that
                    // matches an outer opener closes everything inside it.
                    if closers.contains(&c) {
                        while let Some(closer) = closers.pop() {
                            strip_trailing_comma(&mut out);
                            out.push(closer);
                            if closer == c {
                                break;
                            }
                        }
                    }
                }
                c => out.push(c),
            },
        }
        i += 1;
    }

    if quote.is_some() {
        out.push('"');
    }
    strip_trailing_comma(&mut out);
    if out.trim_end().ends_with(':') {
        out.push_str(" null");
    }
    while let Some(closer) = closers.pop() {
        strip_trailing_comma(&mut out);
        out.push(closer);
    }
    out
}

const fn is_json_escape(c: char) -> bool {
    matches!(c, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u')
}

fn next_significant(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len()).find(|&i| !chars[i].is_whitespace())
}

fn starts_with_literal(chars: &[char], at: usize) -> bool {
    ["true", "false", "null"].iter().any(|literal| {
        literal
            .chars()
            .enumerate()
            .all(|(offset, expected)| chars.get(at + offset) == Some(&expected))
    })
}

/// Decide whether the quote just before `from` ends the current string.
///
/// A closing quote is followed by `:`, `,`, a closer or the end of input.
/// After a comma the next token must look like the start of a value or key,
/// otherwise the comma is prose inside the string.
fn quote_role(chars: &[char], from: usize) -> QuoteRole {
    let Some(pos) = next_significant(chars, from) else {
        return QuoteRole::Close;
    };
    match chars[pos] {
        ':' | '}' | ']' => QuoteRole::Close,
        ',' => match next_significant(chars, pos + 1) {
            None => QuoteRole::Close,
            Some(next) => match chars[next] {
                '"' | '\'' | '{' | '[' | '}' | ']' | '-' | '0'..='9' => QuoteRole::Close,
                _ if starts_with_literal(chars, next) => QuoteRole::Close,
                _ => QuoteRole::Inner,
            },
        },
        '"' if chars[from..pos].contains(&'\n') => QuoteRole::CloseBeforeMissingComma,
        _ => QuoteRole::Inner,
    }
}

fn strip_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end();
    if trimmed.ends_with(',') {
        let len = trimmed.len() - 1;
        out.truncate(len);
    }
}
