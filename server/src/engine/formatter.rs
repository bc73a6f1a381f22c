use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Non-breaking space, rendered as an ordinary space.
pub const NO_BREAK_SPACE: char = '\u{00A0}';

/// Zero-width space, stripped from message bodies.
pub const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// A chat line in its final display form: `[<address>] [<nickname>]:\n<body>`.
///
/// Produced exactly once per accepted message. History, broadcast and the log
/// sink all share the same allocation, so the text can never diverge between
/// destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormattedMessage(Arc<str>);

impl FormattedMessage {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormattedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FormattedMessage {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for FormattedMessage {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for FormattedMessage {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Build the display line for a message body sent by `address`/`nickname`.
/// Non-string bodies are coerced to text first.
pub fn format_message(address: &str, nickname: &str, raw: &Value) -> FormattedMessage {
    let text = coerce_text(raw);
    let body = normalize_text(&text);
    format!("[{address}] [{nickname}]:\n{body}").into()
}

/// Collapse CRLF to LF, turn non-breaking spaces into spaces and drop
/// zero-width spaces. Nothing else is touched: no trimming, no truncation.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {}
            NO_BREAK_SPACE => out.push(' '),
            ZERO_WIDTH_SPACE => {}
            c => out.push(c),
        }
    }
    out
}

/// Textual form of an arbitrary JSON payload, following loose string
/// conversion rules (`null` -> "null", arrays joined with commas, objects
/// collapse to "[object Object]").
pub fn coerce_text(raw: &Value) -> Cow<'_, str> {
    match raw {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Number(n) => Cow::Owned(number_text(n)),
        Value::Array(items) => Cow::Owned(
            items
                .iter()
                .map(|item| match item {
                    Value::Null => Cow::Borrowed(""),
                    other => coerce_text(other),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Cow::Borrowed("[object Object]"),
    }
}

fn number_text(n: &Number) -> String {
    if n.is_f64()
        && let Some(f) = n.as_f64()
    {
        // Negative zero prints as "0".
        if f == 0.0 {
            return "0".to_string();
        }
        let magnitude = f.abs();
        if magnitude >= 1e21 || magnitude < 1e-6 {
            return exponent_text(f);
        }
        return f.to_string();
    }
    // Integers fit in 64 bits, well below the exponent threshold.
    n.to_string()
}

/// Shortest exponent form with an explicit sign on the exponent: `1e+21`, `1.5e-7`.
fn exponent_text(f: f64) -> String {
    let text = format!("{f:e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn render(address: &str, nickname: &str, text: &str) -> String {
        format_message(address, nickname, &json!(text)).to_string()
    }

    #[test]
    fn test_emoji_passes_through() {
        assert_eq!(render("1.2.3.4", "user", "hola 😊"), "[1.2.3.4] [user]:\nhola 😊");
    }

    #[test]
    fn test_crlf_collapsed() {
        assert_eq!(render("1.2.3.4", "user", "a\r\nb"), "[1.2.3.4] [user]:\na\nb");
        assert_eq!(normalize_text("a\r\n\r\nb"), "a\n\nb");
    }

    #[test]
    fn test_lone_carriage_return_kept() {
        assert_eq!(normalize_text("a\rb"), "a\rb");
        assert_eq!(normalize_text("a\r\r\nb"), "a\r\nb");
    }

    #[test]
    fn test_nbsp_and_zero_width_space() {
        assert_eq!(normalize_text("a\u{00A0}b"), "a b");
        assert_eq!(normalize_text("a\u{200B}b\u{200B}"), "ab");
        assert_eq!(
            render("10.0.0.1", "Anon", "x\u{00A0}\u{200B}y"),
            "[10.0.0.1] [Anon]:\nx y"
        );
    }

    #[test]
    fn test_no_trimming() {
        assert_eq!(render("h", "n", "  padded  \n"), "[h] [n]:\n  padded  \n");
        assert_eq!(render("h", "n", ""), "[h] [n]:\n");
    }

    #[test]
    fn test_deterministic() {
        let input = json!("multi\r\nline 👩‍👩‍👧 \u{00A0}\u{200B}");
        let a = format_message("::1", "nick", &input);
        let b = format_message("::1", "nick", &input);
        assert_eq!(a, b);
        assert_eq!(a.as_str().as_bytes(), b.as_str().as_bytes());
    }

    #[test]
    fn test_coerce_non_string_payloads() {
        assert_eq!(coerce_text(&json!(null)), "null");
        assert_eq!(coerce_text(&json!(true)), "true");
        assert_eq!(coerce_text(&json!(42)), "42");
        assert_eq!(coerce_text(&json!(-7)), "-7");
        assert_eq!(coerce_text(&json!(1.0)), "1");
        assert_eq!(coerce_text(&json!(2.5)), "2.5");
        assert_eq!(coerce_text(&json!(-0.0)), "0");
        assert_eq!(coerce_text(&json!(u64::MAX)), "18446744073709551615");
        assert_eq!(coerce_text(&json!([1, "a", null, [2, 3]])), "1,a,,2,3");
        assert_eq!(coerce_text(&json!({"text": "hi"})), "[object Object]");
    }

    #[test]
    fn test_coerce_extreme_magnitudes_use_exponent_form() {
        assert_eq!(coerce_text(&json!(1e21)), "1e+21");
        assert_eq!(coerce_text(&json!(-1.5e21)), "-1.5e+21");
        assert_eq!(coerce_text(&json!(1e-7)), "1e-7");
        assert_eq!(coerce_text(&json!(2.5e-10)), "2.5e-10");

        // Just inside the plain-decimal range.
        assert_eq!(coerce_text(&json!(1e20)), "100000000000000000000");
        assert_eq!(coerce_text(&json!(0.000001)), "0.000001");
    }

    #[test]
    fn test_format_coerces_before_normalizing() {
        let msg = format_message("1.2.3.4", "user", &json!(123));
        assert_eq!(msg.as_str(), "[1.2.3.4] [user]:\n123");

        let msg = format_message("1.2.3.4", "user", &json!(["a\r\nb", "c"]));
        assert_eq!(msg.as_str(), "[1.2.3.4] [user]:\na\nb,c");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let msg = FormattedMessage::from("[a] [b]:\nc");
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#""[a] [b]:\nc""#);
    }
}
