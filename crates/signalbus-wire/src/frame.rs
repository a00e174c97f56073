//! Frame encoding, decoding, and raw-value conversion.

use signalbus_types::{BusError, BusResult, Value, ValueKind};

/// The escaped form of a line break inside a payload.
const ESCAPED_NEWLINE: &str = "\\n";

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `$name=value`. The value is the raw text after `=`, already unquoted
    /// and unescaped when it was quote-delimited; parsing it into the slot's
    /// kind is [`convert`]'s job.
    Signal {
        /// Signal name.
        name: String,
        /// Raw value text.
        value: String,
    },
    /// `#name` with a non-empty name.
    Command(String),
    /// Anything else, delivered verbatim after unescaping.
    Text(String),
}

/// Replace every CRLF, LF or CR with the literal two-character `\n` so the
/// result contains no real line breaks.
pub fn escape(text: &str) -> String {
    text.replace("\r\n", ESCAPED_NEWLINE)
        .replace('\n', ESCAPED_NEWLINE)
        .replace('\r', ESCAPED_NEWLINE)
}

/// Inverse of [`escape`]: literal `\n` back to a real line feed.
pub fn unescape(text: &str) -> String {
    text.replace(ESCAPED_NEWLINE, "\n")
}

/// Encode a signal assignment as `$name=value`.
///
/// Text values are escaped and double-quoted; every other kind uses its
/// unquoted `Display` form (`Json` is compact `serde_json` output, which
/// never contains raw newlines).
pub fn encode_signal(name: &str, value: &Value) -> String {
    match value {
        Value::Text(s) => format!("${name}=\"{}\"", escape(s)),
        other => format!("${name}={other}"),
    }
}

/// Encode a command invocation as `#name`.
pub fn encode_command(name: &str) -> String {
    format!("#{name}")
}

/// Encode a plain text message (escaped so it stays a single line).
pub fn encode_text(text: &str) -> String {
    escape(text)
}

/// Decode one line into a [`Frame`].
///
/// A line that matches neither the signal nor the command syntax — including
/// a bare `#` — is a plain message.
pub fn decode(line: &str) -> Frame {
    if let Some(rest) = line.strip_prefix('$') {
        if let Some((name, raw)) = rest.split_once('=') {
            return Frame::Signal {
                name: name.to_string(),
                value: unquote(raw),
            };
        }
    }
    if let Some(rest) = line.strip_prefix('#') {
        if !rest.is_empty() {
            return Frame::Command(rest.to_string());
        }
    }
    Frame::Text(unescape(line))
}

/// Strip quotes and unescape a quote-delimited raw value; pass anything else
/// through verbatim.
fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        unescape(&raw[1..raw.len() - 1])
    } else {
        raw.to_string()
    }
}

/// Parse a raw wire value into the slot's registered kind.
///
/// Primitive parsers for bool/int/float, verbatim for text, and a JSON
/// deserializer as the structured fallback. Failure condemns only the single
/// inbound frame, never the connection.
pub fn convert(raw: &str, kind: ValueKind) -> BusResult<Value> {
    let parse_err = || BusError::Parse {
        raw: raw.to_string(),
        expected: kind,
    };

    match kind {
        ValueKind::Bool => {
            let trimmed = raw.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Err(parse_err())
            }
        }
        ValueKind::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| parse_err()),
        ValueKind::Float => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| parse_err()),
        ValueKind::Text => Ok(Value::Text(raw.to_string())),
        ValueKind::Json => serde_json::from_str(raw)
            .map(Value::Json)
            .map_err(|_| parse_err()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip() {
        let text = "line1\nline2\r\nline3\rend";
        let escaped = escape(text);
        assert!(!escaped.contains('\n'));
        assert!(!escaped.contains('\r'));
        // CRLF, LF and CR all come back as LF.
        assert_eq!(unescape(&escaped), "line1\nline2\nline3\nend");
    }

    #[test]
    fn test_unescape_escape_identity_for_lf_text() {
        let text = "a\nb\nc";
        assert_eq!(unescape(&escape(text)), text);
    }

    #[test]
    fn test_signal_roundtrip_bool() {
        let line = encode_signal("D2816", &Value::Bool(false));
        assert_eq!(line, "$D2816=false");
        assert_eq!(
            decode(&line),
            Frame::Signal {
                name: "D2816".to_string(),
                value: "false".to_string(),
            }
        );
    }

    #[test]
    fn test_signal_roundtrip_text_with_newlines() {
        let value = Value::Text("line1\nline2".to_string());
        let line = encode_signal("Note", &value);
        assert_eq!(line, "$Note=\"line1\\nline2\"");
        match decode(&line) {
            Frame::Signal { name, value: raw } => {
                assert_eq!(name, "Note");
                assert_eq!(raw, "line1\nline2");
            }
            other => panic!("Expected Signal, got {other:?}"),
        }
    }

    #[test]
    fn test_signal_value_with_inner_quote() {
        let value = Value::Text("say \"hi\"".to_string());
        let line = encode_signal("Msg", &value);
        match decode(&line) {
            Frame::Signal { value: raw, .. } => assert_eq!(raw, "say \"hi\""),
            other => panic!("Expected Signal, got {other:?}"),
        }
    }

    #[test]
    fn test_signal_roundtrip_all_kinds() {
        for value in [
            Value::Bool(true),
            Value::Int(-37),
            Value::Float(2.5),
            Value::Text("plain".to_string()),
            Value::Json(serde_json::json!({"axis": [1, 2, 3]})),
        ] {
            let line = encode_signal("S", &value);
            let Frame::Signal { name, value: raw } = decode(&line) else {
                panic!("not a signal frame: {line}");
            };
            assert_eq!(name, "S");
            assert_eq!(convert(&raw, value.kind()).unwrap(), value);
        }
    }

    #[test]
    fn test_command_roundtrip() {
        let line = encode_command("RESET_SYSTEM");
        assert_eq!(line, "#RESET_SYSTEM");
        assert_eq!(decode(&line), Frame::Command("RESET_SYSTEM".to_string()));
    }

    #[test]
    fn test_bare_hash_is_not_a_command() {
        assert_eq!(decode("#"), Frame::Text("#".to_string()));
    }

    #[test]
    fn test_dollar_without_equals_is_text() {
        assert_eq!(decode("$noequals"), Frame::Text("$noequals".to_string()));
    }

    #[test]
    fn test_plain_text_unescaped() {
        assert_eq!(
            decode("hello\\nworld"),
            Frame::Text("hello\nworld".to_string())
        );
    }

    #[test]
    fn test_convert_bool_case_insensitive() {
        assert_eq!(convert("True", ValueKind::Bool).unwrap(), Value::Bool(true));
        assert_eq!(
            convert("FALSE", ValueKind::Bool).unwrap(),
            Value::Bool(false)
        );
        assert!(convert("yes", ValueKind::Bool).is_err());
    }

    #[test]
    fn test_convert_failures_name_the_kind() {
        let err = convert("abc", ValueKind::Int).unwrap_err();
        match err {
            signalbus_types::BusError::Parse { raw, expected } => {
                assert_eq!(raw, "abc");
                assert_eq!(expected, ValueKind::Int);
            }
            other => panic!("Expected Parse, got {other:?}"),
        }
        assert!(convert("{not json", ValueKind::Json).is_err());
    }
}
