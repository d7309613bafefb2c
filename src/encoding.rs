//! Canonical text encoding for message bodies.
//!
//! Message bodies are JSON written with `", "` between items and `": "`
//! between keys and values, the layout downstream workers already parse.
//! Non-ASCII characters are written as-is rather than escaped.

use serde::Serialize;
use serde::ser::Error as _;
use serde_json::ser::Formatter;
use std::io;

/// JSON formatter separating items with `", "` and keys with `": "`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialise `value` using [`SpacedFormatter`].
///
/// # Errors
///
/// Returns an error if `value` fails to serialise.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use workmgr_lib::to_canonical_string;
///
/// let body = to_canonical_string(&json!({"id": 1})).expect("serialise");
/// assert_eq!(body, r#"{"id": 1}"#);
/// ```
pub fn to_canonical_string<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::with_capacity(128);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(serde_json::Error::custom)
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "simplify test output")]
    use super::to_canonical_string;
    use rstest::rstest;
    use serde_json::{Value, json};

    #[rstest]
    #[case::flat(json!({"id": 1}), r#"{"id": 1}"#)]
    #[case::two_fields(json!({"id": 1, "name": "x"}), r#"{"id": 1, "name": "x"}"#)]
    #[case::nested(
        json!({"id": 2, "args": [1, 2, {"k": null}]}),
        r#"{"id": 2, "args": [1, 2, {"k": null}]}"#
    )]
    #[case::empty_object(json!({}), "{}")]
    #[case::empty_array(json!({"a": []}), r#"{"a": []}"#)]
    fn writes_spaced_separators(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(to_canonical_string(&value).expect("serialise"), expected);
    }

    #[test]
    fn keeps_non_ascii_characters() {
        let body = to_canonical_string(&json!({"name": "Zoë", "city": "東京"}))
            .expect("serialise");
        assert_eq!(body, r#"{"name": "Zoë", "city": "東京"}"#);
    }

    #[test]
    fn output_parses_back_to_the_same_value() {
        let value = json!({"id": 7, "tags": ["a", "b"], "meta": {"x": 1.5}});
        let body = to_canonical_string(&value).expect("serialise");
        let parsed: Value = serde_json::from_str(&body).expect("parse");
        assert_eq!(parsed, value);
    }
}
