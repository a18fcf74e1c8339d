//! One line per object
//!
//! Records are serialized with `serde_json` through [`DumpFormatter`],
//! which supplies the `", "` / `": "` separators and the escaping rules
//! of [`super::escape`]. Each record ends with a newline.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::ser::{CharEscape, Formatter, Serializer};

use crate::host::ScalarValue;

use super::error::DumpError;
use super::escape::{bytes_as_text, truncate_chars, write_escaped_char, write_escaped_str};

/// Preview of a leaf value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Preview {
    Text(String),
    Int(i64),
}

impl Preview {
    /// Preview `value`, showing at most `limit` bytes or code points.
    /// Integers outside the `i64` range have no preview.
    pub fn from_scalar(value: ScalarValue, limit: usize) -> Option<Preview> {
        match value {
            ScalarValue::Bytes(bytes) => Some(Preview::Text(bytes_as_text(
                &bytes[..bytes.len().min(limit)],
            ))),
            ScalarValue::Text(text) | ScalarValue::Frame(text) => {
                Some(Preview::Text(truncate_chars(&text, limit).to_string()))
            }
            ScalarValue::Bool(true) => Some(Preview::Text("True".to_string())),
            ScalarValue::Bool(false) => Some(Preview::Text("False".to_string())),
            ScalarValue::Int(n) => i64::try_from(n).ok().map(Preview::Int),
        }
    }
}

/// Everything recorded about one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    pub address: u64,
    #[serde(rename = "type")]
    pub type_name: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Preview>,
    /// Identities of direct referents
    pub refs: Vec<u64>,
}

impl ObjectRecord {
    /// The record as a single line, newline included
    pub fn to_line(&self) -> Result<String, DumpError> {
        let mut encoder = RecordEncoder::new();
        let bytes = encoder.encode(self)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// `serde_json` formatter for the dump line format
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpFormatter;

impl Formatter for DumpFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        write_escaped_str(writer, fragment)
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let c = match char_escape {
            CharEscape::Quote => '"',
            CharEscape::ReverseSolidus => '\\',
            CharEscape::Solidus => '/',
            CharEscape::Backspace => '\u{8}',
            CharEscape::FormFeed => '\u{c}',
            CharEscape::LineFeed => '\n',
            CharEscape::CarriageReturn => '\r',
            CharEscape::Tab => '\t',
            CharEscape::AsciiControl(byte) => char::from(byte),
        };
        write_escaped_char(writer, c)
    }
}

/// Renders records into a reused buffer
#[derive(Debug, Default)]
pub struct RecordEncoder {
    buf: Vec<u8>,
}

impl RecordEncoder {
    pub fn new() -> Self {
        RecordEncoder {
            buf: Vec::with_capacity(256),
        }
    }

    /// Encode `record` as one line; the slice is valid until the next call
    pub fn encode(&mut self, record: &ObjectRecord) -> Result<&[u8], serde_json::Error> {
        self.buf.clear();
        let mut serializer = Serializer::with_formatter(&mut self.buf, DumpFormatter);
        record.serialize(&mut serializer)?;
        self.buf.push(b'\n');
        Ok(&self.buf)
    }
}

/// Write `record` to `writer` as one line
pub fn write_record<W: Write>(writer: &mut W, record: &ObjectRecord) -> Result<(), DumpError> {
    let mut encoder = RecordEncoder::new();
    let bytes = encoder.encode(record)?;
    writer
        .write_all(bytes)
        .map_err(|source| DumpError::Sink { records: 0, source })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dump::escape::PREVIEW_LIMIT;

    fn record(type_name: &str) -> ObjectRecord {
        ObjectRecord {
            address: 1234,
            type_name: type_name.to_string(),
            size: 48,
            name: None,
            len: None,
            value: None,
            refs: vec![],
        }
    }

    #[test]
    pub fn test_minimal_record() {
        assert_eq!(
            record("object").to_line().unwrap(),
            "{\"address\": 1234, \"type\": \"object\", \"size\": 48, \"refs\": []}\n"
        );
    }

    #[test]
    pub fn test_bytes_record() {
        let mut r = record("bytes");
        r.len = Some(19);
        r.value = Preview::from_scalar(
            ScalarValue::Bytes(b"a \\str/with\"control".to_vec()),
            PREVIEW_LIMIT,
        );
        assert_eq!(
            r.to_line().unwrap(),
            "{\"address\": 1234, \"type\": \"bytes\", \"size\": 48, \"len\": 19, \
             \"value\": \"a \\\\str\\/with\\\"control\", \"refs\": []}\n"
        );
    }

    #[test]
    pub fn test_named_record_with_refs() {
        let mut r = record("module");
        r.name = Some("pkg.mod".to_string());
        r.refs = vec![7, 9];
        assert_eq!(
            r.to_line().unwrap(),
            "{\"address\": 1234, \"type\": \"module\", \"size\": 48, \
             \"name\": \"pkg.mod\", \"refs\": [7, 9]}\n"
        );
    }

    #[test]
    pub fn test_text_preview_escapes() {
        let mut r = record("str");
        r.len = Some(9);
        r.value = Preview::from_scalar(ScalarValue::Text("a \u{b5}nicode".into()), PREVIEW_LIMIT);
        let line = r.to_line().unwrap();
        assert!(line.contains("\"len\": 9, \"value\": \"a \\u00b5nicode\""));
        assert!(line.is_ascii());
    }

    #[test]
    pub fn test_control_characters_in_text() {
        let mut r = record("str");
        r.value = Preview::from_scalar(ScalarValue::Text("\n\t\u{8}\u{1}".into()), PREVIEW_LIMIT);
        assert!(r
            .to_line()
            .unwrap()
            .contains("\"value\": \"\\u000a\\u0009\\u0008\\u0001\""));
    }

    #[test]
    pub fn test_scalar_previews() {
        assert_eq!(
            Preview::from_scalar(ScalarValue::Bool(true), PREVIEW_LIMIT),
            Some(Preview::Text("True".into()))
        );
        assert_eq!(
            Preview::from_scalar(ScalarValue::Int(-(1 << 40)), PREVIEW_LIMIT),
            Some(Preview::Int(-(1 << 40)))
        );
        assert_eq!(
            Preview::from_scalar(ScalarValue::Int(1 << 100), PREVIEW_LIMIT),
            None
        );
        assert_eq!(
            Preview::from_scalar(ScalarValue::Frame("local_frame".into()), PREVIEW_LIMIT),
            Some(Preview::Text("local_frame".into()))
        );
    }

    #[test]
    pub fn test_integer_value_is_a_number() {
        let mut r = record("int");
        r.value = Preview::from_scalar(ScalarValue::Int(65536), PREVIEW_LIMIT);
        assert!(r.to_line().unwrap().contains("\"value\": 65536, "));
    }

    #[test]
    pub fn test_encoder_reuses_buffer() {
        let mut encoder = RecordEncoder::new();
        let first = encoder.encode(&record("a")).unwrap().to_vec();
        let second = encoder.encode(&record("b")).unwrap().to_vec();
        assert_eq!(first.len(), second.len());
        assert_ne!(first, second);
        assert_eq!(second.last(), Some(&b'\n'));
    }

    #[test]
    pub fn test_write_record() {
        let mut r = record("list");
        r.len = Some(2);
        r.refs = vec![5, 6];
        let mut out = vec![];
        write_record(&mut out, &r).unwrap();
        write_record(&mut out, &record("int")).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        assert_eq!(lines, vec![r.to_line().unwrap(), record("int").to_line().unwrap()]);
    }

    struct Refusing;

    impl Write for Refusing {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    pub fn test_write_record_to_failing_sink() {
        let err = write_record(&mut Refusing, &record("object")).unwrap_err();
        assert!(matches!(err, DumpError::Sink { .. }));
        assert_eq!(err.records_written(), Some(0));
    }
}
