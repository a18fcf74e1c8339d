//! Escaping of string fields
//!
//! Anything outside printable ASCII becomes a `\uXXXX` escape, using a
//! UTF-16 surrogate pair beyond the basic plane. Backslash, solidus
//! and double quote are escaped with a backslash. Escaped output is
//! plain ASCII and therefore valid UTF-8 whatever the input.
//!
//! Byte strings are escaped as the text whose code points equal the
//! byte values, so `0xff` renders as `\u00ff`.

use std::io::{self, Write};

/// Units (bytes or code points) of a value shown in a record
pub const PREVIEW_LIMIT: usize = 100;

/// Write the escaped form of a single character
pub fn write_escaped_char<W: ?Sized + Write>(writer: &mut W, c: char) -> io::Result<()> {
    let code = u32::from(c);
    if code <= 0x1f || code > 0x7e {
        if code > 0xffff {
            let offset = code - 0x10000;
            let hi = 0xd800 | ((offset >> 10) & 0x3ff);
            let lo = 0xdc00 | (offset & 0x3ff);
            write!(writer, "\\u{:04x}\\u{:04x}", hi, lo)
        } else {
            write!(writer, "\\u{:04x}", code)
        }
    } else if matches!(c, '\\' | '/' | '"') {
        writer.write_all(&[b'\\', code as u8])
    } else {
        writer.write_all(&[code as u8])
    }
}

/// Write the escaped form of `text`, without surrounding quotes
pub fn write_escaped_str<W: ?Sized + Write>(writer: &mut W, text: &str) -> io::Result<()> {
    text.chars().try_for_each(|c| write_escaped_char(writer, c))
}

/// The text whose code points are the values of `bytes`
pub fn bytes_as_text(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

/// The first `limit` code points of `text`
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
