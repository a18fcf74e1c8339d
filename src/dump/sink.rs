//! Destinations for dump output
//!
//! Any [`std::io::Write`] is a sink. Each record reaches the sink as a
//! single `write_all`, so a callback sink sees exactly one call per
//! record.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// A sink that hands each chunk of output to a callback
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    pub fn new(callback: F) -> Self {
        CallbackSink { callback }
    }

    pub fn into_inner(self) -> F {
        self.callback
    }
}

impl<F> Write for CallbackSink<F>
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.callback)(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<F> fmt::Debug for CallbackSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackSink")
    }
}

/// Wrap `callback` as a sink
pub fn callback<F>(callback: F) -> CallbackSink<F>
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    CallbackSink::new(callback)
}

/// Create (or truncate) `path` as a buffered sink
pub fn file_sink<P: AsRef<Path>>(path: P) -> io::Result<BufWriter<File>> {
    File::create(path).map(BufWriter::new)
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn test_one_call_per_write_all() {
        let mut chunks: Vec<Vec<u8>> = vec![];
        {
            let mut sink = callback(|bytes: &[u8]| {
                chunks.push(bytes.to_vec());
                Ok(())
            });
            sink.write_all(b"first\n").unwrap();
            sink.write_all(b"second\n").unwrap();
        }
        assert_eq!(chunks, vec![b"first\n".to_vec(), b"second\n".to_vec()]);
    }

    #[test]
    pub fn test_callback_error_propagates() {
        let mut sink = callback(|_: &[u8]| Err(io::Error::new(io::ErrorKind::Other, "full")));
        let err = sink.write_all(b"x").unwrap_err();
        assert_eq!(err.to_string(), "full");
    }
}
