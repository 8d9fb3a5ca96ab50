//! Newline framing for the worker's output streams.
//!
//! Pipes deliver output in arbitrary chunks, so a single line may arrive in
//! several reads. [`LineSplitter`] is a [`Decoder`] for use with
//! [`FramedRead`](tokio_util::codec::FramedRead): bytes that do not yet end
//! in a newline stay in the read buffer and are completed by the next read.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

use crate::tracing::prelude::*;

/// Splits a byte stream into newline-terminated lines.
///
/// Yielded lines have the `\n` (and a preceding `\r`, if any) removed.
/// Invalid UTF-8 is replaced rather than treated as an error. An unterminated
/// fragment left when the stream ends is discarded: the worker always
/// terminates its lines, so a fragment at EOF is a line that never finished.
#[derive(Debug, Default)]
pub struct LineSplitter {
    // Bytes of the current buffer already known to contain no newline, so a
    // long partial line is not rescanned on every read.
    searched: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineSplitter {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(offset) = src[self.searched..].iter().position(|b| *b == b'\n') else {
            self.searched = src.len();
            return Ok(None);
        };

        let newline = self.searched + offset;
        self.searched = 0;

        let mut line = src.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if !src.is_empty() {
            trace!(bytes = src.len(), "Discarding unterminated fragment at end of stream");
            src.clear();
        }
        self.searched = 0;
        Ok(None)
    }
}
