//! Positioned reading of wire-format primitives.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::Path;

use crate::protobuf::errors::{ErrorKind, ParseError};
use crate::protobuf::varint;

/// Positioned read access to a stream of wire-format primitives.
///
/// The basic building blocks of Protocol Buffers messages are varints,
/// fixed-width 32 and 64-bit values and length-delimited byte sequences.
/// This trait provides the operations the field tree needs to read them:
/// exact reads, varint decoding, skipping and position queries. The position
/// is used to delimit embedded messages and packed payloads.
pub trait ByteReader {
    /// Fill `buf` from the stream, failing with an EOF error if the stream
    /// ends first.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ParseError>;

    /// Read an LEB128-encoded varint of up to 64 bits.
    fn read_varint(&mut self) -> Result<u64, ParseError>;

    /// Skip over `len` bytes.
    fn skip(&mut self, len: u64) -> Result<(), ParseError>;

    /// Return the current byte offset of the reader.
    fn position(&self) -> u64;

    /// Return whether the reader is at the end of the stream.
    fn is_eof(&mut self) -> Result<bool, ParseError>;

    /// Read a 4-byte little-endian value.
    fn read_u32_le(&mut self) -> Result<u32, ParseError> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read an 8-byte little-endian value.
    fn read_u64_le(&mut self) -> Result<u64, ParseError> {
        let mut buf = [0; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read `len` raw bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ParseError> {
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a string encoded as `len` bytes of UTF-8.
    fn read_string(&mut self, len: usize) -> Result<String, ParseError> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| ParseError::new(ErrorKind::InvalidUtf8))
    }
}

/// A [`ByteReader`] over a buffered, seekable source.
pub struct StreamReader<R: BufRead + Seek> {
    inner: R,
    pos: u64,
}

impl<R: BufRead + Seek> StreamReader<R> {
    /// Create a reader over an underlying buffered source.
    ///
    /// The source is assumed to be at its start; embedded-message detection
    /// relies on the reported position.
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }
}

impl<T: AsRef<[u8]>> StreamReader<Cursor<T>> {
    /// Convenience method that creates a reader over a byte buffer.
    pub fn from_buf(buf: T) -> Self {
        Self::new(Cursor::new(buf))
    }
}

impl StreamReader<BufReader<File>> {
    /// Convenience method that opens a file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead + Seek> ByteReader for StreamReader<R> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ParseError> {
        match std::io::Read::read_exact(&mut self.inner, buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ParseError::new(ErrorKind::Eof))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn read_varint(&mut self) -> Result<u64, ParseError> {
        let (value, len) = varint::read_varint(&mut self.inner)?;
        self.pos += len as u64;
        Ok(value)
    }

    fn skip(&mut self, len: u64) -> Result<(), ParseError> {
        self.inner.seek_relative(len as i64)?;
        self.pos += len;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn is_eof(&mut self) -> Result<bool, ParseError> {
        Ok(self.inner.fill_buf()?.is_empty())
    }
}
