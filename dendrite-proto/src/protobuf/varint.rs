//! Reading of variable-length integers.
//!
//! Varints are the default encoding of integers in Protocol Buffers
//! messages, including field keys. Each byte carries 7 value bits; the high
//! bit signals continuation.
//!
//! See <https://protobuf.dev/programming-guides/encoding/#varints>.

use std::io::Read;

/// Maximum number of bytes for an encoded varint.
///
/// A decoded varint is a u64. Nine bytes provide 63 value bits, so one more
/// bit from a tenth byte may be needed.
pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug)]
pub enum VarintError {
    /// The reader was already at the end of the stream.
    Eof,
    /// The end of the stream was reached in the middle of a varint.
    Truncated,
    /// The varint encodes more than 64 bits of value data.
    Invalid,
    /// An IO error occurred while reading from the input.
    Io(std::io::Error),
}

/// Read a varint of up to 64 bits from `src`.
///
/// Returns the decoded value and the number of bytes consumed (between one
/// and ten).
pub fn read_varint<R: Read>(src: &mut R) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;

    for index in 0..MAX_VARINT_LEN {
        let mut byte = [0u8];
        match src.read_exact(&mut byte) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(if index == 0 {
                    VarintError::Eof
                } else {
                    VarintError::Truncated
                });
            }
            Err(err) => return Err(VarintError::Io(err)),
        }
        let byte = byte[0];

        // High bit is the continuation bit. Low 7 bits are the payload.
        value |= ((byte & 0x7f) as u64) << (index * 7);
        if byte <= 0x7f {
            // Only one value bit of the tenth byte may be used.
            if index + 1 == MAX_VARINT_LEN && byte > 0x01 {
                return Err(VarintError::Invalid);
            }
            return Ok((value, index + 1));
        }
    }

    Err(VarintError::Invalid)
}

#[cfg(test)]
pub(crate) fn encode_varint(mut val: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);

    loop {
        let mut byte = (val & 0x7f) as u8;
        if val <= 0x7f {
            bytes.push(byte);
            break;
        } else {
            byte |= 0x80;
            bytes.push(byte);
            val >>= 7;
        }
    }

    bytes
}
