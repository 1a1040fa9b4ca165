use crate::error::{ClassFormatError, MalformedReason};

/// Bounds-checked big-endian reader over a class-file buffer.
///
/// Offsets reported in errors are always absolute positions in the original buffer, also for
/// readers carved out of an attribute with [`ByteReader::sub`].
#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    overrun: MalformedReason,
}

type Result<T> = std::result::Result<T, ClassFormatError>;

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            end: bytes.len(),
            overrun: MalformedReason::Truncated,
        }
    }

    pub(crate) fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ClassFormatError::malformed(self.pos, self.overrun));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.bytes[start..self.pos])
    }

    pub(crate) fn u1(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u2(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u4(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Splits off the next `n` bytes as their own reader and advances past them.
    pub(crate) fn sub(&mut self, n: usize) -> Result<ByteReader<'a>> {
        let start = self.pos;
        self.take(n)?;
        Ok(ByteReader {
            bytes: self.bytes,
            pos: start,
            end: start + n,
            overrun: MalformedReason::LengthMismatch,
        })
    }
}

/// Decodes the JVM's modified UTF-8 (two-byte NUL, surrogate pairs as separate 3-byte units).
///
/// `offset` is the absolute position of `raw`, used for error reporting.
pub(crate) fn decode_modified_utf8(raw: &[u8], offset: usize) -> Result<String> {
    // NUL is always written as the two-byte form
    if let Some(at) = raw.iter().position(|&b| b == 0) {
        return Err(ClassFormatError::malformed(offset + at, MalformedReason::InvalidUtf8));
    }
    if raw.is_ascii() {
        return std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ClassFormatError::malformed(offset, MalformedReason::InvalidUtf8));
    }

    let invalid = |at: usize| ClassFormatError::malformed(offset + at, MalformedReason::InvalidUtf8);
    let continuation = |at: usize| match raw.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        _ => Err(invalid(at)),
    };

    let mut units = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            units.push(u16::from(b & 0x1F) << 6 | continuation(i + 1)?);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            units.push(u16::from(b & 0x0F) << 12 | continuation(i + 1)? << 6 | continuation(i + 2)?);
            i += 3;
        } else {
            return Err(invalid(i));
        }
    }

    String::from_utf16(&units).map_err(|_| invalid(0))
}

/// Encodes `text` the way class-files store it.
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
