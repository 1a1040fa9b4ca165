//! Single-pass constant pool index.
//!
//! Only what header and outline parsing need is remembered: where each UTF-8 entry lives in
//! the buffer and which UTF-8 entry each class entry names. Every other entry is skipped by
//! its fixed width from [`TAGS`].

use crate::bytes::{ByteReader, decode_modified_utf8};
use crate::error::{ClassFormatError, MalformedReason};

type Result<T> = std::result::Result<T, ClassFormatError>;

const UTF8: u8 = 1;
const CLASS: u8 = 7;
const UNUSABLE: u8 = 0;

#[derive(Debug, Clone, Copy)]
struct TagInfo {
    /// Body width after the tag byte. Unused for UTF-8, which is length-prefixed.
    width: u8,
    slots: u8,
    since_major: u16,
}

const fn tag(width: u8, slots: u8, since_major: u16) -> Option<TagInfo> {
    Some(TagInfo {
        width,
        slots,
        since_major,
    })
}

/// Indexed by tag byte.
const TAGS: [Option<TagInfo>; 21] = [
    None,
    tag(0, 1, 45), // Utf8
    None,
    tag(4, 1, 45), // Integer
    tag(4, 1, 45), // Float
    tag(8, 2, 45), // Long
    tag(8, 2, 45), // Double
    tag(2, 1, 45), // Class
    tag(2, 1, 45), // String
    tag(4, 1, 45), // Fieldref
    tag(4, 1, 45), // Methodref
    tag(4, 1, 45), // InterfaceMethodref
    tag(4, 1, 45), // NameAndType
    None,
    None,
    tag(3, 1, 51), // MethodHandle
    tag(2, 1, 51), // MethodType
    tag(4, 1, 55), // Dynamic
    tag(4, 1, 51), // InvokeDynamic
    tag(2, 1, 53), // Module
    tag(2, 1, 53), // Package
];

#[derive(Debug, Clone, Copy)]
struct Slot {
    tag: u8,
    /// UTF-8: offset of the length prefix. Class: name index. Otherwise unused.
    value: usize,
}

#[derive(Debug)]
pub(crate) struct ConstantPool {
    slots: Vec<Slot>,
}

impl ConstantPool {
    pub(crate) fn read(input: &mut ByteReader<'_>, major: u16) -> Result<Self> {
        let count = usize::from(input.u2()?);
        let mut slots = vec![
            Slot {
                tag: UNUSABLE,
                value: 0
            };
            count
        ];

        let mut index = 1;
        while index < count {
            let at = input.position();
            let tag = input.u1()?;
            let info = TAGS
                .get(usize::from(tag))
                .copied()
                .flatten()
                .ok_or(ClassFormatError::malformed(at, MalformedReason::UnknownPoolTag(tag)))?;
            if major < info.since_major {
                return Err(ClassFormatError::malformed(
                    at,
                    MalformedReason::TagNotInVersion { tag, major },
                ));
            }

            let value = match tag {
                UTF8 => {
                    let start = input.position();
                    let len = input.u2()?;
                    input.skip(usize::from(len))?;
                    start
                }
                CLASS => usize::from(input.u2()?),
                _ => {
                    input.skip(usize::from(info.width))?;
                    0
                }
            };

            let next = index + usize::from(info.slots);
            if next > count {
                return Err(ClassFormatError::malformed(
                    at,
                    MalformedReason::PoolIndexOutOfRange((next - 1) as u16),
                ));
            }
            slots[index] = Slot { tag, value };
            index = next;
        }

        Ok(Self { slots })
    }

    fn slot(&self, index: u16, at: usize) -> Result<Slot> {
        match self.slots.get(usize::from(index)) {
            Some(slot) if index != 0 => Ok(*slot),
            _ => Err(ClassFormatError::malformed(
                at,
                MalformedReason::PoolIndexOutOfRange(index),
            )),
        }
    }

    fn expect(&self, index: u16, tag: u8, at: usize) -> Result<Slot> {
        let slot = self.slot(index, at)?;
        if slot.tag != tag {
            return Err(ClassFormatError::malformed(
                at,
                MalformedReason::UnexpectedPoolTag {
                    index,
                    tag: slot.tag,
                },
            ));
        }
        Ok(slot)
    }

    /// Raw modified UTF-8 bytes of entry `index` and their absolute offset.
    ///
    /// `at` is the offset of the field holding the reference.
    fn utf8_span<'a>(&self, bytes: &'a [u8], index: u16, at: usize) -> Result<(usize, &'a [u8])> {
        let start = self.expect(index, UTF8, at)?.value;
        let truncated = || ClassFormatError::malformed(start, MalformedReason::Truncated);
        let len = bytes
            .get(start..start + 2)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or_else(truncated)?;
        let raw = bytes.get(start + 2..start + 2 + len).ok_or_else(truncated)?;
        Ok((start + 2, raw))
    }

    pub(crate) fn utf8_bytes<'a>(&self, bytes: &'a [u8], index: u16, at: usize) -> Result<&'a [u8]> {
        self.utf8_span(bytes, index, at).map(|(_, raw)| raw)
    }

    pub(crate) fn utf8(&self, bytes: &[u8], index: u16, at: usize) -> Result<String> {
        let (offset, raw) = self.utf8_span(bytes, index, at)?;
        decode_modified_utf8(raw, offset)
    }

    /// Name of the class entry at `index`, in internal (slash) form.
    pub(crate) fn class_name(&self, bytes: &[u8], index: u16, at: usize) -> Result<String> {
        let name_index = self.expect(index, CLASS, at)?.value;
        self.utf8(bytes, name_index as u16, at)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_bytes(count: u16, entries: &[&[u8]]) -> Vec<u8> {
        let mut out = count.to_be_bytes().to_vec();
        for entry in entries {
            out.extend_from_slice(entry);
        }
        out
    }

    #[test]
    fn wide_entries_take_two_slots() {
        let bytes = pool_bytes(
            5,
            &[
                &[5, 0, 0, 0, 0, 0, 0, 0, 42],
                &[1, 0, 3, b'F', b'o', b'o'],
                &[7, 0, 3],
            ],
        );
        let mut input = ByteReader::new(&bytes);
        let pool = ConstantPool::read(&mut input, 52).unwrap();
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.class_name(&bytes, 4, 0).unwrap(), "Foo");
        let err = pool.utf8(&bytes, 2, 0).unwrap_err();
        assert_eq!(
            err.reason(),
            Some(MalformedReason::UnexpectedPoolTag { index: 2, tag: 0 })
        );
    }

    #[test]
    fn wide_entry_in_last_slot_is_rejected() {
        let bytes = pool_bytes(2, &[&[6, 0, 0, 0, 0, 0, 0, 0, 0]]);
        let mut input = ByteReader::new(&bytes);
        let err = ConstantPool::read(&mut input, 52).unwrap_err();
        assert_eq!(err.reason(), Some(MalformedReason::PoolIndexOutOfRange(2)));
    }

    #[test]
    fn unknown_and_premature_tags_are_rejected() {
        let bytes = pool_bytes(2, &[&[2, 0, 0]]);
        let err = ConstantPool::read(&mut ByteReader::new(&bytes), 52).unwrap_err();
        assert_eq!(err.reason(), Some(MalformedReason::UnknownPoolTag(2)));
        assert_eq!(err.offset(), Some(2));

        let bytes = pool_bytes(2, &[&[17, 0, 0, 0, 0]]);
        let err = ConstantPool::read(&mut ByteReader::new(&bytes), 52).unwrap_err();
        assert_eq!(
            err.reason(),
            Some(MalformedReason::TagNotInVersion { tag: 17, major: 52 })
        );
        assert!(ConstantPool::read(&mut ByteReader::new(&bytes), 55).is_ok());
    }

    #[test]
    fn index_zero_and_out_of_range_fail() {
        let bytes = pool_bytes(2, &[&[1, 0, 1, b'A']]);
        let pool = ConstantPool::read(&mut ByteReader::new(&bytes), 52).unwrap();
        assert_eq!(pool.utf8(&bytes, 1, 0).unwrap(), "A");
        for index in [0, 2, 900] {
            let err = pool.utf8(&bytes, index, 7).unwrap_err();
            assert_eq!(err.offset(), Some(7));
            assert_eq!(err.reason(), Some(MalformedReason::PoolIndexOutOfRange(index)));
        }
    }
}
