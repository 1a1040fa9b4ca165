//! Minimal class-file parse: identity and direct supertypes only.
//!
//! The reader walks the class-file linearly up to the end of the interface table and stops;
//! fields, methods and attributes are never visited. [`crate::outline`] continues the same
//! walk when more detail is needed.

use serde::Serialize;

use crate::access::AccessFlags;
use crate::bytes::ByteReader;
use crate::error::{ClassFormatError, MalformedReason};
use crate::pool::ConstantPool;

pub const MAGIC: u32 = 0xCAFE_BABE;
pub const MIN_MAJOR_VERSION: u16 = 45;
/// Java 25.
pub const MAX_MAJOR_VERSION: u16 = 69;
pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClassHeader {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: AccessFlags,
    /// Internal (slash-separated) name.
    pub class_name: String,
    /// `None` only for `java/lang/Object` and module descriptors.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
}

impl ClassHeader {
    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }
}

pub fn parse_header(bytes: &[u8]) -> Result<ClassHeader, ClassFormatError> {
    ClassReader::open(bytes)?.read_header()
}

/// Cursor shared by the header and outline parsers.
pub(crate) struct ClassReader<'a> {
    pub(crate) input: ByteReader<'a>,
    pub(crate) pool: ConstantPool,
    minor_version: u16,
    major_version: u16,
}

impl<'a> ClassReader<'a> {
    /// Checks magic and version and indexes the constant pool.
    pub(crate) fn open(bytes: &'a [u8]) -> Result<Self, ClassFormatError> {
        let mut input = ByteReader::new(bytes);
        if input.u4()? != MAGIC {
            return Err(ClassFormatError::malformed(0, MalformedReason::BadMagic));
        }
        let minor_version = input.u2()?;
        let major_version = input.u2()?;
        if major_version > MAX_MAJOR_VERSION {
            return Err(ClassFormatError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
                max_major: MAX_MAJOR_VERSION,
            });
        }
        if major_version < MIN_MAJOR_VERSION {
            return Err(ClassFormatError::malformed(
                6,
                MalformedReason::InvalidVersion(major_version),
            ));
        }

        let pool = ConstantPool::read(&mut input, major_version)?;
        Ok(Self {
            input,
            pool,
            minor_version,
            major_version,
        })
    }

    pub(crate) fn read_header(&mut self) -> Result<ClassHeader, ClassFormatError> {
        let bytes = self.input.bytes();
        let access = AccessFlags::from_bits(self.input.u2()?);

        let at = self.input.position();
        let this_index = self.input.u2()?;
        let class_name = self.pool.class_name(bytes, this_index, at)?;

        let at = self.input.position();
        let super_index = self.input.u2()?;
        let super_name = if super_index == 0 {
            if class_name != JAVA_LANG_OBJECT && !access.is_module() {
                return Err(ClassFormatError::malformed(
                    at,
                    MalformedReason::MissingSuperClass,
                ));
            }
            None
        } else {
            Some(self.pool.class_name(bytes, super_index, at)?)
        };

        let count = self.input.u2()?;
        let mut interfaces = Vec::with_capacity(usize::from(count).min(self.input.remaining() / 2));
        for _ in 0..count {
            let at = self.input.position();
            let index = self.input.u2()?;
            interfaces.push(self.pool.class_name(bytes, index, at)?);
        }

        Ok(ClassHeader {
            minor_version: self.minor_version,
            major_version: self.major_version,
            access,
            class_name,
            super_name,
            interfaces,
        })
    }
}
