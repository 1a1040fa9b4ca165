//! Error types for class-file parsing and rule compilation.

use thiserror::Error;

/// What exactly was wrong with a malformed class-file.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    #[error("input ends before the structure is complete")]
    Truncated,
    #[error("bad magic number")]
    BadMagic,
    #[error("invalid major version {0}")]
    InvalidVersion(u16),
    #[error("unknown constant pool tag {0}")]
    UnknownPoolTag(u8),
    #[error("constant pool tag {tag} is not allowed in version {major}")]
    TagNotInVersion { tag: u8, major: u16 },
    #[error("constant pool index {0} out of range")]
    PoolIndexOutOfRange(u16),
    #[error("constant pool entry {index} has unexpected tag {tag}")]
    UnexpectedPoolTag { index: u16, tag: u8 },
    #[error("missing super class")]
    MissingSuperClass,
    #[error("invalid modified UTF-8")]
    InvalidUtf8,
    #[error("contents overrun their declared length")]
    LengthMismatch,
    #[error("annotation values nested too deeply")]
    AnnotationTooDeep,
    #[error("unknown annotation element tag {0:#04x}")]
    UnknownElementTag(u8),
}

/// Failure of a single header or outline parse.
///
/// Never fatal beyond the class being parsed: callers treat the class as not matched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("malformed class-file at offset {offset}: {reason}")]
    Malformed {
        offset: usize,
        reason: MalformedReason,
    },
    #[error("unsupported class-file version {major}.{minor} (newest understood is {max_major})")]
    UnsupportedVersion {
        major: u16,
        minor: u16,
        max_major: u16,
    },
}

impl ClassFormatError {
    pub(crate) fn malformed(offset: usize, reason: MalformedReason) -> Self {
        Self::Malformed { offset, reason }
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Malformed { offset, .. } => Some(*offset),
            Self::UnsupportedVersion { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<MalformedReason> {
        match self {
            Self::Malformed { reason, .. } => Some(*reason),
            Self::UnsupportedVersion { .. } => None,
        }
    }

    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, Self::UnsupportedVersion { .. })
    }
}

/// Errors raised while compiling class-name patterns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty class-name pattern")]
    Empty,
    #[error("wildcard may only lead or trail a pattern: {0}")]
    MisplacedWildcard(String),
}
