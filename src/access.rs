use serde::{Deserialize, Serialize};

/// Access and property flags of a class, field or method, as stored in the class-file.
///
/// Some bits mean different things depending on where they appear (`0x0040` is `volatile`
/// on a field and `bridge` on a method); the constants below are named after their most
/// common meaning and the aliases after the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessFlags(u16);

impl AccessFlags {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
    pub const MODULE: u16 = 0x8000;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    pub const fn intersects(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    pub const fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub const fn is_module(self) -> bool {
        self.contains(Self::MODULE)
    }

    /// Neither public, protected nor private.
    pub const fn is_package_private(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PROTECTED | Self::PRIVATE)
    }
}

impl From<u16> for AccessFlags {
    fn from(bits: u16) -> Self {
        Self(bits)
    }
}

/// A single flag as written in rule configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessFlag {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Synchronized,
    Volatile,
    Bridge,
    Transient,
    Varargs,
    Native,
    Interface,
    Abstract,
    Strict,
    Synthetic,
    Annotation,
    Enum,
    Module,
}

impl AccessFlag {
    pub const fn mask(self) -> u16 {
        match self {
            Self::Public => AccessFlags::PUBLIC,
            Self::Private => AccessFlags::PRIVATE,
            Self::Protected => AccessFlags::PROTECTED,
            Self::Static => AccessFlags::STATIC,
            Self::Final => AccessFlags::FINAL,
            Self::Synchronized => AccessFlags::SYNCHRONIZED,
            Self::Volatile => AccessFlags::VOLATILE,
            Self::Bridge => AccessFlags::BRIDGE,
            Self::Transient => AccessFlags::TRANSIENT,
            Self::Varargs => AccessFlags::VARARGS,
            Self::Native => AccessFlags::NATIVE,
            Self::Interface => AccessFlags::INTERFACE,
            Self::Abstract => AccessFlags::ABSTRACT,
            Self::Strict => AccessFlags::STRICT,
            Self::Synthetic => AccessFlags::SYNTHETIC,
            Self::Annotation => AccessFlags::ANNOTATION,
            Self::Enum => AccessFlags::ENUM,
            Self::Module => AccessFlags::MODULE,
        }
    }
}

/// Requires every flag of `all_of` and none of `none_of`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessMatcher {
    pub all_of: Vec<AccessFlag>,
    pub none_of: Vec<AccessFlag>,
}

impl AccessMatcher {
    pub fn matches(&self, flags: AccessFlags) -> bool {
        let required = self.all_of.iter().fold(0, |acc, f| acc | f.mask());
        let forbidden = self.none_of.iter().fold(0, |acc, f| acc | f.mask());
        flags.contains(required) && !flags.intersects(forbidden)
    }
}
