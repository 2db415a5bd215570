//! Minimal class file parsing.
//!
//! Only the parts needed for fingerprinting are decoded: the header, the
//! constant pool and the class's own identity. Fields, methods and attributes
//! are never read, and nothing is loaded or executed.

mod pool;
mod reader;

pub use pool::{ConstantPool, ConstantPoolEntry, ConstantTag};

use crate::error::{Error, Result};
use reader::ClassReader;
use std::collections::HashSet;
use tracing::trace;

/// Magic number at the start of every class file
pub const CLASS_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

/// Returns true if `bytes` starts with the class file magic number
pub fn is_class_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&CLASS_MAGIC)
}

/// The structural facts of one class file
#[derive(Debug, Clone)]
pub struct ClassFile<'a> {
    minor_version: u16,
    major_version: u16,
    constant_pool: ConstantPool<'a>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
}

impl<'a> ClassFile<'a> {
    /// Parses the header, constant pool and identity of a class.
    ///
    /// Fails with [`Error::MalformedClass`] (or [`Error::UnsupportedConstantTag`])
    /// on a bad magic number, truncation, or a reference that does not resolve.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = ClassReader::new(bytes);

        let magic = reader.u32("magic")?;
        if magic.to_be_bytes() != CLASS_MAGIC {
            return Err(Error::malformed_class(0, format!("bad magic {magic:#010x}")));
        }
        let minor_version = reader.u16("minor version")?;
        let major_version = reader.u16("major version")?;

        let constant_pool = ConstantPool::parse(&mut reader)?;

        let access_flags = reader.u16("access flags")?;
        let identity_offset = reader.offset();
        let this_class = reader.u16("this class")?;
        let super_class = reader.u16("super class")?;

        constant_pool.class_name(this_class).map_err(|e| {
            Error::malformed_class(identity_offset, format!("this class does not resolve: {e}"))
        })?;
        // only java/lang/Object and module-info have no superclass
        if super_class != 0 {
            constant_pool.class_name(super_class).map_err(|e| {
                Error::malformed_class(identity_offset + 2, format!("super class does not resolve: {e}"))
            })?;
        }

        trace!(
            "Parsed class file version {}.{} with {} constant pool slots",
            major_version,
            minor_version,
            constant_pool.len()
        );

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
        })
    }

    /// Minor version from the header
    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    /// Major version from the header (52 = Java 8)
    pub fn major_version(&self) -> u16 {
        self.major_version
    }

    /// Access flags of the class
    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    /// The decoded constant pool
    pub fn constant_pool(&self) -> &ConstantPool<'a> {
        &self.constant_pool
    }

    /// Internal name of the class, e.g. `org/apache/log4j/net/SocketNode`
    pub fn this_class_name(&self) -> &str {
        // resolved once in parse
        self.constant_pool.class_name(self.this_class).unwrap_or_default()
    }

    /// Internal name of the superclass, if there is one
    pub fn super_class_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            return None;
        }
        self.constant_pool.class_name(self.super_class).ok()
    }

    /// The set of all Utf8 constants
    pub fn utf8_constants(&self) -> HashSet<&str> {
        self.constant_pool.utf8_constants().collect()
    }
}
