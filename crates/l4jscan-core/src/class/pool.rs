//! The class file constant pool.
//!
//! Every legal tag has a known payload size, so the pool can be walked without
//! understanding what each constant means. A tag outside that set stops the
//! parse: guessing its size would misalign everything after it.

use super::reader::ClassReader;
use crate::error::{Error, Result};
use std::borrow::Cow;
use tracing::trace;

/// Constant pool tags of the class file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConstantTag {
    /// Modified UTF-8 text
    Utf8 = 1,
    /// 32-bit integer
    Integer = 3,
    /// 32-bit float
    Float = 4,
    /// 64-bit integer, two slots
    Long = 5,
    /// 64-bit float, two slots
    Double = 6,
    /// Class or interface reference
    Class = 7,
    /// String literal
    String = 8,
    /// Field reference
    FieldRef = 9,
    /// Class method reference
    MethodRef = 10,
    /// Interface method reference
    InterfaceMethodRef = 11,
    /// Name and descriptor pair
    NameAndType = 12,
    /// Method handle
    MethodHandle = 15,
    /// Method type descriptor
    MethodType = 16,
    /// Dynamically computed constant
    Dynamic = 17,
    /// Invokedynamic call site
    InvokeDynamic = 18,
    /// Module name
    Module = 19,
    /// Package name
    Package = 20,
}

impl ConstantTag {
    /// Maps a tag byte to its tag, or `None` if the byte is not a legal tag
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Utf8,
            3 => Self::Integer,
            4 => Self::Float,
            5 => Self::Long,
            6 => Self::Double,
            7 => Self::Class,
            8 => Self::String,
            9 => Self::FieldRef,
            10 => Self::MethodRef,
            11 => Self::InterfaceMethodRef,
            12 => Self::NameAndType,
            15 => Self::MethodHandle,
            16 => Self::MethodType,
            17 => Self::Dynamic,
            18 => Self::InvokeDynamic,
            19 => Self::Module,
            20 => Self::Package,
            _ => return None,
        })
    }

    /// Size of the fixed part of the payload following the tag byte.
    ///
    /// For `Utf8` this is the length prefix; the text follows it.
    pub fn fixed_len(self) -> usize {
        match self {
            Self::Utf8 | Self::Class | Self::String => 2,
            Self::MethodType | Self::Module | Self::Package => 2,
            Self::MethodHandle => 3,
            Self::Integer | Self::Float => 4,
            Self::FieldRef | Self::MethodRef | Self::InterfaceMethodRef => 4,
            Self::NameAndType | Self::Dynamic | Self::InvokeDynamic => 4,
            Self::Long | Self::Double => 8,
        }
    }

    /// Number of pool indices the constant occupies
    pub fn slots(self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }
}

/// A decoded constant
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolEntry<'a> {
    /// Text, borrowed when the modified UTF-8 is also plain UTF-8
    Utf8(Cow<'a, str>),
    /// 32-bit integer
    Integer(i32),
    /// 32-bit float
    Float(f32),
    /// 64-bit integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Class reference
    Class {
        /// Index of the Utf8 internal name
        name_index: u16,
    },
    /// String literal
    String {
        /// Index of the Utf8 value
        string_index: u16,
    },
    /// Field reference
    FieldRef {
        /// Index of the owning Class
        class_index: u16,
        /// Index of the NameAndType
        name_and_type_index: u16,
    },
    /// Class method reference
    MethodRef {
        /// Index of the owning Class
        class_index: u16,
        /// Index of the NameAndType
        name_and_type_index: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Index of the owning Class
        class_index: u16,
        /// Index of the NameAndType
        name_and_type_index: u16,
    },
    /// Member name and descriptor
    NameAndType {
        /// Index of the Utf8 name
        name_index: u16,
        /// Index of the Utf8 descriptor
        descriptor_index: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind, 1 to 9
        reference_kind: u8,
        /// Index of the referenced member
        reference_index: u16,
    },
    /// Constants irrelevant to fingerprinting, kept as their raw payload
    Other {
        /// Which constant this is
        tag: ConstantTag,
        /// Fixed-size payload following the tag
        payload: &'a [u8],
    },
}

impl ConstantPoolEntry<'_> {
    /// The tag this entry was decoded from
    pub fn tag(&self) -> ConstantTag {
        match self {
            Self::Utf8(_) => ConstantTag::Utf8,
            Self::Integer(_) => ConstantTag::Integer,
            Self::Float(_) => ConstantTag::Float,
            Self::Long(_) => ConstantTag::Long,
            Self::Double(_) => ConstantTag::Double,
            Self::Class { .. } => ConstantTag::Class,
            Self::String { .. } => ConstantTag::String,
            Self::FieldRef { .. } => ConstantTag::FieldRef,
            Self::MethodRef { .. } => ConstantTag::MethodRef,
            Self::InterfaceMethodRef { .. } => ConstantTag::InterfaceMethodRef,
            Self::NameAndType { .. } => ConstantTag::NameAndType,
            Self::MethodHandle { .. } => ConstantTag::MethodHandle,
            Self::Other { tag, .. } => *tag,
        }
    }
}

/// Constant pool of one class, indexed from 1
///
/// Index 0 and the index following a `Long` or `Double` hold no constant.
#[derive(Debug, Clone)]
pub struct ConstantPool<'a> {
    slots: Vec<Option<ConstantPoolEntry<'a>>>,
    end_offset: usize,
}

impl<'a> ConstantPool<'a> {
    /// Decodes `count - 1` slots, then checks that every reference resolves
    pub(crate) fn parse(reader: &mut ClassReader<'a>) -> Result<Self> {
        let count = reader.u16("constant pool count")? as usize;
        if count == 0 {
            return Err(Error::malformed_class(reader.offset() - 2, "constant pool count of zero"));
        }

        let mut slots = Vec::with_capacity(count);
        slots.push(None);

        while slots.len() < count {
            let offset = reader.offset();
            let byte = reader.u8("constant tag")?;
            let tag = ConstantTag::from_byte(byte).ok_or_else(|| Error::unsupported_tag(byte, offset))?;
            slots.push(Some(Self::decode(reader, tag)?));

            if tag.slots() == 2 {
                if slots.len() >= count {
                    return Err(Error::malformed_class(
                        offset,
                        format!("{tag:?} constant at index {} overruns pool count {count}", slots.len() - 1),
                    ));
                }
                slots.push(None);
            }
        }

        let pool = Self {
            slots,
            end_offset: reader.offset(),
        };
        pool.validate_references()?;
        trace!("Decoded {} constant pool slots", count);
        Ok(pool)
    }

    fn decode(reader: &mut ClassReader<'a>, tag: ConstantTag) -> Result<ConstantPoolEntry<'a>> {
        let entry = match tag {
            ConstantTag::Utf8 => {
                let len = reader.u16("utf8 length")? as usize;
                let offset = reader.offset();
                let raw = reader.bytes(len, "utf8 constant")?;
                let text = cesu8::from_java_cesu8(raw)
                    .map_err(|_| Error::malformed_class(offset, "invalid modified UTF-8 in constant"))?;
                ConstantPoolEntry::Utf8(text)
            }
            ConstantTag::Integer => ConstantPoolEntry::Integer(reader.i32("integer constant")?),
            ConstantTag::Float => ConstantPoolEntry::Float(reader.f32("float constant")?),
            ConstantTag::Long => ConstantPoolEntry::Long(reader.i64("long constant")?),
            ConstantTag::Double => ConstantPoolEntry::Double(reader.f64("double constant")?),
            ConstantTag::Class => ConstantPoolEntry::Class {
                name_index: reader.u16("class name index")?,
            },
            ConstantTag::String => ConstantPoolEntry::String {
                string_index: reader.u16("string index")?,
            },
            ConstantTag::FieldRef => ConstantPoolEntry::FieldRef {
                class_index: reader.u16("field class index")?,
                name_and_type_index: reader.u16("field name and type index")?,
            },
            ConstantTag::MethodRef => ConstantPoolEntry::MethodRef {
                class_index: reader.u16("method class index")?,
                name_and_type_index: reader.u16("method name and type index")?,
            },
            ConstantTag::InterfaceMethodRef => ConstantPoolEntry::InterfaceMethodRef {
                class_index: reader.u16("interface method class index")?,
                name_and_type_index: reader.u16("interface method name and type index")?,
            },
            ConstantTag::NameAndType => ConstantPoolEntry::NameAndType {
                name_index: reader.u16("name index")?,
                descriptor_index: reader.u16("descriptor index")?,
            },
            ConstantTag::MethodHandle => ConstantPoolEntry::MethodHandle {
                reference_kind: reader.u8("reference kind")?,
                reference_index: reader.u16("reference index")?,
            },
            ConstantTag::MethodType
            | ConstantTag::Dynamic
            | ConstantTag::InvokeDynamic
            | ConstantTag::Module
            | ConstantTag::Package => ConstantPoolEntry::Other {
                tag,
                payload: reader.bytes(tag.fixed_len(), "constant payload")?,
            },
        };
        Ok(entry)
    }

    fn expect_tag(&self, from: usize, index: u16, tag: ConstantTag) -> Result<()> {
        let entry = self.get(index).map_err(|e| {
            Error::malformed_class(self.end_offset, format!("constant {from} refers to a missing slot: {e}"))
        })?;
        if entry.tag() != tag {
            return Err(Error::malformed_class(
                self.end_offset,
                format!("constant {from} expects {tag:?} at index {index}, found {:?}", entry.tag()),
            ));
        }
        Ok(())
    }

    fn validate_references(&self) -> Result<()> {
        for (index, entry) in self.slots.iter().enumerate() {
            let Some(entry) = entry else { continue };
            match *entry {
                ConstantPoolEntry::Class { name_index } => self.expect_tag(index, name_index, ConstantTag::Utf8)?,
                ConstantPoolEntry::String { string_index } => {
                    self.expect_tag(index, string_index, ConstantTag::Utf8)?
                }
                ConstantPoolEntry::FieldRef {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolEntry::MethodRef {
                    class_index,
                    name_and_type_index,
                }
                | ConstantPoolEntry::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    self.expect_tag(index, class_index, ConstantTag::Class)?;
                    self.expect_tag(index, name_and_type_index, ConstantTag::NameAndType)?;
                }
                ConstantPoolEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    self.expect_tag(index, name_index, ConstantTag::Utf8)?;
                    self.expect_tag(index, descriptor_index, ConstantTag::Utf8)?;
                }
                ConstantPoolEntry::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    if !(1..=9).contains(&reference_kind) {
                        return Err(Error::malformed_class(
                            self.end_offset,
                            format!("constant {index} has reference kind {reference_kind}"),
                        ));
                    }
                    let target = self.get(reference_index)?.tag();
                    if !matches!(
                        target,
                        ConstantTag::FieldRef | ConstantTag::MethodRef | ConstantTag::InterfaceMethodRef
                    ) {
                        return Err(Error::malformed_class(
                            self.end_offset,
                            format!("method handle {index} refers to {target:?}"),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The constant pool count: one more than the highest index
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the pool holds no constants
    pub fn is_empty(&self) -> bool {
        self.slots.len() <= 1
    }

    /// Looks up a constant by index.
    ///
    /// Index 0, the second slot of a `Long`/`Double` and indices past the end
    /// are errors, never panics.
    pub fn get(&self, index: u16) -> Result<&ConstantPoolEntry<'a>> {
        match self.slots.get(index as usize) {
            Some(Some(entry)) => Ok(entry),
            Some(None) => Err(Error::malformed_class(
                self.end_offset,
                format!("constant pool index {index} is unusable"),
            )),
            None => Err(Error::malformed_class(
                self.end_offset,
                format!("constant pool index {index} out of range (count {})", self.slots.len()),
            )),
        }
    }

    /// Resolves a Utf8 constant
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(text) => Ok(text.as_ref()),
            other => Err(Error::malformed_class(
                self.end_offset,
                format!("constant {index} is {:?}, not Utf8", other.tag()),
            )),
        }
    }

    /// Resolves a Class constant to its internal name
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8(*name_index),
            other => Err(Error::malformed_class(
                self.end_offset,
                format!("constant {index} is {:?}, not Class", other.tag()),
            )),
        }
    }

    /// Iterates over usable slots with their indices
    pub fn iter(&self) -> impl Iterator<Item = (u16, &ConstantPoolEntry<'a>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (index as u16, entry)))
    }

    /// Iterates over the text of every Utf8 constant
    pub fn utf8_constants(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|slot| match slot {
            Some(ConstantPoolEntry::Utf8(text)) => Some(text.as_ref()),
            _ => None,
        })
    }
}
