//! # l4jscan-core
//!
//! A library for finding vulnerable log4j classes inside Java archives.
//!
//! This crate provides the core functionality for:
//! - Locating ZIP archives embedded anywhere in a byte source, including
//!   self-extracting executables and shell-script wrapped jars
//! - Parsing the constant pool of Java class files
//! - Classifying log4j classes against a catalog of known vulnerable builds
//!
//! ## Architecture
//!
//! - [`source`]: Positional byte sources and bounded views over them
//! - [`archive`]: Archive location and entry payloads, on top of the `zip` crate
//! - [`class`]: Class file and constant pool decoding
//! - [`fingerprint`]: The vulnerability catalog and classifier
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use l4jscan_core::{classify, is_class_file, locate};
//! use std::io::Read;
//!
//! let data = std::fs::read("app.jar")?;
//! let container = locate(data.as_slice(), data.len() as u64)?;
//! let mut payloads = container.open();
//!
//! for (index, entry) in container.entries().iter().enumerate() {
//!     let mut bytes = Vec::new();
//!     payloads.entry(index)?.read_to_end(&mut bytes)?;
//!     if is_class_file(&bytes) {
//!         let verdict = classify(&bytes, entry.name(), true)?;
//!         if verdict.is_vulnerable() {
//!             println!("{}: {}", entry.name(), verdict);
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`ByteSource`]: Scan anything that supports positional reads
//! - [`classify_with`]: Classify against a caller-supplied rule list
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod archive;
pub mod class;
pub mod error;
pub mod fingerprint;
pub mod source;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export primary types for convenience
pub use archive::{locate, ContainerEntry, ContainerView, Locator, LocatorConfig, OffsetBase, Payloads};
pub use class::{is_class_file, ClassFile, ConstantPool, ConstantPoolEntry, ConstantTag, CLASS_MAGIC};
pub use error::{Error, Result};
pub use fingerprint::{classify, classify_with, member_file_name, FingerprintRule, Verdict, CATALOG};
pub use source::{ByteSource, SourceView};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
