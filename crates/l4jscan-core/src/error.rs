//! Error types for the l4jscan-core library.
//!
//! Every error produced by the core is local to one parse: the caller decides
//! whether to log it and move on. Nothing here is fatal to a larger scan.

use thiserror::Error;

/// Result type alias for l4jscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for archive location and class classification
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No structurally valid ZIP container starts anywhere in the source
    #[error("no zip container found in {size} bytes")]
    ArchiveNotFound {
        /// Number of bytes that were searched
        size: u64,
    },

    /// A local file header signature matched but the container around it did not parse
    #[error("malformed zip container at offset {offset}: {details}")]
    MalformedContainer {
        /// Offset of the candidate container start in the source
        offset: u64,
        /// Detailed description of the issue
        details: String,
    },

    /// Class file header or constant pool is inconsistent or truncated
    #[error("malformed class file at offset {offset}: {details}")]
    MalformedClass {
        /// Byte offset in the class file where the problem was detected
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Constant pool tag with no known size
    #[error("unsupported constant pool tag {tag} at offset {offset}")]
    UnsupportedConstantTag {
        /// The tag byte
        tag: u8,
        /// Byte offset of the tag in the class file
        offset: usize,
    },

    /// Reading from the byte source failed
    #[error("failed to read byte source: {0}")]
    Io(#[from] std::io::Error),

    /// Decompressing a container entry failed
    #[error("failed to read container entry: {0}")]
    Entry(#[from] zip::result::ZipError),
}

impl Error {
    /// Creates a new archive-not-found error
    pub fn archive_not_found(size: u64) -> Self {
        Self::ArchiveNotFound { size }
    }

    /// Creates a new malformed container error
    pub fn malformed_container(offset: u64, details: impl Into<String>) -> Self {
        Self::MalformedContainer {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new malformed class error
    pub fn malformed_class(offset: usize, details: impl Into<String>) -> Self {
        Self::MalformedClass {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new unsupported tag error
    pub fn unsupported_tag(tag: u8, offset: usize) -> Self {
        Self::UnsupportedConstantTag { tag, offset }
    }

    /// Returns true if the class bytes could not be classified
    ///
    /// An unsupported tag is a structural failure like any other: its size is
    /// unknown, so nothing after it can be trusted.
    pub fn is_malformed_class(&self) -> bool {
        matches!(
            self,
            Self::MalformedClass { .. } | Self::UnsupportedConstantTag { .. }
        )
    }

    /// Returns true if this error only concerns the input at hand and a scan
    /// should continue with the next file or entry
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
