//! Locating ZIP containers embedded in larger byte sources.
//!
//! Self-extracting installers, executable wrappers and shell-script launchers
//! prepend arbitrary bytes to an ordinary archive. The [`Locator`] finds the
//! earliest offset at which a structurally valid container starts.
//!
//! ## Algorithm Overview
//!
//! 1. Read the source in bounded windows, each overlapping the next by three
//!    bytes so a `PK\x03\x04` signature straddling a boundary is still seen
//! 2. For every signature occurrence, in order, open a [`ZipArchive`] on the
//!    view that starts there and extends to the end of the source
//! 3. Return the first view whose end record, central directory and local
//!    headers are all consistent; otherwise advance one byte past the match
//!
//! Archive writers disagree on where offsets are counted from. Most count
//! from the archive start; `zip -A` and many self-extracting stubs count from
//! the start of the whole file. A candidate is accepted under either
//! [`OffsetBase`] only if the central directory places the archive exactly at
//! the candidate, so a spurious signature in front of a real archive never
//! validates.

use crate::error::{Error, Result};
use crate::source::{ByteSource, SourceView};
use std::fmt;
use std::io::Read;
use tracing::{debug, trace};
use zip::{CompressionMethod, ZipArchive};

/// Signature of a ZIP local file header
pub const LOCAL_HEADER_SIGNATURE: [u8; 4] = *b"PK\x03\x04";

/// One entry of a parsed container, as declared by its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub(crate) name: String,
    pub(crate) compression: CompressionMethod,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) header_offset: u64,
    pub(crate) data_offset: u64,
}

impl ContainerEntry {
    /// Entry name as stored in the archive, `/` separated
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the entry names a directory
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Compression method of the stored payload
    pub fn compression_method(&self) -> CompressionMethod {
        self.compression
    }

    /// CRC-32 of the uncompressed content
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Size of the stored payload
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Size of the content after decompression
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Offset of the local file header, relative to the container start
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Offset of the stored payload, relative to the container start
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }
}

/// Where the central directory of a container counts its offsets from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetBase {
    /// Offsets count from the container's first local header
    Container,
    /// Offsets count from the start of the byte source
    Source,
}

/// A structurally valid container found inside a [`ByteSource`]
pub struct ContainerView<'a, S: ByteSource + ?Sized> {
    view: SourceView<'a, S>,
    archive: ZipArchive<SourceView<'a, S>>,
    base: OffsetBase,
    entries: Vec<ContainerEntry>,
}

impl<'a, S: ByteSource + ?Sized> ContainerView<'a, S> {
    /// Parses a container occupying `[offset, offset + len)` of `source`.
    ///
    /// Offsets in the central directory are first read relative to `offset`.
    /// If they cannot be, they are read relative to the source start, and
    /// the container is accepted only if one of its entries starts at
    /// `offset`.
    pub fn parse(source: &'a S, offset: u64, len: u64) -> Result<Self> {
        let view = SourceView::new(source, offset, len);
        let relative = match ZipArchive::new(view.clone()) {
            Ok(archive) if archive.offset() == 0 => {
                return Self::from_archive(view, archive, OffsetBase::Container);
            }
            Ok(archive) => {
                return Err(Error::malformed_container(
                    offset,
                    format!("central directory places the archive {} bytes further on", archive.offset()),
                ));
            }
            Err(e) if offset == 0 => return Err(e.into()),
            Err(e) => e,
        };

        let whole_len = offset
            .checked_add(len)
            .ok_or_else(|| Error::malformed_container(offset, "container extends past u64 range"))?;
        let archive = ZipArchive::new(SourceView::new(source, 0, whole_len)).map_err(|absolute| {
            Error::malformed_container(
                offset,
                format!("relative to the candidate: {relative}; relative to the source: {absolute}"),
            )
        })?;
        if archive.offset() != 0 {
            return Err(Error::malformed_container(
                offset,
                format!("central directory places the archive at {}", archive.offset()),
            ));
        }
        let container = Self::from_archive(view, archive, OffsetBase::Source)?;
        if !container.entries.iter().any(|entry| entry.header_offset == 0) {
            return Err(Error::malformed_container(offset, "no entry starts at the candidate"));
        }
        Ok(container)
    }

    fn from_archive(
        view: SourceView<'a, S>,
        mut archive: ZipArchive<SourceView<'a, S>>,
        base: OffsetBase,
    ) -> Result<Self> {
        // source offset that the archive's header and data positions count from
        let origin = match base {
            OffsetBase::Container => view.start(),
            OffsetBase::Source => 0,
        };
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            // reading the raw entry checks its local header signature
            let file = archive.by_index_raw(index)?;
            let header_offset = (origin + file.header_start())
                .checked_sub(view.start())
                .ok_or_else(|| {
                    Error::malformed_container(view.start(), format!("{} starts before the container", file.name()))
                })?;
            let data_offset = origin + file.data_start() - view.start();
            let in_bounds = data_offset
                .checked_add(file.compressed_size())
                .map_or(false, |end| end <= view.len());
            if !in_bounds {
                return Err(Error::malformed_container(
                    view.start(),
                    format!("payload of {} runs past the end of the source", file.name()),
                ));
            }
            entries.push(ContainerEntry {
                name: file.name().to_string(),
                compression: file.compression(),
                crc32: file.crc32(),
                compressed_size: file.compressed_size(),
                uncompressed_size: file.size(),
                header_offset,
                data_offset,
            });
        }
        Ok(Self {
            view,
            archive,
            base,
            entries,
        })
    }

    /// Offset of the container start in the source
    pub fn offset(&self) -> u64 {
        self.view.start()
    }

    /// How the container's central directory counts offsets
    pub fn offset_base(&self) -> OffsetBase {
        self.base
    }

    /// Entries in central directory order
    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the container has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads the stored payload of an entry without decompressing it
    pub fn raw_payload(&self, entry: &ContainerEntry) -> Result<Vec<u8>> {
        let len = usize::try_from(entry.compressed_size).map_err(|_| {
            Error::malformed_container(self.offset(), format!("{} is too large to buffer", entry.name))
        })?;
        Ok(self.view.read_vec(entry.data_offset, len)?)
    }

    /// Opens a decompressing reader over the container's entries
    pub fn open(&self) -> Payloads<'a, S> {
        Payloads {
            archive: self.archive.clone(),
        }
    }
}

impl<S: ByteSource + ?Sized> fmt::Debug for ContainerView<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerView")
            .field("view", &self.view)
            .field("base", &self.base)
            .field("entries", &self.entries)
            .finish()
    }
}

/// Decompressed access to container entries, by central directory index
pub struct Payloads<'a, S: ByteSource + ?Sized> {
    archive: ZipArchive<SourceView<'a, S>>,
}

impl<'a, S: ByteSource + ?Sized> Payloads<'a, S> {
    /// Returns a reader over the decompressed content of entry `index`.
    ///
    /// The CRC-32 is verified once the reader reaches the end of the entry.
    pub fn entry(&mut self, index: usize) -> Result<impl Read + '_> {
        Ok(self.archive.by_index(index)?)
    }
}

/// Configuration for the locator
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Bytes examined per read (the read itself is three bytes longer)
    pub window_size: usize,
    /// Maximum number of candidate offsets to try (0 = unlimited)
    pub max_candidates: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            max_candidates: 0,
        }
    }
}

impl LocatorConfig {
    /// Creates a new locator config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan window size, at least the signature length
    pub fn window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(LOCAL_HEADER_SIGNATURE.len());
        self
    }

    /// Sets the maximum number of candidate offsets to try
    pub fn max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }
}

/// Finds the first valid ZIP container in a byte source
#[derive(Debug, Clone, Default)]
pub struct Locator {
    config: LocatorConfig,
}

impl Locator {
    /// Creates a new locator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new locator with custom configuration
    pub fn with_config(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Searches the first `size` bytes of `source` for a container.
    ///
    /// Returns [`Error::ArchiveNotFound`] if no signature occurrence starts a
    /// valid container, and [`Error::Io`] if the source cannot be read.
    pub fn locate<'a, S: ByteSource + ?Sized>(&self, source: &'a S, size: u64) -> Result<ContainerView<'a, S>> {
        let signature = LOCAL_HEADER_SIGNATURE;
        let window = self.config.window_size.max(signature.len());
        let mut buf = vec![0u8; window + signature.len() - 1];
        let mut candidates = 0usize;
        let mut base = 0u64;

        debug!("Searching {} bytes for a zip container", size);

        while base < size {
            let wanted = (buf.len() as u64).min(size - base) as usize;
            let filled = source.read_full_at(base, &mut buf[..wanted])?;
            let chunk = &buf[..filled];

            let mut cursor = 0;
            while let Some(relative) = find_subsequence(&chunk[cursor..], &signature) {
                let hit = cursor + relative;
                // matches starting in the overlap are handled by the next window
                if hit >= window {
                    break;
                }

                let offset = base + hit as u64;
                candidates += 1;
                match ContainerView::parse(source, offset, size - offset) {
                    Ok(container) => {
                        debug!(
                            "Found zip container at offset {} with {} entries after {} candidate(s)",
                            offset,
                            container.len(),
                            candidates
                        );
                        return Ok(container);
                    }
                    Err(e) => trace!("Rejected candidate at offset {}: {}", offset, e),
                }

                if self.config.max_candidates > 0 && candidates >= self.config.max_candidates {
                    debug!("Giving up after {} candidate offsets", candidates);
                    return Err(Error::archive_not_found(size));
                }
                cursor = hit + 1;
            }

            if filled < wanted {
                trace!("Source ended at {} before declared size {}", base + filled as u64, size);
                break;
            }
            base += window as u64;
        }

        debug!("No zip container in {} bytes ({} candidates)", size, candidates);
        Err(Error::archive_not_found(size))
    }
}

/// Finds the first valid ZIP container using the default configuration
pub fn locate<S: ByteSource + ?Sized>(source: &S, size: u64) -> Result<ContainerView<'_, S>> {
    Locator::new().locate(source, size)
}

/// Find a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self_extracting, zip_archive, zip_archive_stored};
    use pretty_assertions::assert_eq;

    fn names<S: ByteSource + ?Sized>(container: &ContainerView<'_, S>) -> Vec<String> {
        container.entries().iter().map(|e| e.name().to_string()).collect()
    }

    fn embed(prefix: &[u8], archive: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut data = prefix.to_vec();
        data.extend_from_slice(archive);
        data.extend_from_slice(suffix);
        data
    }

    #[test]
    fn test_find_subsequence() {
        let data = b"xxPK\x03\x04yy";
        assert_eq!(find_subsequence(data, &LOCAL_HEADER_SIGNATURE), Some(2));
        assert_eq!(find_subsequence(b"PK\x03", &LOCAL_HEADER_SIGNATURE), None);
    }

    #[test]
    fn test_locator_config_builder() {
        let config = LocatorConfig::new().window_size(1).max_candidates(10);
        assert_eq!(config.window_size, 4);
        assert_eq!(config.max_candidates, 10);
    }

    #[test]
    fn test_plain_archive_at_offset_zero() {
        let archive = zip_archive(&[("META-INF/", b""), ("a/B.class", b"\xca\xfe\xba\xbe")]);
        let container = locate(archive.as_slice(), archive.len() as u64).unwrap();

        assert_eq!(container.offset(), 0);
        assert_eq!(names(&container), vec!["META-INF/", "a/B.class"]);
        assert!(container.entries()[0].is_dir());
        assert!(!container.entries()[1].is_dir());
    }

    #[test]
    fn test_archive_after_filler_with_spurious_signatures() {
        let archive = zip_archive(&[("x.txt", b"payload")]);
        let mut filler = vec![0x90u8; 1000];
        filler.extend_from_slice(b"PK\x03\x04 not an archive PPPK\x03\x04PK\x03\x04");
        filler.extend_from_slice(&[0x41; 37]);
        let data = embed(&filler, &archive, b"");

        let container = locate(data.as_slice(), data.len() as u64).unwrap();
        assert_eq!(container.offset(), filler.len() as u64);
        assert_eq!(names(&container), vec!["x.txt"]);
    }

    #[test]
    fn test_signature_straddling_every_window_boundary() {
        let archive = zip_archive(&[("one", b"1"), ("two", b"22")]);
        for split in 1..4 {
            let filler = vec![b'P'; 64 - split];
            let data = embed(&filler, &archive, b"trailing");
            let config = LocatorConfig::new().window_size(64);
            let container = Locator::with_config(config)
                .locate(data.as_slice(), data.len() as u64)
                .unwrap();
            assert_eq!(container.offset(), filler.len() as u64);
        }
    }

    #[test]
    fn test_result_independent_of_window_size() {
        let archive = zip_archive(&[("inner/Thing.class", b"\xca\xfe\xba\xbe\x00")]);
        let mut filler = Vec::new();
        for i in 0..300u32 {
            filler.extend_from_slice(&i.to_le_bytes());
            filler.extend_from_slice(b"PK\x03\x04");
        }
        let data = embed(&filler, &archive, b"");

        for window in [4, 5, 7, 64, 333, 4096, 1 << 20] {
            let config = LocatorConfig::new().window_size(window);
            let container = Locator::with_config(config)
                .locate(data.as_slice(), data.len() as u64)
                .unwrap();
            assert_eq!(container.offset(), filler.len() as u64, "window {window}");
            assert_eq!(names(&container), vec!["inner/Thing.class"]);
        }
    }

    #[test]
    fn test_first_of_two_archives_wins() {
        let first = zip_archive(&[("first", b"1")]);
        let second = zip_archive(&[("second", b"2")]);
        let data = embed(b"MZ\x90\x00", &first, &second);

        // the first archive's directory offsets do not line up with the end record
        // of the second, so only the second container validates
        let container = locate(data.as_slice(), data.len() as u64).unwrap();
        assert_eq!(container.offset(), (4 + first.len()) as u64);
        assert_eq!(names(&container), vec!["second"]);
    }

    #[test]
    fn test_no_archive() {
        let data = b"PK\x03\x04PK\x03\x04 just signatures, PK\x05\x06 and no directory".to_vec();
        let err = locate(data.as_slice(), data.len() as u64).unwrap_err();
        assert!(matches!(err, Error::ArchiveNotFound { .. }));

        let empty: &[u8] = &[];
        assert!(matches!(locate(empty, 0).unwrap_err(), Error::ArchiveNotFound { size: 0 }));
    }

    #[test]
    fn test_truncated_archive_not_found() {
        let archive = zip_archive(&[("x.txt", b"payload")]);
        let data = &archive[..archive.len() - 10];
        assert!(locate(data, data.len() as u64).is_err());
    }

    #[test]
    fn test_max_candidates() {
        let archive = zip_archive(&[("x", b"y")]);
        let data = embed(b"PK\x03\x04PK\x03\x04", &archive, b"");
        let config = LocatorConfig::new().max_candidates(2);
        let err = Locator::with_config(config)
            .locate(data.as_slice(), data.len() as u64)
            .unwrap_err();
        assert!(matches!(err, Error::ArchiveNotFound { .. }));

        let config = LocatorConfig::new().max_candidates(3);
        assert!(Locator::with_config(config)
            .locate(data.as_slice(), data.len() as u64)
            .is_ok());
    }

    #[test]
    fn test_payloads() {
        let archive = zip_archive(&[("dir/", b""), ("a.txt", b"compressed text text text")]);
        let data = embed(b"#!/bin/sh\nexit 0\n", &archive, b"");
        let container = locate(data.as_slice(), data.len() as u64).unwrap();

        let mut payloads = container.open();
        let mut content = String::new();
        payloads.entry(1).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "compressed text text text");
    }

    #[test]
    fn test_raw_payload_of_stored_entry() {
        let archive = zip_archive_stored(&[("plain.bin", b"\x00\x01\x02")]);
        let data = embed(b"prefix", &archive, b"");
        let container = locate(data.as_slice(), data.len() as u64).unwrap();

        let entry = &container.entries()[0];
        assert_eq!(entry.compression_method(), CompressionMethod::Stored);
        assert_eq!(entry.uncompressed_size(), 3);
        assert_eq!(container.raw_payload(entry).unwrap(), b"\x00\x01\x02");
    }

    #[test]
    fn test_entry_offsets_are_container_relative() {
        let archive = zip_archive_stored(&[("a.txt", b"abc"), ("b.txt", b"de")]);
        let data = embed(b"#!/bin/sh\n", &archive, b"");
        let container = locate(data.as_slice(), data.len() as u64).unwrap();

        assert_eq!(container.offset_base(), OffsetBase::Container);
        let first = &container.entries()[0];
        assert_eq!(first.header_offset(), 0);
        assert!(first.data_offset() >= 30 + "a.txt".len() as u64);
        assert!(container.entries()[1].header_offset() > first.data_offset());
        assert_eq!(container.raw_payload(&container.entries()[1]).unwrap(), b"de");
    }

    #[test]
    fn test_offsets_counted_from_source_start() {
        let mut stub = b"MZ\x90\x00 self-extractor ".to_vec();
        stub.extend_from_slice(b"PK\x03\x04 inside the stub ");
        stub.extend_from_slice(&[0u8; 150]);
        let data = self_extracting(&stub, &[("setup/App.class", b"\xca\xfe\xba\xbe"), ("readme.txt", b"hello hello")]);

        let container = locate(data.as_slice(), data.len() as u64).unwrap();
        assert_eq!(container.offset(), stub.len() as u64);
        assert_eq!(container.offset_base(), OffsetBase::Source);
        assert_eq!(names(&container), vec!["setup/App.class", "readme.txt"]);
        assert_eq!(container.entries()[0].header_offset(), 0);

        let mut payloads = container.open();
        let mut content = String::new();
        payloads.entry(1).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello hello");
    }

    #[test]
    fn test_source_relative_offsets_need_an_entry_at_the_candidate() {
        let data = self_extracting(b"0123456789", &[("a", b"a")]);
        // a view starting one byte late cannot be placed by either offset base
        assert!(ContainerView::parse(data.as_slice(), 11, data.len() as u64 - 11).is_err());
        assert!(ContainerView::parse(data.as_slice(), 10, data.len() as u64 - 10).is_ok());
    }

    #[test]
    fn test_locate_is_repeatable() {
        let archive = zip_archive(&[("a", b"b")]);
        let data = embed(b"PKPK\x03", &archive, b"");
        let first = locate(data.as_slice(), data.len() as u64).unwrap();
        let second = locate(data.as_slice(), data.len() as u64).unwrap();
        assert_eq!(first.offset(), second.offset());
        assert_eq!(first.entries(), second.entries());
    }
}
