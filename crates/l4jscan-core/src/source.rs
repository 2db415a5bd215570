//! Random-access byte sources.
//!
//! The core never owns the bytes it parses. Callers hand in anything that
//! implements [`ByteSource`] (an in-memory buffer, a memory map, an open file)
//! and the parsers address it through [`SourceView`] windows, so that trying
//! many candidate offsets never copies the underlying data.

use std::io::{self, Read, Seek, SeekFrom};

/// A finite, randomly addressable sequence of bytes
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads until `buf` is full or the source ends, returning the byte count
    fn read_full_at(&self, mut offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(offset, &mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Reads exactly `buf.len()` bytes, failing with `UnexpectedEof` on a short source
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let n = self.read_full_at(offset, buf)?;
        if n < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {} bytes at offset {offset}, got {n}", buf.len()),
            ));
        }
        Ok(())
    }
}

impl ByteSource for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }
}

#[cfg(unix)]
impl ByteSource for std::fs::File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ByteSource for std::fs::File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// A bounded window `[start, start + len)` over a borrowed [`ByteSource`]
///
/// Offsets passed to [`ByteSource::read_at`] on a view are relative to its
/// start. The view also implements [`Read`] and [`Seek`] with its own cursor,
/// which is how the `zip` crate consumes it.
pub struct SourceView<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    start: u64,
    len: u64,
    pos: u64,
}

impl<S: ByteSource + ?Sized> Clone for SourceView<'_, S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            start: self.start,
            len: self.len,
            pos: self.pos,
        }
    }
}

impl<S: ByteSource + ?Sized> std::fmt::Debug for SourceView<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceView")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}

impl<'a, S: ByteSource + ?Sized> SourceView<'a, S> {
    /// Creates a view of `len` bytes starting at `start`
    pub fn new(source: &'a S, start: u64, len: u64) -> Self {
        Self {
            source,
            start,
            len,
            pos: 0,
        }
    }

    /// Offset of this view in the underlying source
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the view in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the view covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Narrows the view to `[offset, offset + len)` in view coordinates.
    ///
    /// Returns `None` if the range does not fit inside this view.
    pub fn subview(&self, offset: u64, len: u64) -> Option<Self> {
        let end = offset.checked_add(len)?;
        (end <= self.len).then(|| Self::new(self.source, self.start + offset, len))
    }

    /// Reads `len` bytes at `offset` into a new buffer
    pub fn read_vec(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for SourceView<'_, S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let available = self.len - offset;
        let n = (buf.len() as u64).min(available) as usize;
        self.source.read_at(self.start + offset, &mut buf[..n])
    }
}

impl<S: ByteSource + ?Sized> Read for SourceView<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: ByteSource + ?Sized> Seek for SourceView<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
