//! Bounds-checked big-endian cursor over class file bytes.

use crate::error::{Error, Result};
use bytes::Buf;

/// Every read checks the remaining length first, so a truncated class file
/// surfaces as [`Error::MalformedClass`] at the offset where it ran out.
#[derive(Debug, Clone)]
pub(crate) struct ClassReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> ClassReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            buf: data,
            len: data.len(),
        }
    }

    /// Offset of the next unread byte
    pub(crate) fn offset(&self) -> usize {
        self.len - self.buf.remaining()
    }

    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(Error::malformed_class(
                self.offset(),
                format!(
                    "truncated {what}: need {needed} bytes, {} left",
                    self.buf.remaining()
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, what: &str) -> Result<u8> {
        self.ensure(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self, what: &str) -> Result<u16> {
        self.ensure(2, what)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32> {
        self.ensure(4, what)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn i32(&mut self, what: &str) -> Result<i32> {
        self.ensure(4, what)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn i64(&mut self, what: &str) -> Result<i64> {
        self.ensure(8, what)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn f32(&mut self, what: &str) -> Result<f32> {
        self.ensure(4, what)?;
        Ok(self.buf.get_f32())
    }

    pub(crate) fn f64(&mut self, what: &str) -> Result<f64> {
        self.ensure(8, what)?;
        Ok(self.buf.get_f64())
    }

    /// Borrows the next `n` bytes
    pub(crate) fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.ensure(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}
