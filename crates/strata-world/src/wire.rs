//! Big-endian field access with bounds checks.

use strata_common::{CodecError, CodecResult};

/// Returns `buf[offset..offset + width]`, or the matching codec error.
pub(crate) fn slice(buf: &[u8], offset: usize, width: usize) -> CodecResult<&[u8]> {
    if offset > buf.len() {
        return Err(CodecError::OffsetOutOfRange {
            offset,
            len: buf.len(),
        });
    }
    let end = offset.checked_add(width).ok_or(CodecError::OffsetOutOfRange {
        offset,
        len: buf.len(),
    })?;
    buf.get(offset..end).ok_or(CodecError::BufferTooShort {
        needed: end,
        actual: buf.len(),
    })
}

/// Mutable counterpart of [`slice`].
pub(crate) fn slice_mut(buf: &mut [u8], offset: usize, width: usize) -> CodecResult<&mut [u8]> {
    let len = buf.len();
    if offset > len {
        return Err(CodecError::OffsetOutOfRange { offset, len });
    }
    let end = offset
        .checked_add(width)
        .ok_or(CodecError::OffsetOutOfRange { offset, len })?;
    buf.get_mut(offset..end).ok_or(CodecError::BufferTooShort {
        needed: end,
        actual: len,
    })
}

/// Cursor over a slice whose length has already been checked.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    pub(crate) fn u16(&mut self) -> u16 {
        let v = u16::from_be_bytes([self.buf[self.at], self.buf[self.at + 1]]);
        self.at += 2;
        v
    }

    pub(crate) fn u32(&mut self) -> u32 {
        let b = &self.buf[self.at..self.at + 4];
        self.at += 4;
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    pub(crate) fn triple(&mut self) -> [u16; 3] {
        [self.u16(), self.u16(), self.u16()]
    }
}

/// Write cursor over a slice whose length has already been checked.
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, at: 0 }
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.buf[self.at..self.at + 2].copy_from_slice(&v.to_be_bytes());
        self.at += 2;
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf[self.at..self.at + 4].copy_from_slice(&v.to_be_bytes());
        self.at += 4;
    }

    pub(crate) fn triple(&mut self, v: [u16; 3]) {
        for c in v {
            self.u16(c);
        }
    }
}
