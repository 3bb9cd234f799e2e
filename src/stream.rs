//! Byte cursor over an encoded stream.
//!
//! Reads never run past the end of the input; an exhausted read yields
//! [`DecodeError::Truncated`] tagged with the owning parser's format name.

use crate::error::DecodeError;

pub(crate) struct ByteReader<'d> {
    data: &'d [u8],
    pos: usize,
    format: &'static str,
}

impl<'d> ByteReader<'d> {
    pub(crate) fn new(data: &'d [u8], format: &'static str) -> Self {
        ByteReader {
            data,
            pos: 0,
            format,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated(self.format)
    }

    pub(crate) fn set_position(&mut self, pos: usize) -> Result<(), DecodeError> {
        if pos > self.data.len() {
            return Err(self.truncated());
        }
        self.pos = pos;
        Ok(())
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        let new_pos = self.pos.checked_add(n).ok_or(self.truncated())?;
        self.set_position(new_pos)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.data.get(self.pos).ok_or(self.truncated())?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or(self.truncated())?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub(crate) fn read_slice(&mut self, n: usize) -> Result<&'d [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(self.truncated())?;
        let bytes = self.data.get(self.pos..end).ok_or(self.truncated())?;
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        let src = self.read_slice(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Borrow an absolute range of the input without moving the cursor.
    pub(crate) fn slice(&self, start: usize, end: usize) -> Result<&'d [u8], DecodeError> {
        self.data.get(start..end).ok_or(self.truncated())
    }
}
