use std::fmt;

use crate::utils::error::{ModbusError, Result};

/// Fixed-capacity frame buffer with independent write and read cursors.
///
/// Invariant: `read_pos <= write_pos <= capacity`. Every cursor operation is
/// bounds-checked; running off either end is an error, never a silent clamp.
pub struct FrameBuffer {
    data: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
    host_big_endian: bool,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            write_pos: 0,
            read_pos: 0,
            host_big_endian: cfg!(target_endian = "big"),
        }
    }

    /// Resets both cursors; contents are left as they are.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Bytes written but not yet consumed by a reader.
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Host byte order, resolved once at creation. Wire fields are always
    /// big-endian regardless.
    pub fn is_host_big_endian(&self) -> bool {
        self.host_big_endian
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.write_pos]
    }

    fn reserve(&self, needed: usize) -> Result<()> {
        let available = self.capacity() - self.write_pos;
        if needed > available {
            return Err(ModbusError::BufferOverflow { needed, available });
        }
        Ok(())
    }

    fn take(&mut self, needed: usize) -> Result<&[u8]> {
        let available = self.remaining();
        if needed > available {
            return Err(ModbusError::Truncated { needed, available });
        }
        let start = self.read_pos;
        self.read_pos += needed;
        Ok(&self.data[start..start + needed])
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_slice(&[value])
    }

    /// Appends a word in network (big-endian) order.
    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
        Ok(())
    }

    /// Overwrites an already written word without moving the write cursor.
    pub fn patch_u16(&mut self, at: usize, value: u16) -> Result<()> {
        if at + 2 > self.write_pos {
            return Err(ModbusError::BufferOverflow {
                needed: at + 2,
                available: self.write_pos,
            });
        }
        self.data[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a word in network (big-endian) order.
    pub fn get_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_slice(&mut self, len: usize) -> Result<&[u8]> {
        self.take(len)
    }

    /// Moves the read cursor to an absolute position within the written bytes.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.write_pos {
            return Err(ModbusError::Truncated {
                needed: pos,
                available: self.write_pos,
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    /// Drops trailing bytes from the written region (e.g. a verified CRC).
    pub fn truncate(&mut self, len: usize) {
        if len < self.write_pos {
            self.write_pos = len;
            self.read_pos = self.read_pos.min(len);
        }
    }

    /// Free space past the write cursor, for reading device bytes in place.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let pos = self.write_pos;
        &mut self.data[pos..]
    }

    /// Commits `n` bytes previously placed into `spare_mut()`.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.reserve(n)?;
        self.write_pos += n;
        Ok(())
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.capacity())
            .field("write_pos", &self.write_pos)
            .field("read_pos", &self.read_pos)
            .field("host_big_endian", &self.host_big_endian)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_big_endian_on_the_wire() {
        let mut buf = FrameBuffer::new(8);
        buf.put_u16(0x0010).unwrap();
        buf.put_u8(0x04).unwrap();
        assert_eq!(buf.as_slice(), &[0x00, 0x10, 0x04]);
        assert_eq!(buf.get_u16().unwrap(), 0x0010);
        assert_eq!(buf.get_u8().unwrap(), 0x04);
        assert_eq!(buf.is_host_big_endian(), cfg!(target_endian = "big"));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut buf = FrameBuffer::new(3);
        buf.put_u16(0xABCD).unwrap();
        let err = buf.put_u16(0x1234).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::BufferOverflow {
                needed: 2,
                available: 1
            }
        ));
        // a failed write leaves the cursor where it was
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_reads_stop_at_write_cursor() {
        let mut buf = FrameBuffer::new(16);
        buf.put_u8(0x03).unwrap();
        buf.get_u8().unwrap();
        assert!(matches!(
            buf.get_u16(),
            Err(ModbusError::Truncated {
                needed: 2,
                available: 0
            })
        ));
        assert_eq!(buf.read_position(), 1);
    }

    #[test]
    fn test_clear_resets_cursors() {
        let mut buf = FrameBuffer::new(4);
        buf.put_slice(&[1, 2, 3]).unwrap();
        buf.get_u8().unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.read_position(), 0);
        assert_eq!(buf.spare_mut().len(), 4);
    }

    #[test]
    fn test_patch_and_truncate() {
        let mut buf = FrameBuffer::new(8);
        buf.put_slice(&[0, 0, 0, 0, 9]).unwrap();
        buf.patch_u16(2, 0x0006).unwrap();
        assert_eq!(buf.as_slice(), &[0, 0, 0, 6, 9]);
        assert!(buf.patch_u16(4, 1).is_err());

        buf.truncate(3);
        assert_eq!(buf.as_slice(), &[0, 0, 0]);
    }

    #[test]
    fn test_spare_and_advance() {
        let mut buf = FrameBuffer::new(4);
        buf.spare_mut()[..2].copy_from_slice(&[0xAA, 0xBB]);
        buf.advance(2).unwrap();
        assert_eq!(buf.as_slice(), &[0xAA, 0xBB]);
        assert!(buf.advance(3).is_err());
    }
}
