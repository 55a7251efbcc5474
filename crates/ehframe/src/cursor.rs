use core::marker::PhantomData;

use zerocopy::ByteOrder;

use crate::encoding::{self, Pointer, PointerContext, PointerEncoding};
use crate::{Malformed, ReadError};

/// A forward-only reader over a slice of a section.
///
/// Errors report the section offset at which they happened.
pub(crate) struct Cursor<'a, O: ByteOrder> {
    data: &'a [u8],
    pos: usize,
    base: u64,
    _order: PhantomData<O>,
}

impl<'a, O: ByteOrder> Cursor<'a, O> {
    /// Create a cursor over `data`, which starts at `base` within its section.
    pub fn new(data: &'a [u8], base: u64) -> Self {
        Self {
            data,
            pos: 0,
            base,
            _order: PhantomData,
        }
    }

    /// The section offset of the next byte to be read.
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Number of bytes that have been read.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn malformed(&self, reason: Malformed) -> ReadError {
        ReadError::MalformedFrameSection {
            offset: self.offset(),
            reason,
        }
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        if self.len() < len {
            return Err(self.malformed(Malformed::UnexpectedEof));
        }

        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ReadError> {
        self.bytes(len).map(|_| ())
    }

    /// Split off the next `len` bytes into their own cursor.
    pub fn split(&mut self, len: usize) -> Result<Cursor<'a, O>, ReadError> {
        let base = self.offset();
        let data = self.bytes(len)?;
        Ok(Cursor::new(data, base))
    }

    pub fn u8(&mut self) -> Result<u8, ReadError> {
        self.bytes(1).map(|bytes| bytes[0])
    }

    pub fn u32(&mut self) -> Result<u32, ReadError> {
        self.bytes(4).map(O::read_u32)
    }

    pub fn u64(&mut self) -> Result<u64, ReadError> {
        self.bytes(8).map(O::read_u64)
    }

    pub fn uleb128(&mut self) -> Result<u64, ReadError> {
        let (value, size) = encoding::read_uleb128(self.remaining())
            .ok_or_else(|| self.malformed(Malformed::UnexpectedEof))?;
        self.pos += size;
        Ok(value)
    }

    pub fn sleb128(&mut self) -> Result<i64, ReadError> {
        let (value, size) = encoding::read_sleb128(self.remaining())
            .ok_or_else(|| self.malformed(Malformed::UnexpectedEof))?;
        self.pos += size;
        Ok(value)
    }

    /// Read a NUL-terminated string, returning it without the terminator.
    pub fn cstr(&mut self) -> Result<&'a [u8], ReadError> {
        let remaining = self.remaining();
        let len = remaining
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| self.malformed(Malformed::UnterminatedString))?;

        self.pos += len + 1;
        Ok(&remaining[..len])
    }

    /// Read an encoded pointer.
    ///
    /// `ctx.field_address` must be the address of the next byte.
    pub fn pointer(
        &mut self,
        encoding: PointerEncoding,
        ctx: &PointerContext<'_>,
    ) -> Result<Pointer, ReadError> {
        match encoding::resolve::<O>(encoding, self.remaining(), ctx) {
            Ok((pointer, size)) => {
                self.pos += size;
                Ok(pointer)
            }
            Err(ReadError::UnexpectedEof) => Err(self.malformed(Malformed::UnexpectedEof)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use zerocopy::LittleEndian;

    use super::*;

    #[test]
    fn errors_carry_section_offsets() {
        let mut cursor = Cursor::<LittleEndian>::new(&[1, 2, 3], 0x40);
        assert_eq!(cursor.u8(), Ok(1));
        assert_eq!(
            cursor.u32(),
            Err(ReadError::MalformedFrameSection {
                offset: 0x41,
                reason: Malformed::UnexpectedEof
            })
        );
    }

    #[test]
    fn split_bounds_the_sub_cursor() {
        let mut cursor = Cursor::<LittleEndian>::new(&[b'z', b'R', 0, 7, 8], 0x10);
        assert_eq!(cursor.cstr(), Ok(&b"zR"[..]));

        let mut sub = cursor.split(1).unwrap();
        assert_eq!(sub.offset(), 0x13);
        assert_eq!(sub.u8(), Ok(7));
        assert_eq!(sub.len(), 0);
        assert!(sub.u8().is_err());

        assert_eq!(cursor.u8(), Ok(8));
    }

    #[test]
    fn unterminated_string() {
        let mut cursor = Cursor::<LittleEndian>::new(b"zPLR", 0);
        assert_eq!(
            cursor.cstr(),
            Err(ReadError::MalformedFrameSection {
                offset: 0,
                reason: Malformed::UnterminatedString
            })
        );
    }
}
