//! `DW_EH_PE_*` pointer encodings.
//!
//! A pointer encoding is a single byte. The low nibble is the [`Format`] that
//! says how many bytes the value takes and whether it is signed. Bits 4-6 are
//! the [`Application`] that says what the value is relative to, and bit 7
//! marks the pointer as indirect. The special value `0xff` means the field is
//! omitted entirely.
//!
//! [`resolve`] turns an encoding, the raw bytes and the location of the field
//! into an absolute address. It has no state and does not read anything other
//! than its arguments.
#![allow(non_upper_case_globals)]

use core::fmt;

use zerocopy::ByteOrder;

use crate::raw::*;
use crate::ReadError;

/// How the value of an encoded pointer is stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    /// An unsigned value the size of an address.
    AbsPtr,
    Uleb128,
    Udata2,
    Udata4,
    Udata8,
    /// A signed value the size of an address.
    Signed,
    Sleb128,
    Sdata2,
    Sdata4,
    Sdata8,
}

impl Format {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits & FORMAT_MASK {
            DW_EH_PE_absptr => Self::AbsPtr,
            DW_EH_PE_uleb128 => Self::Uleb128,
            DW_EH_PE_udata2 => Self::Udata2,
            DW_EH_PE_udata4 => Self::Udata4,
            DW_EH_PE_udata8 => Self::Udata8,
            DW_EH_PE_signed => Self::Signed,
            DW_EH_PE_sleb128 => Self::Sleb128,
            DW_EH_PE_sdata2 => Self::Sdata2,
            DW_EH_PE_sdata4 => Self::Sdata4,
            DW_EH_PE_sdata8 => Self::Sdata8,
            _ => return None,
        })
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::AbsPtr => DW_EH_PE_absptr,
            Self::Uleb128 => DW_EH_PE_uleb128,
            Self::Udata2 => DW_EH_PE_udata2,
            Self::Udata4 => DW_EH_PE_udata4,
            Self::Udata8 => DW_EH_PE_udata8,
            Self::Signed => DW_EH_PE_signed,
            Self::Sleb128 => DW_EH_PE_sleb128,
            Self::Sdata2 => DW_EH_PE_sdata2,
            Self::Sdata4 => DW_EH_PE_sdata4,
            Self::Sdata8 => DW_EH_PE_sdata8,
        }
    }

    /// The size of a value in this format, or `None` for LEB128 formats whose
    /// size depends on the value.
    pub fn size(self, address_size: u8) -> Option<usize> {
        match self {
            Self::AbsPtr | Self::Signed => Some(address_size as usize),
            Self::Udata2 | Self::Sdata2 => Some(2),
            Self::Udata4 | Self::Sdata4 => Some(4),
            Self::Udata8 | Self::Sdata8 => Some(8),
            Self::Uleb128 | Self::Sleb128 => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Signed | Self::Sleb128 | Self::Sdata2 | Self::Sdata4 | Self::Sdata8
        )
    }
}

/// What the value of an encoded pointer is relative to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Application {
    /// The value is the address itself.
    Absolute,
    /// Relative to the address of the encoded field.
    PcRel,
    /// Relative to the start of `.text`.
    TextRel,
    /// Relative to the data base: `.got` for `.eh_frame`, the start of the
    /// section for `.eh_frame_hdr`.
    DataRel,
    /// Relative to the start of the function the FDE describes.
    FuncRel,
    /// Aligned to an address-sized boundary. Not supported.
    Aligned,
}

impl Application {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits & APPLICATION_MASK {
            DW_EH_PE_absptr => Self::Absolute,
            DW_EH_PE_pcrel => Self::PcRel,
            DW_EH_PE_textrel => Self::TextRel,
            DW_EH_PE_datarel => Self::DataRel,
            DW_EH_PE_funcrel => Self::FuncRel,
            DW_EH_PE_aligned => Self::Aligned,
            _ => return None,
        })
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Absolute => DW_EH_PE_absptr,
            Self::PcRel => DW_EH_PE_pcrel,
            Self::TextRel => DW_EH_PE_textrel,
            Self::DataRel => DW_EH_PE_datarel,
            Self::FuncRel => DW_EH_PE_funcrel,
            Self::Aligned => DW_EH_PE_aligned,
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absolute => "absptr",
            Self::PcRel => "pcrel",
            Self::TextRel => "textrel",
            Self::DataRel => "datarel",
            Self::FuncRel => "funcrel",
            Self::Aligned => "aligned",
        };

        f.write_str(name)
    }
}

/// A decoded pointer encoding byte.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PointerEncoding {
    format: Format,
    application: Application,
    indirect: bool,
}

impl PointerEncoding {
    pub const fn new(format: Format, application: Application) -> Self {
        Self {
            format,
            application,
            indirect: false,
        }
    }

    /// Mark pointers in this encoding as being the address of the actual
    /// pointer.
    pub const fn indirect(mut self, indirect: bool) -> Self {
        self.indirect = indirect;
        self
    }

    /// Decode an encoding byte.
    ///
    /// Returns `None` for `DW_EH_PE_omit`.
    pub fn parse(byte: u8) -> Result<Option<Self>, ReadError> {
        if byte == DW_EH_PE_omit {
            return Ok(None);
        }

        let format = Format::from_bits(byte).ok_or(ReadError::UnsupportedEncoding(byte))?;
        let application =
            Application::from_bits(byte).ok_or(ReadError::UnsupportedEncoding(byte))?;

        Ok(Some(Self {
            format,
            application,
            indirect: byte & DW_EH_PE_indirect != 0,
        }))
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn application(&self) -> Application {
        self.application
    }

    pub fn is_indirect(&self) -> bool {
        self.indirect
    }

    /// The same encoding without the application or indirection.
    ///
    /// FDE address ranges are stored like this.
    pub fn value_only(&self) -> Self {
        Self::new(self.format, Application::Absolute)
    }

    /// The encoding byte.
    pub fn bits(&self) -> u8 {
        let indirect = match self.indirect {
            true => DW_EH_PE_indirect,
            false => 0,
        };

        self.format.bits() | self.application.bits() | indirect
    }
}

impl Default for PointerEncoding {
    fn default() -> Self {
        Self::new(Format::AbsPtr, Application::Absolute)
    }
}

impl fmt::Debug for PointerEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indirect {
            f.write_str("indirect | ")?;
        }

        write!(f, "{} | {:?}", self.application, self.format)
    }
}

/// Base addresses that relative pointer encodings are applied against.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Bases {
    /// Address at which the `.eh_frame` section is loaded.
    pub eh_frame: u64,
    pub eh_frame_hdr: Option<u64>,
    pub text: Option<u64>,
    pub data: Option<u64>,
}

impl Bases {
    pub fn new(eh_frame: u64) -> Self {
        Self {
            eh_frame,
            ..Self::default()
        }
    }

    pub fn eh_frame_hdr(mut self, address: u64) -> Self {
        self.eh_frame_hdr = Some(address);
        self
    }

    /// Set the base used by `DW_EH_PE_textrel`.
    pub fn text(mut self, address: u64) -> Self {
        self.text = Some(address);
        self
    }

    /// Set the base used by `DW_EH_PE_datarel`.
    pub fn data(mut self, address: u64) -> Self {
        self.data = Some(address);
        self
    }
}

/// The location of a pointer field that is being decoded or encoded.
#[derive(Copy, Clone, Debug)]
pub struct PointerContext<'b> {
    pub bases: &'b Bases,

    /// The address of the encoded field itself.
    pub field_address: u64,

    /// The start of the function, for `DW_EH_PE_funcrel`.
    pub function: Option<u64>,

    /// Size of an address in bytes, either 4 or 8.
    pub address_size: u8,
}

impl<'b> PointerContext<'b> {
    pub fn new(bases: &'b Bases, field_address: u64, address_size: u8) -> Self {
        Self {
            bases,
            field_address,
            function: None,
            address_size,
        }
    }

    pub fn function(mut self, function: impl Into<Option<u64>>) -> Self {
        self.function = function.into();
        self
    }

    /// The address that values in `application` are relative to.
    pub fn base(&self, application: Application) -> Result<u64, ReadError> {
        let missing = ReadError::MissingBaseAddress(application);

        match application {
            Application::Absolute => Ok(0),
            Application::PcRel => Ok(self.field_address),
            Application::TextRel => self.bases.text.ok_or(missing),
            Application::DataRel => self.bases.data.ok_or(missing),
            Application::FuncRel => self.function.ok_or(missing),
            Application::Aligned => Err(ReadError::UnsupportedEncoding(DW_EH_PE_aligned)),
        }
    }

    /// Truncate `value` to the address size.
    pub fn truncate(&self, value: u64) -> u64 {
        match self.address_size {
            4 => value & 0xffff_ffff,
            _ => value,
        }
    }
}

/// A resolved pointer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Pointer {
    /// The absolute address after the application has been applied.
    ///
    /// For indirect pointers this is the address of the location holding the
    /// real pointer.
    pub address: u64,

    /// The value as it was stored in the section, sign-extended.
    pub raw: u64,

    pub indirect: bool,
}

/// Resolve an encoded pointer stored at the start of `bytes`.
///
/// Returns the pointer along with the number of bytes it occupied.
pub fn resolve<O: ByteOrder>(
    encoding: PointerEncoding,
    bytes: &[u8],
    ctx: &PointerContext<'_>,
) -> Result<(Pointer, usize), ReadError> {
    let (raw, size) = read_value::<O>(encoding.format(), bytes, ctx.address_size)?;
    let base = ctx.base(encoding.application())?;

    let pointer = Pointer {
        address: ctx.truncate(base.wrapping_add(raw)),
        raw,
        indirect: encoding.is_indirect(),
    };

    Ok((pointer, size))
}

/// Resolve an encoded pointer given its raw encoding byte.
///
/// Returns `None` if the encoding is `DW_EH_PE_omit`.
pub fn resolve_pointer<O: ByteOrder>(
    encoding: u8,
    bytes: &[u8],
    ctx: &PointerContext<'_>,
) -> Result<Option<(Pointer, usize)>, ReadError> {
    match PointerEncoding::parse(encoding)? {
        Some(encoding) => resolve::<O>(encoding, bytes, ctx).map(Some),
        None => Ok(None),
    }
}

/// Read a value in `format` without applying anything to it.
///
/// Signed values are sign-extended to 64 bits.
pub fn read_value<O: ByteOrder>(
    format: Format,
    bytes: &[u8],
    address_size: u8,
) -> Result<(u64, usize), ReadError> {
    let fixed = |size: usize| bytes.get(..size).ok_or(ReadError::UnexpectedEof);

    Ok(match format {
        Format::Uleb128 => read_uleb128(bytes).ok_or(ReadError::UnexpectedEof)?,
        Format::Sleb128 => {
            let (value, size) = read_sleb128(bytes).ok_or(ReadError::UnexpectedEof)?;
            (value as u64, size)
        }
        Format::Udata2 => (O::read_u16(fixed(2)?) as u64, 2),
        Format::Udata4 => (O::read_u32(fixed(4)?) as u64, 4),
        Format::Udata8 => (O::read_u64(fixed(8)?), 8),
        Format::Sdata2 => (O::read_i16(fixed(2)?) as i64 as u64, 2),
        Format::Sdata4 => (O::read_i32(fixed(4)?) as i64 as u64, 4),
        Format::Sdata8 => (O::read_i64(fixed(8)?) as u64, 8),
        Format::AbsPtr => match address_size {
            4 => (O::read_u32(fixed(4)?) as u64, 4),
            _ => (O::read_u64(fixed(8)?), 8),
        },
        Format::Signed => match address_size {
            4 => (O::read_i32(fixed(4)?) as i64 as u64, 4),
            _ => (O::read_i64(fixed(8)?) as u64, 8),
        },
    })
}

/// Decode an unsigned LEB128 value, returning it and its size in bytes.
///
/// Bits beyond the 64th are discarded.
pub fn read_uleb128(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;

    for (index, &byte) in bytes.iter().enumerate() {
        if shift < 64 {
            result |= ((byte & 0x7f) as u64) << shift;
        }
        shift += 7;

        if byte & 0x80 == 0 {
            return Some((result, index + 1));
        }
    }

    None
}

/// Decode a signed LEB128 value, returning it and its size in bytes.
pub fn read_sleb128(bytes: &[u8]) -> Option<(i64, usize)> {
    let mut result = 0i64;
    let mut shift = 0u32;

    for (index, &byte) in bytes.iter().enumerate() {
        if shift < 64 {
            result |= ((byte & 0x7f) as i64) << shift;
        }
        shift += 7;

        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= -1i64 << shift;
            }

            return Some((result, index + 1));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use zerocopy::{BigEndian, LittleEndian};

    use super::*;

    fn bases() -> Bases {
        Bases::new(0x2000).text(0x1000).data(0x4000)
    }

    #[test]
    fn parse_common_encodings() {
        let enc = PointerEncoding::parse(0x1b).unwrap().unwrap();
        assert_eq!(enc.format(), Format::Sdata4);
        assert_eq!(enc.application(), Application::PcRel);
        assert!(!enc.is_indirect());
        assert_eq!(enc.bits(), 0x1b);

        let enc = PointerEncoding::parse(0x9b).unwrap().unwrap();
        assert!(enc.is_indirect());
        assert_eq!(enc.bits(), 0x9b);

        assert_eq!(PointerEncoding::parse(DW_EH_PE_omit), Ok(None));
    }

    #[test]
    fn unknown_format_nibble_is_unsupported() {
        for byte in [0x05, 0x06, 0x07, 0x0d, 0x0e, 0x0f, 0x1f] {
            assert_eq!(
                PointerEncoding::parse(byte),
                Err(ReadError::UnsupportedEncoding(byte))
            );
        }

        // 0x60 and 0x70 are not applications.
        assert_eq!(
            PointerEncoding::parse(0x63),
            Err(ReadError::UnsupportedEncoding(0x63))
        );
    }

    #[test]
    fn pcrel_sdata4() {
        let bases = bases();
        let ctx = PointerContext::new(&bases, 0x2010, 8);
        let enc = PointerEncoding::new(Format::Sdata4, Application::PcRel);

        let (ptr, size) = resolve::<LittleEndian>(enc, &(-0x10i32).to_le_bytes(), &ctx).unwrap();
        assert_eq!(size, 4);
        assert_eq!(ptr.address, 0x2000);
        assert_eq!(ptr.raw, -0x10i64 as u64);
    }

    #[test]
    fn big_endian_udata2() {
        let bases = bases();
        let ctx = PointerContext::new(&bases, 0, 8);
        let enc = PointerEncoding::new(Format::Udata2, Application::TextRel);

        let (ptr, size) = resolve::<BigEndian>(enc, &[0x01, 0x02, 0xff], &ctx).unwrap();
        assert_eq!(size, 2);
        assert_eq!(ptr.address, 0x1102);
    }

    #[test]
    fn absptr_follows_address_size() {
        let bases = bases();
        let enc = PointerEncoding::default();
        let bytes = 0x1122_3344_5566_7788u64.to_le_bytes();

        let ctx = PointerContext::new(&bases, 0, 4);
        let (ptr, size) = resolve::<LittleEndian>(enc, &bytes, &ctx).unwrap();
        assert_eq!((ptr.address, size), (0x5566_7788, 4));

        let ctx = PointerContext::new(&bases, 0, 8);
        let (ptr, size) = resolve::<LittleEndian>(enc, &bytes, &ctx).unwrap();
        assert_eq!((ptr.address, size), (0x1122_3344_5566_7788, 8));
    }

    #[test]
    fn address_arithmetic_wraps_to_address_size() {
        let bases = bases();
        let ctx = PointerContext::new(&bases, 0x10, 4);
        let enc = PointerEncoding::new(Format::Sdata4, Application::PcRel);

        let (ptr, _) = resolve::<LittleEndian>(enc, &(-0x20i32).to_le_bytes(), &ctx).unwrap();
        assert_eq!(ptr.address, 0xffff_fff0);
    }

    #[test]
    fn missing_bases() {
        let bases = Bases::new(0x2000);
        let ctx = PointerContext::new(&bases, 0, 8);

        for (application, byte) in [
            (Application::TextRel, 0x23),
            (Application::DataRel, 0x33),
            (Application::FuncRel, 0x43),
        ] {
            assert_eq!(
                resolve_pointer::<LittleEndian>(byte, &[0; 4], &ctx),
                Err(ReadError::MissingBaseAddress(application))
            );
        }

        let ctx = ctx.function(0x1234);
        let (ptr, _) = resolve_pointer::<LittleEndian>(0x43, &[4, 0, 0, 0], &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(ptr.address, 0x1238);
    }

    #[test]
    fn aligned_is_unsupported() {
        let bases = bases();
        let ctx = PointerContext::new(&bases, 0, 8);

        assert!(matches!(
            resolve_pointer::<LittleEndian>(0x50, &[0; 8], &ctx),
            Err(ReadError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn truncated_input() {
        let bases = bases();
        let ctx = PointerContext::new(&bases, 0, 8);

        assert_eq!(
            resolve_pointer::<LittleEndian>(0x04, &[0; 7], &ctx),
            Err(ReadError::UnexpectedEof)
        );
        assert_eq!(
            resolve_pointer::<LittleEndian>(0x01, &[0x80, 0x80], &ctx),
            Err(ReadError::UnexpectedEof)
        );
    }

    #[test]
    fn leb128() {
        assert_eq!(read_uleb128(&[0x02]), Some((2, 1)));
        assert_eq!(read_uleb128(&[0xe5, 0x8e, 0x26]), Some((624485, 3)));
        assert_eq!(read_sleb128(&[0x78]), Some((-8, 1)));
        assert_eq!(read_sleb128(&[0xc0, 0xbb, 0x78]), Some((-123456, 3)));
        assert_eq!(read_sleb128(&[0x3f]), Some((63, 1)));
        assert_eq!(
            read_uleb128(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
            Some((u64::MAX, 10))
        );
    }
}
