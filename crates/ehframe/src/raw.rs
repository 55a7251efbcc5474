//! Constants and raw types as they are defined by the `.eh_frame` format.
#![allow(non_upper_case_globals)]

use bitflags::bitflags;
use c_enum::c_enum;
use zerocopy::{FromBytes, FromZeroes, Unaligned};

/// The value of the length field that marks an extended (64-bit) length.
pub const EXTENDED_LENGTH: u32 = 0xffff_ffff;

/// The CIE id stored in place of the CIE pointer in a CIE.
///
/// The CIE id and CIE pointer are 4 bytes even in records with an extended
/// length.
pub const CIE_ID: u32 = 0;

pub const DW_EH_PE_absptr: u8 = 0x00;
pub const DW_EH_PE_uleb128: u8 = 0x01;
pub const DW_EH_PE_udata2: u8 = 0x02;
pub const DW_EH_PE_udata4: u8 = 0x03;
pub const DW_EH_PE_udata8: u8 = 0x04;
pub const DW_EH_PE_signed: u8 = 0x08;
pub const DW_EH_PE_sleb128: u8 = 0x09;
pub const DW_EH_PE_sdata2: u8 = 0x0a;
pub const DW_EH_PE_sdata4: u8 = 0x0b;
pub const DW_EH_PE_sdata8: u8 = 0x0c;

pub const DW_EH_PE_pcrel: u8 = 0x10;
pub const DW_EH_PE_textrel: u8 = 0x20;
pub const DW_EH_PE_datarel: u8 = 0x30;
pub const DW_EH_PE_funcrel: u8 = 0x40;
pub const DW_EH_PE_aligned: u8 = 0x50;

pub const DW_EH_PE_indirect: u8 = 0x80;
pub const DW_EH_PE_omit: u8 = 0xff;

/// Mask for the value format in the low nibble of an encoding byte.
pub const FORMAT_MASK: u8 = 0x0f;

/// Mask for the application in bits 4-6 of an encoding byte.
pub const APPLICATION_MASK: u8 = 0x70;

c_enum! {
    /// The version of a CIE.
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
    pub enum Version: u8 {
        /// Used by GCC and LLVM for `.eh_frame`.
        V1 = 1,

        /// Same as V1, except the return address register is a ULEB128.
        V3 = 3,
    }
}

/// The augmentation features declared by a CIE's augmentation string.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Augmentation(u8);

bitflags! {
    impl Augmentation: u8 {
        /// `z`: augmentation data is present and prefixed by its length.
        const DATA = 0x01;

        /// `P`: a personality routine pointer is present.
        const PERSONALITY = 0x02;

        /// `L`: FDEs carry an LSDA pointer.
        const LSDA = 0x04;

        /// `R`: the encoding of FDE addresses is declared.
        const FDE_ENCODING = 0x08;

        /// An unrecognised character was found and the remaining augmentation
        /// data was skipped.
        const OPAQUE = 0x10;

        /// The augmentation string did not begin with `z` so no augmentation
        /// data could be read.
        const MALFORMED = 0x20;
    }
}

/// The fixed-size header at the start of an `.eh_frame_hdr` section.
#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, FromZeroes, Unaligned)]
pub struct HdrHeader {
    pub version: u8,

    /// Encoding of the `eh_frame_ptr` field.
    pub eh_frame_ptr_enc: u8,

    /// Encoding of the `fde_count` field.
    pub fde_count_enc: u8,

    /// Encoding of the entries in the binary search table.
    pub table_enc: u8,
}
