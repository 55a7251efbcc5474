use alloc::vec::Vec;

use zerocopy::{ByteOrder, FromBytes};

use crate::cursor::Cursor;
use crate::encoding::{Bases, Pointer, PointerContext, PointerEncoding};
use crate::raw::{HdrHeader, DW_EH_PE_omit};
use crate::{FrameTable, Malformed, ReadError};

/// One entry of the `.eh_frame_hdr` binary search table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct HdrEntry {
    /// The start address of the function.
    pub initial_location: u64,

    /// The address of the FDE describing the function.
    pub fde_address: u64,
}

/// A decoded `.eh_frame_hdr` section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EhFrameHdr {
    pub version: u8,

    /// The address of the `.eh_frame` section as recorded in the header.
    pub eh_frame_ptr: Pointer,

    /// The search table, sorted by `initial_location`. Empty if the section
    /// has no table.
    pub table: Vec<HdrEntry>,
}

impl EhFrameHdr {
    /// Decode an `.eh_frame_hdr` section loaded at `address`.
    pub fn parse<O: ByteOrder>(
        section: &[u8],
        address: u64,
        address_size: u8,
    ) -> Result<Self, ReadError> {
        let header = HdrHeader::ref_from_prefix(section).ok_or(ReadError::MalformedFrameSection {
            offset: 0,
            reason: Malformed::UnexpectedEof,
        })?;

        if header.version != 1 {
            return Err(ReadError::UnsupportedHdrVersion(header.version));
        }

        // Table entries are datarel, relative to the start of this section.
        let bases = Bases::new(address).eh_frame_hdr(address).data(address);
        let bases = &bases;
        let header_size = core::mem::size_of::<HdrHeader>();
        let mut cursor = Cursor::<O>::new(&section[header_size..], header_size as u64);
        let context = move |cursor: &Cursor<'_, O>| {
            PointerContext::new(bases, address.wrapping_add(cursor.offset()), address_size)
        };

        let encoding = PointerEncoding::parse(header.eh_frame_ptr_enc)?
            .ok_or(ReadError::UnsupportedEncoding(header.eh_frame_ptr_enc))?;
        let eh_frame_ptr = cursor.pointer(encoding, &context(&cursor))?;

        let mut table = Vec::new();
        if header.fde_count_enc == DW_EH_PE_omit || header.table_enc == DW_EH_PE_omit {
            return Ok(Self {
                version: header.version,
                eh_frame_ptr,
                table,
            });
        }

        let encoding = PointerEncoding::parse(header.fde_count_enc)?
            .ok_or(ReadError::UnsupportedEncoding(header.fde_count_enc))?;
        let fde_count = cursor.pointer(encoding, &context(&cursor))?.address;

        let encoding = PointerEncoding::parse(header.table_enc)?
            .ok_or(ReadError::UnsupportedEncoding(header.table_enc))?;
        for _ in 0..fde_count {
            let initial_location = cursor.pointer(encoding, &context(&cursor))?.address;
            let fde_address = cursor.pointer(encoding, &context(&cursor))?.address;

            table.push(HdrEntry {
                initial_location,
                fde_address,
            });
        }

        Ok(Self {
            version: header.version,
            eh_frame_ptr,
            table,
        })
    }

    pub fn fde_count(&self) -> usize {
        self.table.len()
    }

    /// Check that every search table entry names an FDE of `table` with the
    /// same start address.
    ///
    /// Mismatches are added to the table's diagnostics. Returns the number of
    /// mismatches found.
    pub fn verify(&self, table: &mut FrameTable, eh_frame_address: u64) -> usize {
        if self.eh_frame_ptr.address != eh_frame_address {
            log::warn!(
                ".eh_frame_hdr points at {:#x} but .eh_frame is at {eh_frame_address:#x}",
                self.eh_frame_ptr.address
            );
        }

        let mut mismatches = 0;
        for entry in &self.table {
            let offset = entry.fde_address.wrapping_sub(eh_frame_address);
            let matches = table
                .fde(offset)
                .is_some_and(|fde| fde.pc_begin == entry.initial_location);

            if !matches {
                table.report(
                    offset,
                    ReadError::HdrMismatch {
                        initial_location: entry.initial_location,
                        fde_address: entry.fde_address,
                    },
                );
                mismatches += 1;
            }
        }

        mismatches
    }
}
