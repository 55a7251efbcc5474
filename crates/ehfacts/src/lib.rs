//! Extract the exception handling information in the `.eh_frame` section of
//! an ELF binary as relational facts.
//!
//! [`ExceptionDecoder`] parses the section out of an [`ElfReader`] and
//! [`ExceptionDecoder::add_exception_information`] pushes the resulting
//! tuples into any [`TupleSink`]. The relations produced are described by
//! [`Relation`].

use std::ops::Range;

use elf_ehframe::{BigEndian, ByteOrder, EhFrame, EhFrameHdr, FrameTable, LittleEndian, ReadError};

mod elf;
mod error;
pub mod project;
mod relation;
mod sink;
mod tuple;

pub use elf_ehframe::{Bases, Diagnostic};

pub use crate::elf::{section_bases, ElfReader};
pub use crate::error::Error;
pub use crate::relation::Relation;
pub use crate::sink::{FactSet, FactsWriter, TupleSink};
pub use crate::tuple::{Field, Tuple, MAX_ARITY};

#[derive(Clone, Debug)]
pub struct Options {
    hdr_check: bool,
    image_check: bool,
    warnings: bool,
}

impl Options {
    pub fn new() -> Self {
        Self {
            hdr_check: true,
            image_check: true,
            warnings: false,
        }
    }

    /// Check the FDEs against the search table in `.eh_frame_hdr`, if the
    /// binary has one.
    ///
    /// Defaults to true.
    pub fn hdr_check(mut self, check: bool) -> Self {
        self.hdr_check = check;
        self
    }

    /// Drop FDEs whose start address is outside of the loadable segments.
    ///
    /// Binaries without segments are never checked. Defaults to true.
    pub fn image_check(mut self, check: bool) -> Self {
        self.image_check = check;
        self
    }

    /// Print a warning to stderr for each problem that was recovered from.
    pub fn warnings(mut self, warnings: bool) -> Self {
        self.warnings = warnings;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

/// The decoded exception handling information of one binary.
#[derive(Clone, Debug)]
pub struct ExceptionDecoder {
    bases: Bases,
    table: FrameTable,
    hdr: Option<EhFrameHdr>,
}

impl ExceptionDecoder {
    /// Decode the `.eh_frame` section of `elf`.
    ///
    /// A binary without an `.eh_frame` section decodes to an empty table.
    pub fn new<E: ElfReader + ?Sized>(elf: &E, options: &Options) -> Result<Self, Error> {
        let address_size = match elf.address_size() {
            size @ (4 | 8) => size,
            size => return Err(Error::UnsupportedAddressSize(size)),
        };

        let bases = section_bases(elf);
        let mut decoder = Self {
            bases,
            table: FrameTable::default(),
            hdr: None,
        };

        let Some(data) = elf.section_bytes(".eh_frame")? else {
            log::info!("binary has no .eh_frame section");
            return Ok(decoder);
        };

        let image = match options.image_check {
            true => elf.image_range(),
            false => None,
        };

        let little = elf.is_little_endian();
        decoder.table = match little {
            true => parse::<LittleEndian>(&data, bases, address_size, image),
            false => parse::<BigEndian>(&data, bases, address_size, image),
        }
        .map_err(Error::InvalidEhFrame)?;

        if options.hdr_check {
            if let Some(data) = elf.section_bytes(".eh_frame_hdr")? {
                let address = bases.eh_frame_hdr.unwrap_or(0);
                let hdr = match little {
                    true => EhFrameHdr::parse::<LittleEndian>(&data, address, address_size),
                    false => EhFrameHdr::parse::<BigEndian>(&data, address, address_size),
                }
                .map_err(Error::InvalidEhFrameHdr)?;

                let mismatches = hdr.verify(&mut decoder.table, bases.eh_frame);
                log::debug!(
                    ".eh_frame_hdr indexes {} FDEs with {mismatches} mismatches",
                    hdr.fde_count()
                );
                decoder.hdr = Some(hdr);
            }
        }

        if options.warnings {
            for diagnostic in decoder.table.diagnostics() {
                eprintln!("warning: {diagnostic}");
            }
        }

        Ok(decoder)
    }

    pub fn bases(&self) -> &Bases {
        &self.bases
    }

    pub fn table(&self) -> &FrameTable {
        &self.table
    }

    /// The `.eh_frame_hdr` section, if it was present and checked.
    pub fn hdr(&self) -> Option<&EhFrameHdr> {
        self.hdr.as_ref()
    }

    /// The problems that were recovered from while decoding.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.table.diagnostics()
    }

    /// Push every fact about the decoded table into `sink`.
    pub fn add_exception_information<S: TupleSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<(), Error> {
        project::project(&self.table, sink)
    }
}

/// Decode the exception information of `elf` into a new [`FactSet`].
pub fn decode<E: ElfReader + ?Sized>(elf: &E, options: &Options) -> Result<FactSet, Error> {
    let decoder = ExceptionDecoder::new(elf, options)?;
    let mut facts = FactSet::new();
    decoder.add_exception_information(&mut facts)?;
    Ok(facts)
}

fn parse<O: ByteOrder>(
    data: &[u8],
    bases: Bases,
    address_size: u8,
    image: Option<Range<u64>>,
) -> Result<FrameTable, ReadError> {
    let mut eh_frame = EhFrame::<O>::new(data, bases).address_size(address_size);
    if let Some(image) = image {
        eh_frame = eh_frame.image(image);
    }

    eh_frame.parse()
}
