use std::borrow::Cow;
use std::ops::Range;

use elf_ehframe::Bases;
use object::{Object, ObjectSection, ObjectSegment};

use crate::Error;

/// The parts of an ELF file that exception information is decoded from.
pub trait ElfReader {
    /// The uncompressed contents of section `name`, if the file has one.
    fn section_bytes(&self, name: &str) -> Result<Option<Cow<'_, [u8]>>, Error>;

    /// The address that section `name` is loaded at.
    fn section_address(&self, name: &str) -> Option<u64>;

    /// The range of addresses covered by the loadable segments.
    ///
    /// `None` for files without segments, such as relocatable objects.
    fn image_range(&self) -> Option<Range<u64>>;

    /// The lowest address that the file is loaded at.
    fn load_base_address(&self) -> u64 {
        self.image_range().map_or(0, |image| image.start)
    }

    /// The size of an address in bytes.
    fn address_size(&self) -> u8;

    fn is_little_endian(&self) -> bool;
}

/// The base addresses for `.eh_frame` pointers, taken from the addresses of
/// the `.eh_frame`, `.eh_frame_hdr`, `.text` and `.got` sections.
pub fn section_bases<E: ElfReader + ?Sized>(elf: &E) -> Bases {
    let mut bases = Bases::new(elf.section_address(".eh_frame").unwrap_or(0));

    if let Some(address) = elf.section_address(".eh_frame_hdr") {
        bases = bases.eh_frame_hdr(address);
    }

    if let Some(address) = elf.section_address(".text") {
        bases = bases.text(address);
    }

    if let Some(address) = elf.section_address(".got") {
        bases = bases.data(address);
    }

    bases
}

impl<'data> ElfReader for object::File<'data> {
    fn section_bytes(&self, name: &str) -> Result<Option<Cow<'_, [u8]>>, Error> {
        let Some(section) = self.section_by_name(name) else {
            return Ok(None);
        };

        section
            .uncompressed_data()
            .map(Some)
            .map_err(|error| Error::InvalidSection {
                name: name.to_owned(),
                error,
            })
    }

    fn section_address(&self, name: &str) -> Option<u64> {
        self.section_by_name(name).map(|section| section.address())
    }

    fn image_range(&self) -> Option<Range<u64>> {
        let start = self.segments().map(|segment| segment.address()).min()?;
        let end = self
            .segments()
            .map(|segment| segment.address().saturating_add(segment.size()))
            .max()?;

        Some(start..end)
    }

    fn address_size(&self) -> u8 {
        match self.is_64() {
            true => 8,
            false => 4,
        }
    }

    fn is_little_endian(&self) -> bool {
        Object::is_little_endian(self)
    }
}
