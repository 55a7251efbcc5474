use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ops::Range;

use zerocopy::{ByteOrder, NativeEndian};

use crate::augmentation::{transition, AugmentationAction, AugmentationState};
use crate::cursor::Cursor;
use crate::encoding::{Bases, Pointer, PointerContext, PointerEncoding};
use crate::raw::*;
use crate::{Malformed, ReadError};

/// An `.eh_frame` section.
#[derive(Clone)]
pub struct EhFrame<'a, O: ByteOrder = NativeEndian> {
    section: &'a [u8],
    bases: Bases,
    address_size: u8,
    image: Option<Range<u64>>,
    _order: PhantomData<O>,
}

impl<'a, O: ByteOrder> EhFrame<'a, O> {
    /// Wrap the bytes of an `.eh_frame` section loaded at `bases.eh_frame`.
    ///
    /// The address size defaults to 8 bytes.
    pub fn new(section: &'a [u8], bases: Bases) -> Self {
        Self {
            section,
            bases,
            address_size: 8,
            image: None,
            _order: PhantomData,
        }
    }

    /// Set the size of an address in bytes.
    ///
    /// This is the size of `DW_EH_PE_absptr` values. Only 4 and 8 are valid.
    pub fn address_size(mut self, size: u8) -> Self {
        debug_assert!(size == 4 || size == 8, "invalid address size {size}");
        self.address_size = size;
        self
    }

    /// Restrict FDE start addresses to the given range of the loaded image.
    ///
    /// FDEs starting outside of it are dropped.
    pub fn image(mut self, image: Range<u64>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn bases(&self) -> &Bases {
        &self.bases
    }

    pub fn section(&self) -> &'a [u8] {
        self.section
    }

    /// Get an iterator over the raw records in this section.
    ///
    /// Iteration stops at the terminator record or at the end of the section.
    /// After an error is returned the iterator is finished.
    pub fn records(&self) -> Records<'a, O> {
        Records {
            section: self.section,
            pos: 0,
            done: false,
            _order: PhantomData,
        }
    }

    /// Parse every CIE and FDE in the section.
    ///
    /// Problems that only affect a single record are recorded as
    /// [`Diagnostic`]s on the returned table. A malformed section fails the
    /// whole parse.
    pub fn parse(&self) -> Result<FrameTable, ReadError> {
        let mut cies = BTreeMap::new();
        let mut fdes = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for record in self.records() {
            let record = record?;

            match record.kind {
                RecordKind::Cie => match self.parse_cie(&record, &mut diagnostics) {
                    Ok(cie) => {
                        log::trace!("CIE at {:#x}: {cie:?}", record.offset);
                        cies.insert(record.offset, cie);
                    }
                    Err(error) => report(&mut diagnostics, record.offset, within_record(error)),
                },
                RecordKind::Fde { cie } => {
                    let Some(owner) = cies.get(&cie) else {
                        let error = ReadError::DanglingFdeReference {
                            fde: record.offset,
                            cie,
                        };
                        report(&mut diagnostics, record.offset, error);
                        continue;
                    };

                    match self.parse_fde(&record, owner, &mut diagnostics) {
                        Ok(fde) => {
                            log::trace!("FDE at {:#x}: {fde:?}", record.offset);
                            fdes.insert(record.offset, fde);
                        }
                        Err(error) => {
                            report(&mut diagnostics, record.offset, within_record(error))
                        }
                    }
                }
            }
        }

        log::debug!(
            "parsed {} CIEs and {} FDEs with {} diagnostics",
            cies.len(),
            fdes.len(),
            diagnostics.len()
        );

        Ok(FrameTable {
            cies,
            fdes,
            diagnostics,
        })
    }

    fn context(&self, cursor: &Cursor<'_, O>) -> PointerContext<'_> {
        PointerContext::new(
            &self.bases,
            self.bases.eh_frame.wrapping_add(cursor.offset()),
            self.address_size,
        )
    }

    fn parse_cie(
        &self,
        record: &RawRecord<'a>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Cie, ReadError> {
        let mut cursor = Cursor::<O>::new(record.body, record.body_offset);

        let version = Version(cursor.u8()?);
        match version {
            Version::V1 | Version::V3 => (),
            _ => {
                return Err(ReadError::UnsupportedCieVersion {
                    cie: record.offset,
                    version: version.0,
                })
            }
        }

        let augmentation = cursor.cstr()?;
        let code_alignment_factor = cursor.uleb128()?;
        let data_alignment_factor = cursor.sleb128()?;
        let return_address_register = match version {
            Version::V1 => cursor.u8()? as u64,
            _ => cursor.uleb128()?,
        };

        let mut cie = Cie {
            offset: record.offset,
            format: record.format,
            length: record.length,
            version,
            augmentation: String::from_utf8_lossy(augmentation).into_owned(),
            flags: Augmentation::empty(),
            code_alignment_factor,
            data_alignment_factor,
            return_address_register,
            fde_encoding: None,
            lsda_encoding: None,
            personality_encoding: None,
            personality: None,
            initial_instructions: 0..0,
        };

        let mut state = AugmentationState::Start;
        let mut data: Option<Cursor<'a, O>> = None;

        for &code in augmentation {
            let (next, action) = transition(state, code);
            state = next;

            if action == AugmentationAction::ReadLength {
                cie.flags |= Augmentation::DATA;

                let offset = cursor.offset();
                match cursor.uleb128().and_then(|len| cursor.split(len as usize)) {
                    Ok(block) => data = Some(block),
                    Err(_) => {
                        // Nothing after the bad length can be located.
                        report(
                            diagnostics,
                            record.offset,
                            ReadError::InvalidAugmentationData { offset },
                        );
                        cursor.skip(cursor.len())?;
                        state = AugmentationState::Opaque;
                        break;
                    }
                }
                continue;
            }

            let Some(block) = data.as_mut() else {
                continue;
            };

            let result = match action {
                AugmentationAction::ReadPersonality => {
                    cie.flags |= Augmentation::PERSONALITY;
                    self.read_personality(block, &mut cie)
                }
                AugmentationAction::ReadLsdaEncoding => {
                    cie.flags |= Augmentation::LSDA;
                    block.u8().map(|byte| cie.lsda_encoding = declared(byte))
                }
                AugmentationAction::ReadFdeEncoding => {
                    cie.flags |= Augmentation::FDE_ENCODING;
                    block.u8().map(|byte| cie.fde_encoding = declared(byte))
                }
                AugmentationAction::SkipRest => {
                    log::debug!(
                        "CIE at {:#x}: skipping augmentation data after unknown code {:?}",
                        record.offset,
                        code as char
                    );
                    Ok(())
                }
                AugmentationAction::ReadLength | AugmentationAction::Ignore => Ok(()),
            };

            if let Err(error) = result {
                let offset = block.offset();
                let error = match error {
                    ReadError::MalformedFrameSection { .. } => {
                        ReadError::InvalidAugmentationData { offset }
                    }
                    error => error,
                };

                report(diagnostics, record.offset, error);
                state = AugmentationState::Opaque;
            }
        }

        match state {
            AugmentationState::Opaque => cie.flags |= Augmentation::OPAQUE,
            AugmentationState::Malformed => cie.flags |= Augmentation::MALFORMED,
            _ => (),
        }

        cie.initial_instructions = cursor.offset()..record.end();
        Ok(cie)
    }

    fn read_personality(
        &self,
        block: &mut Cursor<'a, O>,
        cie: &mut Cie,
    ) -> Result<(), ReadError> {
        let byte = block.u8()?;
        let Some(encoding) = PointerEncoding::parse(byte)? else {
            return Ok(());
        };

        cie.personality_encoding = Some(byte);
        cie.personality = Some(block.pointer(encoding, &self.context(block))?);
        Ok(())
    }

    fn parse_fde(
        &self,
        record: &RawRecord<'a>,
        cie: &Cie,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Fde, ReadError> {
        let mut cursor = Cursor::<O>::new(record.body, record.body_offset);

        let encoding = cie.fde_pointer_encoding()?;
        let pc_begin = cursor.pointer(encoding, &self.context(&cursor))?.address;
        let pc_range = cursor
            .pointer(encoding.value_only(), &self.context(&cursor))?
            .address;

        let in_image = self
            .image
            .as_ref()
            .map_or(true, |image| image.contains(&pc_begin));
        if pc_begin == 0 || !in_image {
            return Err(ReadError::InvalidStartAddress {
                fde: record.offset,
                address: pc_begin,
            });
        }

        let mut lsda = None;
        let mut augmentation_data = cursor.offset()..cursor.offset();

        if cie.flags.contains(Augmentation::DATA) {
            let offset = cursor.offset();
            let mut block = cursor
                .uleb128()
                .and_then(|len| cursor.split(len as usize))
                .map_err(|_| ReadError::InvalidAugmentationData { offset })?;
            augmentation_data = block.offset()..cursor.offset();

            if let Some(byte) = cie.lsda_encoding {
                match self.read_lsda(&mut block, byte, pc_begin) {
                    Ok(pointer) => lsda = pointer,
                    Err(error) => {
                        let error = match error {
                            ReadError::MalformedFrameSection { offset, .. } => {
                                ReadError::InvalidAugmentationData { offset }
                            }
                            error => error,
                        };

                        report(diagnostics, record.offset, error);
                    }
                }
            }
        }

        Ok(Fde {
            offset: record.offset,
            format: record.format,
            length: record.length,
            cie: cie.offset,
            pc_begin,
            pc_range,
            lsda,
            augmentation_data,
            instructions: cursor.offset()..record.end(),
        })
    }

    fn read_lsda(
        &self,
        block: &mut Cursor<'a, O>,
        byte: u8,
        function: u64,
    ) -> Result<Option<Pointer>, ReadError> {
        let Some(encoding) = PointerEncoding::parse(byte)? else {
            return Ok(None);
        };

        let ctx = self.context(block).function(function);
        let pointer = block.pointer(encoding, &ctx)?;

        // A stored value of zero means this FDE has no LSDA.
        Ok(match pointer.raw {
            0 => None,
            _ => Some(pointer),
        })
    }
}

/// Treat `DW_EH_PE_omit` as the field not being declared.
fn declared(byte: u8) -> Option<u8> {
    (byte != DW_EH_PE_omit).then_some(byte)
}

fn report(diagnostics: &mut Vec<Diagnostic>, offset: u64, error: ReadError) {
    log::warn!("{offset:#x}: {error}");
    diagnostics.push(Diagnostic { offset, error });
}

/// Record bodies are bounded by their declared length, which has already been
/// checked against the section. Running out of bytes inside one only affects
/// that record.
fn within_record(error: ReadError) -> ReadError {
    match error {
        ReadError::MalformedFrameSection { offset, .. } => ReadError::TruncatedRecord { offset },
        error => error,
    }
}

/// Whether a record uses a 32-bit length or the extended 64-bit length.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RecordFormat {
    Dwarf32,
    Dwarf64,
}

impl RecordFormat {
    /// Size of the length field, including the extended length escape.
    pub fn length_size(self) -> usize {
        match self {
            Self::Dwarf32 => 4,
            Self::Dwarf64 => 12,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RecordKind {
    Cie,

    /// An FDE along with the section offset of the CIE it points to.
    Fde { cie: u64 },
}

/// A record whose header has been read but whose body has not been decoded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawRecord<'a> {
    /// Section offset of the record's length field.
    pub offset: u64,
    pub format: RecordFormat,

    /// The declared length, not counting the length field itself.
    pub length: u64,
    pub kind: RecordKind,

    /// The record contents following the 4-byte CIE id or CIE pointer.
    pub body: &'a [u8],

    /// Section offset of `body`.
    pub body_offset: u64,
}

impl<'a> RawRecord<'a> {
    /// Section offset of the first byte after this record.
    pub fn end(&self) -> u64 {
        self.offset + self.format.length_size() as u64 + self.length
    }
}

/// Iterator over the [`RawRecord`]s of an [`EhFrame`].
pub struct Records<'a, O: ByteOrder> {
    section: &'a [u8],
    pos: usize,
    done: bool,
    _order: PhantomData<O>,
}

impl<'a, O: ByteOrder> Records<'a, O> {
    fn read_record(&mut self) -> Result<Option<RawRecord<'a>>, ReadError> {
        if self.pos == self.section.len() {
            return Ok(None);
        }

        let mut cursor = Cursor::<O>::new(&self.section[self.pos..], self.pos as u64);
        let offset = cursor.offset();

        let (format, length) = match cursor.u32()? {
            0 => return Ok(None),
            EXTENDED_LENGTH => (RecordFormat::Dwarf64, cursor.u64()?),
            length => (RecordFormat::Dwarf32, length as u64),
        };

        if length > cursor.len() as u64 {
            return Err(ReadError::MalformedFrameSection {
                offset,
                reason: Malformed::LengthOverrun,
            });
        }

        let mut body = cursor.split(length as usize)?;
        let id_offset = body.offset();
        let kind = match body.u32()? {
            CIE_ID => RecordKind::Cie,
            pointer => match id_offset.checked_sub(pointer as u64) {
                Some(cie) => RecordKind::Fde { cie },
                None => {
                    return Err(ReadError::MalformedFrameSection {
                        offset,
                        reason: Malformed::CiePointerOutOfBounds,
                    })
                }
            },
        };

        self.pos += cursor.position();

        Ok(Some(RawRecord {
            offset,
            format,
            length,
            kind,
            body: body.remaining(),
            body_offset: body.offset(),
        }))
    }
}

impl<'a, O: ByteOrder> Iterator for Records<'a, O> {
    type Item = Result<RawRecord<'a>, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a, O: ByteOrder> FusedIterator for Records<'a, O> {}

/// A Common Information Entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cie {
    /// Section offset of the record.
    pub offset: u64,
    pub format: RecordFormat,
    pub length: u64,
    pub version: Version,

    /// The augmentation string, without its NUL terminator.
    pub augmentation: String,

    /// The augmentation features that were found in the augmentation string.
    pub flags: Augmentation,
    pub code_alignment_factor: u64,
    pub data_alignment_factor: i64,
    pub return_address_register: u64,

    /// The `R` encoding byte used for addresses in FDEs.
    pub fde_encoding: Option<u8>,

    /// The `L` encoding byte used for LSDA pointers in FDEs.
    pub lsda_encoding: Option<u8>,

    /// The `P` encoding byte of the personality pointer.
    pub personality_encoding: Option<u8>,
    pub personality: Option<Pointer>,

    /// Section offsets of the initial instructions.
    pub initial_instructions: Range<u64>,
}

impl Cie {
    /// The encoding used for `pc_begin` in FDEs that use this CIE.
    ///
    /// Defaults to `DW_EH_PE_absptr` when the CIE does not declare one.
    pub fn fde_pointer_encoding(&self) -> Result<PointerEncoding, ReadError> {
        match self.fde_encoding {
            Some(byte) => PointerEncoding::parse(byte).map(Option::unwrap_or_default),
            None => Ok(PointerEncoding::default()),
        }
    }
}

/// A Frame Description Entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fde {
    /// Section offset of the record.
    pub offset: u64,
    pub format: RecordFormat,
    pub length: u64,

    /// Section offset of the CIE used by this FDE.
    pub cie: u64,

    /// The address of the first instruction covered by this FDE.
    pub pc_begin: u64,

    /// The number of bytes of code covered by this FDE.
    pub pc_range: u64,
    pub lsda: Option<Pointer>,

    /// Section offsets of the augmentation data block.
    pub augmentation_data: Range<u64>,

    /// Section offsets of the call frame instructions.
    pub instructions: Range<u64>,
}

impl Fde {
    /// The first address after the code covered by this FDE.
    pub fn pc_end(&self) -> u64 {
        self.pc_begin.wrapping_add(self.pc_range)
    }

    pub fn contains(&self, address: u64) -> bool {
        (self.pc_begin..self.pc_end()).contains(&address)
    }
}

/// A problem that caused part of the section to be skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    /// Section offset of the record the problem was found in.
    pub offset: u64,
    pub error: ReadError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record at {:#x}: {}", self.offset, self.error)
    }
}

/// All CIEs and FDEs from an `.eh_frame` section, keyed by their offsets.
#[derive(Clone, Debug, Default)]
pub struct FrameTable {
    cies: BTreeMap<u64, Cie>,
    fdes: BTreeMap<u64, Fde>,
    diagnostics: Vec<Diagnostic>,
}

impl FrameTable {
    /// Iterate over all CIEs in section order.
    pub fn cies(&self) -> impl Iterator<Item = &Cie> + '_ {
        self.cies.values()
    }

    /// Iterate over all FDEs in section order.
    pub fn fdes(&self) -> impl Iterator<Item = &Fde> + '_ {
        self.fdes.values()
    }

    pub fn cie(&self, offset: u64) -> Option<&Cie> {
        self.cies.get(&offset)
    }

    pub fn fde(&self, offset: u64) -> Option<&Fde> {
        self.fdes.get(&offset)
    }

    /// The CIE used by `fde`.
    pub fn cie_for(&self, fde: &Fde) -> Option<&Cie> {
        self.cie(fde.cie)
    }

    /// Find the FDE covering `address`.
    pub fn fde_for_address(&self, address: u64) -> Option<&Fde> {
        // FDEs are not sorted by address so we need to do a linear search.
        self.fdes().find(|fde| fde.contains(address))
    }

    pub fn num_cies(&self) -> usize {
        self.cies.len()
    }

    pub fn num_fdes(&self) -> usize {
        self.fdes.len()
    }

    /// The problems that were recovered from while parsing.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn report(&mut self, offset: u64, error: ReadError) {
        report(&mut self.diagnostics, offset, error)
    }
}
