//! Generate `.eh_frame` and `.eh_frame_hdr` sections.
//!
//! Records are emitted in the order they are added to the
//! [`EhFrameBuilder`], so it can produce every layout the reader has to deal
//! with: CIEs after their FDEs, padded records, extended lengths and
//! augmentation strings with unknown characters.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use tinyvec::ArrayVec;
use zerocopy::ByteOrder;

use crate::augmentation::{transition, AugmentationAction, AugmentationState};
use crate::encoding::{Application, Bases, Format, PointerContext, PointerEncoding};
use crate::raw::*;
use crate::{ReadError, RecordFormat};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EhFrameOptions {
    bases: Bases,
    address_size: u8,
}

impl EhFrameOptions {
    pub fn new(bases: Bases) -> Self {
        Self {
            bases,
            address_size: 8,
        }
    }

    /// Set the size of an address in bytes. Only 4 and 8 are valid.
    pub fn address_size(mut self, size: u8) -> Self {
        debug_assert!(size == 4 || size == 8, "invalid address size {size}");
        self.address_size = size;
        self
    }

    pub fn bases(&self) -> &Bases {
        &self.bases
    }

    fn context(&self, offset: u64) -> PointerContext<'_> {
        PointerContext::new(
            &self.bases,
            self.bases.eh_frame.wrapping_add(offset),
            self.address_size,
        )
    }
}

/// Identifies a CIE that was added to an [`EhFrameBuilder`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CieId(usize);

#[derive(Clone, Debug)]
pub struct CieBuilder {
    format: RecordFormat,
    version: Version,
    augmentation: Option<String>,
    code_alignment_factor: u64,
    data_alignment_factor: i64,
    return_address_register: u64,
    fde_encoding: Option<u8>,
    lsda_encoding: Option<u8>,
    personality: Option<(u8, u64)>,
    opaque: Vec<u8>,
    instructions: Vec<u8>,
    padding: usize,
}

impl CieBuilder {
    /// A CIE for x86-64 code using `pcrel | sdata4` FDE addresses.
    pub fn new() -> Self {
        Self {
            format: RecordFormat::Dwarf32,
            version: Version::V1,
            augmentation: None,
            code_alignment_factor: 1,
            data_alignment_factor: -8,
            return_address_register: 16,
            fde_encoding: Some(DW_EH_PE_pcrel | DW_EH_PE_sdata4),
            lsda_encoding: None,
            personality: None,
            opaque: Vec::new(),
            // DW_CFA_def_cfa: RSP +8, DW_CFA_offset: RIP -8
            instructions: Vec::from([0x0c, 0x07, 0x08, 0x90, 0x01]),
            padding: 0,
        }
    }

    /// Use an extended 64-bit length for this record.
    pub fn extended_length(mut self, extended: bool) -> Self {
        self.format = match extended {
            true => RecordFormat::Dwarf64,
            false => RecordFormat::Dwarf32,
        };
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Override the augmentation string.
    ///
    /// By default it is built from the fields that have been set, in `zPLR`
    /// order. Fields are emitted in the order their characters appear. The
    /// [opaque data] is emitted at the first character that is not one of
    /// `zPLR`.
    ///
    /// [opaque data]: CieBuilder::opaque_data
    pub fn augmentation(mut self, augmentation: &str) -> Self {
        self.augmentation = Some(augmentation.into());
        self
    }

    pub fn code_alignment_factor(mut self, factor: u64) -> Self {
        self.code_alignment_factor = factor;
        self
    }

    pub fn data_alignment_factor(mut self, factor: i64) -> Self {
        self.data_alignment_factor = factor;
        self
    }

    pub fn return_address_register(mut self, register: u64) -> Self {
        self.return_address_register = register;
        self
    }

    pub fn fde_encoding(mut self, encoding: impl Into<Option<u8>>) -> Self {
        self.fde_encoding = encoding.into();
        self
    }

    pub fn lsda_encoding(mut self, encoding: impl Into<Option<u8>>) -> Self {
        self.lsda_encoding = encoding.into();
        self
    }

    pub fn personality(mut self, encoding: u8, address: u64) -> Self {
        self.personality = Some((encoding, address));
        self
    }

    /// Bytes emitted for the first unrecognised augmentation character.
    pub fn opaque_data(mut self, data: &[u8]) -> Self {
        self.opaque = data.into();
        self
    }

    pub fn instructions(mut self, instructions: &[u8]) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Add `padding` zero bytes (`DW_CFA_nop`) to the end of the record.
    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    fn augmentation_string(&self) -> String {
        if let Some(augmentation) = &self.augmentation {
            return augmentation.clone();
        }

        let mut augmentation = String::new();
        if self.personality.is_none() && self.lsda_encoding.is_none() && self.fde_encoding.is_none()
        {
            return augmentation;
        }

        augmentation.push('z');
        if self.personality.is_some() {
            augmentation.push('P');
        }
        if self.lsda_encoding.is_some() {
            augmentation.push('L');
        }
        if self.fde_encoding.is_some() {
            augmentation.push('R');
        }

        augmentation
    }

    /// Work out how a reader will see FDEs using this CIE.
    fn layout(&self) -> Layout {
        let mut layout = Layout {
            data: false,
            fde_encoding: DW_EH_PE_absptr,
            lsda_encoding: None,
        };

        let mut state = AugmentationState::Start;
        for code in self.augmentation_string().bytes() {
            let (next, action) = transition(state, code);
            state = next;

            match action {
                AugmentationAction::ReadLength => layout.data = true,
                AugmentationAction::ReadFdeEncoding => {
                    layout.fde_encoding = self
                        .fde_encoding
                        .filter(|&byte| byte != DW_EH_PE_omit)
                        .unwrap_or(DW_EH_PE_absptr)
                }
                AugmentationAction::ReadLsdaEncoding => layout.lsda_encoding = self.lsda_encoding,
                _ => (),
            }
        }

        layout
    }
}

impl Default for CieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Layout {
    data: bool,
    fde_encoding: u8,
    lsda_encoding: Option<u8>,
}

#[derive(Clone, Debug)]
pub struct FdeBuilder {
    cie: CieId,
    format: RecordFormat,
    pc_begin: u64,
    pc_range: u64,
    lsda: Option<u64>,
    augmentation_data: Option<Vec<u8>>,
    instructions: Vec<u8>,
    padding: usize,
    cie_pointer: Option<u32>,
}

impl FdeBuilder {
    pub fn new(cie: CieId, pc_begin: u64, pc_range: u64) -> Self {
        Self {
            cie,
            format: RecordFormat::Dwarf32,
            pc_begin,
            pc_range,
            lsda: None,
            augmentation_data: None,
            instructions: Vec::new(),
            padding: 0,
            cie_pointer: None,
        }
    }

    pub fn extended_length(mut self, extended: bool) -> Self {
        self.format = match extended {
            true => RecordFormat::Dwarf64,
            false => RecordFormat::Dwarf32,
        };
        self
    }

    /// Set the LSDA pointer. The CIE needs to declare an LSDA encoding for it
    /// to be emitted.
    pub fn lsda(mut self, address: u64) -> Self {
        self.lsda = Some(address);
        self
    }

    /// Emit these bytes as the augmentation data instead of the LSDA pointer.
    pub fn augmentation_data(mut self, data: &[u8]) -> Self {
        self.augmentation_data = Some(data.into());
        self
    }

    pub fn instructions(mut self, instructions: &[u8]) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Store `pointer` as the CIE pointer instead of the one for its CIE.
    pub fn cie_pointer(mut self, pointer: u32) -> Self {
        self.cie_pointer = Some(pointer);
        self
    }
}

#[derive(Clone, Debug)]
enum Entry {
    Cie(CieId),
    Fde(FdeBuilder),
}

#[derive(Clone, Debug)]
pub struct EhFrameBuilder {
    options: EhFrameOptions,
    cies: Vec<CieBuilder>,
    entries: Vec<Entry>,
    terminator: bool,
}

struct Emitted {
    section: Vec<u8>,

    /// `(pc_begin, offset)` of every FDE.
    fdes: Vec<(u64, u64)>,
}

impl EhFrameBuilder {
    pub fn new(options: EhFrameOptions) -> Self {
        Self {
            options,
            cies: Vec::new(),
            entries: Vec::new(),
            terminator: true,
        }
    }

    pub fn options(&self) -> EhFrameOptions {
        self.options
    }

    /// Append a CIE to the section.
    pub fn cie(&mut self, cie: CieBuilder) -> CieId {
        let id = CieId(self.cies.len());
        self.cies.push(cie);
        self.entries.push(Entry::Cie(id));
        id
    }

    /// Append an FDE to the section.
    pub fn fde(&mut self, fde: FdeBuilder) {
        self.entries.push(Entry::Fde(fde));
    }

    /// Whether to end the section with a zero-length terminator.
    ///
    /// Defaults to true.
    pub fn terminator(&mut self, terminator: bool) {
        self.terminator = terminator;
    }

    /// Emit the `.eh_frame` section.
    pub fn build<O: ByteOrder>(&self) -> Result<Vec<u8>, EmitError> {
        self.emit::<O>().map(|emitted| emitted.section)
    }

    /// Emit an `.eh_frame_hdr` section loaded at `address` that indexes the
    /// FDEs of this section.
    pub fn build_hdr<O: ByteOrder>(&self, address: u64) -> Result<Vec<u8>, EmitError> {
        let mut fdes = self.emit::<O>()?.fdes;
        fdes.sort_unstable();

        let eh_frame_ptr_enc = DW_EH_PE_pcrel | DW_EH_PE_sdata4;
        let fde_count_enc = DW_EH_PE_udata4;
        let table_enc = DW_EH_PE_datarel | DW_EH_PE_sdata4;

        let bases = Bases::new(address).eh_frame_hdr(address).data(address);
        let size = self.options.address_size;
        let context = |offset: usize| PointerContext::new(&bases, address + offset as u64, size);
        let table = PointerEncoding::new(Format::Sdata4, Application::DataRel);

        let mut out = Vec::new();
        out.extend_from_slice(&[1, eh_frame_ptr_enc, fde_count_enc, table_enc]);

        let encoding = PointerEncoding::new(Format::Sdata4, Application::PcRel);
        let eh_frame = self.options.bases.eh_frame;
        let ctx = context(out.len());
        encode_pointer::<O>(&mut out, encoding, eh_frame, &ctx)?;
        encode_value::<O>(&mut out, Format::Udata4, fdes.len() as u64, size)?;

        for (pc_begin, offset) in fdes {
            let ctx = context(out.len());
            encode_pointer::<O>(&mut out, table, pc_begin, &ctx)?;
            let ctx = context(out.len());
            encode_pointer::<O>(&mut out, table, eh_frame + offset, &ctx)?;
        }

        Ok(out)
    }

    fn emit<O: ByteOrder>(&self) -> Result<Emitted, EmitError> {
        let mut out = Vec::new();
        let mut fdes = Vec::new();
        let mut offsets = Vec::new();
        offsets.resize(self.cies.len(), None);

        for entry in &self.entries {
            match entry {
                Entry::Cie(id) => {
                    offsets[id.0] = Some(out.len() as u64);
                    self.emit_cie::<O>(&mut out, &self.cies[id.0])?;
                }
                Entry::Fde(fde) => {
                    let cie = self.cies.get(fde.cie.0).ok_or(EmitError::UnknownCie)?;
                    fdes.push((fde.pc_begin, out.len() as u64));
                    self.emit_fde::<O>(&mut out, fde, cie, offsets[fde.cie.0])?;
                }
            }
        }

        if self.terminator {
            out.extend_from_slice(&[0; 4]);
        }

        Ok(Emitted { section: out, fdes })
    }

    fn emit_cie<O: ByteOrder>(&self, out: &mut Vec<u8>, cie: &CieBuilder) -> Result<(), EmitError> {
        let start = begin_record::<O>(out, cie.format);
        push_u32::<O>(out, CIE_ID);

        let augmentation = cie.augmentation_string();
        out.push(cie.version.0);
        out.extend_from_slice(augmentation.as_bytes());
        out.push(0);
        out.extend_from_slice(&uleb128(cie.code_alignment_factor));
        out.extend_from_slice(&sleb128(cie.data_alignment_factor));

        match cie.version {
            Version::V1 => {
                let register = u8::try_from(cie.return_address_register)
                    .map_err(|_| EmitError::RegisterOutOfRange(cie.return_address_register))?;
                out.push(register);
            }
            _ => out.extend_from_slice(&uleb128(cie.return_address_register)),
        }

        if augmentation.starts_with('z') {
            length_prefixed(out, |data, start| {
                for code in augmentation.bytes().skip(1) {
                    match code {
                        b'P' => {
                            let (byte, address) = cie.personality.unwrap_or((DW_EH_PE_omit, 0));
                            data.push(byte);

                            if let Some(encoding) = PointerEncoding::parse(byte)? {
                                let ctx = self.options.context(start + data.len() as u64);
                                encode_pointer::<O>(data, encoding, address, &ctx)?;
                            }
                        }
                        b'L' => data.push(cie.lsda_encoding.unwrap_or(DW_EH_PE_omit)),
                        b'R' => data.push(cie.fde_encoding.unwrap_or(DW_EH_PE_absptr)),
                        _ => {
                            data.extend_from_slice(&cie.opaque);
                            break;
                        }
                    }
                }

                Ok(())
            })?;
        }

        out.extend_from_slice(&cie.instructions);
        out.resize(out.len() + cie.padding, 0);
        finish_record::<O>(out, start, cie.format)
    }

    fn emit_fde<O: ByteOrder>(
        &self,
        out: &mut Vec<u8>,
        fde: &FdeBuilder,
        cie: &CieBuilder,
        cie_offset: Option<u64>,
    ) -> Result<(), EmitError> {
        let start = begin_record::<O>(out, fde.format);

        let pointer_field = out.len() as u64;
        let cie_pointer = match (fde.cie_pointer, cie_offset) {
            (Some(pointer), _) => pointer,
            (None, Some(offset)) => {
                let distance = pointer_field - offset;
                u32::try_from(distance).map_err(|_| EmitError::CieTooFar(distance))?
            }
            (None, None) => return Err(EmitError::UnknownCie),
        };
        push_u32::<O>(out, cie_pointer);

        let layout = cie.layout();
        let encoding = PointerEncoding::parse(layout.fde_encoding)?.unwrap_or_default();
        let ctx = self.options.context(out.len() as u64);
        encode_pointer::<O>(out, encoding, fde.pc_begin, &ctx)?;
        let ctx = self.options.context(out.len() as u64);
        encode_pointer::<O>(out, encoding.value_only(), fde.pc_range, &ctx)?;

        if layout.data {
            length_prefixed(out, |data, start| {
                if let Some(bytes) = &fde.augmentation_data {
                    data.extend_from_slice(bytes);
                    return Ok(());
                }

                let Some(byte) = layout.lsda_encoding else {
                    return Ok(());
                };
                let Some(encoding) = PointerEncoding::parse(byte)? else {
                    return Ok(());
                };

                match fde.lsda {
                    Some(address) => {
                        let ctx = self
                            .options
                            .context(start + data.len() as u64)
                            .function(fde.pc_begin);
                        encode_pointer::<O>(data, encoding, address, &ctx)
                    }
                    None => encode_value::<O>(data, encoding.format(), 0, self.options.address_size),
                }
            })?;
        }

        out.extend_from_slice(&fde.instructions);
        out.resize(out.len() + fde.padding, 0);
        finish_record::<O>(out, start, fde.format)
    }
}

fn begin_record<O: ByteOrder>(out: &mut Vec<u8>, format: RecordFormat) -> usize {
    let start = out.len();
    match format {
        RecordFormat::Dwarf32 => out.extend_from_slice(&[0; 4]),
        RecordFormat::Dwarf64 => {
            push_u32::<O>(out, EXTENDED_LENGTH);
            out.extend_from_slice(&[0; 8]);
        }
    }
    start
}

fn finish_record<O: ByteOrder>(
    out: &mut [u8],
    start: usize,
    format: RecordFormat,
) -> Result<(), EmitError> {
    let len = (out.len() - start - format.length_size()) as u64;

    match format {
        RecordFormat::Dwarf32 => {
            let len = u32::try_from(len)
                .ok()
                .filter(|&len| len != EXTENDED_LENGTH)
                .ok_or(EmitError::RecordTooLarge)?;
            O::write_u32(&mut out[start..start + 4], len);
        }
        RecordFormat::Dwarf64 => O::write_u64(&mut out[start + 4..start + 12], len),
    }

    Ok(())
}

/// Emit a ULEB128 length followed by the data produced by `body`.
///
/// `body` is given the section offset its data will start at. The length
/// prefix can change size with the data, so `body` may be run more than once.
fn length_prefixed<F>(out: &mut Vec<u8>, mut body: F) -> Result<(), EmitError>
where
    F: FnMut(&mut Vec<u8>, u64) -> Result<(), EmitError>,
{
    let mut prefix_len = 1;

    loop {
        let mut data = Vec::new();
        body(&mut data, (out.len() + prefix_len) as u64)?;

        let prefix = uleb128(data.len() as u64);
        if prefix.len() == prefix_len {
            out.extend_from_slice(&prefix);
            out.extend_from_slice(&data);
            return Ok(());
        }

        prefix_len = prefix.len();
    }
}

fn push_u16<O: ByteOrder>(out: &mut Vec<u8>, value: u16) {
    let mut bytes = [0; 2];
    O::write_u16(&mut bytes, value);
    out.extend_from_slice(&bytes);
}

fn push_u32<O: ByteOrder>(out: &mut Vec<u8>, value: u32) {
    let mut bytes = [0; 4];
    O::write_u32(&mut bytes, value);
    out.extend_from_slice(&bytes);
}

fn push_u64<O: ByteOrder>(out: &mut Vec<u8>, value: u64) {
    let mut bytes = [0; 8];
    O::write_u64(&mut bytes, value);
    out.extend_from_slice(&bytes);
}

/// Encode an unsigned LEB128 value.
pub fn uleb128(mut value: u64) -> ArrayVec<[u8; 10]> {
    let mut bytes = ArrayVec::new();

    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;

        if value == 0 {
            bytes.push(byte);
            return bytes;
        }

        bytes.push(byte | 0x80);
    }
}

/// Encode a signed LEB128 value.
pub fn sleb128(mut value: i64) -> ArrayVec<[u8; 10]> {
    let mut bytes = ArrayVec::new();

    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;

        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            bytes.push(byte);
            return bytes;
        }

        bytes.push(byte | 0x80);
    }
}

/// Store `raw` in `format` without applying anything to it.
pub fn encode_value<O: ByteOrder>(
    out: &mut Vec<u8>,
    format: Format,
    raw: u64,
    address_size: u8,
) -> Result<(), EmitError> {
    let signed = match address_size {
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    };
    let out_of_range = || EmitError::ValueOutOfRange { value: raw, format };

    match format {
        Format::AbsPtr | Format::Signed => match address_size {
            4 => push_u32::<O>(out, raw as u32),
            _ => push_u64::<O>(out, raw),
        },
        Format::Udata2 => push_u16::<O>(out, u16::try_from(raw).map_err(|_| out_of_range())?),
        Format::Udata4 => push_u32::<O>(out, u32::try_from(raw).map_err(|_| out_of_range())?),
        Format::Udata8 => push_u64::<O>(out, raw),
        Format::Sdata2 => {
            let value = i16::try_from(signed).map_err(|_| out_of_range())?;
            push_u16::<O>(out, value as u16)
        }
        Format::Sdata4 => {
            let value = i32::try_from(signed).map_err(|_| out_of_range())?;
            push_u32::<O>(out, value as u32)
        }
        Format::Sdata8 => push_u64::<O>(out, raw),
        Format::Uleb128 => out.extend_from_slice(&uleb128(raw)),
        Format::Sleb128 => out.extend_from_slice(&sleb128(signed)),
    }

    Ok(())
}

/// Encode `address` so that resolving it at `ctx` gives back `address`.
///
/// This is the inverse of [`resolve`](crate::encoding::resolve).
pub fn encode_pointer<O: ByteOrder>(
    out: &mut Vec<u8>,
    encoding: PointerEncoding,
    address: u64,
    ctx: &PointerContext<'_>,
) -> Result<(), EmitError> {
    let base = ctx.base(encoding.application())?;
    let raw = ctx.truncate(address.wrapping_sub(base));

    encode_value::<O>(out, encoding.format(), raw, ctx.address_size)
}

#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EmitError {
    /// A value does not fit in the format it is being encoded in.
    ValueOutOfRange { value: u64, format: Format },

    /// An encoding could not be used, or its base address was not provided.
    Encoding(ReadError),

    /// A version 1 CIE can only store a return address register below 256.
    RegisterOutOfRange(u64),

    /// An FDE refers to a CIE that has not been emitted before it.
    UnknownCie,

    /// A record is too large for a 32-bit length.
    RecordTooLarge,

    /// An FDE is further from its CIE than a 4-byte CIE pointer can reach.
    CieTooFar(u64),
}

impl From<ReadError> for EmitError {
    fn from(error: ReadError) -> Self {
        Self::Encoding(error)
    }
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange { value, format } => {
                write!(f, "value {value:#x} cannot be encoded as {format:?}")
            }
            Self::Encoding(error) => error.fmt(f),
            Self::RegisterOutOfRange(register) => {
                write!(f, "return address register {register} does not fit in a version 1 CIE")
            }
            Self::UnknownCie => f.write_str("FDE refers to a CIE that has not been emitted"),
            Self::RecordTooLarge => f.write_str("record is too large for a 32-bit length"),
            Self::CieTooFar(distance) => {
                write!(f, "FDE is {distance:#x} bytes after its CIE, out of reach of a CIE pointer")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EmitError {}
