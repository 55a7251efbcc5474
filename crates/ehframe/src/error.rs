use core::fmt;

use crate::encoding::Application;

/// Why a section was rejected as malformed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Malformed {
    /// The section ended in the middle of a record or field.
    UnexpectedEof,

    /// The declared length of a record runs past the end of the section.
    LengthOverrun,

    /// An FDE's CIE pointer refers to a location before the start of the
    /// section.
    CiePointerOutOfBounds,

    /// A string was missing its NUL terminator.
    UnterminatedString,
}

#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadError {
    /// A record header is cut off by the end of the section, or its length or
    /// CIE pointer points outside the section.
    ///
    /// This is fatal to the whole parse.
    MalformedFrameSection { offset: u64, reason: Malformed },

    /// An FDE's CIE pointer did not refer to any CIE that has been parsed.
    DanglingFdeReference { fde: u64, cie: u64 },

    /// Found a pointer encoding byte that is not supported.
    UnsupportedEncoding(u8),

    /// A pointer used a relative encoding but the base address it is relative
    /// to was not provided.
    MissingBaseAddress(Application),

    /// An FDE's start address resolved to zero, or to an address outside the
    /// image.
    InvalidStartAddress { fde: u64, address: u64 },

    /// A CIE declared a version other than 1 or 3.
    UnsupportedCieVersion { cie: u64, version: u8 },

    /// The `.eh_frame_hdr` section declared a version other than 1.
    UnsupportedHdrVersion(u8),

    /// Augmentation data could not be decoded and the rest of it was skipped.
    InvalidAugmentationData { offset: u64 },

    /// A field runs past the declared length of its record. The record is
    /// skipped but the records after it are unaffected.
    TruncatedRecord { offset: u64 },

    /// A decoded field ran past the end of the bytes that were provided.
    UnexpectedEof,

    /// An entry of the `.eh_frame_hdr` search table does not match any FDE.
    HdrMismatch {
        initial_location: u64,
        fde_address: u64,
    },
}

impl ReadError {
    /// Whether this error aborts the whole parse.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedFrameSection { .. })
    }
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::UnexpectedEof => "unexpected end of section",
            Self::LengthOverrun => "record length runs past the end of the section",
            Self::CiePointerOutOfBounds => "CIE pointer refers to before the start of the section",
            Self::UnterminatedString => "string is missing its NUL terminator",
        };

        f.write_str(msg)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrameSection { offset, reason } => {
                write!(f, "malformed frame section at {offset:#x}: {reason}")
            }
            Self::DanglingFdeReference { fde, cie } => write!(
                f,
                "FDE at {fde:#x} refers to CIE at {cie:#x} which does not exist"
            ),
            Self::UnsupportedEncoding(byte) => write!(f, "unsupported pointer encoding {byte:#04x}"),
            Self::MissingBaseAddress(application) => write!(
                f,
                "no base address was provided for {application} pointers"
            ),
            Self::InvalidStartAddress { fde, address } => write!(
                f,
                "FDE at {fde:#x} has an invalid start address {address:#x}"
            ),
            Self::UnsupportedCieVersion { cie, version } => {
                write!(f, "CIE at {cie:#x} has unsupported version {version}")
            }
            Self::UnsupportedHdrVersion(version) => {
                write!(f, "unsupported .eh_frame_hdr version {version}")
            }
            Self::InvalidAugmentationData { offset } => write!(
                f,
                "augmentation data at {offset:#x} could not be decoded and was skipped"
            ),
            Self::TruncatedRecord { offset } => {
                write!(f, "field at {offset:#x} runs past the end of its record")
            }
            Self::UnexpectedEof => f.write_str("encoded value runs past the end of its input"),
            Self::HdrMismatch {
                initial_location,
                fde_address,
            } => write!(
                f,
                ".eh_frame_hdr entry for {initial_location:#x} does not match the FDE at \
                 {fde_address:#x}"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ReadError {}
