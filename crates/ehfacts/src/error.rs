//! Errors for exception information extraction.

use std::fmt;

use elf_ehframe::ReadError;

use crate::Relation;

#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The `.eh_frame` section was malformed.
    InvalidEhFrame(ReadError),

    /// The `.eh_frame_hdr` section could not be decoded.
    InvalidEhFrameHdr(ReadError),

    /// The contents of a section could not be read out of the object file.
    InvalidSection {
        name: String,
        error: object::Error,
    },

    /// The object file uses addresses that are neither 4 nor 8 bytes.
    UnsupportedAddressSize(u8),

    /// A tuple was built with the wrong number of fields for its relation.
    ArityMismatch {
        relation: Relation,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEhFrame(_) => f.write_str("invalid .eh_frame section"),
            Self::InvalidEhFrameHdr(_) => f.write_str("invalid .eh_frame_hdr section"),
            Self::InvalidSection { name, .. } => write!(f, "failed to read section `{name}`"),
            Self::UnsupportedAddressSize(size) => write!(f, "unsupported address size {size}"),
            Self::ArityMismatch {
                relation,
                expected,
                found,
            } => write!(
                f,
                "relation `{relation}` has {expected} fields but the tuple had {found}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidEhFrame(e) | Self::InvalidEhFrameHdr(e) => Some(e),
            Self::InvalidSection { error, .. } => Some(error),
            _ => None,
        }
    }
}
