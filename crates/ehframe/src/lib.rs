//! `elf-ehframe` is a library for reading and writing the `.eh_frame`
//! exception handling sections described by the [Linux Standard Base][0].
//!
//! The `.eh_frame` section is a sequence of variable-length records. Common
//! Information Entries (CIEs) hold conventions shared by many functions, and
//! Frame Description Entries (FDEs) describe one contiguous range of code and
//! point back at the CIE they use. Addresses stored in the section are
//! compressed using `DW_EH_PE_*` pointer encodings which need to be resolved
//! against the address at which the section is loaded.
//!
//! [0]: https://refspecs.linuxfoundation.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/ehframechpt.html
//!
//! # Modules
//! - Types to read an `.eh_frame` section are available in the crate root.
//! - [`encoding`] - Pointer encodings and the resolver for encoded pointers.
//! - [`raw`] - Constants and raw types as they are defined by the format.
//! - [`write`][mod@write] - Generate a new `.eh_frame` section.

#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod augmentation;
mod cursor;
pub mod encoding;
mod error;
mod hdr;
pub mod raw;
mod read;
pub mod write;

pub use zerocopy::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

pub use self::augmentation::{transition, AugmentationAction, AugmentationState};
pub use self::encoding::{Application, Bases, Format, Pointer, PointerContext, PointerEncoding};
pub use self::error::{Malformed, ReadError};
pub use self::hdr::{EhFrameHdr, HdrEntry};
pub use self::read::*;
