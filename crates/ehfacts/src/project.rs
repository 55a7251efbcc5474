//! Projection of a parsed frame table onto the fact relations.
//!
//! Every function here looks at a single record. Optional fields that are
//! absent produce no tuple at all.

use elf_ehframe::raw::{APPLICATION_MASK, DW_EH_PE_indirect, FORMAT_MASK};
use elf_ehframe::{Cie, Fde, FrameTable};

use crate::{Error, Field, Relation, Tuple, TupleSink};

/// The `pointer_kind` of LSDA pointers.
pub const LSDA: &str = "lsda";

pub fn cie_entry(cie: &Cie) -> Result<Tuple, Error> {
    Tuple::new(
        Relation::CieEntry,
        &[
            Field::Unsigned(cie.offset),
            Field::Unsigned(cie.version.0 as u64),
            Field::Unsigned(cie.code_alignment_factor),
            Field::Signed(cie.data_alignment_factor),
            Field::Unsigned(cie.return_address_register),
        ],
    )
}

pub fn cie_encoding(cie: &Cie) -> Result<Option<Tuple>, Error> {
    let Some(encoding) = cie.fde_encoding else {
        return Ok(None);
    };

    Tuple::new(
        Relation::CieEncoding,
        &[
            Field::Unsigned(cie.offset),
            Field::Unsigned((encoding & FORMAT_MASK) as u64),
            Field::Unsigned((encoding & (APPLICATION_MASK | DW_EH_PE_indirect)) as u64),
        ],
    )
    .map(Some)
}

pub fn cie_personality(cie: &Cie) -> Result<Option<Tuple>, Error> {
    let Some(personality) = cie.personality else {
        return Ok(None);
    };

    Tuple::new(
        Relation::CiePersonality,
        &[
            Field::Unsigned(cie.offset),
            Field::Unsigned(personality.address),
        ],
    )
    .map(Some)
}

pub fn fde_pointer_locations(fde: &Fde) -> Result<Option<Tuple>, Error> {
    let Some(lsda) = fde.lsda else {
        return Ok(None);
    };

    Tuple::new(
        Relation::FdePointerLocations,
        &[
            Field::Unsigned(fde.offset),
            Field::Unsigned(fde.cie),
            Field::Symbol(LSDA),
            Field::Unsigned(lsda.address),
        ],
    )
    .map(Some)
}

pub fn fde_entry(fde: &Fde) -> Result<Tuple, Error> {
    Tuple::new(
        Relation::FdeEntry,
        &[
            Field::Unsigned(fde.offset),
            Field::Unsigned(fde.cie),
            Field::Unsigned(fde.pc_begin),
            Field::Unsigned(fde.pc_end()),
        ],
    )
}

/// Push the facts for every record of `table` into `sink`.
pub fn project<S: TupleSink + ?Sized>(table: &FrameTable, sink: &mut S) -> Result<(), Error> {
    for cie in table.cies() {
        sink.insert(Relation::CieEntry, cie_entry(cie)?);

        if let Some(tuple) = cie_encoding(cie)? {
            sink.insert(Relation::CieEncoding, tuple);
        }

        if let Some(tuple) = cie_personality(cie)? {
            sink.insert(Relation::CiePersonality, tuple);
        }
    }

    for fde in table.fdes() {
        sink.insert(Relation::FdeEntry, fde_entry(fde)?);

        if let Some(tuple) = fde_pointer_locations(fde)? {
            sink.insert(Relation::FdePointerLocations, tuple);
        }
    }

    Ok(())
}
