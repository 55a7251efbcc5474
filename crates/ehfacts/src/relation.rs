use std::fmt;

/// The relations that exception information is projected into.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Relation {
    /// `cie_entry(cie_offset, version, code_alignment, data_alignment,
    /// return_address_register)`
    CieEntry,

    /// `cie_encoding(cie_offset, encoding_format, encoding_modifier)`
    ///
    /// The format is the low nibble of the FDE pointer encoding byte and the
    /// modifier is the high nibble, left in place.
    CieEncoding,

    /// `cie_personality(cie_offset, personality_address)`
    CiePersonality,

    /// `fde_pointer_locations(fde_offset, cie_offset, pointer_kind, address)`
    FdePointerLocations,

    /// `fde_entry(fde_offset, cie_offset, start_address, end_address)`
    FdeEntry,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Self::CieEntry,
        Self::CieEncoding,
        Self::CiePersonality,
        Self::FdePointerLocations,
        Self::FdeEntry,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CieEntry => "cie_entry",
            Self::CieEncoding => "cie_encoding",
            Self::CiePersonality => "cie_personality",
            Self::FdePointerLocations => "fde_pointer_locations",
            Self::FdeEntry => "fde_entry",
        }
    }

    /// The names of the fields of this relation, in order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::CieEntry => &[
                "cie_offset",
                "version",
                "code_alignment",
                "data_alignment",
                "return_address_register",
            ],
            Self::CieEncoding => &["cie_offset", "encoding_format", "encoding_modifier"],
            Self::CiePersonality => &["cie_offset", "personality_address"],
            Self::FdePointerLocations => &["fde_offset", "cie_offset", "pointer_kind", "address"],
            Self::FdeEntry => &["fde_offset", "cie_offset", "start_address", "end_address"],
        }
    }

    pub fn arity(self) -> usize {
        self.columns().len()
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
