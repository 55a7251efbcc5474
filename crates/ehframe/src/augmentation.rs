//! The state machine that drives decoding of CIE augmentation data.
//!
//! Each character of the augmentation string says which field comes next in
//! the augmentation data. The machine is run one character at a time and
//! returns the action the reader should take for it.

/// The state of the augmentation string decoder.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AugmentationState {
    /// No characters seen yet.
    Start,

    /// Past the leading `z`; characters describe fields of the data block.
    Fields,

    /// An unknown character was seen. Its data, and that of everything after
    /// it, cannot be located so the rest of the block is skipped.
    Opaque,

    /// The string did not begin with `z`. There is no way to know how much
    /// augmentation data there is so none is read.
    Malformed,
}

/// What to do for one augmentation string character.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AugmentationAction {
    /// `z`: read the ULEB128 length of the augmentation data block.
    ReadLength,

    /// `P`: read the personality encoding byte and the pointer after it.
    ReadPersonality,

    /// `L`: read the LSDA encoding byte.
    ReadLsdaEncoding,

    /// `R`: read the FDE pointer encoding byte.
    ReadFdeEncoding,

    /// Skip whatever is left of the data block.
    SkipRest,

    /// Nothing to read.
    Ignore,
}

/// Advance the machine by one character of the augmentation string.
pub fn transition(
    state: AugmentationState,
    code: u8,
) -> (AugmentationState, AugmentationAction) {
    use AugmentationAction::*;
    use AugmentationState::*;

    match (state, code) {
        (Start, b'z') => (Fields, ReadLength),
        (Start, _) => (Malformed, Ignore),
        (Fields, b'P') => (Fields, ReadPersonality),
        (Fields, b'L') => (Fields, ReadLsdaEncoding),
        (Fields, b'R') => (Fields, ReadFdeEncoding),
        (Fields, _) => (Opaque, SkipRest),
        (Opaque, _) => (Opaque, Ignore),
        (Malformed, _) => (Malformed, Ignore),
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn run(string: &[u8]) -> (AugmentationState, Vec<AugmentationAction>) {
        let mut state = AugmentationState::Start;
        let mut actions = Vec::new();

        for &code in string {
            let (next, action) = transition(state, code);
            state = next;
            actions.push(action);
        }

        (state, actions)
    }

    #[test]
    fn zplr_in_declared_order() {
        use AugmentationAction::*;

        let (state, actions) = run(b"zPLR");
        assert_eq!(state, AugmentationState::Fields);
        assert_eq!(
            actions,
            [ReadLength, ReadPersonality, ReadLsdaEncoding, ReadFdeEncoding]
        );

        let (_, actions) = run(b"zRLP");
        assert_eq!(
            actions,
            [ReadLength, ReadFdeEncoding, ReadLsdaEncoding, ReadPersonality]
        );
    }

    #[test]
    fn unknown_character_makes_rest_opaque() {
        use AugmentationAction::*;

        let (state, actions) = run(b"zRSP");
        assert_eq!(state, AugmentationState::Opaque);
        assert_eq!(actions, [ReadLength, ReadFdeEncoding, SkipRest, Ignore]);
    }

    #[test]
    fn missing_z_is_malformed() {
        let (state, actions) = run(b"eh");
        assert_eq!(state, AugmentationState::Malformed);
        assert!(actions.iter().all(|&a| a == AugmentationAction::Ignore));

        // A later `z` does not recover.
        let (state, _) = run(b"Rz");
        assert_eq!(state, AugmentationState::Malformed);
    }

    #[test]
    fn empty_string() {
        let (state, actions) = run(b"");
        assert_eq!(state, AugmentationState::Start);
        assert!(actions.is_empty());
    }
}
