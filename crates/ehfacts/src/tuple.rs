use std::fmt;

use tinyvec::ArrayVec;

use crate::{Error, Relation};

/// The largest arity of any relation.
pub const MAX_ARITY: usize = 5;

/// A single typed field of a tuple.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Field {
    Unsigned(u64),
    Signed(i64),
    Symbol(&'static str),
}

impl Default for Field {
    fn default() -> Self {
        Self::Unsigned(0)
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Self::Signed(value)
    }
}

impl From<&'static str> for Field {
    fn from(value: &'static str) -> Self {
        Self::Symbol(value)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(value) => value.fmt(f),
            Self::Signed(value) => value.fmt(f),
            Self::Symbol(value) => f.write_str(value),
        }
    }
}

/// An ordered list of fields belonging to one relation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Tuple(ArrayVec<[Field; MAX_ARITY]>);

impl Tuple {
    /// Build a tuple for `relation`, checking that it has the right number of
    /// fields.
    pub fn new(relation: Relation, fields: &[Field]) -> Result<Self, Error> {
        if fields.len() != relation.arity() {
            return Err(Error::ArityMismatch {
                relation,
                expected: relation.arity(),
                found: fields.len(),
            });
        }

        let mut tuple = ArrayVec::new();
        tuple.extend_from_slice(fields);
        Ok(Self(tuple))
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Formats the tuple as tab separated fields.
impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, field) in self.0.iter().enumerate() {
            if index != 0 {
                f.write_str("\t")?;
            }

            field.fmt(f)?;
        }

        Ok(())
    }
}
