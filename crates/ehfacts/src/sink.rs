//! Destinations for projected tuples.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{Relation, Tuple};

/// Receives tuples as they are produced.
pub trait TupleSink {
    fn insert(&mut self, relation: Relation, tuple: Tuple);
}

impl<S: TupleSink + ?Sized> TupleSink for &mut S {
    fn insert(&mut self, relation: Relation, tuple: Tuple) {
        (**self).insert(relation, tuple)
    }
}

/// An in-memory set of facts.
///
/// Inserting the same tuple twice has no effect. Iteration is ordered so that
/// output built from it is deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FactSet {
    relations: BTreeMap<Relation, BTreeSet<Tuple>>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the tuples of `relation` in order.
    pub fn get(&self, relation: Relation) -> impl Iterator<Item = &Tuple> + '_ {
        self.relations.get(&relation).into_iter().flatten()
    }

    pub fn contains(&self, relation: Relation, tuple: &Tuple) -> bool {
        self.relations
            .get(&relation)
            .is_some_and(|tuples| tuples.contains(tuple))
    }

    /// The number of tuples in `relation`.
    pub fn count(&self, relation: Relation) -> usize {
        self.relations.get(&relation).map_or(0, BTreeSet::len)
    }

    /// The total number of tuples across all relations.
    pub fn len(&self) -> usize {
        self.relations.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TupleSink for FactSet {
    fn insert(&mut self, relation: Relation, tuple: Tuple) {
        self.relations.entry(relation).or_default().insert(tuple);
    }
}

/// Collects facts and writes them out as one `<relation>.facts` file per
/// relation, with one tab separated tuple per line.
#[derive(Clone, Debug)]
pub struct FactsWriter {
    dir: PathBuf,
    facts: FactSet,
}

impl FactsWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            facts: FactSet::new(),
        }
    }

    pub fn facts(&self) -> &FactSet {
        &self.facts
    }

    /// The path of the file that `relation` is written to.
    pub fn path(&self, relation: Relation) -> PathBuf {
        self.dir.join(format!("{}.facts", relation.name()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write out every relation.
    ///
    /// Relations without any tuples still get an empty file.
    pub fn finish(self) -> io::Result<FactSet> {
        std::fs::create_dir_all(&self.dir)?;

        for relation in Relation::ALL {
            let path = self.path(relation);
            let mut w = BufWriter::new(File::create(&path)?);

            for tuple in self.facts.get(relation) {
                writeln!(w, "{tuple}")?;
            }

            w.flush()?;
            log::debug!(
                "wrote {} tuples to `{}`",
                self.facts.count(relation),
                path.display()
            );
        }

        Ok(self.facts)
    }
}

impl TupleSink for FactsWriter {
    fn insert(&mut self, relation: Relation, tuple: Tuple) {
        self.facts.insert(relation, tuple)
    }
}
