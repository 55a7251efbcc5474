use ehfacts::{project, FactSet, FactsWriter, Field, Relation, Tuple, TupleSink};
use elf_ehframe::raw::*;
use elf_ehframe::write::{CieBuilder, EhFrameBuilder, EhFrameOptions, FdeBuilder};
use elf_ehframe::{Bases, EhFrame, FrameTable, LittleEndian};

fn bases() -> Bases {
    Bases::new(0x2000).text(0x1000)
}

fn tuple(relation: Relation, fields: &[Field]) -> Tuple {
    Tuple::new(relation, fields).unwrap()
}

/// Three CIEs: a plain one, one with a personality and LSDAs, and one
/// without any augmentation.
fn table() -> anyhow::Result<FrameTable> {
    let mut builder = EhFrameBuilder::new(EhFrameOptions::new(bases()));
    let plain = builder.cie(CieBuilder::new());
    let eh = builder.cie(
        CieBuilder::new()
            .personality(DW_EH_PE_indirect | DW_EH_PE_pcrel | DW_EH_PE_sdata4, 0x5000)
            .lsda_encoding(DW_EH_PE_pcrel | DW_EH_PE_sdata4),
    );
    let bare = builder.cie(CieBuilder::new().fde_encoding(None::<u8>));

    builder.fde(FdeBuilder::new(plain, 0x1000, 0x40));
    builder.fde(FdeBuilder::new(eh, 0x1040, 0x40).lsda(0x6000));
    builder.fde(FdeBuilder::new(eh, 0x1080, 0x40));
    builder.fde(FdeBuilder::new(bare, 0x1100, 0x10));

    let data = builder.build::<LittleEndian>()?;
    Ok(EhFrame::<LittleEndian>::new(&data, bases()).parse()?)
}

#[test]
fn projects_every_relation() -> anyhow::Result<()> {
    let table = table()?;
    let mut facts = FactSet::new();
    project::project(&table, &mut facts)?;

    assert_eq!(facts.count(Relation::CieEntry), 3);
    assert_eq!(facts.count(Relation::CieEncoding), 2);
    assert_eq!(facts.count(Relation::CiePersonality), 1);
    assert_eq!(facts.count(Relation::FdeEntry), 4);
    assert_eq!(facts.count(Relation::FdePointerLocations), 1);

    let cies: Vec<_> = table.cies().collect();
    let (plain, eh) = (cies[0].offset, cies[1].offset);

    assert!(facts.contains(
        Relation::CieEntry,
        &tuple(
            Relation::CieEntry,
            &[
                Field::Unsigned(plain),
                Field::Unsigned(1),
                Field::Unsigned(1),
                Field::Signed(-8),
                Field::Unsigned(16),
            ]
        )
    ));
    assert!(facts.contains(
        Relation::CieEncoding,
        &tuple(
            Relation::CieEncoding,
            &[Field::Unsigned(plain), Field::Unsigned(0x0b), Field::Unsigned(0x10)]
        )
    ));
    assert!(facts.contains(
        Relation::CiePersonality,
        &tuple(
            Relation::CiePersonality,
            &[Field::Unsigned(eh), Field::Unsigned(0x5000)]
        )
    ));

    let lsda = table.fde_for_address(0x1040).unwrap();
    assert!(facts.contains(
        Relation::FdePointerLocations,
        &tuple(
            Relation::FdePointerLocations,
            &[
                Field::Unsigned(lsda.offset),
                Field::Unsigned(eh),
                Field::Symbol("lsda"),
                Field::Unsigned(0x6000),
            ]
        )
    ));
    assert!(facts.contains(
        Relation::FdeEntry,
        &tuple(
            Relation::FdeEntry,
            &[
                Field::Unsigned(lsda.offset),
                Field::Unsigned(eh),
                Field::Unsigned(0x1040),
                Field::Unsigned(0x1080),
            ]
        )
    ));

    Ok(())
}

#[test]
fn every_fde_references_a_cie_entry() -> anyhow::Result<()> {
    let table = table()?;
    let mut facts = FactSet::new();
    project::project(&table, &mut facts)?;

    let cies: Vec<Field> = facts
        .get(Relation::CieEntry)
        .map(|tuple| tuple.fields()[0])
        .collect();

    for relation in [Relation::FdeEntry, Relation::FdePointerLocations] {
        for tuple in facts.get(relation) {
            assert!(cies.contains(&tuple.fields()[1]), "{relation}: {tuple}");
        }
    }

    for tuple in facts.get(Relation::FdeEntry) {
        assert_eq!(tuple.len(), Relation::FdeEntry.arity());
    }

    Ok(())
}

#[test]
fn duplicate_inserts_are_ignored() -> anyhow::Result<()> {
    let table = table()?;
    let mut facts = FactSet::new();
    project::project(&table, &mut facts)?;
    let once = facts.clone();

    project::project(&table, &mut facts)?;
    assert_eq!(facts, once);
    assert_eq!(facts.len(), 11);

    Ok(())
}

#[test]
fn skipped_records_produce_no_facts() -> anyhow::Result<()> {
    let mut builder = EhFrameBuilder::new(EhFrameOptions::new(bases()));
    let cie = builder.cie(CieBuilder::new());
    builder.fde(FdeBuilder::new(cie, 0x1000, 0x40).cie_pointer(4));
    builder.fde(FdeBuilder::new(cie, 0, 0x40));
    builder.fde(FdeBuilder::new(cie, 0x1040, 0x40));

    let data = builder.build::<LittleEndian>()?;
    let table = EhFrame::<LittleEndian>::new(&data, bases()).parse()?;
    assert_eq!(table.diagnostics().len(), 2);

    let mut facts = FactSet::new();
    project::project(&table, &mut facts)?;

    let fdes: Vec<_> = facts.get(Relation::FdeEntry).collect();
    assert_eq!(fdes.len(), 1);
    assert_eq!(fdes[0].fields()[2], Field::Unsigned(0x1040));

    Ok(())
}

#[derive(Default)]
struct Counter(usize);

impl TupleSink for Counter {
    fn insert(&mut self, _: Relation, _: Tuple) {
        self.0 += 1;
    }
}

#[test]
fn custom_sink_sees_every_tuple() -> anyhow::Result<()> {
    let table = table()?;
    let mut counter = Counter::default();
    project::project(&table, &mut counter)?;

    assert_eq!(counter.0, 11);

    Ok(())
}

#[test]
fn writes_facts_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let table = table()?;

    let mut writer = FactsWriter::new(dir.path().join("facts"));
    project::project(&table, &mut writer)?;
    let facts = writer.finish()?;
    assert_eq!(facts.len(), 11);

    for relation in Relation::ALL {
        let path = dir.path().join("facts").join(format!("{relation}.facts"));
        let contents = std::fs::read_to_string(&path)?;

        assert_eq!(contents.lines().count(), facts.count(relation), "{relation}");
        for line in contents.lines() {
            assert_eq!(line.split('\t').count(), relation.arity());
        }
    }

    let personality = std::fs::read_to_string(dir.path().join("facts/cie_personality.facts"))?;
    let eh = table.cies().nth(1).unwrap().offset;
    assert_eq!(personality, format!("{eh}\t20480\n"));

    Ok(())
}
