use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use elf_ehframe::{
    Bases, BigEndian, ByteOrder, EhFrame, EhFrameHdr, FrameTable, LittleEndian, PointerEncoding,
};
use object::{Object, ObjectSection};

const HELP: &str = "\
Dump the exception handling information of an ELF object.

USAGE
    ehframedump [OPTIONS] <object file>

DESCRIPTION
    ehframedump prints the CIEs and FDEs contained in the .eh_frame section of
    an ELF object in a human readable format, followed by any problems that
    were found while decoding them.

FLAGS
    -h
    --help
        Print this help message and then exit.

    -x
    --hdr
        Also print the search table of the .eh_frame_hdr section and check it
        against the FDEs.
";

fn main() -> anyhow::Result<()> {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "show this help text");
    opts.optflag("x", "hdr", "dump the .eh_frame_hdr search table");

    let matches = opts.parse(std::env::args().skip(1))?;

    if matches.opt_present("help") {
        eprintln!("{HELP}");
        return Ok(());
    }

    if matches.free.is_empty() {
        anyhow::bail!("no object file input provided");
    }

    if matches.free.len() != 1 {
        anyhow::bail!("at most one object file can be provided as an input")
    }

    let path = Path::new(&matches.free[0]);
    let file = File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let data = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("failed to mmap `{}`", path.display()))?;
    let file = object::File::parse(&*data)
        .with_context(|| format!("failed to parse `{}`", path.display()))?;

    let section = match file.section_by_name(".eh_frame") {
        Some(section) => section,
        None => anyhow::bail!("elf binary has no .eh_frame section"),
    };

    let data = section
        .uncompressed_data()
        .context("failed to decompress the .eh_frame section")?;

    let bases = ehfacts::section_bases(&file);
    let hdr_section = match matches.opt_present("hdr") {
        true => file.section_by_name(".eh_frame_hdr"),
        false => None,
    };

    let address_size = match file.is_64() {
        true => 8,
        false => 4,
    };

    let stdout = std::io::stdout();
    let mut w = BufWriter::new(stdout.lock());

    match file.is_little_endian() {
        true => dump::<LittleEndian, _>(&mut w, &data, bases, address_size, hdr_section.as_ref()),
        false => dump::<BigEndian, _>(&mut w, &data, bases, address_size, hdr_section.as_ref()),
    }
}

fn dump<O: ByteOrder, W: Write>(
    w: &mut W,
    data: &[u8],
    bases: Bases,
    address_size: u8,
    hdr: Option<&object::Section>,
) -> anyhow::Result<()> {
    let mut table = EhFrame::<O>::new(data, bases)
        .address_size(address_size)
        .parse()
        .context("failed to decode .eh_frame section")?;

    let hdr = match hdr {
        Some(section) => {
            let data = section
                .uncompressed_data()
                .context("failed to decompress the .eh_frame_hdr section")?;
            let hdr = EhFrameHdr::parse::<O>(&data, section.address(), address_size)
                .context("failed to decode .eh_frame_hdr section")?;
            hdr.verify(&mut table, bases.eh_frame);
            Some(hdr)
        }
        None => None,
    };

    dump_table(w, &table, bases)?;

    if let Some(hdr) = &hdr {
        dump_hdr(w, hdr)?;
    }

    if !table.diagnostics().is_empty() {
        writeln!(w, "Problems:")?;
        for diagnostic in table.diagnostics() {
            writeln!(w, "  {diagnostic}")?;
        }
    }

    w.flush()?;
    Ok(())
}

fn encoding(byte: Option<u8>) -> String {
    match byte {
        Some(byte) => match PointerEncoding::parse(byte) {
            Ok(Some(encoding)) => format!("{encoding:?} ({byte:#04x})"),
            _ => format!("{byte:#04x}"),
        },
        None => "none".to_string(),
    }
}

fn dump_table<W: Write>(w: &mut W, table: &FrameTable, bases: Bases) -> anyhow::Result<()> {
    writeln!(w, "Section:")?;
    writeln!(w, "  Address:  {:#x}", bases.eh_frame)?;
    writeln!(w, "  Num CIEs: {}", table.num_cies())?;
    writeln!(w, "  Num FDEs: {}", table.num_fdes())?;
    writeln!(w)?;

    for cie in table.cies() {
        writeln!(w, "{:08x} {:08x} CIE", cie.offset, cie.length)?;
        writeln!(w, "  Version:               {}", cie.version.0)?;
        writeln!(w, "  Augmentation:          {:?}", cie.augmentation)?;
        writeln!(w, "  Code alignment factor: {}", cie.code_alignment_factor)?;
        writeln!(w, "  Data alignment factor: {}", cie.data_alignment_factor)?;
        writeln!(w, "  Return address column: {}", cie.return_address_register)?;
        writeln!(w, "  FDE encoding:          {}", encoding(cie.fde_encoding))?;
        writeln!(w, "  LSDA encoding:         {}", encoding(cie.lsda_encoding))?;

        if let Some(personality) = cie.personality {
            let marker = match personality.indirect {
                true => " [indirect]",
                false => "",
            };

            writeln!(
                w,
                "  Personality:           {:#x}{marker} ({})",
                personality.address,
                encoding(cie.personality_encoding)
            )?;
        }

        writeln!(w)?;
    }

    for fde in table.fdes() {
        writeln!(
            w,
            "{:08x} {:08x} FDE cie={:08x} pc={:#x}..{:#x}",
            fde.offset,
            fde.length,
            fde.cie,
            fde.pc_begin,
            fde.pc_end()
        )?;

        if let Some(lsda) = fde.lsda {
            writeln!(w, "  LSDA: {:#x}", lsda.address)?;
        }

        writeln!(
            w,
            "  Instructions: {} bytes",
            fde.instructions.end - fde.instructions.start
        )?;
    }

    writeln!(w)?;
    Ok(())
}

fn dump_hdr<W: Write>(w: &mut W, hdr: &EhFrameHdr) -> anyhow::Result<()> {
    writeln!(w, "Search table:")?;
    writeln!(w, "  Version:      {}", hdr.version)?;
    writeln!(w, "  eh_frame_ptr: {:#x}", hdr.eh_frame_ptr.address)?;
    writeln!(w, "  FDE count:    {}", hdr.fde_count())?;

    for entry in &hdr.table {
        writeln!(
            w,
            "  {:016x} -> {:016x}",
            entry.initial_location, entry.fde_address
        )?;
    }

    writeln!(w)?;
    Ok(())
}
