use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ehfacts::{ExceptionDecoder, FactsWriter, Options};

#[derive(Debug, Parser)]
struct Args {
    input: PathBuf,

    /// Directory that the `.facts` files are written to.
    #[arg(long, short)]
    output: PathBuf,

    /// Print a warning for every record that had to be skipped.
    #[arg(long)]
    warnings: bool,

    /// Do not check the FDEs against the `.eh_frame_hdr` search table.
    #[arg(long)]
    no_hdr_check: bool,

    /// Keep FDEs that start outside of the loadable segments.
    #[arg(long)]
    no_image_check: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let path = args.input;

    let file = File::open(&path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let data = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("failed to mmap `{}`", path.display()))?;
    let file = object::File::parse(&*data)
        .with_context(|| format!("failed to parse `{}`", path.display()))?;

    let options = Options::new()
        .hdr_check(!args.no_hdr_check)
        .image_check(!args.no_image_check)
        .warnings(args.warnings);
    let decoder = ExceptionDecoder::new(&file, &options).with_context(|| {
        format!(
            "failed to decode the exception information of `{}`",
            path.display()
        )
    })?;

    let mut writer = FactsWriter::new(&args.output);
    decoder.add_exception_information(&mut writer)?;

    let facts = writer
        .finish()
        .with_context(|| format!("failed to write facts to `{}`", args.output.display()))?;

    log::info!(
        "wrote {} facts for {} CIEs and {} FDEs to `{}`",
        facts.len(),
        decoder.table().num_cies(),
        decoder.table().num_fdes(),
        args.output.display()
    );

    Ok(())
}
