//! Check the reader against gimli's `.eh_frame` parser.

use elf_ehframe::raw::*;
use elf_ehframe::write::{CieBuilder, EhFrameBuilder, EhFrameOptions, FdeBuilder};
use elf_ehframe::{Bases, EhFrame, LittleEndian};
use gimli::{BaseAddresses, CieOrFde, UnwindSection};

const EH_FRAME: u64 = 0x2000;
const TEXT: u64 = 0x1000;

fn pointer_address(pointer: gimli::Pointer) -> (u64, bool) {
    match pointer {
        gimli::Pointer::Direct(address) => (address, false),
        gimli::Pointer::Indirect(address) => (address, true),
    }
}

#[test]
fn matches_gimli() -> anyhow::Result<()> {
    let bases = Bases::new(EH_FRAME).text(TEXT);
    let mut builder = EhFrameBuilder::new(EhFrameOptions::new(bases));

    let plain = builder.cie(CieBuilder::new());
    let eh = builder.cie(
        CieBuilder::new()
            .personality(DW_EH_PE_indirect | DW_EH_PE_pcrel | DW_EH_PE_sdata4, 0x5008)
            .lsda_encoding(DW_EH_PE_pcrel | DW_EH_PE_sdata4),
    );
    let text = builder.cie(
        CieBuilder::new()
            .extended_length(true)
            .version(Version::V3)
            .fde_encoding(DW_EH_PE_textrel | DW_EH_PE_udata4)
            .return_address_register(30)
            .data_alignment_factor(-4)
            .code_alignment_factor(4),
    );

    builder.fde(FdeBuilder::new(plain, 0x1000, 0x40).instructions(&[0x41, 0x0e, 0x10]));
    builder.fde(FdeBuilder::new(eh, 0x1040, 0x80).lsda(0x6000));
    builder.fde(FdeBuilder::new(eh, 0x10c0, 0x10).lsda(0x6010));
    builder.fde(FdeBuilder::new(text, 0x1200, 0x100).extended_length(true));
    builder.fde(FdeBuilder::new(plain, 0x1300, 0x08).padding(3));

    let data = builder.build::<LittleEndian>()?;
    let table = EhFrame::<LittleEndian>::new(&data, bases).parse()?;
    assert!(table.diagnostics().is_empty());

    let mut eh_frame = gimli::EhFrame::new(&data, gimli::LittleEndian);
    eh_frame.set_address_size(8);
    let gimli_bases = BaseAddresses::default()
        .set_eh_frame(EH_FRAME)
        .set_text(TEXT);

    let mut cies = 0;
    let mut fdes = 0;
    let mut entries = eh_frame.entries(&gimli_bases);
    while let Some(entry) = entries.next()? {
        match entry {
            CieOrFde::Cie(cie) => {
                cies += 1;

                let ours = table.cies().nth(cies - 1).unwrap();
                assert_eq!(ours.code_alignment_factor, cie.code_alignment_factor());
                assert_eq!(ours.data_alignment_factor, cie.data_alignment_factor());
                assert_eq!(
                    ours.return_address_register,
                    cie.return_address_register().0 as u64
                );
                assert_eq!(
                    ours.personality.map(|p| (p.address, p.indirect)),
                    cie.personality().map(pointer_address)
                );
            }
            CieOrFde::Fde(partial) => {
                fdes += 1;

                let fde = partial.parse(|_, bases, offset| eh_frame.cie_from_offset(bases, offset))?;
                let ours = table.fde_for_address(fde.initial_address()).unwrap();

                assert_eq!(ours.pc_begin, fde.initial_address());
                assert_eq!(ours.pc_range, fde.len());
                assert_eq!(
                    ours.lsda.map(|p| (p.address, p.indirect)),
                    fde.lsda().map(pointer_address)
                );
                assert_eq!(table.cie_for(ours).unwrap().offset, fde.cie().offset() as u64);
            }
        }
    }

    assert_eq!(cies, table.num_cies());
    assert_eq!(fdes, table.num_fdes());

    Ok(())
}
