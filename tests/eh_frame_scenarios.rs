//! End-to-end `.eh_frame` checks: prologs go through the encoder and the
//! resulting blob is read back with gimli's unwinder.

use gimli::{
    BaseAddresses, CfaRule, CieOrFde, EhFrame, EndianSlice, FrameDescriptionEntry, LittleEndian,
    Register, RegisterRule, UnwindContext, UnwindSection, UnwindTableRow,
};
use jit_unwind::arm64::inst::x;
use jit_unwind::arm64::{Arm64, MemOperand, PrologInst, FP, LR, SP};
use jit_unwind::core::{EncoderConfig, IgnoredInstrPolicy, UnwindFormat};
use jit_unwind::machine::Machine;
use jit_unwind::prolog::{CodeRange, PrologEncoder};
use jit_unwind::x64::{self, X64};
use jit_unwind::UnwindError;

type Reader<'a> = EndianSlice<'a, LittleEndian>;

const X64_RSP: Register = Register(7);
const X64_RBP: Register = Register(6);
const X64_RBX: Register = Register(3);
const X64_RA: Register = Register(16);
const ARM64_SP: Register = Register(31);
const ARM64_FP: Register = Register(29);
const ARM64_LR: Register = Register(30);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn eh_frame(blob: &[u8]) -> EhFrame<Reader<'_>> {
    let mut section = EhFrame::new(blob, LittleEndian);
    section.set_address_size(8);
    section
}

fn first_fde<'a>(
    section: &EhFrame<Reader<'a>>,
    bases: &BaseAddresses,
) -> FrameDescriptionEntry<Reader<'a>> {
    let mut entries = section.entries(bases);
    while let Some(entry) = entries.next().unwrap() {
        if let CieOrFde::Fde(partial) = entry {
            return partial
                .parse(|section, bases, offset| section.cie_from_offset(bases, offset))
                .unwrap();
        }
    }
    panic!("no FDE in blob");
}

/// Unwind table rows of the blob's only FDE.
fn unwind_rows(blob: &[u8]) -> Vec<UnwindTableRow<usize>> {
    let section = eh_frame(blob);
    let bases = BaseAddresses::default();
    let fde = first_fde(&section, &bases);
    let mut ctx = UnwindContext::new();
    let mut table = fde.rows(&section, &bases, &mut ctx).unwrap();
    let mut rows = Vec::new();
    while let Some(row) = table.next_row().unwrap() {
        rows.push(row.clone());
    }
    rows
}

fn cfa(register: Register, offset: i64) -> CfaRule<usize> {
    CfaRule::RegisterAndOffset { register, offset }
}

/// Encode `prolog` for machine `M` and place it at `code`.
fn encode<'buf, M: Machine>(
    buffer: &'buf mut [u8],
    config: EncoderConfig,
    prolog: &[(M::Inst, u8)],
    code: CodeRange,
) -> &'buf [u8] {
    let mut encoder = PrologEncoder::<M>::new_eh_frame(buffer, config).unwrap();
    for (inst, size) in prolog {
        encoder.encode_instr(inst, *size).unwrap();
    }
    encoder.end().unwrap();
    encoder.finalize(code, 0).unwrap()
}

fn eh_config() -> EncoderConfig {
    EncoderConfig::with_format(UnwindFormat::EhFrame)
}

#[test]
fn arm64_alloc_then_pair_store() {
    init_logging();
    let prolog = [
        (PrologInst::sub_imm(SP, SP, 16), 4),
        (PrologInst::stp(x(19), x(20), MemOperand::sp(0)), 4),
    ];
    let mut buf = [0u8; 128];
    let code = CodeRange {
        start: 0x1000,
        size: 0x40,
    };
    let blob = encode::<Arm64>(&mut buf, eh_config(), &prolog, code);

    let rows = unwind_rows(blob);
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].start_address(), 0x1000);
    assert_eq!(rows[0].cfa(), &cfa(ARM64_SP, 0));

    assert_eq!(rows[1].start_address(), 0x1004);
    assert_eq!(rows[1].cfa(), &cfa(ARM64_SP, 16));

    let last = &rows[2];
    assert_eq!(last.start_address(), 0x1008);
    assert_eq!(last.end_address(), 0x1040);
    assert_eq!(last.cfa(), &cfa(ARM64_SP, 16));
    assert_eq!(last.register(Register(19)), RegisterRule::Offset(-16));
    assert_eq!(last.register(Register(20)), RegisterRule::Offset(-8));
}

#[test]
fn arm64_frame_register_takes_over_cfa() {
    init_logging();
    let prolog = [
        (PrologInst::sub_imm(SP, SP, 32), 4),
        (PrologInst::stp(FP, LR, MemOperand::sp(16)), 4),
        (PrologInst::add_imm(FP, SP, 16), 4),
        (PrologInst::sub_imm(SP, SP, 64), 4),
    ];
    let mut buf = [0u8; 128];
    let code = CodeRange {
        start: 0x2000,
        size: 0x80,
    };
    let blob = encode::<Arm64>(&mut buf, eh_config(), &prolog, code);

    let rows = unwind_rows(blob);
    let last = rows.last().unwrap();
    // CFA = x29 + 16 and stays there across the second allocation.
    assert_eq!(last.cfa(), &cfa(ARM64_FP, 16));
    assert_eq!(last.register(ARM64_FP), RegisterRule::Offset(-16));
    assert_eq!(last.register(ARM64_LR), RegisterRule::Offset(-8));
    // The allocation still advances the location.
    assert_eq!(last.start_address(), 0x2010);
}

#[test]
fn arm64_small_prolog() {
    init_logging();
    let mut buf = [0u8; 128];
    let mut encoder = PrologEncoder::<Arm64>::new_eh_frame(&mut buf, eh_config()).unwrap();
    encoder.encode_small_prolog(8, 0).unwrap();
    assert_eq!(encoder.end(), Err(UnwindError::RecordClosed));
    let blob = encoder
        .finalize(
            CodeRange {
                start: 0x4000,
                size: 0x20,
            },
            0,
        )
        .unwrap();

    let rows = unwind_rows(blob);
    let last = rows.last().unwrap();
    assert_eq!(last.start_address(), 0x4008);
    assert_eq!(last.cfa(), &cfa(ARM64_FP, 16));
    assert_eq!(last.register(ARM64_FP), RegisterRule::Offset(-16));
    assert_eq!(last.register(ARM64_LR), RegisterRule::Offset(-8));
}

#[test]
fn x64_push_frame_and_alloc() {
    init_logging();
    // push rbp; mov rbp, rsp; push rbx; sub rsp, 0x28
    let code = [0x55, 0x48, 0x89, 0xe5, 0x53, 0x48, 0x83, 0xec, 0x28];
    let prolog = x64::decode_prolog(&code, 0x1000).unwrap();
    let mut buf = [0u8; 128];
    let range = CodeRange {
        start: 0x1000,
        size: 0x30,
    };
    let blob = encode::<X64>(&mut buf, eh_config(), &prolog, range);

    let rows = unwind_rows(blob);
    assert_eq!(rows[0].cfa(), &cfa(X64_RSP, 8));
    assert_eq!(rows[0].register(X64_RA), RegisterRule::Offset(-8));

    assert_eq!(rows[1].start_address(), 0x1001);
    assert_eq!(rows[1].cfa(), &cfa(X64_RSP, 16));
    assert_eq!(rows[1].register(X64_RBP), RegisterRule::Offset(-16));

    assert_eq!(rows[2].start_address(), 0x1004);
    assert_eq!(rows[2].cfa(), &cfa(X64_RBP, 16));

    let last = rows.last().unwrap();
    assert_eq!(last.cfa(), &cfa(X64_RBP, 16));
    assert_eq!(last.register(X64_RBX), RegisterRule::Offset(-24));
    assert_eq!(last.register(X64_RA), RegisterRule::Offset(-8));
}

#[test]
fn ignored_instruction_policies_move_later_rows() {
    init_logging();
    // push rbp; mov eax, ecx; sub rsp, 0x20
    let code = [0x55, 0x89, 0xc8, 0x48, 0x83, 0xec, 0x20];
    let prolog = x64::decode_prolog(&code, 0).unwrap();

    for (policy, alloc_row_start) in [
        (IgnoredInstrPolicy::AdvanceOffset, 0x1007),
        (IgnoredInstrPolicy::Invisible, 0x1005),
    ] {
        let mut buf = [0u8; 128];
        let config = eh_config().ignored_instructions(policy);
        let range = CodeRange {
            start: 0x1000,
            size: 0x10,
        };
        let blob = encode::<X64>(&mut buf, config, &prolog, range);

        let rows = unwind_rows(blob);
        let last = rows.last().unwrap();
        assert_eq!(last.start_address(), alloc_row_start, "{policy:?}");
        assert_eq!(last.cfa(), &cfa(X64_RSP, 48), "{policy:?}");
    }
}

#[test]
fn cfa_grows_monotonically_on_stack_pointer() {
    init_logging();
    // push rbp; push rbx; push r12; sub rsp, 0x1000; sub rsp, 0x18
    let code = [
        0x55, 0x53, 0x41, 0x54, 0x48, 0x81, 0xec, 0x00, 0x10, 0x00, 0x00, 0x48, 0x83, 0xec, 0x18,
    ];
    let prolog = x64::decode_prolog(&code, 0).unwrap();
    let mut buf = [0u8; 256];
    let range = CodeRange {
        start: 0x8000,
        size: 0x100,
    };
    let blob = encode::<X64>(&mut buf, eh_config(), &prolog, range);

    let offsets: Vec<i64> = unwind_rows(blob)
        .iter()
        .map(|row| match row.cfa() {
            CfaRule::RegisterAndOffset { register, offset } => {
                assert_eq!(*register, X64_RSP);
                *offset
            }
            other => panic!("unexpected CFA rule {other:?}"),
        })
        .collect();
    assert_eq!(offsets, vec![8, 16, 24, 32, 32 + 0x1000, 32 + 0x1000 + 0x18]);
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn fde_covers_patched_range() {
    init_logging();
    let prolog = x64::decode_prolog(&[0x55], 0).unwrap();
    let mut buf = [0u8; 128];
    let range = CodeRange {
        start: 0x7fff_0000_1000,
        size: 0x1234,
    };
    let blob = encode::<X64>(&mut buf, eh_config(), &prolog, range);

    let section = eh_frame(blob);
    let bases = BaseAddresses::default();
    let fde = first_fde(&section, &bases);
    assert_eq!(fde.initial_address(), 0x7fff_0000_1000);
    assert_eq!(fde.len(), 0x1234);
    assert_eq!(fde.cie().code_alignment_factor(), 1);
    assert_eq!(fde.cie().data_alignment_factor(), -8);
    assert_eq!(fde.cie().return_address_register(), X64_RA);
}
