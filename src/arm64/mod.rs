//! AArch64 unwind support.
//!
//! Only the call frame format exists for AArch64 here, so [`Arm64`]
//! implements [`Machine`] but not [`TableMachine`](crate::machine::TableMachine).

pub mod classifier;
pub mod inst;
pub mod registers;

use crate::core::{AsmReg, UnwindResult};
use crate::eh_frame::CfiWriter;
use crate::machine::Machine;
use crate::prolog::UnwindOp;

pub use classifier::classify;
pub use inst::{AddrMode, MemOperand, Opcode, Operand, PrologInst, FP, LR, SP};

/// `stp x29, x30, [sp, #-16]!; mov x29, sp`
static SMALL_PROLOG: [(u8, UnwindOp); 2] = [
    (
        4,
        UnwindOp::PushRegPair {
            first: FP,
            second: Some(LR),
            sp_offset: 0,
            stack_growth: 16,
        },
    ),
    (4, UnwindOp::SetFrameRegister { offset: 0 }),
];

/// AArch64 machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arm64;

impl Machine for Arm64 {
    type Inst = PrologInst;

    const NAME: &'static str = "aarch64";
    const FRAME_POINTER: AsmReg = FP;
    const RETURN_ADDRESS_COLUMN: u8 = registers::DWARF_RETURN_ADDRESS;
    // The return address stays in LR until the prolog stores it.
    const ENTRY_CFA_WORDS: u32 = 0;

    fn classify(inst: &PrologInst) -> UnwindOp {
        classifier::classify(inst)
    }

    fn dwarf_reg(reg: AsmReg) -> UnwindResult<u16> {
        registers::dwarf_reg(reg)
    }

    // Both x and d registers are 8 bytes wide.
    fn pair_stride(_first: AsmReg) -> u32 {
        8
    }

    fn write_cie_initial_instructions(cfi: &mut CfiWriter<'_, '_>) -> UnwindResult<()> {
        cfi.def_cfa(registers::DWARF_SP, 0)
    }

    fn small_prolog() -> &'static [(u8, UnwindOp)] {
        &SMALL_PROLOG
    }
}
