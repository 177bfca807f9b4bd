//! x86-64 unwind support.
//!
//! This module contains all x86-64 specific code:
//! - Prolog classification over iced-x86 decoded instructions
//! - DWARF and Windows register numbering
//! - The [`Machine`] and [`TableMachine`] implementation

pub mod classifier;
pub mod registers;

use iced_x86::{Decoder, DecoderOptions, Instruction};

use crate::core::{AsmReg, UnwindError, UnwindResult};
use crate::eh_frame::CfiWriter;
use crate::machine::{Machine, TableMachine};
use crate::prolog::UnwindOp;

pub use classifier::classify;
pub use registers::{dwarf_reg, windows_reg, RBP, RSP};

/// `push rbp`
static SMALL_PROLOG: [(u8, UnwindOp); 1] = [(
    1,
    UnwindOp::PushRegPair {
        first: RBP,
        second: None,
        sp_offset: 0,
        stack_growth: 8,
    },
)];

/// x86-64 machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X64;

impl Machine for X64 {
    type Inst = Instruction;

    const NAME: &'static str = "x86-64";
    const FRAME_POINTER: AsmReg = RBP;
    const RETURN_ADDRESS_COLUMN: u8 = registers::DWARF_RETURN_ADDRESS;
    // The call pushed the return address.
    const ENTRY_CFA_WORDS: u32 = 1;

    fn classify(inst: &Instruction) -> UnwindOp {
        classifier::classify(inst)
    }

    fn dwarf_reg(reg: AsmReg) -> UnwindResult<u16> {
        registers::dwarf_reg(reg)
    }

    fn pair_stride(_first: AsmReg) -> u32 {
        8
    }

    fn write_cie_initial_instructions(cfi: &mut CfiWriter<'_, '_>) -> UnwindResult<()> {
        // CFA = rsp + 8, return address at CFA - 8.
        cfi.def_cfa(registers::dwarf_reg(RSP)?, 8)?;
        cfi.offset(u16::from(registers::DWARF_RETURN_ADDRESS), 1)
    }

    fn small_prolog() -> &'static [(u8, UnwindOp)] {
        &SMALL_PROLOG
    }
}

impl TableMachine for X64 {
    fn unwind_reg(reg: AsmReg) -> UnwindResult<u8> {
        registers::windows_reg(reg)
    }
}

/// Decode `code` into instructions with their sizes.
pub fn decode_prolog(code: &[u8], ip: u64) -> UnwindResult<Vec<(Instruction, u8)>> {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut inst = Instruction::default();

    while decoder.can_decode() {
        let offset = decoder.position();
        decoder.decode_out(&mut inst);
        if inst.is_invalid() {
            return Err(UnwindError::UndecodableInstruction { offset });
        }
        instructions.push((inst, inst.len() as u8));
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_prolog_sizes() {
        // push rbp; mov rbp, rsp; sub rsp, 0x20
        let code = [0x55, 0x48, 0x89, 0xe5, 0x48, 0x83, 0xec, 0x20];
        let sizes: Vec<u8> = decode_prolog(&code, 0x1000)
            .unwrap()
            .iter()
            .map(|(_, size)| *size)
            .collect();
        assert_eq!(sizes, vec![1, 3, 4]);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let err = decode_prolog(&[0x55, 0x48, 0x83], 0).unwrap_err();
        assert_eq!(err, UnwindError::UndecodableInstruction { offset: 1 });
    }
}
