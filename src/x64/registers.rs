//! x86-64 register numbering.
//!
//! [`AsmReg`] ids are hardware encodings (rax 0, rcx 1, rdx 2, rbx 3, rsp 4,
//! rbp 5, rsi 6, rdi 7, r8-r15 8-15; xmm0-xmm15 0-15). Windows unwind codes
//! use the hardware encoding directly; DWARF orders the low eight
//! differently.

use iced_x86::Register;

use crate::core::{AsmReg, UnwindError, UnwindResult, FP_BANK, GP_BANK};

pub const RAX: AsmReg = AsmReg::gp(0);
pub const RCX: AsmReg = AsmReg::gp(1);
pub const RDX: AsmReg = AsmReg::gp(2);
pub const RBX: AsmReg = AsmReg::gp(3);
pub const RSP: AsmReg = AsmReg::gp(4);
pub const RBP: AsmReg = AsmReg::gp(5);
pub const RSI: AsmReg = AsmReg::gp(6);
pub const RDI: AsmReg = AsmReg::gp(7);

/// DWARF column of each general-purpose register, by hardware encoding.
const DWARF_GP: [u16; 16] = [0, 2, 1, 3, 7, 6, 4, 5, 8, 9, 10, 11, 12, 13, 14, 15];

/// Return address column (the pushed RIP).
pub const DWARF_RETURN_ADDRESS: u8 = 16;

/// Column of xmm0; xmm1-xmm15 follow.
pub const DWARF_XMM0: u16 = 17;

/// Number of registers addressable in either table, per bank.
const REGS_PER_BANK: u8 = 16;

fn unmapped(reg: AsmReg, target: &'static str) -> UnwindError {
    UnwindError::UnmappedRegister { reg, target }
}

/// DWARF column of `reg`.
pub fn dwarf_reg(reg: AsmReg) -> UnwindResult<u16> {
    match reg.bank {
        GP_BANK if reg.id < REGS_PER_BANK => Ok(DWARF_GP[usize::from(reg.id)]),
        FP_BANK if reg.id < REGS_PER_BANK => Ok(DWARF_XMM0 + u16::from(reg.id)),
        _ => Err(unmapped(reg, "x86-64 DWARF")),
    }
}

/// Register number used in Windows unwind codes.
pub fn windows_reg(reg: AsmReg) -> UnwindResult<u8> {
    match reg.bank {
        GP_BANK | FP_BANK if reg.id < REGS_PER_BANK => Ok(reg.id),
        _ => Err(unmapped(reg, "Windows x64")),
    }
}

/// Map a 64-bit GPR or XMM register from the decoder.
pub fn from_iced(reg: Register) -> Option<AsmReg> {
    let id = u8::try_from(reg.number()).ok()?;
    if reg.is_gpr64() {
        Some(AsmReg::gp(id))
    } else if reg.is_xmm() {
        Some(AsmReg::fp(id))
    } else {
        None
    }
}
