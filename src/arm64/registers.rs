//! AArch64 DWARF register numbering: x0-x30 are 0-30, sp is 31 and
//! d0-d31 are 64-95.

use crate::core::{AsmReg, UnwindError, UnwindResult, FP_BANK, GP_BANK};

/// Return address column (LR).
pub const DWARF_RETURN_ADDRESS: u8 = 30;

pub const DWARF_SP: u16 = 31;

/// Column of d0; d1-d31 follow.
pub const DWARF_D0: u16 = 64;

/// DWARF column of `reg`.
pub fn dwarf_reg(reg: AsmReg) -> UnwindResult<u16> {
    match reg.bank {
        GP_BANK if reg.id <= 31 => Ok(u16::from(reg.id)),
        FP_BANK if reg.id <= 31 => Ok(DWARF_D0 + u16::from(reg.id)),
        _ => Err(UnwindError::UnmappedRegister {
            reg,
            target: "AArch64 DWARF",
        }),
    }
}
