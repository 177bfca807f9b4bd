// This module defines the seam between the architecture-neutral unwind encoders and the
// per-architecture knowledge they need. A Machine is a zero-sized type selected at build time
// (one per instruction set) that classifies a concrete prolog instruction into an abstract
// UnwindOp, maps registers to DWARF columns, and supplies the constants of the call frame
// format: pointer size (which is also the magnitude of the data alignment factor), the
// return-address column, the CFA distance at function entry, and the initial instructions of
// the common information entry. TableMachine extends this for architectures that also have
// a table-based unwind format; only x86-64 implements it, so requesting a table encoder for
// AArch64 is rejected at compile time. Encoders are generic over Machine and monomorphized,
// so there is no dynamic dispatch on the per-instruction path.

//! Architecture abstraction for unwind encoding.

use crate::core::{AsmReg, UnwindResult};
use crate::eh_frame::CfiWriter;
use crate::prolog::UnwindOp;

/// Per-architecture classifier and register numbering.
pub trait Machine {
    /// Prolog instruction representation handed over by the lowering pass.
    type Inst;

    /// Architecture name for diagnostics.
    const NAME: &'static str;

    /// Pointer size in bytes; the data alignment factor is its negation.
    const POINTER_SIZE: u32 = 8;

    const FRAME_POINTER: AsmReg;

    /// DWARF column holding the return address.
    const RETURN_ADDRESS_COLUMN: u8;

    /// Distance from the stack pointer to the CFA at function entry, in
    /// pointer units.
    const ENTRY_CFA_WORDS: u32;

    /// Reduce a prolog instruction to its unwind effect.
    fn classify(inst: &Self::Inst) -> UnwindOp;

    /// DWARF column of `reg`.
    fn dwarf_reg(reg: AsmReg) -> UnwindResult<u16>;

    /// Distance in bytes between the two registers of a pair save.
    fn pair_stride(first: AsmReg) -> u32;

    /// CIE initial instructions describing the CFA at function entry.
    fn write_cie_initial_instructions(cfi: &mut CfiWriter<'_, '_>) -> UnwindResult<()>;

    /// Canonical frame setup used for small prologs: `(size, op)` per
    /// instruction.
    fn small_prolog() -> &'static [(u8, UnwindOp)];
}

/// Architectures with a table-based unwind format.
pub trait TableMachine: Machine {
    /// Register number used in table unwind codes.
    fn unwind_reg(reg: AsmReg) -> UnwindResult<u8>;
}

/// Machine of the build target.
#[cfg(target_arch = "x86_64")]
pub type HostMachine = crate::x64::X64;

/// Machine of the build target.
#[cfg(target_arch = "aarch64")]
pub type HostMachine = crate::arm64::Arm64;
