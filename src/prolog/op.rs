//! Abstract prolog operations.
//!
//! A machine classifier reduces each prolog instruction to one of these; the
//! encoders never look at instructions themselves.

use crate::core::AsmReg;

/// Largest allocation that is encoded as a small allocation.
pub const SMALL_ALLOC_MAX: u32 = 128;

/// Unwind-relevant side effect of one prolog instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindOp {
    /// Stack allocation of at most [`SMALL_ALLOC_MAX`] bytes.
    AllocSmall { size: u32 },
    /// Stack allocation of more than [`SMALL_ALLOC_MAX`] bytes.
    AllocLarge { size: u32 },
    /// Integer register save that belongs to a push sequence or a register
    /// pair. `first` is stored at `sp + sp_offset`, `second` one pointer
    /// above it. `stack_growth` is how far the instruction itself moved the
    /// stack pointer (`push`, pre-indexed store) before storing; it is zero
    /// for stores into an already allocated frame.
    PushRegPair {
        first: AsmReg,
        second: Option<AsmReg>,
        sp_offset: i64,
        stack_growth: u32,
    },
    /// Floating-point save of one 128-bit register or a pair of doubles,
    /// `first` at `sp + sp_offset`.
    SaveFloatPair {
        first: AsmReg,
        second: Option<AsmReg>,
        sp_offset: i64,
    },
    /// Single integer register store to `sp + sp_offset`.
    SaveReg { reg: AsmReg, sp_offset: i64 },
    /// Single floating-point register store to `sp + sp_offset`.
    SaveFloat { reg: AsmReg, sp_offset: i64 },
    /// Frame pointer set to `sp + offset`.
    SetFrameRegister { offset: u32 },
    /// No unwind effect.
    Ignore,
}

impl UnwindOp {
    /// Classify a stack-pointer decrement by its size.
    pub fn alloc(size: u32) -> Self {
        if size <= SMALL_ALLOC_MAX {
            UnwindOp::AllocSmall { size }
        } else {
            UnwindOp::AllocLarge { size }
        }
    }

    /// Single-register push that grows the stack by `slot` bytes.
    pub fn push(reg: AsmReg, slot: u32) -> Self {
        UnwindOp::PushRegPair {
            first: reg,
            second: None,
            sp_offset: 0,
            stack_growth: slot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnwindOp::AllocSmall { .. } => "ALLOC_SMALL",
            UnwindOp::AllocLarge { .. } => "ALLOC_LARGE",
            UnwindOp::PushRegPair { .. } => "PUSH_REG_PAIR",
            UnwindOp::SaveFloatPair { .. } => "SAVE_FLOAT_PAIR",
            UnwindOp::SaveReg { .. } => "SAVE_REG",
            UnwindOp::SaveFloat { .. } => "SAVE_FLOAT",
            UnwindOp::SetFrameRegister { .. } => "SET_FRAME_REGISTER",
            UnwindOp::Ignore => "IGNORE",
        }
    }
}
