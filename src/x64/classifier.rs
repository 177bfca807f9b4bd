//! x86-64 prolog instruction classification.
//!
//! Works on decoded [`iced_x86::Instruction`]s by mnemonic and operand
//! shape. Only stores into the current frame through `rsp` count as saves;
//! addressing with an index register, loads and anything that touches
//! other registers are ignored.

use iced_x86::{Instruction, Mnemonic, OpKind, Register};

use crate::core::AsmReg;
use crate::prolog::UnwindOp;
use crate::x64::registers::from_iced;

/// `push` moves the stack pointer by one slot.
const PUSH_SLOT: u32 = 8;

fn is_immediate(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Immediate8
            | OpKind::Immediate16
            | OpKind::Immediate32
            | OpKind::Immediate64
            | OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64
    )
}

/// Displacement of an `[rsp + disp]` memory operand.
fn stack_slot(inst: &Instruction, operand: u32) -> Option<i64> {
    let is_memory = inst.op_kind(operand) == OpKind::Memory;
    if is_memory && inst.memory_base() == Register::RSP && inst.memory_index() == Register::None {
        Some(inst.memory_displacement64() as i64)
    } else {
        None
    }
}

/// Register operand mapped to an [`AsmReg`].
fn register(inst: &Instruction, operand: u32) -> Option<(Register, AsmReg)> {
    if inst.op_kind(operand) != OpKind::Register {
        return None;
    }
    let reg = inst.op_register(operand);
    from_iced(reg).map(|asm| (reg, asm))
}

fn classify_push(inst: &Instruction) -> Option<UnwindOp> {
    let (reg, asm) = register(inst, 0)?;
    reg.is_gpr64().then(|| UnwindOp::push(asm, PUSH_SLOT))
}

fn classify_sub(inst: &Instruction) -> Option<UnwindOp> {
    let (reg, _) = register(inst, 0)?;
    if reg != Register::RSP || !is_immediate(inst.op1_kind()) {
        return None;
    }
    let size = inst.immediate(1) as i64;
    let size = u32::try_from(size).ok().filter(|&size| size > 0)?;
    Some(UnwindOp::alloc(size))
}

fn classify_mov(inst: &Instruction) -> Option<UnwindOp> {
    // mov rbp, rsp
    if let (Some((Register::RBP, _)), Some((Register::RSP, _))) =
        (register(inst, 0), register(inst, 1))
    {
        return Some(UnwindOp::SetFrameRegister { offset: 0 });
    }

    let sp_offset = stack_slot(inst, 0)?;
    let (reg, asm) = register(inst, 1)?;
    reg.is_gpr64().then_some(UnwindOp::SaveReg { reg: asm, sp_offset })
}

fn classify_lea(inst: &Instruction) -> Option<UnwindOp> {
    let (reg, _) = register(inst, 0)?;
    if reg != Register::RBP {
        return None;
    }
    let offset = u32::try_from(stack_slot(inst, 1)?).ok()?;
    Some(UnwindOp::SetFrameRegister { offset })
}

fn classify_xmm_store(inst: &Instruction, full_width: bool) -> Option<UnwindOp> {
    let sp_offset = stack_slot(inst, 0)?;
    let (reg, asm) = register(inst, 1)?;
    if !reg.is_xmm() {
        return None;
    }
    Some(if full_width {
        UnwindOp::SaveFloatPair {
            first: asm,
            second: None,
            sp_offset,
        }
    } else {
        UnwindOp::SaveFloat { reg: asm, sp_offset }
    })
}

/// Unwind effect of one x86-64 prolog instruction.
pub fn classify(inst: &Instruction) -> UnwindOp {
    let op = match inst.mnemonic() {
        Mnemonic::Push => classify_push(inst),
        Mnemonic::Sub => classify_sub(inst),
        Mnemonic::Mov => classify_mov(inst),
        Mnemonic::Lea => classify_lea(inst),
        Mnemonic::Movaps | Mnemonic::Movups | Mnemonic::Movdqa | Mnemonic::Movdqu => {
            classify_xmm_store(inst, true)
        }
        Mnemonic::Movsd | Mnemonic::Movq => classify_xmm_store(inst, false),
        _ => None,
    };
    op.unwrap_or(UnwindOp::Ignore)
}
