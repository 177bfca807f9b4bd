//! AArch64 prolog instruction classification.
//!
//! Stores are recognized by shape: a memory destination based on `sp` with
//! register sources. One source is a single save and two sources a pair; the
//! register bank decides between integer and floating-point ops, so `stp`
//! and a pair of `str`s produce the same unwind effect. A pre-indexed store
//! with a negative offset moves `sp` first and is treated as a push.
//! Arithmetic is only relevant when it moves `sp` down or derives `x29`
//! from `sp`.

use crate::arm64::inst::{AddrMode, MemOperand, Opcode, Operand, PrologInst, FP, SP};
use crate::core::AsmReg;
use crate::prolog::UnwindOp;

fn classify_store(mem: MemOperand, first: AsmReg, second: Option<AsmReg>) -> Option<UnwindOp> {
    if mem.base != SP {
        return None;
    }
    if let Some(second) = second {
        if second.bank != first.bank {
            return None;
        }
    }

    let offset = i64::from(mem.offset);
    match mem.mode {
        // Epilog shape; the access happens before sp moves up.
        AddrMode::PostIndex => None,
        AddrMode::PreIndex => {
            let growth = u32::try_from(-offset).ok().filter(|&growth| growth > 0)?;
            Some(UnwindOp::PushRegPair {
                first,
                second,
                sp_offset: 0,
                stack_growth: growth,
            })
        }
        AddrMode::Offset => Some(match (first.is_fp(), second) {
            (false, Some(_)) => UnwindOp::PushRegPair {
                first,
                second,
                sp_offset: offset,
                stack_growth: 0,
            },
            (true, Some(_)) => UnwindOp::SaveFloatPair {
                first,
                second,
                sp_offset: offset,
            },
            (false, None) => UnwindOp::SaveReg {
                reg: first,
                sp_offset: offset,
            },
            (true, None) => UnwindOp::SaveFloat {
                reg: first,
                sp_offset: offset,
            },
        }),
    }
}

/// Unwind effect of one AArch64 prolog instruction.
pub fn classify(inst: &PrologInst) -> UnwindOp {
    use Operand::{Imm, Mem, Reg};

    let op = match (inst.opcode, inst.dst, inst.src1, inst.src2) {
        // sub sp, sp, #imm
        (Opcode::Sub, Some(Reg(SP)), Some(Reg(SP)), Some(Imm(size))) => u32::try_from(size)
            .ok()
            .filter(|&size| size > 0)
            .map(UnwindOp::alloc),
        // add x29, sp, #imm
        (Opcode::Add, Some(Reg(FP)), Some(Reg(SP)), Some(Imm(offset))) => u32::try_from(offset)
            .ok()
            .map(|offset| UnwindOp::SetFrameRegister { offset }),
        // mov x29, sp
        (Opcode::Mov, Some(Reg(FP)), Some(Reg(SP)), None) => {
            Some(UnwindOp::SetFrameRegister { offset: 0 })
        }
        (_, Some(Mem(mem)), Some(Reg(first)), Some(Reg(second))) => {
            classify_store(mem, first, Some(second))
        }
        (_, Some(Mem(mem)), Some(Reg(first)), None) => classify_store(mem, first, None),
        _ => None,
    };
    op.unwrap_or(UnwindOp::Ignore)
}
