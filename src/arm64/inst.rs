//! AArch64 prolog instruction model.
//!
//! The lowering pass describes each prolog instruction by opcode and
//! operands: an optional destination and up to two sources, where memory
//! operands carry a base register, a signed byte offset and the addressing
//! mode. This is all the classifier needs; encodings never reach the unwind
//! encoder.

use crate::core::AsmReg;

/// x29
pub const FP: AsmReg = AsmReg::gp(29);
/// x30
pub const LR: AsmReg = AsmReg::gp(30);
/// Encoding 31 in a base or arithmetic operand.
pub const SP: AsmReg = AsmReg::gp(31);

/// General-purpose register `xN`.
pub const fn x(n: u8) -> AsmReg {
    AsmReg::gp(n)
}

/// Floating-point register `dN`.
pub const fn d(n: u8) -> AsmReg {
    AsmReg::fp(n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mov,
    Stp,
    Str,
    Ldp,
    Ldr,
    Ret,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// `[base, #offset]`
    Offset,
    /// `[base, #offset]!`: base is updated before the access.
    PreIndex,
    /// `[base], #offset`: base is updated after the access.
    PostIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: AsmReg,
    pub offset: i32,
    pub mode: AddrMode,
}

impl MemOperand {
    pub fn sp(offset: i32) -> Self {
        Self {
            base: SP,
            offset,
            mode: AddrMode::Offset,
        }
    }

    pub fn sp_pre_index(offset: i32) -> Self {
        Self {
            base: SP,
            offset,
            mode: AddrMode::PreIndex,
        }
    }

    pub fn sp_post_index(offset: i32) -> Self {
        Self {
            base: SP,
            offset,
            mode: AddrMode::PostIndex,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(AsmReg),
    Imm(i64),
    Mem(MemOperand),
}

/// One prolog instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrologInst {
    pub opcode: Opcode,
    pub dst: Option<Operand>,
    pub src1: Option<Operand>,
    pub src2: Option<Operand>,
}

impl PrologInst {
    pub fn new(
        opcode: Opcode,
        dst: Option<Operand>,
        src1: Option<Operand>,
        src2: Option<Operand>,
    ) -> Self {
        Self {
            opcode,
            dst,
            src1,
            src2,
        }
    }

    /// `sub dst, src, #imm`
    pub fn sub_imm(dst: AsmReg, src: AsmReg, imm: i64) -> Self {
        use Operand::*;
        Self::new(Opcode::Sub, Some(Reg(dst)), Some(Reg(src)), Some(Imm(imm)))
    }

    /// `add dst, src, #imm`
    pub fn add_imm(dst: AsmReg, src: AsmReg, imm: i64) -> Self {
        use Operand::*;
        Self::new(Opcode::Add, Some(Reg(dst)), Some(Reg(src)), Some(Imm(imm)))
    }

    /// `mov dst, src`
    pub fn mov(dst: AsmReg, src: AsmReg) -> Self {
        use Operand::*;
        Self::new(Opcode::Mov, Some(Reg(dst)), Some(Reg(src)), None)
    }

    /// `stp first, second, mem`
    pub fn stp(first: AsmReg, second: AsmReg, mem: MemOperand) -> Self {
        use Operand::*;
        Self::new(Opcode::Stp, Some(Mem(mem)), Some(Reg(first)), Some(Reg(second)))
    }

    /// `str reg, mem`
    pub fn str(reg: AsmReg, mem: MemOperand) -> Self {
        use Operand::*;
        Self::new(Opcode::Str, Some(Mem(mem)), Some(Reg(reg)), None)
    }

    /// `ldp first, second, mem`
    pub fn ldp(first: AsmReg, second: AsmReg, mem: MemOperand) -> Self {
        use Operand::*;
        Self::new(Opcode::Ldp, Some(Reg(first)), Some(Reg(second)), Some(Mem(mem)))
    }

    /// `ldr reg, mem`
    pub fn ldr(reg: AsmReg, mem: MemOperand) -> Self {
        use Operand::*;
        Self::new(Opcode::Ldr, Some(Reg(reg)), Some(Mem(mem)), None)
    }

    pub fn ret() -> Self {
        Self::new(Opcode::Ret, None, Some(Operand::Reg(LR)), None)
    }
}
