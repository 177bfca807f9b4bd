//! Call frame instruction encoding.
//!
//! [`CfiWriter`] appends DWARF call frame directives to an entry that is being
//! built in a [`ByteWriter`]. Register operands are DWARF column numbers and
//! offsets are already factored by the data alignment factor; choosing the
//! compact opcode forms is left to the writer.

use crate::core::{ByteWriter, UnwindResult};

// High 2 bits encode the operation, low 6 bits the operand.
pub const DW_CFA_ADVANCE_LOC: u8 = 0x40;
pub const DW_CFA_OFFSET: u8 = 0x80;

pub const DW_CFA_NOP: u8 = 0x00;
pub const DW_CFA_ADVANCE_LOC1: u8 = 0x02;
pub const DW_CFA_ADVANCE_LOC2: u8 = 0x03;
pub const DW_CFA_ADVANCE_LOC4: u8 = 0x04;
pub const DW_CFA_OFFSET_EXTENDED: u8 = 0x05;
pub const DW_CFA_DEF_CFA: u8 = 0x0c;
pub const DW_CFA_DEF_CFA_REGISTER: u8 = 0x0d;
pub const DW_CFA_DEF_CFA_OFFSET: u8 = 0x0e;
pub const DW_CFA_OFFSET_EXTENDED_SF: u8 = 0x11;

/// Largest operand that fits in the low 6 bits of a primary opcode.
const LOW_6_BITS: u64 = 0x3f;

/// Directive emitter bound to the byte stream of an open entry.
#[derive(Debug)]
pub struct CfiWriter<'w, 'buf> {
    writer: &'w mut ByteWriter<'buf>,
}

impl<'w, 'buf> CfiWriter<'w, 'buf> {
    pub fn new(writer: &'w mut ByteWriter<'buf>) -> Self {
        Self { writer }
    }

    /// Advance the location by `delta` code units using the smallest form.
    pub fn advance(&mut self, delta: u32) -> UnwindResult<()> {
        if u64::from(delta) <= LOW_6_BITS {
            self.advance_loc(delta as u8)
        } else if let Ok(delta) = u8::try_from(delta) {
            self.advance_loc1(delta)
        } else if let Ok(delta) = u16::try_from(delta) {
            self.advance_loc2(delta)
        } else {
            self.advance_loc4(delta)
        }
    }

    /// DW_CFA_advance_loc: delta in the low 6 bits.
    pub fn advance_loc(&mut self, delta: u8) -> UnwindResult<()> {
        debug_assert!(u64::from(delta) <= LOW_6_BITS);
        log::trace!("DW_CFA_advance_loc: {delta}");
        self.writer.write(DW_CFA_ADVANCE_LOC | delta)
    }

    pub fn advance_loc1(&mut self, delta: u8) -> UnwindResult<()> {
        log::trace!("DW_CFA_advance_loc1: {delta}");
        self.writer.write(DW_CFA_ADVANCE_LOC1)?;
        self.writer.write(delta)
    }

    pub fn advance_loc2(&mut self, delta: u16) -> UnwindResult<()> {
        log::trace!("DW_CFA_advance_loc2: {delta}");
        self.writer.write(DW_CFA_ADVANCE_LOC2)?;
        self.writer.write(delta)
    }

    pub fn advance_loc4(&mut self, delta: u32) -> UnwindResult<()> {
        log::trace!("DW_CFA_advance_loc4: {delta}");
        self.writer.write(DW_CFA_ADVANCE_LOC4)?;
        self.writer.write(delta)
    }

    /// DW_CFA_def_cfa: CFA = `reg` + `offset` bytes.
    pub fn def_cfa(&mut self, reg: u16, offset: u64) -> UnwindResult<()> {
        log::trace!("DW_CFA_def_cfa: r{reg} ofs {offset}");
        self.writer.write(DW_CFA_DEF_CFA)?;
        self.writer.write_uleb128(u64::from(reg))?;
        self.writer.write_uleb128(offset)
    }

    /// DW_CFA_def_cfa_offset: keep the CFA register, set the offset in bytes.
    pub fn def_cfa_offset(&mut self, offset: u64) -> UnwindResult<()> {
        log::trace!("DW_CFA_def_cfa_offset: {offset}");
        self.writer.write(DW_CFA_DEF_CFA_OFFSET)?;
        self.writer.write_uleb128(offset)
    }

    /// DW_CFA_def_cfa_register: keep the CFA offset, change the register.
    pub fn def_cfa_register(&mut self, reg: u16) -> UnwindResult<()> {
        log::trace!("DW_CFA_def_cfa_register: r{reg}");
        self.writer.write(DW_CFA_DEF_CFA_REGISTER)?;
        self.writer.write_uleb128(u64::from(reg))
    }

    /// Register `reg` is saved at CFA - `factored_offset` * |data alignment|.
    ///
    /// Uses DW_CFA_offset when the column fits in 6 bits,
    /// DW_CFA_offset_extended for higher columns and DW_CFA_offset_extended_sf
    /// for slots above the CFA.
    pub fn offset(&mut self, reg: u16, factored_offset: i64) -> UnwindResult<()> {
        log::trace!("DW_CFA_offset: r{reg} at cfa{:+}*daf", factored_offset);
        if factored_offset < 0 {
            self.writer.write(DW_CFA_OFFSET_EXTENDED_SF)?;
            self.writer.write_uleb128(u64::from(reg))?;
            return self.writer.write_sleb128(factored_offset);
        }

        let factored_offset = factored_offset as u64;
        if u64::from(reg) <= LOW_6_BITS {
            self.writer.write(DW_CFA_OFFSET | reg as u8)?;
        } else {
            self.writer.write(DW_CFA_OFFSET_EXTENDED)?;
            self.writer.write_uleb128(u64::from(reg))?;
        }
        self.writer.write_uleb128(factored_offset)
    }

    pub fn nop(&mut self) -> UnwindResult<()> {
        self.writer.write(DW_CFA_NOP)
    }
}
