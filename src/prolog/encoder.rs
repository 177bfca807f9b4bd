// This module contains the prolog encoder, the state machine that turns the stream of prolog
// instructions of one function into unwind data. An encoder is created per function with a
// caller-supplied buffer and a target format fixed at construction: the Windows x64 table or
// a minimal .eh_frame. Both formats share the instruction offset bookkeeping: every
// encode_instr call classifies the instruction through the Machine, checks the size, advances
// the offset, and hands the resulting UnwindOp to the format-specific state. Instructions
// classified as Ignore never produce output; whether their bytes still count toward later
// offsets is controlled by IgnoredInstrPolicy. The table state only needs the pre-pass node
// count and the back-filled code table; the frame register chosen by SetFrameRegister ends up
// in the UNWIND_INFO header. The call frame state tracks the CFA distance from the stack
// pointer in pointer units, the offset of the last advance directive, and whether the CFA is
// still defined relative to the stack pointer; once the frame register takes over, allocations
// keep the distance current for save slots but no longer redefine the CFA. Every byte distance
// that is factored by the pointer size must divide exactly; anything else is reported as an
// error so the JIT can fail the compilation instead of installing code with wrong unwind data.
// finalize consumes the encoder and returns the finished blob borrowed from the buffer.

//! Prolog encoder state machine.

use std::marker::PhantomData;

use crate::core::{
    AsmReg, ByteWriter, EncoderConfig, IgnoredInstrPolicy, UnwindError, UnwindFormat,
    UnwindResult,
};
use crate::eh_frame::EhFrame;
use crate::machine::{Machine, TableMachine};
use crate::pdata::{
    self, RuntimeFunction, UnwindCode, UnwindCodeTable, UnwindInfoHeader, UnwindOpCode,
    ALLOC_LARGE_SCALED_MAX, MAX_FRAME_OFFSET, RUNTIME_FUNCTION_SIZE,
};
use crate::prolog::op::{UnwindOp, SMALL_ALLOC_MAX};

/// Final placement of a function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub start: u64,
    pub size: u32,
}

type UnwindRegFn = fn(AsmReg) -> UnwindResult<u8>;

/// Windows x64 table under construction.
#[derive(Debug)]
struct TableState<'buf> {
    buffer: &'buf mut [u8],
    codes: UnwindCodeTable,
    /// Register and scaled offset for the UNWIND_INFO header.
    frame_register: Option<(u8, u8)>,
    unwind_reg: UnwindRegFn,
}

/// Call frame information under construction.
#[derive(Debug)]
struct CfiState<'buf> {
    frame: EhFrame<'buf>,
    /// CFA distance from the stack pointer, in pointer units.
    cfa_words: u32,
    /// Instruction offset the last advance directive moved to.
    last_emitted: u32,
    cfa_on_stack_pointer: bool,
}

#[derive(Debug)]
enum Format<'buf> {
    Table(TableState<'buf>),
    EhFrame(CfiState<'buf>),
}

/// Unwind encoder for one function prolog.
#[derive(Debug)]
pub struct PrologEncoder<'buf, M: Machine> {
    format: Format<'buf>,
    ignored: IgnoredInstrPolicy,
    /// End offset of the last instruction seen.
    instr_offset: u32,
    /// Set by the first instruction; the pre-pass is closed from then on.
    started: bool,
    _machine: PhantomData<M>,
}

fn check_multiple(what: &'static str, value: i64, align: u32) -> UnwindResult<()> {
    if value % i64::from(align) != 0 {
        return Err(UnwindError::Misaligned { what, value, align });
    }
    Ok(())
}

impl<'buf, M: Machine> PrologEncoder<'buf, M> {
    fn with_format(format: Format<'buf>, config: EncoderConfig) -> Self {
        Self {
            format,
            ignored: config.ignored_instructions,
            instr_offset: 0,
            started: false,
            _machine: PhantomData,
        }
    }

    /// Encoder emitting `.eh_frame`. The CIE is written immediately.
    pub fn new_eh_frame(buffer: &'buf mut [u8], config: EncoderConfig) -> UnwindResult<Self> {
        let frame = EhFrame::new::<M>(buffer)?;
        log::debug!(
            "prolog encoder: {} eh_frame, ignored instructions {:?}",
            M::NAME,
            config.ignored_instructions
        );

        let state = CfiState {
            frame,
            cfa_words: M::ENTRY_CFA_WORDS,
            last_emitted: 0,
            cfa_on_stack_pointer: true,
        };
        Ok(Self::with_format(Format::EhFrame(state), config))
    }

    pub fn format(&self) -> UnwindFormat {
        match self.format {
            Format::Table(_) => UnwindFormat::Table,
            Format::EhFrame(_) => UnwindFormat::EhFrame,
        }
    }

    /// Offset of the end of the last instruction.
    pub fn instruction_offset(&self) -> u32 {
        self.instr_offset
    }

    /// Current CFA distance from the stack pointer in bytes (`.eh_frame` only).
    pub fn cfa_offset(&self) -> Option<u32> {
        match &self.format {
            Format::EhFrame(cfi) => Some(cfi.cfa_words * M::POINTER_SIZE),
            Format::Table(_) => None,
        }
    }

    /// Offset of the FDE's pc_begin field in the blob (`.eh_frame` only).
    pub fn pc_begin_offset(&self) -> Option<usize> {
        match &self.format {
            Format::EhFrame(cfi) => Some(cfi.frame.pc_begin_offset()),
            Format::Table(_) => None,
        }
    }

    fn reserve(&mut self, count: usize) -> UnwindResult<()> {
        if self.started {
            return Err(UnwindError::PrePassAfterEncoding);
        }
        match &mut self.format {
            Format::Table(table) => table.codes.reserve(count),
            // The byte stream grows as needed.
            Format::EhFrame(_) => Ok(()),
        }
    }

    /// Pre-pass: one `push` of a non-volatile register.
    pub fn record_non_vol_reg_save(&mut self) -> UnwindResult<()> {
        self.reserve(1)
    }

    /// Pre-pass: one 128-bit XMM save.
    pub fn record_xmm_reg_save(&mut self) -> UnwindResult<()> {
        self.reserve(2)
    }

    /// Pre-pass: one stack allocation of `size` bytes.
    pub fn record_alloca(&mut self, size: u32) -> UnwindResult<()> {
        if size == 0 {
            return Err(UnwindError::OutOfRange {
                what: "stack allocation",
                value: 0,
            });
        }
        self.reserve(pdata::alloca_node_count(size))
    }

    /// Pre-pass: one `mov` store of a non-volatile register.
    pub fn record_non_vol_reg_store(&mut self) -> UnwindResult<()> {
        self.reserve(2)
    }

    /// Pre-pass: frame register setup.
    pub fn record_frame_register(&mut self) -> UnwindResult<()> {
        self.reserve(1)
    }

    /// Pre-pass notification derived from the instruction itself.
    pub fn record_instr(&mut self, inst: &M::Inst) -> UnwindResult<()> {
        match M::classify(inst) {
            UnwindOp::PushRegPair { .. } => self.record_non_vol_reg_save(),
            UnwindOp::AllocSmall { size } | UnwindOp::AllocLarge { size } => {
                self.record_alloca(size)
            }
            UnwindOp::SaveReg { .. } => self.record_non_vol_reg_store(),
            UnwindOp::SaveFloatPair { .. } => self.record_xmm_reg_save(),
            UnwindOp::SetFrameRegister { .. } => self.record_frame_register(),
            UnwindOp::SaveFloat { .. } | UnwindOp::Ignore => Ok(()),
        }
    }

    /// Start the prolog at `prolog_start_offset` bytes into the function.
    pub fn begin(&mut self, prolog_start_offset: u32) -> UnwindResult<()> {
        if self.started || self.instr_offset != 0 {
            return Err(UnwindError::PrologAlreadyStarted {
                offset: self.instr_offset,
            });
        }
        self.instr_offset = prolog_start_offset;
        Ok(())
    }

    fn advance(&mut self, size: u8) -> UnwindResult<()> {
        self.instr_offset = self
            .instr_offset
            .checked_add(u32::from(size))
            .ok_or(UnwindError::OffsetOverflow {
                offset: self.instr_offset,
                size: u32::from(size),
            })?;
        Ok(())
    }

    /// Encode the unwind effect of one prolog instruction of `size` bytes.
    pub fn encode_instr(&mut self, inst: &M::Inst, size: u8) -> UnwindResult<()> {
        let op = M::classify(inst);
        log::trace!(
            "{} @{}: {} ({size} bytes)",
            M::NAME,
            self.instr_offset,
            op.name()
        );

        if size == 0 {
            return Err(UnwindError::InvalidInstructionSize {
                offset: self.instr_offset,
            });
        }
        self.started = true;

        if op == UnwindOp::Ignore {
            if self.ignored == IgnoredInstrPolicy::AdvanceOffset {
                self.advance(size)?;
            }
            return Ok(());
        }

        self.advance(size)?;
        let offset = self.instr_offset;
        match &mut self.format {
            Format::Table(table) => table.encode::<M>(op, offset),
            Format::EhFrame(cfi) => cfi.encode::<M>(op, offset),
        }
    }

    /// Encode the canonical small frame without per-instruction calls.
    ///
    /// The table gets a single small allocation of `alloca_size` bytes
    /// ending at `prolog_size`. The call frame record replays the
    /// machine's frame setup and is closed afterwards.
    pub fn encode_small_prolog(&mut self, prolog_size: u8, alloca_size: u32) -> UnwindResult<()> {
        if self.started {
            return Err(UnwindError::PrologAlreadyStarted {
                offset: self.instr_offset,
            });
        }
        self.started = true;

        match &mut self.format {
            Format::Table(table) => {
                let reserved = table.codes.required();
                if reserved != 0 {
                    return Err(UnwindError::SmallPrologAfterPrePass { reserved });
                }
                if !(8..=SMALL_ALLOC_MAX).contains(&alloca_size) {
                    return Err(UnwindError::OutOfRange {
                        what: "small prolog allocation",
                        value: i64::from(alloca_size),
                    });
                }
                check_multiple("small prolog allocation", i64::from(alloca_size), 8)?;

                table.codes.reserve(1)?;
                self.instr_offset = u32::from(prolog_size);
                let info = ((alloca_size - 8) / 8) as u8;
                table.codes.push(
                    UnwindCode::new(prolog_size, UnwindOpCode::AllocSmall, info),
                    &[],
                )
            }
            Format::EhFrame(cfi) => {
                for &(size, op) in M::small_prolog() {
                    self.instr_offset = self
                        .instr_offset
                        .checked_add(u32::from(size))
                        .ok_or(UnwindError::OffsetOverflow {
                            offset: self.instr_offset,
                            size: u32::from(size),
                        })?;
                    cfi.encode::<M>(op, self.instr_offset)?;
                }
                cfi.frame.end()
            }
        }
    }

    /// Close the call frame record. Nothing to do for the table.
    pub fn end(&mut self) -> UnwindResult<()> {
        match &mut self.format {
            Format::EhFrame(cfi) => {
                cfi.frame.end()?;
                log::debug!(
                    "eh_frame closed: {} bytes, prolog {} bytes",
                    cfi.frame.count(),
                    self.instr_offset
                );
                Ok(())
            }
            Format::Table(_) => Ok(()),
        }
    }

    /// Bytes the finished blob occupies.
    pub fn size_of_unwind_data(&self) -> usize {
        match &self.format {
            Format::Table(table) => pdata::size_of_unwind_data(table.codes.required()),
            Format::EhFrame(cfi) => cfi.frame.count(),
        }
    }

    /// Patch in the final code placement and return the blob.
    ///
    /// `unwind_data_address` is where the blob will be copied; the table
    /// format stores it relative to `code.start`.
    pub fn finalize(self, code: CodeRange, unwind_data_address: u64) -> UnwindResult<&'buf [u8]> {
        match self.format {
            Format::Table(table) => {
                if unwind_data_address <= code.start || unwind_data_address % 4 != 0 {
                    return Err(UnwindError::InvalidUnwindPlacement {
                        code_start: code.start,
                        unwind_data: unwind_data_address,
                    });
                }
                let unwritten = table.codes.unwritten();
                if unwritten != 0 {
                    return Err(UnwindError::UnwrittenCodes { unwritten });
                }

                let size_of_prolog =
                    u8::try_from(self.instr_offset).map_err(|_| UnwindError::OutOfRange {
                        what: "prolog size",
                        value: i64::from(self.instr_offset),
                    })?;
                let rva = unwind_data_address - code.start + RUNTIME_FUNCTION_SIZE as u64;
                let unwind_data = u32::try_from(rva).map_err(|_| UnwindError::OutOfRange {
                    what: "unwind data RVA",
                    value: rva as i64,
                })?;
                let (frame_register, frame_offset) = table.frame_register.unwrap_or((0, 0));

                let function = RuntimeFunction {
                    begin_address: 0,
                    end_address: code.size,
                    unwind_data,
                };
                let header = UnwindInfoHeader {
                    flags: 0,
                    size_of_prolog,
                    count_of_codes: table.codes.required() as u8,
                    frame_register,
                    frame_offset,
                };

                let mut writer = ByteWriter::new(table.buffer);
                pdata::write_unwind_data(&mut writer, function, header, &table.codes)?;
                log::debug!(
                    "pdata finalized: {} codes, prolog {} bytes, {} bytes total",
                    header.count_of_codes,
                    size_of_prolog,
                    writer.count()
                );
                Ok(writer.into_written())
            }
            Format::EhFrame(mut cfi) => {
                if !cfi.frame.is_closed() {
                    return Err(UnwindError::RecordOpen);
                }
                cfi.frame
                    .update_address_range(code.start, u64::from(code.size))?;
                log::debug!(
                    "eh_frame finalized: {:#x}+{:#x}, {} bytes",
                    code.start,
                    code.size,
                    cfi.frame.count()
                );
                Ok(cfi.frame.into_bytes())
            }
        }
    }
}

impl<'buf, M: TableMachine> PrologEncoder<'buf, M> {
    /// Encoder emitting a Windows x64 unwind table into `buffer`.
    pub fn new_table(buffer: &'buf mut [u8], config: EncoderConfig) -> Self {
        log::debug!(
            "prolog encoder: {} pdata, ignored instructions {:?}",
            M::NAME,
            config.ignored_instructions
        );

        let state = TableState {
            buffer,
            codes: UnwindCodeTable::new(),
            frame_register: None,
            unwind_reg: M::unwind_reg,
        };
        Self::with_format(Format::Table(state), config)
    }

    /// Encoder for `config.format`.
    pub fn new(buffer: &'buf mut [u8], config: EncoderConfig) -> UnwindResult<Self> {
        match config.format {
            UnwindFormat::Table => Ok(Self::new_table(buffer, config)),
            UnwindFormat::EhFrame => Self::new_eh_frame(buffer, config),
        }
    }
}

impl TableState<'_> {
    fn scaled_offset(sp_offset: i64, scale: u32) -> UnwindResult<u16> {
        if sp_offset < 0 {
            return Err(UnwindError::SaveOutsideFrame {
                sp_offset,
                frame_size: 0,
            });
        }
        check_multiple("save slot offset", sp_offset, scale)?;
        u16::try_from(sp_offset / i64::from(scale)).map_err(|_| UnwindError::OutOfRange {
            what: "save slot offset",
            value: sp_offset,
        })
    }

    /// Windows number of a general-purpose register; push and save codes
    /// can't name anything else.
    fn gp_reg(&self, reg: AsmReg) -> UnwindResult<u8> {
        if !reg.is_gp() {
            return Err(UnwindError::UnmappedRegister {
                reg,
                target: "Windows x64 GPR",
            });
        }
        (self.unwind_reg)(reg)
    }

    fn encode<M: Machine>(&mut self, op: UnwindOp, offset: u32) -> UnwindResult<()> {
        let code_offset = u8::try_from(offset).map_err(|_| UnwindError::OutOfRange {
            what: "prolog offset",
            value: i64::from(offset),
        })?;

        match op {
            UnwindOp::PushRegPair {
                first,
                second: None,
                stack_growth,
                ..
            } if stack_growth == M::POINTER_SIZE => {
                let reg = self.gp_reg(first)?;
                self.codes
                    .push(UnwindCode::new(code_offset, UnwindOpCode::PushNonVol, reg), &[])
            }
            UnwindOp::AllocSmall { size } => {
                if size < 8 {
                    return Err(UnwindError::OutOfRange {
                        what: "stack allocation",
                        value: i64::from(size),
                    });
                }
                check_multiple("stack allocation", i64::from(size), 8)?;
                let info = ((size - 8) / 8) as u8;
                self.codes
                    .push(UnwindCode::new(code_offset, UnwindOpCode::AllocSmall, info), &[])
            }
            UnwindOp::AllocLarge { size } => {
                check_multiple("stack allocation", i64::from(size), 8)?;
                if size <= ALLOC_LARGE_SCALED_MAX {
                    let code = UnwindCode::new(code_offset, UnwindOpCode::AllocLarge, 0);
                    self.codes.push(code, &[(size / 8) as u16])
                } else {
                    let code = UnwindCode::new(code_offset, UnwindOpCode::AllocLarge, 1);
                    self.codes.push(code, &[size as u16, (size >> 16) as u16])
                }
            }
            UnwindOp::SetFrameRegister { offset: fp_offset } => {
                check_multiple("frame register offset", i64::from(fp_offset), 16)?;
                if fp_offset > MAX_FRAME_OFFSET {
                    return Err(UnwindError::OutOfRange {
                        what: "frame register offset",
                        value: i64::from(fp_offset),
                    });
                }
                let reg = (self.unwind_reg)(M::FRAME_POINTER)?;
                self.frame_register = Some((reg, (fp_offset / 16) as u8));
                self.codes
                    .push(UnwindCode::new(code_offset, UnwindOpCode::SetFpReg, 0), &[])
            }
            UnwindOp::SaveReg { reg, sp_offset } => {
                let slot = Self::scaled_offset(sp_offset, 8)?;
                let reg = self.gp_reg(reg)?;
                let code = UnwindCode::new(code_offset, UnwindOpCode::SaveNonVol, reg);
                self.codes.push(code, &[slot])
            }
            UnwindOp::SaveFloatPair {
                first,
                second: None,
                sp_offset,
            } => {
                let slot = Self::scaled_offset(sp_offset, 16)?;
                let reg = (self.unwind_reg)(first)?;
                let code = UnwindCode::new(code_offset, UnwindOpCode::SaveXmm128, reg);
                self.codes.push(code, &[slot])
            }
            other => Err(UnwindError::UnsupportedOp {
                op: other.name(),
                format: UnwindFormat::Table.name(),
            }),
        }
    }
}

impl CfiState<'_> {
    fn cfa_bytes<M: Machine>(&self) -> u64 {
        u64::from(self.cfa_words) * u64::from(M::POINTER_SIZE)
    }

    /// Account for the stack pointer moving down by `bytes`.
    fn grow<M: Machine>(&mut self, what: &'static str, bytes: u32) -> UnwindResult<()> {
        check_multiple(what, i64::from(bytes), M::POINTER_SIZE)?;
        let words = bytes / M::POINTER_SIZE;
        self.cfa_words = self
            .cfa_words
            .checked_add(words)
            .ok_or(UnwindError::OutOfRange {
                what: "CFA offset",
                value: i64::from(self.cfa_words) + i64::from(words),
            })?;
        Ok(())
    }

    fn advance_to(&mut self, offset: u32) -> UnwindResult<()> {
        debug_assert!(offset >= self.last_emitted);
        let delta = offset - self.last_emitted;
        if delta > 0 {
            self.frame.fde()?.advance(delta)?;
            self.last_emitted = offset;
        }
        Ok(())
    }

    fn redefine_cfa_offset<M: Machine>(&mut self) -> UnwindResult<()> {
        if !self.cfa_on_stack_pointer {
            log::trace!("CFA is frame register based, not redefining");
            return Ok(());
        }
        let cfa = self.cfa_bytes::<M>();
        self.frame.fde()?.def_cfa_offset(cfa)
    }

    /// Register column `reg` saved at `sp + sp_offset`.
    fn save<M: Machine>(&mut self, reg: u16, sp_offset: i64) -> UnwindResult<()> {
        let cfa = self.cfa_bytes::<M>() as i64;
        if sp_offset < 0 {
            return Err(UnwindError::SaveOutsideFrame {
                sp_offset,
                frame_size: cfa,
            });
        }
        let distance = cfa - sp_offset;
        check_multiple("save slot distance", distance, M::POINTER_SIZE)?;
        self.frame
            .fde()?
            .offset(reg, distance / i64::from(M::POINTER_SIZE))
    }

    fn save_pair<M: Machine>(
        &mut self,
        first: AsmReg,
        second: Option<AsmReg>,
        sp_offset: i64,
    ) -> UnwindResult<()> {
        let first_column = M::dwarf_reg(first)?;
        let second_column = second.map(M::dwarf_reg).transpose()?;

        self.save::<M>(first_column, sp_offset)?;
        if let Some(column) = second_column {
            // The second register sits above the first.
            self.save::<M>(column, sp_offset + i64::from(M::pair_stride(first)))?;
        }
        Ok(())
    }

    fn encode<M: Machine>(&mut self, op: UnwindOp, offset: u32) -> UnwindResult<()> {
        match op {
            UnwindOp::AllocSmall { size } | UnwindOp::AllocLarge { size } => {
                self.grow::<M>("stack allocation", size)?;
                self.advance_to(offset)?;
                self.redefine_cfa_offset::<M>()
            }
            UnwindOp::PushRegPair {
                first,
                second,
                sp_offset,
                stack_growth,
            } => {
                M::dwarf_reg(first)?;
                if stack_growth > 0 {
                    self.grow::<M>("register push", stack_growth)?;
                }
                self.advance_to(offset)?;
                if stack_growth > 0 {
                    self.redefine_cfa_offset::<M>()?;
                }
                self.save_pair::<M>(first, second, sp_offset)
            }
            UnwindOp::SaveFloatPair {
                first,
                second,
                sp_offset,
            } => {
                M::dwarf_reg(first)?;
                self.advance_to(offset)?;
                self.save_pair::<M>(first, second, sp_offset)
            }
            UnwindOp::SaveReg { reg, sp_offset } | UnwindOp::SaveFloat { reg, sp_offset } => {
                let column = M::dwarf_reg(reg)?;
                self.advance_to(offset)?;
                self.save::<M>(column, sp_offset)
            }
            UnwindOp::SetFrameRegister { offset: fp_offset } => {
                let cfa = self.cfa_bytes::<M>();
                if u64::from(fp_offset) > cfa {
                    return Err(UnwindError::OutOfRange {
                        what: "frame register offset",
                        value: i64::from(fp_offset),
                    });
                }
                let column = M::dwarf_reg(M::FRAME_POINTER)?;
                self.advance_to(offset)?;
                let mut fde = self.frame.fde()?;
                if fp_offset == 0 && self.cfa_on_stack_pointer {
                    // Same distance, only the register changes.
                    fde.def_cfa_register(column)?;
                } else {
                    fde.def_cfa(column, cfa - u64::from(fp_offset))?;
                }
                self.cfa_on_stack_pointer = false;
                Ok(())
            }
            UnwindOp::Ignore => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FP_BANK, GP_BANK};
    use crate::eh_frame::cfi::*;
    use crate::eh_frame::CfiWriter;

    /// Machine whose instructions are already classified.
    #[derive(Debug)]
    struct Scripted;

    const RBP: AsmReg = AsmReg::gp(5);
    const RBX: AsmReg = AsmReg::gp(3);

    static SMALL_PROLOG: [(u8, UnwindOp); 1] = [(
        1,
        UnwindOp::PushRegPair {
            first: RBP,
            second: None,
            sp_offset: 0,
            stack_growth: 8,
        },
    )];

    impl Machine for Scripted {
        type Inst = UnwindOp;

        const NAME: &'static str = "scripted";
        const FRAME_POINTER: AsmReg = RBP;
        const RETURN_ADDRESS_COLUMN: u8 = 16;
        const ENTRY_CFA_WORDS: u32 = 1;

        fn classify(inst: &UnwindOp) -> UnwindOp {
            *inst
        }

        fn dwarf_reg(reg: AsmReg) -> UnwindResult<u16> {
            match reg.bank {
                GP_BANK if reg.id < 16 => Ok(u16::from(reg.id)),
                FP_BANK if reg.id < 32 => Ok(64 + u16::from(reg.id)),
                _ => Err(UnwindError::UnmappedRegister {
                    reg,
                    target: "DWARF",
                }),
            }
        }

        fn pair_stride(_first: AsmReg) -> u32 {
            8
        }

        fn write_cie_initial_instructions(cfi: &mut CfiWriter<'_, '_>) -> UnwindResult<()> {
            cfi.def_cfa(7, 8)?;
            cfi.offset(16, 1)
        }

        fn small_prolog() -> &'static [(u8, UnwindOp)] {
            &SMALL_PROLOG
        }
    }

    impl TableMachine for Scripted {
        fn unwind_reg(reg: AsmReg) -> UnwindResult<u8> {
            if reg.id < 16 {
                Ok(reg.id)
            } else {
                Err(UnwindError::UnmappedRegister {
                    reg,
                    target: "Windows",
                })
            }
        }
    }

    fn eh_config() -> EncoderConfig {
        EncoderConfig::with_format(UnwindFormat::EhFrame)
    }

    /// FDE directives after the fixed 25-byte FDE header, up to padding.
    fn fde_directives(blob: &[u8]) -> Vec<u8> {
        let cie_len = u32::from_le_bytes(blob[0..4].try_into().unwrap()) as usize;
        let fde = cie_len + 4;
        let fde_len = u32::from_le_bytes(blob[fde..fde + 4].try_into().unwrap()) as usize;
        let mut body = blob[fde + 25..fde + 4 + fde_len].to_vec();
        while body.last() == Some(&DW_CFA_NOP) {
            body.pop();
        }
        body
    }

    #[test]
    fn test_push_then_alloc_directives() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        enc.encode_instr(&UnwindOp::push(RBP, 8), 1).unwrap();
        enc.encode_instr(&UnwindOp::alloc(32), 4).unwrap();
        enc.end().unwrap();
        assert_eq!(enc.cfa_offset(), Some(48));

        let blob = enc.finalize(CodeRange { start: 0x1000, size: 0x40 }, 0).unwrap();
        assert_eq!(
            fde_directives(blob),
            vec![
                DW_CFA_ADVANCE_LOC | 1,
                DW_CFA_DEF_CFA_OFFSET,
                16,
                DW_CFA_OFFSET | 5,
                2,
                DW_CFA_ADVANCE_LOC | 4,
                DW_CFA_DEF_CFA_OFFSET,
                48,
            ]
        );
    }

    #[test]
    fn test_frame_register_stops_cfa_offset_updates() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        enc.encode_instr(&UnwindOp::alloc(24), 4).unwrap();
        enc.encode_instr(&UnwindOp::SetFrameRegister { offset: 16 }, 4)
            .unwrap();
        enc.encode_instr(&UnwindOp::alloc(64), 4).unwrap();
        enc.encode_instr(&UnwindOp::SaveReg { reg: RBX, sp_offset: 8 }, 4)
            .unwrap();
        enc.end().unwrap();

        let blob = enc.finalize(CodeRange { start: 0, size: 16 }, 0).unwrap();
        assert_eq!(
            fde_directives(blob),
            vec![
                DW_CFA_ADVANCE_LOC | 4,
                DW_CFA_DEF_CFA_OFFSET,
                32,
                DW_CFA_ADVANCE_LOC | 4,
                DW_CFA_DEF_CFA,
                5,
                16,
                DW_CFA_ADVANCE_LOC | 4,
                // No def_cfa_offset for the second allocation.
                DW_CFA_ADVANCE_LOC | 4,
                // rbx at sp+8 with the CFA 96 bytes above sp.
                DW_CFA_OFFSET | 3,
                11,
            ]
        );
    }

    #[test]
    fn test_ignored_instruction_policies() {
        for (policy, advance) in [
            (IgnoredInstrPolicy::AdvanceOffset, 7u8),
            (IgnoredInstrPolicy::Invisible, 4u8),
        ] {
            let mut buf = [0u8; 256];
            let config = eh_config().ignored_instructions(policy);
            let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, config).unwrap();
            enc.encode_instr(&UnwindOp::alloc(16), 4).unwrap();
            enc.encode_instr(&UnwindOp::Ignore, 3).unwrap();
            enc.encode_instr(&UnwindOp::SaveReg { reg: RBX, sp_offset: 0 }, 4)
                .unwrap();
            enc.end().unwrap();

            let blob = enc.finalize(CodeRange { start: 0, size: 16 }, 0).unwrap();
            let directives = fde_directives(blob);
            assert_eq!(directives[3], DW_CFA_ADVANCE_LOC | advance, "{policy:?}");
        }
    }

    #[test]
    fn test_zero_size_instruction_rejected() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        assert_eq!(
            enc.encode_instr(&UnwindOp::alloc(16), 0),
            Err(UnwindError::InvalidInstructionSize { offset: 0 })
        );
    }

    #[test]
    fn test_inexact_save_rejected() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        enc.encode_instr(&UnwindOp::alloc(16), 4).unwrap();
        let err = enc
            .encode_instr(&UnwindOp::SaveReg { reg: RBX, sp_offset: 4 }, 4)
            .unwrap_err();
        assert!(matches!(err, UnwindError::Misaligned { align: 8, .. }));
    }

    #[test]
    fn test_begin_offsets_first_advance() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        enc.begin(16).unwrap();
        enc.encode_instr(&UnwindOp::push(RBP, 8), 1).unwrap();
        assert_eq!(enc.begin(0), Err(UnwindError::PrologAlreadyStarted { offset: 17 }));
        enc.end().unwrap();

        let blob = enc.finalize(CodeRange { start: 0, size: 32 }, 0).unwrap();
        assert_eq!(fde_directives(blob)[0], DW_CFA_ADVANCE_LOC | 17);
    }

    #[test]
    fn test_finalize_requires_closed_record() {
        let mut buf = [0u8; 256];
        let enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        assert_eq!(
            enc.finalize(CodeRange { start: 0, size: 1 }, 0).unwrap_err(),
            UnwindError::RecordOpen
        );
    }

    #[test]
    fn test_frame_register_at_stack_pointer_keeps_offset() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        enc.encode_instr(&UnwindOp::push(RBP, 8), 1).unwrap();
        enc.encode_instr(&UnwindOp::SetFrameRegister { offset: 0 }, 3)
            .unwrap();
        enc.encode_instr(&UnwindOp::alloc(32), 4).unwrap();
        enc.end().unwrap();

        let blob = enc.finalize(CodeRange { start: 0, size: 16 }, 0).unwrap();
        assert_eq!(
            fde_directives(blob),
            vec![
                DW_CFA_ADVANCE_LOC | 1,
                DW_CFA_DEF_CFA_OFFSET,
                16,
                DW_CFA_OFFSET | 5,
                2,
                DW_CFA_ADVANCE_LOC | 3,
                DW_CFA_DEF_CFA_REGISTER,
                5,
                DW_CFA_ADVANCE_LOC | 4,
            ]
        );
    }

    #[test]
    fn test_terminator_overflow_fails_finalize() {
        // Room for the CIE and the padded FDE but not the terminator.
        let mut buf = [0u8; 56];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        assert!(matches!(
            enc.end(),
            Err(UnwindError::BufferOverflow { needed: 60, .. })
        ));
        assert_eq!(
            enc.finalize(CodeRange { start: 0x1000, size: 8 }, 0)
                .unwrap_err(),
            UnwindError::RecordOpen
        );
    }

    #[test]
    fn test_small_prolog_eh_frame() {
        let mut buf = [0u8; 256];
        let mut enc = PrologEncoder::<Scripted>::new_eh_frame(&mut buf, eh_config()).unwrap();
        enc.encode_small_prolog(1, 16).unwrap();
        let blob = enc.finalize(CodeRange { start: 0, size: 8 }, 0).unwrap();
        assert_eq!(
            fde_directives(blob),
            vec![DW_CFA_ADVANCE_LOC | 1, DW_CFA_DEF_CFA_OFFSET, 16, DW_CFA_OFFSET | 5, 2]
        );
    }

    #[test]
    fn test_table_prolog() {
        let mut buf = [0u8; 128];
        let mut enc = PrologEncoder::<Scripted>::new_table(&mut buf, EncoderConfig::default());
        enc.record_non_vol_reg_save().unwrap();
        enc.record_alloca(0x200).unwrap();
        enc.record_non_vol_reg_store().unwrap();
        assert_eq!(enc.size_of_unwind_data(), 12 + 4 + 2 * 6);

        enc.encode_instr(&UnwindOp::push(RBX, 8), 1).unwrap();
        enc.encode_instr(&UnwindOp::alloc(0x200), 7).unwrap();
        enc.encode_instr(&UnwindOp::SaveReg { reg: RBP, sp_offset: 0x10 }, 5)
            .unwrap();
        assert_eq!(enc.record_alloca(8), Err(UnwindError::PrePassAfterEncoding));

        let blob = enc
            .finalize(CodeRange { start: 0x1000, size: 0x80 }, 0x1080)
            .unwrap();
        assert_eq!(blob.len(), 28);
        assert_eq!(&blob[4..8], &0x80u32.to_le_bytes());
        assert_eq!(&blob[8..12], &(0x80u32 + 12).to_le_bytes());
        assert_eq!(&blob[12..16], &[0x01, 13, 5, 0x00]);
        #[rustfmt::skip]
        assert_eq!(
            &blob[16..],
            &[
                13, 0x54, 0x02, 0x00, // save rbp at rsp+16
                8, 0x01, 0x40, 0x00,  // alloc 0x200
                1, 0x30,              // push rbx
                0x00, 0x00,           // padding
            ]
        );
    }

    #[test]
    fn test_table_frame_register_header() {
        let mut buf = [0u8; 64];
        let mut enc = PrologEncoder::<Scripted>::new_table(&mut buf, EncoderConfig::default());
        enc.record_non_vol_reg_save().unwrap();
        enc.record_frame_register().unwrap();
        enc.encode_instr(&UnwindOp::push(RBP, 8), 1).unwrap();
        enc.encode_instr(&UnwindOp::SetFrameRegister { offset: 32 }, 5)
            .unwrap();

        let blob = enc.finalize(CodeRange { start: 0, size: 16 }, 16).unwrap();
        assert_eq!(blob[15], 5 | (2 << 4));
        assert_eq!(&blob[16..18], &[6, 0x03]);
    }

    #[test]
    fn test_table_unwritten_codes() {
        let mut buf = [0u8; 64];
        let mut enc = PrologEncoder::<Scripted>::new_table(&mut buf, EncoderConfig::default());
        enc.record_non_vol_reg_save().unwrap();
        enc.record_non_vol_reg_save().unwrap();
        enc.encode_instr(&UnwindOp::push(RBP, 8), 1).unwrap();
        assert_eq!(
            enc.finalize(CodeRange { start: 0, size: 16 }, 16).unwrap_err(),
            UnwindError::UnwrittenCodes { unwritten: 1 }
        );
    }

    #[test]
    fn test_table_rejects_float_pair() {
        let mut buf = [0u8; 64];
        let mut enc = PrologEncoder::<Scripted>::new_table(&mut buf, EncoderConfig::default());
        enc.record_xmm_reg_save().unwrap();
        let op = UnwindOp::SaveFloatPair {
            first: AsmReg::fp(8),
            second: Some(AsmReg::fp(9)),
            sp_offset: 0,
        };
        assert_eq!(
            enc.encode_instr(&op, 4),
            Err(UnwindError::UnsupportedOp {
                op: "SAVE_FLOAT_PAIR",
                format: "pdata"
            })
        );
    }

    #[test]
    fn test_table_save_needs_gpr() {
        let mut buf = [0u8; 64];
        let mut enc = PrologEncoder::<Scripted>::new_table(&mut buf, EncoderConfig::default());
        enc.record_non_vol_reg_store().unwrap();
        let xmm6 = AsmReg::fp(6);
        let op = UnwindOp::SaveReg {
            reg: xmm6,
            sp_offset: 8,
        };
        assert_eq!(
            enc.encode_instr(&op, 5),
            Err(UnwindError::UnmappedRegister {
                reg: xmm6,
                target: "Windows x64 GPR"
            })
        );
    }

    #[test]
    fn test_table_small_prolog() {
        let mut buf = [0u8; 64];
        let mut enc = PrologEncoder::<Scripted>::new_table(&mut buf, EncoderConfig::default());
        enc.encode_small_prolog(4, 40).unwrap();
        let blob = enc.finalize(CodeRange { start: 0, size: 16 }, 16).unwrap();
        assert_eq!(&blob[12..16], &[0x01, 4, 1, 0]);
        assert_eq!(&blob[16..18], &[4, 0x42]);
    }
}
