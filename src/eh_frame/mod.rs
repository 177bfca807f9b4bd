// This module assembles the minimal call frame information section a JIT attaches to each
// compiled function: one common information entry (CIE), one frame description entry (FDE)
// and a zero-length terminator. Both entries share the same shape: a 32-bit length
// placeholder written when the entry is opened, the entry body, DW_CFA_nop padding up to the
// pointer size, and the length patched in when the entry is closed. The CIE is written and
// closed inside EhFrame::new, using the machine's return-address column and initial
// instructions, so a constructed EhFrame always has an open FDE ready for directives. The
// FDE's pc_begin/pc_range fields are zero placeholders until update_address_range patches them
// with the final code placement; an unpatched FDE describes an empty range, which unwinders
// treat as "never executing". The entry state is tracked explicitly (unopened, open at a given
// offset, closed) so that emitting into a closed FDE or closing it twice is reported as an
// error instead of corrupting the length field.

//! `.eh_frame` assembly.
//!
//! The layout written by [`EhFrame`]:
//!
//! ```text
//! CIE  length:u32 id:u32=0 version:u8=1 "zR\0" code_align:uleb=1
//!      data_align:sleb=-8 ra_column:u8 aug_len:uleb=1 enc:u8=absptr
//!      initial instructions, nop padding
//! FDE  length:u32 cie_pointer:u32 pc_begin:u64 pc_range:u64 aug_len:uleb=0
//!      directives, nop padding
//! END  u32 = 0
//! ```

pub mod cfi;

pub use cfi::CfiWriter;

use crate::core::{ByteWriter, UnwindError, UnwindResult};
use crate::machine::Machine;

/// `DW_EH_PE_absptr`: pointers in the FDE are absolute, pointer-sized.
pub const DW_EH_PE_ABSPTR: u8 = 0x00;

const CIE_ID: u32 = 0;
const CIE_VERSION: u8 = 1;
const CIE_AUGMENTATION: &[u8] = b"zR\0";
const CODE_ALIGNMENT_FACTOR: u64 = 1;
const TERMINATOR_SIZE: usize = std::mem::size_of::<u32>();

/// Lifecycle of one length-prefixed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Unopened,
    /// Open; the length placeholder lives at this offset.
    Open(usize),
    Closed,
}

impl Entry {
    /// Write the length placeholder and remember where it is.
    fn begin(&mut self, writer: &mut ByteWriter<'_>) -> UnwindResult<()> {
        debug_assert_eq!(*self, Entry::Unopened);
        let begin = writer.count();
        writer.write(0u32)?;
        *self = Entry::Open(begin);
        Ok(())
    }

    /// Pad with nops to `align` and patch the length, which excludes the
    /// length field itself. `trailing` more bytes must fit after the
    /// padding; the entry stays open if they don't.
    fn end(
        &mut self,
        writer: &mut ByteWriter<'_>,
        align: usize,
        trailing: usize,
    ) -> UnwindResult<()> {
        let Entry::Open(begin) = *self else {
            return Err(UnwindError::RecordClosed);
        };

        let padding = (align - writer.count() % align) % align;
        let needed = writer.count() + padding + trailing;
        if needed > writer.capacity() {
            return Err(UnwindError::BufferOverflow {
                needed,
                capacity: writer.capacity(),
            });
        }

        let mut cfi = CfiWriter::new(writer);
        for _ in 0..padding {
            cfi.nop()?;
        }

        let length = writer.count() - begin - std::mem::size_of::<u32>();
        let length = u32::try_from(length).map_err(|_| UnwindError::OutOfRange {
            what: "entry length",
            value: length as i64,
        })?;
        writer.write_at(begin, length)?;
        *self = Entry::Closed;
        Ok(())
    }
}

/// One CIE, one FDE and the terminator, built in a caller-supplied buffer.
#[derive(Debug)]
pub struct EhFrame<'buf> {
    writer: ByteWriter<'buf>,
    fde: Entry,
    /// Offset of the FDE's pc_begin field; pc_range follows it.
    pc_begin_offset: usize,
    pointer_size: usize,
}

impl<'buf> EhFrame<'buf> {
    /// Write the CIE for machine `M` and open the FDE.
    pub fn new<M: Machine>(buffer: &'buf mut [u8]) -> UnwindResult<Self> {
        let pointer_size = M::POINTER_SIZE as usize;
        let mut writer = ByteWriter::new(buffer);

        let mut cie = Entry::Unopened;
        debug_assert_eq!(writer.count(), 0);
        cie.begin(&mut writer)?;
        writer.write(CIE_ID)?;
        writer.write(CIE_VERSION)?;
        writer.write_bytes(CIE_AUGMENTATION)?;
        writer.write_uleb128(CODE_ALIGNMENT_FACTOR)?;
        writer.write_sleb128(-i64::from(M::POINTER_SIZE))?;
        writer.write(M::RETURN_ADDRESS_COLUMN)?;
        // Augmentation data: just the FDE pointer encoding.
        writer.write_uleb128(1)?;
        writer.write(DW_EH_PE_ABSPTR)?;
        M::write_cie_initial_instructions(&mut CfiWriter::new(&mut writer))?;
        cie.end(&mut writer, pointer_size, 0)?;

        let cie_size = writer.count();
        let mut fde = Entry::Unopened;
        fde.begin(&mut writer)?;
        // Distance from this field back to the CIE at offset 0.
        let cie_pointer = writer.count() as u32;
        writer.write(cie_pointer)?;
        let pc_begin_offset = writer.count();
        writer.write(0u64)?;
        writer.write(0u64)?;
        writer.write_uleb128(0)?;

        log::debug!("eh_frame for {}: CIE {cie_size} bytes, FDE open", M::NAME);

        Ok(Self {
            writer,
            fde,
            pc_begin_offset,
            pointer_size,
        })
    }

    /// Directive writer for the open FDE.
    pub fn fde(&mut self) -> UnwindResult<CfiWriter<'_, 'buf>> {
        match self.fde {
            Entry::Open(_) => Ok(CfiWriter::new(&mut self.writer)),
            _ => Err(UnwindError::RecordClosed),
        }
    }

    /// Close the FDE and append the terminator. On overflow nothing is
    /// closed, so the record can never be finalized without its terminator.
    pub fn end(&mut self) -> UnwindResult<()> {
        self.fde
            .end(&mut self.writer, self.pointer_size, TERMINATOR_SIZE)?;
        self.writer.write(0u32)
    }

    pub fn is_closed(&self) -> bool {
        self.fde == Entry::Closed
    }

    /// Patch the FDE's pc_begin and pc_range placeholders.
    pub fn update_address_range(&mut self, pc_begin: u64, pc_range: u64) -> UnwindResult<()> {
        log::trace!("FDE range {pc_begin:#x}+{pc_range:#x}");
        self.writer.write_at(self.pc_begin_offset, pc_begin)?;
        self.writer.write_at(self.pc_begin_offset + 8, pc_range)
    }

    /// Offset of the FDE's pc_begin field, for relocating the blob.
    pub fn pc_begin_offset(&self) -> usize {
        self.pc_begin_offset
    }

    pub fn count(&self) -> usize {
        self.writer.count()
    }

    pub fn written(&self) -> &[u8] {
        self.writer.written()
    }

    pub fn into_bytes(self) -> &'buf [u8] {
        self.writer.into_written()
    }
}
