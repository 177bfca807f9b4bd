// This module implements the table-based unwind format of Windows x64: a RUNTIME_FUNCTION
// record (begin, end and unwind-data RVAs, 12 bytes) immediately followed by an UNWIND_INFO
// header (version/flags, prolog size, code count, frame register/offset, 4 bytes) and the
// array of 16-bit UNWIND_CODE nodes. The unwinder walks the code array from index 0 and expects
// the operation that executed last in the prolog to come first, so the table is filled
// back-to-front: the total node count is fixed by the pre-pass notifications before encoding
// begins, a cursor starts at that count, and each operation moves the cursor down by the number
// of nodes it occupies and writes its nodes at the new cursor position. The cursor is separate
// from the instruction offset tracked by the prolog encoder. The table has a fixed capacity of
// 34 nodes, which is what the JIT reserves for unwind data; the array is padded with one
// zero node when its length is odd so the serialized UNWIND_INFO stays 4-byte aligned.

//! Windows x64 unwind tables.

use crate::core::{ByteWriter, UnwindError, UnwindResult};
use crate::prolog::op::SMALL_ALLOC_MAX;

/// Capacity of the unwind-code array.
pub const MAX_UNWIND_CODES: usize = 34;

pub const UNWIND_INFO_VERSION: u8 = 1;

/// `BeginAddress`, `EndAddress`, `UnwindData`.
pub const RUNTIME_FUNCTION_SIZE: usize = 12;

/// Fixed part of `UNWIND_INFO` before the code array.
pub const UNWIND_INFO_HEADER_SIZE: usize = 4;

/// Largest allocation expressed with a scaled 16-bit `UWOP_ALLOC_LARGE`.
pub const ALLOC_LARGE_SCALED_MAX: u32 = 0x7ff8;

/// Largest frame-register offset, in bytes.
pub const MAX_FRAME_OFFSET: u32 = 15 * 16;

/// `UWOP_*` operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnwindOpCode {
    PushNonVol = 0,
    AllocLarge = 1,
    AllocSmall = 2,
    SetFpReg = 3,
    SaveNonVol = 4,
    SaveXmm128 = 8,
}

/// First node of an unwind operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindCode {
    /// Offset of the end of the instruction within the prolog.
    pub code_offset: u8,
    pub op: UnwindOpCode,
    /// Operation info nibble.
    pub info: u8,
}

impl UnwindCode {
    pub fn new(code_offset: u8, op: UnwindOpCode, info: u8) -> Self {
        debug_assert!(info <= 0xf, "op info {info} does not fit a nibble");
        Self {
            code_offset,
            op,
            info,
        }
    }

    /// Node as stored: offset in the low byte, op and info in the high byte.
    pub fn to_node(self) -> u16 {
        u16::from_le_bytes([self.code_offset, self.op as u8 | (self.info << 4)])
    }
}

/// Number of nodes an allocation of `size` bytes occupies.
pub fn alloca_node_count(size: u32) -> usize {
    if size <= SMALL_ALLOC_MAX {
        1
    } else if size <= ALLOC_LARGE_SCALED_MAX {
        2
    } else {
        3
    }
}

/// Bytes of `RUNTIME_FUNCTION` plus `UNWIND_INFO` for `code_count` nodes.
pub fn size_of_unwind_data(code_count: usize) -> usize {
    RUNTIME_FUNCTION_SIZE + UNWIND_INFO_HEADER_SIZE + 2 * (code_count + code_count % 2)
}

/// Fixed-capacity unwind-code array filled from the back.
#[derive(Debug, Clone)]
pub struct UnwindCodeTable {
    nodes: [u16; MAX_UNWIND_CODES],
    /// Node count announced by the pre-pass.
    required: usize,
    /// Next free slot is `cursor - 1`; set to `required` at the first push.
    cursor: Option<usize>,
}

impl Default for UnwindCodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UnwindCodeTable {
    pub fn new() -> Self {
        Self {
            nodes: [0; MAX_UNWIND_CODES],
            required: 0,
            cursor: None,
        }
    }

    /// Announce `count` more nodes. Only legal before the first push.
    pub fn reserve(&mut self, count: usize) -> UnwindResult<()> {
        if self.cursor.is_some() {
            return Err(UnwindError::PrePassAfterEncoding);
        }
        let required = self.required + count;
        if required > MAX_UNWIND_CODES {
            return Err(UnwindError::TooManyCodes {
                count: required,
                max: MAX_UNWIND_CODES,
            });
        }
        self.required = required;
        Ok(())
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Slots reserved but not yet written.
    pub fn unwritten(&self) -> usize {
        self.cursor.unwrap_or(self.required)
    }

    /// Write `code` and its `payload` nodes below the previously written
    /// operation.
    pub fn push(&mut self, code: UnwindCode, payload: &[u16]) -> UnwindResult<()> {
        let count = 1 + payload.len();
        let cursor = self.cursor.unwrap_or(self.required);
        if count > cursor {
            return Err(UnwindError::TableExhausted {
                requested: count,
                available: cursor,
            });
        }

        let slot = cursor - count;
        self.nodes[slot] = code.to_node();
        self.nodes[slot + 1..cursor].copy_from_slice(payload);
        self.cursor = Some(slot);

        log::trace!("UWOP {:?} info {} at {} -> slot {slot}", code.op, code.info, code.code_offset);
        Ok(())
    }

    /// Written nodes in unwinder order.
    pub fn nodes(&self) -> &[u16] {
        &self.nodes[..self.required]
    }
}

/// `RUNTIME_FUNCTION`, addresses relative to the image base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeFunction {
    pub begin_address: u32,
    pub end_address: u32,
    pub unwind_data: u32,
}

/// `UNWIND_INFO` header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnwindInfoHeader {
    pub flags: u8,
    pub size_of_prolog: u8,
    pub count_of_codes: u8,
    pub frame_register: u8,
    /// Scaled by 16.
    pub frame_offset: u8,
}

impl UnwindInfoHeader {
    fn to_bytes(self) -> [u8; UNWIND_INFO_HEADER_SIZE] {
        [
            UNWIND_INFO_VERSION | (self.flags << 3),
            self.size_of_prolog,
            self.count_of_codes,
            self.frame_register | (self.frame_offset << 4),
        ]
    }
}

/// Serialize `RUNTIME_FUNCTION`, `UNWIND_INFO` and the code array.
pub fn write_unwind_data(
    writer: &mut ByteWriter<'_>,
    function: RuntimeFunction,
    header: UnwindInfoHeader,
    table: &UnwindCodeTable,
) -> UnwindResult<()> {
    debug_assert_eq!(usize::from(header.count_of_codes), table.required());

    writer.write(function.begin_address)?;
    writer.write(function.end_address)?;
    writer.write(function.unwind_data)?;
    writer.write_bytes(&header.to_bytes())?;
    for &node in table.nodes() {
        writer.write(node)?;
    }
    if table.required() % 2 == 1 {
        writer.write(0u16)?;
    }
    Ok(())
}
