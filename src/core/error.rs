// This module defines error types for the unwind metadata generator using the thiserror crate.
// UnwindError covers every way a prolog can fail to produce a trustworthy unwind blob: buffer
// capacity exhausted, registers without a target-format number, zero-sized instructions, byte
// distances that do not divide exactly by the data alignment factor, operations that the
// selected format cannot express, exhausted or partially filled unwind-code tables, and misuse
// of the record lifecycle. Each variant carries the values needed to diagnose the caller bug.
// None of these are recoverable inside the encoder; the JIT must abandon compilation of the
// function so that code without correct unwind data is never installed. UnwindResult<T> is the
// convenience alias used throughout the crate.

//! Error types for unwind metadata generation.
//!
//! Using thiserror for idiomatic error handling.

use crate::core::register::AsmReg;
use thiserror::Error;

/// Main error type for unwind encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnwindError {
    #[error("Unwind buffer overflow: {needed} bytes needed, capacity is {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },

    #[error("Write-back at {position}+{len} lies beyond written data ({count} bytes)")]
    InvalidWriteBack {
        position: usize,
        len: usize,
        count: usize,
    },

    #[error("Register {reg:?} has no {target} register number")]
    UnmappedRegister { reg: AsmReg, target: &'static str },

    #[error("Cannot decode instruction at offset {offset}")]
    UndecodableInstruction { offset: usize },

    #[error("Instruction size must be non-zero (offset {offset})")]
    InvalidInstructionSize { offset: u32 },

    #[error("Instruction offset overflow: {offset} + {size}")]
    OffsetOverflow { offset: u32, size: u32 },

    #[error("{what} of {value} bytes is not a multiple of {align}")]
    Misaligned {
        what: &'static str,
        value: i64,
        align: u32,
    },

    #[error("Save slot at sp+{sp_offset} lies outside the {frame_size}-byte frame")]
    SaveOutsideFrame { sp_offset: i64, frame_size: i64 },

    #[error("Value {value} out of range for {what}")]
    OutOfRange { what: &'static str, value: i64 },

    #[error("{op} cannot be expressed in the {format} format")]
    UnsupportedOp {
        op: &'static str,
        format: &'static str,
    },

    #[error("Unwind code table exhausted: {requested} codes requested, {available} left")]
    TableExhausted { requested: usize, available: usize },

    #[error("Unwind code table has {count} codes, maximum is {max}")]
    TooManyCodes { count: usize, max: usize },

    #[error("{unwritten} unwind code slots were reserved but never written")]
    UnwrittenCodes { unwritten: usize },

    #[error("Pre-pass notification after encoding started")]
    PrePassAfterEncoding,

    #[error("Prolog already started at offset {offset}")]
    PrologAlreadyStarted { offset: u32 },

    #[error("Small prolog cannot follow a pre-pass that reserved {reserved} codes")]
    SmallPrologAfterPrePass { reserved: usize },

    #[error("Frame description record is already closed")]
    RecordClosed,

    #[error("Frame description record is still open")]
    RecordOpen,

    #[error("Unwind data at {unwind_data:#x} must follow code at {code_start:#x} and be 4-byte aligned")]
    InvalidUnwindPlacement { code_start: u64, unwind_data: u64 },

    #[error("Object emission failed: {0}")]
    ObjectWrite(String),
}

/// Result type alias for unwind operations.
pub type UnwindResult<T> = Result<T, UnwindError>;
