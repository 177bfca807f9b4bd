//! Prolog unwind encoding.
//!
//! The lowering pass hands every prolog instruction to a [`PrologEncoder`]
//! as it is emitted. The machine classifier reduces the instruction to an
//! [`UnwindOp`], and the encoder turns that into either Windows x64 unwind
//! codes or DWARF call frame directives, depending on the format chosen when
//! the encoder was built.

pub mod encoder;
pub mod op;

pub use encoder::{CodeRange, PrologEncoder};
pub use op::{UnwindOp, SMALL_ALLOC_MAX};
