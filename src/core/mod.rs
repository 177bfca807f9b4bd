// This module serves as the central hub for the infrastructure shared by both unwind formats
// and all target architectures. It exports the error type used throughout the crate, the
// register identity (bank + hardware encoding) that classifiers hand to the encoders, the
// fixed-capacity byte writer with positional write-back that every blob is built in, the
// LEB128 encoders underlying the call-frame-information byte stream, and the encoder
// configuration (target format, handling of ignored instructions). Nothing in here knows
// about a particular architecture or unwind format; those live in x64/, arm64/, eh_frame/
// and pdata.

//! Core infrastructure
//!
//! # Key Components
//!
//! ## Byte Writer (`byte_writer`)
//! - Caller-allocated, never reallocating buffer
//! - Positional write-back for length and address fix-ups
//!
//! ## LEB128 (`leb128`)
//! - Unsigned and signed base-128 encoders over a raw cursor
//!
//! ## Registers (`register`)
//! - Architecture-neutral register identity
//!
//! ## Configuration (`config`)
//! - Target format and ignored-instruction policy

pub mod byte_writer;
pub mod config;
pub mod error;
pub mod leb128;
pub mod register;

pub use byte_writer::{ByteWriter, LeBytes};
pub use config::{EncoderConfig, IgnoredInstrPolicy, UnwindFormat};
pub use error::{UnwindError, UnwindResult};
pub use register::{AsmReg, RegBank, RegId, FP_BANK, GP_BANK};
