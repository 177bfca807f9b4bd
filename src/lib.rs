//! jit-unwind - stack-unwind metadata for JIT-compiled functions.
//!
//! A JIT has no compiler-emitted unwind sections, so it must describe each
//! function's prolog itself before the code becomes reachable by an unwinder.
//! This crate turns the prolog instruction stream into either a Windows x64
//! unwind table or a minimal `.eh_frame`.
//!
//! # Primary Usage
//!
//! ```ignore
//! use jit_unwind::core::{EncoderConfig, UnwindFormat};
//! use jit_unwind::prolog::{CodeRange, PrologEncoder};
//! use jit_unwind::x64::X64;
//!
//! let mut buffer = [0u8; 256];
//! let config = EncoderConfig::with_format(UnwindFormat::EhFrame);
//! let mut encoder = PrologEncoder::<X64>::new(&mut buffer, config)?;
//! for (inst, size) in &prolog {
//!     encoder.encode_instr(inst, *size)?;
//! }
//! encoder.end()?;
//! let blob = encoder.finalize(CodeRange { start, size }, unwind_address)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Byte writer, LEB128, registers, configuration, errors
//! - [`eh_frame`] - CIE/FDE assembly and call frame directives
//! - [`pdata`] - Windows x64 `RUNTIME_FUNCTION`/`UNWIND_INFO`
//! - [`prolog`] - The prolog encoder and its abstract operations
//! - [`machine`] - Per-architecture abstraction
//! - [`x64`], [`arm64`] - Classifiers and register tables
//! - [`elf`] - Relocatable objects for inspecting `.eh_frame` output

pub mod arm64;
pub mod core;
pub mod eh_frame;
pub mod elf;
pub mod machine;
pub mod pdata;
pub mod prolog;
pub mod x64;

pub use crate::core::{EncoderConfig, IgnoredInstrPolicy, UnwindError, UnwindFormat, UnwindResult};
pub use crate::machine::{Machine, TableMachine};
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub use crate::machine::HostMachine;
pub use crate::prolog::{CodeRange, PrologEncoder, UnwindOp};
