//! Unwind data generator binary.
//!
//! Decodes an x86-64 prolog given as hex bytes, runs it through the prolog
//! encoder and writes the resulting blob, either raw or wrapped in an ELF
//! object for inspection with `readelf --debug-dump=frames`.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use jit_unwind::core::{EncoderConfig, IgnoredInstrPolicy, UnwindFormat};
use jit_unwind::prolog::{CodeRange, PrologEncoder};
use jit_unwind::x64::{self, X64};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Windows x64 RUNTIME_FUNCTION + UNWIND_INFO
    Pdata,
    /// Minimal .eh_frame
    EhFrame,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Ignored {
    Advance,
    Invisible,
}

#[derive(Debug, Parser)]
#[command(name = "unwindgen", about = "Encode unwind data for an x86-64 prolog")]
struct Args {
    /// Prolog machine code as hex, e.g. "55 48 89 e5 48 83 ec 20"
    prolog: String,

    #[arg(long, value_enum, default_value = "eh-frame")]
    format: Format,

    /// How instructions without unwind effect count toward offsets
    #[arg(long, value_enum, default_value = "advance")]
    ignored: Ignored,

    /// Address of the function's first byte
    #[arg(long, default_value_t = 0, value_parser = parse_address)]
    code_start: u64,

    /// Function size in bytes (defaults to the prolog size)
    #[arg(long)]
    code_size: Option<u32>,

    /// Write the blob here instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Wrap the prolog and .eh_frame in an ELF object
    #[arg(long)]
    object: bool,
}

fn parse_address(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid address {s}: {e}"))
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b',')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {s:?}"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(pair, 16).map_err(|e| format!("invalid byte {pair:?}: {e}"))
        })
        .collect()
}

fn print_hex(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:08x}  {}", row * 16, line.join(" "));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let code = parse_hex(&args.prolog)?;
    let instructions = x64::decode_prolog(&code, args.code_start)?;
    let code_size = args.code_size.unwrap_or(code.len() as u32);

    let format = match args.format {
        Format::Pdata => UnwindFormat::Table,
        Format::EhFrame => UnwindFormat::EhFrame,
    };
    let policy = match args.ignored {
        Ignored::Advance => IgnoredInstrPolicy::AdvanceOffset,
        Ignored::Invisible => IgnoredInstrPolicy::Invisible,
    };
    let config = EncoderConfig::with_format(format).ignored_instructions(policy);

    let mut buffer = [0u8; 512];
    let mut encoder = PrologEncoder::<X64>::new(&mut buffer, config)?;
    for (inst, _) in &instructions {
        encoder.record_instr(inst)?;
    }
    for (inst, size) in &instructions {
        encoder.encode_instr(inst, *size)?;
    }
    encoder.end()?;

    if args.object && format != UnwindFormat::EhFrame {
        return Err("--object needs --format eh-frame".into());
    }

    // Unwind data follows the code, 4-byte aligned.
    let unwind_data_address = (args.code_start + u64::from(code_size) + 3) & !3;
    let pc_begin_offset = encoder.pc_begin_offset();
    // In an object the FDE is relocated against .text instead.
    let start = if args.object { 0 } else { args.code_start };
    let range = CodeRange {
        start,
        size: code_size,
    };
    let blob = encoder.finalize(range, unwind_data_address)?;

    let output = match pc_begin_offset {
        Some(pc_begin_offset) if args.object => jit_unwind::elf::write_object(
            object::Architecture::X86_64,
            "jit_function",
            &code,
            blob,
            pc_begin_offset,
        )?,
        _ => blob.to_vec(),
    };

    match &args.output {
        Some(path) => fs::write(path, &output)?,
        None => print_hex(&output),
    }
    Ok(())
}
