// This module wraps a compiled function and its .eh_frame blob into a relocatable ELF object so
// the unwind data can be inspected with standard tools (readelf --debug-dump=frames, objdump
// --dwarf=frames) or linked into a test binary. The code goes into .text with a function
// symbol at offset 0, the blob goes into .eh_frame unchanged, and the FDE's pc_begin field is
// covered by an absolute 64-bit relocation against the .text section symbol, so the linker or
// reader resolves the function address instead of trusting whatever the JIT patched in. The
// pc_range field is taken as is; encode the blob with a code range starting at 0 and spanning
// the whole function.

//! Relocatable ELF output for inspecting unwind data.

use object::write::{Object, Relocation, StandardSegment, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use crate::core::{UnwindError, UnwindResult};

/// Build an ELF object holding `code` in `.text` and `eh_frame` in
/// `.eh_frame`, with the FDE at `pc_begin_offset` relocated against `.text`.
pub fn write_object(
    architecture: Architecture,
    function_name: &str,
    code: &[u8],
    eh_frame: &[u8],
    pc_begin_offset: usize,
) -> UnwindResult<Vec<u8>> {
    if pc_begin_offset + 16 > eh_frame.len() {
        return Err(UnwindError::OutOfRange {
            what: "pc_begin offset",
            value: pc_begin_offset as i64,
        });
    }

    let mut obj = Object::new(BinaryFormat::Elf, architecture, Endianness::Little);

    let text = obj.add_section(
        obj.segment_name(StandardSegment::Text).to_vec(),
        b".text".to_vec(),
        SectionKind::Text,
    );
    let code_offset = obj.append_section_data(text, code, 16);
    obj.add_symbol(Symbol {
        name: function_name.as_bytes().to_vec(),
        value: code_offset,
        size: code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });

    let eh_frame_section = obj.add_section(
        obj.segment_name(StandardSegment::Data).to_vec(),
        b".eh_frame".to_vec(),
        SectionKind::ReadOnlyData,
    );
    let frame_offset = obj.append_section_data(eh_frame_section, eh_frame, 8);

    let text_symbol = obj.section_symbol(text);
    obj.add_relocation(
        eh_frame_section,
        Relocation {
            offset: frame_offset + pc_begin_offset as u64,
            symbol: text_symbol,
            addend: code_offset as i64,
            flags: RelocationFlags::Generic {
                kind: RelocationKind::Absolute,
                encoding: RelocationEncoding::Generic,
                size: 64,
            },
        },
    )
    .map_err(|e| UnwindError::ObjectWrite(e.to_string()))?;

    log::debug!(
        "ELF object: {} code bytes, {} eh_frame bytes",
        code.len(),
        eh_frame.len()
    );
    obj.write().map_err(|e| UnwindError::ObjectWrite(e.to_string()))
}
