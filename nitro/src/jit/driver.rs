use std::sync::Arc;

use armcore::instructions::{self, Attr};

use crate::bus::DecodeTable;
use crate::jit::backend::{BlockIr, CodeEmitter, MicroOp};
use crate::jit::cache::CodeCache;
use crate::jit::CompiledBlock;
use crate::mem::Regions;

/// Upper bound on instructions per block; long straight-line runs are split.
pub const MAX_BLOCK_INSTRS: usize = 64;

fn fetch(table: &DecodeTable, regions: &Regions, addr: u32, thumb: bool) -> Option<u32> {
    let (region, offset) = table.decode(addr)?;
    let region = regions.get(region);
    if thumb {
        Some(region.read16(offset) as u32)
    } else {
        Some(region.read32(offset))
    }
}

/// Builds, emits and installs one block starting at `start`.
///
/// The scan classifies each instruction by its static attribute and stops at
/// the first terminator (included), the instruction budget, or the first
/// untranslatable instruction (excluded). Returns the installed block for
/// immediate entry, or `None` when execution has to fall back to the
/// interpreter for this address.
pub fn compile(
    table: &DecodeTable,
    regions: &Regions,
    cache: &mut CodeCache,
    backend: &mut dyn CodeEmitter,
    thumb: bool,
    start: u32,
) -> Option<Arc<CompiledBlock>> {
    let width = if thumb { 2u32 } else { 4u32 };
    let start = start & !(width - 1);

    let mut ops = Vec::new();
    let mut pc = start;
    while ops.len() < MAX_BLOCK_INSTRS {
        let Some(word) = fetch(table, regions, pc, thumb) else {
            // Ran into a hole in the map. With no ops yet this is a fetch
            // fault for the interpreter to surface; otherwise the block just
            // ends early.
            break;
        };
        let instr = if thumb {
            instructions::decode_thumb(word as u16)
        } else {
            instructions::decode_arm(word)
        };
        match instructions::attribute(&instr) {
            Attr::Untranslatable => break,
            Attr::Translatable => {
                ops.push(MicroOp { pc, instr });
                pc = pc.wrapping_add(width);
            }
            Attr::Terminator => {
                ops.push(MicroOp { pc, instr });
                pc = pc.wrapping_add(width);
                break;
            }
        }
    }

    if ops.is_empty() {
        // First instruction untranslatable (or unfetchable): never invoke
        // the backend for a zero-length block.
        cache.mark_non_compilable(table, start);
        return None;
    }

    let len = pc.wrapping_sub(start);
    let ir = BlockIr { proc: table.proc(), thumb, start, len, ops };
    match backend.emit(&ir) {
        Ok(code) => {
            let block = Arc::new(CompiledBlock {
                start,
                len,
                proc: table.proc(),
                thumb,
                code,
            });
            cache.install(table, start, len, block.clone());
            log::trace!(
                "{}: compiled {} bytes at {:08x}",
                table.proc().name(),
                len,
                start
            );
            Some(block)
        }
        Err(err) => {
            // Soft failure: degrade and keep running interpreted
            log::debug!("{}: emit failed at {:08x}: {}", table.proc().name(), start, err);
            cache.mark_range_non_compilable(table, start, len);
            None
        }
    }
}
