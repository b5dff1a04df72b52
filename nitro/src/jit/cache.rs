use std::sync::Arc;

use common::util::boxed_slice;

use crate::bus::DecodeTable;
use crate::jit::CompiledBlock;
use crate::mem::{RegionId, REGION_COUNT};

/// State of one halfword of backed storage.
#[derive(Clone, Default)]
pub enum CacheSlot {
    #[default]
    Empty,
    Compiled(Arc<CompiledBlock>),
    NonCompilable,
}

/// Outcome of a cache probe. `Uncacheable` is the fixed answer for addresses
/// that decode to no backing; it involves no slot storage at all.
pub enum Lookup {
    Uncacheable,
    Empty,
    NonCompilable,
    Compiled(Arc<CompiledBlock>),
}

/// Compiled-code cache over all region backing storage.
///
/// Slots are indexed by (region, halfword offset), never by guest address, so
/// every mirror of an address and every processor view of a shared region
/// lands on the same slot. Holes in the address map get no storage; the full
/// 32-bit space is never allocated for.
pub struct CodeCache {
    slots: [Box<[CacheSlot]>; REGION_COUNT],
}

impl CodeCache {
    pub fn new() -> CodeCache {
        CodeCache {
            slots: RegionId::ALL
                .map(|id| boxed_slice(CacheSlot::Empty, (id.mask() as usize + 1) / 2)),
        }
    }

    #[inline(always)]
    fn slot(&self, region: RegionId, offset: u32) -> &CacheSlot {
        &self.slots[region.index()][(offset >> 1) as usize]
    }

    #[inline(always)]
    fn slot_mut(&mut self, region: RegionId, offset: u32) -> &mut CacheSlot {
        &mut self.slots[region.index()][(offset >> 1) as usize]
    }

    pub fn lookup(&self, table: &DecodeTable, addr: u32) -> Lookup {
        match table.decode(addr) {
            None => Lookup::Uncacheable,
            Some((region, offset)) => match self.slot(region, offset) {
                CacheSlot::Empty => Lookup::Empty,
                CacheSlot::NonCompilable => Lookup::NonCompilable,
                CacheSlot::Compiled(block) => Lookup::Compiled(block.clone()),
            },
        }
    }

    /// Writes `block` into every slot covering `[addr, addr + len)`, so a
    /// jump into the middle of the block finds it without recompiling.
    /// Halfwords that decode to no backing are skipped.
    pub fn install(&mut self, table: &DecodeTable, addr: u32, len: u32, block: Arc<CompiledBlock>) {
        let mut at = addr & !1;
        while at < addr.wrapping_add(len) {
            if let Some((region, offset)) = table.decode(at) {
                *self.slot_mut(region, offset) = CacheSlot::Compiled(block.clone());
            }
            at = at.wrapping_add(2);
        }
    }

    /// Resets every slot covering `[addr, addr + len)` to `Empty`. A range
    /// with no cached code is a no-op.
    pub fn invalidate(&mut self, table: &DecodeTable, addr: u32, len: u32) {
        let mut at = addr & !1;
        while at < addr.wrapping_add(len) {
            if let Some((region, offset)) = table.decode(at) {
                *self.slot_mut(region, offset) = CacheSlot::Empty;
            }
            at = at.wrapping_add(2);
        }
    }

    /// Invalidation keyed by backing storage rather than a guest address;
    /// this is the path the bus uses on every store, after decode.
    pub fn invalidate_at(&mut self, region: RegionId, offset: u32, len: u32) {
        debug_assert!(len > 0);
        let slots = &mut self.slots[region.index()];
        let first = (offset >> 1) as usize;
        let last = (((offset + len - 1) >> 1) as usize).min(slots.len() - 1);
        for slot in &mut slots[first..=last] {
            *slot = CacheSlot::Empty;
        }
    }

    /// Marks a single instruction-origin slot; cleared only by invalidation.
    pub fn mark_non_compilable(&mut self, table: &DecodeTable, addr: u32) {
        if let Some((region, offset)) = table.decode(addr) {
            *self.slot_mut(region, offset) = CacheSlot::NonCompilable;
        }
    }

    /// Degrades a whole attempted range after a backend failure.
    pub fn mark_range_non_compilable(&mut self, table: &DecodeTable, addr: u32, len: u32) {
        let mut at = addr & !1;
        while at < addr.wrapping_add(len) {
            if let Some((region, offset)) = table.decode(at) {
                *self.slot_mut(region, offset) = CacheSlot::NonCompilable;
            }
            at = at.wrapping_add(2);
        }
    }

    /// Drops everything, releasing every block handle. Used by soft reset.
    pub fn clear(&mut self) {
        for region in self.slots.iter_mut() {
            region.fill(CacheSlot::Empty);
        }
    }
}

impl Default for CodeCache {
    fn default() -> CodeCache {
        CodeCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ProcId;
    use crate::jit::{BlockExit, CompiledCode};
    use armcore::{Bus, Core};

    struct NopCode;

    impl CompiledCode for NopCode {
        fn run(&self, core: &mut Core, _: &mut dyn Bus) -> BlockExit {
            BlockExit { cycles: 1, next_pc: core.pc() }
        }
    }

    fn block(start: u32, len: u32) -> Arc<CompiledBlock> {
        Arc::new(CompiledBlock {
            start,
            len,
            proc: ProcId::Arm9,
            thumb: false,
            code: Arc::new(NopCode),
        })
    }

    fn handle_of(lookup: Lookup) -> Arc<CompiledBlock> {
        match lookup {
            Lookup::Compiled(b) => b,
            _ => panic!("expected a compiled slot"),
        }
    }

    #[test]
    fn install_covers_every_halfword() {
        let table = DecodeTable::new(ProcId::Arm9);
        let mut cache = CodeCache::new();
        let b = block(0x0200_1000, 0x10);
        cache.install(&table, 0x0200_1000, 0x10, b.clone());

        for addr in (0x0200_1000u32..0x0200_1010).step_by(2) {
            let got = handle_of(cache.lookup(&table, addr));
            assert!(Arc::ptr_eq(&got, &b));
        }
        assert!(matches!(cache.lookup(&table, 0x0200_1010), Lookup::Empty));
    }

    #[test]
    fn mid_block_address_finds_the_same_block() {
        let table = DecodeTable::new(ProcId::Arm9);
        let mut cache = CodeCache::new();
        let b = block(0x0200_1000, 0x10);
        cache.install(&table, 0x0200_1000, 0x10, b);

        let head = handle_of(cache.lookup(&table, 0x0200_1000));
        let mid = handle_of(cache.lookup(&table, 0x0200_1008));
        assert!(Arc::ptr_eq(&head, &mid));
    }

    #[test]
    fn mirrors_share_slots() {
        let table = DecodeTable::new(ProcId::Arm9);
        let mut cache = CodeCache::new();
        // 0x02400000 mirrors 0x02000000 through the 4 MiB mask
        cache.install(&table, 0x0200_0000, 8, block(0x0200_0000, 8));
        assert!(matches!(cache.lookup(&table, 0x0240_0000), Lookup::Compiled(_)));

        cache.invalidate(&table, 0x0240_0000, 8);
        assert!(matches!(cache.lookup(&table, 0x0200_0000), Lookup::Empty));
    }

    #[test]
    fn shared_region_is_one_cache_for_both_processors() {
        let t9 = DecodeTable::new(ProcId::Arm9);
        let t7 = DecodeTable::new(ProcId::Arm7);
        let mut cache = CodeCache::new();

        cache.install(&t9, 0x0210_0000, 8, block(0x0210_0000, 8));
        assert!(matches!(cache.lookup(&t7, 0x0210_0000), Lookup::Compiled(_)));

        // the arm7 store path invalidates by backing storage
        let (region, offset) = t7.decode(0x0210_0000).unwrap();
        cache.invalidate_at(region, offset, 4);
        assert!(matches!(cache.lookup(&t9, 0x0210_0000), Lookup::Empty));
    }

    #[test]
    fn unmapped_addresses_are_permanently_uncacheable() {
        let table = DecodeTable::new(ProcId::Arm9);
        let mut cache = CodeCache::new();
        assert!(matches!(cache.lookup(&table, 0x0400_0000), Lookup::Uncacheable));
        // installs and invalidates over holes are no-ops
        cache.install(&table, 0x0400_0000, 8, block(0x0400_0000, 8));
        cache.invalidate(&table, 0x0400_0000, 8);
        assert!(matches!(cache.lookup(&table, 0x0400_0000), Lookup::Uncacheable));
    }

    #[test]
    fn non_compilable_persists_until_invalidate() {
        let table = DecodeTable::new(ProcId::Arm9);
        let mut cache = CodeCache::new();
        cache.mark_non_compilable(&table, 0x0200_2000);
        assert!(matches!(cache.lookup(&table, 0x0200_2000), Lookup::NonCompilable));
        assert!(matches!(cache.lookup(&table, 0x0200_2000), Lookup::NonCompilable));

        cache.invalidate(&table, 0x0200_2000, 2);
        assert!(matches!(cache.lookup(&table, 0x0200_2000), Lookup::Empty));
    }
}
