use crate::jit::cache::CodeCache;
use crate::mem::{RegionId, Regions};

/// Which processor's view of the address space a table describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcId {
    Arm9,
    Arm7,
}

impl ProcId {
    pub fn name(self) -> &'static str {
        match self {
            ProcId::Arm9 => "arm9",
            ProcId::Arm7 => "arm7",
        }
    }
}

/// Buckets cover 16 KiB of guest address space each; that granularity is fine
/// enough to split a prefix at its 8 MiB midpoint (shared WRAM vs arm7 WRAM).
pub const BUCKET_SHIFT: u32 = 14;
const BUCKET_COUNT: usize = 1 << (32 - BUCKET_SHIFT);

/// One decode bucket: the backing region and the mask that folds a guest
/// address onto it. `region: None` is an unmapped hole (I/O, reserved).
#[derive(Copy, Clone)]
struct Bucket {
    region: Option<RegionId>,
    mask: u32,
}

/// Static address map for one processor.
///
/// Built once at session start and never mutated. Decoding is two steps: the
/// high bits select a bucket, then the bucket's mask folds the address onto
/// the region's backing, which is what reproduces hardware mirroring.
pub struct DecodeTable {
    proc: ProcId,
    buckets: Box<[Bucket]>,
}

impl DecodeTable {
    pub fn new(proc: ProcId) -> DecodeTable {
        let mut table = DecodeTable {
            proc,
            buckets: common::util::boxed_slice(
                Bucket { region: None, mask: 0 },
                BUCKET_COUNT,
            ),
        };
        match proc {
            ProcId::Arm9 => {
                table.map(0x0000_0000, 0x0200_0000, RegionId::Itcm);
                table.map(0x0200_0000, 0x0300_0000, RegionId::MainRam);
                table.map(0x0300_0000, 0x0400_0000, RegionId::SharedWram);
                table.map(0x0680_0000, 0x0700_0000, RegionId::Lcdc);
                table.map(0xff00_0000, 0x1_0000_0000, RegionId::Bios9);
            }
            ProcId::Arm7 => {
                table.map(0x0000_0000, 0x0100_0000, RegionId::Bios7);
                table.map(0x0200_0000, 0x0300_0000, RegionId::MainRam);
                table.map(0x0300_0000, 0x0380_0000, RegionId::SharedWram);
                table.map(0x0380_0000, 0x0400_0000, RegionId::Arm7Wram);
                table.map(0x0600_0000, 0x0700_0000, RegionId::Arm7VramWram);
            }
        }
        table
    }

    pub fn proc(&self) -> ProcId {
        self.proc
    }

    fn map(&mut self, start: u64, end: u64, region: RegionId) {
        debug_assert_eq!(start & ((1u64 << BUCKET_SHIFT) - 1), 0);
        debug_assert_eq!(end & ((1u64 << BUCKET_SHIFT) - 1), 0);
        let mask = region.mask();
        for bucket in &mut self.buckets[(start >> BUCKET_SHIFT) as usize..(end >> BUCKET_SHIFT) as usize] {
            debug_assert!(bucket.region.is_none());
            *bucket = Bucket { region: Some(region), mask };
        }
    }

    /// Resolves a guest address to backing storage.
    ///
    /// `None` is a hole in the map: data accesses read open bus and fetches
    /// fault, but decoding itself always succeeds.
    #[inline(always)]
    pub fn decode(&self, addr: u32) -> Option<(RegionId, u32)> {
        let bucket = &self.buckets[(addr >> BUCKET_SHIFT) as usize];
        bucket.region.map(|region| (region, addr & bucket.mask))
    }
}

/// A processor's view of memory, wired through its decode table.
///
/// Every store that lands in backed storage invalidates the covering code
/// cache slots before returning, which is what keeps compiled code coherent
/// with self-modifying and cross-processor writes.
pub struct SysBus<'a> {
    pub table: &'a DecodeTable,
    pub regions: &'a mut Regions,
    pub cache: &'a mut CodeCache,
}

impl<'a> SysBus<'a> {
    fn store(&mut self, addr: u32, size: u32, write: impl FnOnce(&mut Regions, RegionId, u32)) {
        if let Some((region, offset)) = self.table.decode(addr) {
            if region.writable() {
                write(&mut *self.regions, region, offset);
                self.cache.invalidate_at(region, offset, size);
            }
        } else {
            log::trace!("{}: store to unmapped {:08x}", self.table.proc().name(), addr);
        }
    }
}

impl<'a> armcore::Bus for SysBus<'a> {
    fn fetch32(&mut self, addr: u32) -> Option<u32> {
        let (region, offset) = self.table.decode(addr)?;
        Some(self.regions.get(region).read32(offset))
    }

    fn fetch16(&mut self, addr: u32) -> Option<u16> {
        let (region, offset) = self.table.decode(addr)?;
        Some(self.regions.get(region).read16(offset))
    }

    fn load8(&mut self, addr: u32) -> u8 {
        match self.table.decode(addr) {
            Some((region, offset)) => self.regions.get(region).read8(offset),
            None => 0,
        }
    }

    fn load16(&mut self, addr: u32) -> u16 {
        match self.table.decode(addr) {
            Some((region, offset)) => self.regions.get(region).read16(offset),
            None => 0,
        }
    }

    fn load32(&mut self, addr: u32) -> u32 {
        match self.table.decode(addr) {
            Some((region, offset)) => self.regions.get(region).read32(offset),
            None => 0,
        }
    }

    fn store8(&mut self, addr: u32, data: u8) {
        self.store(addr, 1, |regions, region, offset| {
            regions.get_mut(region).write8(offset, data)
        });
    }

    fn store16(&mut self, addr: u32, data: u16) {
        self.store(addr & !1, 2, |regions, region, offset| {
            regions.get_mut(region).write16(offset, data)
        });
    }

    fn store32(&mut self, addr: u32, data: u32) {
        self.store(addr & !3, 4, |regions, region, offset| {
            regions.get_mut(region).write32(offset, data)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm9_map_matches_hardware() {
        let t = DecodeTable::new(ProcId::Arm9);
        assert_eq!(t.decode(0x0000_0000), Some((RegionId::Itcm, 0)));
        assert_eq!(t.decode(0x0100_8004), Some((RegionId::Itcm, 0x4)));
        assert_eq!(t.decode(0x0200_0000), Some((RegionId::MainRam, 0)));
        assert_eq!(t.decode(0x0300_1234), Some((RegionId::SharedWram, 0x1234)));
        assert_eq!(t.decode(0x0680_0000), Some((RegionId::Lcdc, 0)));
        assert_eq!(t.decode(0xffff_0000), Some((RegionId::Bios9, 0)));
        // the I/O prefix and the first half of 0x06 are holes
        assert_eq!(t.decode(0x0400_0000), None);
        assert_eq!(t.decode(0x0600_0000), None);
        assert_eq!(t.decode(0x0800_0000), None);
    }

    #[test]
    fn arm7_map_matches_hardware() {
        let t = DecodeTable::new(ProcId::Arm7);
        assert_eq!(t.decode(0x0000_0000), Some((RegionId::Bios7, 0)));
        assert_eq!(t.decode(0x0200_0000), Some((RegionId::MainRam, 0)));
        assert_eq!(t.decode(0x0300_0000), Some((RegionId::SharedWram, 0)));
        // the 0x03 prefix splits at its 8 MiB midpoint
        assert_eq!(t.decode(0x037f_c000), Some((RegionId::SharedWram, 0x4000)));
        assert_eq!(t.decode(0x0380_0000), Some((RegionId::Arm7Wram, 0)));
        assert_eq!(t.decode(0x0600_0000), Some((RegionId::Arm7VramWram, 0)));
        assert_eq!(t.decode(0x0400_0000), None);
        assert_eq!(t.decode(0xffff_0000), None);
    }

    #[test]
    fn main_ram_mirrors_across_the_prefix() {
        let t9 = DecodeTable::new(ProcId::Arm9);
        let t7 = DecodeTable::new(ProcId::Arm7);
        // 4 MiB backing mirrored over the 16 MiB window
        assert_eq!(t9.decode(0x0240_0010), Some((RegionId::MainRam, 0x10)));
        assert_eq!(t9.decode(0x02c0_0010), Some((RegionId::MainRam, 0x10)));
        // both processors fold to the same backing offset
        assert_eq!(t9.decode(0x0210_0000), t7.decode(0x0210_0000));
    }

    #[test]
    fn stores_through_holes_and_roms_are_dropped() {
        let t = DecodeTable::new(ProcId::Arm9);
        let mut regions = Regions::new();
        let mut cache = CodeCache::new();
        let mut bus = SysBus { table: &t, regions: &mut regions, cache: &mut cache };
        use armcore::Bus;
        bus.store32(0x0400_0000, 0xdead_beef); // I/O hole
        bus.store32(0xffff_0000, 0xdead_beef); // boot ROM
        assert_eq!(bus.load32(0x0400_0000), 0); // open bus
        assert_eq!(bus.load32(0xffff_0000), 0);
        bus.store32(0x0200_0000, 0x1234_5678);
        assert_eq!(bus.load32(0x0240_0000), 0x1234_5678); // via a mirror
    }
}
