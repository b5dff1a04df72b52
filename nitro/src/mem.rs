use common::util::boxed_slice;

/// Identity of a piece of backing storage.
///
/// Regions are disjoint storage; the address map decides which processor sees
/// which region at which prefix. Main RAM and shared WRAM are reachable from
/// both processors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegionId {
    MainRam,
    SharedWram,
    Itcm,
    Bios9,
    Bios7,
    Arm7Wram,
    Arm7VramWram,
    Lcdc,
}

pub const REGION_COUNT: usize = 8;

impl RegionId {
    pub const ALL: [RegionId; REGION_COUNT] = [
        RegionId::MainRam,
        RegionId::SharedWram,
        RegionId::Itcm,
        RegionId::Bios9,
        RegionId::Bios7,
        RegionId::Arm7Wram,
        RegionId::Arm7VramWram,
        RegionId::Lcdc,
    ];

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Address mask; backing size is `mask + 1` bytes.
    pub fn mask(self) -> u32 {
        match self {
            RegionId::MainRam => 0x003f_ffff,      // 4 MiB, mirrored over a 16 MiB prefix
            RegionId::SharedWram => 0x7fff,        // 32 KiB
            RegionId::Itcm => 0x7fff,              // 32 KiB
            RegionId::Bios9 => 0x7fff,             // 32 KiB
            RegionId::Bios7 => 0x3fff,             // 16 KiB
            RegionId::Arm7Wram => 0xffff,          // 64 KiB
            RegionId::Arm7VramWram => 0x0003_ffff, // 256 KiB
            RegionId::Lcdc => 0x000f_ffff,         // 1 MiB
        }
    }

    /// Boot ROMs ignore stores; everything else is RAM.
    pub fn writable(self) -> bool {
        !matches!(self, RegionId::Bios9 | RegionId::Bios7)
    }

    pub fn name(self) -> &'static str {
        match self {
            RegionId::MainRam => "main_ram",
            RegionId::SharedWram => "shared_wram",
            RegionId::Itcm => "itcm",
            RegionId::Bios9 => "bios9",
            RegionId::Bios7 => "bios7",
            RegionId::Arm7Wram => "arm7_wram",
            RegionId::Arm7VramWram => "arm7_vram_wram",
            RegionId::Lcdc => "lcdc_vram",
        }
    }
}

/// One contiguous piece of backing storage.
pub struct MemoryRegion {
    pub id: RegionId,
    data: Box<[u8]>,
}

impl MemoryRegion {
    fn new(id: RegionId) -> MemoryRegion {
        MemoryRegion {
            id,
            data: boxed_slice(0u8, id.mask() as usize + 1),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn read8(&self, offset: u32) -> u8 {
        self.data[offset as usize]
    }

    #[inline(always)]
    pub fn read16(&self, offset: u32) -> u16 {
        let at = (offset as usize) & !1;
        u16::from_le_bytes([self.data[at], self.data[at + 1]])
    }

    #[inline(always)]
    pub fn read32(&self, offset: u32) -> u32 {
        let at = (offset as usize) & !3;
        u32::from_le_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ])
    }

    #[inline(always)]
    pub fn write8(&mut self, offset: u32, data: u8) {
        self.data[offset as usize] = data;
    }

    #[inline(always)]
    pub fn write16(&mut self, offset: u32, data: u16) {
        let at = (offset as usize) & !1;
        self.data[at..at + 2].copy_from_slice(&data.to_le_bytes());
    }

    #[inline(always)]
    pub fn write32(&mut self, offset: u32, data: u32) {
        let at = (offset as usize) & !3;
        self.data[at..at + 4].copy_from_slice(&data.to_le_bytes());
    }

    /// Bulk image load, used for bios images and program binaries. The image
    /// must fit; callers validate sizes against `len()` first.
    pub fn load_image(&mut self, offset: u32, image: &[u8]) {
        let at = offset as usize;
        self.data[at..at + image.len()].copy_from_slice(image);
    }
}

/// All backing storage of the console.
pub struct Regions {
    regions: [MemoryRegion; REGION_COUNT],
}

impl Regions {
    pub fn new() -> Regions {
        Regions {
            regions: RegionId::ALL.map(MemoryRegion::new),
        }
    }

    #[inline(always)]
    pub fn get(&self, id: RegionId) -> &MemoryRegion {
        &self.regions[id.index()]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: RegionId) -> &mut MemoryRegion {
        &mut self.regions[id.index()]
    }
}

impl Default for Regions {
    fn default() -> Regions {
        Regions::new()
    }
}
