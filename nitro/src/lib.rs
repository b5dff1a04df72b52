//! Dual-ARM handheld console core.
//!
//! Two processors share main RAM and shared WRAM through per-processor
//! address maps; each runs through a dynamic-recompilation dispatcher and the
//! pair is time-sliced on a common bus clock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{bail, Context};
use common::{ControlMessage, EmulationCore, Instance, UpdateMessage};

use armcore::{Arch, Core};

pub mod bus;
pub mod dispatch;
pub mod jit;
pub mod mem;
pub mod sched;

use bus::{DecodeTable, ProcId};
use dispatch::Dispatcher;
use jit::backend::{CodeEmitter, ThreadedBackend};
use jit::cache::CodeCache;
use mem::{RegionId, Regions};
use sched::{QuantumClock, Time};

/// Program binaries load at the bottom of main RAM.
pub const ARM9_ENTRY: u32 = 0x0200_0000;
/// Without a coprocessor image the arm7 parks on a branch-to-self here.
pub const ARM7_PARK: u32 = 0x0380_0000;
const ARM7_BIOS_ENTRY: u32 = 0x0000_0000;

#[derive(Clone, Default)]
pub struct NitroConfig {
    pub rom: Option<PathBuf>,
    pub bios9: Option<PathBuf>,
    pub bios7: Option<PathBuf>,
    pub frame_limit: Option<u64>,
    pub interpret_only: bool,
}

pub struct NitroCore {
    pub config: NitroConfig,
}

impl EmulationCore for NitroCore {
    fn name(&self) -> &'static str {
        "nitro"
    }

    fn new_send(&self) -> Result<Box<dyn Instance + Send>, anyhow::Error> {
        Ok(Box::new(NitroInstance {
            console: Console::new(&self.config)?,
            frame_limit: self.config.frame_limit,
        }))
    }
}

fn read_image(path: &Path, max: usize, what: &str) -> Result<Vec<u8>, anyhow::Error> {
    let image =
        fs::read(path).with_context(|| format!("reading {} image {}", what, path.display()))?;
    if image.len() > max {
        bail!("{} image {} exceeds {} bytes", what, path.display(), max);
    }
    Ok(image)
}

/// The whole machine: backing storage, decode tables, both processors, the
/// shared code cache and backend, and the frame clock.
pub struct Console {
    regions: Regions,
    cache: CodeCache,
    backend: ThreadedBackend,
    table9: DecodeTable,
    table7: DecodeTable,
    arm9: Core,
    arm7: Core,
    disp9: Dispatcher,
    disp7: Dispatcher,
    clock9: QuantumClock,
    clock7: QuantumClock,
    now: Time,
    frames: u64,
    arm7_entry: u32,
}

impl Console {
    pub fn new(config: &NitroConfig) -> Result<Console, anyhow::Error> {
        let mut regions = Regions::new();

        if let Some(path) = &config.bios9 {
            let image = read_image(path, RegionId::Bios9.mask() as usize + 1, "bios9")?;
            regions.get_mut(RegionId::Bios9).load_image(0, &image);
        }
        let arm7_entry = if let Some(path) = &config.bios7 {
            let image = read_image(path, RegionId::Bios7.mask() as usize + 1, "bios7")?;
            regions.get_mut(RegionId::Bios7).load_image(0, &image);
            ARM7_BIOS_ENTRY
        } else {
            // b . at the park address
            regions.get_mut(RegionId::Arm7Wram).write32(0, 0xeaff_fffe);
            ARM7_PARK
        };

        if let Some(path) = &config.rom {
            let image = read_image(path, RegionId::MainRam.mask() as usize + 1, "program")?;
            log::info!("loaded {} byte program at {:08x}", image.len(), ARM9_ENTRY);
            regions.get_mut(RegionId::MainRam).load_image(0, &image);
        } else {
            // Nothing to run; park the main core as well
            regions.get_mut(RegionId::MainRam).write32(0, 0xeaff_fffe);
        }

        let jit = !config.interpret_only;
        Ok(Console {
            regions,
            cache: CodeCache::new(),
            backend: ThreadedBackend::default(),
            table9: DecodeTable::new(ProcId::Arm9),
            table7: DecodeTable::new(ProcId::Arm7),
            arm9: Core::new(Arch::Arm9, ARM9_ENTRY),
            arm7: Core::new(Arch::Arm7, arm7_entry),
            disp9: Dispatcher::new(ProcId::Arm9, jit),
            disp7: Dispatcher::new(ProcId::Arm7, jit),
            clock9: QuantumClock::new(),
            clock7: QuantumClock::new(),
            now: Time::ZERO,
            frames: 0,
            arm7_entry,
        })
    }

    /// Runs both processors, strictly alternated in bus-clock quanta, for
    /// one video frame.
    pub fn run_frame(&mut self) {
        let frame_end = self.now + sched::CYCLES_PER_FRAME;
        while self.now < frame_end {
            let granted = self.clock9.grant(sched::to_arm9_time(sched::QUANTUM));
            if granted > 0 {
                let spent = self.disp9.run_quantum(
                    &mut self.arm9,
                    &self.table9,
                    &mut self.regions,
                    &mut self.cache,
                    &mut self.backend,
                    granted,
                );
                self.clock9.settle(granted, spent);
            }

            let granted = self.clock7.grant(sched::QUANTUM);
            if granted > 0 {
                let spent = self.disp7.run_quantum(
                    &mut self.arm7,
                    &self.table7,
                    &mut self.regions,
                    &mut self.cache,
                    &mut self.backend,
                    granted,
                );
                self.clock7.settle(granted, spent);
            }

            self.now += sched::QUANTUM;
        }
        self.frames += 1;
    }

    /// Soft reset: discard all compiled code and restart both processors.
    /// Memory contents survive. Only called between quanta.
    pub fn soft_reset(&mut self) {
        log::info!("soft reset after {} frames", self.frames);
        self.cache.clear();
        self.backend.reset();
        self.arm9.reset(ARM9_ENTRY);
        self.arm7.reset(self.arm7_entry);
        self.clock9.reset();
        self.clock7.reset();
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn arm9(&self) -> &Core {
        &self.arm9
    }

    pub fn arm7(&self) -> &Core {
        &self.arm7
    }
}

pub struct NitroInstance {
    console: Console,
    frame_limit: Option<u64>,
}

impl Instance for NitroInstance {
    fn run(
        &mut self,
        control_rx: &mpsc::Receiver<ControlMessage>,
        update: mpsc::SyncSender<UpdateMessage>,
    ) -> Result<(), anyhow::Error> {
        loop {
            match control_rx.try_recv() {
                Ok(ControlMessage::Reset) => self.console.soft_reset(),
                Ok(ControlMessage::Pause) => {
                    // Parked until the next control message
                    match control_rx.recv() {
                        Ok(ControlMessage::Reset) => self.console.soft_reset(),
                        Ok(ControlMessage::Pause) => {}
                        Err(_) => return Ok(()),
                    }
                }
                Err(mpsc::TryRecvError::Empty) => {}
                Err(mpsc::TryRecvError::Disconnected) => return Ok(()),
            }

            self.console.run_frame();
            if update.send(UpdateMessage::Vsync).is_err() {
                return Ok(());
            }
            if let Some(limit) = self.frame_limit {
                if self.console.frames() >= limit {
                    log::info!("frame limit {} reached", limit);
                    return Ok(());
                }
            }
        }
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
