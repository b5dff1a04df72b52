use std::sync::Arc;

use armcore::Core;

use crate::bus::{DecodeTable, ProcId, SysBus};
use crate::jit::backend::CodeEmitter;
use crate::jit::cache::{CodeCache, Lookup};
use crate::jit::{driver, CompiledBlock};
use crate::mem::Regions;

/// Per-processor execution loop.
///
/// Each step probes the cache at the current pc and either enters a compiled
/// block, compiles one, or interprets a single instruction. Compiled blocks
/// run to completion; the quantum budget is only checked between steps, so a
/// quantum can overrun and the scheduler settles the difference.
pub struct Dispatcher {
    proc: ProcId,
    pub jit_enabled: bool,
}

enum Action {
    Run(Arc<CompiledBlock>),
    Compile,
    Interpret,
}

impl Dispatcher {
    pub fn new(proc: ProcId, jit_enabled: bool) -> Dispatcher {
        Dispatcher { proc, jit_enabled }
    }

    pub fn proc(&self) -> ProcId {
        self.proc
    }

    /// Runs until at least `budget` cycles are consumed. Returns the cycles
    /// actually spent, which may exceed the budget by up to one block.
    pub fn run_quantum(
        &self,
        core: &mut Core,
        table: &DecodeTable,
        regions: &mut Regions,
        cache: &mut CodeCache,
        backend: &mut dyn CodeEmitter,
        budget: u64,
    ) -> u64 {
        let mut spent = 0;
        while spent < budget {
            let pc = core.pc();
            let action = if !self.jit_enabled {
                Action::Interpret
            } else {
                match cache.lookup(table, pc) {
                    Lookup::Compiled(block)
                        if block.proc == self.proc && block.thumb == core.thumb() =>
                    {
                        Action::Run(block)
                    }
                    // A block compiled for the other processor or the other
                    // instruction width; recompile over it for this view
                    Lookup::Compiled(_) => Action::Compile,
                    Lookup::Empty => Action::Compile,
                    Lookup::NonCompilable | Lookup::Uncacheable => Action::Interpret,
                }
            };

            let block = match action {
                Action::Run(block) => Some(block),
                Action::Compile => {
                    driver::compile(table, regions, cache, backend, core.thumb(), pc)
                }
                Action::Interpret => None,
            };

            let mut bus = SysBus { table, regions: &mut *regions, cache: &mut *cache };
            match block {
                Some(block) => {
                    let exit = block.code.run(core, &mut bus);
                    if exit.cycles == 0 && core.pc() == pc {
                        // Entered off an op boundary; make progress anyway
                        spent += core.step(&mut bus);
                    } else {
                        spent += exit.cycles;
                    }
                }
                None => {
                    spent += core.step(&mut bus);
                }
            }
        }
        spent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::backend::ThreadedBackend;
    use crate::mem::RegionId;
    use armcore::Arch;

    struct Rig {
        table9: DecodeTable,
        table7: DecodeTable,
        regions: Regions,
        cache: CodeCache,
        backend: ThreadedBackend,
    }

    fn rig() -> Rig {
        Rig {
            table9: DecodeTable::new(ProcId::Arm9),
            table7: DecodeTable::new(ProcId::Arm7),
            regions: Regions::new(),
            cache: CodeCache::new(),
            backend: ThreadedBackend::default(),
        }
    }

    fn write_words(regions: &mut Regions, offset: u32, words: &[u32]) {
        let ram = regions.get_mut(RegionId::MainRam);
        for (i, word) in words.iter().enumerate() {
            ram.write32(offset + 4 * i as u32, *word);
        }
    }

    // mov r0, #0; loop: add r0, r0, #1; b loop
    const SPIN: [u32; 3] = [0xe3a0_0000, 0xe280_0001, 0xeaff_fffd];

    #[test]
    fn dispatch_compiles_then_reuses_blocks() {
        let mut r = rig();
        write_words(&mut r.regions, 0x1000, &SPIN);
        let disp = Dispatcher::new(ProcId::Arm9, true);
        let mut core = Core::new(Arch::Arm9, 0x0200_1000);

        let spent = disp.run_quantum(
            &mut core,
            &r.table9,
            &mut r.regions,
            &mut r.cache,
            &mut r.backend,
            100,
        );
        assert!(spent >= 100);
        assert!(core.regs.read(0) > 1);
        assert!(matches!(r.cache.lookup(&r.table9, 0x0200_1000), Lookup::Compiled(_)));
        // one 3-op block emitted once; re-entries at the loop head reuse it
        assert_eq!(r.backend.used_ops(), 3);
    }

    #[test]
    fn interpreter_only_mode_never_compiles() {
        let mut r = rig();
        write_words(&mut r.regions, 0x1000, &SPIN);
        let disp = Dispatcher::new(ProcId::Arm9, false);
        let mut core = Core::new(Arch::Arm9, 0x0200_1000);

        disp.run_quantum(&mut core, &r.table9, &mut r.regions, &mut r.cache, &mut r.backend, 50);
        assert!(core.regs.read(0) > 1);
        assert_eq!(r.backend.used_ops(), 0);
        assert!(matches!(r.cache.lookup(&r.table9, 0x0200_1000), Lookup::Empty));
    }

    #[test]
    fn self_modifying_store_forces_recompile() {
        let mut r = rig();
        write_words(&mut r.regions, 0x1000, &SPIN);
        let disp = Dispatcher::new(ProcId::Arm9, true);
        let mut core = Core::new(Arch::Arm9, 0x0200_1000);
        disp.run_quantum(&mut core, &r.table9, &mut r.regions, &mut r.cache, &mut r.backend, 20);
        assert!(matches!(r.cache.lookup(&r.table9, 0x0200_1004), Lookup::Compiled(_)));

        // a store through the bus lands in the block's range
        let mut bus = SysBus { table: &r.table9, regions: &mut r.regions, cache: &mut r.cache };
        use armcore::Bus;
        bus.store32(0x0200_1004, 0xe280_0002); // add r0, r0, #2
        assert!(matches!(r.cache.lookup(&r.table9, 0x0200_1004), Lookup::Empty));

        // next quantum recompiles and runs the patched code
        core.regs.write(0, 0);
        core.regs.write(15, 0x0200_1004);
        disp.run_quantum(&mut core, &r.table9, &mut r.regions, &mut r.cache, &mut r.backend, 5);
        assert_eq!(core.regs.read(0) % 2, 0);
    }

    #[test]
    fn cross_processor_store_invalidates_shared_code() {
        let mut r = rig();
        write_words(&mut r.regions, 0x0010_0000, &SPIN);
        let disp9 = Dispatcher::new(ProcId::Arm9, true);
        let mut arm9 = Core::new(Arch::Arm9, 0x0210_0000);
        disp9.run_quantum(&mut arm9, &r.table9, &mut r.regions, &mut r.cache, &mut r.backend, 20);
        assert!(matches!(r.cache.lookup(&r.table9, 0x0210_0000), Lookup::Compiled(_)));

        // the coprocessor stores to the same main RAM address
        let mut bus7 = SysBus { table: &r.table7, regions: &mut r.regions, cache: &mut r.cache };
        use armcore::Bus;
        bus7.store32(0x0210_0000, 0);

        assert!(matches!(r.cache.lookup(&r.table9, 0x0210_0000), Lookup::Empty));
    }

    #[test]
    fn blocks_are_retagged_per_processor() {
        let mut r = rig();
        write_words(&mut r.regions, 0x0010_0000, &SPIN);
        let disp9 = Dispatcher::new(ProcId::Arm9, true);
        let disp7 = Dispatcher::new(ProcId::Arm7, true);
        let mut arm9 = Core::new(Arch::Arm9, 0x0210_0000);
        let mut arm7 = Core::new(Arch::Arm7, 0x0210_0000);

        disp9.run_quantum(&mut arm9, &r.table9, &mut r.regions, &mut r.cache, &mut r.backend, 10);
        // the arm7 view hits the arm9-tagged block and recompiles it
        disp7.run_quantum(&mut arm7, &r.table7, &mut r.regions, &mut r.cache, &mut r.backend, 10);
        match r.cache.lookup(&r.table7, 0x0210_0000) {
            Lookup::Compiled(block) => assert_eq!(block.proc, ProcId::Arm7),
            _ => panic!("expected a compiled slot"),
        }
        assert!(arm7.regs.read(0) > 0);
    }

    #[test]
    fn unmapped_pc_prefetch_aborts_and_continues() {
        let mut r = rig();
        let disp = Dispatcher::new(ProcId::Arm9, true);
        let mut core = Core::new(Arch::Arm9, 0x0400_0000);
        disp.run_quantum(&mut core, &r.table9, &mut r.regions, &mut r.cache, &mut r.backend, 5);
        // the fault vectored through the guest abort handler, not the host
        assert_eq!(core.cpsr.current_mode(), armcore::Mode::Abort);
    }
}
