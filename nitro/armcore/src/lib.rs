//! The two processors of the console are both ARM cores sharing one
//! instruction-set family: the main core is an ARMv5TE part clocked at twice
//! the bus, the coprocessor an ARMv4T part at bus speed. One `Core` type
//! covers both; the few v5-only instructions check `Arch` at execute time.

use modular_bitfield::{bitfield, specifiers::*};

pub mod instructions;
pub mod interp;
pub mod regfile;

use regfile::RegFile;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arch {
    Arm9,
    Arm7,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1b,
    System = 0x1f,
}

impl Mode {
    pub fn from_bits(bits: u8) -> Mode {
        match bits & 0x1f {
            0x10 => Mode::User,
            0x11 => Mode::Fiq,
            0x12 => Mode::Irq,
            0x13 => Mode::Supervisor,
            0x17 => Mode::Abort,
            0x1b => Mode::Undefined,
            // Reserved encodings behave as System on these cores
            _ => Mode::System,
        }
    }
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct Psr {
    pub mode: B5,
    pub thumb: bool,
    pub fiq_mask: bool,
    pub irq_mask: bool,
    #[skip]
    __: B20,
    pub v: bool,
    pub c: bool,
    pub z: bool,
    pub n: bool,
}

impl Psr {
    pub fn current_mode(&self) -> Mode {
        Mode::from_bits(self.mode())
    }

    pub fn to_word(self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    pub fn from_word(word: u32) -> Psr {
        Psr::from_bytes(word.to_le_bytes())
    }
}

/// Guest exception sources, dispatched through the low vectors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    Swi,
    PrefetchAbort,
    Irq,
}

impl Exception {
    pub fn vector(self) -> u32 {
        match self {
            Exception::Reset => 0x00,
            Exception::Undefined => 0x04,
            Exception::Swi => 0x08,
            Exception::PrefetchAbort => 0x0c,
            Exception::Irq => 0x18,
        }
    }

    fn target_mode(self) -> Mode {
        match self {
            Exception::Reset => Mode::Supervisor,
            Exception::Undefined => Mode::Undefined,
            Exception::Swi => Mode::Supervisor,
            Exception::PrefetchAbort => Mode::Abort,
            Exception::Irq => Mode::Irq,
        }
    }
}

/// Memory seen by a core.
///
/// Instruction fetches are separate from data loads because a fetch from a
/// hole in the address map is a guest-visible fault, while data accesses to
/// holes read back as open bus.
pub trait Bus {
    fn fetch32(&mut self, addr: u32) -> Option<u32>;
    fn fetch16(&mut self, addr: u32) -> Option<u16>;
    fn load8(&mut self, addr: u32) -> u8;
    fn load16(&mut self, addr: u32) -> u16;
    fn load32(&mut self, addr: u32) -> u32;
    fn store8(&mut self, addr: u32, data: u8);
    fn store16(&mut self, addr: u32, data: u16);
    fn store32(&mut self, addr: u32, data: u32);
}

/// Register file, status word and execution state for one processor.
pub struct Core {
    pub regs: RegFile,
    pub cpsr: Psr,
    pub arch: Arch,
}

impl Core {
    pub fn new(arch: Arch, entry: u32) -> Core {
        let mut core = Core {
            regs: RegFile::new(),
            cpsr: Psr::new().with_mode(Mode::System as u8).with_irq_mask(true).with_fiq_mask(true),
            arch,
        };
        core.regs.write(15, entry);
        core
    }

    pub fn reset(&mut self, entry: u32) {
        self.regs = RegFile::new();
        self.cpsr = Psr::new().with_mode(Mode::System as u8).with_irq_mask(true).with_fiq_mask(true);
        self.regs.write(15, entry);
    }

    #[inline(always)]
    pub fn pc(&self) -> u32 {
        self.regs.read(15)
    }

    #[inline(always)]
    pub fn thumb(&self) -> bool {
        self.cpsr.thumb()
    }

    /// Enters the guest exception handler: banks the return state, switches
    /// mode, masks IRQs and jumps through the vector. Never a host error.
    pub fn raise_exception(&mut self, exception: Exception) {
        let old_cpsr = self.cpsr;
        let new_mode = exception.target_mode();

        let return_addr = match exception {
            // LR_und/LR_svc hold the address after the faulting instruction,
            // which interp has already stepped past
            Exception::Undefined | Exception::Swi => self.regs.read(15),
            Exception::PrefetchAbort => self.regs.read(15).wrapping_add(4),
            Exception::Irq => self.regs.read(15).wrapping_add(4),
            Exception::Reset => 0,
        };

        self.regs.switch_mode(old_cpsr.current_mode(), new_mode);
        self.regs.set_spsr(new_mode, old_cpsr);
        self.cpsr.set_mode(new_mode as u8);
        self.cpsr.set_thumb(false);
        self.cpsr.set_irq_mask(true);

        self.regs.write(14, return_addr);
        self.regs.write(15, exception.vector());
    }

    /// Returns from an exception: restores CPSR from the SPSR of the current
    /// mode and re-banks the register file.
    pub fn exception_return(&mut self, new_cpsr: Psr) {
        let old_mode = self.cpsr.current_mode();
        self.regs.switch_mode(old_mode, new_cpsr.current_mode());
        self.cpsr = new_cpsr;
    }

    /// Executes exactly one instruction, returning the cycles it consumed.
    ///
    /// This is total: undecodable words trap through the guest undefined
    /// vector and unmapped fetches through the prefetch-abort vector, so the
    /// caller always gets forward progress.
    pub fn step(&mut self, bus: &mut dyn Bus) -> u64 {
        interp::step(self, bus)
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?} cpsr={:08x}", self.arch, self.cpsr.to_word())?;
        for reg in 0..16u8 {
            write!(f, " {}={:08x}", regfile::ARM_REG_NAMES[reg as usize], self.regs.read(reg))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psr_round_trips_through_words() {
        let psr = Psr::new()
            .with_mode(Mode::Supervisor as u8)
            .with_thumb(true)
            .with_n(true)
            .with_c(true);
        let word = psr.to_word();
        assert_eq!(word & 0x1f, 0x13);
        assert_ne!(word & (1 << 5), 0); // thumb
        assert_ne!(word & (1 << 31), 0); // n
        assert_ne!(word & (1 << 29), 0); // c
        let back = Psr::from_word(word);
        assert_eq!(back.current_mode(), Mode::Supervisor);
        assert!(back.thumb());
    }

    #[test]
    fn exceptions_bank_and_vector() {
        let mut core = Core::new(Arch::Arm9, 0x0200_0000);
        core.regs.write(13, 0x0300_1000);
        core.regs.write(15, 0x0200_0104); // as if interp stepped past 0x0200_0100
        core.raise_exception(Exception::Swi);

        assert_eq!(core.pc(), 0x08);
        assert_eq!(core.cpsr.current_mode(), Mode::Supervisor);
        assert_eq!(core.regs.read(14), 0x0200_0104);
        // Supervisor r13 is banked away from the System one
        assert_ne!(core.regs.read(13), 0x0300_1000);

        let spsr = core.regs.spsr(Mode::Supervisor);
        core.exception_return(spsr);
        assert_eq!(core.cpsr.current_mode(), Mode::System);
        assert_eq!(core.regs.read(13), 0x0300_1000);
    }
}
