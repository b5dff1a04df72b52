use super::{Mode, Psr};

/// Banked ARM register file.
///
/// r13/r14 are banked per exception mode; the FIQ r8-r12 bank is not
/// modelled (nothing on this console takes FIQs). The active bank always
/// lives in `regs`, and `switch_mode` swaps the stale bank out.
pub struct RegFile {
    regs: [u32; 16],
    banked: [[u32; 2]; BANKS],
    spsr: [Psr; BANKS],
}

const BANKS: usize = 6;

fn bank_index(mode: Mode) -> usize {
    match mode {
        Mode::User | Mode::System => 0,
        Mode::Supervisor => 1,
        Mode::Irq => 2,
        Mode::Undefined => 3,
        Mode::Abort => 4,
        Mode::Fiq => 5,
    }
}

impl RegFile {
    pub fn new() -> RegFile {
        RegFile {
            regs: [0; 16],
            banked: [[0; 2]; BANKS],
            spsr: [Psr::new(); BANKS],
        }
    }

    #[inline(always)]
    pub fn read(&self, reg: u8) -> u32 {
        self.regs[reg as usize]
    }

    #[inline(always)]
    pub fn write(&mut self, reg: u8, val: u32) {
        self.regs[reg as usize] = val;
    }

    pub fn switch_mode(&mut self, from: Mode, to: Mode) {
        let from = bank_index(from);
        let to = bank_index(to);
        if from == to {
            return;
        }
        self.banked[from] = [self.regs[13], self.regs[14]];
        self.regs[13] = self.banked[to][0];
        self.regs[14] = self.banked[to][1];
    }

    pub fn spsr(&self, mode: Mode) -> Psr {
        self.spsr[bank_index(mode)]
    }

    pub fn set_spsr(&mut self, mode: Mode, psr: Psr) {
        self.spsr[bank_index(mode)] = psr;
    }
}

pub const ARM_REG_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7",
    "r8", "r9", "r10", "r11", "r12",
    "sp", // r13 - stack pointer, banked per mode
    "lr", // r14 - link register, banked per mode
    "pc", // r15
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_switch_swaps_sp_and_lr() {
        let mut rf = RegFile::new();
        rf.write(13, 0x1000);
        rf.write(14, 0x2000);
        rf.switch_mode(Mode::System, Mode::Irq);
        rf.write(13, 0x3000);
        rf.switch_mode(Mode::Irq, Mode::System);
        assert_eq!(rf.read(13), 0x1000);
        assert_eq!(rf.read(14), 0x2000);
        rf.switch_mode(Mode::System, Mode::Irq);
        assert_eq!(rf.read(13), 0x3000);
    }
}
