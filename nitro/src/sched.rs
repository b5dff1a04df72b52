use std::ops::{Add, AddAssign, Sub};

/// Emulated time in bus-clock cycles.
///
/// The bus clock is the common denominator for both processors: the
/// coprocessor runs at 1x and the main core at 2x.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(u64);

impl Time {
    pub const ZERO: Time = Time(0);

    #[inline(always)]
    pub fn cycles(self) -> u64 {
        self.0
    }
}

impl Add<u64> for Time {
    type Output = Time;
    fn add(self, rhs: u64) -> Time {
        Time(self.0 + rhs)
    }
}

impl AddAssign<u64> for Time {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for Time {
    type Output = u64;
    fn sub(self, rhs: Time) -> u64 {
        self.0 - rhs.0
    }
}

pub const BUS_CLOCK_HZ: u64 = 33_513_982;

/// Bus cycles per video frame at ~59.83 Hz.
pub const CYCLES_PER_FRAME: u64 = 560_190;

/// Bus cycles granted per execution slice. Short enough that cross-processor
/// stores are seen promptly, long enough to amortize dispatch.
pub const QUANTUM: u64 = 64;

/// The main core runs at twice the bus clock.
#[inline(always)]
pub fn to_arm9_time(bus_cycles: u64) -> u64 {
    bus_cycles << 1
}

#[inline(always)]
pub fn to_bus_time(arm9_cycles: u64) -> u64 {
    (arm9_cycles + 1) >> 1
}

/// Overrun bookkeeping for one processor.
///
/// A compiled block cannot be preempted, so a quantum can run long; the
/// excess is carried as debt and paid off before the processor is granted
/// more cycles.
#[derive(Default)]
pub struct QuantumClock {
    debt: u64,
}

impl QuantumClock {
    pub fn new() -> QuantumClock {
        QuantumClock::default()
    }

    /// Cycles to actually grant out of a nominal `budget`. Zero means the
    /// processor already ran ahead this far and sits this slice out.
    pub fn grant(&mut self, budget: u64) -> u64 {
        if self.debt >= budget {
            self.debt -= budget;
            0
        } else {
            let granted = budget - self.debt;
            self.debt = 0;
            granted
        }
    }

    /// Records how far `spent` overran the grant.
    pub fn settle(&mut self, granted: u64, spent: u64) {
        self.debt += spent.saturating_sub(granted);
    }

    pub fn reset(&mut self) {
        self.debt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overruns_are_paid_back() {
        let mut clock = QuantumClock::new();
        let granted = clock.grant(64);
        assert_eq!(granted, 64);
        clock.settle(granted, 200); // block ran 136 cycles long

        assert_eq!(clock.grant(64), 0); // debt 136 -> 72
        assert_eq!(clock.grant(64), 0); // debt 72 -> 8
        assert_eq!(clock.grant(64), 56);
        assert_eq!(clock.grant(64), 64);
    }

    #[test]
    fn clock_ratio_round_trips() {
        assert_eq!(to_arm9_time(QUANTUM), 128);
        assert_eq!(to_bus_time(128), 64);
        assert_eq!(to_bus_time(129), 65);
    }

    #[test]
    fn time_ordering() {
        let a = Time::ZERO + 100;
        let b = a + 28;
        assert!(b > a);
        assert_eq!(b - a, 28);
        assert_eq!(b.cycles(), 128);
    }
}
