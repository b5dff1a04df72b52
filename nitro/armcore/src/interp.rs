//! Single-instruction interpreter.
//!
//! This is the unconditional fallback behind the recompiler: it executes any
//! legally-fetched instruction, including ones the recompiler refuses to
//! translate, and reports the cycles consumed. Stores go through the `Bus`,
//! which is where compiled-code invalidation hangs off.

use crate::instructions::{
    self, AluOp, HKind, HOffset, Instr, MemOffset, Op, Operand2, ShiftKind,
};
use crate::{Arch, Bus, Core, Exception, Mode};

// Rough cycle costs on the guest bus clock. The real parts have sequential /
// non-sequential timing; a flat approximation keeps the two cores honest
// relative to each other.
const CYCLES_ALU: u64 = 1;
const CYCLES_LOAD: u64 = 3;
const CYCLES_STORE: u64 = 2;
const CYCLES_BRANCH: u64 = 3;
const CYCLES_EXCEPTION: u64 = 3;
const CYCLES_MUL: u64 = 3;

/// Fetches, decodes and executes exactly one instruction.
pub fn step(core: &mut Core, bus: &mut dyn Bus) -> u64 {
    let addr = core.regs.read(15);
    if core.thumb() {
        match bus.fetch16(addr & !1) {
            Some(half) => {
                core.regs.write(15, addr.wrapping_add(2));
                execute(core, bus, instructions::decode_thumb(half))
            }
            None => {
                core.raise_exception(Exception::PrefetchAbort);
                CYCLES_EXCEPTION
            }
        }
    } else {
        match bus.fetch32(addr & !3) {
            Some(word) => {
                core.regs.write(15, addr.wrapping_add(4));
                execute(core, bus, instructions::decode_arm(word))
            }
            None => {
                core.raise_exception(Exception::PrefetchAbort);
                CYCLES_EXCEPTION
            }
        }
    }
}

/// Executes one already-decoded instruction.
///
/// On entry `r15` holds the address of the *next* instruction (the fetch has
/// been stepped past); architecturally-visible PC reads add one more
/// instruction width on top of that.
pub fn execute(core: &mut Core, bus: &mut dyn Bus, instr: Instr) -> u64 {
    if !instr.cond.holds(&core.cpsr) {
        return CYCLES_ALU;
    }

    match instr.op {
        Op::Dp { op, s, rd, rn, src } => exec_dp(core, op, s, rd, rn, src),
        Op::Mul { acc, s, rd, rn, rs, rm } => exec_mul(core, acc, s, rd, rn, rs, rm),
        Op::MulLong { signed, acc, s, rdhi, rdlo, rs, rm } => {
            exec_mul_long(core, signed, acc, s, rdhi, rdlo, rs, rm)
        }
        Op::Clz { rd, rm } => {
            if core.arch == Arch::Arm7 {
                core.raise_exception(Exception::Undefined);
                return CYCLES_EXCEPTION;
            }
            let value = read_reg(core, rm).leading_zeros();
            core.regs.write(rd, value);
            CYCLES_ALU
        }
        Op::Mrs { rd, spsr } => {
            let value = if spsr {
                core.regs.spsr(core.cpsr.current_mode()).to_word()
            } else {
                core.cpsr.to_word()
            };
            core.regs.write(rd, value);
            CYCLES_ALU
        }
        Op::MsrReg { rm, spsr, mask } => {
            let value = read_reg(core, rm);
            exec_msr(core, value, spsr, mask);
            CYCLES_ALU
        }
        Op::MsrImm { value, spsr, mask } => {
            exec_msr(core, value, spsr, mask);
            CYCLES_ALU
        }
        Op::Swp { byte, rd, rn, rm } => {
            let addr = read_reg(core, rn);
            let new = read_reg(core, rm);
            if byte {
                let old = bus.load8(addr);
                bus.store8(addr, new as u8);
                core.regs.write(rd, old as u32);
            } else {
                let old = load_word_rotated(bus, addr);
                bus.store32(addr & !3, new);
                core.regs.write(rd, old);
            }
            CYCLES_LOAD + CYCLES_STORE
        }
        Op::Branch { link, offset } => {
            if link {
                let ret = core.regs.read(15) | core.thumb() as u32;
                core.regs.write(14, ret);
            }
            // Branch targets are relative to the unmasked pipeline pc
            let width = if core.thumb() { 2 } else { 4 };
            let target = core.regs.read(15).wrapping_add(width).wrapping_add(offset as u32);
            write_pc(core, target);
            CYCLES_BRANCH
        }
        Op::Bx { rm, link } => {
            let target = read_reg(core, rm);
            if link {
                if core.arch == Arch::Arm7 {
                    // BLX (reg) is v5 only
                    core.raise_exception(Exception::Undefined);
                    return CYCLES_EXCEPTION;
                }
                let ret = core.regs.read(15) | core.thumb() as u32;
                core.regs.write(14, ret);
            }
            core.cpsr.set_thumb(target & 1 != 0);
            core.regs.write(15, target & !1);
            CYCLES_BRANCH
        }
        Op::BlPrefix { offset } => {
            let lr = core.regs.read(15).wrapping_add(2).wrapping_add(offset as u32);
            core.regs.write(14, lr);
            CYCLES_ALU
        }
        Op::BlSuffix { offset, exchange } => {
            if exchange && core.arch == Arch::Arm7 {
                core.raise_exception(Exception::Undefined);
                return CYCLES_EXCEPTION;
            }
            let target = core.regs.read(14).wrapping_add(offset);
            let ret = core.regs.read(15) | 1;
            core.regs.write(14, ret);
            if exchange {
                core.cpsr.set_thumb(false);
                core.regs.write(15, target & !3);
            } else {
                core.regs.write(15, target & !1);
            }
            CYCLES_BRANCH
        }
        Op::Mem { load, byte, rd, rn, offset, pre, up, writeback } => {
            exec_mem(core, bus, load, byte, rd, rn, offset, pre, up, writeback)
        }
        Op::MemH { kind, load, rd, rn, offset, pre, up, writeback } => {
            exec_mem_h(core, bus, kind, load, rd, rn, offset, pre, up, writeback)
        }
        Op::Block { load, rn, regs, pre, up, writeback, sbit: _ } => {
            exec_block(core, bus, load, rn, regs, pre, up, writeback)
        }
        Op::Swi { comment } => {
            log::trace!("swi #{:06x} at pc={:08x}", comment, core.regs.read(15));
            core.raise_exception(Exception::Swi);
            CYCLES_EXCEPTION
        }
        Op::Cop { raw } => {
            if core.arch == Arch::Arm9 {
                // System-control coprocessor accesses are accepted and dropped
                log::trace!("coprocessor op {:08x} ignored", raw);
                CYCLES_ALU
            } else {
                core.raise_exception(Exception::Undefined);
                CYCLES_EXCEPTION
            }
        }
        Op::Undefined { raw } => {
            log::debug!("undefined instruction {:08x} at pc={:08x}", raw, core.regs.read(15));
            core.raise_exception(Exception::Undefined);
            CYCLES_EXCEPTION
        }
    }
}

/// Reads a register as the instruction sees it: `r15` reads as the fetch
/// address plus two instruction widths.
#[inline(always)]
fn read_reg(core: &Core, reg: u8) -> u32 {
    let value = core.regs.read(reg);
    if reg == 15 {
        let pc = value.wrapping_add(if core.thumb() { 2 } else { 4 });
        // Thumb address calculations force word alignment on the pc
        if core.thumb() { pc & !2 } else { pc }
    } else {
        value
    }
}

#[inline(always)]
fn write_pc(core: &mut Core, target: u32) {
    let mask = if core.thumb() { !1 } else { !3 };
    core.regs.write(15, target & mask);
}

/// Loaded pc values interwork on the v5 core: bit 0 selects Thumb.
fn write_pc_loaded(core: &mut Core, target: u32) {
    if core.arch == Arch::Arm9 {
        core.cpsr.set_thumb(target & 1 != 0);
        core.regs.write(15, target & !1);
    } else {
        write_pc(core, target);
    }
}

fn load_word_rotated(bus: &mut dyn Bus, addr: u32) -> u32 {
    bus.load32(addr & !3).rotate_right(8 * (addr & 3))
}

struct Shifted {
    value: u32,
    carry: bool,
    extra: u64,
}

fn resolve_operand2(core: &Core, src: Operand2) -> Shifted {
    let c_in = core.cpsr.c();
    match src {
        Operand2::Imm { value, rot } => Shifted {
            value,
            carry: if rot != 0 { value >> 31 != 0 } else { c_in },
            extra: 0,
        },
        Operand2::ShiftImm { rm, kind, amount } => {
            let value = read_reg(core, rm);
            let (value, carry) = shift_imm(value, kind, amount, c_in);
            Shifted { value, carry, extra: 0 }
        }
        Operand2::ShiftReg { rm, kind, rs } => {
            let value = read_reg(core, rm);
            let amount = core.regs.read(rs) & 0xff;
            let (value, carry) = shift_reg(value, kind, amount, c_in);
            Shifted { value, carry, extra: 1 }
        }
    }
}

fn shift_imm(value: u32, kind: ShiftKind, amount: u8, c_in: bool) -> (u32, bool) {
    match (kind, amount) {
        (ShiftKind::Lsl, 0) => (value, c_in),
        (ShiftKind::Lsl, n) => (value << n, value >> (32 - n as u32) & 1 != 0),
        // LSR #0 encodes LSR #32
        (ShiftKind::Lsr, 0) => (0, value >> 31 != 0),
        (ShiftKind::Lsr, n) => (value >> n, value >> (n as u32 - 1) & 1 != 0),
        // ASR #0 encodes ASR #32
        (ShiftKind::Asr, 0) => (((value as i32) >> 31) as u32, value >> 31 != 0),
        (ShiftKind::Asr, n) => (((value as i32) >> n) as u32, value >> (n as u32 - 1) & 1 != 0),
        // ROR #0 encodes RRX
        (ShiftKind::Ror, 0) => (((c_in as u32) << 31) | (value >> 1), value & 1 != 0),
        (ShiftKind::Ror, n) => (value.rotate_right(n as u32), value >> (n as u32 - 1) & 1 != 0),
    }
}

fn shift_reg(value: u32, kind: ShiftKind, amount: u32, c_in: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, c_in);
    }
    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => (value << amount, value >> (32 - amount) & 1 != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        ShiftKind::Lsr => match amount {
            1..=31 => (value >> amount, value >> (amount - 1) & 1 != 0),
            32 => (0, value >> 31 != 0),
            _ => (0, false),
        },
        ShiftKind::Asr => match amount {
            1..=31 => (((value as i32) >> amount) as u32, value >> (amount - 1) & 1 != 0),
            _ => (((value as i32) >> 31) as u32, value >> 31 != 0),
        },
        ShiftKind::Ror => {
            let n = amount & 0x1f;
            if n == 0 {
                (value, value >> 31 != 0)
            } else {
                (value.rotate_right(n), value >> (n - 1) & 1 != 0)
            }
        }
    }
}

fn exec_dp(core: &mut Core, op: AluOp, s: bool, rd: u8, rn: u8, src: Operand2) -> u64 {
    let shifted = resolve_operand2(core, src);
    let a = read_reg(core, rn);
    let b = shifted.value;
    let c_in = core.cpsr.c() as u32;

    enum FlagKind {
        Logical,
        Add,
        Sub,
    }

    let (result, kind, op_a, op_b) = match op {
        AluOp::And | AluOp::Tst => (a & b, FlagKind::Logical, a, b),
        AluOp::Eor | AluOp::Teq => (a ^ b, FlagKind::Logical, a, b),
        AluOp::Orr => (a | b, FlagKind::Logical, a, b),
        AluOp::Bic => (a & !b, FlagKind::Logical, a, b),
        AluOp::Mov => (b, FlagKind::Logical, a, b),
        AluOp::Mvn => (!b, FlagKind::Logical, a, b),
        AluOp::Add | AluOp::Cmn => (a.wrapping_add(b), FlagKind::Add, a, b),
        AluOp::Adc => (a.wrapping_add(b).wrapping_add(c_in), FlagKind::Add, a, b),
        AluOp::Sub | AluOp::Cmp => (a.wrapping_sub(b), FlagKind::Sub, a, b),
        AluOp::Sbc => (a.wrapping_sub(b).wrapping_sub(1 - c_in), FlagKind::Sub, a, b),
        AluOp::Rsb => (b.wrapping_sub(a), FlagKind::Sub, b, a),
        AluOp::Rsc => (b.wrapping_sub(a).wrapping_sub(1 - c_in), FlagKind::Sub, b, a),
    };

    if s {
        if rd == 15 && !op.test_only() {
            // movs pc, lr and friends: exception return
            let spsr = core.regs.spsr(core.cpsr.current_mode());
            core.exception_return(spsr);
        } else {
            core.cpsr.set_n(result >> 31 != 0);
            core.cpsr.set_z(result == 0);
            match kind {
                FlagKind::Logical => core.cpsr.set_c(shifted.carry),
                FlagKind::Add => {
                    let wide = match op {
                        AluOp::Adc => op_a as u64 + op_b as u64 + c_in as u64,
                        _ => op_a as u64 + op_b as u64,
                    };
                    core.cpsr.set_c(wide > u32::MAX as u64);
                    core.cpsr.set_v((!(op_a ^ op_b) & (op_a ^ result)) >> 31 != 0);
                }
                FlagKind::Sub => {
                    let borrow = match op {
                        AluOp::Sbc | AluOp::Rsc => {
                            (op_a as u64) < op_b as u64 + (1 - c_in) as u64
                        }
                        _ => op_a < op_b,
                    };
                    core.cpsr.set_c(!borrow);
                    core.cpsr.set_v(((op_a ^ op_b) & (op_a ^ result)) >> 31 != 0);
                }
            }
        }
    }

    let mut cycles = CYCLES_ALU + shifted.extra;
    if !op.test_only() {
        if rd == 15 {
            write_pc(core, result);
            cycles += 2;
        } else {
            core.regs.write(rd, result);
        }
    }
    cycles
}

fn exec_mul(core: &mut Core, acc: bool, s: bool, rd: u8, rn: u8, rs: u8, rm: u8) -> u64 {
    let mut result = read_reg(core, rm).wrapping_mul(read_reg(core, rs));
    if acc {
        result = result.wrapping_add(read_reg(core, rn));
    }
    core.regs.write(rd, result);
    if s {
        core.cpsr.set_n(result >> 31 != 0);
        core.cpsr.set_z(result == 0);
    }
    CYCLES_MUL
}

fn exec_mul_long(
    core: &mut Core,
    signed: bool,
    acc: bool,
    s: bool,
    rdhi: u8,
    rdlo: u8,
    rs: u8,
    rm: u8,
) -> u64 {
    let a = read_reg(core, rm);
    let b = read_reg(core, rs);
    let mut result = if signed {
        (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64
    } else {
        (a as u64).wrapping_mul(b as u64)
    };
    if acc {
        let base = ((read_reg(core, rdhi) as u64) << 32) | read_reg(core, rdlo) as u64;
        result = result.wrapping_add(base);
    }
    core.regs.write(rdlo, result as u32);
    core.regs.write(rdhi, (result >> 32) as u32);
    if s {
        core.cpsr.set_n(result >> 63 != 0);
        core.cpsr.set_z(result == 0);
    }
    CYCLES_MUL + 1
}

fn exec_msr(core: &mut Core, value: u32, spsr: bool, mask: u8) {
    let mut field_mask = 0u32;
    if mask & 1 != 0 {
        field_mask |= 0x0000_00ff;
    }
    if mask & 2 != 0 {
        field_mask |= 0x0000_ff00;
    }
    if mask & 4 != 0 {
        field_mask |= 0x00ff_0000;
    }
    if mask & 8 != 0 {
        field_mask |= 0xff00_0000;
    }
    if core.cpsr.current_mode() == Mode::User {
        // User mode may only touch the flags
        field_mask &= 0xff00_0000;
    }

    if spsr {
        let mode = core.cpsr.current_mode();
        let old = core.regs.spsr(mode).to_word();
        core.regs
            .set_spsr(mode, crate::Psr::from_word((old & !field_mask) | (value & field_mask)));
    } else {
        let old = core.cpsr;
        let new = crate::Psr::from_word((old.to_word() & !field_mask) | (value & field_mask));
        if new.current_mode() != old.current_mode() {
            core.regs.switch_mode(old.current_mode(), new.current_mode());
        }
        core.cpsr = new;
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_mem(
    core: &mut Core,
    bus: &mut dyn Bus,
    load: bool,
    byte: bool,
    rd: u8,
    rn: u8,
    offset: MemOffset,
    pre: bool,
    up: bool,
    writeback: bool,
) -> u64 {
    let offset = match offset {
        MemOffset::Imm(imm) => imm as u32,
        MemOffset::Reg { rm, kind, amount } => {
            shift_imm(read_reg(core, rm), kind, amount, core.cpsr.c()).0
        }
    };
    let base = read_reg(core, rn);
    let offset_base = if up { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
    let addr = if pre { offset_base } else { base };

    if load {
        let value = if byte {
            bus.load8(addr) as u32
        } else {
            load_word_rotated(bus, addr)
        };
        if writeback || !pre {
            core.regs.write(rn, offset_base);
        }
        if rd == 15 {
            write_pc_loaded(core, value);
        } else {
            core.regs.write(rd, value);
        }
        CYCLES_LOAD
    } else {
        let value = read_reg(core, rd);
        if byte {
            bus.store8(addr, value as u8);
        } else {
            bus.store32(addr & !3, value);
        }
        if writeback || !pre {
            core.regs.write(rn, offset_base);
        }
        CYCLES_STORE
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_mem_h(
    core: &mut Core,
    bus: &mut dyn Bus,
    kind: HKind,
    load: bool,
    rd: u8,
    rn: u8,
    offset: HOffset,
    pre: bool,
    up: bool,
    writeback: bool,
) -> u64 {
    let offset = match offset {
        HOffset::Imm(imm) => imm as u32,
        HOffset::Reg(rm) => read_reg(core, rm),
    };
    let base = read_reg(core, rn);
    let offset_base = if up { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
    let addr = if pre { offset_base } else { base };

    if load {
        let value = match kind {
            HKind::Half => bus.load16(addr & !1) as u32,
            HKind::SignedByte => bus.load8(addr) as i8 as i32 as u32,
            HKind::SignedHalf => bus.load16(addr & !1) as i16 as i32 as u32,
        };
        if writeback || !pre {
            core.regs.write(rn, offset_base);
        }
        if rd == 15 {
            write_pc_loaded(core, value);
        } else {
            core.regs.write(rd, value);
        }
        CYCLES_LOAD
    } else {
        let value = read_reg(core, rd);
        bus.store16(addr & !1, value as u16);
        if writeback || !pre {
            core.regs.write(rn, offset_base);
        }
        CYCLES_STORE
    }
}

fn exec_block(
    core: &mut Core,
    bus: &mut dyn Bus,
    load: bool,
    rn: u8,
    regs: u16,
    pre: bool,
    up: bool,
    writeback: bool,
) -> u64 {
    if regs == 0 {
        return CYCLES_ALU;
    }
    let count = regs.count_ones();
    let base = core.regs.read(rn);

    let lowest = if up {
        base.wrapping_add(if pre { 4 } else { 0 })
    } else {
        base.wrapping_sub(count * 4).wrapping_add(if pre { 0 } else { 4 })
    };
    let new_base = if up { base.wrapping_add(count * 4) } else { base.wrapping_sub(count * 4) };

    if writeback {
        core.regs.write(rn, new_base);
    }

    let mut addr = lowest & !3;
    for reg in 0..16u8 {
        if regs & (1 << reg) == 0 {
            continue;
        }
        if load {
            let value = bus.load32(addr);
            if reg == 15 {
                write_pc_loaded(core, value);
            } else {
                core.regs.write(reg, value);
            }
        } else {
            bus.store32(addr, read_reg(core, reg));
        }
        addr = addr.wrapping_add(4);
    }

    count as u64 + if load { 2 } else { 1 }
}
