use modular_bitfield::{bitfield, specifiers::*};
use common::util::sign_extend;

use super::Psr;

/// ARM condition field. Thumb instructions decode to `Al` except for
/// conditional branches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cond {
    Eq, Ne, Cs, Cc, Mi, Pl, Vs, Vc,
    Hi, Ls, Ge, Lt, Gt, Le, Al, Nv,
}

impl Cond {
    pub fn from_bits(bits: u32) -> Cond {
        match bits & 0xf {
            0x0 => Cond::Eq,
            0x1 => Cond::Ne,
            0x2 => Cond::Cs,
            0x3 => Cond::Cc,
            0x4 => Cond::Mi,
            0x5 => Cond::Pl,
            0x6 => Cond::Vs,
            0x7 => Cond::Vc,
            0x8 => Cond::Hi,
            0x9 => Cond::Ls,
            0xa => Cond::Ge,
            0xb => Cond::Lt,
            0xc => Cond::Gt,
            0xd => Cond::Le,
            0xe => Cond::Al,
            _ => Cond::Nv,
        }
    }

    pub fn holds(self, psr: &Psr) -> bool {
        let (n, z, c, v) = (psr.n(), psr.z(), psr.c(), psr.v());
        match self {
            Cond::Eq => z,
            Cond::Ne => !z,
            Cond::Cs => c,
            Cond::Cc => !c,
            Cond::Mi => n,
            Cond::Pl => !n,
            Cond::Vs => v,
            Cond::Vc => !v,
            Cond::Hi => c && !z,
            Cond::Ls => !c || z,
            Cond::Ge => n == v,
            Cond::Lt => n != v,
            Cond::Gt => !z && n == v,
            Cond::Le => z || n != v,
            Cond::Al => true,
            Cond::Nv => false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AluOp {
    And, Eor, Sub, Rsb, Add, Adc, Sbc, Rsc,
    Tst, Teq, Cmp, Cmn, Orr, Mov, Bic, Mvn,
}

impl AluOp {
    fn from_bits(bits: u32) -> AluOp {
        match bits & 0xf {
            0x0 => AluOp::And,
            0x1 => AluOp::Eor,
            0x2 => AluOp::Sub,
            0x3 => AluOp::Rsb,
            0x4 => AluOp::Add,
            0x5 => AluOp::Adc,
            0x6 => AluOp::Sbc,
            0x7 => AluOp::Rsc,
            0x8 => AluOp::Tst,
            0x9 => AluOp::Teq,
            0xa => AluOp::Cmp,
            0xb => AluOp::Cmn,
            0xc => AluOp::Orr,
            0xd => AluOp::Mov,
            0xe => AluOp::Bic,
            _ => AluOp::Mvn,
        }
    }

    /// Compare/test opcodes write flags only, never a destination.
    pub fn test_only(self) -> bool {
        matches!(self, AluOp::Tst | AluOp::Teq | AluOp::Cmp | AluOp::Cmn)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShiftKind {
    Lsl, Lsr, Asr, Ror,
}

impl ShiftKind {
    fn from_bits(bits: u32) -> ShiftKind {
        match bits & 0x3 {
            0 => ShiftKind::Lsl,
            1 => ShiftKind::Lsr,
            2 => ShiftKind::Asr,
            _ => ShiftKind::Ror,
        }
    }
}

/// Second operand of a data-processing instruction.
#[derive(Debug, Copy, Clone)]
pub enum Operand2 {
    /// 8-bit immediate rotated right by 2*rot; value is pre-rotated.
    Imm { value: u32, rot: u8 },
    ShiftImm { rm: u8, kind: ShiftKind, amount: u8 },
    ShiftReg { rm: u8, kind: ShiftKind, rs: u8 },
}

#[derive(Debug, Copy, Clone)]
pub enum MemOffset {
    Imm(u16),
    Reg { rm: u8, kind: ShiftKind, amount: u8 },
}

#[derive(Debug, Copy, Clone)]
pub enum HOffset {
    Imm(u8),
    Reg(u8),
}

/// The halfword/signed sub-forms of the extra load/store space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HKind {
    Half,
    SignedByte,
    SignedHalf,
}

#[derive(Debug, Copy, Clone)]
pub enum Op {
    Dp { op: AluOp, s: bool, rd: u8, rn: u8, src: Operand2 },
    Mul { acc: bool, s: bool, rd: u8, rn: u8, rs: u8, rm: u8 },
    MulLong { signed: bool, acc: bool, s: bool, rdhi: u8, rdlo: u8, rs: u8, rm: u8 },
    Clz { rd: u8, rm: u8 },
    Mrs { rd: u8, spsr: bool },
    MsrReg { rm: u8, spsr: bool, mask: u8 },
    MsrImm { value: u32, spsr: bool, mask: u8 },
    Swp { byte: bool, rd: u8, rn: u8, rm: u8 },
    Branch { link: bool, offset: i32 },
    Bx { rm: u8, link: bool },
    /// First half of a Thumb BL/BLX pair; stashes the high offset in lr.
    BlPrefix { offset: i32 },
    /// Second half of a Thumb BL/BLX pair.
    BlSuffix { offset: u32, exchange: bool },
    Mem { load: bool, byte: bool, rd: u8, rn: u8, offset: MemOffset, pre: bool, up: bool, writeback: bool },
    MemH { kind: HKind, load: bool, rd: u8, rn: u8, offset: HOffset, pre: bool, up: bool, writeback: bool },
    Block { load: bool, rn: u8, regs: u16, pre: bool, up: bool, writeback: bool, sbit: bool },
    Swi { comment: u32 },
    /// Coprocessor space (CDP/LDC/STC/MCR/MRC). The main core treats the
    /// system-control coprocessor as a sink; the coprocessor core traps.
    Cop { raw: u32 },
    Undefined { raw: u32 },
}

#[derive(Debug, Copy, Clone)]
pub struct Instr {
    pub cond: Cond,
    pub op: Op,
}

impl Instr {
    fn al(op: Op) -> Instr {
        Instr { cond: Cond::Al, op }
    }
}

// Bitfield views of the regular ARM instruction forms, in the manner of the
// MIPS I/J/R types. The irregular corners of the map are picked apart by
// hand in decode_arm.

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct DpType {
    pub op2: B12,
    pub rd: B4,
    pub rn: B4,
    pub s: bool,
    pub opcode: B4,
    pub imm: bool,
    #[skip]
    group: B2,
    pub cond: B4,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct MemType {
    pub offset: B12,
    pub rd: B4,
    pub rn: B4,
    pub load: bool,
    pub writeback: bool,
    pub byte: bool,
    pub up: bool,
    pub pre: bool,
    pub reg_offset: bool,
    #[skip]
    group: B2,
    pub cond: B4,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct BlockType {
    pub regs: B16,
    pub rn: B4,
    pub load: bool,
    pub writeback: bool,
    pub sbit: bool,
    pub up: bool,
    pub pre: bool,
    #[skip]
    group: B3,
    pub cond: B4,
}

impl DpType {
    pub fn of(word: u32) -> DpType {
        DpType::from_bytes(word.to_le_bytes())
    }
}

impl MemType {
    pub fn of(word: u32) -> MemType {
        MemType::from_bytes(word.to_le_bytes())
    }
}

impl BlockType {
    pub fn of(word: u32) -> BlockType {
        BlockType::from_bytes(word.to_le_bytes())
    }
}

fn decode_operand2(word: u32, imm: bool) -> Operand2 {
    if imm {
        let rot = ((word >> 8) & 0xf) as u8;
        let value = (word & 0xff).rotate_right(2 * rot as u32);
        Operand2::Imm { value, rot }
    } else {
        let rm = (word & 0xf) as u8;
        let kind = ShiftKind::from_bits(word >> 5);
        if word & 0x10 == 0 {
            Operand2::ShiftImm { rm, kind, amount: ((word >> 7) & 0x1f) as u8 }
        } else {
            Operand2::ShiftReg { rm, kind, rs: ((word >> 8) & 0xf) as u8 }
        }
    }
}

fn decode_extra_loadstore(word: u32) -> Op {
    let load = word & (1 << 20) != 0;
    let sh = (word >> 5) & 0x3;
    let kind = match (load, sh) {
        (_, 1) => HKind::Half,
        (true, 2) => HKind::SignedByte,
        (true, 3) => HKind::SignedHalf,
        // LDRD/STRD (v5TE dual transfers) are outside the modelled subset
        _ => return Op::Undefined { raw: word },
    };
    let offset = if word & (1 << 22) != 0 {
        HOffset::Imm((((word >> 4) & 0xf0) | (word & 0xf)) as u8)
    } else {
        HOffset::Reg((word & 0xf) as u8)
    };
    Op::MemH {
        kind,
        load,
        rd: ((word >> 12) & 0xf) as u8,
        rn: ((word >> 16) & 0xf) as u8,
        offset,
        pre: word & (1 << 24) != 0,
        up: word & (1 << 23) != 0,
        writeback: word & (1 << 21) != 0,
    }
}

/// Decodes one 32-bit ARM instruction. Total: every word becomes an `Instr`,
/// with unmodelled or reserved encodings collapsing to `Op::Undefined`.
pub fn decode_arm(word: u32) -> Instr {
    let cond = Cond::from_bits(word >> 28);
    if (word >> 28) == 0xf {
        // Unconditional space (BLX imm, PLD, ...) is outside the subset
        return Instr { cond: Cond::Al, op: Op::Undefined { raw: word } };
    }

    let op = match (word >> 25) & 0x7 {
        0b000 => decode_arm_misc(word),
        0b001 => {
            let dp = DpType::of(word);
            let opcode = AluOp::from_bits(dp.opcode() as u32);
            if opcode.test_only() && !dp.s() {
                // MSR immediate lives in the hole left by compare-without-S
                if word & 0x0fb0_f000 == 0x0320_f000 {
                    let rot = (word >> 8) & 0xf;
                    Op::MsrImm {
                        value: (word & 0xff).rotate_right(2 * rot),
                        spsr: word & (1 << 22) != 0,
                        mask: ((word >> 16) & 0xf) as u8,
                    }
                } else {
                    Op::Undefined { raw: word }
                }
            } else {
                Op::Dp {
                    op: opcode,
                    s: dp.s(),
                    rd: dp.rd(),
                    rn: dp.rn(),
                    src: decode_operand2(word, true),
                }
            }
        }
        0b010 | 0b011 => {
            if word & (1 << 25) != 0 && word & 0x10 != 0 {
                // Register-offset form with bit 4 set is the undefined/media hole
                Op::Undefined { raw: word }
            } else {
                let mem = MemType::of(word);
                let offset = if mem.reg_offset() {
                    MemOffset::Reg {
                        rm: (word & 0xf) as u8,
                        kind: ShiftKind::from_bits(word >> 5),
                        amount: ((word >> 7) & 0x1f) as u8,
                    }
                } else {
                    MemOffset::Imm(mem.offset())
                };
                Op::Mem {
                    load: mem.load(),
                    byte: mem.byte(),
                    rd: mem.rd(),
                    rn: mem.rn(),
                    offset,
                    pre: mem.pre(),
                    up: mem.up(),
                    writeback: mem.writeback(),
                }
            }
        }
        0b100 => {
            let blk = BlockType::of(word);
            Op::Block {
                load: blk.load(),
                rn: blk.rn(),
                regs: blk.regs(),
                pre: blk.pre(),
                up: blk.up(),
                writeback: blk.writeback(),
                sbit: blk.sbit(),
            }
        }
        0b101 => Op::Branch {
            link: word & (1 << 24) != 0,
            offset: (sign_extend(word & 0x00ff_ffff, 24) << 2) as i32,
        },
        0b110 => Op::Cop { raw: word },
        _ => {
            if word & (1 << 24) != 0 {
                Op::Swi { comment: word & 0x00ff_ffff }
            } else {
                Op::Cop { raw: word }
            }
        }
    };

    Instr { cond, op }
}

fn decode_arm_misc(word: u32) -> Op {
    if word & 0x0fff_fff0 == 0x012f_ff10 {
        return Op::Bx { rm: (word & 0xf) as u8, link: false };
    }
    if word & 0x0fff_fff0 == 0x012f_ff30 {
        return Op::Bx { rm: (word & 0xf) as u8, link: true };
    }
    if word & 0x0fff_0ff0 == 0x016f_0f10 {
        return Op::Clz { rd: ((word >> 12) & 0xf) as u8, rm: (word & 0xf) as u8 };
    }
    if word & 0x0fb0_0ff0 == 0x0100_0090 {
        return Op::Swp {
            byte: word & (1 << 22) != 0,
            rd: ((word >> 12) & 0xf) as u8,
            rn: ((word >> 16) & 0xf) as u8,
            rm: (word & 0xf) as u8,
        };
    }
    if word & 0x0fc0_00f0 == 0x0000_0090 {
        return Op::Mul {
            acc: word & (1 << 21) != 0,
            s: word & (1 << 20) != 0,
            rd: ((word >> 16) & 0xf) as u8,
            rn: ((word >> 12) & 0xf) as u8,
            rs: ((word >> 8) & 0xf) as u8,
            rm: (word & 0xf) as u8,
        };
    }
    if word & 0x0f80_00f0 == 0x0080_0090 {
        return Op::MulLong {
            signed: word & (1 << 22) != 0,
            acc: word & (1 << 21) != 0,
            s: word & (1 << 20) != 0,
            rdhi: ((word >> 16) & 0xf) as u8,
            rdlo: ((word >> 12) & 0xf) as u8,
            rs: ((word >> 8) & 0xf) as u8,
            rm: (word & 0xf) as u8,
        };
    }
    if word & 0x90 == 0x90 {
        // bit7 and bit4 set outside the multiply space: extra load/stores
        return decode_extra_loadstore(word);
    }
    if word & 0x0fbf_0fff == 0x010f_0000 {
        return Op::Mrs { rd: ((word >> 12) & 0xf) as u8, spsr: word & (1 << 22) != 0 };
    }
    if word & 0x0fb0_fff0 == 0x0120_f000 {
        return Op::MsrReg {
            rm: (word & 0xf) as u8,
            spsr: word & (1 << 22) != 0,
            mask: ((word >> 16) & 0xf) as u8,
        };
    }

    let dp = DpType::of(word);
    let opcode = AluOp::from_bits(dp.opcode() as u32);
    if opcode.test_only() && !dp.s() {
        return Op::Undefined { raw: word };
    }
    Op::Dp {
        op: opcode,
        s: dp.s(),
        rd: dp.rd(),
        rn: dp.rn(),
        src: decode_operand2(word, false),
    }
}

/// Decodes one 16-bit Thumb instruction into the shared `Op` space.
pub fn decode_thumb(half: u16) -> Instr {
    let w = half as u32;
    let rd = |shift: u32| ((w >> shift) & 0x7) as u8;

    match w >> 13 {
        0b000 => {
            if (w >> 11) & 0x3 == 0b11 {
                // add/sub register or 3-bit immediate
                let op = if w & (1 << 9) != 0 { AluOp::Sub } else { AluOp::Add };
                let src = if w & (1 << 10) != 0 {
                    Operand2::Imm { value: (w >> 6) & 0x7, rot: 0 }
                } else {
                    Operand2::ShiftImm { rm: rd(6), kind: ShiftKind::Lsl, amount: 0 }
                };
                Instr::al(Op::Dp { op, s: true, rd: rd(0), rn: rd(3), src })
            } else {
                let kind = ShiftKind::from_bits(w >> 11);
                Instr::al(Op::Dp {
                    op: AluOp::Mov,
                    s: true,
                    rd: rd(0),
                    rn: 0,
                    src: Operand2::ShiftImm { rm: rd(3), kind, amount: ((w >> 6) & 0x1f) as u8 },
                })
            }
        }
        0b001 => {
            let rdn = rd(8);
            let imm = Operand2::Imm { value: w & 0xff, rot: 0 };
            let op = match (w >> 11) & 0x3 {
                0 => AluOp::Mov,
                1 => AluOp::Cmp,
                2 => AluOp::Add,
                _ => AluOp::Sub,
            };
            Instr::al(Op::Dp { op, s: true, rd: rdn, rn: rdn, src: imm })
        }
        0b010 => decode_thumb_group2(w),
        0b011 => {
            // load/store word/byte with 5-bit immediate
            let byte = w & (1 << 12) != 0;
            let scale = if byte { 0 } else { 2 };
            Instr::al(Op::Mem {
                load: w & (1 << 11) != 0,
                byte,
                rd: rd(0),
                rn: rd(3),
                offset: MemOffset::Imm((((w >> 6) & 0x1f) << scale) as u16),
                pre: true,
                up: true,
                writeback: false,
            })
        }
        0b100 => {
            if w & (1 << 12) == 0 {
                // halfword with 5-bit immediate
                Instr::al(Op::MemH {
                    kind: HKind::Half,
                    load: w & (1 << 11) != 0,
                    rd: rd(0),
                    rn: rd(3),
                    offset: HOffset::Imm((((w >> 6) & 0x1f) << 1) as u8),
                    pre: true,
                    up: true,
                    writeback: false,
                })
            } else {
                // sp-relative word
                Instr::al(Op::Mem {
                    load: w & (1 << 11) != 0,
                    byte: false,
                    rd: rd(8),
                    rn: 13,
                    offset: MemOffset::Imm(((w & 0xff) << 2) as u16),
                    pre: true,
                    up: true,
                    writeback: false,
                })
            }
        }
        0b101 => {
            if w & (1 << 12) == 0 {
                // add rd, pc/sp, #imm
                let rn = if w & (1 << 11) != 0 { 13 } else { 15 };
                Instr::al(Op::Dp {
                    op: AluOp::Add,
                    s: false,
                    rd: rd(8),
                    rn,
                    src: Operand2::Imm { value: (w & 0xff) << 2, rot: 0 },
                })
            } else {
                decode_thumb_misc(w)
            }
        }
        0b110 => {
            if w & (1 << 12) == 0 {
                // ldm/stm (always increment-after, writeback)
                Instr::al(Op::Block {
                    load: w & (1 << 11) != 0,
                    rn: rd(8),
                    regs: (w & 0xff) as u16,
                    pre: false,
                    up: true,
                    writeback: true,
                    sbit: false,
                })
            } else {
                let cond_bits = (w >> 8) & 0xf;
                match cond_bits {
                    0xf => Instr::al(Op::Swi { comment: w & 0xff }),
                    0xe => Instr::al(Op::Undefined { raw: w }),
                    _ => Instr {
                        cond: Cond::from_bits(cond_bits),
                        op: Op::Branch { link: false, offset: (sign_extend(w & 0xff, 8) << 1) as i32 },
                    },
                }
            }
        }
        _ => match (w >> 11) & 0x3 {
            0b00 => Instr::al(Op::Branch {
                link: false,
                offset: (sign_extend(w & 0x7ff, 11) << 1) as i32,
            }),
            0b10 => Instr::al(Op::BlPrefix {
                offset: (sign_extend(w & 0x7ff, 11) << 12) as i32,
            }),
            0b11 => Instr::al(Op::BlSuffix { offset: (w & 0x7ff) << 1, exchange: false }),
            _ => {
                if w & 1 == 0 {
                    Instr::al(Op::BlSuffix { offset: (w & 0x7ff) << 1, exchange: true })
                } else {
                    Instr::al(Op::Undefined { raw: w })
                }
            }
        },
    }
}

fn decode_thumb_group2(w: u32) -> Instr {
    let rd = |shift: u32| ((w >> shift) & 0x7) as u8;

    if w & (1 << 12) == 0 {
        if w & (1 << 11) == 0 {
            if w & (1 << 10) == 0 {
                // register alu ops
                let rdn = rd(0);
                let rm = rd(3);
                let reg = Operand2::ShiftImm { rm, kind: ShiftKind::Lsl, amount: 0 };
                let shift_by = |kind| Operand2::ShiftReg { rm: rdn, kind, rs: rm };
                let op = match (w >> 6) & 0xf {
                    0x0 => Op::Dp { op: AluOp::And, s: true, rd: rdn, rn: rdn, src: reg },
                    0x1 => Op::Dp { op: AluOp::Eor, s: true, rd: rdn, rn: rdn, src: reg },
                    0x2 => Op::Dp { op: AluOp::Mov, s: true, rd: rdn, rn: 0, src: shift_by(ShiftKind::Lsl) },
                    0x3 => Op::Dp { op: AluOp::Mov, s: true, rd: rdn, rn: 0, src: shift_by(ShiftKind::Lsr) },
                    0x4 => Op::Dp { op: AluOp::Mov, s: true, rd: rdn, rn: 0, src: shift_by(ShiftKind::Asr) },
                    0x5 => Op::Dp { op: AluOp::Adc, s: true, rd: rdn, rn: rdn, src: reg },
                    0x6 => Op::Dp { op: AluOp::Sbc, s: true, rd: rdn, rn: rdn, src: reg },
                    0x7 => Op::Dp { op: AluOp::Mov, s: true, rd: rdn, rn: 0, src: shift_by(ShiftKind::Ror) },
                    0x8 => Op::Dp { op: AluOp::Tst, s: true, rd: 0, rn: rdn, src: reg },
                    0x9 => Op::Dp { op: AluOp::Rsb, s: true, rd: rdn, rn: rm, src: Operand2::Imm { value: 0, rot: 0 } },
                    0xa => Op::Dp { op: AluOp::Cmp, s: true, rd: 0, rn: rdn, src: reg },
                    0xb => Op::Dp { op: AluOp::Cmn, s: true, rd: 0, rn: rdn, src: reg },
                    0xc => Op::Dp { op: AluOp::Orr, s: true, rd: rdn, rn: rdn, src: reg },
                    0xd => Op::Mul { acc: false, s: true, rd: rdn, rn: 0, rs: rdn, rm },
                    0xe => Op::Dp { op: AluOp::Bic, s: true, rd: rdn, rn: rdn, src: reg },
                    _ => Op::Dp { op: AluOp::Mvn, s: true, rd: rdn, rn: 0, src: reg },
                };
                Instr::al(op)
            } else {
                // hi-register ops and bx/blx
                let rm = ((w >> 3) & 0xf) as u8;
                let rdn = (rd(0) | (((w >> 7) & 1) as u8) << 3) as u8;
                let reg = Operand2::ShiftImm { rm, kind: ShiftKind::Lsl, amount: 0 };
                let op = match (w >> 8) & 0x3 {
                    0 => Op::Dp { op: AluOp::Add, s: false, rd: rdn, rn: rdn, src: reg },
                    1 => Op::Dp { op: AluOp::Cmp, s: true, rd: 0, rn: rdn, src: reg },
                    2 => Op::Dp { op: AluOp::Mov, s: false, rd: rdn, rn: 0, src: reg },
                    _ => Op::Bx { rm, link: w & (1 << 7) != 0 },
                };
                Instr::al(op)
            }
        } else {
            // pc-relative load
            Instr::al(Op::Mem {
                load: true,
                byte: false,
                rd: rd(8),
                rn: 15,
                offset: MemOffset::Imm(((w & 0xff) << 2) as u16),
                pre: true,
                up: true,
                writeback: false,
            })
        }
    } else {
        // register-offset load/store
        let offset_reg = rd(6);
        if w & (1 << 9) == 0 {
            Instr::al(Op::Mem {
                load: w & (1 << 11) != 0,
                byte: w & (1 << 10) != 0,
                rd: rd(0),
                rn: rd(3),
                offset: MemOffset::Reg { rm: offset_reg, kind: ShiftKind::Lsl, amount: 0 },
                pre: true,
                up: true,
                writeback: false,
            })
        } else {
            let kind = match (w >> 10) & 0x3 {
                0b00 => HKind::Half,        // strh
                0b01 => HKind::SignedByte,  // ldrsb
                0b10 => HKind::Half,        // ldrh
                _ => HKind::SignedHalf,     // ldrsh
            };
            let load = (w >> 10) & 0x3 != 0b00;
            Instr::al(Op::MemH {
                kind,
                load,
                rd: rd(0),
                rn: rd(3),
                offset: HOffset::Reg(offset_reg),
                pre: true,
                up: true,
                writeback: false,
            })
        }
    }
}

fn decode_thumb_misc(w: u32) -> Instr {
    if w & 0x0f00 == 0x0000 {
        // add/sub sp, #imm
        let op = if w & (1 << 7) != 0 { AluOp::Sub } else { AluOp::Add };
        return Instr::al(Op::Dp {
            op,
            s: false,
            rd: 13,
            rn: 13,
            src: Operand2::Imm { value: (w & 0x7f) << 2, rot: 0 },
        });
    }
    if w & 0x0600 == 0x0400 {
        // push/pop
        let load = w & (1 << 11) != 0;
        let mut regs = (w & 0xff) as u16;
        if w & (1 << 8) != 0 {
            regs |= if load { 1 << 15 } else { 1 << 14 };
        }
        return Instr::al(Op::Block {
            load,
            rn: 13,
            regs,
            pre: !load,
            up: load,
            writeback: true,
            sbit: false,
        });
    }
    Instr::al(Op::Undefined { raw: w })
}

/// Recompiler-facing classification. The interpreter executes everything;
/// the driver only needs to know where a block must stop and what it cannot
/// translate at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Attr {
    Translatable,
    Terminator,
    Untranslatable,
}

pub fn attribute(instr: &Instr) -> Attr {
    match instr.op {
        Op::Branch { .. } | Op::Bx { .. } | Op::BlSuffix { .. } | Op::Swi { .. } => Attr::Terminator,
        Op::Dp { rd, op, .. } if rd == 15 && !op.test_only() => Attr::Terminator,
        Op::Mem { load: true, rd: 15, .. } => Attr::Terminator,
        Op::MemH { load: true, rd: 15, .. } => Attr::Terminator,
        Op::Block { load: true, regs, .. } if regs & (1 << 15) != 0 => Attr::Terminator,
        Op::MsrReg { .. } | Op::MsrImm { .. } | Op::Swp { .. } | Op::Cop { .. } => {
            Attr::Untranslatable
        }
        Op::Undefined { .. } => Attr::Untranslatable,
        _ => Attr::Translatable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_processing() {
        // add r1, r2, #0x10
        let instr = decode_arm(0xe282_1010);
        match instr.op {
            Op::Dp { op: AluOp::Add, s: false, rd: 1, rn: 2, src: Operand2::Imm { value: 0x10, .. } } => {}
            other => panic!("bad decode: {:?}", other),
        }
        assert_eq!(attribute(&instr), Attr::Translatable);
    }

    #[test]
    fn decodes_branches_as_terminators() {
        // b +8 (offset field 0 means pc+8)
        let instr = decode_arm(0xea00_0000);
        match instr.op {
            Op::Branch { link: false, offset: 0 } => {}
            other => panic!("bad decode: {:?}", other),
        }
        assert_eq!(attribute(&instr), Attr::Terminator);

        // bx lr
        let instr = decode_arm(0xe12f_ff1e);
        assert!(matches!(instr.op, Op::Bx { rm: 14, link: false }));
        assert_eq!(attribute(&instr), Attr::Terminator);
    }

    #[test]
    fn decodes_loads_and_stores() {
        // str r3, [r2, #4]
        let instr = decode_arm(0xe582_3004);
        match instr.op {
            Op::Mem { load: false, byte: false, rd: 3, rn: 2, offset: MemOffset::Imm(4), pre: true, up: true, writeback: false } => {}
            other => panic!("bad decode: {:?}", other),
        }

        // ldrh r1, [r0, #6]
        let instr = decode_arm(0xe1d0_10b6);
        match instr.op {
            Op::MemH { kind: HKind::Half, load: true, rd: 1, rn: 0, offset: HOffset::Imm(6), .. } => {}
            other => panic!("bad decode: {:?}", other),
        }
    }

    #[test]
    fn msr_is_untranslatable_but_decodable() {
        // msr cpsr_f, r0
        let instr = decode_arm(0xe128_f000);
        assert!(matches!(instr.op, Op::MsrReg { rm: 0, spsr: false, mask: 0x8 }));
        assert_eq!(attribute(&instr), Attr::Untranslatable);
    }

    #[test]
    fn pc_writes_terminate_blocks() {
        // mov pc, lr
        let instr = decode_arm(0xe1a0_f00e);
        assert_eq!(attribute(&instr), Attr::Terminator);
        // pop {r4, pc} equivalent: ldmia sp!, {r4, pc}
        let instr = decode_arm(0xe8bd_8010);
        assert_eq!(attribute(&instr), Attr::Terminator);
    }

    #[test]
    fn thumb_basics() {
        // movs r0, #5
        let instr = decode_thumb(0x2005);
        match instr.op {
            Op::Dp { op: AluOp::Mov, s: true, rd: 0, src: Operand2::Imm { value: 5, .. }, .. } => {}
            other => panic!("bad decode: {:?}", other),
        }

        // push {r4, lr}
        let instr = decode_thumb(0xb510);
        match instr.op {
            Op::Block { load: false, rn: 13, regs, pre: true, up: false, writeback: true, .. } => {
                assert_eq!(regs, (1 << 4) | (1 << 14));
            }
            other => panic!("bad decode: {:?}", other),
        }

        // pop {r4, pc}
        let instr = decode_thumb(0xbd10);
        assert_eq!(attribute(&instr), Attr::Terminator);

        // beq +4
        let instr = decode_thumb(0xd002);
        assert_eq!(instr.cond, Cond::Eq);
        assert!(matches!(instr.op, Op::Branch { link: false, offset: 4 }));
    }

    #[test]
    fn thumb_bl_pair() {
        let hi = decode_thumb(0xf000);
        assert!(matches!(hi.op, Op::BlPrefix { offset: 0 }));
        assert_eq!(attribute(&hi), Attr::Translatable);

        let lo = decode_thumb(0xf801);
        assert!(matches!(lo.op, Op::BlSuffix { offset: 2, exchange: false }));
        assert_eq!(attribute(&lo), Attr::Terminator);
    }

    #[test]
    fn every_word_decodes() {
        // sample the space; nothing may panic, everything classifies
        for i in 0..0x1000u32 {
            let word = i
                .wrapping_mul(0x01010101)
                .wrapping_add(0xe000_0000 ^ i.rotate_left(13));
            let instr = decode_arm(word);
            let _ = attribute(&instr);
            let half = (i as u16).wrapping_mul(0x2f1d);
            let instr = decode_thumb(half);
            let _ = attribute(&instr);
        }
    }
}
