use std::fmt;
use std::sync::Arc;

use armcore::instructions::Instr;
use armcore::{interp, Bus, Core};

use crate::bus::ProcId;
use crate::jit::{BlockExit, CompiledCode, ExecHandle};

/// One translated guest instruction, tagged with its address so a block can
/// be entered mid-run and divergence detected after each op.
#[derive(Copy, Clone)]
pub struct MicroOp {
    pub pc: u32,
    pub instr: Instr,
}

/// A block's worth of micro-ops handed to a backend.
pub struct BlockIr {
    pub proc: ProcId,
    pub thumb: bool,
    pub start: u32,
    pub len: u32,
    pub ops: Vec<MicroOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// The backend's code buffer is full. Recoverable: the driver degrades
    /// the range to non-compilable and execution continues interpreted.
    OutOfSpace,
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EmitError::OutOfSpace => write!(f, "code buffer exhausted"),
        }
    }
}

impl std::error::Error for EmitError {}

/// Code-generation backend contract.
///
/// The driver is agnostic to how a backend represents host code; it hands
/// over a micro-op sequence and gets back a callable handle or a failure.
pub trait CodeEmitter {
    fn emit(&mut self, ir: &BlockIr) -> Result<ExecHandle, EmitError>;

    /// Discards all emitted code. Only sound when the cache holding the
    /// handles is cleared in the same breath.
    fn reset(&mut self) {}
}

/// Portable threaded-code backend.
///
/// Each block becomes a pre-decoded op list replayed through the interpreter
/// core, so the whole compile/install/dispatch pipeline runs on any host. The
/// op budget stands in for a real backend's finite code buffer.
pub struct ThreadedBackend {
    used_ops: usize,
    capacity_ops: usize,
}

pub const DEFAULT_CAPACITY_OPS: usize = 1 << 20;

impl ThreadedBackend {
    pub fn new(capacity_ops: usize) -> ThreadedBackend {
        ThreadedBackend { used_ops: 0, capacity_ops }
    }

    pub fn used_ops(&self) -> usize {
        self.used_ops
    }
}

impl Default for ThreadedBackend {
    fn default() -> ThreadedBackend {
        ThreadedBackend::new(DEFAULT_CAPACITY_OPS)
    }
}

impl CodeEmitter for ThreadedBackend {
    fn emit(&mut self, ir: &BlockIr) -> Result<ExecHandle, EmitError> {
        if self.used_ops + ir.ops.len() > self.capacity_ops {
            return Err(EmitError::OutOfSpace);
        }
        self.used_ops += ir.ops.len();
        Ok(Arc::new(ThreadedBlock {
            start: ir.start,
            thumb: ir.thumb,
            ops: ir.ops.clone().into_boxed_slice(),
        }))
    }

    fn reset(&mut self) {
        self.used_ops = 0;
    }
}

struct ThreadedBlock {
    start: u32,
    thumb: bool,
    ops: Box<[MicroOp]>,
}

impl CompiledCode for ThreadedBlock {
    fn run(&self, core: &mut Core, bus: &mut dyn Bus) -> BlockExit {
        let width = if self.thumb { 2u32 } else { 4u32 };
        let entry = core.pc();
        let index = (entry.wrapping_sub(self.start) / width) as usize;

        let mut cycles = 0;
        for op in self.ops.iter().skip(index) {
            let next = op.pc.wrapping_add(width);
            core.regs.write(15, next);
            cycles += interp::execute(core, bus, op.instr);
            // A taken branch, exception or mode switch ends the replay
            if core.pc() != next || core.thumb() != self.thumb {
                break;
            }
        }
        BlockExit { cycles, next_pc: core.pc() }
    }
}
