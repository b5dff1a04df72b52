//! Dynamic recompilation: the code cache, the block-building driver and the
//! reference code-generation backend.
//!
//! Cache state lives per region-backing halfword, so a block compiled from
//! one processor's view of shared storage is found and invalidated through
//! the other processor's view as well.

use std::sync::Arc;

use armcore::{Bus, Core};

use crate::bus::ProcId;

pub mod backend;
pub mod cache;
pub mod driver;

/// What a compiled block reports when it returns control.
#[derive(Debug, Clone, Copy)]
pub struct BlockExit {
    pub cycles: u64,
    pub next_pc: u32,
}

/// Host-executable translation of a guest instruction run. The dispatcher
/// enters at the core's current pc, which may be inside the block.
pub trait CompiledCode {
    fn run(&self, core: &mut Core, bus: &mut dyn Bus) -> BlockExit;
}

/// Opaque handle returned by a code-generation backend.
pub type ExecHandle = Arc<dyn CompiledCode + Send + Sync>;

/// A compiled block plus the metadata the cache and dispatcher need: the
/// guest range it covers and the processor/width it was translated for.
pub struct CompiledBlock {
    pub start: u32,
    pub len: u32,
    pub proc: ProcId,
    pub thumb: bool,
    pub code: ExecHandle,
}
