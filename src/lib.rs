// SPDX-License-Identifier: MIT

//! Post-register-allocation-independent instruction scheduler for a GPU
//! shader compiler's low-level IR.
//!
//! Given a control-flow graph of basic blocks whose instructions have
//! been lowered to a target opcode set but not yet placed in issue order,
//! this crate produces a per-block legal ordering that respects data and
//! barrier dependencies, covers hardware latency with inserted NOPs,
//! serialises the address and predicate registers by cloning their
//! producers when needed, and emits terminators.
//!
//! The three entry points mirror the compiler's own pass pipeline:
//! [`depth::compute_depth`] (which also runs [`deps::add_deps`]) and then
//! [`sched::schedule`].

pub mod builder;
pub mod debug;
pub mod deps;
pub mod depth;
pub mod display;
pub mod error;
pub mod fixup;
pub mod ir;
pub mod sched;

pub use error::{DeadlockReason, ScheduleError};
pub use ir::{Program, ShaderVariant};

/// Runs the full pipeline: dependency/depth/pruning, then scheduling.
pub fn run(program: &mut ir::Program, variant: ShaderVariant) -> error::Result<()> {
    depth::compute_depth(program, variant)?;
    sched::schedule(program)
}
