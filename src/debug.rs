// SPDX-License-Identifier: MIT

//! Debug flags, parsed once from the `SHADER_SCHED_DEBUG` environment
//! variable as a comma-separated list of flag names.

use std::sync::OnceLock;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Only ever run the conservative (soft = false) ranking pass.
        const FORCE_HARD_RANK = 1 << 0;
        /// Disable special-register cloning, so a conflict deadlocks
        /// instead of being broken. Useful for exercising the deadlock
        /// path in tests.
        const NO_CLONE        = 1 << 1;
        /// Trace every scheduling decision at `log::trace!` level.
        const VERBOSE         = 1 << 2;
    }
}

impl DebugFlags {
    fn from_env() -> Self {
        let mut flags = DebugFlags::empty();
        let Ok(var) = std::env::var("SHADER_SCHED_DEBUG") else {
            return flags;
        };
        for name in var.split(',') {
            match name.trim() {
                "force_hard_rank" => flags |= DebugFlags::FORCE_HARD_RANK,
                "no_clone" => flags |= DebugFlags::NO_CLONE,
                "verbose" => flags |= DebugFlags::VERBOSE,
                "" => (),
                other => {
                    log::warn!("unknown SHADER_SCHED_DEBUG flag: {other}")
                }
            }
        }
        flags
    }
}

static DEBUG_FLAGS: OnceLock<DebugFlags> = OnceLock::new();

pub trait GetDebugFlags {
    fn force_hard_rank(&self) -> bool;
    fn no_clone(&self) -> bool;
    fn verbose(&self) -> bool;
}

pub struct Debug;

impl GetDebugFlags for Debug {
    fn force_hard_rank(&self) -> bool {
        flags().contains(DebugFlags::FORCE_HARD_RANK)
    }

    fn no_clone(&self) -> bool {
        flags().contains(DebugFlags::NO_CLONE)
    }

    fn verbose(&self) -> bool {
        flags().contains(DebugFlags::VERBOSE)
    }
}

pub static DEBUG: Debug = Debug;

fn flags() -> DebugFlags {
    *DEBUG_FLAGS.get_or_init(DebugFlags::from_env)
}
