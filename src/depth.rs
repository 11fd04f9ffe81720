// SPDX-License-Identifier: MIT

//! Depth labelling (C2, §4.2) and barrier/dead-code pruning (C3, §4.3).
//!
//! These two passes are interleaved: depth is a post-order walk from each
//! block's roots that both computes a weighted longest-path depth and
//! clears the `unused` flag on everything it reaches. Pruning a dead
//! meta-SPLIT chain can expose more dead code further down (a shrunk
//! texture write-mask), so the whole thing runs to a fixed point.

use crate::deps::delay;
use crate::ir::{InstrId, MetaOp, OpClass, Program, ShaderVariant};

/// Runs `add_deps`, then depth labelling and dead-code pruning to a fixed
/// point, populating each block's `pending` list in depth order.
pub fn compute_depth(
    program: &mut Program,
    variant: ShaderVariant,
) -> crate::error::Result<()> {
    log::debug!(
        "compute_depth: {} blocks, {} instrs",
        program.num_blocks(),
        program.num_instrs()
    );

    crate::deps::add_deps(program);

    let mut iterations = 0usize;
    let iteration_cap = program.num_instrs() + 1;
    let mut dead_count = 0usize;

    loop {
        iterations += 1;
        debug_assert!(
            iterations <= iteration_cap,
            "depth/prune fixed point failed to converge"
        );

        for id in program.instr_ids() {
            program[id].unused = true;
            program[id].visited = false;
            program[id].depth = 0;
        }

        let mut new_live_overall = false;
        for block_id in program.block_ids() {
            program[block_id].pending.clear();

            let mut roots: Vec<InstrId> = program.outputs.clone();
            roots.extend(program[block_id].keep.iter().copied());
            let condition = program[block_id].condition;
            if let Some(cond) = condition {
                roots.push(cond);
            }

            for root in roots {
                new_live_overall |= walk(program, root, false);
            }

            if let Some(cond) = condition {
                // Reserve delay slots for the branch.
                program[cond].depth += 6;
            }

            // Descending by depth, stable within equal depth (visit order
            // from the post-order walk above).
            let mut pending = std::mem::take(&mut program[block_id].pending);
            pending.sort_by(|&a, &b| program[b].depth.cmp(&program[a].depth));
            program[block_id].pending = pending;
        }

        let _ = new_live_overall;
        let new_dead_count = prune_dead(program, variant);

        // Already-pruned instructions stay unreachable and get rediscovered
        // every iteration, so convergence means the *count* of dead code
        // stopped growing, not that none was found this pass.
        if new_dead_count == dead_count {
            break;
        }
        dead_count = new_dead_count;
    }

    compute_use_counts(program);

    log::debug!("compute_depth: converged after {iterations} iterations");
    Ok(())
}

/// Populate each instruction's `use_count` from the final, pruned pending
/// lists: the number of live, same-block consumers that reference it as
/// an effective source. The scheduler's commit step decrements this as
/// consumers are issued, so it must match `effective_sources` exactly.
fn compute_use_counts(program: &mut Program) {
    for id in program.instr_ids() {
        program[id].use_count = 0;
    }
    for block_id in program.block_ids() {
        let ids = program[block_id].pending.clone();
        for id in ids {
            for src in program.effective_true_sources(id) {
                if program[src].block == block_id {
                    program[src].use_count += 1;
                }
            }
        }
    }
}

/// Post-order walk from `id`, computing depth and clearing `unused`.
/// Returns whether any instruction's `unused` flag was newly cleared.
fn walk(program: &mut Program, id: InstrId, via_false_dep: bool) -> bool {
    if program[id].visited {
        return false;
    }
    program[id].visited = true;

    let mut new_live = false;
    if !via_false_dep && program[id].unused {
        program[id].unused = false;
        new_live = true;
    }

    let srcs = program[id].srcs.clone();
    let mut depth: i64 = 0;
    for (idx, op) in srcs.iter().enumerate() {
        new_live |= walk(program, op.producer, op.false_dep);

        if idx == 0 && program[id].array_id.is_some() {
            // A write does not delay on its own prior array version.
            continue;
        }

        let d = delay(&program[op.producer], &program[id], op, idx, false);
        let candidate = program[op.producer].depth + i64::from(d);
        depth = depth.max(candidate);
    }
    if !program[id].op_class.is_meta() {
        depth += 1;
    }
    program[id].depth = depth;

    let owner = program[id].block;
    program[owner].pending.push(id);

    new_live
}

/// Remove every instruction still marked `unused` after the walk, with
/// the barycentric-input exception for fragment shaders (§4.3).
/// Returns the total number of dead (pruned) instructions found, so the
/// caller can detect when the dead set stops growing.
fn prune_dead(program: &mut Program, variant: ShaderVariant) -> usize {
    let mut dead_count = 0usize;

    for block_id in program.block_ids() {
        let ids: Vec<_> = program[block_id]
            .pending
            .iter()
            .copied()
            .chain(program[block_id].source_order.iter().copied())
            .collect();
        let mut seen = rustc_hash::FxHashSet::default();

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if !program[id].unused {
                continue;
            }
            if is_protected(program, variant, id) {
                program[id].unused = false;
                continue;
            }
            dead_count += 1;
        }
    }

    for block_id in program.block_ids() {
        let mut pending = std::mem::take(&mut program[block_id].pending);
        pending.retain(|&id| !program[id].unused);
        program[block_id].pending = pending;
        shrink_split_chains(program, block_id);
    }

    dead_count
}

fn is_protected(
    program: &Program,
    variant: ShaderVariant,
    id: InstrId,
) -> bool {
    if program[id].op_class.is_flow() {
        return true;
    }
    if program[id].is_barycentric_input && variant == ShaderVariant::Fragment
    {
        // Reachable only from a pre-FS prefetch: keep live per §4.3.
        return program[id]
            .srcs
            .iter()
            .any(|op| matches!(program[op.producer].op_class, OpClass::Meta(MetaOp::TexPrefetch)));
    }
    false
}

/// When a dead SPLIT consumed a texture fetch that supports a per-channel
/// write mask, clear that channel's mask bit on the fetch. A fetch whose
/// mask has gone fully to zero is itself dead-code-eligible, and any
/// right-neighbour SPLIT on a now-cleared channel is already caught by its
/// own `unused` check; clearing the bit here is what lets the *next*
/// fixed-point iteration see the fetch's shrunk mask and prune it in turn.
fn shrink_split_chains(program: &mut Program, block_id: crate::ir::BlockId) {
    let ids = program[block_id].source_order.clone();
    for id in ids {
        if !matches!(program[id].op_class, OpClass::Meta(MetaOp::Split)) {
            continue;
        }
        if !program[id].unused {
            continue;
        }
        let Some(channel) = program[id].split_channel else {
            continue;
        };
        let Some(op) = program[id].srcs.first() else {
            continue;
        };
        let producer = op.producer;
        if !matches!(program[producer].op_class, OpClass::Tex) {
            continue;
        }
        if let Some(mask) = program[producer].write_mask {
            program[producer].write_mask = Some(mask & !(1 << channel));
        }
    }
}
