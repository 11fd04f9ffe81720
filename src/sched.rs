// SPDX-License-Identifier: MIT

//! The ready-list scheduler (C4, §4.4) — the heart of the system.
//!
//! A depth-priority, recursive, cached selector picks one instruction at a
//! time from the block's depth-sorted pending list, padding NOPs to cover
//! its delay and breaking special-register conflicts by cloning the
//! in-scope producer (rematerialisation, not a memory spill).

use crate::debug::{GetDebugFlags, DEBUG};
use crate::error::{DeadlockReason, ScheduleError};
use crate::ir::{BlockId, InstrId, MetaOp, OpClass, Program};

const MAX_DELAY: u32 = 6;

/// Per-block scheduling context: which special-register producer (if any)
/// is currently in scope, and a running estimate of live register count.
struct BlockSched {
    addr_producer: Option<InstrId>,
    pred_producer: Option<InstrId>,
    live_values: i64,
}

impl BlockSched {
    fn new() -> Self {
        BlockSched {
            addr_producer: None,
            pred_producer: None,
            live_values: 0,
        }
    }
}

/// What blocked a selection attempt, so the caller knows whether to clone
/// a special-register producer or declare a deadlock.
#[derive(Default, Clone, Copy)]
struct Blockers {
    addr_conflict: bool,
    pred_conflict: bool,
    /// Set when a `kill` was rejected because a live barycentric input in
    /// the same block is still unscheduled (§4.3's pruning exception keeps
    /// it live, but nothing ever makes it eligible on its own).
    kill_blocked_on_barycentric: bool,
}

pub fn schedule(program: &mut Program) -> crate::error::Result<()> {
    log::debug!("schedule: {} blocks", program.num_blocks());
    let block_ids: Vec<_> = program.block_ids().collect();
    for block_id in block_ids {
        schedule_block(program, block_id)?;
    }
    crate::fixup::fixup_inter_block(program);
    Ok(())
}

fn schedule_block(
    program: &mut Program,
    block_id: BlockId,
) -> crate::error::Result<()> {
    let mut state = BlockSched::new();

    // Initial ordering: all META_INPUT, then all TEX_PREFETCH, committed
    // unconditionally before list scheduling begins (§4.4).
    for meta in [MetaOp::Input, MetaOp::TexPrefetch] {
        let ids: Vec<InstrId> = program[block_id]
            .pending
            .iter()
            .copied()
            .filter(|&id| {
                matches!(program[id].op_class, OpClass::Meta(m) if m == meta)
            })
            .collect();
        for id in ids {
            program[block_id].pending.retain(|&p| p != id);
            commit(program, block_id, &mut state, id);
        }
    }

    while !program[block_id].pending.is_empty() {
        let mut candidate = if DEBUG.force_hard_rank() {
            select(program, block_id, &mut state, false)
        } else {
            select(program, block_id, &mut state, true)
        };
        if candidate.0.is_none() && !DEBUG.force_hard_rank() {
            candidate = select(program, block_id, &mut state, false);
        }

        match candidate.0 {
            Some(id) => {
                let d = delay_to_tail(program, block_id, id, false);
                debug_assert!(d <= MAX_DELAY);
                for _ in 0..d {
                    emit_nop(program, block_id);
                }
                if d == 0 && is_sfu_or_mem_follow(program, block_id, id) {
                    emit_nop(program, block_id);
                }
                program[block_id].pending.retain(|&p| p != id);
                commit(program, block_id, &mut state, id);
            }
            None => {
                let blockers = candidate.1;
                if blockers.addr_conflict && !DEBUG.no_clone() {
                    clone_special_producer(
                        program,
                        block_id,
                        &mut state,
                        Special::Addr,
                    );
                } else if blockers.pred_conflict && !DEBUG.no_clone() {
                    clone_special_producer(
                        program,
                        block_id,
                        &mut state,
                        Special::Pred,
                    );
                } else if blockers.kill_blocked_on_barycentric {
                    return Err(ScheduleError::Deadlock {
                        block: block_id,
                        reason: DeadlockReason::UnreachableBarycentricInput,
                    });
                } else {
                    return Err(ScheduleError::Deadlock {
                        block: block_id,
                        reason: DeadlockReason::NoEligibleCandidate,
                    });
                }
            }
        }
    }

    emit_terminator(program, block_id, &state)?;
    Ok(())
}

/// Whether committing `next` right after the block's current tail would
/// put two SFU/mem issues back to back, which needs exactly one NOP
/// between them (§4.4).
fn is_sfu_or_mem_follow(
    program: &Program,
    block_id: BlockId,
    next: InstrId,
) -> bool {
    if !program[next].op_class.is_sfu_or_mem() {
        return false;
    }
    match program[block_id].instrs.last() {
        Some(&tail) => program[tail].op_class.is_sfu_or_mem(),
        None => false,
    }
}

fn emit_nop(program: &mut Program, block_id: BlockId) {
    let nop = program.add_instr(crate::ir::Instr::new(
        block_id,
        "nop",
        OpClass::Alu,
        0,
    ));
    program[nop].scheduled = true;
    program[block_id].instrs.push(nop);
}

/// Select the best eligible candidate from the pending list, returning
/// both the choice (if any) and which special-register conflicts blocked
/// rejected candidates (so the caller knows whether to clone or deadlock).
fn select(
    program: &mut Program,
    block_id: BlockId,
    state: &mut BlockSched,
    soft: bool,
) -> (Option<InstrId>, Blockers) {
    let mut blockers = Blockers::default();
    let mut candidates = Vec::new();

    let roots: Vec<InstrId> = program[block_id].pending.clone();
    for root in roots {
        if let Some(c) =
            find_recursive(program, block_id, state, root, &mut blockers)
        {
            if !candidates.contains(&c) {
                candidates.push(c);
            }
        }
    }

    if candidates.is_empty() {
        return (None, blockers);
    }

    let deepest_depth =
        candidates.iter().map(|&c| program[c].depth).max().unwrap();

    let mut best: Option<(RankKey, InstrId)> = None;
    for &c in &candidates {
        if program[c].op_class.is_meta() {
            return (Some(c), blockers);
        }
        let le = net_live_effect(program, block_id, c);
        let rank = delay_to_tail(program, block_id, c, soft);

        let pressure_rank = if state.live_values > 64 {
            le
        } else if state.live_values > 16 {
            i64::from(rank) + le
        } else {
            i64::from(rank)
        };

        let threshold = if state.live_values > 16 { 4 } else { 6 };
        if le >= 1 && deepest_depth - program[c].depth > threshold {
            continue;
        }

        let key = RankKey(pressure_rank);
        if best.is_none() || key < best.unwrap().0 {
            best = Some((key, c));
        }
    }

    (best.map(|(_, c)| c), blockers)
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey(i64);

/// Net change in live register count were `id` scheduled next: its own
/// width minus the width of every source whose use-count would hit zero.
/// Meta COLLECT/SPLIT sources are unwrapped, as in `commit`.
fn net_live_effect(program: &Program, block_id: BlockId, id: InstrId) -> i64 {
    let mut le = i64::from(program[id].dst_width);
    for src in program.effective_true_sources(id) {
        if program[src].block == block_id && program[src].use_count == 1 {
            le -= i64::from(program[src].dst_width);
        }
    }
    le
}

/// Recursive cached selection (§4.4.1).
fn find_recursive(
    program: &mut Program,
    block_id: BlockId,
    state: &mut BlockSched,
    id: InstrId,
    blockers: &mut Blockers,
) -> Option<InstrId> {
    if program[id].scheduled {
        return None;
    }
    // Only positive resolutions are cached. A cached "no candidate" would
    // need to remember *why* (which blocker flags to raise) to stay
    // correct once the special-register producer in scope changes, so a
    // negative result is always recomputed instead.
    if let Some(Some(cached)) = program[id].sched_cache {
        return Some(cached);
    }

    let srcs: Vec<InstrId> = program
        .effective_sources(id)
        .into_iter()
        .filter(|&s| program[s].block == block_id && !program[s].scheduled)
        .collect();

    let result = if srcs.is_empty() {
        if check(program, block_id, state, id, blockers) {
            Some(id)
        } else {
            None
        }
    } else {
        let mut remaining = srcs;
        let mut found = None;
        while !remaining.is_empty() {
            let (deepest_pos, _) = remaining
                .iter()
                .enumerate()
                .max_by_key(|(_, &s)| program[s].depth)
                .unwrap();
            let s = remaining.remove(deepest_pos);
            if let Some(c) =
                find_recursive(program, block_id, state, s, blockers)
            {
                if check(program, block_id, state, c, blockers) {
                    found = Some(c);
                    break;
                }
            }
        }
        found
    };

    if result.is_some() {
        program[id].sched_cache = Some(result);
    }
    result
}

/// Eligibility (§4.4.2).
fn check(
    program: &Program,
    block_id: BlockId,
    state: &BlockSched,
    id: InstrId,
    blockers: &mut Blockers,
) -> bool {
    if program[id].scheduled {
        return false;
    }

    if program[id].writes_addr {
        let consumer_ready = program.instr_ids().any(|c| {
            program[c].block == block_id
                && !program[c].scheduled
                && program[c].reads_addr
                && program.effective_sources(c).contains(&id)
                && program
                    .effective_sources(c)
                    .iter()
                    .filter(|&&s| s != id)
                    .all(|&s| program[s].scheduled || program[s].block != block_id)
        });
        if !consumer_ready {
            return false;
        }
        if state.addr_producer.is_some() {
            blockers.addr_conflict = true;
            return false;
        }
    }

    if program[id].writes_pred && state.pred_producer.is_some() {
        blockers.pred_conflict = true;
        return false;
    }

    if program[id].is_kill {
        let blocked = program.instr_ids().any(|b| {
            program[b].block == block_id
                && program[b].is_barycentric_input
                && !program[b].unused
                && !program[b].scheduled
        });
        if blocked {
            blockers.kill_blocked_on_barycentric = true;
            return false;
        }
    }

    true
}

enum Special {
    Addr,
    Pred,
}

/// Spill-by-clone: rematerialise the in-scope special-register producer
/// so unscheduled consumers can be retargeted, breaking the conflict
/// without touching memory (§4.4.3).
fn clone_special_producer(
    program: &mut Program,
    block_id: BlockId,
    state: &mut BlockSched,
    which: Special,
) {
    let producer = match which {
        Special::Addr => state.addr_producer,
        Special::Pred => state.pred_producer,
    }
    .expect("clone requested with no producer in scope");

    let mut clone = program[producer].clone();
    clone.scheduled = false;
    clone.sched_cache = None;
    clone.unused = false;
    let clone_id = program.add_instr(clone);

    if DEBUG.verbose() {
        log::trace!(
            "{block_id}: cloning {producer} ({} in scope) as {clone_id}",
            match which {
                Special::Addr => "addr",
                Special::Pred => "pred",
            }
        );
    }

    for id in program.instr_ids().collect::<Vec<_>>() {
        if program[id].scheduled || program[id].block != block_id {
            continue;
        }
        for op in program[id].srcs.iter_mut() {
            if op.producer == producer {
                op.producer = clone_id;
            }
        }
    }

    program[block_id].pending.push(clone_id);
    for src in program.effective_true_sources(clone_id) {
        if program[src].block == block_id {
            program[src].use_count += 1;
            if program[src].use_count == 1 {
                state.live_values += i64::from(program[src].dst_width);
            }
        }
    }

    // Wholesale cache invalidation: this producer touches everything
    // (§4.4 commit step invalidation rule for addr/pred writers).
    for id in program.instr_ids().collect::<Vec<_>>() {
        program[id].sched_cache = None;
    }

    match which {
        Special::Addr => state.addr_producer = None,
        Special::Pred => state.pred_producer = None,
    }
}

/// Commit `id`: append to the emitted order, update producer-in-scope and
/// live-value bookkeeping, and invalidate the selection cache.
fn commit(
    program: &mut Program,
    block_id: BlockId,
    state: &mut BlockSched,
    id: InstrId,
) {
    if DEBUG.verbose() {
        log::trace!("{block_id}: committing {id} ({})", program[id].name);
    }

    let writes_special = program[id].writes_addr || program[id].writes_pred;

    if program[id].writes_addr {
        state.addr_producer = Some(id);
    }
    if program[id].writes_pred {
        state.pred_producer = Some(id);
    }

    program[id].scheduled = true;
    program[block_id].instrs.push(id);
    state.live_values += i64::from(program[id].dst_width);

    for src in program.effective_true_sources(id) {
        if program[src].block != block_id {
            continue;
        }
        program[src].use_count -= 1;
        if program[src].use_count <= 0 {
            state.live_values -= i64::from(program[src].dst_width);
            // A special-register producer with no remaining unscheduled
            // consumer retires on its own; no conflict to clone away.
            if state.addr_producer == Some(src) {
                state.addr_producer = None;
            }
            if state.pred_producer == Some(src) {
                state.pred_producer = None;
            }
        }
    }

    let is_input = matches!(program[id].op_class, OpClass::Meta(MetaOp::Input));
    if writes_special || is_input {
        for p in program.instr_ids().collect::<Vec<_>>() {
            program[p].sched_cache = None;
        }
    } else {
        for p in program.instr_ids().collect::<Vec<_>>() {
            if program[p].sched_cache == Some(Some(id)) {
                program[p].sched_cache = None;
            }
        }
    }
}

/// The candidate's minimum delay against the current block tail
/// (`delay_calc`, §4.4.5), not following predecessors yet (that's C5).
fn delay_to_tail(
    program: &Program,
    block_id: BlockId,
    consumer: InstrId,
    soft: bool,
) -> u32 {
    crate::fixup::delay_calc(program, block_id, consumer, soft, false)
}

/// Emit the block's terminator (§4.4/§4.6): a conditional branch (inverted
/// sense) to the fall-through successor followed by an unconditional branch
/// to the taken successor, or a single unconditional jump if there's only
/// one successor. Blocks with no successors (the final return) emit
/// nothing.
fn emit_terminator(
    program: &mut Program,
    block_id: BlockId,
    state: &BlockSched,
) -> crate::error::Result<()> {
    let _ = state;
    if program[block_id].is_conditional() {
        let cond = program[block_id].condition;
        let dist = cond
            .map(|c| crate::fixup::distance(program, block_id, c, MAX_DELAY, false))
            .unwrap_or(0);
        let pad = MAX_DELAY.saturating_sub(dist);
        for _ in 0..pad {
            emit_nop(program, block_id);
        }

        let succs = program[block_id].succs.clone();
        let cond_srcs = match cond {
            Some(c) => vec![crate::ir::Operand::true_dep(c)],
            None => Vec::new(),
        };

        let bra = crate::ir::Instr::new(block_id, "bra", OpClass::Flow, 0)
            .with_srcs(cond_srcs)
            .with_branch_target(succs[1], true);
        let bra_id = program.add_instr(bra);
        program[bra_id].scheduled = true;
        program[block_id].instrs.push(bra_id);

        let jmp = crate::ir::Instr::new(block_id, "jmp", OpClass::Flow, 0)
            .with_branch_target(succs[0], false);
        let jmp_id = program.add_instr(jmp);
        program[jmp_id].scheduled = true;
        program[block_id].instrs.push(jmp_id);
    } else if let Some(&target) = program[block_id].succs.first() {
        let jmp = crate::ir::Instr::new(block_id, "jmp", OpClass::Flow, 0)
            .with_branch_target(target, false);
        let jmp_id = program.add_instr(jmp);
        program[jmp_id].scheduled = true;
        program[block_id].instrs.push(jmp_id);
    }
    Ok(())
}
