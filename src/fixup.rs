// SPDX-License-Identifier: MIT

//! Inter-block fix-up (C5, §4.5): after every block is individually
//! scheduled, a second pass inserts NOPs at block entry to cover latency
//! that crosses a control-flow edge, including loop back-edges.

use crate::deps::delay;
use crate::ir::{BlockId, InstrId, Operand, Program};

/// Walks backward from the end of `block`'s scheduled list counting issue
/// slots until it reaches `target`, or `cap`. If it runs off the front of
/// the block and `follow_preds` is set, recurses into predecessors
/// (guarded against re-entering a block already on the call stack, which
/// happens on a loop back-edge) and returns the minimum across them plus
/// its own count.
pub fn distance(
    program: &Program,
    block: BlockId,
    target: InstrId,
    cap: u32,
    follow_preds: bool,
) -> u32 {
    let mut visited = vec![block];
    distance_inner(program, block, target, cap, follow_preds, &mut visited)
}

fn distance_inner(
    program: &Program,
    block: BlockId,
    target: InstrId,
    cap: u32,
    follow_preds: bool,
    visited: &mut Vec<BlockId>,
) -> u32 {
    let instrs = &program[block].instrs;
    let mut count = 0u32;
    for &id in instrs.iter().rev() {
        if id == target {
            return count;
        }
        if program[id].op_class.is_issue_slot() {
            count += 1;
            if count >= cap {
                return cap;
            }
        }
    }

    if !follow_preds || program[block].preds.is_empty() {
        return if follow_preds { count } else { cap };
    }

    let mut best = cap;
    for &pred in &program[block].preds {
        if visited.contains(&pred) {
            // Loop back-edge: don't re-enter, treat as unbounded.
            continue;
        }
        visited.push(pred);
        let pred_dist = distance_inner(
            program, pred, target, cap, follow_preds, visited,
        );
        visited.pop();
        best = best.min(count + pred_dist);
    }
    best
}

/// `delay_calc` (§4.4.5, §4.5): the worst-case remaining delay for
/// `consumer` against every true-SSA source, recursing through meta
/// sources, given the current (possibly partial) tail of `block`.
pub fn delay_calc(
    program: &Program,
    block: BlockId,
    consumer: InstrId,
    soft: bool,
    follow_preds: bool,
) -> u32 {
    let mut worst = 0u32;
    for (idx, op) in program[consumer].srcs.iter().enumerate() {
        if op.false_dep {
            continue;
        }
        worst = worst.max(delay_against_source(
            program,
            block,
            consumer,
            op.producer,
            idx,
            soft,
            follow_preds,
        ));
    }
    worst
}

/// Delay `consumer` needs against `producer` as if it were a direct source
/// at operand index `idx`. When `producer` is a meta COLLECT/SPLIT proxy
/// (which itself has zero delay, §4.1), recurse into its own true-SSA
/// sources instead of treating the hop as if it had no delay at all —
/// otherwise a real ALU/SFU/TEX producer reaching `consumer` through a meta
/// proxy would never get its delay enforced.
fn delay_against_source(
    program: &Program,
    block: BlockId,
    consumer: InstrId,
    producer: InstrId,
    idx: usize,
    soft: bool,
    follow_preds: bool,
) -> u32 {
    if program[producer].op_class.is_meta() {
        let mut worst = 0u32;
        for op in &program[producer].srcs {
            if op.false_dep {
                continue;
            }
            worst = worst.max(delay_against_source(
                program,
                block,
                consumer,
                op.producer,
                idx,
                soft,
                follow_preds,
            ));
        }
        return worst;
    }

    let op = Operand::true_dep(producer);
    let required = delay(&program[producer], &program[consumer], &op, idx, soft);
    if required == 0 {
        return 0;
    }
    let dist = if program[producer].block == block {
        distance(program, block, producer, required, follow_preds)
    } else {
        0
    };
    required.saturating_sub(dist)
}

/// Second linear pass: for each instruction at position `n` in a block,
/// pad NOPs before it if latency from any predecessor's tail exceeds `n`.
/// Stops scanning a block past position 6, since nothing beyond six issue
/// slots from entry can be affected by cross-edge latency.
pub fn fixup_inter_block(program: &mut Program) {
    log::debug!("fixup_inter_block: {} blocks", program.num_blocks());

    for block_id in program.block_ids().collect::<Vec<_>>() {
        let mut n = 0u32;
        let mut pos = 0usize;
        loop {
            if n > 6 {
                break;
            }
            let instrs = program[block_id].instrs.clone();
            if pos >= instrs.len() {
                break;
            }
            let id = instrs[pos];

            let mut needed = 0u32;
            for &pred in &program[block_id].preds {
                let d = delay_calc(program, pred, id, false, true);
                needed = needed.max(d.saturating_sub(n));
            }

            if needed > 0 {
                for _ in 0..needed {
                    let nop = program.add_instr(crate::ir::Instr::new(
                        block_id,
                        "nop",
                        crate::ir::OpClass::Alu,
                        0,
                    ));
                    program[nop].scheduled = true;
                    program[block_id].instrs.insert(pos, nop);
                }
                n += needed;
                pos += needed as usize;
            }

            if program[id].op_class.is_issue_slot() {
                n += 1;
            }
            pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instr, OpClass};

    // A block that loops back to itself must not send `distance` into
    // infinite recursion on the back-edge.
    #[test]
    fn distance_stops_on_loop_back_edge() {
        let mut program = Program::new();
        let blk = program.add_block();
        program[blk].preds.push(blk);
        let target = program.add_instr(Instr::new(blk, "t", OpClass::Alu, 1));
        program[blk].instrs.push(target);

        let d = distance(&program, blk, target, 6, true);
        assert_eq!(d, 0);
    }

    #[test]
    fn distance_counts_issue_slots_only() {
        let mut program = Program::new();
        let blk = program.add_block();
        let target = program.add_instr(Instr::new(blk, "t", OpClass::Alu, 1));
        let meta = program.add_instr(Instr::new(
            blk,
            "m",
            OpClass::Meta(crate::ir::MetaOp::Collect),
            1,
        ));
        let tail = program.add_instr(Instr::new(blk, "tail", OpClass::Alu, 1));
        program[blk].instrs = vec![target, meta, tail];

        assert_eq!(distance(&program, blk, target, 6, false), 1);
    }

    // A real producer reaching a consumer through a meta COLLECT/SPLIT hop
    // must still have its delay enforced, not silently waived.
    #[test]
    fn delay_calc_recurses_through_meta_producer() {
        let mut program = Program::new();
        let blk = program.add_block();
        let producer = program.add_instr(Instr::new(blk, "p", OpClass::Alu, 1));
        let meta = program.add_instr(
            Instr::new(blk, "m", OpClass::Meta(crate::ir::MetaOp::Collect), 1)
                .with_srcs(vec![Operand::true_dep(producer)]),
        );
        let consumer = program.add_instr(
            Instr::new(blk, "c", OpClass::Mem, 1)
                .with_srcs(vec![Operand::true_dep(meta)]),
        );
        program[blk].instrs = vec![producer];

        assert_eq!(delay_calc(&program, blk, consumer, false, false), 6);
    }
}
