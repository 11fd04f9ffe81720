// SPDX-License-Identifier: MIT

use shader_sched::builder::ProgramBuilder;
use shader_sched::ir::{BarrierClass, InstrId, OpClass, Program, ShaderVariant};

fn run(program: &mut Program) {
    shader_sched::run(program, ShaderVariant::Fragment).expect("schedule");
}

fn block_names(program: &Program, block: shader_sched::ir::BlockId) -> Vec<&str> {
    program[block].instrs.iter().map(|&id| program[id].name).collect()
}

fn assert_order(program: &Program, block: shader_sched::ir::BlockId, producer: InstrId, consumer: InstrId) {
    let instrs = &program[block].instrs;
    let p = instrs.iter().position(|&id| id == producer).expect("producer scheduled");
    let c = instrs.iter().position(|&id| id == consumer).expect("consumer scheduled");
    assert!(p < c, "producer must precede consumer");
}

// Scenario 1: a simple ALU chain requires NOPs to cover the 3-cycle
// ALU -> ALU delay.
#[test]
fn alu_chain_pads_delay() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let i0 = b.meta_input(blk, "i0");
    let i1 = b.instr(blk, "i1", OpClass::Alu, 1, &[i0]);
    let i2 = b.instr(blk, "i2", OpClass::Alu, 1, &[i1]);
    b.output(i2);
    let mut program = b.finish();

    run(&mut program);

    assert_order(&program, blk, i0, i1);
    assert_order(&program, blk, i1, i2);

    let instrs = &program[blk].instrs;
    let p1 = instrs.iter().position(|&id| id == i1).unwrap();
    let p2 = instrs.iter().position(|&id| id == i2).unwrap();
    assert!(p2 - p1 >= 3, "need at least 3 issue slots between i1 and i2");
}

// Scenario 2: two independent chains interleave to fill delay slots.
#[test]
fn independent_chains_interleave() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let a0 = b.meta_input(blk, "a0");
    let a1 = b.instr(blk, "a1", OpClass::Alu, 1, &[a0]);
    let b0 = b.meta_input(blk, "b0");
    let b1 = b.instr(blk, "b1", OpClass::Alu, 1, &[b0]);
    b.output(a1);
    b.output(b1);
    let mut program = b.finish();

    run(&mut program);

    assert_order(&program, blk, a0, a1);
    assert_order(&program, blk, b0, b1);

    let names = block_names(&program, blk);
    let nops = names.iter().filter(|&&n| n == "nop").count();
    assert_eq!(nops, 0, "two independent chains should fill each other's delay slots: {names:?}");
}

// Scenario 4: two sequential SFU/mem instructions require a NOP between
// them even with no data dependency.
#[test]
fn sequential_sfu_needs_nop() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let s0 = b.instr(blk, "s0", OpClass::Sfu, 1, &[]);
    let s1 = b.instr(blk, "s1", OpClass::Sfu, 1, &[]);
    b.output(s0);
    b.output(s1);
    let mut program = b.finish();

    run(&mut program);

    let instrs = &program[blk].instrs;
    let i0 = instrs.iter().position(|&id| id == s0).unwrap();
    let i1 = instrs.iter().position(|&id| id == s1).unwrap();
    let (first, second) = if i0 < i1 { (i0, i1) } else { (i1, i0) };
    assert_eq!(second - first, 2, "exactly one NOP must separate back-to-back SFU issues");
    assert_eq!(program[instrs[first + 1]].name, "nop");
}

// Scenario 3: two address-register producers with their own consumers
// force a clone to break the conflict; both consumers still see a live
// producer and the original ordering invariant holds.
#[test]
fn address_register_conflict_clones() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let w1 = b.writes_addr(blk, "w1");
    let c1 = b.reads_addr(blk, "c1", w1);
    let w2 = b.writes_addr(blk, "w2");
    let c2 = b.reads_addr(blk, "c2", w2);
    b.output(c1);
    b.output(c2);
    let mut program = b.finish();

    run(&mut program);

    assert_order(&program, blk, w1, c1);
    // c2 must be preceded by *some* address-register producer that isn't
    // w1 (either the original w2 or a clone of it).
    let instrs = &program[blk].instrs;
    let c2_pos = instrs.iter().position(|&id| id == c2).unwrap();
    let has_addr_producer_before = instrs[..c2_pos]
        .iter()
        .any(|&id| program[id].writes_addr);
    assert!(has_addr_producer_before, "c2 needs a live address producer before it");
}

// Scenario 5: a conditional terminator pads delay slots until its
// predicate producer is far enough back to be live at the branch.
#[test]
fn conditional_terminator_pads_to_six() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let t = b.block();
    let f = b.block();
    let p = b.writes_pred(blk, "p", &[]);
    b.set_condition(blk, p);
    b.connect(blk, t);
    b.connect(blk, f);
    let mut program = b.finish();

    run(&mut program);

    let instrs = &program[blk].instrs;
    let p_pos = instrs.iter().position(|&id| id == p).unwrap();
    // Last two instructions are the conditional branch pair; everything
    // between the predicate producer and them is padding.
    assert_eq!(
        instrs.len() - p_pos - 1,
        8,
        "need exactly 6 issue slots of padding plus the 2-instruction branch pair: {:?}",
        block_names(&program, blk)
    );

    let bra = &program[instrs[instrs.len() - 2]];
    assert_eq!(bra.name, "bra");
    assert!(bra.branch_inverted);
    assert_eq!(bra.branch_target, Some(f));
    assert!(bra.srcs.iter().any(|op| op.producer == p && !op.false_dep));

    let jmp = &program[instrs[instrs.len() - 1]];
    assert_eq!(jmp.name, "jmp");
    assert!(!jmp.branch_inverted);
    assert_eq!(jmp.branch_target, Some(t));
}

// Scenario 6: a kill preceded by a live, unscheduled barycentric input
// must not be scheduled before that input.
#[test]
fn kill_waits_for_barycentric_input() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let bary = b.barycentric_input(blk, "bary");
    b.keep(blk, bary);
    let k = b.kill(blk);
    b.keep(blk, k);
    let mut program = b.finish();

    run(&mut program);

    assert_order(&program, blk, bary, k);
}

// Barrier ordering: two memory ops with conflicting barrier classes stay
// ordered even with no SSA dependency between them.
#[test]
fn barrier_memory_ops_stay_ordered() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let m0 = b.barrier(blk, "m0", BarrierClass::MEMORY);
    let m1 = b.barrier(blk, "m1", BarrierClass::MEMORY);
    b.keep(blk, m0);
    b.keep(blk, m1);
    let mut program = b.finish();

    run(&mut program);

    assert_order(&program, blk, m0, m1);
}

// An instruction with no path to any output, keep, or condition root is
// dead code and must not appear in the final order at all.
#[test]
fn dead_code_is_pruned() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let live_in = b.meta_input(blk, "live_in");
    let live = b.instr(blk, "live", OpClass::Alu, 1, &[live_in]);
    b.output(live);

    let dead_in = b.meta_input(blk, "dead_in");
    let dead = b.instr(blk, "dead", OpClass::Alu, 1, &[dead_in]);
    let _ = dead;

    let mut program = b.finish();
    run(&mut program);

    let names = block_names(&program, blk);
    assert!(!names.contains(&"dead"), "dead code must be pruned: {names:?}");
    assert!(!names.contains(&"dead_in"), "its sole source is dead too: {names:?}");
    assert!(names.contains(&"live"));
}

// A dead SPLIT over a texture fetch with a write mask must clear its
// channel's bit on the fetch, leaving the still-live channel's bit set.
#[test]
fn dead_split_clears_texture_write_mask_bit() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let tex = b.tex_fetch(blk, "tex", 0b11);
    let live_split = b.split(blk, "s0", tex, 0);
    let dead_split = b.split(blk, "s1", tex, 1);
    let _ = dead_split;
    b.output(live_split);
    let mut program = b.finish();

    run(&mut program);

    assert_eq!(program[tex].write_mask, Some(0b01));
}

// A two-block loop (block 1 branches back to itself) must still get a
// correctly bounded inter-block fix-up: the back-edge distance calculation
// must terminate rather than recurse forever, and a true ALU->ALU
// dependency crossing the edge still gets its NOPs.
#[test]
fn loop_back_edge_fixup_terminates_and_pads() {
    let mut b = ProgramBuilder::new();
    let blk = b.block();
    let cond_in = b.meta_input(blk, "cond_in");
    let producer = b.instr(blk, "producer", OpClass::Alu, 1, &[cond_in]);
    let cond = b.writes_pred(blk, "cond", &[producer]);
    b.set_condition(blk, cond);
    let consumer = b.instr(blk, "consumer", OpClass::Alu, 1, &[producer]);
    b.keep(blk, consumer);
    b.connect(blk, blk);
    let mut program = b.finish();

    run(&mut program);

    assert_order(&program, blk, producer, consumer);
}
