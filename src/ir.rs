// SPDX-License-Identifier: MIT

//! The data model: instructions, blocks, and the program that owns them.
//!
//! Instructions and blocks are stored in flat arenas and referenced by
//! non-owning handles (`InstrId` / `BlockId`) rather than by `Box` or `Rc`,
//! since both instructions and blocks need to reference each other (an
//! instruction's block, a block's instructions, an SSA consumer's
//! producer) and a cyclic owning structure would fight the borrow checker
//! for no benefit here.

use std::ops::{Index, IndexMut};

/// A handle to an instruction in a [`Program`]'s instruction arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

/// A handle to a block in a [`Program`]'s block arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// The broad opcode classes the scheduler needs to distinguish.
///
/// Meta opcodes are zero-cost IR bookkeeping: they never occupy an issue
/// slot, but they do participate in SSA and are transparent to use-count
/// and liveness bookkeeping (see `Program::effective_sources`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpClass {
    Alu,
    /// Multiply-add family; operand index 3 is the accumulator and gets
    /// the short 1-cycle delay from an ALU producer.
    Fma,
    Sfu,
    Tex,
    Mem,
    Flow,
    Meta(MetaOp),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaOp {
    Input,
    Collect,
    Split,
    TexPrefetch,
}

impl OpClass {
    pub fn is_meta(&self) -> bool {
        matches!(self, OpClass::Meta(_))
    }

    pub fn is_sfu_or_mem(&self) -> bool {
        matches!(self, OpClass::Sfu | OpClass::Tex | OpClass::Mem)
    }

    pub fn is_flow(&self) -> bool {
        matches!(self, OpClass::Flow)
    }

    /// Whether this instruction occupies an issue slot once scheduled.
    /// NOPs count (they're modelled as `OpClass::Alu` with no effect);
    /// terminator jumps/branches don't, since later passes may elide them.
    pub fn is_issue_slot(&self) -> bool {
        !matches!(self, OpClass::Meta(_) | OpClass::Flow)
    }
}

/// A single source operand: a reference to the producing instruction, plus
/// whether the edge is a true SSA dependency or an ordering-only false
/// dependency.
#[derive(Clone, Copy, Debug)]
pub struct Operand {
    pub producer: InstrId,
    pub false_dep: bool,
}

impl Operand {
    pub fn true_dep(producer: InstrId) -> Self {
        Operand {
            producer,
            false_dep: false,
        }
    }

    pub fn false_dep(producer: InstrId) -> Self {
        Operand {
            producer,
            false_dep: true,
        }
    }
}

bitflags::bitflags! {
    /// Barrier classification bitmask for ordering memory/array/side-effect
    /// instructions relative to each other (§4.1, §4.3).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BarrierClass: u32 {
        const MEMORY  = 1 << 0;
        const ARRAY   = 1 << 1;
        const ATOMIC  = 1 << 2;
        const EXPORT  = 1 << 3;
    }
}

/// An instruction, with its static shape and its mutable scheduling state.
#[derive(Clone, Debug)]
pub struct Instr {
    pub op_class: OpClass,
    pub name: &'static str,
    /// The block this instruction belongs to. Cross-block true-SSA edges
    /// don't occur in this IR: the scheduler only ever permutes
    /// instructions within one block (§1).
    pub block: BlockId,

    pub dst_width: u32,
    pub srcs: Vec<Operand>,

    pub writes_addr: bool,
    pub writes_pred: bool,
    pub reads_addr: bool,
    pub reads_pred: bool,
    pub is_kill: bool,
    pub is_barycentric_input: bool,

    pub barrier_class: BarrierClass,
    pub barrier_conflict: BarrierClass,
    pub array_id: Option<u32>,

    /// Per-channel write mask for a texture fetch that supports one, or
    /// `None` for instructions with no such mask. Cleared bit-by-bit as a
    /// consuming SPLIT is pruned (§4.3).
    pub write_mask: Option<u32>,
    /// Which channel of its source this SPLIT extracts, for `Meta(Split)`
    /// instructions over a texture fetch with a write mask.
    pub split_channel: Option<u32>,

    /// Target block of a terminator branch/jump (`OpClass::Flow`), `None`
    /// for every other instruction.
    pub branch_target: Option<BlockId>,
    /// Whether this branch's condition sense is inverted (the `bra !cond`
    /// half of a conditional terminator pair, §4.6).
    pub branch_inverted: bool,

    // Mutable per-pass scheduling state.
    pub depth: i64,
    pub use_count: i32,
    pub scheduled: bool,
    pub unused: bool,
    pub visited: bool,
    /// Memoized result of the recursive selector (§4.4.1). `None` means
    /// not yet cached. Only positive resolutions (`Some(Some(id))`) are
    /// ever stored; a negative result depends on which special-register
    /// producer was in scope at the time, so it's always recomputed.
    pub sched_cache: Option<Option<InstrId>>,
}

impl Instr {
    pub fn new(
        block: BlockId,
        name: &'static str,
        op_class: OpClass,
        dst_width: u32,
    ) -> Self {
        Instr {
            op_class,
            name,
            block,
            dst_width,
            srcs: Vec::new(),
            writes_addr: false,
            writes_pred: false,
            reads_addr: false,
            reads_pred: false,
            is_kill: false,
            is_barycentric_input: false,
            barrier_class: BarrierClass::empty(),
            barrier_conflict: BarrierClass::empty(),
            array_id: None,
            write_mask: None,
            split_channel: None,
            branch_target: None,
            branch_inverted: false,
            depth: 0,
            use_count: 0,
            scheduled: false,
            unused: true,
            visited: false,
            sched_cache: None,
        }
    }

    pub fn with_srcs(mut self, srcs: Vec<Operand>) -> Self {
        self.srcs = srcs;
        self
    }

    pub fn with_array_id(mut self, id: u32) -> Self {
        self.array_id = Some(id);
        self
    }

    pub fn with_barrier(mut self, class: BarrierClass, conflict: BarrierClass) -> Self {
        self.barrier_class = class;
        self.barrier_conflict = conflict;
        self
    }

    pub fn with_write_mask(mut self, mask: u32) -> Self {
        self.write_mask = Some(mask);
        self
    }

    pub fn with_split_channel(mut self, channel: u32) -> Self {
        self.split_channel = Some(channel);
        self
    }

    pub fn with_branch_target(mut self, target: BlockId, inverted: bool) -> Self {
        self.branch_target = Some(target);
        self.branch_inverted = inverted;
        self
    }
}

/// A basic block: an ordered instruction list plus CFG edges.
#[derive(Clone, Debug, Default)]
pub struct Block {
    /// The block's instructions as originally built, before any pass has
    /// touched them. `add_deps` and the first depth walk use this; once
    /// dead-code pruning has run, `pending`/`instrs` take over.
    pub source_order: Vec<InstrId>,
    /// Depth-sorted list of not-yet-scheduled instructions, descending by
    /// depth (stable by insertion order within equal depth). Consumed by
    /// the ready-list scheduler.
    pub pending: Vec<InstrId>,
    /// Final emitted order, built up by the scheduler.
    pub instrs: Vec<InstrId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Instructions this block must keep regardless of use-count (stores,
    /// barriers, kills, anything with a side effect the front-end flags
    /// explicitly rather than relying on `can_eliminate`-style inference).
    pub keep: Vec<InstrId>,
    /// The predicate producer the terminator branches on, if conditional.
    pub condition: Option<InstrId>,
}

impl Block {
    pub fn is_conditional(&self) -> bool {
        self.succs.len() == 2
    }
}

/// Which shader stage is being scheduled. Affects only the dead-code
/// pruning exception for barycentric inputs reachable solely from a
/// pre-fragment-shading texture prefetch (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderVariant {
    Vertex,
    Fragment,
    Compute,
}

/// The whole program: block and instruction arenas plus the global tables
/// the scheduler mutates as it prunes dead code.
#[derive(Clone, Debug, Default)]
pub struct Program {
    instrs: Vec<Instr>,
    blocks: Vec<Block>,

    pub indirects: Vec<InstrId>,
    pub predicates: Vec<InstrId>,
    pub baryfs: Vec<InstrId>,
    pub outputs: Vec<InstrId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instr(&mut self, instr: Instr) -> InstrId {
        let id = InstrId(self.instrs.len().try_into().unwrap());
        self.instrs.push(instr);
        id
    }

    /// Creates an instruction and appends it to its block's source order.
    pub fn push_instr(&mut self, instr: Instr) -> InstrId {
        let block = instr.block;
        let id = self.add_instr(instr);
        self[block].source_order.push(id);
        id
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len().try_into().unwrap());
        self.blocks.push(Block::default());
        id
    }

    pub fn num_instrs(&self) -> usize {
        self.instrs.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(|i| BlockId(i as u32))
    }

    pub fn instr_ids(&self) -> impl Iterator<Item = InstrId> {
        (0..self.instrs.len()).map(|i| InstrId(i as u32))
    }

    /// The sources of `id`, transparently recursing through meta
    /// COLLECT/SPLIT proxies so callers see only "real" producers.
    pub fn effective_sources(&self, id: InstrId) -> Vec<InstrId> {
        let mut out = Vec::new();
        self.push_effective_sources(id, &mut out);
        out
    }

    fn push_effective_sources(&self, id: InstrId, out: &mut Vec<InstrId>) {
        for op in &self[id].srcs {
            if self[op.producer].op_class.is_meta() {
                self.push_effective_sources(op.producer, out);
            } else {
                out.push(op.producer);
            }
        }
    }

    /// Like `effective_sources`, but follows only true SSA edges. A
    /// false-dependency edge carries no value, so it must not feed
    /// use-count or live-value bookkeeping (§4.4's commit step only counts
    /// "true SSA sources"); it still matters for scheduling-order
    /// resolution, which is what plain `effective_sources` is for.
    pub fn effective_true_sources(&self, id: InstrId) -> Vec<InstrId> {
        let mut out = Vec::new();
        self.push_effective_true_sources(id, &mut out);
        out
    }

    fn push_effective_true_sources(&self, id: InstrId, out: &mut Vec<InstrId>) {
        for op in &self[id].srcs {
            if op.false_dep {
                continue;
            }
            if self[op.producer].op_class.is_meta() {
                self.push_effective_true_sources(op.producer, out);
            } else {
                out.push(op.producer);
            }
        }
    }
}

impl Index<InstrId> for Program {
    type Output = Instr;
    fn index(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0 as usize]
    }
}

impl IndexMut<InstrId> for Program {
    fn index_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.0 as usize]
    }
}

impl Index<BlockId> for Program {
    type Output = Block;
    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }
}

impl IndexMut<BlockId> for Program {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }
}
