// SPDX-License-Identifier: MIT

//! A small builder for constructing test programs without hand-assembling
//! arena indices directly, in the spirit of a key-based CFG builder: you
//! describe blocks and edges, and the builder resolves them for you.

use crate::ir::{
    BarrierClass, BlockId, Instr, InstrId, MetaOp, OpClass, Operand, Program,
};

pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            program: Program::new(),
        }
    }

    pub fn block(&mut self) -> BlockId {
        self.program.add_block()
    }

    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        self.program[from].succs.push(to);
        self.program[to].preds.push(from);
    }

    pub fn set_condition(&mut self, block: BlockId, cond: InstrId) {
        self.program[block].condition = Some(cond);
    }

    pub fn keep(&mut self, block: BlockId, id: InstrId) {
        self.program[block].keep.push(id);
    }

    pub fn output(&mut self, id: InstrId) {
        self.program.outputs.push(id);
    }

    pub fn instr(
        &mut self,
        block: BlockId,
        name: &'static str,
        op_class: OpClass,
        dst_width: u32,
        srcs: &[InstrId],
    ) -> InstrId {
        let operands = srcs.iter().map(|&s| Operand::true_dep(s)).collect();
        let instr = Instr::new(block, name, op_class, dst_width)
            .with_srcs(operands);
        self.program.push_instr(instr)
    }

    pub fn instr_with(
        &mut self,
        block: BlockId,
        name: &'static str,
        op_class: OpClass,
        dst_width: u32,
        build: impl FnOnce(Instr) -> Instr,
    ) -> InstrId {
        let instr = build(Instr::new(block, name, op_class, dst_width));
        self.program.push_instr(instr)
    }

    pub fn meta_input(&mut self, block: BlockId, name: &'static str) -> InstrId {
        self.instr(block, name, OpClass::Meta(MetaOp::Input), 1, &[])
    }

    pub fn barycentric_input(
        &mut self,
        block: BlockId,
        name: &'static str,
    ) -> InstrId {
        self.instr_with(
            block,
            name,
            OpClass::Meta(MetaOp::TexPrefetch),
            1,
            |i| Instr {
                is_barycentric_input: true,
                ..i
            },
        )
    }

    pub fn kill(&mut self, block: BlockId) -> InstrId {
        self.instr_with(block, "kill", OpClass::Flow, 0, |i| Instr {
            is_kill: true,
            ..i
        })
    }

    pub fn writes_addr(
        &mut self,
        block: BlockId,
        name: &'static str,
    ) -> InstrId {
        self.instr_with(block, name, OpClass::Alu, 1, |i| Instr {
            writes_addr: true,
            ..i
        })
    }

    pub fn reads_addr(
        &mut self,
        block: BlockId,
        name: &'static str,
        addr: InstrId,
    ) -> InstrId {
        self.instr_with(
            block,
            name,
            OpClass::Mem,
            1,
            |i| Instr {
                reads_addr: true,
                ..i.with_srcs(vec![Operand::true_dep(addr)])
            },
        )
    }

    pub fn writes_pred(
        &mut self,
        block: BlockId,
        name: &'static str,
        srcs: &[InstrId],
    ) -> InstrId {
        let operands = srcs.iter().map(|&s| Operand::true_dep(s)).collect();
        self.instr_with(block, name, OpClass::Alu, 1, |i| Instr {
            writes_pred: true,
            ..i.with_srcs(operands)
        })
    }

    pub fn tex_fetch(
        &mut self,
        block: BlockId,
        name: &'static str,
        mask: u32,
    ) -> InstrId {
        self.instr_with(block, name, OpClass::Tex, 4, |i| {
            i.with_write_mask(mask)
        })
    }

    pub fn split(
        &mut self,
        block: BlockId,
        name: &'static str,
        src: InstrId,
        channel: u32,
    ) -> InstrId {
        self.instr_with(
            block,
            name,
            OpClass::Meta(MetaOp::Split),
            1,
            |i| {
                i.with_split_channel(channel)
                    .with_srcs(vec![Operand::true_dep(src)])
            },
        )
    }

    pub fn barrier(
        &mut self,
        block: BlockId,
        name: &'static str,
        class: BarrierClass,
    ) -> InstrId {
        self.instr_with(block, name, OpClass::Mem, 1, |i| {
            i.with_barrier(class, class)
        })
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}
