// SPDX-License-Identifier: MIT

//! Readable rendering of a scheduled program, used by tests for clear
//! failure diffs and by the verbose debug-flag trace.

use crate::ir::{BlockId, OpClass, Program};
use std::fmt;

pub struct DisplayProgram<'a>(pub &'a Program);

impl fmt::Display for DisplayProgram<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block_id in self.0.block_ids() {
            writeln!(f, "{}:", block_id)?;
            write_block(f, self.0, block_id)?;
        }
        Ok(())
    }
}

fn write_block(
    f: &mut fmt::Formatter<'_>,
    program: &Program,
    block_id: BlockId,
) -> fmt::Result {
    for &id in &program[block_id].instrs {
        let instr = &program[id];
        write!(f, "  {} = {}", id, instr.name)?;
        if !instr.srcs.is_empty() {
            write!(f, " ")?;
            for (i, op) in instr.srcs.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                if op.false_dep {
                    write!(f, "!{}", op.producer)?;
                } else {
                    write!(f, "{}", op.producer)?;
                }
            }
        }
        if let Some(target) = instr.branch_target {
            let sense = if instr.branch_inverted { " !cond" } else { "" };
            write!(f, "{sense} -> {target}")?;
        }
        writeln!(f)?;
    }
    Ok(())
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpClass::Alu => write!(f, "alu"),
            OpClass::Fma => write!(f, "fma"),
            OpClass::Sfu => write!(f, "sfu"),
            OpClass::Tex => write!(f, "tex"),
            OpClass::Mem => write!(f, "mem"),
            OpClass::Flow => write!(f, "flow"),
            OpClass::Meta(m) => write!(f, "meta.{m:?}"),
        }
    }
}
