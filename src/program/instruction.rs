use super::expression::{ExprId, ExpressionPool, RegisterId};
use std::fmt;

pub type Space = u32;

/// The address bank of the input program. Transformation passes use higher
/// spaces for their bookkeeping.
pub const MEMORY_SPACE: Space = 0;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Instruction {
    Read {
        reg: RegisterId,
        address: ExprId,
        space: Space,
    },
    Write {
        value: ExprId,
        address: ExprId,
        space: Space,
    },
    Mfence,
    Local {
        reg: RegisterId,
        value: ExprId,
    },
    /// Guard: the edge is enabled only if the expression is non-zero.
    Condition(ExprId),
    Noop,
    Lock,
    Unlock,
    /// Executed as one indivisible step.
    Atomic(Vec<Instruction>),
}

impl Instruction {
    pub fn read(reg: RegisterId, address: ExprId) -> Self {
        Instruction::Read {
            reg,
            address,
            space: MEMORY_SPACE,
        }
    }

    pub fn write(value: ExprId, address: ExprId) -> Self {
        Instruction::Write {
            value,
            address,
            space: MEMORY_SPACE,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Instruction::Read { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Instruction::Write { .. })
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Read { .. } => "read",
            Instruction::Write { .. } => "write",
            Instruction::Mfence => "mfence",
            Instruction::Local { .. } => "local",
            Instruction::Condition(_) => "condition",
            Instruction::Noop => "noop",
            Instruction::Lock => "lock",
            Instruction::Unlock => "unlock",
            Instruction::Atomic(_) => "atomic",
        }
    }

    pub fn display<'a>(&'a self, pool: &'a ExpressionPool) -> InstructionDisplay<'a> {
        InstructionDisplay {
            instruction: self,
            pool,
        }
    }
}

pub struct InstructionDisplay<'a> {
    instruction: &'a Instruction,
    pool: &'a ExpressionPool,
}

fn write_cell(
    f: &mut fmt::Formatter,
    pool: &ExpressionPool,
    address: ExprId,
    space: Space,
) -> fmt::Result {
    if space == MEMORY_SPACE {
        write!(f, "mem[{}]", pool.display(address))
    } else {
        write!(f, "mem{}[{}]", space, pool.display(address))
    }
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let pool = self.pool;
        match self.instruction {
            Instruction::Read {
                reg,
                address,
                space,
            } => {
                write!(f, "{} <- ", pool.register_name(*reg))?;
                write_cell(f, pool, *address, *space)
            }
            Instruction::Write {
                value,
                address,
                space,
            } => {
                write_cell(f, pool, *address, *space)?;
                write!(f, " <- {}", pool.display(*value))
            }
            Instruction::Local { reg, value } => {
                write!(f, "{} := {}", pool.register_name(*reg), pool.display(*value))
            }
            Instruction::Condition(expression) => write!(f, "assume {}", pool.display(*expression)),
            Instruction::Atomic(instructions) => {
                write!(f, "atomic {{ ")?;
                for (i, instruction) in instructions.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", instruction.display(pool))?;
                }
                write!(f, " }}")
            }
            Instruction::Mfence | Instruction::Noop | Instruction::Lock | Instruction::Unlock => {
                write!(f, "{}", self.instruction.mnemonic())
            }
        }
    }
}
