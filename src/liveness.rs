//! # Register liveness
//!
//! Backward dataflow analysis computing, for every control state of every
//! thread, the registers whose current value may still be read.

use crate::program::{ExpressionPool, Instruction, Program, RegisterId, StateId, Thread, ThreadId};
use log::trace;
use std::collections::BTreeSet;

//
// Public Interface
//

pub type RegisterSet = BTreeSet<RegisterId>;

#[derive(Clone, Debug)]
pub struct Liveness {
    live: Vec<Vec<RegisterSet>>,
}

impl Liveness {
    pub fn compute(program: &Program) -> Self {
        let live = program
            .threads()
            .map(|(_, thread)| compute_for_thread(thread, program.expressions()))
            .collect();

        Self { live }
    }

    pub fn live_registers(&self, thread: ThreadId, state: StateId) -> &RegisterSet {
        &self.live[thread.index()][state.index()]
    }

    pub fn is_live(&self, thread: ThreadId, state: StateId, reg: RegisterId) -> bool {
        self.live_registers(thread, state).contains(&reg)
    }
}

/// Registers written by `instruction`.
pub fn killed_registers(instruction: &Instruction, result: &mut Vec<RegisterId>) {
    match instruction {
        Instruction::Read { reg, .. } | Instruction::Local { reg, .. } => result.push(*reg),
        Instruction::Atomic(instructions) => {
            for instruction in instructions {
                killed_registers(instruction, result);
            }
        }
        Instruction::Write { .. }
        | Instruction::Mfence
        | Instruction::Condition(_)
        | Instruction::Noop
        | Instruction::Lock
        | Instruction::Unlock => {}
    }
}

/// Registers whose value before `instruction` may influence its effect.
pub fn used_registers(
    instruction: &Instruction,
    pool: &ExpressionPool,
    result: &mut Vec<RegisterId>,
) {
    match instruction {
        Instruction::Read { address, .. } => pool.collect_registers(*address, result),
        Instruction::Write { value, address, .. } => {
            pool.collect_registers(*address, result);
            pool.collect_registers(*value, result);
        }
        Instruction::Local { value, .. } => pool.collect_registers(*value, result),
        Instruction::Condition(expression) => pool.collect_registers(*expression, result),
        Instruction::Atomic(instructions) => {
            // Walk backwards so that a register overwritten inside the block
            // before being read is not live at its entry.
            let mut used = Vec::new();
            for instruction in instructions.iter().rev() {
                let mut killed = Vec::new();
                killed_registers(instruction, &mut killed);
                used.retain(|reg| !killed.contains(reg));
                used_registers(instruction, pool, &mut used);
            }
            result.extend(used);
        }
        Instruction::Mfence | Instruction::Noop | Instruction::Lock | Instruction::Unlock => {}
    }
}

//
// Private Implementation
//

fn compute_for_thread(thread: &Thread, pool: &ExpressionPool) -> Vec<RegisterSet> {
    let mut live = vec![RegisterSet::new(); thread.state_count()];
    let mut iterations = 0;

    loop {
        let mut changed = false;
        iterations += 1;

        for (state, _) in thread.states() {
            let mut live_here = RegisterSet::new();

            for (_, transition) in thread.outgoing(state) {
                let mut killed = Vec::new();
                killed_registers(transition.instruction(), &mut killed);

                live_here.extend(
                    live[transition.to().index()]
                        .iter()
                        .filter(|reg| !killed.contains(reg)),
                );

                let mut used = Vec::new();
                used_registers(transition.instruction(), pool, &mut used);
                live_here.extend(used);
            }

            if live[state.index()] != live_here {
                live[state.index()] = live_here;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    trace!(
        "liveness of thread {} converged after {} iterations",
        thread.name(),
        iterations
    );

    live
}
