//! # Sequentially consistent semantics
//!
//! Explicit-state transition system of a [`Program`] under sequential
//! consistency. Two reductions keep the state space small:
//!
//! - after a purely thread-local step the acting thread becomes the
//!   _favourite_ and only it may take the next step, since local steps
//!   commute with the steps of all other threads;
//! - registers that are dead at a thread's control state are reset to zero,
//!   so states that only differ in dead values coincide.

use crate::liveness::Liveness;
use crate::program::{
    Domain, ExprId, Expression, Instruction, Program, RegisterId, Space, StateId, ThreadId,
    TransitionId,
};
use crate::search::Automaton;
use std::collections::BTreeMap;
use std::fmt;

pub mod defaults {
    pub const PARTIAL_ORDER_REDUCTION: bool = true;
    pub const LIVENESS_OPTIMIZATION: bool = true;
}

#[derive(Clone, Copy, Debug)]
pub struct SemanticsOptions {
    /// Schedule the acting thread again after a thread-local step.
    pub partial_order_reduction: bool,
    /// Forget register values that can no longer be read.
    pub liveness_optimization: bool,
}

impl Default for SemanticsOptions {
    fn default() -> Self {
        Self {
            partial_order_reduction: defaults::PARTIAL_ORDER_REDUCTION,
            liveness_optimization: defaults::LIVENESS_OPTIMIZATION,
        }
    }
}

/// Configuration of the whole program. Zero values are never stored, so two
/// configurations are equal iff all valuations agree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScState {
    control: Vec<Option<StateId>>,
    memory: BTreeMap<(Space, Domain), Domain>,
    registers: BTreeMap<(ThreadId, RegisterId), Domain>,
    lock_owner: Option<ThreadId>,
    favourite: Option<ThreadId>,
}

#[derive(Clone, Debug)]
pub struct ScTransition {
    thread: ThreadId,
    transition: TransitionId,
    destination: ScState,
}

pub struct ScSemantics<'a> {
    program: &'a Program,
    liveness: Option<Liveness>,
    options: SemanticsOptions,
}

impl ScState {
    pub fn control_state(&self, thread: ThreadId) -> Option<StateId> {
        self.control.get(thread.index()).copied().flatten()
    }

    pub fn set_control_state(&mut self, thread: ThreadId, state: StateId) {
        self.control[thread.index()] = Some(state);
    }

    pub fn memory_value(&self, space: Space, address: Domain) -> Domain {
        self.memory.get(&(space, address)).copied().unwrap_or_default()
    }

    pub fn set_memory_value(&mut self, space: Space, address: Domain, value: Domain) {
        if value == 0 {
            self.memory.remove(&(space, address));
        } else {
            self.memory.insert((space, address), value);
        }
    }

    pub fn register_value(&self, thread: ThreadId, reg: RegisterId) -> Domain {
        self.registers.get(&(thread, reg)).copied().unwrap_or_default()
    }

    pub fn set_register_value(&mut self, thread: ThreadId, reg: RegisterId, value: Domain) {
        if value == 0 {
            self.registers.remove(&(thread, reg));
        } else {
            self.registers.insert((thread, reg), value);
        }
    }

    pub fn lock_owner(&self) -> Option<ThreadId> {
        self.lock_owner
    }

    pub fn favourite(&self) -> Option<ThreadId> {
        self.favourite
    }

    fn may_access_memory(&self, thread: ThreadId) -> bool {
        self.lock_owner.map_or(true, |owner| owner == thread)
    }
}

impl fmt::Display for ScState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, state) in self.control.iter().enumerate() {
            match state {
                Some(state) => write!(f, "cs{}={} ", i, state.index())?,
                None => write!(f, "cs{}=- ", i)?,
            }
        }
        for ((space, address), value) in &self.memory {
            write!(f, "mem{}[{}]={} ", space, address, value)?;
        }
        for ((thread, reg), value) in &self.registers {
            write!(f, "reg{}.{}={} ", thread.index(), reg.index(), value)?;
        }
        if let Some(owner) = self.lock_owner {
            write!(f, "lock={}", owner.index())?;
        }
        Ok(())
    }
}

impl ScTransition {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn transition(&self) -> TransitionId {
        self.transition
    }

    pub fn destination(&self) -> &ScState {
        &self.destination
    }
}

impl<'a> ScSemantics<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self::with_options(program, SemanticsOptions::default())
    }

    pub fn with_options(program: &'a Program, options: SemanticsOptions) -> Self {
        let liveness = if options.liveness_optimization {
            Some(Liveness::compute(program))
        } else {
            None
        };

        Self {
            program,
            liveness,
            options,
        }
    }

    pub fn program(&self) -> &Program {
        self.program
    }

    //
    // Private Implementation
    //

    fn evaluate(&self, state: &ScState, thread: ThreadId, expression: ExprId) -> Domain {
        match self.program.expressions().get(expression) {
            Expression::Constant(value) => *value,
            Expression::Register(reg) => state.register_value(thread, *reg),
            Expression::Unary { op, operand } => op.apply(self.evaluate(state, thread, *operand)),
            Expression::Binary { op, left, right } => op.apply(
                self.evaluate(state, thread, *left),
                self.evaluate(state, thread, *right),
            ),
            Expression::NotBlocked => state.may_access_memory(thread) as Domain,
        }
    }

    /// Applies `instruction` to `state` in place. Returns `None` if the step
    /// is disabled, otherwise whether the step was purely thread-local.
    fn execute(
        &self,
        state: &mut ScState,
        thread: ThreadId,
        instruction: &Instruction,
    ) -> Option<bool> {
        match instruction {
            Instruction::Read {
                reg,
                address,
                space,
            } => {
                let address = self.evaluate(state, thread, *address);
                let value = state.memory_value(*space, address);
                state.set_register_value(thread, *reg, value);
                Some(false)
            }
            Instruction::Write {
                value,
                address,
                space,
            } => {
                let address = self.evaluate(state, thread, *address);
                let value = self.evaluate(state, thread, *value);
                state.set_memory_value(*space, address, value);
                Some(false)
            }
            Instruction::Mfence | Instruction::Noop => Some(true),
            Instruction::Local { reg, value } => {
                let value = self.evaluate(state, thread, *value);
                state.set_register_value(thread, *reg, value);
                Some(true)
            }
            Instruction::Condition(expression) => {
                if self.evaluate(state, thread, *expression) == 0 {
                    None
                } else {
                    Some(true)
                }
            }
            Instruction::Atomic(instructions) => {
                let mut local = true;
                for instruction in instructions {
                    local &= self.execute(state, thread, instruction)?;
                }
                Some(local)
            }
            Instruction::Lock => match state.lock_owner {
                Some(owner) if owner != thread => None,
                _ => {
                    state.lock_owner = Some(thread);
                    Some(false)
                }
            },
            Instruction::Unlock => {
                if state.lock_owner == Some(thread) {
                    state.lock_owner = None;
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    fn forget_dead_registers(&self, state: &mut ScState, thread: ThreadId, control: StateId) {
        if let Some(liveness) = &self.liveness {
            let live = liveness.live_registers(thread, control);
            state
                .registers
                .retain(|(owner, reg), _| *owner != thread || live.contains(reg));
        }
    }

    fn transitions_of_thread(
        &self,
        state: &ScState,
        thread: ThreadId,
        result: &mut Vec<ScTransition>,
    ) {
        let control = match state.control_state(thread) {
            Some(control) => control,
            None => return,
        };
        let code = self.program.thread(thread);

        for (id, transition) in code.outgoing(control) {
            let mut destination = state.clone();
            if let Some(local) = self.execute(&mut destination, thread, transition.instruction()) {
                destination.set_control_state(thread, transition.to());
                destination.favourite = if local && self.options.partial_order_reduction {
                    Some(thread)
                } else {
                    None
                };
                self.forget_dead_registers(&mut destination, thread, transition.to());

                result.push(ScTransition {
                    thread,
                    transition: id,
                    destination,
                });
            }
        }
    }
}

impl Automaton for ScSemantics<'_> {
    type State = ScState;
    type Transition = ScTransition;

    fn initial_state(&self) -> ScState {
        ScState {
            control: self
                .program
                .threads()
                .map(|(_, thread)| thread.initial_state())
                .collect(),
            ..ScState::default()
        }
    }

    fn is_final(&self, state: &ScState) -> bool {
        let (space, address) = self.program.interesting();
        state.memory_value(space, address) != 0
    }

    fn transitions_from(&self, state: &ScState) -> Vec<ScTransition> {
        let mut result = Vec::new();

        if let Some(favourite) = state.favourite {
            if state.may_access_memory(favourite) {
                self.transitions_of_thread(state, favourite, &mut result);
            }
            if !result.is_empty() {
                return result;
            }
        }

        for (thread, _) in self.program.threads() {
            if state.may_access_memory(thread) {
                self.transitions_of_thread(state, thread, &mut result);
            }
        }

        result
    }

    fn destination<'t>(&self, transition: &'t ScTransition) -> &'t ScState {
        &transition.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{BinaryOp, MEMORY_SPACE};
    use crate::search::{find_path_to_final_state, is_final_state_reachable};

    /// One thread that writes 1 to the interesting flag only if `mem[0]` holds 2.
    fn guarded_flag(writer_value: Domain) -> Program {
        let mut program = Program::new();
        let pool = program.expressions_mut();
        let r = pool.register_id("r");
        let r_expr = pool.register("r");
        let zero = pool.constant(0);
        let one = pool.constant(1);
        let two = pool.constant(2);
        let value = pool.constant(writer_value);
        let is_two = pool.binary(BinaryOp::Eq, r_expr, two);
        program.set_interesting(MEMORY_SPACE, 1);

        let writer = program.make_thread("writer");
        let thread = program.thread_mut(writer);
        let w0 = thread.make_state("w0");
        let w1 = thread.make_state("w1");
        thread.set_initial_state(w0);
        thread.make_transition(w0, w1, Instruction::write(value, zero));

        let reader = program.make_thread("reader");
        let thread = program.thread_mut(reader);
        let r0 = thread.make_state("r0");
        let r1 = thread.make_state("r1");
        let r2 = thread.make_state("r2");
        let r3 = thread.make_state("r3");
        thread.set_initial_state(r0);
        thread.make_transition(r0, r1, Instruction::read(r, zero));
        thread.make_transition(r1, r2, Instruction::Condition(is_two));
        thread.make_transition(r2, r3, Instruction::write(one, one));

        program
    }

    #[test]
    fn flag_is_reachable_only_with_the_right_value() {
        assert!(is_final_state_reachable(&ScSemantics::new(&guarded_flag(2))));
        assert!(!is_final_state_reachable(&ScSemantics::new(&guarded_flag(3))));
    }

    #[test]
    fn witness_interleaves_both_threads() {
        let program = guarded_flag(2);
        let semantics = ScSemantics::new(&program);
        let path = find_path_to_final_state(&semantics).unwrap();
        let threads: Vec<_> = path
            .iter()
            .map(|t| program.thread(t.thread()).name().to_string())
            .collect();

        assert_eq!(threads, vec!["writer", "reader", "reader", "reader"]);
    }

    #[test]
    fn reductions_do_not_change_the_verdict() {
        for writer_value in &[2, 5] {
            let program = guarded_flag(*writer_value);
            let expected = *writer_value == 2;
            for por in &[false, true] {
                for liveness in &[false, true] {
                    let options = SemanticsOptions {
                        partial_order_reduction: *por,
                        liveness_optimization: *liveness,
                    };
                    let semantics = ScSemantics::with_options(&program, options);
                    assert_eq!(is_final_state_reachable(&semantics), expected);
                }
            }
        }
    }

    #[test]
    fn dead_registers_are_forgotten() {
        let program = guarded_flag(2);
        let semantics = ScSemantics::new(&program);
        let reader = program.find_thread("reader").unwrap();
        let r = program.expressions().find_register("r").unwrap();

        let mut state = semantics.initial_state();
        state.set_memory_value(MEMORY_SPACE, 0, 2);
        let after_read = semantics
            .transitions_from(&state)
            .into_iter()
            .find(|t| t.thread() == reader)
            .unwrap();
        assert_eq!(after_read.destination().register_value(reader, r), 2);

        // After the condition `r` is never read again.
        let after_condition = semantics
            .transitions_from(after_read.destination())
            .into_iter()
            .find(|t| t.thread() == reader)
            .unwrap();
        assert_eq!(after_condition.destination().register_value(reader, r), 0);

        let mut with_garbage = after_condition.destination().clone();
        with_garbage.set_register_value(reader, r, 9);
        let control = with_garbage.control_state(reader).unwrap();
        semantics.forget_dead_registers(&mut with_garbage, reader, control);
        assert_eq!(&with_garbage, after_condition.destination());
    }

    #[test]
    fn local_steps_make_the_thread_favourite() {
        let program = guarded_flag(2);
        let semantics = ScSemantics::new(&program);
        let reader = program.find_thread("reader").unwrap();

        let mut state = semantics.initial_state();
        state.set_memory_value(MEMORY_SPACE, 0, 2);
        let after_read = semantics
            .transitions_from(&state)
            .into_iter()
            .find(|t| t.thread() == reader)
            .unwrap();
        assert_eq!(after_read.destination().favourite(), None);

        let after_condition = semantics
            .transitions_from(after_read.destination())
            .into_iter()
            .find(|t| t.thread() == reader)
            .unwrap();
        assert_eq!(after_condition.destination().favourite(), Some(reader));

        // The writer is still enabled but the favourite runs alone.
        let successors = semantics.transitions_from(after_condition.destination());
        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].thread(), reader);
    }

    #[test]
    fn atomic_steps_are_all_or_nothing() {
        let mut program = Program::new();
        let pool = program.expressions_mut();
        let zero = pool.constant(0);
        let one = pool.constant(1);
        let t = program.make_thread("t");
        let thread = program.thread_mut(t);
        let q0 = thread.make_state("q0");
        let q1 = thread.make_state("q1");
        thread.set_initial_state(q0);
        thread.make_transition(
            q0,
            q1,
            Instruction::Atomic(vec![Instruction::write(one, zero), Instruction::Condition(zero)]),
        );
        thread.make_transition(
            q0,
            q1,
            Instruction::Atomic(vec![Instruction::Noop, Instruction::Condition(one)]),
        );

        let semantics = ScSemantics::new(&program);
        let successors = semantics.transitions_from(&semantics.initial_state());

        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].destination().memory_value(MEMORY_SPACE, 0), 0);
        assert_eq!(successors[0].destination().favourite(), Some(t));
    }

    #[test]
    fn lock_owner_runs_alone() {
        let mut program = Program::new();
        let pool = program.expressions_mut();
        let zero = pool.constant(0);
        let one = pool.constant(1);
        let mut threads = Vec::new();
        for name in &["a", "b"] {
            let id = program.make_thread(name);
            let thread = program.thread_mut(id);
            let q0 = thread.make_state("q0");
            let q1 = thread.make_state("q1");
            let q2 = thread.make_state("q2");
            thread.set_initial_state(q0);
            thread.make_transition(q0, q1, Instruction::Lock);
            thread.make_transition(q1, q2, Instruction::write(one, zero));
            thread.make_transition(q2, q0, Instruction::Unlock);
            threads.push(id);
        }

        let semantics = ScSemantics::new(&program);
        let initial = semantics.initial_state();
        let successors = semantics.transitions_from(&initial);
        assert_eq!(successors.len(), 2);

        let locked = successors[0].destination();
        assert_eq!(locked.lock_owner(), Some(threads[0]));
        let next = semantics.transitions_from(locked);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].thread(), threads[0]);

        let unlocked = semantics.transitions_from(next[0].destination());
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].destination().lock_owner(), None);
    }

    #[test]
    fn not_blocked_reflects_the_lock_owner() {
        let mut program = Program::new();
        let pool = program.expressions_mut();
        let free = pool.not_blocked();
        let a = program.make_thread("a");
        let b = program.make_thread("b");
        let semantics = ScSemantics::new(&program);

        let mut state = ScState {
            control: vec![None, None],
            ..ScState::default()
        };
        assert_eq!(semantics.evaluate(&state, a, free), 1);
        state.lock_owner = Some(a);
        assert_eq!(semantics.evaluate(&state, a, free), 1);
        assert_eq!(semantics.evaluate(&state, b, free), 0);
    }
}
