//! # Reduction of TSO attacks to SC reachability
//!
//! Rewrites a program into one where a flag in [`SERVICE_SPACE`] becomes
//! reachable under sequential consistency iff the input admits an attack
//! under TSO. Every control state `s` of the input is copied up to three
//! times:
//!
//! - `o_s`: ordinary SC execution;
//! - `a_s`: the attacker, whose writes since the attack started are still
//!   sitting in its store buffer;
//! - `h_s`: a helper, whose execution happens after the attacker's last read
//!   and which tries to reach the address of the delayed write.
//!
//! The attacker reaches the extra state `final` with its attacking read.

use crate::program::{
    BinaryOp, Domain, ExprId, ExpressionPool, Instruction, Program, RegisterId, Space, StateId,
    Thread, ThreadId, Transition, TransitionId, MEMORY_SPACE,
};
use log::debug;
use std::collections::HashSet;

//
// Public Interface
//

/// Values of writes delayed by the attacker.
pub const BUFFER_SPACE: Space = 1;
/// Non-zero for addresses with a value in [`BUFFER_SPACE`].
pub const IS_BUFFERED_SPACE: Space = 2;
/// Happens-before tag of every address, one of [`HB_READ`] or [`HB_WRITE`].
pub const HB_SPACE: Space = 3;
/// Bookkeeping cells of the attack.
pub const SERVICE_SPACE: Space = 4;

pub const ATTACK_ADDRESS_CELL: Domain = 0;
pub const SUCCESS_CELL: Domain = 1;
pub const ATTACK_STARTED_CELL: Domain = 2;
pub const ATTACK_DONE_CELL: Domain = 3;
const SERVICE_CELLS: Domain = 4;

pub const HB_READ: Domain = 1;
pub const HB_WRITE: Domain = 2;

pub use crate::program::TMP_REGISTER;

pub const ORIGINAL_PREFIX: &str = "o_";
pub const ATTACKER_PREFIX: &str = "a_";
pub const HELPER_PREFIX: &str = "h_";
pub const FINAL_STATE: &str = "final";

pub mod defaults {
    pub const SEARCH_FOR_TDR_ONLY: bool = false;
    pub const GUARD_MEMORY_LOCK: bool = false;
}

#[derive(Clone, Debug)]
pub struct ReductionOptions {
    /// Look for triangular data races instead of full attacks: no buffering,
    /// no helpers.
    pub search_for_tdr_only: bool,
    /// Only this thread may attack. All threads may if unset.
    pub attacker: Option<ThreadId>,
    /// Only this write of the attacker may start the attack.
    pub attack_write: Option<TransitionId>,
    /// Only this read of the attacker may finish the attack.
    pub attack_read: Option<TransitionId>,
    /// States after which the attacker may not continue with a non-empty buffer.
    pub fenced: HashSet<(ThreadId, StateId)>,
    /// Prefix memory accesses of ordinary execution with a `NotBlocked` check.
    pub guard_memory_lock: bool,
}

impl Default for ReductionOptions {
    fn default() -> Self {
        Self {
            search_for_tdr_only: defaults::SEARCH_FOR_TDR_ONLY,
            attacker: None,
            attack_write: None,
            attack_read: None,
            fenced: HashSet::new(),
            guard_memory_lock: defaults::GUARD_MEMORY_LOCK,
        }
    }
}

/// Builds the augmented program. The result shares all expression ids of
/// `program` and flags success at ([`SERVICE_SPACE`], [`SUCCESS_CELL`]).
///
/// Panics if `program` contains atomic instructions or accesses a memory
/// space other than [`MEMORY_SPACE`].
pub fn reduce(program: &Program, options: &ReductionOptions) -> Program {
    let mut encoder = Encoder::new(program.expressions().clone(), options);

    let threads: Vec<Thread> = program
        .threads()
        .map(|(id, thread)| encoder.reduce_thread(id, thread))
        .collect();

    let mut result = Program::with_expressions(encoder.pool);
    for thread in threads {
        result.add_thread(thread);
    }
    result.set_memory_size(program.memory_size().max(SERVICE_CELLS));
    result.set_interesting(SERVICE_SPACE, SUCCESS_CELL);

    debug!(
        "reduced {} threads to {} states and {} transitions (attacker: {:?}, tdr: {})",
        result.thread_count(),
        result.threads().map(|(_, t)| t.state_count()).sum::<usize>(),
        result.threads().map(|(_, t)| t.transition_count()).sum::<usize>(),
        options.attacker,
        options.search_for_tdr_only
    );

    result
}

//
// Private Implementation
//

struct Encoder<'a> {
    options: &'a ReductionOptions,
    pool: ExpressionPool,
    tmp: RegisterId,
    one: ExprId,
    attack_address_cell: ExprId,
    success_cell: ExprId,
    started_cell: ExprId,
    done_cell: ExprId,
    hb_read: ExprId,
    hb_write: ExprId,
    not_blocked: ExprId,
    tmp_is_zero: ExprId,
    tmp_is_one: ExprId,
    tmp_is_not_zero: ExprId,
    tmp_is_hb_write: ExprId,
    promoted_tag: ExprId,
}

/// The control states of one input transition in the augmented thread.
struct Endpoints {
    from: StateId,
    to: StateId,
    terminal: StateId,
}

impl<'a> Encoder<'a> {
    fn new(mut pool: ExpressionPool, options: &'a ReductionOptions) -> Self {
        let tmp = pool.register_id(TMP_REGISTER);
        let tmp_expr = pool.register_expr(tmp);
        let zero = pool.constant(0);
        let one = pool.constant(1);
        let hb_write = pool.constant(HB_WRITE);
        let tmp_is_zero = pool.binary(BinaryOp::Eq, tmp_expr, zero);
        let tmp_is_one = pool.binary(BinaryOp::Eq, tmp_expr, one);
        let tmp_is_not_zero = pool.binary(BinaryOp::Neq, tmp_expr, zero);
        let tmp_is_hb_write = pool.binary(BinaryOp::Eq, tmp_expr, hb_write);

        Self {
            options,
            tmp,
            one,
            attack_address_cell: pool.constant(ATTACK_ADDRESS_CELL),
            success_cell: pool.constant(SUCCESS_CELL),
            started_cell: pool.constant(ATTACK_STARTED_CELL),
            done_cell: pool.constant(ATTACK_DONE_CELL),
            hb_read: pool.constant(HB_READ),
            hb_write,
            not_blocked: pool.not_blocked(),
            tmp_is_zero,
            tmp_is_one,
            tmp_is_not_zero,
            tmp_is_hb_write,
            promoted_tag: pool.binary(BinaryOp::Add, tmp_expr, tmp_is_zero),
            pool,
        }
    }

    fn reduce_thread(&mut self, id: ThreadId, thread: &Thread) -> Thread {
        let mut result = Thread::new(thread.name());

        let original: Vec<StateId> = thread
            .states()
            .map(|(_, state)| result.make_state(&format!("{}{}", ORIGINAL_PREFIX, state.name())))
            .collect();
        if let Some(initial) = thread.initial_state() {
            result.set_initial_state(original[initial.index()]);
        }
        if let Some(last) = thread.final_state() {
            result.set_final_state(original[last.index()]);
        }

        let may_attack = self.options.attacker.map_or(true, |attacker| attacker == id);
        let may_help = !self.options.search_for_tdr_only && self.options.attacker != Some(id);
        let may_race = self.options.search_for_tdr_only && self.options.attacker != Some(id);

        for (transition_id, transition) in thread.transitions() {
            check_input(thread, transition.instruction());

            let from = original[transition.from().index()];
            let to = original[transition.to().index()];
            let instruction = self.guarded(transition.instruction());
            result.make_transition(from, to, instruction);

            if may_attack {
                self.encode_attacker(&mut result, thread, id, transition_id, transition, &original);
            }
            if may_help {
                self.encode_helper(&mut result, thread, transition, &original);
            }
            if may_race {
                self.encode_race(&mut result, transition, &original);
            }
        }

        result
    }

    fn guarded(&self, instruction: &Instruction) -> Instruction {
        if self.options.guard_memory_lock && (instruction.is_read() || instruction.is_write()) {
            Instruction::Atomic(vec![Instruction::Condition(self.not_blocked), instruction.clone()])
        } else {
            instruction.clone()
        }
    }

    fn encode_attacker(
        &mut self,
        result: &mut Thread,
        thread: &Thread,
        id: ThreadId,
        transition_id: TransitionId,
        transition: &Transition,
        original: &[StateId],
    ) {
        let states = endpoints(result, thread, transition, ATTACKER_PREFIX);
        let fenced = self.options.fenced.contains(&(id, transition.from()));
        let tdr = self.options.search_for_tdr_only;

        match transition.instruction() {
            Instruction::Write { value, address, .. } => {
                if self.options.attack_write.map_or(true, |w| w == transition_id) {
                    let mut start = vec![
                        self.read_service(self.started_cell),
                        Instruction::Condition(self.tmp_is_zero),
                        self.write_service(self.one, self.started_cell),
                        self.write_service(*address, self.attack_address_cell),
                    ];
                    start.extend(self.attacker_write(*value, *address));
                    result.make_transition(
                        original[transition.from().index()],
                        states.to,
                        Instruction::Atomic(start),
                    );
                }
                if !fenced {
                    let write = self.attacker_write(*value, *address);
                    result.make_transition(states.from, states.to, Instruction::Atomic(write));
                }
            }
            Instruction::Read { reg, address, .. } => {
                if fenced {
                    return;
                }
                if tdr {
                    let read = Instruction::read(*reg, *address);
                    result.make_transition(states.from, states.to, read);
                } else {
                    result.make_transition(
                        states.from,
                        states.to,
                        Instruction::Atomic(vec![
                            self.read_tmp(*address, IS_BUFFERED_SPACE),
                            Instruction::Condition(self.tmp_is_one),
                            read_from(*reg, *address, BUFFER_SPACE),
                        ]),
                    );
                    result.make_transition(
                        states.from,
                        states.to,
                        Instruction::Atomic(vec![
                            self.read_tmp(*address, IS_BUFFERED_SPACE),
                            Instruction::Condition(self.tmp_is_zero),
                            Instruction::read(*reg, *address),
                        ]),
                    );
                }
                if self.options.attack_read.map_or(true, |r| r == transition_id) {
                    let attack = if tdr {
                        vec![
                            Instruction::read(*reg, *address),
                            self.write_service(self.one, self.done_cell),
                        ]
                    } else {
                        vec![
                            self.read_tmp(*address, IS_BUFFERED_SPACE),
                            Instruction::Condition(self.tmp_is_zero),
                            write_to(self.hb_read, *address, HB_SPACE),
                            self.write_service(self.one, self.done_cell),
                            Instruction::read(*reg, *address),
                        ]
                    };
                    let attack = Instruction::Atomic(attack);
                    result.make_transition(states.from, states.terminal, attack);
                }
            }
            // A non-empty store buffer blocks these.
            Instruction::Mfence | Instruction::Lock | Instruction::Unlock => {}
            Instruction::Local { .. } | Instruction::Condition(_) | Instruction::Noop => {
                if !fenced {
                    let instruction = transition.instruction().clone();
                    result.make_transition(states.from, states.to, instruction);
                }
            }
            Instruction::Atomic(_) => {
                unreachable!("atomic instructions are rejected before encoding")
            }
        }
    }

    fn encode_helper(
        &mut self,
        result: &mut Thread,
        thread: &Thread,
        transition: &Transition,
        original: &[StateId],
    ) {
        let states = endpoints(result, thread, transition, HELPER_PREFIX);
        let from = original[transition.from().index()];

        match transition.instruction() {
            Instruction::Read { reg, address, .. } => {
                // Joins after an access of the chain that wrote the address.
                let join = vec![
                    self.read_tmp(*address, HB_SPACE),
                    Instruction::Condition(self.tmp_is_hb_write),
                ];
                let mut access = join.clone();
                access.push(Instruction::read(*reg, *address));
                result.make_transition(from, states.to, Instruction::Atomic(access));
                let mut success = join;
                success.extend(self.success_check(*address));
                result.make_transition(from, states.terminal, Instruction::Atomic(success));

                result.make_transition(
                    states.from,
                    states.to,
                    Instruction::Atomic(vec![
                        self.read_tmp(*address, HB_SPACE),
                        write_to(self.promoted_tag, *address, HB_SPACE),
                        Instruction::read(*reg, *address),
                    ]),
                );
                let success = self.success_check(*address);
                result.make_transition(states.from, states.terminal, Instruction::Atomic(success));
            }
            Instruction::Write { value, address, .. } => {
                // Joins after any access of the chain to the address.
                let join = vec![
                    self.read_tmp(*address, HB_SPACE),
                    Instruction::Condition(self.tmp_is_not_zero),
                ];
                let mut access = join.clone();
                access.push(write_to(self.hb_write, *address, HB_SPACE));
                access.push(Instruction::write(*value, *address));
                result.make_transition(from, states.to, Instruction::Atomic(access));
                let mut success = join;
                success.extend(self.success_check(*address));
                result.make_transition(from, states.terminal, Instruction::Atomic(success));

                result.make_transition(
                    states.from,
                    states.to,
                    Instruction::Atomic(vec![
                        write_to(self.hb_write, *address, HB_SPACE),
                        Instruction::write(*value, *address),
                    ]),
                );
                let success = self.success_check(*address);
                result.make_transition(states.from, states.terminal, Instruction::Atomic(success));
            }
            instruction => {
                result.make_transition(states.from, states.to, instruction.clone());
            }
        }
    }

    fn encode_race(&mut self, result: &mut Thread, transition: &Transition, original: &[StateId]) {
        let address = match transition.instruction() {
            Instruction::Read { address, .. } | Instruction::Write { address, .. } => *address,
            _ => return,
        };

        let mut race = vec![
            self.read_service(self.done_cell),
            Instruction::Condition(self.tmp_is_one),
        ];
        race.extend(self.success_check(address));

        let terminal = result.make_state(FINAL_STATE);
        let from = original[transition.from().index()];
        result.make_transition(from, terminal, Instruction::Atomic(race));
    }

    fn attacker_write(&self, value: ExprId, address: ExprId) -> Vec<Instruction> {
        if self.options.search_for_tdr_only {
            vec![Instruction::write(value, address)]
        } else {
            vec![
                write_to(value, address, BUFFER_SPACE),
                write_to(self.one, address, IS_BUFFERED_SPACE),
            ]
        }
    }

    /// Raises the success flag if `address` is the one of the delayed write.
    fn success_check(&mut self, address: ExprId) -> Vec<Instruction> {
        let tmp = self.pool.register_expr(self.tmp);
        let hits_attack = self.pool.binary(BinaryOp::Eq, tmp, address);

        vec![
            self.read_service(self.attack_address_cell),
            Instruction::Condition(hits_attack),
            self.write_service(self.one, self.success_cell),
        ]
    }

    fn read_tmp(&self, address: ExprId, space: Space) -> Instruction {
        read_from(self.tmp, address, space)
    }

    fn read_service(&self, cell: ExprId) -> Instruction {
        self.read_tmp(cell, SERVICE_SPACE)
    }

    fn write_service(&self, value: ExprId, cell: ExprId) -> Instruction {
        write_to(value, cell, SERVICE_SPACE)
    }
}

fn check_input(thread: &Thread, instruction: &Instruction) {
    match instruction {
        Instruction::Atomic(_) => panic!(
            "thread {} contains an atomic instruction, which cannot be reduced",
            thread.name()
        ),
        Instruction::Read { space, .. } | Instruction::Write { space, .. } => assert!(
            *space == MEMORY_SPACE,
            "thread {} accesses memory space {}, which is reserved for the reduction",
            thread.name(),
            space
        ),
        _ => {}
    }
}

fn endpoints(
    result: &mut Thread,
    thread: &Thread,
    transition: &Transition,
    prefix: &str,
) -> Endpoints {
    let from = thread.state(transition.from()).name();
    let to = thread.state(transition.to()).name();

    Endpoints {
        from: result.make_state(&format!("{}{}", prefix, from)),
        to: result.make_state(&format!("{}{}", prefix, to)),
        terminal: result.make_state(FINAL_STATE),
    }
}

fn read_from(reg: RegisterId, address: ExprId, space: Space) -> Instruction {
    Instruction::Read { reg, address, space }
}

fn write_to(value: ExprId, address: ExprId, space: Space) -> Instruction {
    Instruction::Write { value, address, space }
}
