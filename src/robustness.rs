//! # Whole-program checks
//!
//! Robustness of a complete program, SC reachability of the final states of
//! its threads, materialisation of fence sets and witness traces of attacks.

use crate::fences::{Attack, Checker, FenceSet, Fenced};
use crate::program::{BinaryOp, Domain, Instruction, Program, StateId, Thread, ThreadId};
use crate::reduction::{reduce, ReductionOptions, SERVICE_SPACE, TMP_REGISTER};
use crate::search::{find_path_to_final_state, Dfs};
use crate::semantics::{ScSemantics, SemanticsOptions};
use crate::statistics::Statistics;
use log::{debug, info};
use rayon::prelude::*;
use std::fmt;

//
// Public Interface
//

/// One step of an attack witness on the reduced program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceStep {
    pub thread: String,
    pub from: String,
    pub to: String,
    pub instruction: String,
}

/// Checks all threads as potential attackers on a single reduced program.
pub fn is_robust(checker: &Checker) -> bool {
    let options = ReductionOptions {
        search_for_tdr_only: checker.options().search_for_tdr_only,
        guard_memory_lock: checker.options().guard_memory_lock,
        ..ReductionOptions::default()
    };

    let robust = time_info!("robustness check", { !reaches_success(checker, &options) });
    info!("program is {}robust", if robust { "" } else { "not " });

    robust
}

/// Checks every thread as the attacker on its own reduced program, in parallel.
pub fn is_robust_parallel(checker: &Checker) -> bool {
    let program = checker.program();
    let attackers: Vec<ThreadId> = program.threads().map(|(id, _)| id).collect();

    let attacked = time_info!("parallel robustness check", {
        attackers.par_iter().any(|attacker| {
            let options = ReductionOptions {
                search_for_tdr_only: checker.options().search_for_tdr_only,
                guard_memory_lock: checker.options().guard_memory_lock,
                attacker: Some(*attacker),
                ..ReductionOptions::default()
            };
            let attacked = reaches_success(checker, &options);
            debug!(
                "thread {} {} attack",
                program.thread(*attacker).name(),
                if attacked { "can" } else { "cannot" }
            );
            attacked
        })
    });

    !attacked
}

/// Whether all threads that declare a final state can be in it at the same
/// time under SC. Returns `false` if no thread declares one.
pub fn is_sc_reachable(program: &Program, options: SemanticsOptions) -> bool {
    let finishing: Vec<ThreadId> = program
        .threads()
        .filter(|(_, thread)| thread.final_state().is_some())
        .map(|(id, _)| id)
        .collect();
    if finishing.is_empty() {
        return false;
    }

    let mut program = program.clone();
    let pool = program.expressions_mut();
    let tmp = pool.register_id(TMP_REGISTER);
    let tmp_expr = pool.register_expr(tmp);
    let one = pool.constant(1);
    let counter = pool.constant(ARRIVED_CELL);
    let flag = pool.constant(ALL_ARRIVED_CELL);
    let last = pool.constant(finishing.len() as Domain - 1);
    let is_last = pool.binary(BinaryOp::Eq, tmp_expr, last);
    let is_not_last = pool.binary(BinaryOp::Neq, tmp_expr, last);
    let increment = pool.binary(BinaryOp::Add, tmp_expr, one);

    for id in finishing {
        let thread = program.thread_mut(id);
        let last_state = match thread.final_state() {
            Some(state) => state,
            None => continue,
        };
        let arrived = unique_state(thread, "arrived");
        let read_counter = Instruction::Read {
            reg: tmp,
            address: counter,
            space: SERVICE_SPACE,
        };

        thread.make_transition(
            last_state,
            arrived,
            Instruction::Atomic(vec![
                read_counter.clone(),
                Instruction::Condition(is_not_last),
                Instruction::Write {
                    value: increment,
                    address: counter,
                    space: SERVICE_SPACE,
                },
            ]),
        );
        thread.make_transition(
            last_state,
            arrived,
            Instruction::Atomic(vec![
                read_counter,
                Instruction::Condition(is_last),
                Instruction::Write {
                    value: one,
                    address: flag,
                    space: SERVICE_SPACE,
                },
            ]),
        );
    }
    program.set_interesting(SERVICE_SPACE, ALL_ARRIVED_CELL);

    let semantics = ScSemantics::with_options(&program, options);
    let mut dfs = Dfs::new(&semantics);
    let reachable = dfs.is_final_state_reachable();
    debug!("final states reachable: {} ({} states)", reachable, dfs.visited_count());

    reachable
}

/// Returns a copy of `program` where every incoming edge of a fenced state
/// passes through a new `mfence` first. State ids of `program` stay valid.
pub fn insert_fences(program: &Program, fences: &FenceSet) -> Program {
    let mut result = Program::with_expressions(program.expressions().clone());
    result.set_memory_size(program.memory_size());
    let (space, address) = program.interesting();
    result.set_interesting(space, address);

    for (id, thread) in program.threads() {
        let mut copy = Thread::new(thread.name());
        for (_, state) in thread.states() {
            copy.make_state(state.name());
        }
        if let Some(initial) = thread.initial_state() {
            copy.set_initial_state(initial);
        }
        if let Some(last) = thread.final_state() {
            copy.set_final_state(last);
        }

        let fenced: Vec<StateId> = fences
            .iter()
            .filter(|fence| fence.thread == id)
            .map(|fence| fence.state)
            .collect();
        let mut entries = Vec::with_capacity(fenced.len());
        for state in &fenced {
            let name = format!("{}_mfence", thread.state(*state).name());
            let entry = unique_state(&mut copy, &name);
            copy.make_transition(entry, *state, Instruction::Mfence);
            entries.push((*state, entry));
        }

        for (_, transition) in thread.transitions() {
            let to = entries
                .iter()
                .find(|(state, _)| *state == transition.to())
                .map_or(transition.to(), |(_, entry)| *entry);
            copy.make_transition(transition.from(), to, transition.instruction().clone());
        }

        result.add_thread(copy);
    }

    result
}

/// Replays a feasible attack on its reduced program. Returns `None` if the
/// attack is not feasible under `fenced`.
pub fn attack_trace(checker: &Checker, attack: &Attack, fenced: &Fenced) -> Option<Vec<TraceStep>> {
    let options =
        checker.reduction_options(attack.attacker(), attack.write(), attack.read(), fenced);
    let reduced = reduce(checker.program(), &options);
    let semantics = ScSemantics::with_options(&reduced, checker.options().semantics);

    let path = find_path_to_final_state(&semantics)?;
    let steps = path
        .iter()
        .map(|step| {
            let thread = reduced.thread(step.thread());
            let transition = thread.transition(step.transition());
            TraceStep {
                thread: thread.name().to_string(),
                from: thread.state(transition.from()).name().to_string(),
                to: thread.state(transition.to()).name().to_string(),
                instruction: transition.instruction().display(reduced.expressions()).to_string(),
            }
        })
        .collect();

    Some(steps)
}

impl fmt::Display for TraceStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} -> {}: {}", self.thread, self.from, self.to, self.instruction)
    }
}

//
// Private Implementation
//

const ARRIVED_CELL: Domain = 0;
const ALL_ARRIVED_CELL: Domain = 1;

fn reaches_success(checker: &Checker, options: &ReductionOptions) -> bool {
    let reduced = reduce(checker.program(), options);
    let semantics = ScSemantics::with_options(&reduced, checker.options().semantics);

    let mut dfs = Dfs::new(&semantics);
    let reachable = dfs.is_final_state_reachable();
    Statistics::add(&checker.statistics().explored_states, dfs.visited_count());

    reachable
}

fn unique_state(thread: &mut Thread, name: &str) -> StateId {
    let mut name = name.to_string();
    while thread.find_state(&name).is_some() {
        name.push('\'');
    }
    thread.make_state(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fences::{CheckerOptions, Fence};
    use crate::litmus::{message_passing, store_buffering};

    fn checker(program: &Program) -> Checker<'_> {
        Checker::new(program, CheckerOptions::default())
    }

    #[test]
    fn store_buffering_is_not_robust() {
        let program = store_buffering(false);

        assert!(!is_robust(&checker(&program)));
        assert!(!is_robust_parallel(&checker(&program)));
    }

    #[test]
    fn fenced_store_buffering_and_message_passing_are_robust() {
        for program in &[store_buffering(true), message_passing()] {
            assert!(is_robust(&checker(program)));
            assert!(is_robust_parallel(&checker(program)));
        }
    }

    #[test]
    fn final_states_of_message_passing_are_reachable() {
        assert!(is_sc_reachable(&message_passing(), SemanticsOptions::default()));
    }

    #[test]
    fn no_final_states_means_unreachable() {
        let mut program = Program::new();
        let t = program.make_thread("t");
        let thread = program.thread_mut(t);
        let q0 = thread.make_state("q0");
        thread.set_initial_state(q0);

        assert!(!is_sc_reachable(&program, SemanticsOptions::default()));
    }

    #[test]
    fn blocked_thread_never_reaches_its_final_state() {
        let mut program = message_passing();
        let zero = program.expressions_mut().constant(0);
        let t1 = program.find_thread("t1").unwrap();
        let thread = program.thread_mut(t1);
        let q2 = thread.find_state("q2").unwrap();
        let stuck = thread.make_state("stuck");
        thread.make_transition(q2, stuck, Instruction::Condition(zero));
        thread.set_final_state(stuck);

        assert!(!is_sc_reachable(&program, SemanticsOptions::default()));
    }

    #[test]
    fn inserted_fences_reroute_incoming_edges() {
        let program = store_buffering(false);
        let t0 = program.find_thread("t0").unwrap();
        let q1 = program.thread(t0).find_state("q1").unwrap();
        let mut fences = FenceSet::new();
        fences.insert(Fence { thread: t0, state: q1 });

        let fenced = insert_fences(&program, &fences);
        let thread = fenced.thread(t0);
        let entry = thread.find_state("q1_mfence").unwrap();

        assert_eq!(thread.find_state("q1"), Some(q1));
        assert_eq!(thread.state(q1).incoming().len(), 1);
        let (_, fence) = thread.outgoing(entry).next().unwrap();
        assert_eq!(*fence.instruction(), Instruction::Mfence);
        assert_eq!(fence.to(), q1);
        assert_eq!(fenced.thread(fenced.find_thread("t1").unwrap()).transition_count(), 2);
    }

    #[test]
    fn attack_trace_ends_with_the_success_flag() {
        let program = store_buffering(false);
        let checker = checker(&program);
        let attack = checker.find_attacks().into_iter().next().unwrap();

        let trace = attack_trace(&checker, &attack, &Fenced::new()).unwrap();
        let attacker = program.thread(attack.attacker()).name();

        assert_eq!(trace[0].thread, attacker);
        assert!(trace[0].to.starts_with("a_"));
        assert!(trace.iter().any(|step| step.thread == attacker && step.to == "final"));
        let last = trace.last().unwrap();
        assert_ne!(last.thread, attacker);
        assert!(last.instruction.contains("mem4[1] <- 1"));
    }
}
