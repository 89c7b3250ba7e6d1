//! # Attack feasibility and fence insertion
//!
//! An attack of a thread is a pair of one of its writes and a later read of
//! its own. The attack is feasible if the reduced program can raise its
//! success flag when only that pair may start and finish the attack. Fences
//! are placed by a branch and bound search over the states the attacks pass
//! through.

use crate::program::{Instruction, Program, StateId, Thread, ThreadId, TransitionId};
use crate::reduction::{defaults, reduce, ReductionOptions};
use crate::search::Dfs;
use crate::semantics::{ScSemantics, SemanticsOptions};
use crate::statistics::Statistics;
use itertools::Itertools;
use log::{debug, info, trace};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

//
// Public Interface
//

/// Control states after which the attacker may not keep writes buffered.
pub type Fenced = HashSet<(ThreadId, StateId)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fence {
    pub thread: ThreadId,
    pub state: StateId,
}

pub type FenceSet = BTreeSet<Fence>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attack {
    attacker: ThreadId,
    write: TransitionId,
    read: TransitionId,
    intermediary: BTreeSet<StateId>,
}

#[derive(Clone, Copy, Debug)]
pub struct CheckerOptions {
    pub search_for_tdr_only: bool,
    pub guard_memory_lock: bool,
    pub semantics: SemanticsOptions,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            search_for_tdr_only: defaults::SEARCH_FOR_TDR_ONLY,
            guard_memory_lock: defaults::GUARD_MEMORY_LOCK,
            semantics: SemanticsOptions::default(),
        }
    }
}

pub struct Checker<'a> {
    program: &'a Program,
    options: CheckerOptions,
    statistics: Arc<Statistics>,
}

pub fn is_attack_feasible(
    program: &Program,
    search_for_tdr_only: bool,
    attacker: ThreadId,
    write: TransitionId,
    read: TransitionId,
    fenced: &Fenced,
) -> bool {
    let options = CheckerOptions {
        search_for_tdr_only,
        ..CheckerOptions::default()
    };
    Checker::new(program, options).is_attack_feasible(attacker, write, read, fenced)
}

pub fn compute_fences(program: &Program, search_for_tdr_only: bool) -> FenceSet {
    let options = CheckerOptions {
        search_for_tdr_only,
        ..CheckerOptions::default()
    };
    Checker::new(program, options).compute_fences()
}

impl Attack {
    pub fn attacker(&self) -> ThreadId {
        self.attacker
    }

    pub fn write(&self) -> TransitionId {
        self.write
    }

    pub fn read(&self) -> TransitionId {
        self.read
    }

    /// States on fence-free paths from the destination of the write to the
    /// source of the read, both included.
    pub fn intermediary(&self) -> &BTreeSet<StateId> {
        &self.intermediary
    }
}

impl<'a> Checker<'a> {
    pub fn new(program: &'a Program, options: CheckerOptions) -> Self {
        Self::with_statistics(program, options, Arc::new(Statistics::new()))
    }

    pub fn with_statistics(
        program: &'a Program,
        options: CheckerOptions,
        statistics: Arc<Statistics>,
    ) -> Self {
        Self {
            program,
            options,
            statistics,
        }
    }

    pub fn program(&self) -> &Program {
        self.program
    }

    pub fn options(&self) -> &CheckerOptions {
        &self.options
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    /// Every write paired with every read of the same thread.
    pub fn potential_attacks(&self) -> Vec<(ThreadId, TransitionId, TransitionId)> {
        let mut result = Vec::new();

        for (id, thread) in self.program.threads() {
            let writes = thread.transitions().filter(|(_, t)| t.instruction().is_write());
            let reads: Vec<_> = thread
                .transitions()
                .filter(|(_, t)| t.instruction().is_read())
                .map(|(read, _)| read)
                .collect();

            for ((write, _), read) in writes.cartesian_product(reads) {
                result.push((id, write, read));
            }
        }

        result
    }

    /// Returns `None` if no fence-free path joins `write` to `read`.
    pub fn intermediary_states(
        &self,
        attacker: ThreadId,
        write: TransitionId,
        read: TransitionId,
    ) -> Option<BTreeSet<StateId>> {
        let thread = self.program.thread(attacker);
        let forward = passable_closure(thread, thread.transition(write).to(), Direction::Forward);
        let backward =
            passable_closure(thread, thread.transition(read).from(), Direction::Backward);

        let intermediary: BTreeSet<StateId> = forward.intersection(&backward).copied().collect();
        if intermediary.is_empty() {
            None
        } else {
            Some(intermediary)
        }
    }

    pub fn is_attack_feasible(
        &self,
        attacker: ThreadId,
        write: TransitionId,
        read: TransitionId,
        fenced: &Fenced,
    ) -> bool {
        if self.intermediary_states(attacker, write, read).is_none() {
            return false;
        }
        self.search(attacker, write, read, fenced)
    }

    /// All feasible attacks, checked in parallel, in the order of
    /// [`Checker::potential_attacks`].
    pub fn find_attacks(&self) -> Vec<Attack> {
        let candidates = self.potential_attacks();
        Statistics::add(&self.statistics.potential_attacks, candidates.len());

        let results: Vec<Option<Attack>> = candidates
            .par_iter()
            .map(|(attacker, write, read)| self.check(*attacker, *write, *read))
            .collect();

        let attacks: Vec<Attack> = results.into_iter().flatten().collect();
        info!(
            "{} of {} potential attacks are feasible",
            attacks.len(),
            candidates.len()
        );

        attacks
    }

    pub fn compute_fences(&self) -> FenceSet {
        let attacks = time_debug!("attack feasibility", { self.find_attacks() });

        let mut by_attacker: BTreeMap<ThreadId, Vec<Attack>> = BTreeMap::new();
        for attack in attacks {
            by_attacker.entry(attack.attacker).or_default().push(attack);
        }

        let fences = time_debug!("fence search", {
            by_attacker
                .par_iter()
                .map(|(attacker, attacks)| self.fences_for_attacker(*attacker, attacks))
                .reduce(FenceSet::new, |mut all, fences| {
                    all.extend(fences);
                    all
                })
        });
        Statistics::add(&self.statistics.fences, fences.len());

        fences
    }

    //
    // Private Implementation
    //

    fn check(&self, attacker: ThreadId, write: TransitionId, read: TransitionId) -> Option<Attack> {
        let intermediary = match self.intermediary_states(attacker, write, read) {
            Some(intermediary) => intermediary,
            None => {
                Statistics::add(&self.statistics.structurally_infeasible, 1);
                return None;
            }
        };

        if self.search(attacker, write, read, &Fenced::new()) {
            Statistics::add(&self.statistics.feasible_attacks, 1);
            debug!(
                "feasible attack by {}: {} -> {}",
                self.program.thread(attacker).name(),
                self.describe(attacker, write),
                self.describe(attacker, read)
            );
            Some(Attack {
                attacker,
                write,
                read,
                intermediary,
            })
        } else {
            Statistics::add(&self.statistics.search_infeasible, 1);
            None
        }
    }

    fn search(
        &self,
        attacker: ThreadId,
        write: TransitionId,
        read: TransitionId,
        fenced: &Fenced,
    ) -> bool {
        let reduced = reduce(self.program, &self.reduction_options(attacker, write, read, fenced));
        let semantics = ScSemantics::with_options(&reduced, self.options.semantics);

        let mut dfs = Dfs::new(&semantics);
        let reachable = dfs.is_final_state_reachable();
        Statistics::add(&self.statistics.explored_states, dfs.visited_count());

        reachable
    }

    pub(crate) fn reduction_options(
        &self,
        attacker: ThreadId,
        write: TransitionId,
        read: TransitionId,
        fenced: &Fenced,
    ) -> ReductionOptions {
        ReductionOptions {
            search_for_tdr_only: self.options.search_for_tdr_only,
            attacker: Some(attacker),
            attack_write: Some(write),
            attack_read: Some(read),
            fenced: fenced.clone(),
            guard_memory_lock: self.options.guard_memory_lock,
        }
    }

    fn fences_for_attacker(&self, attacker: ThreadId, attacks: &[Attack]) -> FenceSet {
        let thread = self.program.thread(attacker);
        let to_fences = |states: &[StateId]| -> FenceSet {
            states
                .iter()
                .map(|state| Fence {
                    thread: attacker,
                    state: *state,
                })
                .collect()
        };

        let trivial: Vec<StateId> = attacks
            .iter()
            .map(|attack| thread.transition(attack.write).to())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut occurrences: BTreeMap<StateId, usize> = BTreeMap::new();
        for attack in attacks {
            for state in &attack.intermediary {
                *occurrences.entry(*state).or_default() += 1;
            }
        }
        let candidates: Vec<StateId> = trivial
            .iter()
            .copied()
            .chain(
                occurrences
                    .into_iter()
                    .filter(|(_, count)| *count >= 2)
                    .map(|(state, _)| state),
            )
            .unique()
            .collect();

        debug!(
            "thread {}: {} attacks, {} trivial fences, {} candidates",
            thread.name(),
            attacks.len(),
            trivial.len(),
            candidates.len()
        );

        for size in 1..trivial.len() {
            for subset in candidates.iter().copied().combinations(size) {
                let hits_every_attack = attacks
                    .iter()
                    .all(|attack| subset.iter().any(|state| attack.intermediary.contains(state)));
                if !hits_every_attack {
                    continue;
                }

                let fenced: Fenced = subset.iter().map(|state| (attacker, *state)).collect();
                let defeats_every_attack = attacks
                    .iter()
                    .all(|attack| !self.search(attacker, attack.write, attack.read, &fenced));
                if defeats_every_attack {
                    trace!("thread {}: fences {:?} suffice", thread.name(), subset);
                    return to_fences(&subset[..]);
                }
            }
        }

        to_fences(&trivial[..])
    }

    fn describe(&self, thread: ThreadId, transition: TransitionId) -> String {
        let thread = self.program.thread(thread);
        let transition = thread.transition(transition);
        format!(
            "{} ({} -> {})",
            transition.instruction().display(self.program.expressions()),
            thread.state(transition.from()).name(),
            thread.state(transition.to()).name()
        )
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Edges a thread may take while its store buffer is non-empty.
fn is_passable(instruction: &Instruction) -> bool {
    match instruction {
        Instruction::Read { .. }
        | Instruction::Write { .. }
        | Instruction::Local { .. }
        | Instruction::Condition(_)
        | Instruction::Noop => true,
        Instruction::Mfence | Instruction::Lock | Instruction::Unlock => false,
        Instruction::Atomic(_) => {
            panic!("atomic instructions have no structural feasibility check")
        }
    }
}

fn passable_closure(thread: &Thread, start: StateId, direction: Direction) -> BTreeSet<StateId> {
    let mut reached = BTreeSet::new();
    let mut pending = vec![start];

    while let Some(state) = pending.pop() {
        if !reached.insert(state) {
            continue;
        }
        let edges = match direction {
            Direction::Forward => thread.state(state).outgoing(),
            Direction::Backward => thread.state(state).incoming(),
        };
        for id in edges {
            let transition = thread.transition(*id);
            if is_passable(transition.instruction()) {
                pending.push(match direction {
                    Direction::Forward => transition.to(),
                    Direction::Backward => transition.from(),
                });
            }
        }
    }

    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::litmus::{store_buffering, writes_before_read};

    fn find(program: &Program, thread: &str, from: &str) -> (ThreadId, TransitionId) {
        let id = program.find_thread(thread).unwrap();
        let code = program.thread(id);
        let state = code.find_state(from).unwrap();
        let (transition, _) = code.outgoing(state).next().unwrap();
        (id, transition)
    }

    fn state(program: &Program, thread: ThreadId, name: &str) -> StateId {
        program.thread(thread).find_state(name).unwrap()
    }

    #[test]
    fn intermediary_states_span_write_to_read() {
        let program = writes_before_read(false);
        let checker = Checker::new(&program, CheckerOptions::default());
        let (t0, write_x) = find(&program, "t0", "q0");
        let (_, write_z) = find(&program, "t0", "q1");
        let (_, read_y) = find(&program, "t0", "q2");

        let q1 = state(&program, t0, "q1");
        let q2 = state(&program, t0, "q2");
        assert_eq!(
            checker.intermediary_states(t0, write_x, read_y),
            Some(vec![q1, q2].into_iter().collect())
        );
        assert_eq!(
            checker.intermediary_states(t0, write_z, read_y),
            Some(vec![q2].into_iter().collect())
        );
    }

    #[test]
    fn fences_cut_the_structural_path() {
        let program = store_buffering(true);
        let checker = Checker::new(&program, CheckerOptions::default());
        let (t0, write) = find(&program, "t0", "q0");
        let (_, read) = find(&program, "t0", "q2");

        assert_eq!(checker.intermediary_states(t0, write, read), None);
        assert!(!checker.is_attack_feasible(t0, write, read, &Fenced::new()));
    }

    #[test]
    fn reads_before_the_write_are_not_attacks() {
        let program = writes_before_read(false);
        let checker = Checker::new(&program, CheckerOptions::default());
        let (t1, write) = find(&program, "t1", "q0");
        let (_, read) = find(&program, "t1", "q1");
        let (_, later_read) = find(&program, "t1", "q2");

        assert!(checker.intermediary_states(t1, write, read).is_some());
        assert!(checker.intermediary_states(t1, write, later_read).is_some());

        let mut program = writes_before_read(false);
        let pool = program.expressions_mut();
        let one = pool.constant(1);
        let x = pool.constant(0);
        let r = pool.register_id("r");
        let t2 = program.make_thread("t2");
        let thread = program.thread_mut(t2);
        let q0 = thread.make_state("q0");
        let q1 = thread.make_state("q1");
        let q2 = thread.make_state("q2");
        thread.set_initial_state(q0);
        let read = thread.make_transition(q0, q1, Instruction::read(r, x));
        let write = thread.make_transition(q1, q2, Instruction::write(one, x));

        let checker = Checker::new(&program, CheckerOptions::default());
        assert_eq!(checker.intermediary_states(t2, write, read), None);
    }

    #[test]
    fn potential_attacks_pair_writes_with_reads() {
        let program = writes_before_read(false);
        let checker = Checker::new(&program, CheckerOptions::default());

        // t0 has two writes and one read, t1 one write and two reads.
        assert_eq!(checker.potential_attacks().len(), 4);
    }

    #[test]
    fn trivial_fences_defeat_every_attack() {
        let program = writes_before_read(false);
        let checker = Checker::new(&program, CheckerOptions::default());
        let attacks = checker.find_attacks();
        assert!(!attacks.is_empty());

        for attack in &attacks {
            let thread = program.thread(attack.attacker());
            let fenced: Fenced = attacks
                .iter()
                .filter(|other| other.attacker() == attack.attacker())
                .map(|other| (attack.attacker(), thread.transition(other.write()).to()))
                .collect();
            assert!(!checker.is_attack_feasible(
                attack.attacker(),
                attack.write(),
                attack.read(),
                &fenced
            ));
        }
    }

    #[test]
    fn shared_state_in_front_of_the_read_is_the_minimal_fence() {
        let program = writes_before_read(false);
        let checker = Checker::new(&program, CheckerOptions::default());
        let t0 = program.find_thread("t0").unwrap();
        let t1 = program.find_thread("t1").unwrap();

        let fences = checker.compute_fences();
        let expected: FenceSet = vec![
            Fence {
                thread: t0,
                state: state(&program, t0, "q2"),
            },
            Fence {
                thread: t1,
                state: state(&program, t1, "q1"),
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(fences, expected);
        assert_eq!(Statistics::get(&checker.statistics().fences), 2);
        assert_eq!(Statistics::get(&checker.statistics().feasible_attacks), 4);
    }
}
