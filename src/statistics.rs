//! Run counters shared between feasibility workers.

use crate::program::Program;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct Statistics {
    pub threads: AtomicUsize,
    pub states: AtomicUsize,
    pub transitions: AtomicUsize,
    pub potential_attacks: AtomicUsize,
    /// Pairs rejected because no fence-free path joins the write to the read.
    pub structurally_infeasible: AtomicUsize,
    /// Pairs rejected by the search on the reduced program.
    pub search_infeasible: AtomicUsize,
    pub feasible_attacks: AtomicUsize,
    pub fences: AtomicUsize,
    pub explored_states: AtomicUsize,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_program(&self, program: &Program) {
        self.threads.fetch_add(program.thread_count(), Ordering::Relaxed);
        for (_, thread) in program.threads() {
            self.states.fetch_add(thread.state_count(), Ordering::Relaxed);
            self.transitions.fetch_add(thread.transition_count(), Ordering::Relaxed);
        }
    }

    pub fn add(counter: &AtomicUsize, amount: usize) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rows = [
            ("threads", &self.threads),
            ("states", &self.states),
            ("transitions", &self.transitions),
            ("potential attacks", &self.potential_attacks),
            ("structurally infeasible", &self.structurally_infeasible),
            ("search infeasible", &self.search_infeasible),
            ("feasible attacks", &self.feasible_attacks),
            ("fences", &self.fences),
            ("explored states", &self.explored_states),
        ];
        for (name, counter) in rows.iter() {
            writeln!(f, "{:<24} {}", name, Statistics::get(counter))?;
        }
        Ok(())
    }
}
