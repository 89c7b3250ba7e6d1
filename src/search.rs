//! # Reachability search
//!
//! Depth-first exploration of any finite [`Automaton`]. Every state is
//! expanded at most once, so the search terminates whenever the reachable
//! state space is finite.

use log::trace;
use std::collections::HashSet;
use std::hash::Hash;

//
// Public Interface
//

pub trait Automaton {
    type State: Clone + Eq + Hash;
    type Transition;

    fn initial_state(&self) -> Self::State;
    fn is_final(&self, state: &Self::State) -> bool;

    /// Enumerates the transitions enabled in `state`. The order determines
    /// the order in which the search explores successors.
    fn transitions_from(&self, state: &Self::State) -> Vec<Self::Transition>;

    fn destination<'t>(&self, transition: &'t Self::Transition) -> &'t Self::State;
}

pub struct Dfs<'a, A: Automaton> {
    automaton: &'a A,
    visited: HashSet<A::State>,
}

pub fn is_final_state_reachable<A: Automaton>(automaton: &A) -> bool {
    Dfs::new(automaton).is_final_state_reachable()
}

/// Returns the transitions leading from the initial state to the first final
/// state found, or `None` if no final state is reachable.
pub fn find_path_to_final_state<A: Automaton>(automaton: &A) -> Option<Vec<A::Transition>> {
    Dfs::new(automaton).find_path_to_final_state()
}

impl<'a, A: Automaton> Dfs<'a, A> {
    pub fn new(automaton: &'a A) -> Self {
        Self {
            automaton,
            visited: HashSet::new(),
        }
    }

    pub fn is_final_state_reachable(&mut self) -> bool {
        self.explore(false).is_some()
    }

    pub fn find_path_to_final_state(&mut self) -> Option<Vec<A::Transition>> {
        self.explore(true)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    //
    // Private Implementation
    //

    fn explore(&mut self, keep_path: bool) -> Option<Vec<A::Transition>> {
        let initial = self.automaton.initial_state();

        self.visited.insert(initial.clone());
        if self.automaton.is_final(&initial) {
            return Some(Vec::new());
        }

        let mut stack = vec![Frame {
            pending: self.automaton.transitions_from(&initial).into_iter(),
            via: None,
        }];

        while let Some(frame) = stack.last_mut() {
            let transition = match frame.pending.next() {
                Some(transition) => transition,
                None => {
                    stack.pop();
                    continue;
                }
            };

            let destination = self.automaton.destination(&transition);
            if !self.visited.insert(destination.clone()) {
                continue;
            }

            if self.automaton.is_final(destination) {
                trace!("final state found after visiting {} states", self.visited.len());

                return Some(if keep_path {
                    stack
                        .into_iter()
                        .filter_map(|frame| frame.via)
                        .chain(std::iter::once(transition))
                        .collect()
                } else {
                    Vec::new()
                });
            }

            let pending = self.automaton.transitions_from(destination).into_iter();
            stack.push(Frame {
                pending,
                via: if keep_path { Some(transition) } else { None },
            });
        }

        trace!("no final state among {} visited states", self.visited.len());

        None
    }
}

struct Frame<T> {
    pending: std::vec::IntoIter<T>,
    via: Option<T>,
}
