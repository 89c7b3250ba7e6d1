use super::instruction::Instruction;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(u32);

#[derive(Clone, Debug)]
pub struct State {
    name: String,
    incoming: Vec<TransitionId>,
    outgoing: Vec<TransitionId>,
}

#[derive(Clone, Debug)]
pub struct Transition {
    from: StateId,
    to: StateId,
    instruction: Instruction,
}

/// Control flow graph of one thread. States and transitions live in arenas
/// owned by the thread and are addressed by thread-local ids.
#[derive(Clone, Debug)]
pub struct Thread {
    name: String,
    states: Vec<State>,
    state_index: HashMap<String, StateId>,
    transitions: Vec<Transition>,
    initial_state: Option<StateId>,
    final_state: Option<StateId>,
}

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TransitionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl State {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn incoming(&self) -> &[TransitionId] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[TransitionId] {
        &self.outgoing
    }
}

impl Transition {
    pub fn from(&self) -> StateId {
        self.from
    }

    pub fn to(&self) -> StateId {
        self.to
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }
}

impl Thread {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            states: Vec::new(),
            state_index: HashMap::new(),
            transitions: Vec::new(),
            initial_state: None,
            final_state: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up the state called `name`, creating it on first use.
    pub fn make_state(&mut self, name: &str) -> StateId {
        if let Some(id) = self.state_index.get(name) {
            return *id;
        }
        let id = StateId(self.states.len() as u32);
        self.states.push(State {
            name: name.to_string(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        });
        self.state_index.insert(name.to_string(), id);
        id
    }

    pub fn find_state(&self, name: &str) -> Option<StateId> {
        self.state_index.get(name).copied()
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> + '_ {
        self.states
            .iter()
            .enumerate()
            .map(|(i, state)| (StateId(i as u32), state))
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn make_transition(
        &mut self,
        from: StateId,
        to: StateId,
        instruction: Instruction,
    ) -> TransitionId {
        assert!(
            from.index() < self.states.len() && to.index() < self.states.len(),
            "transition endpoints must belong to thread {}",
            self.name
        );
        let id = TransitionId(self.transitions.len() as u32);
        self.transitions.push(Transition {
            from,
            to,
            instruction,
        });
        self.states[from.index()].outgoing.push(id);
        self.states[to.index()].incoming.push(id);
        id
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.index()]
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> + '_ {
        self.transitions
            .iter()
            .enumerate()
            .map(|(i, transition)| (TransitionId(i as u32), transition))
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn outgoing(
        &self,
        state: StateId,
    ) -> impl Iterator<Item = (TransitionId, &Transition)> + '_ {
        self.states[state.index()]
            .outgoing
            .iter()
            .map(move |id| (*id, &self.transitions[id.index()]))
    }

    pub fn initial_state(&self) -> Option<StateId> {
        self.initial_state
    }

    pub fn set_initial_state(&mut self, state: StateId) {
        self.initial_state = Some(state);
    }

    pub fn final_state(&self) -> Option<StateId> {
        self.final_state
    }

    pub fn set_final_state(&mut self, state: StateId) {
        self.final_state = Some(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_state_is_idempotent() {
        let mut thread = Thread::new("t");
        let a = thread.make_state("a");
        let b = thread.make_state("b");

        assert_eq!(thread.make_state("a"), a);
        assert_ne!(a, b);
        assert_eq!(thread.state_count(), 2);
        assert_eq!(thread.find_state("b"), Some(b));
        assert_eq!(thread.find_state("c"), None);
    }

    #[test]
    fn transitions_are_linked_into_both_endpoints() {
        let mut thread = Thread::new("t");
        let a = thread.make_state("a");
        let b = thread.make_state("b");
        let t = thread.make_transition(a, b, Instruction::Noop);

        assert_eq!(thread.state(a).outgoing(), &[t]);
        assert_eq!(thread.state(b).incoming(), &[t]);
        assert!(thread.state(a).incoming().is_empty());
        assert_eq!(thread.transition(t).from(), a);
        assert_eq!(thread.transition(t).to(), b);
    }

    #[test]
    #[should_panic]
    fn rejects_foreign_states() {
        let mut thread = Thread::new("t");
        let a = thread.make_state("a");
        thread.make_transition(a, StateId(7), Instruction::Noop);
    }
}
