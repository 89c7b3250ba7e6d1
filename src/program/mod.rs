//! # Program representation
//!
//! Multi-threaded finite-state programs over shared memory. Every thread is
//! a control flow graph whose edges carry one [`Instruction`]. Expressions
//! are interned in a program-wide [`ExpressionPool`], so a transformation
//! pass can clone the pool of its input and keep using the input's ids.

use crate::liveness::{killed_registers, used_registers};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod expression;
pub mod instruction;
pub mod thread;

pub use expression::*;
pub use instruction::*;
pub use thread::*;

/// Scratch register of transformation passes. Input programs must not use it.
pub const TMP_REGISTER: &str = "_tmp";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

#[derive(Clone, Debug, Default)]
pub struct Program {
    threads: Vec<Thread>,
    thread_index: HashMap<String, ThreadId>,
    memory_size: Domain,
    interesting_space: Space,
    interesting_address: Domain,
    expressions: ExpressionPool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgramError {
    #[error("thread {0} has no initial state")]
    MissingInitialState(String),

    #[error("thread {thread} accesses reserved memory space {space}")]
    ReservedSpace { thread: String, space: Space },

    #[error("thread {thread} uses the reserved register {register}")]
    ReservedRegister { thread: String, register: String },

    #[error("thread {0} contains an atomic instruction, which is only produced by transformations")]
    UnexpectedAtomic(String),
}

impl ThreadId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an empty program sharing the interned expressions of another one.
    pub fn with_expressions(expressions: ExpressionPool) -> Self {
        Self {
            expressions,
            ..Self::default()
        }
    }

    /// Looks up the thread called `name`, creating it on first use.
    pub fn make_thread(&mut self, name: &str) -> ThreadId {
        if let Some(id) = self.thread_index.get(name) {
            return *id;
        }
        self.add_thread(Thread::new(name))
    }

    pub fn add_thread(&mut self, thread: Thread) -> ThreadId {
        assert!(
            !self.thread_index.contains_key(thread.name()),
            "thread {} defined twice",
            thread.name()
        );
        let id = ThreadId(self.threads.len() as u32);
        self.thread_index.insert(thread.name().to_string(), id);
        self.threads.push(thread);
        id
    }

    pub fn find_thread(&self, name: &str) -> Option<ThreadId> {
        self.thread_index.get(name).copied()
    }

    pub fn thread(&self, id: ThreadId) -> &Thread {
        &self.threads[id.index()]
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        &mut self.threads[id.index()]
    }

    pub fn threads(&self) -> impl Iterator<Item = (ThreadId, &Thread)> + '_ {
        self.threads
            .iter()
            .enumerate()
            .map(|(i, thread)| (ThreadId(i as u32), thread))
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn memory_size(&self) -> Domain {
        self.memory_size
    }

    pub fn set_memory_size(&mut self, size: Domain) {
        self.memory_size = size;
    }

    pub fn interesting(&self) -> (Space, Domain) {
        (self.interesting_space, self.interesting_address)
    }

    pub fn set_interesting(&mut self, space: Space, address: Domain) {
        self.interesting_space = space;
        self.interesting_address = address;
    }

    pub fn expressions(&self) -> &ExpressionPool {
        &self.expressions
    }

    pub fn expressions_mut(&mut self) -> &mut ExpressionPool {
        &mut self.expressions
    }

    /// Checks the preconditions every analysis places on its input program.
    pub fn validate(&self) -> Result<(), ProgramError> {
        let tmp = self.expressions.find_register(TMP_REGISTER);
        for (_, thread) in self.threads() {
            if thread.initial_state().is_none() {
                return Err(ProgramError::MissingInitialState(thread.name().to_string()));
            }
            for (_, transition) in thread.transitions() {
                match transition.instruction() {
                    Instruction::Read { space, .. } | Instruction::Write { space, .. }
                        if *space != MEMORY_SPACE =>
                    {
                        return Err(ProgramError::ReservedSpace {
                            thread: thread.name().to_string(),
                            space: *space,
                        });
                    }
                    Instruction::Atomic(_) => {
                        return Err(ProgramError::UnexpectedAtomic(thread.name().to_string()));
                    }
                    _ => {}
                }
                if let Some(tmp) = tmp {
                    let mut registers = Vec::new();
                    killed_registers(transition.instruction(), &mut registers);
                    used_registers(transition.instruction(), &self.expressions, &mut registers);
                    if registers.contains(&tmp) {
                        return Err(ProgramError::ReservedRegister {
                            thread: thread.name().to_string(),
                            register: TMP_REGISTER.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "memory_size {}", self.memory_size)?;
        for (_, thread) in self.threads() {
            writeln!(f, "thread {}", thread.name())?;
            if let Some(initial) = thread.initial_state() {
                writeln!(f, "  initial {}", thread.state(initial).name())?;
            }
            if let Some(last) = thread.final_state() {
                writeln!(f, "  final {}", thread.state(last).name())?;
            }
            for (_, transition) in thread.transitions() {
                writeln!(
                    f,
                    "  {} -> {}: {}",
                    thread.state(transition.from()).name(),
                    thread.state(transition.to()).name(),
                    transition.instruction().display(&self.expressions)
                )?;
            }
        }
        Ok(())
    }
}
