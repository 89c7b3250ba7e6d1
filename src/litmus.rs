//! # Litmus programs
//!
//! Small textbook programs used by the command line and the tests. Every
//! thread is straight-line code with states `q0 .. qn`, where `q0` is the
//! initial and `qn` the final state.

use crate::program::{BinaryOp, Domain, Instruction, Program, ThreadId};
use strum::{Display, EnumString, EnumVariantNames, IntoStaticStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumVariantNames, IntoStaticStr)]
#[strum(serialize_all = "kebab_case")]
pub enum Litmus {
    StoreBuffering,
    StoreBufferingOneSided,
    MessagePassing,
    SingleThread,
    Dekker,
    WritesBeforeRead,
}

impl Litmus {
    /// `threads` is only used by [`Litmus::Dekker`]. `fenced` separates the
    /// writes from the following reads of every thread by an `mfence`.
    pub fn build(self, threads: usize, fenced: bool) -> Program {
        match self {
            Litmus::StoreBuffering => store_buffering(fenced),
            Litmus::StoreBufferingOneSided => store_buffering_one_sided(),
            Litmus::MessagePassing => message_passing(),
            Litmus::SingleThread => single_thread(),
            Litmus::Dekker => dekker(threads, fenced),
            Litmus::WritesBeforeRead => writes_before_read(fenced),
        }
    }
}

/// Appends a thread executing `instructions` in order.
pub fn sequence(program: &mut Program, name: &str, instructions: Vec<Instruction>) -> ThreadId {
    let id = program.make_thread(name);
    let thread = program.thread_mut(id);
    let mut current = thread.make_state("q0");
    thread.set_initial_state(current);

    for (i, instruction) in instructions.into_iter().enumerate() {
        let next = thread.make_state(&format!("q{}", i + 1));
        thread.make_transition(current, next, instruction);
        current = next;
    }
    thread.set_final_state(current);

    id
}

/// `t0: x = 1; r0 = y` and `t1: y = 1; r1 = x`.
pub fn store_buffering(fenced: bool) -> Program {
    let mut program = Program::new();
    program.set_memory_size(2);

    for (name, own, other) in &[("t0", 0, 1), ("t1", 1, 0)] {
        let code = flag_then_peek(&mut program, *own, *other, fenced);
        sequence(&mut program, name, code);
    }

    program
}

/// Store buffering where only `t0` is fenced, leaving exactly one attack.
pub fn store_buffering_one_sided() -> Program {
    let mut program = Program::new();
    program.set_memory_size(2);

    let code = flag_then_peek(&mut program, 0, 1, true);
    sequence(&mut program, "t0", code);
    let code = flag_then_peek(&mut program, 1, 0, false);
    sequence(&mut program, "t1", code);

    program
}

/// `t0: x = 1; y = 1` and `t1: r1 = y; r2 = x`. Robust under TSO.
pub fn message_passing() -> Program {
    let mut program = Program::new();
    program.set_memory_size(2);

    let pool = program.expressions_mut();
    let one = pool.constant(1);
    let x = pool.constant(0);
    let y = pool.constant(1);
    let r1 = pool.register_id("r1");
    let r2 = pool.register_id("r2");

    sequence(
        &mut program,
        "t0",
        vec![Instruction::write(one, x), Instruction::write(one, y)],
    );
    sequence(&mut program, "t1", vec![Instruction::read(r1, y), Instruction::read(r2, x)]);

    program
}

/// `t0: r = x; s = r + 1; y = s; r = y`. Nobody can observe the buffer.
pub fn single_thread() -> Program {
    let mut program = Program::new();
    program.set_memory_size(2);

    let pool = program.expressions_mut();
    let x = pool.constant(0);
    let y = pool.constant(1);
    let one = pool.constant(1);
    let r = pool.register_id("r");
    let s = pool.register_id("s");
    let r_expr = pool.register_expr(r);
    let s_expr = pool.register_expr(s);
    let next = pool.binary(BinaryOp::Add, r_expr, one);

    sequence(
        &mut program,
        "t0",
        vec![
            Instruction::read(r, x),
            Instruction::Local { reg: s, value: next },
            Instruction::write(s_expr, y),
            Instruction::read(r, y),
        ],
    );

    program
}

/// Entry protocol of Dekker's mutual exclusion for `threads` threads: raise
/// the own flag, enter only if all other flags are down, then lower it.
pub fn dekker(threads: usize, fenced: bool) -> Program {
    let mut program = Program::new();
    program.set_memory_size(threads as Domain);

    for own in 0..threads {
        let pool = program.expressions_mut();
        let zero = pool.constant(0);
        let one = pool.constant(1);
        let flag = pool.constant(own as Domain);
        let r = pool.register_id("r");
        let r_expr = pool.register_expr(r);
        let lowered = pool.binary(BinaryOp::Eq, r_expr, zero);

        let mut code = vec![Instruction::write(one, flag)];
        if fenced {
            code.push(Instruction::Mfence);
        }
        for other in (0..threads).filter(|other| *other != own) {
            let address = program.expressions_mut().constant(other as Domain);
            code.push(Instruction::read(r, address));
            code.push(Instruction::Condition(lowered));
        }
        code.push(Instruction::write(zero, flag));

        sequence(&mut program, &format!("t{}", own), code);
    }

    program
}

/// `t0: x = 1; z = 1; r = y` and `t1: y = 1; r = x; r = z`. Both attacks of
/// `t0` pass through the state in front of its read.
pub fn writes_before_read(fenced: bool) -> Program {
    let mut program = Program::new();
    program.set_memory_size(3);

    let pool = program.expressions_mut();
    let one = pool.constant(1);
    let x = pool.constant(0);
    let y = pool.constant(1);
    let z = pool.constant(2);
    let r = pool.register_id("r");

    let mut code = vec![Instruction::write(one, x), Instruction::write(one, z)];
    if fenced {
        code.push(Instruction::Mfence);
    }
    code.push(Instruction::read(r, y));
    sequence(&mut program, "t0", code);

    let mut code = vec![Instruction::write(one, y)];
    if fenced {
        code.push(Instruction::Mfence);
    }
    code.push(Instruction::read(r, x));
    code.push(Instruction::read(r, z));
    sequence(&mut program, "t1", code);

    program
}

fn flag_then_peek(
    program: &mut Program,
    own: Domain,
    other: Domain,
    fenced: bool,
) -> Vec<Instruction> {
    let pool = program.expressions_mut();
    let one = pool.constant(1);
    let own = pool.constant(own);
    let other = pool.constant(other);
    let r = pool.register_id("r");

    let mut code = vec![Instruction::write(one, own)];
    if fenced {
        code.push(Instruction::Mfence);
    }
    code.push(Instruction::read(r, other));
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::VariantNames;

    #[test]
    fn names_round_trip_through_strum() {
        for name in Litmus::VARIANTS {
            let litmus = Litmus::from_str(name).unwrap();
            let back: &'static str = litmus.into();
            assert_eq!(back, *name);
        }
        assert_eq!(Litmus::from_str("store-buffering"), Ok(Litmus::StoreBuffering));
    }

    #[test]
    fn builders_produce_valid_programs() {
        for name in Litmus::VARIANTS {
            let program = Litmus::from_str(name).unwrap().build(3, false);
            assert_eq!(program.validate(), Ok(()), "{}", name);
        }
    }

    #[test]
    fn fenced_store_buffering_has_an_mfence_per_thread() {
        let program = store_buffering(true);
        for (_, thread) in program.threads() {
            let fences = thread
                .transitions()
                .filter(|(_, t)| *t.instruction() == Instruction::Mfence)
                .count();
            assert_eq!(fences, 1);
            assert_eq!(thread.state_count(), 4);
        }
    }

    #[test]
    fn dekker_reads_every_other_flag() {
        let program = dekker(3, false);
        assert_eq!(program.thread_count(), 3);
        for (_, thread) in program.threads() {
            let reads = thread.transitions().filter(|(_, t)| t.instruction().is_read()).count();
            assert_eq!(reads, 2);
        }
    }
}
