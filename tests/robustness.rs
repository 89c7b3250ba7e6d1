mod utils;

use log::trace;
use rayon::prelude::*;
use tsorobust::{
    fences::{Checker, CheckerOptions},
    litmus::{dekker, message_passing, single_thread, store_buffering, store_buffering_one_sided},
    program::Program,
    robustness::{is_robust, is_robust_parallel, is_sc_reachable},
    semantics::SemanticsOptions,
};
use utils::{all_litmus_programs, init};

fn options(search_for_tdr_only: bool, semantics: SemanticsOptions) -> CheckerOptions {
    CheckerOptions {
        search_for_tdr_only,
        semantics,
        ..CheckerOptions::default()
    }
}

fn robust(program: &Program, search_for_tdr_only: bool) -> bool {
    is_robust(&Checker::new(program, options(search_for_tdr_only, SemanticsOptions::default())))
}

#[test]
fn test_classic_litmus_verdicts() {
    init();

    assert!(!robust(&store_buffering(false), false));
    assert!(robust(&store_buffering(true), false));
    assert!(!robust(&store_buffering_one_sided(), false));
    assert!(robust(&message_passing(), false));
    assert!(robust(&single_thread(), false));
    assert!(!robust(&dekker(2, false), false));
    assert!(robust(&dekker(2, true), false));
}

#[test]
fn test_tdr_detects_the_store_buffering_race() {
    init();

    assert!(!robust(&store_buffering(false), true));
    assert!(robust(&store_buffering(true), true));
    assert!(robust(&single_thread(), true));
}

#[test]
fn test_parallel_check_agrees_with_single_reduction() {
    init();

    all_litmus_programs().for_each(|(name, program)| {
        for tdr in &[false, true] {
            let checker = Checker::new(&program, options(*tdr, SemanticsOptions::default()));
            let single = is_robust(&checker);
            let parallel = is_robust_parallel(&checker);

            trace!("{} (tdr: {}): robust = {}", name, tdr, single);
            assert_eq!(single, parallel, "{} (tdr: {})", name, tdr);
        }
    });
}

#[test]
fn test_search_reductions_preserve_verdicts() {
    init();

    all_litmus_programs().for_each(|(name, program)| {
        let expected = robust(&program, false);

        for por in &[false, true] {
            for liveness in &[false, true] {
                let semantics = SemanticsOptions {
                    partial_order_reduction: *por,
                    liveness_optimization: *liveness,
                };
                let checker = Checker::new(&program, options(false, semantics));

                assert_eq!(
                    is_robust(&checker),
                    expected,
                    "{} (por: {}, liveness: {})",
                    name,
                    por,
                    liveness
                );
            }
        }
    });
}

#[test]
fn test_memory_lock_guard_preserves_verdicts() {
    init();

    all_litmus_programs().for_each(|(name, program)| {
        for tdr in &[false, true] {
            let options = CheckerOptions {
                search_for_tdr_only: *tdr,
                guard_memory_lock: true,
                ..CheckerOptions::default()
            };
            let checker = Checker::new(&program, options);

            assert_eq!(is_robust(&checker), robust(&program, *tdr), "{} (tdr: {})", name, tdr);
        }
    });
}

#[test]
fn test_final_states_are_reachable_under_sc() {
    init();

    vec![store_buffering(false), message_passing(), dekker(2, false), dekker(2, true)]
        .par_iter()
        .for_each(|program| {
            assert!(is_sc_reachable(program, SemanticsOptions::default()));
        });
}
