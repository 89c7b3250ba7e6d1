use anyhow::{Context, Result};
use log::{debug, info};
use std::str::FromStr;
use std::sync::Arc;
use tsorobust::{
    cli::{args, expect_arg},
    fences::{Checker, CheckerOptions, Fenced},
    litmus::Litmus,
    program::Program,
    robustness::{attack_trace, insert_fences, is_robust, is_robust_parallel, is_sc_reachable},
    semantics::SemanticsOptions,
    statistics::Statistics,
};

fn main() -> Result<()> {
    let matches = args().get_matches();

    let level = expect_arg(&matches, "verbose");
    env_logger::Builder::new().parse_filters(level).init();

    let (command, m) = matches.subcommand().context("no command given")?;

    let program = load_program(m)?;
    debug!("analyzing program:\n{}", program);

    let options = CheckerOptions {
        search_for_tdr_only: m.get_flag("tdr"),
        guard_memory_lock: m.get_flag("guard-memory-lock"),
        semantics: SemanticsOptions {
            partial_order_reduction: !m.get_flag("no-por"),
            liveness_optimization: !m.get_flag("no-liveness"),
        },
        ..CheckerOptions::default()
    };
    let statistics = Arc::new(Statistics::new());
    statistics.record_program(&program);
    let checker = Checker::with_statistics(&program, options, Arc::clone(&statistics));

    match command {
        "robustness" => {
            let robust = if m.get_flag("parallel") {
                is_robust_parallel(&checker)
            } else {
                is_robust(&checker)
            };
            println!("{}", if robust { "robust" } else { "not robust" });
        }
        "fences" => {
            let fences = checker.compute_fences();
            for fence in &fences {
                let thread = program.thread(fence.thread);
                println!("fence {} {}", thread.name(), thread.state(fence.state).name());
            }
            println!("{} fences", fences.len());

            let fenced = insert_fences(&program, &fences);
            debug!("program with fences:\n{}", fenced);
            if !is_robust(&Checker::new(&fenced, options)) {
                anyhow::bail!(
                    "program is still not robust after inserting {} fences",
                    fences.len()
                );
            }
        }
        "attacks" => {
            for attack in checker.find_attacks() {
                let thread = program.thread(attack.attacker());
                let write = thread.transition(attack.write());
                let read = thread.transition(attack.read());
                println!(
                    "attack by {}: {} -> {}",
                    thread.name(),
                    write.instruction().display(program.expressions()),
                    read.instruction().display(program.expressions())
                );
                if let Some(trace) = attack_trace(&checker, &attack, &Fenced::new()) {
                    for step in trace {
                        println!("  {}", step);
                    }
                }
            }
        }
        "reachability" => {
            let reachable = is_sc_reachable(&program, options.semantics);
            println!("{}", if reachable { "reachable" } else { "unreachable" });
        }
        _ => unreachable!(),
    }

    info!("statistics:\n{}", statistics);

    Ok(())
}

fn load_program(m: &clap::ArgMatches) -> Result<Program> {
    let name = expect_arg(m, "litmus");
    let litmus =
        Litmus::from_str(name).with_context(|| format!("unknown litmus program {}", name))?;
    let threads = m.get_one::<usize>("threads").copied().unwrap_or(2);

    let program = litmus.build(threads, m.get_flag("fenced"));
    program
        .validate()
        .with_context(|| format!("litmus program {} is malformed", name))?;

    Ok(program)
}
