use crate::litmus::Litmus;
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use strum::VariantNames;

pub const LOGGING_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn expect_arg<'a>(m: &'a ArgMatches, arg: &str) -> &'a str {
    m.get_one::<String>(arg)
        .map(String::as_str)
        .unwrap_or_else(|| panic!("argument \"{}\" has to be set in CLI at all times", arg))
}

fn program_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("litmus")
                .help("Litmus program to analyze")
                .short('l')
                .long("litmus")
                .value_name("NAME")
                .value_parser(Litmus::VARIANTS.iter().copied().collect::<Vec<_>>())
                .required(true),
        )
        .arg(
            Arg::new("threads")
                .help("Number of threads of scalable litmus programs")
                .short('n')
                .long("threads")
                .value_name("NUMBER")
                .value_parser(value_parser!(usize))
                .default_value("2"),
        )
        .arg(
            Arg::new("fenced")
                .help("Separate writes from following reads by fences")
                .long("fenced")
                .action(ArgAction::SetTrue),
        )
}

pub fn args() -> Command {
    command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("configure logging level to use")
                .value_name("LEVEL")
                .value_parser(LOGGING_LEVELS)
                .default_value(LOGGING_LEVELS[2])
                .global(true),
        )
        .arg(
            Arg::new("tdr")
                .help("Only search for triangular data races")
                .long("tdr")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("guard-memory-lock")
                .help("Make memory accesses wait while another thread holds the lock")
                .long("guard-memory-lock")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("no-por")
                .help("Disable the partial order reduction of the SC search")
                .long("no-por")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("no-liveness")
                .help("Keep the values of dead registers during the SC search")
                .long("no-liveness")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            program_args(
                Command::new("robustness").about("Check whether a program is robust against TSO"),
            )
            .arg(
                Arg::new("parallel")
                    .help("Check every thread as attacker in parallel")
                    .short('p')
                    .long("parallel")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(program_args(
            Command::new("fences").about("Compute a small set of fences restoring robustness"),
        ))
        .subcommand(program_args(
            Command::new("attacks").about("List feasible attacks together with a witness"),
        ))
        .subcommand(program_args(
            Command::new("reachability")
                .about("Check whether all final states are reachable under SC"),
        ))
        .subcommand_required(true)
        .arg_required_else_help(true)
}
