#[macro_use]
pub mod util;

pub mod cli;
pub mod fences;
pub mod litmus;
pub mod liveness;
pub mod program;
pub mod reduction;
pub mod robustness;
pub mod search;
pub mod semantics;
pub mod statistics;
