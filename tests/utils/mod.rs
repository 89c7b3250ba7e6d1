use rayon::prelude::*;
use std::{str::FromStr, sync::Once};
use strum::VariantNames;
use tsorobust::{litmus::Litmus, program::Program};

static INIT_LOGGER: Once = Once::new();

pub fn init() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Every litmus program in its plain and its fenced variant.
#[allow(dead_code)]
pub fn all_litmus_programs() -> impl ParallelIterator<Item = (String, Program)> {
    Litmus::VARIANTS.par_iter().flat_map_iter(|name| {
        let litmus = Litmus::from_str(name).expect("variant names parse");
        vec![
            (name.to_string(), litmus.build(2, false)),
            (format!("{} (fenced)", name), litmus.build(2, true)),
        ]
    })
}
