//! `generate` job (§4.5): produce a fresh program from the choice table and
//! submit it for execution with coverage collection enabled.

use std::sync::Arc;

use rand::Rng;

use crate::fuzzer::{Fuzzer, PRIO_GENERATE};
use crate::pipeline::RequestFlags;
use crate::prog::Program;

pub struct GenerateJob;

impl GenerateJob {
    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        let table_snapshot = fuzzer.choice_table.current();
        let mut rng = fuzzer.rng.fork();
        let program = match table_snapshot.as_ref() {
            Some(table) => {
                let len = rng.gen_range(1..=8);
                Program::generate(&mut rng, len, table)
            }
            None => Program::empty(),
        };
        let flags = RequestFlags { need_signal: true, ..Default::default() };
        fuzzer.exec_wait(PRIO_GENERATE, program, flags, "generate", "generate", Default::default());
    }
}
