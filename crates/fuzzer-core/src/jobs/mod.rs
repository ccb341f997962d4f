//! Job state machines (§4.5): tagged variants, each owning the program it
//! operates on. Modeled as a sum type with a common `priority`/`run`
//! interface rather than an inheritance hierarchy (§9).

pub mod candidate;
pub mod collide;
pub mod fault;
pub mod generate;
pub mod hints;
pub mod smash;
pub mod triage;

use std::sync::Arc;

use candidate::CandidateJob;
use collide::CollideJob;
use fault::FaultJob;
use generate::GenerateJob;
use hints::HintsJob;
use smash::SmashJob;
use triage::TriageJob;

use crate::fuzzer::{Fuzzer, PRIO_CANDIDATE, PRIO_CANDIDATE_TRIAGE, PRIO_GENERATE, PRIO_SMASH, PRIO_TRIAGE};
use crate::queue::Priority;

pub enum Job {
    Generate(GenerateJob),
    Candidate(CandidateJob),
    Triage(TriageJob),
    Smash(SmashJob),
    Fault(FaultJob),
    Hints(HintsJob),
    Collide(CollideJob),
}

impl Job {
    pub fn priority(&self) -> Priority {
        match self {
            Job::Generate(_) => PRIO_GENERATE,
            Job::Candidate(_) => PRIO_CANDIDATE,
            Job::Triage(job) => if job.is_from_candidate() { PRIO_CANDIDATE_TRIAGE } else { PRIO_TRIAGE },
            Job::Smash(_) | Job::Fault(_) | Job::Hints(_) | Job::Collide(_) => PRIO_SMASH,
        }
    }

    pub fn run(self, fuzzer: &Arc<Fuzzer>) {
        match self {
            Job::Generate(job) => job.run(fuzzer),
            Job::Candidate(job) => job.run(fuzzer),
            Job::Triage(job) => job.run(fuzzer),
            Job::Smash(job) => job.run(fuzzer),
            Job::Fault(job) => job.run(fuzzer),
            Job::Hints(job) => job.run(fuzzer),
            Job::Collide(job) => job.run(fuzzer),
        }
    }
}
