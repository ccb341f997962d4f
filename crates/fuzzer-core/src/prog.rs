//! Program representation.
//!
//! A `Program` is an opaque sequence of syscalls under test. The concrete
//! syscall description language (argument types, resource dependencies,
//! text format) is explicitly out of scope for the engine (§1) — executors
//! and the mutation layer only need a `Call` to carry a selector and an
//! opaque argument blob they can perturb byte-wise or splice wholesale.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::choicetable::ChoiceTable;

/// One syscall invocation inside a `Program`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Index into the target's syscall table; opaque to the engine.
    pub syscall_id: u32,
    /// Opaque argument encoding, perturbed byte-wise by mutation and
    /// rewritten wholesale by hint-guided mutation.
    pub args: Vec<u8>,
    /// `fail_nth` annotation used by fault-injection jobs; 0 means disabled.
    pub fail_nth: u32,
}

impl Call {
    pub fn new(syscall_id: u32, args: Vec<u8>) -> Self {
        Self { syscall_id, args, fail_nth: 0 }
    }
}

/// A stable 64-bit hash of a program's canonical serialization (§3: "Identity:
/// stable hash of canonical serialization"). Serialization is simply the
/// bincode-free concatenation the struct already derives via `Hash`, passed
/// through `DefaultHasher` twice-seeded so it is stable within a process and
/// does not depend on address-space layout.
pub type ProgHash = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub calls: Vec<Call>,
}

impl Program {
    pub fn new(calls: Vec<Call>) -> Self {
        Self { calls }
    }

    pub fn empty() -> Self {
        Self { calls: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Canonical serialization: syscall id + arg length + arg bytes + fail_nth
    /// for every call, in order. Used both as the wire encoding and as the
    /// input to `hash()`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.calls.len() * 16);
        out.extend_from_slice(&(self.calls.len() as u32).to_le_bytes());
        for call in &self.calls {
            out.extend_from_slice(&call.syscall_id.to_le_bytes());
            out.extend_from_slice(&(call.args.len() as u32).to_le_bytes());
            out.extend_from_slice(&call.args);
            out.extend_from_slice(&call.fail_nth.to_le_bytes());
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> Option<u32> {
            let b = bytes.get(*pos..*pos + 4)?;
            *pos += 4;
            Some(u32::from_le_bytes(b.try_into().ok()?))
        };
        let ncalls = read_u32(bytes, &mut pos)? as usize;
        let mut calls = Vec::with_capacity(ncalls);
        for _ in 0..ncalls {
            let syscall_id = read_u32(bytes, &mut pos)?;
            let arglen = read_u32(bytes, &mut pos)? as usize;
            let args = bytes.get(pos..pos + arglen)?.to_vec();
            pos += arglen;
            let fail_nth = read_u32(bytes, &mut pos)?;
            calls.push(Call { syscall_id, args, fail_nth });
        }
        Some(Self { calls })
    }

    pub fn hash(&self) -> ProgHash {
        let bytes = self.serialize();
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        hasher.finish()
    }

    /// Build a fresh program of `len` calls drawn straight from the choice
    /// table, used by the `generate` job (§4.5: "produce a fresh program
    /// of recommended length using the choice table").
    pub fn generate<R: Rng>(rng: &mut R, len: usize, choice_table: &ChoiceTable) -> Self {
        let mut calls = Vec::with_capacity(len);
        for _ in 0..len {
            let syscall_id = choice_table.choose(rng);
            let arglen = rng.gen_range(0..=16usize);
            let args: Vec<u8> = (0..arglen).map(|_| rng.gen()).collect();
            calls.push(Call::new(syscall_id, args));
        }
        Self { calls }
    }

    /// In-place general-purpose mutation, mirroring syzkaller's mutate: pick
    /// one of {insert call, mutate args, remove call, splice donor} weighted
    /// by how much budget remains, biased toward the choice table for new
    /// calls and toward `donors` for splicing.
    pub fn mutate<R: Rng>(
        &mut self,
        rng: &mut R,
        budget: usize,
        choice_table: &ChoiceTable,
        donors: &[Program],
    ) {
        let budget = budget.max(1);
        let strategies: u32 = if donors.is_empty() { 3 } else { 4 };
        match rng.gen_range(0..strategies) {
            0 => self.mutate_insert_call(rng, budget, choice_table),
            1 => self.mutate_args(rng),
            2 => self.mutate_remove_call(rng),
            _ => self.mutate_splice(rng, budget, donors),
        }
    }

    fn mutate_insert_call<R: Rng>(&mut self, rng: &mut R, budget: usize, choice_table: &ChoiceTable) {
        if self.calls.len() >= budget {
            self.mutate_args(rng);
            return;
        }
        let syscall_id = choice_table.choose(rng);
        let arglen = rng.gen_range(0..=16usize);
        let args: Vec<u8> = (0..arglen).map(|_| rng.gen()).collect();
        let pos = rng.gen_range(0..=self.calls.len());
        self.calls.insert(pos, Call::new(syscall_id, args));
    }

    fn mutate_args<R: Rng>(&mut self, rng: &mut R) {
        if self.calls.is_empty() {
            return;
        }
        let idx = rng.gen_range(0..self.calls.len());
        let call = &mut self.calls[idx];
        if call.args.is_empty() {
            call.args.push(rng.gen());
            return;
        }
        let byte_idx = rng.gen_range(0..call.args.len());
        call.args[byte_idx] = rng.gen();
    }

    fn mutate_remove_call<R: Rng>(&mut self, rng: &mut R) {
        if self.calls.len() <= 1 {
            return;
        }
        let idx = rng.gen_range(0..self.calls.len());
        self.calls.remove(idx);
    }

    fn mutate_splice<R: Rng>(&mut self, rng: &mut R, budget: usize, donors: &[Program]) {
        if donors.is_empty() {
            return;
        }
        let donor = &donors[rng.gen_range(0..donors.len())];
        if donor.calls.is_empty() {
            return;
        }
        let cut_self = rng.gen_range(0..=self.calls.len());
        let cut_donor = rng.gen_range(0..=donor.calls.len());
        let mut spliced: Vec<Call> = self.calls[..cut_self].to_vec();
        spliced.extend_from_slice(&donor.calls[cut_donor..]);
        spliced.truncate(budget.max(1));
        self.calls = spliced;
    }

    /// Hint-guided mutation: for the given call index, replace any argument
    /// bytes that encode one side of a comparison operand with the other
    /// side, for every recorded comparison. Streams one mutant per
    /// replacement candidate into `emit`; stops early if `emit` returns
    /// `false` (mirrors the "stop on any result with stop=true" contract of
    /// the hints job).
    pub fn mutate_with_hints(
        &self,
        call_idx: usize,
        comparisons: &[Comparison],
        mut emit: impl FnMut(Program) -> bool,
    ) {
        let Some(call) = self.calls.get(call_idx) else { return };
        for cmp in comparisons {
            if cmp.observed.len() != cmp.suggested.len() {
                continue;
            }
            if let Some(pos) = find_subslice(&call.args, &cmp.observed) {
                let mut mutant = self.clone();
                let bytes = &mut mutant.calls[call_idx].args;
                bytes[pos..pos + cmp.suggested.len()].copy_from_slice(&cmp.suggested);
                if !emit(mutant) {
                    return;
                }
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A single comparison operand pair recorded by the hints job (§4.5 hints):
/// "the call compared `observed` against `suggested` at runtime".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub observed: Vec<u8>,
    pub suggested: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_program() -> Program {
        Program::new(vec![
            Call::new(1, vec![1, 2, 3]),
            Call::new(2, vec![4, 5]),
        ])
    }

    #[test]
    fn serialize_round_trips() {
        let p = sample_program();
        let bytes = p.serialize();
        let back = Program::deserialize(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn hash_is_stable_for_equal_programs() {
        let a = sample_program();
        let b = sample_program();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_differs_for_different_programs() {
        let a = sample_program();
        let mut b = sample_program();
        b.calls[0].args.push(9);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn generate_produces_the_requested_call_count() {
        let choice_table = ChoiceTable::uniform(&[1, 2, 3]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let p = Program::generate(&mut rng, 5, &choice_table);
        assert_eq!(p.len(), 5);
        assert!(p.calls.iter().all(|c| [1, 2, 3].contains(&c.syscall_id)));
    }

    #[test]
    fn mutate_changes_program_over_many_tries() {
        let choice_table = ChoiceTable::uniform(&[1, 2, 3, 4]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let original = sample_program();
        let mut changed = false;
        for _ in 0..50 {
            let mut p = original.clone();
            p.mutate(&mut rng, 20, &choice_table, &[]);
            if p != original {
                changed = true;
                break;
            }
        }
        assert!(changed);
    }

    #[test]
    fn mutate_with_hints_replaces_observed_bytes() {
        let p = Program::new(vec![Call::new(1, vec![0xAA, 0xBB, 0xCC])]);
        let cmp = Comparison { observed: vec![0xBB], suggested: vec![0x42] };
        let mut mutants = Vec::new();
        p.mutate_with_hints(0, &[cmp], |mutant| {
            mutants.push(mutant);
            true
        });
        assert_eq!(mutants.len(), 1);
        assert_eq!(mutants[0].calls[0].args, vec![0xAA, 0x42, 0xCC]);
    }

    #[test]
    fn mutate_with_hints_stops_when_emit_returns_false() {
        let p = Program::new(vec![Call::new(1, vec![1, 2, 1, 2])]);
        let cmp = Comparison { observed: vec![1, 2], suggested: vec![9, 9] };
        let mut count = 0;
        p.mutate_with_hints(0, &[cmp.clone(), cmp], |_| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }
}
