//! Persistent corpus database (§6): a newline-delimited JSON file keyed by
//! program hash, loaded at startup and rewritten periodically. The engine
//! never reads this file directly into the live corpus — each loaded
//! program is replayed through the candidate pipeline (`CandidateJob`) so
//! it gets re-triaged exactly like an external feed would (§6: "so that
//! corpus entries are re-triaged").

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::prog::{Program, ProgHash};
use crate::signal::RawSignal;

/// Bumped whenever `DbRecord`'s shape changes incompatibly. The design doc's
/// version-bump flag-clearing table (clearing `pre_minimized`/`pre_smashed`
/// on specific historical version jumps) is not implemented here: every
/// loaded record is re-triaged from scratch through the candidate pipeline
/// regardless of version, which already produces fresh minimize/smash
/// state (see DESIGN.md).
pub const CORPUS_DB_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRecord {
    pub version: u32,
    pub hash: ProgHash,
    pub program: Program,
    pub signal: RawSignal,
}

/// Load every record from `path`, dropping (and counting) lines that fail
/// to deserialize rather than aborting the whole load (§7: "the record is
/// scheduled for deletion; overall startup succeeds as long as at least
/// one record deserialized or the corpus is empty"). A missing file is
/// treated as an empty corpus, not an error — this is the state a fresh
/// deployment starts from.
pub fn load_records(path: &Path) -> Result<(Vec<DbRecord>, usize)> {
    let contents = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => {
            return Err(Error::CorpusDeserialize { path: path.display().to_string(), reason: e.to_string() })
        }
    };

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DbRecord>(line) {
            Ok(record) => records.push(record),
            Err(_) => dropped += 1,
        }
    }
    Ok((records, dropped))
}

/// Rewrite `path` from scratch with `records`, one JSON object per line.
/// A full rewrite rather than a true append-only log: simpler, and the
/// corpus is small enough in practice that the periodic rewrite cost is
/// not worth the complexity of a compaction scheme (see DESIGN.md).
pub fn save_records(path: &Path, records: &[DbRecord]) -> io::Result<()> {
    let mut out = String::with_capacity(records.len() * 64);
    for record in records {
        out.push_str(&serde_json::to_string(record).expect("DbRecord serialization cannot fail"));
        out.push('\n');
    }
    fs::write(path, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prog::Call;
    use std::io::Write;
    use tempfile_free_tests::TempPath;

    fn record(hash: ProgHash) -> DbRecord {
        DbRecord {
            version: CORPUS_DB_VERSION,
            hash,
            program: Program::new(vec![Call::new(1, vec![])]),
            signal: vec![(10, 1)],
        }
    }

    /// Minimal scratch-file helper so these tests don't need a `tempfile`
    /// dependency just for a handful of round-trip cases.
    mod tempfile_free_tests {
        use std::path::PathBuf;

        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn new(name: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("fuzzer-core-corpus-db-test-{name}-{}", std::process::id()));
                Self(path)
            }

            pub fn as_path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn missing_file_loads_as_empty_corpus() {
        let path = TempPath::new("missing");
        let (records, dropped) = load_records(path.as_path()).unwrap();
        assert!(records.is_empty());
        assert_eq!(dropped, 0);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let path = TempPath::new("roundtrip");
        let records = vec![record(1), record(2)];
        save_records(path.as_path(), &records).unwrap();
        let (loaded, dropped) = load_records(path.as_path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(dropped, 0);
        assert_eq!(loaded[0].hash, 1);
        assert_eq!(loaded[1].hash, 2);
    }

    #[test]
    fn malformed_lines_are_dropped_not_fatal() {
        let path = TempPath::new("malformed");
        let mut good = serde_json::to_string(&record(1)).unwrap();
        good.push('\n');
        let mut file = std::fs::File::create(path.as_path()).unwrap();
        file.write_all(good.as_bytes()).unwrap();
        file.write_all(b"not json at all\n").unwrap();
        drop(file);

        let (loaded, dropped) = load_records(path.as_path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(dropped, 1);
    }
}
