use crate::lock::HistoryLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use stet_core::error::StoreError;
use stet_core::store::{HISTORY_FILE, HistoryRepository};
use stet_core::types::HistoryRecord;

pub const DEFAULT_HISTORY_MAX_RECORDS: usize = 1000;
pub const HISTORY_LOCK_FILE: &str = "history.lock";

/// Record count of the active log as of this process's last append, keyed
/// by file length so a write from elsewhere forces a recount.
#[derive(Debug, Default)]
pub struct HistoryTally(Mutex<Option<Tally>>);

#[derive(Debug, Clone, Copy)]
struct Tally {
    len: u64,
    records: usize,
}

/// Append-only `history.jsonl` with numbered archives.
pub struct HistoryRepo<'a> {
    state_dir: &'a Path,
    /// Records kept in the active file before it is archived; 0 disables
    /// rotation.
    max_records: usize,
    tally: &'a HistoryTally,
}

impl<'a> HistoryRepo<'a> {
    pub fn new(state_dir: &'a Path, max_records: usize, tally: &'a HistoryTally) -> Self {
        Self {
            state_dir,
            max_records,
            tally,
        }
    }

    pub fn active_path(&self) -> PathBuf {
        self.state_dir.join(HISTORY_FILE)
    }

    /// `history.<N>.jsonl` archives sorted by `N`.
    pub fn archives(&self) -> Result<Vec<(u64, PathBuf)>, StoreError> {
        let entries = match fs::read_dir(self.state_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(archive_index) {
                archives.push((index, entry.path()));
            }
        }
        archives.sort_by_key(|(index, _)| *index);
        Ok(archives)
    }

    /// Records in the active file. Reads the file only when its length no
    /// longer matches the tally.
    fn active_records(&self, cached: Option<Tally>) -> Result<usize, StoreError> {
        let len = match fs::metadata(self.active_path()) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        if let Some(tally) = cached.filter(|tally| tally.len == len) {
            return Ok(tally.records);
        }
        let file = File::open(self.active_path())?;
        Ok(BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter(|line| !line.trim().is_empty())
            .count())
    }

    fn rotate(&self, records: usize) -> Result<(), StoreError> {
        let active = self.active_path();
        let next = self
            .archives()?
            .last()
            .map_or(1, |(index, _)| index + 1);
        let archive = self.state_dir.join(format!("history.{next}.jsonl"));
        fs::rename(&active, &archive)?;
        File::create(&active)?.sync_all()?;
        tracing::info!(archive = %archive.display(), records, "rotated history log");
        Ok(())
    }
}

impl HistoryRepository for HistoryRepo<'_> {
    fn append(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record).map_err(|err| StoreError::JsonEncode {
            message: err.to_string(),
        })?;
        line.push('\n');

        fs::create_dir_all(self.state_dir)?;
        let _lock = HistoryLock::acquire(&self.state_dir.join(HISTORY_LOCK_FILE))?;
        let mut tally = self.tally.0.lock().unwrap_or_else(PoisonError::into_inner);

        let mut records = 0;
        if self.max_records > 0 {
            records = self.active_records(*tally)?;
            if records >= self.max_records {
                self.rotate(records)?;
                records = 0;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        *tally = (self.max_records > 0).then(|| Tally {
            len: file.metadata().map_or(0, |meta| meta.len()),
            records: records + 1,
        });
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut records = Vec::new();
        for (_, path) in self.archives()? {
            read_file(&path, &mut records)?;
        }
        read_file(&self.active_path(), &mut records)?;
        Ok(records)
    }
}

fn archive_index(name: &str) -> Option<u64> {
    name.strip_prefix("history.")?
        .strip_suffix(".jsonl")?
        .parse()
        .ok()
}

/// Lines that fail to decode (such as a partially written tail) are skipped.
fn read_file(path: &Path, records: &mut Vec<HistoryRecord>) -> Result<(), StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), line = number + 1, error = %err, "skipping unreadable history record");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stet_core::types::{DismissReason, Dismissal, UserAction};

    fn record(diff_ref: &str) -> HistoryRecord {
        HistoryRecord {
            diff_ref: diff_ref.to_string(),
            ..HistoryRecord::default()
        }
    }

    fn refs(records: &[HistoryRecord]) -> Vec<&str> {
        records.iter().map(|r| r.diff_ref.as_str()).collect()
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let tally = HistoryTally::default();
        let repo = HistoryRepo::new(dir.path(), 0, &tally);
        let mut dismissed = record("r2");
        dismissed.user_action = UserAction {
            dismissed_ids: vec!["f1".to_string()],
            dismissals: vec![Dismissal {
                finding_id: "f1".to_string(),
                reason: DismissReason::WontFix,
            }],
            ..UserAction::default()
        };
        repo.append(&record("r1")).unwrap();
        repo.append(&dismissed).unwrap();

        let text = fs::read_to_string(repo.active_path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        assert_eq!(repo.read_records().unwrap(), vec![record("r1"), dismissed]);
    }

    #[test]
    fn rotates_into_numbered_archives() {
        let dir = tempfile::tempdir().unwrap();
        let tally = HistoryTally::default();
        let repo = HistoryRepo::new(dir.path(), 2, &tally);
        for i in 1..=5 {
            repo.append(&record(&format!("r{i}"))).unwrap();
        }
        let archives: Vec<u64> = repo.archives().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(archives, vec![1, 2]);
        assert_eq!(
            fs::read_to_string(dir.path().join("history.1.jsonl")).unwrap().lines().count(),
            2
        );
        assert_eq!(refs(&repo.read_records().unwrap()), vec!["r1", "r2", "r3", "r4", "r5"]);
    }

    #[test]
    fn writers_with_separate_tallies_rotate_at_the_same_bound() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = (HistoryTally::default(), HistoryTally::default());
        let a = HistoryRepo::new(dir.path(), 3, &first);
        let b = HistoryRepo::new(dir.path(), 3, &second);
        for i in 1..=7 {
            let repo = if i % 2 == 0 { &b } else { &a };
            repo.append(&record(&format!("r{i}"))).unwrap();
        }
        for (_, archive) in a.archives().unwrap() {
            assert_eq!(fs::read_to_string(archive).unwrap().lines().count(), 3);
        }
        assert_eq!(a.archives().unwrap().len(), 2);
        assert_eq!(refs(&b.read_records().unwrap()), vec!["r1", "r2", "r3", "r4", "r5", "r6", "r7"]);
    }

    #[test]
    fn concurrent_appends_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        std::thread::scope(|scope| {
            for writer in 0..4 {
                let state_dir = dir.path();
                scope.spawn(move || {
                    let tally = HistoryTally::default();
                    let repo = HistoryRepo::new(state_dir, 5, &tally);
                    for i in 0..10 {
                        repo.append(&record(&format!("w{writer}-{i}"))).unwrap();
                    }
                });
            }
        });

        let tally = HistoryTally::default();
        let repo = HistoryRepo::new(dir.path(), 5, &tally);
        let archives = repo.archives().unwrap();
        assert_eq!(archives.len(), 7);
        for (_, archive) in archives {
            assert_eq!(fs::read_to_string(archive).unwrap().lines().count(), 5);
        }
        assert_eq!(fs::read_to_string(repo.active_path()).unwrap().lines().count(), 5);
        assert_eq!(repo.read_records().unwrap().len(), 40);
    }

    #[test]
    fn tolerates_partial_tail_and_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let tally = HistoryTally::default();
        let repo = HistoryRepo::new(dir.path(), 0, &tally);
        assert!(repo.read_records().unwrap().is_empty());

        repo.append(&record("r1")).unwrap();
        let mut file = OpenOptions::new().append(true).open(repo.active_path()).unwrap();
        file.write_all(b"{\"diff_ref\":\"r2\",\"review_").unwrap();
        assert_eq!(refs(&repo.read_records().unwrap()), vec!["r1"]);
    }

    #[test]
    fn archive_names_parse_numerically() {
        assert_eq!(archive_index("history.12.jsonl"), Some(12));
        assert_eq!(archive_index("history.jsonl"), None);
        assert_eq!(archive_index("history.x.jsonl"), None);
    }
}
