//! Append-only timing log of DHT operations.
//!
//! One line per completed operation: `<start-offset> <operation> <duration-or--1>`.
//! Every append opens, writes and closes the file, so a crash loses at most the
//! record in flight.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use tracing::trace;

use crate::{Error, Result};

/// Default timing log file name.
pub const DEFAULT_LOG_NAME: &str = "dht.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Store,
    Find,
    Announce,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Store => "store",
            OperationKind::Find => "find",
            OperationKind::Announce => "announce",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "store" => Ok(OperationKind::Store),
            "find" => Ok(OperationKind::Find),
            "announce" => Ok(OperationKind::Announce),
            _ => Err(Error::InvalidRecord(s.to_string())),
        }
    }
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Completed after this long.
    Completed(Duration),
    /// Failed with an expected DHT error. Written as `-1`.
    Failed,
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed)
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Outcome::Completed(duration) => Some(*duration),
            Outcome::Failed => None,
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(duration) => write!(f, "{:.3}", duration.as_secs_f64()),
            Outcome::Failed => f.write_str("-1"),
        }
    }
}

/// A single completed operation, relative to the experiment start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub start: Duration,
    pub outcome: Outcome,
}

impl OperationRecord {
    pub fn new(kind: OperationKind, start: Duration, outcome: Outcome) -> Self {
        Self {
            kind,
            start,
            outcome,
        }
    }

    /// The record as one newline terminated log line.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl Display for OperationRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} {} {}",
            self.start.as_secs_f64(),
            self.kind,
            self.outcome
        )
    }
}

impl FromStr for OperationRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let invalid = || Error::InvalidRecord(line.to_string());

        let mut fields = line.split_whitespace();
        let (Some(start), Some(kind), Some(outcome), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid());
        };

        let start = parse_seconds(start).ok_or_else(invalid)?;
        let kind = kind.parse()?;
        let outcome = if outcome == "-1" {
            Outcome::Failed
        } else {
            Outcome::Completed(parse_seconds(outcome).ok_or_else(invalid)?)
        };

        Ok(OperationRecord::new(kind, start, outcome))
    }
}

fn parse_seconds(text: &str) -> Option<Duration> {
    let seconds: f64 = text.parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Lock per log path, shared by every recorder in the process.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    locks.entry(path.to_path_buf()).or_default().clone()
}

/// Durable recorder of [OperationRecord]s.
///
/// Clones share the same file lock and the same list of written records.
#[derive(Debug, Clone)]
pub struct TimingRecorder {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    written: Arc<Mutex<Vec<OperationRecord>>>,
}

impl TimingRecorder {
    /// Record into the file at `path`. The file is created on first append.
    ///
    /// Relative paths are made absolute against the current directory, so every
    /// spelling of the same file shares one lock.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);

        Self {
            lock: path_lock(&path),
            path,
            written: Default::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &OperationRecord) -> Result<()> {
        let line = record.to_line();

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.file_error(source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| self.file_error(source))?;

        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*record);

        trace!(path = ?self.path, record = %record, "Appended timing record");

        Ok(())
    }

    /// Records appended through this recorder or its clones, oldest first.
    pub fn written(&self) -> Vec<OperationRecord> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read back every record in the log, including those of earlier runs. A
    /// missing log has no records.
    pub fn read(&self) -> Result<Vec<OperationRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => return Err(self.file_error(source)),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::parse)
            .collect()
    }

    fn file_error(&self, source: std::io::Error) -> Error {
        Error::File {
            path: self.path.clone(),
            source,
        }
    }
}

/// Aggregate of the records of one [OperationKind].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KindSummary {
    pub count: usize,
    pub failures: usize,
    pub total: Duration,
}

impl KindSummary {
    /// Mean duration of the successful operations.
    pub fn mean(&self) -> Option<Duration> {
        let successes = self.count - self.failures;
        if successes == 0 {
            return None;
        }
        Some(self.total / successes as u32)
    }
}

/// Summarise records per operation kind.
pub fn summarize(records: &[OperationRecord]) -> Vec<(OperationKind, KindSummary)> {
    let mut summaries = std::collections::BTreeMap::<OperationKind, KindSummary>::new();

    for record in records {
        let summary = summaries.entry(record.kind).or_default();
        summary.count += 1;
        match record.outcome {
            Outcome::Completed(duration) => summary.total += duration,
            Outcome::Failed => summary.failures += 1,
        }
    }

    summaries.into_iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn line_layout() {
        let success = OperationRecord::new(
            OperationKind::Store,
            secs(2.0),
            Outcome::Completed(secs(0.5)),
        );
        assert_eq!(success.to_line(), "2.000 store 0.500\n");

        let failure = OperationRecord::new(OperationKind::Find, secs(3.0), Outcome::Failed);
        assert_eq!(failure.to_line(), "3.000 find -1\n");
    }

    #[test]
    fn parse_line() {
        let record: OperationRecord = "12.250 find 0.031".parse().unwrap();
        assert_eq!(record.kind, OperationKind::Find);
        assert_eq!(record.start, secs(12.25));
        assert_eq!(record.outcome, Outcome::Completed(secs(0.031)));

        let failed: OperationRecord = "3.000 store -1".parse().unwrap();
        assert!(failed.outcome.is_failed());

        assert!("3.000 store".parse::<OperationRecord>().is_err());
        assert!("3.000 walk 0.1".parse::<OperationRecord>().is_err());
        assert!("3.000 store 0.1 extra".parse::<OperationRecord>().is_err());
        assert!("-3.000 store 0.1".parse::<OperationRecord>().is_err());
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TimingRecorder::new(dir.path().join(DEFAULT_LOG_NAME));

        assert!(recorder.read().unwrap().is_empty());

        recorder
            .append(&OperationRecord::new(
                OperationKind::Store,
                secs(1.0),
                Outcome::Completed(secs(0.25)),
            ))
            .unwrap();
        recorder
            .append(&OperationRecord::new(
                OperationKind::Find,
                secs(1.5),
                Outcome::Failed,
            ))
            .unwrap();

        let content = fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(content, "1.000 store 0.250\n1.500 find -1\n");

        let records = recorder.read().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].outcome, Outcome::Failed);
    }

    #[test]
    fn concurrent_appends_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_LOG_NAME);

        let handles = (0..8)
            .map(|i| {
                let recorder = TimingRecorder::new(path.clone());
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let kind = if i % 2 == 0 {
                            OperationKind::Store
                        } else {
                            OperationKind::Find
                        };
                        recorder
                            .append(&OperationRecord::new(
                                kind,
                                secs(i as f64 + j as f64 / 1000.0),
                                Outcome::Completed(secs(0.123)),
                            ))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let records = TimingRecorder::new(path).read().unwrap();
        assert_eq!(records.len(), 800);
        assert!(records
            .iter()
            .all(|r| r.outcome == Outcome::Completed(secs(0.123))));
    }

    #[test]
    fn spellings_of_one_file_share_a_lock() {
        let cwd = std::env::current_dir().unwrap();

        let relative = TimingRecorder::new(DEFAULT_LOG_NAME);
        let dotted = TimingRecorder::new(Path::new(".").join(DEFAULT_LOG_NAME));
        let absolute = TimingRecorder::new(cwd.join(DEFAULT_LOG_NAME));

        assert!(relative.path().is_absolute());
        assert_eq!(relative.path(), absolute.path());
        assert!(Arc::ptr_eq(&relative.lock, &dotted.lock));
        assert!(Arc::ptr_eq(&relative.lock, &absolute.lock));
    }

    #[test]
    fn written_covers_this_recorder_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_LOG_NAME);

        let earlier = OperationRecord::new(OperationKind::Find, secs(9.0), Outcome::Failed);
        TimingRecorder::new(path.clone()).append(&earlier).unwrap();

        let recorder = TimingRecorder::new(path);
        let clone = recorder.clone();
        let record = OperationRecord::new(
            OperationKind::Store,
            secs(1.0),
            Outcome::Completed(secs(0.5)),
        );
        clone.append(&record).unwrap();

        assert_eq!(recorder.written(), vec![record]);
        assert_eq!(recorder.read().unwrap(), vec![earlier, record]);
    }

    #[test]
    fn summary_per_kind() {
        let records = vec![
            OperationRecord::new(
                OperationKind::Store,
                secs(1.0),
                Outcome::Completed(Duration::from_millis(200)),
            ),
            OperationRecord::new(
                OperationKind::Store,
                secs(2.0),
                Outcome::Completed(Duration::from_millis(400)),
            ),
            OperationRecord::new(OperationKind::Store, secs(3.0), Outcome::Failed),
            OperationRecord::new(OperationKind::Find, secs(4.0), Outcome::Failed),
        ];

        let summary = summarize(&records);

        assert_eq!(summary.len(), 2);
        let (kind, store) = summary[0];
        assert_eq!(kind, OperationKind::Store);
        assert_eq!(store.count, 3);
        assert_eq!(store.failures, 1);
        assert_eq!(store.mean(), Some(Duration::from_millis(300)));

        let (_, find) = summary[1];
        assert_eq!(find.mean(), None);
    }
}
