//! Append-only persistence for experiment records.
//!
//! Every record is a flat JSON object: the envelope fields below plus the
//! body of the trial, survey, self-report or summary it carries.
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use thiserror::Error;

use crate::condition::{Condition, FrameType, LossFrame};

/// Kind of record stored in a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Trial,
    PostSurvey,
    SelfReport,
    Summary,
}

impl RecordType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::PostSurvey => "post_survey",
            Self::SelfReport => "self_report",
            Self::Summary => "summary",
        }
    }
}

const ENVELOPE_KEYS: [&str; 7] = [
    "participant_id",
    "record_type",
    "timestamp",
    "condition_id",
    "frame_type",
    "loss_frame",
    "is_test",
];

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub participant_id: String,
    pub record_type: RecordType,
    pub timestamp: DateTime<Utc>,
    pub condition_id: String,
    pub frame_type: FrameType,
    pub loss_frame: LossFrame,
    pub is_test: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Record {
    /// Wrap `body` in an envelope stamped with the current time.
    ///
    /// Body keys that collide with envelope fields are dropped so the
    /// envelope stays authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be serialized.
    pub fn new<B: Serialize + ?Sized>(
        participant_id: &str,
        condition: Condition,
        is_test: bool,
        record_type: RecordType,
        body: &B,
    ) -> Result<Self, serde_json::Error> {
        let mut body = match serde_json::to_value(body)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        for key in ENVELOPE_KEYS {
            body.remove(key);
        }
        Ok(Self {
            participant_id: participant_id.to_string(),
            record_type,
            timestamp: Utc::now(),
            condition_id: condition.condition_id(),
            frame_type: condition.frame_type,
            loss_frame: condition.loss_frame,
            is_test,
            body,
        })
    }
}

/// Durable append-only record store.
pub trait RecordSink {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store one record; durable once this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored.
    fn append(&self, record: &Record) -> Result<(), Self::Error>;

    /// Every stored record as raw JSON, including ones this crate did not write.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan(&self) -> Result<Vec<Value>, Self::Error>;

    /// Records whose `record_type` field matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan_by_type(&self, record_type: RecordType) -> Result<Vec<Value>, Self::Error> {
        let wanted = record_type.as_str();
        Ok(self
            .scan()?
            .into_iter()
            .filter(|value| value.get("record_type").and_then(Value::as_str) == Some(wanted))
            .collect())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &S {
    type Error = S::Error;

    fn append(&self, record: &Record) -> Result<(), Self::Error> {
        (**self).append(record)
    }

    fn scan(&self) -> Result<Vec<Value>, Self::Error> {
        (**self).scan()
    }
}

/// In-process sink used by tests and simulations.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Value>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-existing raw records.
    #[must_use]
    pub fn with_records(records: Vec<Value>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    type Error = Infallible;

    fn append(&self, record: &Record) -> Result<(), Self::Error> {
        // A record always serializes: every field is a plain JSON value.
        let value = serde_json::to_value(record).unwrap_or(Value::Null);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Value>, Self::Error> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[derive(Debug, Error)]
pub enum JsonlSinkError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One `<participant>.jsonl` file per participant under a data directory.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    /// Open (creating if needed) a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, JsonlSinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| JsonlSinkError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding a participant's records.
    #[must_use]
    pub fn path_for(&self, participant_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", sanitize_file_stem(participant_id)))
    }

    fn read_file(path: &Path, out: &mut Vec<Value>) -> Result<(), JsonlSinkError> {
        let io_err = |source| JsonlSinkError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = fs::File::open(path).map_err(io_err)?;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(value) => out.push(value),
                Err(err) => log::warn!(
                    "skipping unreadable line {} in {}: {err}",
                    index + 1,
                    path.display()
                ),
            }
        }
        Ok(())
    }
}

impl RecordSink for JsonlSink {
    type Error = JsonlSinkError;

    fn append(&self, record: &Record) -> Result<(), Self::Error> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let path = self.path_for(&record.participant_id);
        let io_err = |source| JsonlSinkError::Io {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(&line).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Value>, Self::Error> {
        let entries = fs::read_dir(&self.dir).map_err(|source| JsonlSinkError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();
        let mut records = Vec::new();
        for path in paths {
            Self::read_file(&path, &mut records)?;
        }
        Ok(records)
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` so ids cannot escape the data dir.
#[must_use]
pub fn sanitize_file_stem(participant_id: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static pattern"));
    let cleaned = re.replace_all(participant_id.trim(), "_");
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.into_owned()
    }
}
