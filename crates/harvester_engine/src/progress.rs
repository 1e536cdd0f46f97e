use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info};
use harvester_core::{ItemState, WorkItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("input entry {index} is not a string or integer key")]
    InvalidKey { index: usize },
    #[error("duplicate key {0:?} in input list")]
    DuplicateKey(String),
    #[error("output path {0:?} has no file name")]
    OutputPath(PathBuf),
    #[error("failed to serialize output: {0}")]
    Serialize(serde_json::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Where a run starts in the input list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeMode {
    /// Continue after the last key present in the output.
    #[default]
    Checkpoint,
    /// Walk the whole list and query every key that is not fresh.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Flush after this many newly recorded items. Zero flushes only at exit.
    pub checkpoint_every: usize,
    pub resume_mode: ResumeMode,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("input.json"),
            output_path: PathBuf::from("output.json"),
            checkpoint_every: 50,
            resume_mode: ResumeMode::Checkpoint,
        }
    }
}

/// One persisted `{key, result}` pair. A `null` result records a key that
/// was answered with no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub key: String,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Ordered output records plus a key index.
///
/// Records only ever get added or overwritten; the last record is the
/// checkpoint.
#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    records: Vec<OutputRecord>,
    index: HashMap<String, usize>,
    unflushed: usize,
}

impl ProgressStore {
    /// Reads the ordered input key list. Integer keys are kept as their
    /// decimal text; duplicates are refused.
    pub fn load(input_path: &Path) -> Result<Vec<String>, ProgressError> {
        let raw: Vec<Value> = read_json(input_path)?;
        let mut seen = HashSet::with_capacity(raw.len());
        let mut keys = Vec::with_capacity(raw.len());
        for (index, value) in raw.into_iter().enumerate() {
            let key = match value {
                Value::String(text) => text,
                Value::Number(number) if number.is_i64() || number.is_u64() => number.to_string(),
                _ => return Err(ProgressError::InvalidKey { index }),
            };
            if !seen.insert(key.clone()) {
                return Err(ProgressError::DuplicateKey(key));
            }
            keys.push(key);
        }
        engine_info!("Loaded {} input keys from {:?}", keys.len(), input_path);
        Ok(keys)
    }

    /// Opens prior output. A missing file is an empty store.
    pub fn open(output_path: &Path) -> Result<Self, ProgressError> {
        let is_blank = match fs::metadata(output_path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(source) => {
                return Err(ProgressError::Read {
                    path: output_path.to_path_buf(),
                    source,
                })
            }
        };
        if is_blank {
            engine_info!("No prior output at {:?}; starting fresh", output_path);
            return Ok(Self::default());
        }
        let records: Vec<OutputRecord> = read_json(output_path)?;
        engine_info!(
            "Loaded {} prior output records from {:?}",
            records.len(),
            output_path
        );
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<OutputRecord>) -> Self {
        let mut store = Self::default();
        for record in records {
            store.upsert(record);
        }
        store.unflushed = 0;
        store
    }

    /// Position just after the checkpoint key in `input_keys`, or 0 when the
    /// output is empty or its last key is not part of the input.
    pub fn resume_index(&self, input_keys: &[String]) -> usize {
        let Some(checkpoint) = self.checkpoint() else {
            return 0;
        };
        match input_keys.iter().position(|key| key == checkpoint) {
            Some(position) => position + 1,
            None => {
                engine_info!(
                    "Checkpoint {:?} not found in input; resuming from the start",
                    checkpoint
                );
                0
            }
        }
    }

    pub fn checkpoint(&self) -> Option<&str> {
        self.records.last().map(|record| record.key.as_str())
    }

    pub fn item_state(&self, key: &str) -> ItemState {
        match self.index.get(key) {
            Some(&position) => ItemState::for_payload(self.records[position].result.as_ref()),
            None => ItemState::Missing,
        }
    }

    pub fn item(&self, key: &str) -> WorkItem {
        WorkItem {
            key: key.to_string(),
            state: self.item_state(key),
            payload: self
                .index
                .get(key)
                .and_then(|&position| self.records[position].result.clone()),
        }
    }

    pub fn record(&mut self, key: &str, result: Option<Value>) {
        self.upsert(OutputRecord {
            key: key.to_string(),
            result,
        });
    }

    pub fn record_item(&mut self, item: &WorkItem) {
        self.record(&item.key, item.payload.clone());
    }

    /// Writes every record to `output_path`, replacing the file atomically.
    pub fn flush(&mut self, output_path: &Path) -> Result<(), ProgressError> {
        let filename = output_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ProgressError::OutputPath(output_path.to_path_buf()))?;
        let content =
            serde_json::to_vec_pretty(&self.records).map_err(ProgressError::Serialize)?;

        AtomicFileWriter::for_file(output_path).write(filename, &content)?;
        engine_debug!(
            "Flushed {} records ({} new) to {:?}",
            self.records.len(),
            self.unflushed,
            output_path
        );
        self.unflushed = 0;
        Ok(())
    }

    pub fn records(&self) -> &[OutputRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records changed since the last flush.
    pub fn unflushed(&self) -> usize {
        self.unflushed
    }

    fn upsert(&mut self, record: OutputRecord) {
        match self.index.get(&record.key) {
            Some(&position) => self.records[position] = record,
            None => {
                self.index.insert(record.key.clone(), self.records.len());
                self.records.push(record);
            }
        }
        self.unflushed += 1;
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ProgressError> {
    let content = fs::read(path).map_err(|source| ProgressError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&content).map_err(|source| ProgressError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
