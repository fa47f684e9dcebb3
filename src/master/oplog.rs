//! Durable operation log for namespace metadata
//!
//! Every namespace-mutating operation is appended here before the
//! in-memory commit. Entry format:
//! `[MAGIC][SEQUENCE][LEN][PAYLOAD][CRC32]` where the payload is a
//! bincode-encoded [`LogOp`] and the CRC covers sequence, length and
//! payload. Replay on master start rebuilds the namespace in order.
//!
//! Unlike a cache, this log is the source of truth: a corrupted or
//! truncated tail is fatal for the write path. [`OpLog::replay`] applies
//! the valid prefix through the callback and then reports the corruption
//! so the caller can refuse writes until the log is reconciled.

use crate::common::{crc32, Error, LogSyncPolicy, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const LOG_MAGIC: [u8; 4] = [0x47, 0x46, 0x4C, 0x31]; // "GFL1"

/// A single namespace-mutating operation.
///
/// Self-describing so replay needs no out-of-band schema; versions ride
/// along where the chunk version invariant makes replay idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    CreateFile {
        path: String,
        at_ms: u64,
    },
    AppendChunk {
        path: String,
        chunk_id: String,
        target_replicas: usize,
        replicas: Vec<String>,
        at_ms: u64,
    },
    /// Tombstone, not erasure; chunks are collected lazily
    DeleteFile {
        path: String,
        at_ms: u64,
    },
    SetReplicas {
        chunk_id: String,
        replicas: Vec<String>,
    },
    GrantLease {
        chunk_id: String,
        holder: String,
        version: u64,
        expires_at_ms: u64,
    },
    /// Checksum recorded when a leased write commits
    CommitWrite {
        chunk_id: String,
        checksum: String,
    },
    /// Orphaned chunk collected by the GC sweep
    RemoveChunk {
        chunk_id: String,
    },
    /// Tombstoned file entry purged after its chunks are collected
    RemoveFile {
        path: String,
    },
}

/// Log entry: assigned sequence plus operation
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub sequence: u64,
    pub op: LogOp,
}

/// Append-only operation log
pub struct OpLog {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
    sync_policy: LogSyncPolicy,
}

impl OpLog {
    /// Open or create the log file, resuming after the last entry.
    ///
    /// Fails with [`Error::LogCorrupted`] if the existing tail does not
    /// verify; a master must not append past a corrupt prefix.
    pub fn open(path: impl AsRef<Path>, sync_policy: LogSyncPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let next_sequence = Self::replay(&path, |_| Ok(()))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_sequence,
            sync_policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append an operation, returning its assigned sequence number.
    ///
    /// The entry is durable per the sync policy before this returns;
    /// callers apply the in-memory mutation only afterwards.
    pub fn append(&mut self, op: &LogOp) -> Result<u64> {
        let sequence = self.next_sequence;

        let payload = bincode::serialize(op)
            .map_err(|e| Error::OpLog(format!("serialize entry: {}", e)))?;

        let seq_bytes = sequence.to_le_bytes();
        let len_bytes = (payload.len() as u32).to_le_bytes();

        self.writer.write_all(&LOG_MAGIC)?;
        self.writer.write_all(&seq_bytes)?;
        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&payload)?;

        let mut checksum_data =
            Vec::with_capacity(seq_bytes.len() + len_bytes.len() + payload.len());
        checksum_data.extend_from_slice(&seq_bytes);
        checksum_data.extend_from_slice(&len_bytes);
        checksum_data.extend_from_slice(&payload);
        let checksum = crc32(&checksum_data);
        self.writer.write_all(&checksum.to_le_bytes())?;

        self.maybe_sync()?;
        self.next_sequence += 1;

        Ok(sequence)
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_policy {
            LogSyncPolicy::Always => {
                self.writer.flush()?;
                self.writer.get_ref().sync_all()?;
            }
            LogSyncPolicy::Interval => {
                self.writer.flush()?;
            }
            LogSyncPolicy::Never => {}
        }
        Ok(())
    }

    /// Sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Replay the log in order, returning the next free sequence number.
    ///
    /// The callback sees every valid entry in sequence order. A partial
    /// or checksum-failing tail returns [`Error::LogCorrupted`] *after*
    /// the valid prefix has been delivered, so a caller may serve reads
    /// from that prefix while refusing writes.
    pub fn replay<F>(path: impl AsRef<Path>, mut callback: F) -> Result<u64>
    where
        F: FnMut(LogEntry) -> Result<()>,
    {
        let file = match File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut next_sequence = 0u64;

        loop {
            match Self::read_entry(&mut reader)? {
                Some(entry) => {
                    next_sequence = next_sequence.max(entry.sequence + 1);
                    callback(entry)?;
                }
                None => break,
            }
        }

        Ok(next_sequence)
    }

    /// Read one entry; `Ok(None)` only at a clean entry boundary.
    fn read_entry<R: Read>(reader: &mut R) -> Result<Option<LogEntry>> {
        let mut magic = [0u8; 4];
        match read_exact_or_eof(reader, &mut magic)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => {
                return Err(Error::LogCorrupted("truncated entry header".into()))
            }
            ReadOutcome::Full => {}
        }

        if magic != LOG_MAGIC {
            return Err(Error::LogCorrupted("bad entry magic".into()));
        }

        let mut seq_bytes = [0u8; 8];
        read_fully(reader, &mut seq_bytes)?;
        let sequence = u64::from_le_bytes(seq_bytes);

        let mut len_bytes = [0u8; 4];
        read_fully(reader, &mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        read_fully(reader, &mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        read_fully(reader, &mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let mut checksum_data = Vec::with_capacity(8 + 4 + payload.len());
        checksum_data.extend_from_slice(&seq_bytes);
        checksum_data.extend_from_slice(&len_bytes);
        checksum_data.extend_from_slice(&payload);
        if crc32(&checksum_data) != stored_checksum {
            return Err(Error::LogCorrupted(format!(
                "checksum mismatch at sequence {}",
                sequence
            )));
        }

        let op: LogOp = bincode::deserialize(&payload)
            .map_err(|e| Error::LogCorrupted(format!("undecodable entry payload: {}", e)))?;

        Ok(Some(LogEntry { sequence, op }))
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Partial
            });
        }
        filled += n;
    }
    Ok(ReadOutcome::Full)
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|_| Error::LogCorrupted("truncated entry body".into()))
}
