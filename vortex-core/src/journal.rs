//! Append-only, rotating segment log backing the Store's durability contract.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Result, VortexError};

const ACTIVE_SEGMENT: &str = "data.log";

/// Receives raw record lines during a replay. Implemented by whichever
/// Processor variant is driving the replay (startup, rotate) — the journal
/// itself has no notion of opcodes, only lines.
#[async_trait]
pub trait ReplaySink: Send + Sync {
    async fn apply(&self, line: &[u8]);
}

struct JournalState {
    file: fs::File,
    /// Retained rotated segments, ascending, excluding the active segment.
    segments: Vec<PathBuf>,
}

/// Append-only segmented log. Every public mutation goes through the same
/// internal mutex, which doubles as the "journal lock" `$`/`!`/`*`/`@` take
/// to get a consistent cut across a rotation.
pub struct Journal {
    dir: PathBuf,
    keep: usize,
    state: Mutex<JournalState>,
}

/// A held journal lock. Readers use this to pair a consistent Store read
/// with an append, without releasing the lock in between.
pub struct JournalGuard<'a> {
    guard: MutexGuard<'a, JournalState>,
}

impl JournalGuard<'_> {
    pub async fn append(&mut self, record: &[u8]) -> Result<()> {
        self.guard.file.write_all(record).await?;
        self.guard.file.write_all(b"\n").await?;
        self.guard.file.flush().await?;
        Ok(())
    }
}

impl Journal {
    /// Opens (creating if absent) the journal directory, registers every
    /// existing `*.log` segment except the active one for rotation
    /// bookkeeping, and returns the ordered list of paths (oldest segment
    /// first, active segment last if present) a caller should replay at
    /// startup.
    pub async fn open(dir: impl Into<PathBuf>, keep: usize) -> Result<(Self, Vec<PathBuf>)> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| VortexError::JournalOpen {
                path: dir.display().to_string(),
                source,
            })?;

        let (mut segments, active_exists) = scan_segments(&dir).await?;
        segments.sort();

        let active_path = dir.join(ACTIVE_SEGMENT);
        let mut replay_paths = segments.clone();
        if active_exists {
            replay_paths.push(active_path.clone());
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)
            .await?;

        let journal = Journal {
            dir,
            keep,
            state: Mutex::new(JournalState { file, segments }),
        };
        Ok((journal, replay_paths))
    }

    pub async fn lock(&self) -> JournalGuard<'_> {
        JournalGuard {
            guard: self.state.lock().await,
        }
    }

    pub async fn append(&self, record: &[u8]) -> Result<()> {
        let mut guard = self.lock().await;
        guard.append(record).await
    }

    /// Replays one segment file through `sink`, one line per record.
    pub async fn load(path: &Path, sink: &dyn ReplaySink) -> Result<()> {
        let file = fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if !line.is_empty() {
                sink.apply(line.as_bytes()).await;
            }
        }
        Ok(())
    }

    /// Closes the active segment, renames it to a timestamped name, prunes
    /// the oldest retained segment past `keep`, opens a fresh active
    /// segment, then replays every retained segment (oldest first) through
    /// `sink`. The whole operation runs under the journal lock.
    pub async fn rotate(&self, sink: &dyn ReplaySink) -> Result<()> {
        let mut guard = self.state.lock().await;

        guard.file.flush().await?;
        guard.file.sync_all().await?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let active_path = self.dir.join(ACTIVE_SEGMENT);
        let rotated_path = self.dir.join(format!("data.{stamp}.log"));
        fs::rename(&active_path, &rotated_path).await?;
        guard.segments.push(rotated_path);

        while guard.segments.len() > self.keep {
            let oldest = guard.segments.remove(0);
            if let Err(err) = fs::remove_file(&oldest).await {
                tracing::warn!(path = %oldest.display(), error = %err, "failed to prune rotated journal segment");
            }
        }

        guard.file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)
            .await?;

        for segment in guard.segments.clone() {
            Self::load(&segment, sink).await?;
        }

        Ok(())
    }
}

async fn scan_segments(dir: &Path) -> Result<(Vec<PathBuf>, bool)> {
    let mut segments = Vec::new();
    let mut active_exists = false;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == ACTIVE_SEGMENT {
            active_exists = true;
        } else if name.starts_with("data.") && name.ends_with(".log") {
            segments.push(path);
        }
    }
    Ok((segments, active_exists))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        lines: StdMutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                lines: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReplaySink for RecordingSink {
        async fn apply(&self, line: &[u8]) {
            self.lines.lock().unwrap().push(line.to_vec());
        }
    }

    #[tokio::test]
    async fn append_then_replay_sees_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let (journal, startup) = Journal::open(dir.path(), 6).await.unwrap();
        assert!(startup.is_empty());

        journal.append(b"+alpha one").await.unwrap();

        let sink = RecordingSink::new();
        Journal::load(&dir.path().join(ACTIVE_SEGMENT), &sink)
            .await
            .unwrap();
        assert_eq!(sink.lines.lock().unwrap().as_slice(), &[b"+alpha one".to_vec()]);
    }

    #[tokio::test]
    async fn startup_replays_existing_segments_then_active() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("data.20240101-000000.log"), b"+old v\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(ACTIVE_SEGMENT), b"+new w\n")
            .await
            .unwrap();

        let (_journal, startup) = Journal::open(dir.path(), 6).await.unwrap();
        assert_eq!(startup.len(), 2);
        assert!(startup[0].to_string_lossy().contains("20240101"));
        assert!(startup[1].ends_with(ACTIVE_SEGMENT));
    }

    #[tokio::test]
    async fn rotate_prunes_past_keep() {
        let dir = tempfile::tempdir().unwrap();
        let (journal, _) = Journal::open(dir.path(), 1).await.unwrap();

        journal.append(b"+a 1").await.unwrap();
        let sink = RecordingSink::new();
        journal.rotate(&sink).await.unwrap();

        journal.append(b"+b 2").await.unwrap();
        journal.rotate(&sink).await.unwrap();

        journal.append(b"+c 3").await.unwrap();
        journal.rotate(&sink).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut rotated_count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name != ACTIVE_SEGMENT {
                rotated_count += 1;
            }
        }
        assert_eq!(rotated_count, 1, "keep=1 should retain exactly one rotated segment");
    }
}
