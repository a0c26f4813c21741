//! Touch Log: permanent, daily-rotating append-only log of `MintTouchEvent`s.
//!
//! Unlike the Delta Log, every transaction that merely references a mint -
//! swap or not - gets a touch record here, and nothing is ever deleted. It's
//! the audit trail for "has this mint been seen before" queries and for
//! reconstructing full mint activity history after the fact. Writes are
//! buffered and flushed once the buffer crosses `flush_bytes` (default 1
//! MiB) rather than on every record, since this log sees far higher volume
//! than the Delta Log.

use crate::model::MintTouchEvent;
use crate::wire::{decode_record, encode_record, iter_frames};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct TouchLog {
    dir: PathBuf,
    rotation_secs: u64,
    flush_bytes: usize,
    state: Mutex<WriterState>,
}

struct WriterState {
    day: i64,
    path: PathBuf,
    file: Option<fs::File>,
    buffer: Vec<u8>,
}

impl TouchLog {
    pub async fn open(dir: impl Into<PathBuf>, rotation_secs: u64, flush_bytes: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.context("failed to create touch log directory")?;
        Ok(Self {
            dir,
            rotation_secs,
            flush_bytes,
            state: Mutex::new(WriterState { day: -1, path: PathBuf::new(), file: None, buffer: Vec::new() }),
        })
    }

    fn filename_for_day(&self, day: i64) -> PathBuf {
        let ts = chrono::DateTime::from_timestamp(day * self.rotation_secs as i64, 0).unwrap_or_default();
        self.dir.join(format!("{}.bin.zlib", ts.format("%Y%m%d")))
    }

    pub async fn append(&self, event: &MintTouchEvent) -> Result<()> {
        let now = event.block_time.unwrap_or_else(|| Utc::now().timestamp());
        let day = now / self.rotation_secs as i64;
        let framed = encode_record(event)?;

        let mut state = self.state.lock().await;
        if state.day != day {
            self.rotate(&mut state, day).await?;
        }
        state.buffer.extend_from_slice(&framed);
        if state.buffer.len() >= self.flush_bytes {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Force a flush of any buffered-but-unwritten data, regardless of size.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn rotate(&self, state: &mut WriterState, day: i64) -> Result<()> {
        if !state.buffer.is_empty() {
            self.flush_locked(state).await?;
        }
        let path = self.filename_for_day(day);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open touch log file {}", path.display()))?;
        state.day = day;
        state.path = path;
        state.file = Some(file);
        Ok(())
    }

    async fn flush_locked(&self, state: &mut WriterState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(&state.buffer).await.context("touch log write failed")?;
            file.flush().await.context("touch log flush failed")?;
        }
        state.buffer.clear();
        Ok(())
    }

    /// Read every event recorded on the UTC day containing `timestamp`.
    pub async fn read_day(&self, timestamp: i64) -> Result<Vec<MintTouchEvent>> {
        let day = timestamp / self.rotation_secs as i64;
        let path = self.filename_for_day(day);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path).await.with_context(|| format!("failed to read {}", path.display()))?;
        let mut out = Vec::new();
        for frame in iter_frames(&bytes) {
            out.push(decode_record(frame?)?);
        }
        Ok(out)
    }

    pub async fn count_mints_touched_today(&self) -> Result<usize> {
        let events = self.read_day(Utc::now().timestamp()).await?;
        let mints: HashSet<&str> = events.iter().flat_map(|e| e.mints_touched.iter().map(|m| m.as_str())).collect();
        Ok(mints.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(mint: &str) -> MintTouchEvent {
        MintTouchEvent {
            signature: "sig".to_string(),
            slot: 1,
            block_time: Some(Utc::now().timestamp()),
            fee_payer: "payer".to_string(),
            mints_touched: vec![mint.to_string()],
            programs_invoked: vec![],
            compute_units: Some(50_000),
        }
    }

    #[tokio::test]
    async fn appended_events_are_readable_after_forced_flush() {
        let dir = tempfile::tempdir().unwrap();
        let log = TouchLog::open(dir.path(), 86400, 1024 * 1024).await.unwrap();
        log.append(&sample_event("MINT1")).await.unwrap();
        log.flush().await.unwrap();

        let events = log.read_day(Utc::now().timestamp()).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn count_mints_touched_today_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let log = TouchLog::open(dir.path(), 86400, 1024 * 1024).await.unwrap();
        log.append(&sample_event("MINT1")).await.unwrap();
        log.append(&sample_event("MINT1")).await.unwrap();
        log.append(&sample_event("MINT2")).await.unwrap();
        log.flush().await.unwrap();

        assert_eq!(log.count_mints_touched_today().await.unwrap(), 2);
    }
}
