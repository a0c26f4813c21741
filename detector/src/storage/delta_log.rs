//! Delta Log: short-retention, rotating append-only log of `TxDeltaRecord`s.
//!
//! Written by every consumer as it processes a transaction, and read back
//! only during HOT-promotion backfill (`state::StateManager`), which needs
//! to replay the last few minutes of a mint's history through the
//! detection pipeline before trusting its rolling counters. Files rotate
//! every `rotation_secs` (default 300s / 5 minutes) and are deleted once
//! they age past `retention_minutes` (default 60).

use crate::model::TxDeltaRecord;
use crate::wire::{decode_record, encode_record, iter_frames};
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct DeltaLog {
    dir: PathBuf,
    rotation_secs: u64,
    retention_minutes: u64,
    current: Mutex<Option<OpenFile>>,
}

struct OpenFile {
    bucket: i64,
    path: PathBuf,
    file: fs::File,
}

impl DeltaLog {
    pub async fn open(dir: impl Into<PathBuf>, rotation_secs: u64, retention_minutes: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.context("failed to create delta log directory")?;
        Ok(Self { dir, rotation_secs, retention_minutes, current: Mutex::new(None) })
    }

    fn filename_for_bucket(&self, bucket: i64) -> PathBuf {
        let ts = Utc.timestamp_opt(bucket * self.rotation_secs as i64, 0).single().unwrap_or_default();
        self.dir.join(format!("{}.bin.zlib", ts.format("%Y%m%d_%H%M%S")))
    }

    pub async fn append(&self, record: &TxDeltaRecord) -> Result<()> {
        let now = record.block_time.unwrap_or_else(|| Utc::now().timestamp());
        let bucket = now / self.rotation_secs as i64;
        let framed = encode_record(record)?;

        let mut guard = self.current.lock().await;
        self.ensure_open(&mut guard, bucket).await?;
        let open = guard.as_mut().expect("just ensured open");
        open.file.write_all(&framed).await.context("delta log write failed")?;
        open.file.flush().await.context("delta log flush failed")?;
        Ok(())
    }

    pub async fn append_batch(&self, records: &[TxDeltaRecord]) -> Result<()> {
        for record in records {
            self.append(record).await?;
        }
        Ok(())
    }

    async fn ensure_open(&self, guard: &mut Option<OpenFile>, bucket: i64) -> Result<()> {
        let needs_new = match guard.as_ref() {
            Some(open) => open.bucket != bucket,
            None => true,
        };
        if needs_new {
            let path = self.filename_for_bucket(bucket);
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("failed to open delta log file {}", path.display()))?;
            *guard = Some(OpenFile { bucket, path, file });
        }
        Ok(())
    }

    /// Read every record for `mint` across rotated files newer than `since`.
    pub async fn read_for_mint(&self, mint: &str, since: i64) -> Result<Vec<TxDeltaRecord>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await.context("failed to list delta log directory")?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if file_bucket_time(&path).map(|t| t < since).unwrap_or(true) {
                continue;
            }
            let bytes = fs::read(&path).await.with_context(|| format!("failed to read {}", path.display()))?;
            for frame in iter_frames(&bytes) {
                let frame = frame?;
                let record: TxDeltaRecord = decode_record(frame)?;
                if record.mints_touched.iter().any(|m| m == mint) {
                    out.push(record);
                }
            }
        }
        out.sort_by_key(|r| r.slot);
        Ok(out)
    }

    /// Delete rotated files older than `retention_minutes`, skipping the
    /// currently-open bucket.
    pub async fn cleanup_old_files(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - (self.retention_minutes as i64 * 60);
        let current_path = self.current.lock().await.as_ref().map(|o| o.path.clone());

        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await.context("failed to list delta log directory")?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if Some(&path) == current_path.as_ref() {
                continue;
            }
            if file_bucket_time(&path).map(|t| t < cutoff).unwrap_or(false) {
                fs::remove_file(&path).await.with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Spawn a background task that runs `cleanup_old_files` once a minute.
    pub fn spawn_cleanup_loop(self: std::sync::Arc<Self>, cancel: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = cancel.cancelled() => return,
                }
                match self.cleanup_old_files().await {
                    Ok(n) if n > 0 => log::info!("delta log cleanup removed {} file(s)", n),
                    Ok(_) => {}
                    Err(e) => log::warn!("delta log cleanup failed: {}", e),
                }
            }
        })
    }
}

fn file_bucket_time(path: &Path) -> Option<i64> {
    let stem = path.file_stem()?.to_str()?;
    let naive = chrono::NaiveDateTime::parse_from_str(stem, "%Y%m%d_%H%M%S").ok()?;
    Some(naive.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(mint: &str, slot: u64) -> TxDeltaRecord {
        TxDeltaRecord {
            signature: format!("sig{}", slot),
            slot,
            block_time: Some(1_700_000_000 + slot as i64),
            fee_payer: "payer".to_string(),
            programs_invoked: vec![],
            token_deltas: vec![],
            sol_deltas: vec![],
            mints_touched: vec![mint.to_string()],
            tx_fee: 5000,
            accounts_created: 0,
        }
    }

    #[tokio::test]
    async fn appended_records_are_readable_back_for_their_mint() {
        let dir = tempdir();
        let log = DeltaLog::open(dir.path(), 300, 60).await.unwrap();
        log.append(&sample_record("MINT1", 1)).await.unwrap();
        log.append(&sample_record("MINT2", 2)).await.unwrap();

        let records = log.read_for_mint("MINT1", 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].signature, "sig1");
    }

    #[tokio::test]
    async fn cleanup_skips_the_currently_open_bucket() {
        let dir = tempdir();
        let log = DeltaLog::open(dir.path(), 300, 0).await.unwrap();
        log.append(&sample_record("MINT1", 1)).await.unwrap();
        let removed = log.cleanup_old_files().await.unwrap();
        assert_eq!(removed, 0);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("failed to create tempdir")
    }
}
