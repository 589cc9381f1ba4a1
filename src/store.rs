//! Store lifecycle and operations.
//!
//! A [`Store`] is opened against a directory, serves `put` and `get`, and is
//! torn down by `close`. Opening recovers any segment files already in the
//! directory, then starts a fresh active segment; writes never resume into a
//! recovered file.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::flock::DirLock;
use crate::record::Record;
use crate::recovery;
use crate::segment::Segment;
use crate::state::StoreState;
use crate::writer::{WritePipeline, WriteRequest};

const LOCK_FILE: &str = "segkv.lock";

pub struct Store {
    state: Arc<StoreState>,
    writes: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    pipeline: Mutex<Option<JoinHandle<()>>>,
    _lock: DirLock,
}

impl Store {
    /// Opens the store rooted at `dir`, rolling to a new segment whenever the
    /// active file would grow past `max_segment_size` bytes.
    pub async fn open(dir: impl Into<PathBuf>, max_segment_size: u64) -> Result<Store> {
        Self::open_with_config(StoreConfig::new(dir).max_segment_size(max_segment_size)).await
    }

    /// Opens the store with a custom configuration.
    pub async fn open_with_config(config: StoreConfig) -> Result<Store> {
        fs::create_dir_all(&config.dir)?;
        let lock = DirLock::acquire(config.dir.join(LOCK_FILE))?;

        let segments = recovery::discover_segments(&config)?;
        let next_segment_id = segments.last().map(|s| s.id() + 1).unwrap_or(0);
        let recovered = segments.len();

        let state = Arc::new(StoreState::new(segments, next_segment_id));
        let (writes, pipeline) = WritePipeline::start(config.clone(), Arc::clone(&state))?;

        tracing::info!(
            dir = %config.dir.display(),
            recovered,
            segments = state.segment_count(),
            "opened store"
        );

        Ok(Store {
            state,
            writes: Mutex::new(Some(writes)),
            pipeline: Mutex::new(Some(pipeline)),
            _lock: lock,
        })
    }

    /// Writes `value` under `key`. Blocks while the write queue is full and
    /// returns once the write pipeline has appended and indexed the record.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        if self.state.is_closed() {
            return Err(Error::Closed);
        }

        let sender = {
            let writes = self.writes.lock().unwrap();
            match writes.as_ref() {
                Some(sender) => sender.clone(),
                None => return Err(Error::Closed),
            }
        };

        let (reply, response) = oneshot::channel();
        let request = WriteRequest {
            record: Record::new(key, value),
            reply,
        };
        sender.send(request).await.map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)?
    }

    /// Returns the most recently written value for `key`.
    pub async fn get(&self, key: &str) -> Result<String> {
        if self.state.is_closed() {
            return Err(Error::Closed);
        }

        let (segment, offset) = self.locate(key).ok_or(Error::KeyNotFound)?;
        segment.read_at(offset)
    }

    /// Walks the segment set newest first and returns the first hit. The set
    /// lock is released before the file read; a frozen segment never changes
    /// and holds its own read handle, so the hit stays readable even if a
    /// compaction swaps it out of the set and unlinks its file meanwhile.
    fn locate(&self, key: &str) -> Option<(Arc<Segment>, u64)> {
        let segments = self.state.segments.read().unwrap();
        for segment in segments.iter().rev() {
            if let Some(offset) = segment.lookup(key) {
                return Some((Arc::clone(segment), offset));
            }
        }
        None
    }

    /// Number of segments currently in the set, the active one included.
    pub fn segment_count(&self) -> usize {
        self.state.segment_count()
    }

    /// Drains queued writes, stops the write pipeline, and releases the
    /// active file. Further operations fail with [`Error::Closed`];
    /// closing again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.state.mark_closed() {
            return Ok(());
        }

        // Dropping the sender lets the pipeline drain what is already queued
        // and stop on its own.
        self.writes.lock().unwrap().take();
        let pipeline = self.pipeline.lock().unwrap().take();
        if let Some(pipeline) = pipeline {
            pipeline.await?;
        }

        tracing::info!("store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tmpfs::TempDir;

    /// Counts the segment files currently in the directory.
    fn segment_files(config: &StoreConfig) -> usize {
        fs::read_dir(&config.dir)
            .expect("failed to read store dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(config.file_prefix.as_str()))
            })
            .count()
    }

    /// Polls until the directory holds at most `want` segment files.
    async fn wait_for_compaction(config: &StoreConfig, want: usize) {
        for _ in 0..100 {
            if segment_files(config) <= want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("compaction did not settle to {want} files");
    }

    #[tokio::test]
    async fn test_put_and_get() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = Store::open(temp_dir.path(), 45).await?;

        store.put("1", "v1").await?;
        store.put("2", "v2").await?;
        store.put("3", "v3").await?;

        assert_eq!(store.get("1").await?, "v1");
        assert_eq!(store.get("2").await?, "v2");
        assert_eq!(store.get("3").await?, "v3");
        assert_eq!(store.get("missing").await, Err(Error::KeyNotFound));

        store.close().await
    }

    #[tokio::test]
    async fn test_reopen_recovers_acknowledged_puts() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");

        let store = Store::open(temp_dir.path(), 45).await?;
        store.put("1", "v1").await?;
        store.put("2", "v2").await?;
        store.put("3", "v3").await?;
        store.close().await?;
        drop(store);

        let store = Store::open(temp_dir.path(), 45).await?;
        assert_eq!(store.get("1").await?, "v1");
        assert_eq!(store.get("2").await?, "v2");
        assert_eq!(store.get("3").await?, "v3");
        store.close().await
    }

    #[tokio::test]
    async fn test_compaction_keeps_latest_values() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = StoreConfig::new(temp_dir.path()).max_segment_size(35);
        let store = Store::open_with_config(config.clone()).await?;

        // Each record is exactly 35 bytes, so every put after the first
        // rolls the active segment and the fourth one leaves enough frozen
        // segments behind to trigger compaction twice.
        store.put("1", "v1").await?;
        store.put("2", "v2").await?;
        store.put("3", "v3").await?;
        store.put("2", "v5").await?;

        wait_for_compaction(&config, 3).await;

        assert_eq!(store.get("1").await?, "v1");
        assert_eq!(store.get("2").await?, "v5");
        assert_eq!(store.get("3").await?, "v3");
        assert!(store.segment_count() <= 3);

        store.close().await
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_distinct_keys() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = Arc::new(Store::open(temp_dir.path(), 1000).await?);

        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.put(format!("key_{i}"), format!("value_{i}")).await
            }));
        }
        for task in tasks {
            task.await.expect("put task panicked")?;
        }

        for i in 0..50 {
            assert_eq!(store.get(&format!("key_{i}")).await?, format!("value_{i}"));
        }

        store.close().await
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_same_key_converge() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = Arc::new(Store::open(temp_dir.path(), 1000).await?);

        let mut tasks = Vec::new();
        for i in 0..3 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(
                async move { store.put("shared", format!("w{i}")).await },
            ));
        }
        for task in tasks {
            task.await.expect("put task panicked")?;
        }

        let value = store.get("shared").await?;
        assert!(["w0", "w1", "w2"].contains(&value.as_str()), "got {value}");

        store.close().await
    }

    #[tokio::test]
    async fn test_corrupted_value_fails_checksum() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = StoreConfig::new(temp_dir.path()).max_segment_size(1000);
        let store = Store::open_with_config(config.clone()).await?;

        store.put("k", "v").await?;

        // Flip a byte inside the value region of the only record. The value
        // starts after the two length prefixes, the one-byte key, and the
        // value length prefix.
        let path = config.segment_path(0);
        let mut bytes = fs::read(&path).expect("failed to read segment file");
        bytes[13] ^= 0xff;
        fs::write(&path, bytes).expect("failed to rewrite segment file");

        assert_eq!(store.get("k").await, Err(Error::ChecksumMismatch));
        store.close().await
    }

    #[tokio::test]
    async fn test_rewrites_grow_the_active_file() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = StoreConfig::new(temp_dir.path()).max_segment_size(1000);
        let store = Store::open_with_config(config.clone()).await?;

        store.put("k", "aa").await?;
        let first = fs::metadata(config.segment_path(0))
            .expect("segment file missing")
            .len();

        store.put("k", "bb").await?;
        let second = fs::metadata(config.segment_path(0))
            .expect("segment file missing")
            .len();

        // The stale record's bytes stay in the file.
        assert_eq!(second, 2 * first);
        assert_eq!(store.get("k").await?, "bb");

        store.close().await
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = Store::open(temp_dir.path(), 1000).await?;

        store.put("k", "v").await?;
        store.close().await?;

        assert_eq!(store.put("k", "other").await, Err(Error::Closed));
        assert_eq!(store.get("k").await, Err(Error::Closed));

        // Closing again is a no-op.
        store.close().await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_is_exclusively_owned() -> Result<()> {
        let temp_dir = TempDir::new().expect("failed to create temp dir");

        let store = Store::open(temp_dir.path(), 1000).await?;
        assert!(Store::open(temp_dir.path(), 1000).await.is_err());

        store.close().await?;
        drop(store);

        let store = Store::open(temp_dir.path(), 1000).await?;
        store.close().await
    }
}
