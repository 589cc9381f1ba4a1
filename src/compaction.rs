//! Background compaction.
//!
//! A pass merges every segment strictly older than the most recently frozen
//! one into a single consolidated segment holding the most recent value per
//! key, then swaps the merged prefix out of the set and deletes the stale
//! files. The most recently frozen segment and the active segment are left
//! untouched, so the set never holds more than three members once a pass
//! settles.
//!
//! The pass owns the segment-set write lock while it merges and swaps:
//! readers and the write pipeline observe either the old set or the new one,
//! never a half-swapped state.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::record::Record;
use crate::segment::Segment;
use crate::state::StoreState;

/// How long a queued trigger waits before rechecking a busy compactor.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Kicks off a compaction pass off the write pipeline's critical path.
///
/// A trigger that lands while another pass is still running waits for that
/// pass to finish instead of being dropped; a rollover fires this exactly
/// once, so discarding the trigger could leave the set above the threshold
/// until some later rollover. The pass itself rechecks the set size under
/// the lock, so a trigger made stale while it waited is a cheap no-op.
pub(crate) fn spawn(state: Arc<StoreState>, config: StoreConfig) {
    tokio::spawn(async move {
        let _guard = loop {
            match state.try_start_compaction() {
                Some(guard) => break guard,
                None => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        };
        if let Err(e) = compact(&state, &config) {
            tracing::error!(error = %e, "compaction pass failed");
        }
    });
}

/// Runs one compaction pass. A no-op when the set shrank below the threshold
/// since the trigger. Concurrent passes are serialized by the caller through
/// [`StoreState::try_start_compaction`].
pub(crate) fn compact(state: &StoreState, config: &StoreConfig) -> Result<()> {
    let mut segments = state.segments.write().unwrap();
    if segments.len() < config.compact_min_segments {
        return Ok(());
    }

    // Everything older than the most recently frozen segment gets merged;
    // that segment and the active one at the tail survive the pass.
    let merge_end = segments.len() - 2;

    let target_id = state.next_segment_id();
    let target_path = config.segment_path(target_id);
    let mut file = File::options().append(true).create(true).open(&target_path)?;

    let outcome = Segment::open(target_path.clone(), target_id).and_then(|target| {
        merge(&segments[..merge_end], &target, &mut file).map(|records| (target, records))
    });
    let (target, merged) = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            // A partial consolidation file carries the highest counter and
            // would shadow newer values on the next open. Drop it with the
            // pass.
            drop(file);
            if let Err(remove_err) = fs::remove_file(&target_path) {
                tracing::warn!(
                    path = %target_path.display(),
                    error = %remove_err,
                    "failed to remove abandoned consolidation file"
                );
            }
            return Err(e);
        }
    };
    file.sync_all()?;
    drop(file);

    let removed: Vec<Arc<Segment>> = segments.drain(..merge_end).collect();
    segments.insert(0, Arc::new(target));
    let remaining = segments.len();
    drop(segments);

    for segment in &removed {
        if let Err(e) = fs::remove_file(segment.path()) {
            tracing::warn!(
                segment = segment.id(),
                path = %segment.path().display(),
                error = %e,
                "failed to remove compacted segment file"
            );
        }
    }

    tracing::info!(
        target = target_id,
        merged_segments = removed.len(),
        records = merged,
        remaining,
        "compaction pass completed"
    );
    Ok(())
}

/// Walks `sources` newest first and appends the first version seen of every
/// key to the consolidation target. Returns the number of records written.
///
/// Unreadable records are skipped so one corrupt entry cannot sink the whole
/// pass; append failures abort it.
fn merge(sources: &[Arc<Segment>], target: &Segment, file: &mut File) -> Result<usize> {
    let mut written: HashSet<String> = HashSet::new();
    let mut offset = 0u64;

    for segment in sources.iter().rev() {
        for (key, position) in segment.entries() {
            if written.contains(&key) {
                continue;
            }

            let value = match segment.read_at(position) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        segment = segment.id(),
                        key = %key,
                        error = %e,
                        "skipping unreadable record during compaction"
                    );
                    continue;
                }
            };

            let buf = Record::new(key.clone(), value).encode();
            file.write_all(&buf)?;
            target.insert(key.clone(), offset);
            offset += buf.len() as u64;
            written.insert(key);
        }
    }

    Ok(written.len())
}
