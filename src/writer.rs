//! Single-consumer write pipeline.
//!
//! Every mutation flows through one bounded queue drained by a single task
//! that owns the active file. That task is the only writer to the file and
//! the only mutator of the active segment's index, so offsets are handed out
//! strictly in append order and a rollover can never interleave with another
//! write. Producers block while the queue is full and until their write is
//! acknowledged.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::compaction;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::record::Record;
use crate::segment::Segment;
use crate::state::StoreState;

pub(crate) struct WriteRequest {
    pub record: Record,
    pub reply: oneshot::Sender<Result<()>>,
}

pub(crate) struct WritePipeline {
    config: StoreConfig,
    state: Arc<StoreState>,
    active: File,
    segment: Arc<Segment>,
    offset: u64,
}

impl WritePipeline {
    /// Creates a fresh active segment, registers it as the tail of the set,
    /// and spawns the consumer task. The pipeline stops on its own once every
    /// sender is gone, after draining whatever is still queued.
    pub fn start(
        config: StoreConfig,
        state: Arc<StoreState>,
    ) -> Result<(mpsc::Sender<WriteRequest>, JoinHandle<()>)> {
        let (segment, active) = open_segment(&config, &state)?;
        register(&config, &state, &segment);

        let (requests, inbox) = mpsc::channel(config.write_queue_depth);
        let pipeline = WritePipeline {
            config,
            state,
            active,
            segment,
            offset: 0,
        };
        let handle = tokio::spawn(pipeline.run(inbox));
        Ok((requests, handle))
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<WriteRequest>) {
        while let Some(request) = inbox.recv().await {
            let result = self.append(&request.record);
            if request.reply.send(result).is_err() {
                tracing::debug!("write submitter went away before the reply");
            }
        }

        if let Err(e) = self.active.sync_all() {
            tracing::warn!(error = %e, "failed to sync active segment on shutdown");
        }
        tracing::debug!(segment = self.segment.id(), "write pipeline drained and stopped");
    }

    fn append(&mut self, record: &Record) -> Result<()> {
        let size = self.active.metadata()?.len();
        if size + record.encoded_len() > self.config.max_segment_size {
            self.roll()?;
        }

        let buf = record.encode();
        let offset = self.offset;
        self.active.write_all(&buf)?;
        self.offset += buf.len() as u64;
        self.segment.insert(record.key.clone(), offset);
        Ok(())
    }

    /// Freezes the current active segment and starts a new one.
    fn roll(&mut self) -> Result<()> {
        let (segment, file) = open_segment(&self.config, &self.state)?;
        tracing::debug!(from = self.segment.id(), to = segment.id(), "rolling active segment");

        self.active = file;
        self.segment = Arc::clone(&segment);
        self.offset = 0;

        register(&self.config, &self.state, &segment);
        Ok(())
    }
}

/// Creates the segment file for the next counter value. The append handle
/// stays with the pipeline; the segment keeps its own read handle.
fn open_segment(config: &StoreConfig, state: &StoreState) -> Result<(Arc<Segment>, File)> {
    let id = state.next_segment_id();
    let path = config.segment_path(id);
    let file = File::options().append(true).create(true).open(&path)?;
    Ok((Arc::new(Segment::open(path, id)?), file))
}

/// Appends `segment` as the new tail of the set. A set that has grown to the
/// compaction threshold gets a background pass kicked off.
fn register(config: &StoreConfig, state: &Arc<StoreState>, segment: &Arc<Segment>) {
    let count = {
        let mut segments = state.segments.write().unwrap();
        segments.push(Arc::clone(segment));
        segments.len()
    };

    if count >= config.compact_min_segments {
        compaction::spawn(Arc::clone(state), config.clone());
    }
}
