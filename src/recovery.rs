//! Open-time recovery.
//!
//! Discovers the segment files left in a store directory and rebuilds each
//! segment's index by walking its record stream from offset zero. Writes
//! never resume into a recovered file; the store always starts a fresh
//! active segment after recovery.

use std::fs;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::StoreConfig;
use crate::errcorrupt;
use crate::error::{Error, Result};
use crate::record::{Record, RECORD_OVERHEAD};
use crate::segment::Segment;

/// Scan buffer size for index rebuilds.
pub(crate) const RECOVERY_BUFFER_SIZE: usize = 8192;

/// Records declaring more than ten scan buffers of payload are treated as
/// corruption. This also bounds key and value sizes accepted back from disk.
pub(crate) const MAX_RECORD_SIZE: u32 = (RECOVERY_BUFFER_SIZE * 10) as u32;

/// Finds every segment file under the configured prefix, orders them by
/// their numeric suffix, and rebuilds their indexes.
pub(crate) fn discover_segments(config: &StoreConfig) -> Result<Vec<Arc<Segment>>> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();

    for entry in fs::read_dir(&config.dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(config.file_prefix.as_str()) else {
            continue;
        };
        let Ok(id) = suffix.parse::<u64>() else { continue };
        found.push((id, entry.path()));
    }

    // Numeric order, not directory order: segment 10 is newer than segment 2
    // and must land later in the set.
    found.sort_by_key(|(id, _)| *id);

    let mut segments = Vec::with_capacity(found.len());
    for (id, path) in found {
        let segment = Segment::open(path, id)?;
        scan_segment(&segment)?;
        segments.push(Arc::new(segment));
    }
    Ok(segments)
}

/// Rebuilds one segment's index. Scanning stops at the first corrupt or
/// truncated record; entries registered before that point stay valid, and
/// the trailing bytes are abandoned rather than rewritten.
fn scan_segment(segment: &Segment) -> Result<()> {
    let file = fs::File::open(segment.path())?;
    let mut reader = BufReader::with_capacity(RECOVERY_BUFFER_SIZE, file);
    let mut buf: Vec<u8> = Vec::with_capacity(RECOVERY_BUFFER_SIZE);

    let mut offset = 0u64;
    let mut entries = 0u64;
    loop {
        match next_record(&mut reader, &mut buf) {
            Ok(None) => break,
            Ok(Some(record)) => {
                let consumed = buf.len() as u64;
                segment.insert(record.key, offset);
                offset += consumed;
                entries += 1;
            }
            Err(Error::CorruptRecord(msg)) => {
                tracing::warn!(
                    segment = segment.id(),
                    offset,
                    reason = %msg,
                    "abandoning segment scan at corrupt record"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(segment = segment.id(), entries, bytes = offset, "recovered segment index");
    Ok(())
}

/// Reads the next record into `buf`, which afterwards holds exactly the
/// record's bytes. Returns None at a clean end of the stream.
fn next_record<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<Record>> {
    let mut size_bytes = [0u8; 4];
    match reader.read_exact(&mut size_bytes) {
        Ok(()) => {}
        // End of the stream at a record boundary, or inside a torn size
        // prefix; either way there is nothing more to index.
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let total = LittleEndian::read_u32(&size_bytes);
    if total < RECORD_OVERHEAD as u32 || total > MAX_RECORD_SIZE {
        return errcorrupt!(
            "declared record size {total} outside [{RECORD_OVERHEAD}, {MAX_RECORD_SIZE}]"
        );
    }

    buf.clear();
    buf.extend_from_slice(&size_bytes);
    buf.resize(total as usize, 0);
    if let Err(e) = reader.read_exact(&mut buf[4..]) {
        if e.kind() == ErrorKind::UnexpectedEof {
            return errcorrupt!("record declares {total} bytes but the file ends early");
        }
        return Err(e.into());
    }

    Record::decode(buf).map(Some)
}
