//! On-disk record codec.
//!
//! Every segment file is a contiguous run of self-delimiting records:
//!
//! ```text
//! | total_size u32 | key_len u32 | key bytes | value_len u32 | value bytes | digest 20B |
//! ```
//!
//! Length prefixes are little-endian and `total_size` counts the whole record
//! including itself. The digest is the raw SHA-1 of the value bytes; readers
//! verify it on every fetch.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::errcorrupt;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Size of the SHA-1 digest stored after the value bytes.
pub const DIGEST_SIZE: usize = 20;

/// Fixed per-record overhead: three u32 length fields plus the digest.
pub const RECORD_OVERHEAD: usize = 4 + 4 + 4 + DIGEST_SIZE;

/// One key-value pair as stored in a segment file.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Size of this record's on-disk encoding.
    pub fn encoded_len(&self) -> u64 {
        (self.key.len() + self.value.len() + RECORD_OVERHEAD) as u64
    }

    /// Encodes the record into a contiguous buffer of exactly
    /// [`Record::encoded_len`] bytes, computing the value digest.
    pub fn encode(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let value = self.value.as_bytes();
        let total = key.len() + value.len() + RECORD_OVERHEAD;

        let mut buf = vec![0u8; total];
        LittleEndian::write_u32(&mut buf[0..4], total as u32);
        LittleEndian::write_u32(&mut buf[4..8], key.len() as u32);
        buf[8..8 + key.len()].copy_from_slice(key);

        let value_start = 8 + key.len();
        LittleEndian::write_u32(&mut buf[value_start..value_start + 4], value.len() as u32);
        buf[value_start + 4..value_start + 4 + value.len()].copy_from_slice(value);

        let digest = Sha1::digest(value);
        buf[total - DIGEST_SIZE..].copy_from_slice(digest.as_slice());
        buf
    }

    /// Decodes a full record buffer, `total_size` prefix included.
    ///
    /// Only the structure is validated here; digest verification belongs to
    /// the streaming read path in [`read_value`].
    pub fn decode(buf: &[u8]) -> Result<Record> {
        if buf.len() < RECORD_OVERHEAD {
            return errcorrupt!("record of {} bytes is shorter than the fixed overhead", buf.len());
        }

        let key_len = LittleEndian::read_u32(&buf[4..8]) as usize;
        let key_end = 8 + key_len;
        if key_end + 4 > buf.len() {
            return errcorrupt!("key length {key_len} overruns a {} byte record", buf.len());
        }

        let value_len = LittleEndian::read_u32(&buf[key_end..key_end + 4]) as usize;
        let value_end = key_end + 4 + value_len;
        if value_end + DIGEST_SIZE > buf.len() {
            return errcorrupt!("value length {value_len} overruns a {} byte record", buf.len());
        }

        let key = String::from_utf8(buf[8..key_end].to_vec())
            .map_err(|e| Error::CorruptRecord(format!("key is not valid utf-8: {e}")))?;
        let value = String::from_utf8(buf[key_end + 4..value_end].to_vec())
            .map_err(|e| Error::CorruptRecord(format!("value is not valid utf-8: {e}")))?;

        Ok(Record { key, value })
    }
}

/// Reads one record from `reader` and returns its value.
///
/// Forward-only streaming variant used on the read path: the key bytes are
/// skipped, the value and the stored digest are read, and the digest is
/// verified against the value before anything is returned.
pub fn read_value<R: Read>(reader: &mut R) -> Result<String> {
    let _total = reader.read_u32::<LittleEndian>()?;
    let key_len = reader.read_u32::<LittleEndian>()? as u64;

    let skipped = io::copy(&mut reader.by_ref().take(key_len), &mut io::sink())?;
    if skipped != key_len {
        return errcorrupt!("record ends inside a {key_len} byte key");
    }

    let value_len = reader.read_u32::<LittleEndian>()? as usize;
    let mut value = vec![0u8; value_len];
    reader.read_exact(&mut value)?;

    let mut stored = [0u8; DIGEST_SIZE];
    reader.read_exact(&mut stored)?;

    if Sha1::digest(&value).as_slice() != stored {
        return Err(Error::ChecksumMismatch);
    }

    String::from_utf8(value).map_err(|e| Error::CorruptRecord(format!("value is not valid utf-8: {e}")))
}
