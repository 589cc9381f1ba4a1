//! SegKV is a single-node persistent key-value store built on an append-only
//! segmented log.
//!
//! - Writes are binary-framed records carrying a SHA-1 digest of the value;
//!   readers verify the digest on every fetch.
//! - All mutations are serialized through a single-consumer write pipeline,
//!   which rolls to a fresh segment when the active file would outgrow its
//!   size limit.
//! - A background pass compacts frozen segments down to the most recent
//!   value per key while reads stay available.
//! - On open, the indexes are rebuilt by scanning the segment files; there
//!   is no on-disk index.

pub mod error;

pub mod config;
pub mod flock;
pub mod record;
pub mod segment;
pub mod store;
pub mod tmpfs;

mod compaction;
mod recovery;
mod state;
mod writer;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::Store;
