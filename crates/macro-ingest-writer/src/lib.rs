//! Bronze/silver/gold object writer for macro-ingest
//!
//! Raw payloads, Parquet frames and run manifests are written through an
//! OpenDAL operator (fs, s3 or memory) under a Hive-style layout. Objects are
//! immutable: a path that exists is never rewritten.

mod encoding;
mod error;
mod partition;
mod raw_store;
mod retry;
mod storage;

pub use encoding::{decode_parquet, encode_parquet};
pub use error::{Result, WriterError};
pub use partition::{file_name, Layer, PartitionLayout};
pub use raw_store::{FrameWrite, RawStore, RawWrite, RawWriteOutcome, StoredManifest};
pub use retry::RetryPolicy;
pub use storage::build_operator;

pub use opendal::Operator;
