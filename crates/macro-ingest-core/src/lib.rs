//! macro-ingest-core - shared model for the ingestion pipeline
//!
//! Everything in this crate is pure: no I/O and no dependence on external
//! services. The clock is only read by [`hash::utc_now_iso`], which callers
//! use for record keeping.
//!
//! - [`canonical`]: tagged value model and its key-sorted compact encoding
//! - [`hash`]: content hashes for payloads and tabular frames
//! - [`manifest`]: run manifests and idempotency keys
//! - [`run_state`]: per-run state machine
//! - [`schema`] / [`transform`]: declared table shapes and the silver/gold builders

pub mod bea;
pub mod canonical;
pub mod dataset;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod run_state;
pub mod schema;
pub mod transform;

pub use canonical::{CanonicalNumber, CanonicalValue};
pub use dataset::DatasetRef;
pub use error::{strip_code, ErrorCode, PipelineError, SerializationError, StageFailure, TransformError};
pub use hash::{frame_fingerprint, short_hash, stable_payload_hash, utc_now_iso};
pub use manifest::{IdempotencyKey, RequestParams, RunManifest, Stage};
pub use run_state::{RunPhase, RunStatus, RunTracker, TransitionError};
