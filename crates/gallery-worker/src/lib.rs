//! Gallery Worker
//!
//! Consumes queue batches of storage notifications and runs the variant pipeline
//! for every newly created source image.

pub mod envelope;
pub mod ingest;
pub mod telemetry;

pub use envelope::{parse_body, QueueBatch, QueueRecord, RecordBody, SourceEvent};
pub use ingest::{BatchReport, EventIngestWorker, RecordOutcome, RecordStatus, SkipReason};
pub use telemetry::{init_tracing, LogFormat};
