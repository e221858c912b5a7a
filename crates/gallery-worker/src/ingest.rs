//! Batch ingestion: turns queue records into variant pipeline runs.
//!
//! Records are handled sequentially and every record is attempted. A batch with any
//! failed record is reported as a whole so the transport redelivers it.

use crate::envelope::{parse_body, QueueBatch, QueueRecord, RecordBody, SourceEvent};
use gallery_core::models::is_variant_key;
use gallery_core::{ImageError, ImageOptimizationRequest, OptimizationConfig};
use gallery_processing::ImageOptimizer;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TestEvent,
    NotObjectCreated(String),
    UnrecognizedExtension,
    VariantOutput,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TestEvent => write!(f, "test_event"),
            SkipReason::NotObjectCreated(name) => write!(f, "event {} is not ObjectCreated", name),
            SkipReason::UnrecognizedExtension => write!(f, "unrecognized_extension"),
            SkipReason::VariantOutput => write!(f, "variant_output"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecordStatus {
    Processed { manifest_key: String, variants: usize },
    Skipped(SkipReason),
    Failed(ImageError),
}

/// Outcome of one object (or one unparseable record) within a batch
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub message_id: String,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    fn push(&mut self, outcome: RecordOutcome) {
        match outcome.status {
            RecordStatus::Processed { .. } => self.processed += 1,
            RecordStatus::Skipped(_) => self.skipped += 1,
            RecordStatus::Failed(_) => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn first_error(&self) -> Option<&ImageError> {
        self.outcomes.iter().find_map(|outcome| match &outcome.status {
            RecordStatus::Failed(error) => Some(error),
            _ => None,
        })
    }

    /// `BatchPartialFailure` carrying the first error when anything failed
    pub fn into_result(self) -> Result<BatchReport, ImageError> {
        if let Some(first) = self.first_error().cloned() {
            return Err(ImageError::BatchPartialFailure {
                failed: self.failed,
                processed: self.processed,
                first: Box::new(first),
            });
        }
        Ok(self)
    }
}

pub struct EventIngestWorker {
    optimizer: Arc<dyn ImageOptimizer>,
    config: OptimizationConfig,
}

impl EventIngestWorker {
    pub fn new(optimizer: Arc<dyn ImageOptimizer>, config: OptimizationConfig) -> Self {
        Self { optimizer, config }
    }

    /// Process every record, failing the batch if any record failed.
    #[tracing::instrument(skip(self, batch), fields(records = batch.records.len()))]
    pub async fn handle_batch(&self, batch: &QueueBatch) -> Result<BatchReport, ImageError> {
        let start = std::time::Instant::now();
        let report = self.process_batch(batch).await;

        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Batch handled"
        );

        report.into_result()
    }

    /// Process every record and report per-record outcomes without failing.
    pub async fn process_batch(&self, batch: &QueueBatch) -> BatchReport {
        let mut report = BatchReport::default();
        for record in &batch.records {
            self.process_record(record, &mut report).await;
        }
        report
    }

    async fn process_record(&self, record: &QueueRecord, report: &mut BatchReport) {
        let events = match parse_body(&record.body) {
            Ok(RecordBody::TestEvent) => {
                tracing::info!(message_id = %record.message_id, "Acknowledged S3 test event");
                report.push(RecordOutcome {
                    message_id: record.message_id.clone(),
                    bucket: None,
                    key: None,
                    status: RecordStatus::Skipped(SkipReason::TestEvent),
                });
                return;
            }
            Ok(RecordBody::Events(events)) => events,
            Err(error) => {
                Self::log_failure(&record.message_id, None, &error);
                report.push(RecordOutcome {
                    message_id: record.message_id.clone(),
                    bucket: None,
                    key: None,
                    status: RecordStatus::Failed(error),
                });
                return;
            }
        };

        for event in events {
            let status = self.process_event(&record.message_id, &event).await;
            report.push(RecordOutcome {
                message_id: record.message_id.clone(),
                bucket: Some(event.bucket),
                key: Some(event.key),
                status,
            });
        }
    }

    async fn process_event(&self, message_id: &str, event: &SourceEvent) -> RecordStatus {
        if let Some(reason) = self.skip_reason(event) {
            tracing::debug!(
                message_id = %message_id,
                bucket = %event.bucket,
                key = %event.key,
                reason = %reason,
                "Record skipped"
            );
            return RecordStatus::Skipped(reason);
        }

        let request = match ImageOptimizationRequest::from_names(
            event.bucket.clone(),
            event.key.clone(),
            &event.formats,
            &self.config.formats,
        ) {
            Ok(request) => request,
            Err(error) => {
                Self::log_failure(message_id, Some(event), &error);
                return RecordStatus::Failed(error);
            }
        };

        match self.optimizer.optimize(&request).await {
            Ok(outcome) => RecordStatus::Processed {
                variants: outcome.manifest.variants.len(),
                manifest_key: outcome.manifest_key,
            },
            Err(error) => {
                Self::log_failure(message_id, Some(event), &error);
                RecordStatus::Failed(error)
            }
        }
    }

    fn skip_reason(&self, event: &SourceEvent) -> Option<SkipReason> {
        if !event.is_object_created() {
            return Some(SkipReason::NotObjectCreated(
                event.event_name.clone().unwrap_or_default(),
            ));
        }
        if is_variant_key(&self.config.variant_prefix, &event.key) {
            return Some(SkipReason::VariantOutput);
        }

        let file_name = event.key.rsplit('/').next().unwrap_or_default();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        if !self.config.image_extensions.contains(&extension) {
            return Some(SkipReason::UnrecognizedExtension);
        }
        None
    }

    fn log_failure(message_id: &str, event: Option<&SourceEvent>, error: &ImageError) {
        tracing::error!(
            message_id = %message_id,
            bucket = event.map(|e| e.bucket.as_str()).unwrap_or_default(),
            key = event.map(|e| e.key.as_str()).unwrap_or_default(),
            error = %error,
            error_code = error.error_code(),
            reason = error.reason(),
            recoverable = error.is_recoverable(),
            "Record failed"
        );
    }
}
