use async_trait::async_trait;
use gallery_core::{
    ImageError, ImageOptimizationRequest, ImageResult, OptimizationConfig, OutputFormat,
    VariantManifest,
};
use gallery_processing::{ImageOptimizer, PipelineOutcome, VariantPipeline};
use gallery_storage::{MemoryStorage, Operation};
use gallery_worker::{EventIngestWorker, QueueBatch, RecordStatus, SkipReason};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

const DRAFTS: &str = "listings-gallery-draft";

/// Records every request and fails those whose key contains `fail_fragment`
#[derive(Default)]
struct RecordingOptimizer {
    fail_fragment: Option<String>,
    requests: Mutex<Vec<ImageOptimizationRequest>>,
}

impl RecordingOptimizer {
    fn failing_on(fragment: &str) -> Self {
        Self {
            fail_fragment: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.source_object_key.clone())
            .collect()
    }
}

#[async_trait]
impl ImageOptimizer for RecordingOptimizer {
    async fn optimize(&self, request: &ImageOptimizationRequest) -> ImageResult<PipelineOutcome> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(fragment) = &self.fail_fragment {
            if request.source_object_key.contains(fragment.as_str()) {
                return Err(ImageError::DownloadFailed {
                    bucket: request.source_bucket.clone(),
                    key: request.source_object_key.clone(),
                    message: "connection reset".to_string(),
                });
            }
        }

        Ok(PipelineOutcome {
            manifest_key: format!("optimized/{}/manifest.json", request.source_object_key),
            manifest: VariantManifest {
                source_bucket: request.source_bucket.clone(),
                source_key: request.source_object_key.clone(),
                source_width: 100,
                source_height: 100,
                variants: Vec::new(),
            },
        })
    }
}

fn config() -> OptimizationConfig {
    OptimizationConfig {
        breakpoints: vec![320, 768, 1920],
        formats: vec![OutputFormat::Webp, OutputFormat::Jpeg],
        ..OptimizationConfig::default()
    }
}

fn s3_body(event_name: &str, key: &str) -> String {
    json!({
        "Records": [{
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": event_name,
            "s3": {
                "bucket": { "name": DRAFTS },
                "object": { "key": key }
            }
        }]
    })
    .to_string()
}

fn batch(bodies: &[String]) -> QueueBatch {
    let records: Vec<_> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| json!({ "messageId": format!("m-{}", i + 1), "body": body }))
        .collect();
    QueueBatch::from_json(&json!({ "Records": records }).to_string()).unwrap()
}

fn jpeg_source(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 256) as u8])
    }));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
    buffer.into_inner()
}

#[tokio::test]
async fn test_probe_is_acknowledged_without_pipeline_run() {
    let optimizer = Arc::new(RecordingOptimizer::default());
    let worker = EventIngestWorker::new(optimizer.clone(), config());

    let probe = json!({ "Service": "Amazon S3", "Event": "s3:TestEvent", "Bucket": DRAFTS });
    let report = worker
        .handle_batch(&batch(&[
            probe.to_string(),
            s3_body("ObjectCreated:Put", "user-1/a.jpg"),
        ]))
        .await
        .unwrap();

    assert_eq!(optimizer.keys(), vec!["user-1/a.jpg"]);
    assert_eq!((report.processed, report.skipped, report.failed), (1, 1, 0));
    assert!(matches!(
        report.outcomes[0].status,
        RecordStatus::Skipped(SkipReason::TestEvent)
    ));
}

#[tokio::test]
async fn test_failed_record_does_not_stop_the_batch() {
    let optimizer = Arc::new(RecordingOptimizer::failing_on("second"));
    let worker = EventIngestWorker::new(optimizer.clone(), config());

    let result = worker
        .handle_batch(&batch(&[
            s3_body("ObjectCreated:Put", "user-1/first.jpg"),
            s3_body("ObjectCreated:Put", "user-1/second.jpg"),
            s3_body("ObjectCreated:Put", "user-1/third.jpg"),
        ]))
        .await;

    assert_eq!(
        optimizer.keys(),
        vec!["user-1/first.jpg", "user-1/second.jpg", "user-1/third.jpg"]
    );
    match result {
        Err(ImageError::BatchPartialFailure {
            failed,
            processed,
            first,
        }) => {
            assert_eq!((failed, processed), (1, 2));
            assert!(matches!(*first, ImageError::DownloadFailed { ref key, .. } if key == "user-1/second.jpg"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_filtering_and_envelopes() {
    let optimizer = Arc::new(RecordingOptimizer::default());
    let worker = EventIngestWorker::new(optimizer.clone(), config());

    let sns = json!({
        "Type": "Notification",
        "Message": s3_body("ObjectCreated:Post", "user-2/from+sns.png"),
    });
    let direct = json!({
        "imageKey": "user-3/listing-1/direct.webp",
        "bucketName": "listings-gallery",
        "formats": ["jpeg"],
    });

    let report = worker
        .handle_batch(&batch(&[
            s3_body("ObjectRemoved:Delete", "user-1/gone.jpg"),
            s3_body("ObjectCreated:Put", "user-1/notes.txt"),
            s3_body("ObjectCreated:Put", "optimized/user-1/a/320w.webp"),
            sns.to_string(),
            direct.to_string(),
        ]))
        .await
        .unwrap();

    assert_eq!((report.processed, report.skipped, report.failed), (2, 3, 0));
    assert_eq!(
        optimizer.keys(),
        vec!["user-2/from sns.png", "user-3/listing-1/direct.webp"]
    );
    let direct_request = optimizer.requests.lock().unwrap()[1].clone();
    assert_eq!(direct_request.source_bucket, "listings-gallery");
    assert_eq!(direct_request.requested_formats, vec![OutputFormat::Jpeg]);
}

#[tokio::test]
async fn test_malformed_record_fails_batch() {
    let optimizer = Arc::new(RecordingOptimizer::default());
    let worker = EventIngestWorker::new(optimizer.clone(), config());

    let result = worker
        .handle_batch(&batch(&[
            "{not json".to_string(),
            s3_body("ObjectCreated:Put", "user-1/ok.jpg"),
        ]))
        .await;

    assert_eq!(optimizer.keys(), vec!["user-1/ok.jpg"]);
    let err = result.unwrap_err();
    assert!(!err.is_recoverable());
    assert!(matches!(
        err,
        ImageError::BatchPartialFailure { ref first, .. } if matches!(**first, ImageError::MalformedEvent(_))
    ));
}

#[tokio::test]
async fn test_full_batch_publishes_variant_matrix() {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(DRAFTS, "user-1/house.jpg", jpeg_source(1920, 1080), "image/jpeg");

    let pipeline = Arc::new(VariantPipeline::new(storage.clone(), config()));
    let worker = EventIngestWorker::new(pipeline, config());

    let report = worker
        .handle_batch(&batch(&[s3_body("ObjectCreated:Put", "user-1/house.jpg")]))
        .await
        .unwrap();
    assert_eq!(report.processed, 1);

    let keys = storage.keys(DRAFTS);
    assert_eq!(
        keys,
        vec![
            "optimized/user-1/house/1920w.jpg",
            "optimized/user-1/house/1920w.webp",
            "optimized/user-1/house/320w.jpg",
            "optimized/user-1/house/320w.webp",
            "optimized/user-1/house/768w.jpg",
            "optimized/user-1/house/768w.webp",
            "optimized/user-1/house/manifest.json",
            "user-1/house.jpg",
        ]
    );

    let manifest = storage
        .object(DRAFTS, "optimized/user-1/house/manifest.json")
        .unwrap();
    let manifest: VariantManifest = serde_json::from_slice(&manifest.data).unwrap();
    assert_eq!(manifest.variants.len(), 6);
    let heights: Vec<u32> = manifest.variants.iter().map(|v| v.height).collect();
    assert_eq!(heights, vec![180, 432, 1080, 180, 432, 1080]);
}

#[tokio::test]
async fn test_single_failed_upload_withholds_manifest() {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(DRAFTS, "user-1/house.jpg", jpeg_source(1920, 1080), "image/jpeg");
    storage.fail_once(Operation::Put, "768w.webp");

    let pipeline = Arc::new(VariantPipeline::new(storage.clone(), config()));
    let worker = EventIngestWorker::new(pipeline, config());

    let err = worker
        .handle_batch(&batch(&[s3_body("ObjectCreated:Put", "user-1/house.jpg")]))
        .await
        .unwrap_err();

    let ImageError::BatchPartialFailure { first, .. } = err else {
        panic!("expected batch failure");
    };
    match *first {
        ImageError::PartialVariantFailure {
            failures,
            attempted,
            ..
        } => {
            assert_eq!(attempted, 6);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].size_name, "768w");
            assert_eq!(failures[0].format, OutputFormat::Webp);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(storage
        .object(DRAFTS, "optimized/user-1/house/manifest.json")
        .is_none());
    assert_eq!(storage.keys(DRAFTS).len(), 1 + 5);
}

#[tokio::test]
async fn test_draft_of_user_named_like_variant_prefix_is_optimized() {
    let optimizer = Arc::new(RecordingOptimizer::default());
    let worker = EventIngestWorker::new(optimizer.clone(), config());

    let report = worker
        .handle_batch(&batch(&[
            s3_body("ObjectCreated:Post", "optimized/0b4e9c1e.jpg"),
            s3_body("ObjectCreated:Put", "optimized/optimized/0b4e9c1e/320w.webp"),
        ]))
        .await
        .unwrap();

    assert_eq!((report.processed, report.skipped, report.failed), (1, 1, 0));
    assert_eq!(optimizer.keys(), vec!["optimized/0b4e9c1e.jpg"]);
}

#[tokio::test]
async fn test_key_that_is_not_utf8_is_malformed_not_retried() {
    let optimizer = Arc::new(RecordingOptimizer::default());
    let worker = EventIngestWorker::new(optimizer.clone(), config());

    let err = worker
        .handle_batch(&batch(&[s3_body("ObjectCreated:Put", "user-1/%FF%FE.jpg")]))
        .await
        .unwrap_err();

    assert!(optimizer.keys().is_empty());
    assert!(!err.is_recoverable());
    assert!(matches!(
        err,
        ImageError::BatchPartialFailure { ref first, .. } if matches!(**first, ImageError::MalformedEvent(_))
    ));
}
