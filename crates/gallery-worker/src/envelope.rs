//! Queue message envelopes
//!
//! A queue batch (`{"Records": [{"messageId", "body"}]}`) carries one JSON body per
//! record. A body is one of:
//!
//! - an S3 event notification, `{"Records": [{"eventName", "s3": {...}}]}`
//! - an SNS notification whose `Message` string holds an S3 event notification
//! - the S3 connectivity probe, `{"Event": "s3:TestEvent"}`
//! - a direct optimization message, `{"imageKey", "bucketName", "formats"?}`

use gallery_core::{ImageError, ImageResult};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::Value;

const TEST_EVENT: &str = "s3:TestEvent";
const SNS_NOTIFICATION: &str = "Notification";

#[derive(Debug, Clone, Deserialize)]
pub struct QueueBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

impl QueueBatch {
    pub fn from_json(input: &str) -> ImageResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    pub body: String,
}

/// One stored object a record refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    /// `None` for direct messages, which are always treated as a new object
    pub event_name: Option<String>,
    pub bucket: String,
    /// Decoded object key
    pub key: String,
    pub formats: Vec<String>,
}

impl SourceEvent {
    /// `ObjectCreated:*` notifications and direct messages
    pub fn is_object_created(&self) -> bool {
        match self.event_name.as_deref() {
            None => true,
            Some(name) => name
                .strip_prefix("s3:")
                .unwrap_or(name)
                .starts_with("ObjectCreated:"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    TestEvent,
    Events(Vec<SourceEvent>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3EventRecord {
    event_name: String,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectMessage {
    image_key: String,
    bucket_name: String,
    #[serde(default)]
    formats: Vec<String>,
}

/// Parse a queue record body.
pub fn parse_body(body: &str) -> ImageResult<RecordBody> {
    let value: Value = serde_json::from_str(body)?;
    parse_value(value, true)
}

fn parse_value(mut value: Value, allow_sns: bool) -> ImageResult<RecordBody> {
    if value.get("Event").and_then(Value::as_str) == Some(TEST_EVENT) {
        return Ok(RecordBody::TestEvent);
    }

    if allow_sns && value.get("Type").and_then(Value::as_str) == Some(SNS_NOTIFICATION) {
        let message = value
            .get("Message")
            .and_then(Value::as_str)
            .ok_or_else(|| ImageError::MalformedEvent("SNS notification without Message".into()))?;
        let inner: Value = serde_json::from_str(message)?;
        return parse_value(inner, false);
    }

    if let Some(records) = value.get_mut("Records").map(Value::take) {
        let records: Vec<S3EventRecord> = serde_json::from_value(records)?;
        let events = records
            .into_iter()
            .map(|record| {
                Ok(SourceEvent {
                    key: decode_object_key(&record.s3.object.key)?,
                    event_name: Some(record.event_name),
                    bucket: record.s3.bucket.name,
                    formats: Vec::new(),
                })
            })
            .collect::<ImageResult<Vec<_>>>()?;
        return Ok(RecordBody::Events(events));
    }

    if value.get("imageKey").is_some() {
        let message: DirectMessage = serde_json::from_value(value)?;
        return Ok(RecordBody::Events(vec![SourceEvent {
            event_name: None,
            bucket: message.bucket_name,
            key: message.image_key,
            formats: message.formats,
        }]));
    }

    Err(ImageError::MalformedEvent(
        "unrecognized message body".to_string(),
    ))
}

/// S3 notifications URL-encode object keys, with `+` standing for a space.
///
/// Keys that do not decode to UTF-8 are rejected rather than repaired: a lossy
/// decode would name an object that does not exist.
pub fn decode_object_key(raw: &str) -> ImageResult<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| ImageError::MalformedEvent(format!("object key {:?} is not UTF-8: {}", raw, e)))
}
