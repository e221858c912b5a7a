//! AWS Signature Version 4 POST policies.
//!
//! `object_store` signs request URLs but has no notion of browser POST uploads, so the
//! policy document is built and signed here. The same module decodes and evaluates a
//! policy the way S3 does, which the in-memory backend uses to simulate uploads.

use crate::traits::{PostPolicy, PresignedPost, StorageError, StorageResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

#[derive(Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn hmac(key: &[u8], data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StorageError::ConfigError(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> StorageResult<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// Signs POST policies for one region with one set of credentials
#[derive(Debug, Clone)]
pub struct PostPolicySigner {
    region: String,
    credentials: SigningCredentials,
}

impl PostPolicySigner {
    pub fn new(region: impl Into<String>, credentials: SigningCredentials) -> Self {
        Self {
            region: region.into(),
            credentials,
        }
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!(
            "{}/{}/{}/{}/aws4_request",
            self.credentials.access_key_id, date_stamp, self.region, SERVICE
        )
    }

    fn signature(&self, date_stamp: &str, encoded_policy: &str) -> StorageResult<String> {
        let key = derive_signing_key(
            &self.credentials.secret_access_key,
            date_stamp,
            &self.region,
            SERVICE,
        )?;
        Ok(hex::encode(hmac(&key, encoded_policy.as_bytes())?))
    }

    /// Build and sign a policy restricting uploads to exactly `key` in `bucket`.
    pub fn sign(
        &self,
        url: String,
        bucket: &str,
        key: &str,
        policy: &PostPolicy,
        now: DateTime<Utc>,
    ) -> StorageResult<PresignedPost> {
        if policy.min_content_length > policy.max_content_length {
            return Err(StorageError::ConfigError(format!(
                "content-length-range [{}, {}] is empty",
                policy.min_content_length, policy.max_content_length
            )));
        }
        let expires_in = chrono::Duration::from_std(policy.expires_in)
            .map_err(|e| StorageError::ConfigError(format!("Invalid policy expiry: {}", e)))?;
        if expires_in <= chrono::Duration::zero() {
            return Err(StorageError::ConfigError(
                "Policy expiry must be greater than zero".to_string(),
            ));
        }
        let expires_at = now + expires_in;

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential = self.credential_scope(&date_stamp);

        let mut conditions = vec![
            json!({ "bucket": bucket }),
            json!(["eq", "$key", key]),
            json!([
                "content-length-range",
                policy.min_content_length,
                policy.max_content_length
            ]),
            json!({ "x-amz-algorithm": ALGORITHM }),
            json!({ "x-amz-credential": credential }),
            json!({ "x-amz-date": amz_date }),
        ];
        if let Some(token) = &self.credentials.session_token {
            conditions.push(json!({ "x-amz-security-token": token }));
        }

        let document = json!({
            "expiration": expires_at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "conditions": conditions,
        });
        let document = serde_json::to_vec(&document)
            .map_err(|e| StorageError::BackendError(format!("Failed to encode policy: {}", e)))?;
        let encoded_policy = BASE64.encode(document);
        let signature = self.signature(&date_stamp, &encoded_policy)?;

        let mut fields = vec![
            ("key".to_string(), key.to_string()),
            ("bucket".to_string(), bucket.to_string()),
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date),
        ];
        if let Some(token) = &self.credentials.session_token {
            fields.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        fields.push(("Policy".to_string(), encoded_policy));
        fields.push(("X-Amz-Signature".to_string(), signature));

        Ok(PresignedPost {
            url,
            fields,
            expires_at,
        })
    }

    /// Check that a submitted form carries a signature this signer produced.
    pub fn verify(&self, fields: &[(String, String)]) -> StorageResult<()> {
        let policy = form_field(fields, "policy")
            .ok_or_else(|| StorageError::AccessDenied("missing Policy field".to_string()))?;
        let signature = form_field(fields, "x-amz-signature")
            .ok_or_else(|| StorageError::AccessDenied("missing X-Amz-Signature field".to_string()))?;
        let credential = form_field(fields, "x-amz-credential").ok_or_else(|| {
            StorageError::AccessDenied("missing X-Amz-Credential field".to_string())
        })?;

        let mut scope = credential.split('/');
        let access_key = scope.next().unwrap_or_default();
        let date_stamp = scope.next().unwrap_or_default();
        if access_key != self.credentials.access_key_id
            || credential != self.credential_scope(date_stamp)
        {
            return Err(StorageError::AccessDenied(
                "credential scope does not match".to_string(),
            ));
        }

        let expected = self.signature(date_stamp, policy)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(StorageError::AccessDenied(
                "signature does not match".to_string(),
            ));
        }
        Ok(())
    }
}

/// Case-insensitive form field lookup, as S3 treats POST field names
pub fn form_field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(field, _)| field.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Eq { field: String, value: String },
    StartsWith { field: String, prefix: String },
    ContentLengthRange { min: u64, max: u64 },
}

/// A decoded POST policy document
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    pub expiration: DateTime<Utc>,
    conditions: Vec<Condition>,
}

fn malformed(reason: impl fmt::Display) -> StorageError {
    StorageError::AccessDenied(format!("malformed policy: {}", reason))
}

fn field_name(raw: &Value) -> StorageResult<String> {
    raw.as_str()
        .map(|s| s.trim_start_matches('$').to_lowercase())
        .ok_or_else(|| malformed("condition field is not a string"))
}

impl PolicyDocument {
    /// Decode the base64 `Policy` form field
    pub fn decode(encoded_policy: &str) -> StorageResult<Self> {
        let raw = BASE64.decode(encoded_policy).map_err(malformed)?;
        let document: Value = serde_json::from_slice(&raw).map_err(malformed)?;

        let expiration = document
            .get("expiration")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing expiration"))?;
        let expiration = DateTime::parse_from_rfc3339(expiration)
            .map_err(malformed)?
            .with_timezone(&Utc);

        let mut conditions = Vec::new();
        let entries = document
            .get("conditions")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing conditions"))?;

        for entry in entries {
            match entry {
                Value::Object(map) => {
                    for (field, value) in map {
                        let value = value
                            .as_str()
                            .ok_or_else(|| malformed("condition value is not a string"))?;
                        conditions.push(Condition::Eq {
                            field: field.to_lowercase(),
                            value: value.to_string(),
                        });
                    }
                }
                Value::Array(parts) => {
                    let op = parts
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| malformed("condition without operator"))?;
                    match (op.to_lowercase().as_str(), parts.len()) {
                        ("eq", 3) => conditions.push(Condition::Eq {
                            field: field_name(&parts[1])?,
                            value: parts[2].as_str().unwrap_or_default().to_string(),
                        }),
                        ("starts-with", 3) => conditions.push(Condition::StartsWith {
                            field: field_name(&parts[1])?,
                            prefix: parts[2].as_str().unwrap_or_default().to_string(),
                        }),
                        ("content-length-range", 3) => {
                            let min = parts[1].as_u64().ok_or_else(|| malformed("bad range"))?;
                            let max = parts[2].as_u64().ok_or_else(|| malformed("bad range"))?;
                            conditions.push(Condition::ContentLengthRange { min, max });
                        }
                        (op, _) => return Err(malformed(format!("unknown condition '{}'", op))),
                    }
                }
                _ => return Err(malformed("condition is neither an object nor an array")),
            }
        }

        Ok(Self {
            expiration,
            conditions,
        })
    }

    pub fn content_length_range(&self) -> Option<(u64, u64)> {
        self.conditions.iter().find_map(|c| match c {
            Condition::ContentLengthRange { min, max } => Some((*min, *max)),
            _ => None,
        })
    }

    /// The exact key this policy allows, if it pins one
    pub fn exact_key(&self) -> Option<&str> {
        self.conditions.iter().find_map(|c| match c {
            Condition::Eq { field, value } if field == "key" => Some(value.as_str()),
            _ => None,
        })
    }

    /// Evaluate a submitted form against the policy.
    ///
    /// Every condition must hold and every submitted field (other than the policy,
    /// signature and file) must be covered by a condition.
    pub fn evaluate(
        &self,
        bucket: &str,
        fields: &[(String, String)],
        content_length: u64,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        if now >= self.expiration {
            return Err(StorageError::AccessDenied(format!(
                "policy expired at {}",
                self.expiration
            )));
        }

        for condition in &self.conditions {
            match condition {
                Condition::Eq { field, value } => {
                    let actual = if field == "bucket" {
                        Some(bucket)
                    } else {
                        form_field(fields, field)
                    };
                    if actual != Some(value.as_str()) {
                        return Err(StorageError::AccessDenied(format!(
                            "condition failed: ['eq', '${}', '{}']",
                            field, value
                        )));
                    }
                }
                Condition::StartsWith { field, prefix } => {
                    if !form_field(fields, field).is_some_and(|v| v.starts_with(prefix.as_str())) {
                        return Err(StorageError::AccessDenied(format!(
                            "condition failed: ['starts-with', '${}', '{}']",
                            field, prefix
                        )));
                    }
                }
                Condition::ContentLengthRange { min, max } => {
                    if content_length < *min || content_length > *max {
                        return Err(StorageError::AccessDenied(format!(
                            "content length {} outside [{}, {}]",
                            content_length, min, max
                        )));
                    }
                }
            }
        }

        for (name, _) in fields {
            let name = name.to_lowercase();
            let exempt = matches!(name.as_str(), "policy" | "x-amz-signature" | "file")
                || name.starts_with("x-ignore-");
            let covered = self.conditions.iter().any(|c| match c {
                Condition::Eq { field, .. } | Condition::StartsWith { field, .. } => {
                    *field == name
                }
                Condition::ContentLengthRange { .. } => false,
            });
            if !exempt && !covered {
                return Err(StorageError::AccessDenied(format!(
                    "field '{}' is not covered by the policy",
                    name
                )));
            }
        }

        Ok(())
    }
}
