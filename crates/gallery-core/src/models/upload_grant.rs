use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Constraints the storage provider enforces on a direct upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantConstraints {
    pub min_bytes: u64,
    pub max_bytes: u64,
    /// The only key the grant may write to
    pub exact_key: String,
}

/// Short-lived credential allowing a client to POST one object straight to storage.
///
/// The client submits a multipart form to `endpoint_url` with every entry of
/// `required_fields` (in order) followed by the file itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    pub key: String,
    pub expires_in_seconds: u64,
    pub expires_at: DateTime<Utc>,
    pub endpoint_url: String,
    #[serde(serialize_with = "serialize_ordered_fields")]
    pub required_fields: Vec<(String, String)>,
    pub constraints: GrantConstraints,
}

impl UploadGrant {
    /// Look up a required form field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.required_fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

fn serialize_ordered_fields<S>(fields: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (name, value) in fields {
        map.serialize_entry(name, value)?;
    }
    map.end()
}
