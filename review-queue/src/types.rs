//! Flat queue record model and its stream-field encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{QueueError, QueueResult};

/// One enqueued review request.
///
/// The record is flat on purpose: every field is a string-encodable scalar so
/// it maps 1:1 onto Redis stream fields and survives redelivery unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub request_id: Uuid,
    /// Provider label, e.g. "github" / "gitlab".
    pub provider: String,
    pub repository_id: String,
    pub change_request_number: u64,
    pub submitted_at: DateTime<Utc>,
    /// Correlation id carried across the async boundary.
    pub correlation_id: String,
    /// Stable digest over (provider, repository_id, change_request_number).
    pub hash: String,
}

impl QueuedRequest {
    /// Builds a record with a fresh id and the stable request hash.
    pub fn new(
        provider: &str,
        repository_id: &str,
        change_request_number: u64,
        correlation_id: &str,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            provider: provider.to_string(),
            repository_id: repository_id.to_string(),
            change_request_number,
            submitted_at: Utc::now(),
            correlation_id: correlation_id.to_string(),
            hash: request_hash(provider, repository_id, change_request_number),
        }
    }

    /// Field pairs for `XADD`.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("request_id", self.request_id.to_string()),
            ("provider", self.provider.clone()),
            ("repository_id", self.repository_id.clone()),
            (
                "change_request_number",
                self.change_request_number.to_string(),
            ),
            ("submitted_at", self.submitted_at.to_rfc3339()),
            ("correlation_id", self.correlation_id.clone()),
            ("hash", self.hash.clone()),
        ]
    }

    /// Rebuilds a record from `XREADGROUP` fields.
    ///
    /// # Errors
    /// [`QueueError::InvalidRecord`] when a required field is absent or
    /// unparseable.
    pub fn from_fields(fields: &std::collections::HashMap<String, String>) -> QueueResult<Self> {
        let get = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| QueueError::InvalidRecord(format!("missing field `{name}`")))
        };

        let request_id = Uuid::parse_str(&get("request_id")?)
            .map_err(|e| QueueError::InvalidRecord(format!("request_id: {e}")))?;
        let change_request_number = get("change_request_number")?
            .parse::<u64>()
            .map_err(|e| QueueError::InvalidRecord(format!("change_request_number: {e}")))?;
        let submitted_at = DateTime::parse_from_rfc3339(&get("submitted_at")?)
            .map_err(|e| QueueError::InvalidRecord(format!("submitted_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            request_id,
            provider: get("provider")?,
            repository_id: get("repository_id")?,
            change_request_number,
            submitted_at,
            correlation_id: get("correlation_id")?,
            hash: get("hash")?,
        })
    }
}

/// Stable sha256 digest over the change-request identity.
///
/// Identical refs always hash identically across processes and restarts.
pub fn request_hash(provider: &str, repository_id: &str, change_request_number: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b":");
    hasher.update(repository_id.as_bytes());
    hasher.update(b":");
    hasher.update(change_request_number.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_is_stable_and_identity_sensitive() {
        let a = request_hash("github", "acme/app", 42);
        let b = request_hash("github", "acme/app", 42);
        let c = request_hash("gitlab", "acme/app", 42);
        let d = request_hash("github", "acme/app", 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fields_round_trip() {
        let req = QueuedRequest::new("gitlab", "group/project", 7, "corr-1");
        let map: std::collections::HashMap<String, String> = req
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let back = QueuedRequest::from_fields(&map).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn missing_field_is_invalid_record() {
        let mut map: std::collections::HashMap<String, String> =
            QueuedRequest::new("github", "r", 1, "c")
                .to_fields()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        map.remove("hash");
        let err = QueuedRequest::from_fields(&map).unwrap_err();
        assert!(matches!(err, QueueError::InvalidRecord(_)));
        assert!(!err.is_transient());
    }
}
