//! Per-request idempotency records.
//!
//! Each request id owns a hash key `review:results:<request_id>` with fields
//! `status`, `result` (JSON), `error`, `processing_time_ms`, expiring after
//! the result retention window. Workers consult the record before executing
//! and write the terminal outcome after; a redelivered record whose prior run
//! already finished is acked without re-execution.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::cmd;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{QueueError, QueueResult};

/// Lifecycle of one queued request, as visible to the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal statuses short-circuit re-execution on redelivery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The stored outcome of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: RequestStatus,
    /// Serialized findings JSON for COMPLETED requests.
    pub result: Option<String>,
    /// Sanitized error message for FAILED requests.
    pub error: Option<String>,
    pub processing_time_ms: Option<u64>,
}

/// Handle to the idempotency keyspace, cheap to clone.
#[derive(Clone)]
pub struct IdempotencyStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl IdempotencyStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl })
    }

    fn key(request_id: Uuid) -> String {
        format!("review:results:{request_id}")
    }

    /// Reads the record; `None` when the request id is unknown or expired.
    pub async fn get(&self, request_id: Uuid) -> QueueResult<Option<ResultRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = cmd("HGETALL")
            .arg(Self::key(request_id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let status_raw = fields
            .get("status")
            .ok_or_else(|| QueueError::InvalidRecord("missing status".into()))?;
        let status = RequestStatus::parse(status_raw)
            .ok_or_else(|| QueueError::InvalidRecord(format!("bad status `{status_raw}`")))?;

        Ok(Some(ResultRecord {
            status,
            result: fields.get("result").cloned(),
            error: fields.get("error").cloned(),
            processing_time_ms: fields
                .get("processing_time_ms")
                .and_then(|v| v.parse().ok()),
        }))
    }

    /// Marks the request as accepted but not yet claimed by a worker.
    pub async fn mark_pending(&self, request_id: Uuid) -> QueueResult<()> {
        self.write_status(request_id, RequestStatus::Pending).await
    }

    /// Marks the request as actively executing.
    pub async fn mark_processing(&self, request_id: Uuid) -> QueueResult<()> {
        self.write_status(request_id, RequestStatus::Processing)
            .await
    }

    async fn write_status(&self, request_id: Uuid, status: RequestStatus) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let key = Self::key(request_id);
        let _: () = cmd("HSET")
            .arg(&key)
            .arg("status")
            .arg(status.as_str())
            .query_async(&mut conn)
            .await?;
        self.touch_ttl(&key).await
    }

    /// Writes the COMPLETED outcome with serialized findings.
    pub async fn write_completed(
        &self,
        request_id: Uuid,
        result_json: &str,
        processing_time_ms: u64,
    ) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let key = Self::key(request_id);
        let _: () = cmd("HSET")
            .arg(&key)
            .arg("status")
            .arg(RequestStatus::Completed.as_str())
            .arg("result")
            .arg(result_json)
            .arg("processing_time_ms")
            .arg(processing_time_ms)
            .query_async(&mut conn)
            .await?;
        debug!(%request_id, processing_time_ms, "idempotency record COMPLETED");
        self.touch_ttl(&key).await
    }

    /// Writes the FAILED outcome with a sanitized error message.
    pub async fn write_failed(
        &self,
        request_id: Uuid,
        error: &str,
        processing_time_ms: u64,
    ) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let key = Self::key(request_id);
        let _: () = cmd("HSET")
            .arg(&key)
            .arg("status")
            .arg(RequestStatus::Failed.as_str())
            .arg("error")
            .arg(error)
            .arg("processing_time_ms")
            .arg(processing_time_ms)
            .query_async(&mut conn)
            .await?;
        debug!(%request_id, processing_time_ms, "idempotency record FAILED");
        self.touch_ttl(&key).await
    }

    async fn touch_ttl(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_round_trip() {
        for s in [
            RequestStatus::Pending,
            RequestStatus::Processing,
            RequestStatus::Completed,
            RequestStatus::Failed,
        ] {
            assert_eq!(RequestStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RequestStatus::parse("nope"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
    }
}
