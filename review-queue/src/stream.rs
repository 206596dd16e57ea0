//! Redis Streams transport: enqueue, group read, ack, stale-claim.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{Value, cmd};
use tracing::{debug, info, warn};

use crate::errors::{QueueError, QueueResult};
use crate::types::QueuedRequest;

/// Queue wiring options.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Stream key, default `review:agent-requests`.
    pub stream: String,
    /// Consumer group, default `agent-workers`.
    pub group: String,
    /// Records per `XREADGROUP` call.
    pub batch_size: usize,
    /// Block duration for an empty read.
    pub poll_timeout: Duration,
    /// Pending entries older than this are reclaimed by other consumers.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream: "review:agent-requests".to_string(),
            group: "agent-workers".to_string(),
            batch_size: 1,
            poll_timeout: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

/// A delivered-but-unacked record.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream entry id, needed for `XACK`.
    pub entry_id: String,
    pub request: QueuedRequest,
    /// True when this delivery was reclaimed from a stale consumer: i.e.
    /// at least one earlier attempt existed.
    pub reclaimed: bool,
}

/// Handle to the shared stream, cheap to clone per worker.
#[derive(Clone)]
pub struct RequestQueue {
    conn: ConnectionManager,
    cfg: QueueConfig,
}

impl RequestQueue {
    /// Connects and ensures the consumer group exists (`MKSTREAM`).
    ///
    /// An already-existing group (`BUSYGROUP`) is fine.
    pub async fn connect(redis_url: &str, cfg: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = ConnectionManager::new(client).await?;

        let created: Result<(), redis::RedisError> = cmd("XGROUP")
            .arg("CREATE")
            .arg(&cfg.stream)
            .arg(&cfg.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => info!(stream = %cfg.stream, group = %cfg.group, "consumer group created"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %cfg.stream, group = %cfg.group, "consumer group exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self { conn, cfg })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Appends a record to the stream; returns the entry id.
    pub async fn enqueue(&self, request: &QueuedRequest) -> QueueResult<String> {
        let mut c = cmd("XADD");
        c.arg(&self.cfg.stream).arg("*");
        for (k, v) in request.to_fields() {
            c.arg(k).arg(v);
        }
        let mut conn = self.conn.clone();
        let id: String = c.query_async(&mut conn).await?;
        debug!(
            request_id = %request.request_id,
            entry_id = %id,
            "request enqueued"
        );
        Ok(id)
    }

    /// Claims up to `batch_size` new records for `consumer`.
    ///
    /// Blocks for `poll_timeout` when the stream is empty and then returns an
    /// empty batch. Records that fail to decode are acked and skipped so a
    /// poison entry cannot wedge the group.
    pub async fn read_batch(&self, consumer: &str) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let reply: Value = cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.cfg.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(self.cfg.batch_size)
            .arg("BLOCK")
            .arg(self.cfg.poll_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.cfg.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = entries_from_read_reply(&reply);
        let mut out = Vec::with_capacity(entries.len());
        for (entry_id, fields) in entries {
            match QueuedRequest::from_fields(&fields) {
                Ok(request) => out.push(Delivery {
                    entry_id,
                    request,
                    reclaimed: false,
                }),
                Err(e) => {
                    warn!(%entry_id, error = %e, "dropping undecodable queue record");
                    self.ack(&entry_id).await?;
                }
            }
        }
        Ok(out)
    }

    /// Acknowledges a processed entry.
    pub async fn ack(&self, entry_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = cmd("XACK")
            .arg(&self.cfg.stream)
            .arg(&self.cfg.group)
            .arg(entry_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Reclaims entries pending longer than the visibility timeout.
    ///
    /// Used by workers before a blocking read so a crashed peer's deliveries
    /// are not stranded. Undecodable reclaimed entries are acked and skipped.
    pub async fn claim_stale(&self, consumer: &str) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let reply: Value = cmd("XAUTOCLAIM")
            .arg(&self.cfg.stream)
            .arg(&self.cfg.group)
            .arg(consumer)
            .arg(self.cfg.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.cfg.batch_size)
            .query_async(&mut conn)
            .await?;

        let entries = entries_from_autoclaim_reply(&reply);
        let mut out = Vec::with_capacity(entries.len());
        for (entry_id, fields) in entries {
            match QueuedRequest::from_fields(&fields) {
                Ok(request) => {
                    info!(%entry_id, request_id = %request.request_id, "reclaimed stale delivery");
                    out.push(Delivery {
                        entry_id,
                        request,
                        reclaimed: true,
                    });
                }
                Err(e) => {
                    warn!(%entry_id, error = %e, "dropping undecodable reclaimed record");
                    self.ack(&entry_id).await?;
                }
            }
        }
        Ok(out)
    }
}

/* ---------------- reply decoding ---------------- */

type Entry = (String, HashMap<String, String>);

/// `XREADGROUP` reply shape: `[[stream, [[id, [k, v, ...]], ...]]]` or Nil.
fn entries_from_read_reply(reply: &Value) -> Vec<Entry> {
    let Value::Bulk(streams) = reply else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for stream in streams {
        if let Value::Bulk(parts) = stream {
            if let Some(Value::Bulk(entries)) = parts.get(1) {
                collect_entries(entries, &mut out);
            }
        }
    }
    out
}

/// `XAUTOCLAIM` reply shape: `[next-cursor, [[id, fields], ...], (deleted)]`.
fn entries_from_autoclaim_reply(reply: &Value) -> Vec<Entry> {
    let Value::Bulk(parts) = reply else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(Value::Bulk(entries)) = parts.get(1) {
        collect_entries(entries, &mut out);
    }
    out
}

fn collect_entries(entries: &[Value], out: &mut Vec<Entry>) {
    for entry in entries {
        let Value::Bulk(pair) = entry else { continue };
        let (Some(id_val), Some(Value::Bulk(kvs))) = (pair.first(), pair.get(1)) else {
            continue;
        };
        let Some(id) = value_to_string(id_val) else {
            continue;
        };
        let mut fields = HashMap::with_capacity(kvs.len() / 2);
        for chunk in kvs.chunks_exact(2) {
            if let (Some(k), Some(v)) = (value_to_string(&chunk[0]), value_to_string(&chunk[1])) {
                fields.insert(k, v);
            }
        }
        out.push((id, fields));
    }
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, kvs: &[(&str, &str)]) -> Value {
        let mut flat = Vec::new();
        for (k, v) in kvs {
            flat.push(data(k));
            flat.push(data(v));
        }
        Value::Bulk(vec![data(id), Value::Bulk(flat)])
    }

    #[test]
    fn decodes_read_group_reply() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("review:agent-requests"),
            Value::Bulk(vec![entry("1-0", &[("request_id", "x"), ("hash", "h")])]),
        ])]);
        let entries = entries_from_read_reply(&reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "1-0");
        assert_eq!(entries[0].1.get("hash").map(String::as_str), Some("h"));
    }

    #[test]
    fn nil_reply_is_empty_batch() {
        assert!(entries_from_read_reply(&Value::Nil).is_empty());
    }

    #[test]
    fn decodes_autoclaim_reply_with_trailing_deleted_list() {
        let reply = Value::Bulk(vec![
            data("0-0"),
            Value::Bulk(vec![entry("7-1", &[("request_id", "y")])]),
            Value::Bulk(vec![]),
        ]);
        let entries = entries_from_autoclaim_reply(&reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "7-1");
    }
}
