// ============================================================================
// Redis Streams Operations
// ============================================================================
//
// Stream verbs for the priority queues: XADD, consumer-group reads, XACK,
// XPENDING, XCLAIM. Consumer groups distribute entries across workers;
// unacknowledged entries become pending and are reclaimable after an idle
// timeout.
//
// ============================================================================

use crate::{RedisClient, Result};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use std::collections::HashMap;

/// Entry read from a stream: the server-assigned id plus the raw field map.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub stream: String,
    pub id: String,
    pub fields: HashMap<String, Vec<u8>>,
}

/// One row of the extended XPENDING reply.
#[derive(Debug, Clone)]
pub struct PendingSummary {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

impl RedisClient {
    /// XADD - append a job entry, returns the generated stream id.
    pub async fn xadd_job(
        &mut self,
        stream_key: &str,
        job_id: &str,
        payload: &[u8],
    ) -> Result<String> {
        redis::cmd("XADD")
            .arg(stream_key)
            .arg("*")
            .arg("job_id")
            .arg(job_id)
            .arg("job")
            .arg(payload)
            .query_async(self.connection_mut())
            .await
    }

    /// XGROUP CREATE ... MKSTREAM - idempotent consumer-group bootstrap.
    pub async fn ensure_group(&mut self, stream_key: &str, group: &str) -> Result<()> {
        let created: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(self.connection_mut())
            .await;

        match created {
            Ok(()) => Ok(()),
            // Group already exists - fine
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// XREADGROUP over one or more streams. `block_ms = None` returns
    /// immediately when nothing is available.
    pub async fn read_group_entries(
        &mut self,
        group: &str,
        consumer: &str,
        stream_keys: &[&str],
        count: usize,
        block_ms: Option<u64>,
    ) -> Result<Vec<StreamEntry>> {
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        if let Some(ms) = block_ms {
            options = options.block(ms as usize);
        }

        let ids: Vec<&str> = stream_keys.iter().map(|_| ">").collect();
        let reply: StreamReadReply = self
            .connection_mut()
            .xread_options(stream_keys, &ids, &options)
            .await?;

        Ok(flatten_reply(reply))
    }

    /// XACK - acknowledge one entry.
    pub async fn xack_entry(&mut self, stream_key: &str, group: &str, id: &str) -> Result<i64> {
        redis::cmd("XACK")
            .arg(stream_key)
            .arg(group)
            .arg(id)
            .query_async(self.connection_mut())
            .await
    }

    /// XDEL - drop an acknowledged entry from the stream body.
    pub async fn xdel_entry(&mut self, stream_key: &str, id: &str) -> Result<i64> {
        redis::cmd("XDEL")
            .arg(stream_key)
            .arg(id)
            .query_async(self.connection_mut())
            .await
    }

    /// XLEN - stream length.
    pub async fn xlen(&mut self, stream_key: &str) -> Result<u64> {
        redis::cmd("XLEN")
            .arg(stream_key)
            .query_async(self.connection_mut())
            .await
    }

    /// XPENDING (extended form) - entries delivered but not yet acked.
    pub async fn xpending_entries(
        &mut self,
        stream_key: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingSummary>> {
        let reply: Value = redis::cmd("XPENDING")
            .arg(stream_key)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(self.connection_mut())
            .await?;

        parse_pending_reply(reply)
    }

    /// XCLAIM - take ownership of idle pending entries; returns the claimed
    /// entries with their payloads.
    pub async fn xclaim_entries(
        &mut self,
        stream_key: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream_key)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms);
        for id in ids {
            cmd.arg(id);
        }

        let reply: Value = cmd.query_async(self.connection_mut()).await?;
        parse_claim_reply(stream_key, reply)
    }
}

fn flatten_reply(reply: StreamReadReply) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    for stream_key in reply.keys {
        for stream_id in stream_key.ids {
            let mut fields = HashMap::new();
            for (field, value) in stream_id.map.iter() {
                if let Some(bytes) = value_bytes(value) {
                    fields.insert(field.clone(), bytes);
                }
            }
            entries.push(StreamEntry {
                stream: stream_key.key.clone(),
                id: stream_id.id,
                fields,
            });
        }
    }
    entries
}

fn value_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(s) => Some(s.clone().into_bytes()),
        Value::Int(i) => Some(i.to_string().into_bytes()),
        _ => None,
    }
}

fn parse_pending_reply(reply: Value) -> Result<Vec<PendingSummary>> {
    let Value::Array(rows) = reply else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for row in rows {
        let Value::Array(parts) = row else { continue };
        if parts.len() < 4 {
            continue;
        }
        let id = string_from(&parts[0]);
        let consumer = string_from(&parts[1]);
        let idle_ms = int_from(&parts[2]);
        let delivery_count = int_from(&parts[3]);
        entries.push(PendingSummary {
            id,
            consumer,
            idle_ms,
            delivery_count,
        });
    }
    Ok(entries)
}

fn parse_claim_reply(stream_key: &str, reply: Value) -> Result<Vec<StreamEntry>> {
    let Value::Array(rows) = reply else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for row in rows {
        let Value::Array(parts) = row else { continue };
        if parts.len() < 2 {
            continue;
        }
        let id = string_from(&parts[0]);

        let mut fields = HashMap::new();
        if let Value::Array(pairs) = &parts[1] {
            let mut iter = pairs.iter();
            while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                if let Some(bytes) = value_bytes(value) {
                    fields.insert(string_from(field), bytes);
                }
            }
        }

        entries.push(StreamEntry {
            stream: stream_key.to_string(),
            id,
            fields,
        });
    }
    Ok(entries)
}

fn string_from(value: &Value) -> String {
    match value {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
        Value::SimpleString(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        _ => String::new(),
    }
}

fn int_from(value: &Value) -> u64 {
    match value {
        Value::Int(i) => *i as u64,
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).parse().unwrap_or(0),
        _ => 0,
    }
}
