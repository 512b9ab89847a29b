//! Redis-backed discovery run queue.
//!
//! Run requests are pushed onto a Redis list and popped by the worker
//! pool; a stats hash tracks queue throughput. Requests are small JSON
//! payloads (organization, connection, request time), never credentials.

use crate::error::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use singura_core::Uuid;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub organization_id: Uuid,
    pub connection_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(organization_id: Uuid, connection_id: Uuid) -> Self {
        Self {
            organization_id,
            connection_id,
            requested_at: Utc::now(),
        }
    }
}

pub struct RedisRunQueue {
    redis: ConnectionManager,
    queue_key: String,
    stats_key: String,
}

impl RedisRunQueue {
    pub fn new(redis: ConnectionManager, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            redis,
            queue_key: format!("{}:queue", prefix),
            stats_key: format!("{}:stats", prefix),
        }
    }

    pub async fn enqueue(&self, request: &RunRequest) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(request)?;

        conn.lpush::<_, _, ()>(&self.queue_key, payload).await?;
        conn.hincr::<_, _, _, ()>(&self.stats_key, "enqueued", 1)
            .await?;

        debug!(
            connection_id = %request.connection_id,
            "Enqueued discovery run request"
        );
        Ok(())
    }

    /// Pop the oldest request, or `None` when the queue is empty. Workers
    /// poll this with a small idle sleep.
    pub async fn dequeue(&self) -> Result<Option<RunRequest>> {
        let mut conn = self.redis.clone();
        let payload: Option<String> = conn.rpop(&self.queue_key, None).await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        conn.hincr::<_, _, _, ()>(&self.stats_key, "dequeued", 1)
            .await?;

        let request: RunRequest = serde_json::from_str(&payload)?;
        Ok(Some(request))
    }

    pub async fn depth(&self) -> Result<u64> {
        let mut conn = self.redis.clone();
        let depth: u64 = conn.llen(&self.queue_key).await?;
        Ok(depth)
    }

    pub async fn stats(&self) -> Result<HashMap<String, i64>> {
        let mut conn = self.redis.clone();
        let stats: HashMap<String, i64> = conn.hgetall(&self.stats_key).await?;
        Ok(stats)
    }
}
