use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::Envelope;

/// Pending transcription handles.
pub const TRANSCRIPTIONS_QUEUE: &str = "audio_lro:transcriptions";

/// Pending identification handles, one per profile chunk.
pub const IDENTIFICATIONS_QUEUE: &str = "audio_lro:identifications";

/// Lease held by the one worker allowed to drain the queues.
pub const WORKER_LEASE_KEY: &str = "audio_lro:worker_lease";

const RENEW_LEASE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_LEASE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// An envelope taken off the queue, plus the exact payload stored in Redis
/// so it can be removed from the processing list afterwards.
#[derive(Debug)]
pub struct Delivery<T> {
    pub envelope: Envelope<T>,
    raw: String,
}

/// Redis-backed queue with at-least-once delivery.
///
/// Dequeued elements move to a companion processing list until completed;
/// elements stranded there by a crashed worker are moved back with
/// [`JobQueue::recover_in_flight`].
pub struct JobQueue {
    client: redis::Client,
    key: String,
}

impl JobQueue {
    pub fn new(redis_url: &str, key: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            key: key.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.key
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.key)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Enqueue an envelope.
    pub async fn enqueue<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(envelope).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Take the oldest element, moving it to the processing list.
    ///
    /// Elements that do not decode are dead-lettered and reported as an error.
    pub async fn dequeue<T: DeserializeOwned>(&self) -> Result<Option<Delivery<T>>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn
            .rpoplpush(&self.key, self.processing_key())
            .await
            .map_err(QueueError::Redis)?;

        let Some(raw) = result else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(envelope) => Ok(Some(Delivery { envelope, raw })),
            Err(e) => {
                self.move_to(&mut conn, &raw, &self.dead_key()).await?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    /// Remove a finished delivery from the processing list.
    pub async fn complete<T>(&self, delivery: &Delivery<T>) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(self.processing_key(), 1, &delivery.raw)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Put a failed delivery back on the queue with its attempt count bumped.
    pub async fn redeliver<T: Serialize + Clone>(
        &self,
        delivery: &Delivery<T>,
    ) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let next = delivery.envelope.clone().next_attempt();
        let payload = serde_json::to_string(&next).map_err(QueueError::Serialize)?;

        redis::pipe()
            .atomic()
            .lpush(&self.key, &payload)
            .ignore()
            .lrem(self.processing_key(), 1, &delivery.raw)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Move a delivery that exhausted its attempts to the dead-letter list.
    pub async fn dead_letter<T>(&self, delivery: &Delivery<T>) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        self.move_to(&mut conn, &delivery.raw, &self.dead_key()).await
    }

    async fn move_to(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        raw: &str,
        target: &str,
    ) -> Result<(), QueueError> {
        redis::pipe()
            .atomic()
            .lpush(target, raw)
            .ignore()
            .lrem(self.processing_key(), 1, raw)
            .ignore()
            .query_async::<()>(conn)
            .await
            .map_err(QueueError::Redis)
    }

    /// Move everything left in the processing list back onto the queue.
    /// Only the holder of the [`WorkerLease`] may call this, before it starts
    /// dequeuing; anything in the processing list then belongs to a dead worker.
    pub async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .rpoplpush(self.processing_key(), &self.key)
                .await
                .map_err(QueueError::Redis)?;
            if moved.is_none() {
                return Ok(recovered);
            }
            recovered += 1;
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

/// Exclusive, expiring claim on the queues.
///
/// Processing lists are shared, so a worker recovering them while another is
/// still working would redeliver live jobs. Workers hold this lease instead;
/// a second worker waits until the first stops renewing.
pub struct WorkerLease {
    client: redis::Client,
    key: String,
    token: String,
    ttl: Duration,
}

impl WorkerLease {
    pub fn new(redis_url: &str, key: &str, ttl: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            key: key.to_string(),
            token: Uuid::new_v4().to_string(),
            ttl,
        })
    }

    /// How often the holder should renew to keep the lease.
    pub fn renew_interval(&self) -> Duration {
        self.ttl / 3
    }

    fn ttl_millis(&self) -> u64 {
        self.ttl.as_millis().max(1) as u64
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Take the lease if nobody holds it.
    pub async fn acquire(&self) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_millis())
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(reply.is_some())
    }

    /// Extend the lease. `false` means it expired and may belong to someone else.
    pub async fn renew(&self) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let renewed: i64 = redis::Script::new(RENEW_LEASE)
            .key(&self.key)
            .arg(&self.token)
            .arg(self.ttl_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(renewed == 1)
    }

    /// Give the lease up if still held.
    pub async fn release(&self) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let released: i64 = redis::Script::new(RELEASE_LEASE)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(released == 1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_renews_well_before_expiry() {
        let lease =
            WorkerLease::new("redis://127.0.0.1:6379", WORKER_LEASE_KEY, Duration::from_secs(30))
                .unwrap();
        assert_eq!(lease.renew_interval(), Duration::from_secs(10));
        assert_eq!(lease.ttl_millis(), 30_000);
    }

    #[test]
    fn test_leases_carry_distinct_tokens() {
        let a = WorkerLease::new("redis://127.0.0.1:6379", WORKER_LEASE_KEY, Duration::from_secs(30))
            .unwrap();
        let b = WorkerLease::new("redis://127.0.0.1:6379", WORKER_LEASE_KEY, Duration::from_secs(30))
            .unwrap();
        assert_ne!(a.token, b.token);
    }
}
