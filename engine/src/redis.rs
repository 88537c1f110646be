//! Redis-backed cache and message bus.
//!
//! The deduct script is the single contention point of the hot path: one Lua
//! execution reads and conditionally mutates both counters, so any two
//! concurrent deducts for the same `(user, service, month)` serialize inside
//! Redis. All arithmetic is integer cents.
//!
//! The bus rides Redis Streams with a consumer group: XADD on publish,
//! XREADGROUP on poll (redelivering the pending entries first), XACK on ack.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Script};
use ulid::Ulid;

use tally_core::{DeductEvent, DEDUCT_TOPIC};

use crate::bus::{BusError, Delivery, MessageBus};
use crate::cache::{Cache, CacheError, ScriptOutcome};

/// The atomic deduct script.
///
/// KEYS[1] = quota counter, KEYS[2] = balance counter (cents),
/// ARGV[1] = count, ARGV[2] = total cost in cents.
///
/// Returns `{code, free, paid, deducted}` with code 1 = success,
/// 0 = insufficient, -1 = quota miss, -2 = balance miss. `cost` is always
/// `unit * count`, so the unit price divides out exactly.
const DEDUCT_SCRIPT: &str = r"
local quota = redis.call('GET', KEYS[1])
if not quota then
    return {-1, 0, 0, 0}
end
quota = tonumber(quota)

local count = tonumber(ARGV[1])
local cost = tonumber(ARGV[2])

if quota >= count then
    redis.call('DECRBY', KEYS[1], count)
    return {1, count, 0, 0}
end

local balance = redis.call('GET', KEYS[2])
if not balance then
    return {-2, 0, 0, 0}
end
balance = tonumber(balance)

local free = quota
if free < 0 then
    free = 0
end
local paid = count - free
local needed = (cost / count) * paid

if balance >= needed then
    redis.call('SET', KEYS[1], 0)
    redis.call('DECRBY', KEYS[2], needed)
    return {1, free, paid, needed}
end

return {0, 0, 0, 0}
";

/// Compare-and-delete release for the deduct mutex.
const UNLOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis-backed [`Cache`].
pub struct RedisCache {
    conn: ConnectionManager,
    deduct: Script,
    unlock: Script,
}

impl RedisCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the URL is invalid or the connection cannot
    /// be established.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        Ok(Self::new(conn))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            deduct: Script::new(DEDUCT_SCRIPT),
            unlock: Script::new(UNLOCK_SCRIPT),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn deduct(
        &self,
        quota_key: &str,
        balance_key: &str,
        count: i64,
        cost_cents: i64,
    ) -> Result<ScriptOutcome, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .deduct
            .key(quota_key)
            .key(balance_key)
            .arg(count)
            .arg(cost_cents)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError(e.to_string()))?;

        match reply.as_slice() {
            [1, free, paid, deducted] => Ok(ScriptOutcome::Deducted {
                free_count: *free,
                paid_count: *paid,
                balance_deducted_cents: *deducted,
            }),
            [0, ..] => Ok(ScriptOutcome::Insufficient),
            [-1, ..] => Ok(ScriptOutcome::QuotaMiss),
            [-2, ..] => Ok(ScriptOutcome::BalanceMiss),
            other => Err(CacheError(format!("unexpected script reply: {other:?}"))),
        }
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await.map_err(|e| CacheError(e.to_string()))?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| CacheError(e.to_string()))?;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let token = Ulid::new().to_string();
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        Ok(acquired.then_some(token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .unlock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError(e.to_string()))?;
        Ok(())
    }
}

/// Field name carrying the JSON event inside a stream entry.
const EVENT_FIELD: &str = "event";

/// Redis-Streams-backed [`MessageBus`].
pub struct RedisStreamsBus {
    conn: ConnectionManager,
    topic: String,
    group: String,
    consumer: String,
}

impl RedisStreamsBus {
    /// Connect and ensure the consumer group exists.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the connection or group creation fails.
    pub async fn connect(url: &str, group: &str, consumer: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError(e.to_string()))?;
        Self::with_connection(conn, group, consumer).await
    }

    /// Wrap an existing connection manager and ensure the group exists.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if group creation fails for any reason other than
    /// the group already existing.
    pub async fn with_connection(
        conn: ConnectionManager,
        group: &str,
        consumer: &str,
    ) -> Result<Self, BusError> {
        let bus = Self {
            conn,
            topic: DEDUCT_TOPIC.to_owned(),
            group: group.to_owned(),
            consumer: consumer.to_owned(),
        };

        let mut conn = bus.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&bus.topic, &bus.group, "$")
            .await;
        if let Err(err) = created {
            // BUSYGROUP: the group already exists, which is fine.
            if !err.to_string().contains("BUSYGROUP") {
                return Err(BusError(err.to_string()));
            }
        }
        Ok(bus)
    }

    fn decode(reply: StreamReadReply) -> Result<Vec<Delivery>, BusError> {
        let mut deliveries = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                let Some(raw) = entry.get::<String>(EVENT_FIELD) else {
                    tracing::warn!(id = %entry.id, "stream entry without event field, skipping");
                    continue;
                };
                match serde_json::from_str::<DeductEvent>(&raw) {
                    Ok(event) => deliveries.push(Delivery {
                        id: entry.id.clone(),
                        event,
                    }),
                    Err(err) => {
                        tracing::warn!(id = %entry.id, error = %err, "undecodable deduct event, skipping");
                    }
                }
            }
        }
        Ok(deliveries)
    }

    /// Read deliveries with the given start id (`0` = pending, `>` = new).
    async fn read(&self, start: &str, max: usize) -> Result<Vec<Delivery>, BusError> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.topic], &[start], &options)
            .await
            .map_err(|e| BusError(e.to_string()))?;
        Self::decode(reply)
    }
}

#[async_trait]
impl MessageBus for RedisStreamsBus {
    async fn publish(&self, event: &DeductEvent) -> Result<(), BusError> {
        let payload = serde_json::to_string(event).map_err(|e| BusError(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(&self.topic, "*", &[(EVENT_FIELD, payload)])
            .await
            .map_err(|e| BusError(e.to_string()))?;
        Ok(())
    }

    async fn poll(&self, max: usize) -> Result<Vec<Delivery>, BusError> {
        // Redeliver this consumer's pending entries first, then read new ones.
        let mut deliveries = self.read("0", max).await?;
        if deliveries.len() < max {
            let fresh = self.read(">", max - deliveries.len()).await?;
            deliveries.extend(fresh);
        }
        Ok(deliveries)
    }

    async fn ack(&self, ids: &[String]) -> Result<(), BusError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.topic, &self.group, ids)
            .await
            .map_err(|e| BusError(e.to_string()))?;
        Ok(())
    }
}
