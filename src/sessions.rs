/*!
 * # Session Store
 *
 * Key-value session persistence used for cart state, the applied coupon
 * reference and the pending order reference. Backed by a redis hash per
 * session id in production and by a plain map in tests.
 */

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::instrument;

/// Session keys used across the service.
pub const SESSION_KEY_COUPON_ID: &str = "coupon_id";
pub const SESSION_KEY_ORDER_ID: &str = "order_id";

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for session persistence operations. Values are opaque strings;
/// callers serialize what they store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, SessionError>;
    async fn put(&self, session_id: &str, key: &str, value: &str) -> Result<(), SessionError>;
    async fn remove(&self, session_id: &str, key: &str) -> Result<(), SessionError>;
}

/// Redis-backed session store: one hash per session id, refreshed TTL on
/// every write.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: Arc<Client>,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(redis: Arc<Client>, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip(self))]
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.redis.get_async_connection().await?;
        let value: Option<String> = conn.hget(Self::session_key(session_id), key).await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn put(&self, session_id: &str, key: &str, value: &str) -> Result<(), SessionError> {
        let mut conn = self.redis.get_async_connection().await?;
        let session_key = Self::session_key(session_id);
        let _: () = redis::pipe()
            .atomic()
            .hset(&session_key, key, value)
            .ignore()
            .expire(&session_key, self.ttl_secs as usize)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, session_id: &str, key: &str) -> Result<(), SessionError> {
        let mut conn = self.redis.get_async_connection().await?;
        let _: i64 = conn.hdel(Self::session_key(session_id), key).await?;
        Ok(())
    }
}

/// In-memory session store used by tests and local development.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, SessionError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .and_then(|s| s.get(key))
            .cloned())
    }

    async fn put(&self, session_id: &str, key: &str, value: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, session_id: &str, key: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.remove(key);
        }
        Ok(())
    }
}
