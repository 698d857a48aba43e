#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tokio::sync::mpsc;

use lotto_realtime::auth::JwtVerifier;
use lotto_realtime::error::StoreError;
use lotto_realtime::realtime::RealtimeHub;
use lotto_realtime::store::{IdentityKey, IdentityStore, MemoryIdentityStore};

pub const SECRET: &str = "integration-secret";

pub fn token_for(user_id: &str) -> String {
    encode(
        &Header::default(),
        &serde_json::json!({ "userId": user_id, "role": "user" }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Memory store that remembers every status write.
pub struct RecordingStore {
    inner: MemoryIdentityStore,
    calls: Mutex<Vec<(String, bool)>>,
}

impl RecordingStore {
    pub fn with_online(keys: &[&str]) -> Self {
        Self {
            inner: MemoryIdentityStore::with_online(keys.iter().copied()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str, online: bool) -> usize {
        self.calls()
            .iter()
            .filter(|(k, o)| k == key && *o == online)
            .count()
    }
}

#[async_trait]
impl IdentityStore for RecordingStore {
    async fn find_online_count(&self) -> Result<u64, StoreError> {
        self.inner.find_online_count().await
    }

    async fn set_online_status(
        &self,
        key: &IdentityKey,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((key.as_str().to_string(), online));
        self.inner.set_online_status(key, online, at).await
    }
}

/// Store whose writes always fail.
pub struct BrokenStore;

#[async_trait]
impl IdentityStore for BrokenStore {
    async fn find_online_count(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn set_online_status(
        &self,
        _key: &IdentityKey,
        _online: bool,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".into()))
    }
}

pub fn hub_with(store: Arc<dyn IdentityStore>) -> Arc<RealtimeHub> {
    RealtimeHub::new(store, Arc::new(JwtVerifier::new(SECRET))).unwrap()
}

/// Every frame currently queued for a connection, decoded.
pub fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(serde_json::from_str(&text).unwrap());
    }
    frames
}

pub fn of_type<'a>(frames: &'a [Value], event_type: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f["type"] == event_type).collect()
}
