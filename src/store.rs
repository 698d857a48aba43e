//! Durable identity store: the online flag and last-active stamp of user records.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{PresenceUpdate, User};
use crate::schema::users;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

const MAX_IDENTITY_KEY_LEN: usize = 64;

/// Stable external user reference taken from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Trimmed, non-empty, no inner whitespace, at most 64 bytes (the `users.id` width).
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        if key.is_empty()
            || key.len() > MAX_IDENTITY_KEY_LEN
            || key.chars().any(char::is_whitespace)
        {
            return None;
        }
        Some(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Number of identities currently flagged online.
    async fn find_online_count(&self) -> Result<u64, StoreError>;

    async fn set_online_status(
        &self,
        key: &IdentityKey,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Postgres-backed store. Diesel is blocking, so every call hops onto the blocking pool.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_online_count(&self) -> Result<u64, StoreError> {
        let pool = self.pool.clone();
        let count = tokio::task::spawn_blocking(move || -> Result<i64, StoreError> {
            use crate::schema::users::dsl;
            let conn = &mut pool.get()?;
            Ok(users::table
                .filter(dsl::is_online.eq(true))
                .count()
                .get_result::<i64>(conn)?)
        })
        .await??;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn set_online_status(
        &self,
        key: &IdentityKey,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let id = key.as_str().to_string();
        let updated = tokio::task::spawn_blocking(move || -> Result<Option<User>, StoreError> {
            let conn = &mut pool.get()?;
            Ok(diesel::update(users::table.find(&id))
                .set(&PresenceUpdate {
                    is_online: online,
                    last_active: Some(at),
                })
                .returning(User::as_returning())
                .get_result(conn)
                .optional()?)
        })
        .await??;
        match updated {
            Some(user) => tracing::debug!(identity = %user.id, username = %user.username, online, "presence persisted"),
            None => tracing::debug!(identity = %key, online, "presence update matched no user"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_active: DateTime<Utc>,
}

/// In-process store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryIdentityStore {
    records: Mutex<HashMap<IdentityKey, PresenceRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed identities that are already online.
    pub fn with_online<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        let records = keys
            .into_iter()
            .filter_map(|k| IdentityKey::parse(k.as_ref()))
            .map(|k| {
                (
                    k,
                    PresenceRecord {
                        online: true,
                        last_active: now,
                    },
                )
            })
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn record(&self, key: &IdentityKey) -> Option<PresenceRecord> {
        self.lock().get(key).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityKey, PresenceRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_online_count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().values().filter(|r| r.online).count() as u64)
    }

    async fn set_online_status(
        &self,
        key: &IdentityKey,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.lock().insert(
            key.clone(),
            PresenceRecord {
                online,
                last_active: at,
            },
        );
        Ok(())
    }
}
