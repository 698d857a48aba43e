use crate::schema;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

/// Row of the `users` table. Only the presence columns are written by this service.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = schema::users)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: String,
    pub is_online: bool,
    pub last_active: Option<DateTime<Utc>>,
}

/// Presence columns for an update. `last_active` is stamped on every status change.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::users)]
pub struct PresenceUpdate {
    pub is_online: bool,
    pub last_active: Option<DateTime<Utc>>,
}
