use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::infrastructure::document::Update;

/// User document. `username` is the business key and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// Outgoing friend list. Stored per user; not kept symmetric.
    #[serde(default)]
    pub friends: Vec<String>,
    #[serde(default)]
    pub post_count: i64,
    /// Highest post number ever issued. Unlike `post_count` it is never
    /// decremented, so numbers are not reused after a delete.
    #[serde(default)]
    pub last_post_number: i64,
    /// Notification ids, oldest first. The notifications collection is the
    /// source of truth; this list is reconciled from it on read.
    #[serde(default)]
    pub notifications: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub friends: Vec<String>,
}

impl NewUser {
    pub fn named(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }

    pub fn with_friends(mut self, friends: &[&str]) -> Self {
        self.friends = friends.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: String::new(),
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            date_of_birth: self.date_of_birth,
            friends: self.friends,
            post_count: 0,
            last_post_number: 0,
            notifications: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Profile fields a client may change. Counters and lists are owned by the
/// core and are not patchable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl UserUpdate {
    pub fn to_update(&self, now: DateTime<Utc>) -> Update {
        let mut update = Update::new().set("updated_at", now.to_rfc3339());
        if let Some(first_name) = &self.first_name {
            update = update.set("first_name", first_name.as_str());
        }
        if let Some(last_name) = &self.last_name {
            update = update.set("last_name", last_name.as_str());
        }
        if let Some(email) = &self.email {
            update = update.set("email", email.as_str());
        }
        if let Some(date_of_birth) = &self.date_of_birth {
            update = update.set("date_of_birth", date_of_birth.to_string());
        }
        update
    }
}
