use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::comment::Comment;

/// Business key of a post: the author plus the author-private sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostKey {
    pub username: String,
    pub post_number: i64,
}

impl PostKey {
    pub fn new(username: &str, post_number: i64) -> Self {
        Self {
            username: username.to_string(),
            post_number,
        }
    }
}

impl fmt::Display for PostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.username, self.post_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub username: String,
    pub post_number: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Projection of the comments collection, rebuilt after each comment write.
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Liking username -> time of the like.
    #[serde(default)]
    pub likes: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub number_of_likes: i64,
}

impl Post {
    pub fn new(username: &str, post_number: i64, content: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            username: username.to_string(),
            post_number,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            comments: Vec::new(),
            likes: BTreeMap::new(),
            number_of_likes: 0,
        }
    }

    pub fn key(&self) -> PostKey {
        PostKey::new(&self.username, self.post_number)
    }

    pub fn is_liked_by(&self, username: &str) -> bool {
        self.likes.contains_key(username)
    }

    /// `number_of_likes` must always equal the size of the like set.
    pub fn like_count_consistent(&self) -> bool {
        self.number_of_likes == self.likes.len() as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostUpdate {
    pub content: String,
}
