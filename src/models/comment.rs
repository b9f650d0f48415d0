use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::post::{Post, PostKey};

/// Comment document. The comments collection is authoritative; copies
/// embedded in a post are a rebuilt projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub post_id: String,
    pub post_username: String,
    pub post_number: i64,
    /// Author of the comment.
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub number_of_likes: i64,
}

impl Comment {
    pub fn new(post: &Post, author: &str, content: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            post_id: post.id.clone(),
            post_username: post.username.clone(),
            post_number: post.post_number,
            username: author.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            likes: BTreeMap::new(),
            number_of_likes: 0,
        }
    }

    pub fn post_key(&self) -> PostKey {
        PostKey::new(&self.post_username, self.post_number)
    }

    pub fn like_count_consistent(&self) -> bool {
        self.number_of_likes == self.likes.len() as i64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewComment {
    /// Commenting username.
    pub username: String,
    pub content: String,
}
