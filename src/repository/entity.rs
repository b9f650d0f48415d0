use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{Debug, Display};

use crate::infrastructure::document::Filter;
use crate::infrastructure::{POSTS, USERS};
use crate::models::{Post, PostKey, User};
use crate::repository::keys;

/// An entity served through the look-aside cache, addressed by a business key.
pub trait CachedEntity:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    type Key: Display + Debug + Clone + Send + Sync + 'static;

    const COLLECTION: &'static str;
    const CACHE_PREFIX: &'static str;

    fn cache_key(key: &Self::Key) -> String;

    /// Store filter selecting the document with this business key.
    fn key_filter(key: &Self::Key) -> Filter;

    fn key(&self) -> Self::Key;

    /// Record the store-assigned id after an insert.
    fn assign_id(&mut self, id: String);
}

impl CachedEntity for User {
    type Key = String;

    const COLLECTION: &'static str = USERS;
    const CACHE_PREFIX: &'static str = keys::USER_PREFIX;

    fn cache_key(key: &String) -> String {
        keys::user_key(key)
    }

    fn key_filter(key: &String) -> Filter {
        Filter::new().eq("username", key.as_str())
    }

    fn key(&self) -> String {
        self.username.clone()
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

impl CachedEntity for Post {
    type Key = PostKey;

    const COLLECTION: &'static str = POSTS;
    const CACHE_PREFIX: &'static str = keys::POST_PREFIX;

    fn cache_key(key: &PostKey) -> String {
        keys::post_key(key)
    }

    fn key_filter(key: &PostKey) -> Filter {
        Filter::new()
            .eq("username", key.username.as_str())
            .eq("post_number", key.post_number)
    }

    fn key(&self) -> PostKey {
        Post::key(self)
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}
