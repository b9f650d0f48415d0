// Cache key layout: "user:<username>" and "post:<username>:<postNumber>"

use crate::models::PostKey;

pub const USER_PREFIX: &str = "user:";
pub const POST_PREFIX: &str = "post:";

pub fn user_key(username: &str) -> String {
    format!("{}{}", USER_PREFIX, username)
}

pub fn post_key(key: &PostKey) -> String {
    format!("{}{}:{}", POST_PREFIX, key.username, key.post_number)
}
