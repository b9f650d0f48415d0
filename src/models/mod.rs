// Social entities persisted in the document store

pub mod comment;
pub mod notification;
pub mod post;
pub mod user;

pub use comment::{Comment, NewComment};
pub use notification::{NewNotification, Notification, NotificationKind};
pub use post::{NewPost, Post, PostKey, PostUpdate};
pub use user::{NewUser, User, UserUpdate};
