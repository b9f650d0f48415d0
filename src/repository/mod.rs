// Cache-coherent entity repository over the document store and cache
pub mod entity;
pub mod entity_repository;
pub mod keys;

pub use entity::CachedEntity;
pub use entity_repository::{CacheStats, EntityRepository};

use crate::models::{Post, User};

pub type UserRepository = EntityRepository<User>;
pub type PostRepository = EntityRepository<Post>;
