// Infrastructure: the collaborators the core talks to
pub mod broker;                // Topic-partitioned broker + process-wide pool
pub mod cache;                 // Look-aside key-value cache
pub mod database;              // DocumentStore collections + in-memory store
pub mod decorators;            // Fixed per-call deadlines
pub mod document;              // Filter / Update document model
pub mod id_generator;          // Store-assigned document ids
pub mod sqlite_database;       // SQLite-backed DocumentStore
pub mod traits;                // Collaborator seams

pub use broker::{BrokerMessage, BrokerPool, InMemoryBroker, PublishHandle};
pub use cache::InMemoryCache;
pub use database::{InMemoryDocumentStore, COMMENTS, NOTIFICATIONS, POSTS, USERS};
pub use decorators::{TimeoutCacheDecorator, TimeoutStoreDecorator};
pub use document::{Document, Filter, Update};
pub use id_generator::DocumentIdGenerator;
pub use sqlite_database::SqliteDocumentStore;
pub use traits::{CacheInterface, DocumentStore, MessageBroker, Subscription};
