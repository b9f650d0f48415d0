// Notification fan-out pipeline: domain events -> broker -> notifications collection
pub mod consumer;
pub mod events;
pub mod publisher;

pub use consumer::{store_and_link, ConsumerHandle, ConsumerStats, Delivery, NotificationConsumer};
pub use events::DomainEvent;
pub use publisher::{NotificationPublisher, PublisherStats};
