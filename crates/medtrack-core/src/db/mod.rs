//! Local durable store for medtrack

mod cache_repository;
mod connection;
mod meta_repository;
mod migrations;
mod queue_repository;

pub use cache_repository::{CacheRepository, SqliteCacheRepository};
pub use connection::LocalStore;
pub use meta_repository::{MetaRepository, SqliteMetaRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
