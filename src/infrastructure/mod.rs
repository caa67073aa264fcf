//! Infrastructure: configuration, logging, persistence, transport, and
//! in-memory implementations of the external ports.

pub mod config;
pub mod database;
pub mod http;
pub mod logging;
pub mod memstore;
pub mod shared_cache;

pub use config::ConfigLoader;
pub use database::{DatabaseConnection, SqliteStore};
pub use http::HttpServer;
pub use memstore::MemStore;
pub use shared_cache::InMemorySharedCache;
