//! Adapters: concrete implementations of the ports plus the HTTP
//! dispatcher.
pub mod http_client;
pub mod http_handler;
pub mod memory_store;
pub mod postgres;
pub mod redis_events;
pub mod redis_store;

pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use memory_store::MemoryStore;
pub use postgres::PostgresRepository;
pub use redis_events::RedisChangeStream;
pub use redis_store::RedisStore;
