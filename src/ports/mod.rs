//! Ports: the traits the core depends on, implemented by adapters.
pub mod change_stream;
pub mod http_client;
pub mod ratelimit_store;
pub mod repository;
