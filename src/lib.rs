//! Junction - a reverse-proxy API gateway data plane.
//!
//! Junction matches inbound HTTP requests against a routing snapshot
//! loaded from a configuration store, runs a priority-ordered plugin chain
//! around the proxy step (CORS, request logging, distributed rate
//! limiting), and forwards surviving requests to backend services over a
//! shared connection pool with hop-by-hop header hygiene. A watcher
//! subscribes to the control plane's pub/sub channel and swaps in a fresh
//! snapshot atomically on every configuration change.
//!
//! # Architecture
//! The crate follows a **hexagonal architecture**: `core` holds the
//! business logic (routing index, plugin model, limiter algorithms, proxy
//! engine, snapshot coordination), `ports` declares the traits the core
//! depends on, and `adapters` implements them (hyper upstream client,
//! PostgreSQL repository, Redis script store and change feed, the axum
//! dispatcher). The control plane — CRUD on services, routes, plugins —
//! is a separate process and out of scope here; Junction only reads.
//!
//! # Request life cycle
//! ```text
//! client → listener → dispatcher
//!   → RouteMatcher::matches        (radix tree + method/host filters)
//!   → Chain::execute(BeforeRequest)  [may abort]
//!   → ProxyEngine::forward         (streaming, pooled)
//!   → Chain::execute(AfterResponse)  (reverse order, observers)
//! ```
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` or a domain error type at the
//! ports; anything that reaches a client is materialized as an HTTP
//! status plus a small JSON body.
//!
//! # Concurrency
//! Snapshots are immutable and published through an atomic pointer swap;
//! plugin instances are shared and re-entrant, with all per-request state
//! confined to the request context. Rate-limit atomicity lives in the
//! store (server-side scripts), never in client locks.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        HttpClientAdapter, HttpHandler, MemoryStore, PostgresRepository, RedisChangeStream,
        RedisStore,
    },
    core::{
        snapshot::{ReloadCoordinator, RoutingSnapshot, SnapshotHolder, empty_holder},
        watcher::Watcher,
    },
    utils::GracefulShutdown,
};
