//! # ferre-concurrency: Concurrency Primitives for Ferre POS
//!
//! Shared mutable state and background execution, each reachable only
//! through its own synchronization.
//!
//! ## Components
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ferre-concurrency                                │
//! │                                                                         │
//! │  SafeCounter ── AtomicI64, every operation lock-free                   │
//! │                                                                         │
//! │  SafeMap<K,V> ── RwLock<HashMap>; concurrent reads, serialized writes, │
//! │                  upsert/update as one read-modify-write                 │
//! │                                                                         │
//! │  WorkerPool<T>                                                          │
//! │    submit ──try_send──► [ bounded job queue ] ──► N tokio workers      │
//! │       │                                              │                  │
//! │       └── PoolFull (never blocks)                    ▼                  │
//! │                                     [ bounded results ] ──► stream     │
//! │                                       (full: drop + warn)               │
//! │                                                                         │
//! │  CircuitBreaker                                                         │
//! │    Closed ──failures ≥ max──► Open ──reset_timeout──► HalfOpen         │
//! │      ▲                                                  │   │           │
//! │      └──────────── trial succeeds ──────────────────────┘   │           │
//! │                    trial fails ──► Open ◄───────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod circuit_breaker;
pub mod counter;
pub mod error;
pub mod safe_map;
pub mod worker_pool;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use counter::SafeCounter;
pub use error::{BreakerError, ConcurrencyError, ConcurrencyResult, JobError};
pub use safe_map::SafeMap;
pub use worker_pool::{Job, JobResult, PoolStats, WorkerPool, WorkerPoolConfig};
