//! Client for data stores that expose a single JSON operation endpoint.
//!
//! Every call is a `POST` whose body names an `operation`. On top of the raw
//! transport this crate adds:
//! - TTL-bounded response caching for reads, invalidated by writes made here
//! - Linear-backoff retries for server errors and timeouts
//! - Bulk writes in concurrency-bounded waves with per-record failure accounting
//! - Fan-out of heterogeneous operations with fail-fast or settle-all policies

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod retry;
pub mod transport;

pub use batch::{BatchError, BatchOptions, BatchResult, ParallelItem, ParallelOptions, ParallelOutcome, ParallelResult};
pub use client::{Client, Condition, ConditionOperator, ParallelOperation, RequestContext, SearchType};
pub use config::Config;
pub use error::{ClientError, ClientResult, TransportError};
pub use executor::{ExecuteOptions, Response, ResponseMetadata};
