//! runnerscale-state: embedded resource store for runnerscale.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for autoscalers, runner deployments, demand snapshots and events.
//!
//! # Architecture
//!
//! All resources are JSON-serialized into redb's `&[u8]` value columns and
//! keyed by `{namespace}/{name}`. Every write bumps the resource's
//! `metadata.resource_version`; the conditional update methods take the
//! version the caller read and fail with [`StateError::Conflict`] when the
//! stored resource has moved on, giving callers optimistic concurrency.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
