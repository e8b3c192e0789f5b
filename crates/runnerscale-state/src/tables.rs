//! redb table definitions for the runnerscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized resources).
//! Composite keys follow the pattern `{namespace}/{name}` or `{object_key}:{suffix}`.

use redb::TableDefinition;

/// Autoscalers keyed by `{namespace}/{name}`.
pub const AUTOSCALERS: TableDefinition<&str, &[u8]> = TableDefinition::new("autoscalers");

/// Runner deployments keyed by `{namespace}/{name}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Latest demand snapshot keyed by deployment `{namespace}/{name}`.
pub const DEMAND: TableDefinition<&str, &[u8]> = TableDefinition::new("demand");

/// Events keyed by `{object_key}:{timestamp}:{seq}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");
