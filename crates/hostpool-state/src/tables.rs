//! redb table definitions for the hostpool state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Group lock leases keyed by host-group id.
pub const LOCK_LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("lock_leases");

/// Failed-host marks keyed by host id.
pub const FAILED_HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("failed_hosts");
