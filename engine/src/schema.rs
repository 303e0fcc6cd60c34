//! Schema versions of the durable store and the migrations between them.
//!
//! Every persisted snapshot records the schema version it was written with.
//! Older snapshots are migrated forward on load; a snapshot from a newer
//! schema is refused, since there is no way to know what it contains.

use crate::{error::Result, Error, SchemaVersion, StoreSnapshot};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = 2;

/// A single forward migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version the snapshot has after this migration
    pub version: SchemaVersion,
    pub description: &'static str,
    apply: fn(&mut StoreSnapshot),
}

/// All migrations, in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "bookmarks keyed by id with updated_at and deleted_at",
        apply: initial_layout,
    },
    Migration {
        version: 2,
        description: "created_at on every bookmark",
        apply: backfill_created_at,
    },
];

fn initial_layout(_: &mut StoreSnapshot) {}

fn backfill_created_at(snapshot: &mut StoreSnapshot) {
    for row in snapshot.bookmarks.values_mut() {
        if row.created_at.is_none() {
            row.created_at = Some(row.updated_at);
        }
    }
}

/// Check that a snapshot's schema version can be handled by this build.
pub fn check_version(found: SchemaVersion) -> Result<()> {
    if found > CURRENT_SCHEMA_VERSION {
        return Err(Error::SchemaVersionTooNew {
            supported: CURRENT_SCHEMA_VERSION,
            found,
        });
    }
    Ok(())
}

/// Migrations still to run for a snapshot at `version`.
pub fn pending_migrations(version: SchemaVersion) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > version)
}

/// Bring a snapshot up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate(mut snapshot: StoreSnapshot) -> Result<StoreSnapshot> {
    check_version(snapshot.schema_version)?;
    for migration in pending_migrations(snapshot.schema_version) {
        (migration.apply)(&mut snapshot);
        snapshot.schema_version = migration.version;
    }
    Ok(snapshot)
}
