//! Schema setup for the dedup store.
//!
//! The applied schema version is kept in SQLite's `user_version` pragma.

use tokio_rusqlite::Connection;

use crate::Error;

const SCHEMA: &str = include_str!("../../migrations/001_entries.sql");

/// Schema version this build reads and writes.
pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Bring the store up to [`SCHEMA_VERSION`].
///
/// A store written by a newer build is refused rather than touched.
pub(crate) async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(Error::MigrationFailed(format!(
                "store schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }

        if version < SCHEMA_VERSION {
            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA)?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
            tracing::info!(from = version, to = SCHEMA_VERSION, "upgraded dedup store schema");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
