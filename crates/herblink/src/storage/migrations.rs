//! Schema versioning for the submission store.
//!
//! The version lives in the `metadata` table. Each migration step from the
//! stored version up to [`CURRENT_VERSION`] runs inside its own transaction
//! together with the version bump, so a crash mid-upgrade leaves the store at
//! the last completed step.

use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::error::{Error, Result};

use super::schema::{CREATE_METADATA_TABLE, SCHEMA_STATEMENTS};

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

type Step = fn(&Transaction<'_>) -> Result<()>;

/// Migration steps; entry `n` upgrades version `n` to `n + 1`.
const STEPS: &[Step] = &[create_base_schema];

/// Bring the database schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if the stored version is unreadable, newer than this
/// build understands, or a migration step fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let stored = get_schema_version(conn)?;
    if stored > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for version in stored..CURRENT_VERSION {
        run_step(conn, version)?;
    }
    Ok(())
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (fresh database).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn run_step(conn: &mut Connection, from: i32) -> Result<()> {
    let step = usize::try_from(from)
        .ok()
        .and_then(|idx| STEPS.get(idx))
        .ok_or_else(|| Error::DatabaseMigration {
            message: format!("unknown migration version: {}", from + 1),
        })?;

    let tx = conn.transaction()?;
    step(&tx)?;
    set_schema_version(&tx, from + 1)?;
    tx.commit()?;
    Ok(())
}

fn create_base_schema(tx: &Transaction<'_>) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        tx.execute(statement, [])?;
    }
    Ok(())
}
