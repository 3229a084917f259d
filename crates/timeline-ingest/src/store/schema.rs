//! SQLite schema for raw collected rows and reconstructed history.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// Creates all tables on a fresh database. Opening a database written by a
/// newer schema version fails rather than guessing at its layout.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(rusqlite::Error::InvalidParameterName(format!(
            "database schema version {current_version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables for a fresh database.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Raw rows as collected from source systems
        CREATE TABLE IF NOT EXISTS raw_changelog (
            source_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            entity_id INTEGER NOT NULL,
            field TEXT NOT NULL,
            from_value TEXT NOT NULL DEFAULT '',
            to_value TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            PRIMARY KEY (source_id, entity_id, created_at, field, from_value, to_value)
        );

        CREATE TABLE IF NOT EXISTS raw_sprints (
            source_id INTEGER NOT NULL,
            sprint_id INTEGER NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            start_date TEXT,
            complete_date TEXT,
            PRIMARY KEY (source_id, sprint_id)
        );

        CREATE TABLE IF NOT EXISTS raw_users (
            source_id INTEGER NOT NULL,
            account_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            avatar_url TEXT NOT NULL DEFAULT '',
            timezone TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (source_id, account_id)
        );

        CREATE TABLE IF NOT EXISTS raw_projects (
            gitlab_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            web_url TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            forked_from TEXT NOT NULL DEFAULT '',
            created_date TEXT,
            updated_date TEXT
        );

        -- Canonical entities
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            avatar_url TEXT NOT NULL,
            timezone TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repos (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            description TEXT NOT NULL,
            forked_from TEXT NOT NULL,
            created_date TEXT,
            updated_date TEXT
        );

        -- Reconstructed history
        CREATE TABLE IF NOT EXISTS issue_status_history (
            issue_id TEXT NOT NULL,
            status TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            PRIMARY KEY (issue_id, start_date)
        );

        CREATE TABLE IF NOT EXISTS issue_assignee_history (
            issue_id TEXT NOT NULL,
            assignee TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            PRIMARY KEY (issue_id, start_date)
        );

        CREATE TABLE IF NOT EXISTS issue_sprints_history (
            issue_id TEXT NOT NULL,
            sprint_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            PRIMARY KEY (issue_id, sprint_id, start_date)
        );

        CREATE TABLE IF NOT EXISTS sprint_issues (
            sprint_id TEXT NOT NULL,
            issue_id TEXT NOT NULL,
            added_date TEXT,
            removed_date TEXT,
            added_stage TEXT,
            is_removed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (sprint_id, issue_id)
        );

        CREATE INDEX IF NOT EXISTS idx_raw_changelog_order
            ON raw_changelog(source_id, entity_id, created_at, item_id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_init_schema_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "raw_changelog",
            "raw_sprints",
            "users",
            "issue_status_history",
            "issue_sprints_history",
            "sprint_issues",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_init_schema_rejects_newer_version() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(init_schema(&conn).is_err());
    }
}
