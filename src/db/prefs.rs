//! Namespaced key-value access on top of the `preferences` table.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Running flag, start instant, elapsed snapshot and peak state.
pub const TIMER_NAMESPACE: &str = "fasting_timer";
/// Serialized collection of completed fasts.
pub const HISTORY_NAMESPACE: &str = "fasting_history";

pub fn get_value(conn: &Connection, namespace: &str, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM preferences WHERE namespace = ?1 AND key = ?2",
        params![namespace, key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("failed to read {namespace}.{key}"))
}

pub fn put_value(conn: &Connection, namespace: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO preferences (namespace, key, value, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(namespace, key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![namespace, key, value, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write {namespace}.{key}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn missing_key_reads_as_none() {
        let conn = conn();
        assert_eq!(get_value(&conn, TIMER_NAMESPACE, "isRunning").unwrap(), None);
    }

    #[test]
    fn put_overwrites_and_namespaces_are_independent() {
        let conn = conn();
        put_value(&conn, TIMER_NAMESPACE, "startTime", "1").unwrap();
        put_value(&conn, TIMER_NAMESPACE, "startTime", "2").unwrap();
        put_value(&conn, HISTORY_NAMESPACE, "startTime", "other").unwrap();

        assert_eq!(
            get_value(&conn, TIMER_NAMESPACE, "startTime").unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(
            get_value(&conn, HISTORY_NAMESPACE, "startTime").unwrap().as_deref(),
            Some("other")
        );
    }
}
