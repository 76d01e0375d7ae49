//! Table layout and statement text.
//!
//! One table per store:
//!
//! | Column | Type | Notes |
//! |--------|------|-------|
//! | `key` | `TEXT PRIMARY KEY` | |
//! | `value` | `BLOB NOT NULL` | empty blob for empty values |
//! | `expire` | `INTEGER` | Unix milliseconds, `NULL` for never |
//!
//! An index on `expire` and a `BEFORE INSERT` trigger that deletes expired
//! rows keep the table from growing without bound.

use simplekv::ConfigError;

/// Longest accepted table name.
const MAX_TABLE_NAME_LEN: usize = 63;

/// Checks that `table` is a plain SQL identifier.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for empty, overlong, or non
/// `[A-Za-z_][A-Za-z0-9_]*` names.
pub fn validate_table_name(table: &str) -> Result<(), ConfigError> {
    let mut chars = table.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest {
        return Err(ConfigError::InvalidValue {
            field: "table",
            reason: format!("{table:?} is not a valid SQL identifier"),
        });
    }
    if table.len() > MAX_TABLE_NAME_LEN {
        return Err(ConfigError::InvalidValue {
            field: "table",
            reason: format!("longer than {MAX_TABLE_NAME_LEN} characters"),
        });
    }
    Ok(())
}

/// Statement text for one table, built once at construction.
#[derive(Debug, Clone)]
pub(crate) struct Queries {
    pub(crate) init: String,
    /// `?1` key, `?2` now (ms)
    pub(crate) get: String,
    /// `?1` key
    pub(crate) select_locked: String,
    /// `?1` key, `?2` value, `?3` expire
    pub(crate) upsert: String,
    /// `?1` key, `?2` value, `?3` expire
    pub(crate) insert: String,
    /// `?1` key, `?2` value, `?3` expire
    pub(crate) update: String,
    /// `?1` now (ms)
    pub(crate) keys: String,
}

impl Queries {
    /// Builds statements for `table`, which must already be validated.
    pub(crate) fn new(table: &str) -> Self {
        let init = format!(
            r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    expire INTEGER
);
CREATE INDEX IF NOT EXISTS "{table}_expire_idx" ON "{table}" (expire);
CREATE TRIGGER IF NOT EXISTS "{table}_expire_fn" BEFORE INSERT ON "{table}"
BEGIN
    DELETE FROM "{table}"
    WHERE expire IS NOT NULL
      AND expire <= CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER);
END;
"#
        );
        Self {
            init,
            get: format!(
                r#"SELECT value FROM "{table}" WHERE key = ?1 AND (expire IS NULL OR expire > ?2)"#
            ),
            select_locked: format!(r#"SELECT value, expire FROM "{table}" WHERE key = ?1"#),
            upsert: format!(
                r#"INSERT INTO "{table}" (key, value, expire) VALUES (?1, ?2, ?3)
ON CONFLICT (key) DO UPDATE SET value = excluded.value, expire = excluded.expire"#
            ),
            insert: format!(r#"INSERT INTO "{table}" (key, value, expire) VALUES (?1, ?2, ?3)"#),
            update: format!(r#"UPDATE "{table}" SET value = ?2, expire = ?3 WHERE key = ?1"#),
            keys: format!(
                r#"SELECT key FROM "{table}" WHERE expire IS NULL OR expire > ?1 ORDER BY key"#
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["simplekv", "_kv", "Sessions2", "a"] {
            assert!(validate_table_name(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn rejects_non_identifiers() {
        for name in ["", "2kv", "kv-store", "kv\"; DROP TABLE x; --", "k v"] {
            assert!(validate_table_name(name).is_err(), "{name:?} should be rejected");
        }
        assert!(validate_table_name(&"t".repeat(64)).is_err());
    }

    #[test]
    fn statements_reference_table() {
        let q = Queries::new("sessions");
        assert!(q.init.contains(r#"CREATE TABLE IF NOT EXISTS "sessions""#));
        assert!(q.init.contains(r#""sessions_expire_fn" BEFORE INSERT"#));
        assert!(q.upsert.contains("ON CONFLICT (key) DO UPDATE"));
        assert!(q.get.contains("expire > ?2"));
    }
}
