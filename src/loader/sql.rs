//! SQL text shared by the MySQL and SQLite sinks.
//!
//! Both dialects accept backtick-quoted identifiers, which matters because
//! `dec` is a reserved word in MySQL. Table names come from configuration and
//! are validated before they are ever spliced into a statement.

use crate::config::ConflictPolicy;
use crate::constants::{BATCH_LEDGER_TABLE, POINTING_COLUMNS};
use crate::error::{IngestError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Column holding the batch id of the row's insert
pub const BATCH_COLUMN: &str = "ingest_batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Mysql,
    Sqlite,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("static regex"))
}

pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(IngestError::InvalidIdentifier(name.to_string()))
    }
}

pub fn quote(name: &str) -> String {
    format!("`{name}`")
}

pub fn create_table_sql(dialect: Dialect, table: &str) -> Result<String> {
    validate_identifier(table)?;
    let (name_type, double, float, batch_type) = match dialect {
        Dialect::Mysql => ("BIGINT UNSIGNED", "DOUBLE", "FLOAT", "CHAR(36)"),
        Dialect::Sqlite => ("INTEGER", "REAL", "REAL", "TEXT"),
    };
    let index = match dialect {
        Dialect::Mysql => format!(",\n  INDEX {} ({})", quote(&format!("idx_{table}_batch")), quote(BATCH_COLUMN)),
        Dialect::Sqlite => String::new(),
    };
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {t} (\n  \
           `name` {name_type} NOT NULL PRIMARY KEY,\n  \
           `ra` {double} NOT NULL,\n  \
           `dec` {double} NOT NULL,\n  \
           `epoch` {float} NOT NULL,\n  \
           `pmra` {float} NULL,\n  \
           `pmdec` {float} NULL,\n  \
           `vmag` {float} NOT NULL,\n  \
           `g_mag` {float} NULL,\n  \
           `g_bp` {float} NULL,\n  \
           `g_rp` {float} NULL,\n  \
           {batch} {batch_type} NOT NULL{index}\n)",
        t = quote(table),
        batch = quote(BATCH_COLUMN),
    ))
}

/// SQLite has no inline INDEX clause
pub fn create_batch_index_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&format!("idx_{table}_batch")),
        quote(table),
        quote(BATCH_COLUMN)
    ))
}

pub fn create_ledger_sql(dialect: Dialect) -> String {
    let text = match dialect {
        Dialect::Mysql => "VARCHAR(255)",
        Dialect::Sqlite => "TEXT",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {ledger} (\n  \
           `batch_id` CHAR(36) NOT NULL PRIMARY KEY,\n  \
           `catalog` {text} NOT NULL,\n  \
           `target_table` {text} NOT NULL,\n  \
           `source_file` {text} NOT NULL,\n  \
           `row_count` BIGINT NOT NULL,\n  \
           `status` VARCHAR(16) NOT NULL,\n  \
           `loaded_at` VARCHAR(40) NOT NULL\n)",
        ledger = quote(BATCH_LEDGER_TABLE),
    )
}

/// Multi-row insert with `rows` tuples of positional `?` placeholders.
pub fn insert_rows_sql(
    dialect: Dialect,
    table: &str,
    rows: usize,
    conflict: ConflictPolicy,
) -> Result<String> {
    validate_identifier(table)?;
    let verb = match (dialect, conflict) {
        (_, ConflictPolicy::Fail) => "INSERT INTO",
        (Dialect::Mysql, ConflictPolicy::Ignore) => "INSERT IGNORE INTO",
        (Dialect::Sqlite, ConflictPolicy::Ignore) => "INSERT OR IGNORE INTO",
    };
    let columns: Vec<String> = POINTING_COLUMNS
        .iter()
        .chain(std::iter::once(&BATCH_COLUMN))
        .map(|c| quote(c))
        .collect();
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![tuple.as_str(); rows.max(1)].join(", ");
    Ok(format!(
        "{verb} {} ({}) VALUES {values}",
        quote(table),
        columns.join(", ")
    ))
}

pub fn delete_batch_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "DELETE FROM {} WHERE {} = ?",
        quote(table),
        quote(BATCH_COLUMN)
    ))
}

pub fn count_batch_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        quote(table),
        quote(BATCH_COLUMN)
    ))
}

pub fn insert_ledger_sql() -> String {
    format!(
        "INSERT INTO {} (`batch_id`, `catalog`, `target_table`, `source_file`, `row_count`, `status`, `loaded_at`) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        quote(BATCH_LEDGER_TABLE)
    )
}

pub fn select_ledger_sql() -> String {
    format!(
        "SELECT `batch_id`, `catalog`, `target_table`, `source_file`, `row_count`, `status`, `loaded_at` \
         FROM {} ORDER BY `loaded_at`, `batch_id`",
        quote(BATCH_LEDGER_TABLE)
    )
}

pub fn select_ledger_entry_sql() -> String {
    format!(
        "SELECT `target_table`, `status` FROM {} WHERE `batch_id` = ?",
        quote(BATCH_LEDGER_TABLE)
    )
}

pub fn mark_rolled_back_sql() -> String {
    format!(
        "UPDATE {} SET `status` = 'rolled_back' WHERE `batch_id` = ?",
        quote(BATCH_LEDGER_TABLE)
    )
}
