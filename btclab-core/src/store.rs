//! Relational store backed by SQLite.
//!
//! One [`Store`] is opened per run and closed explicitly at the end of it.
//! Staged files are appended with `INSERT OR IGNORE` against each table's
//! natural key, and every loaded file is recorded in a checksum ledger in the
//! same transaction, so a file that was inserted but never archived is
//! recognised instead of being inserted twice.

use crate::schema::Table;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("columns of {file} do not match table '{table}' (missing: {missing:?}, unexpected: {unexpected:?})")]
    SchemaMismatch {
        file: String,
        table: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("table '{0}' does not exist")]
    UnknownTable(String),

    #[error("row {row} of {file} has {found} fields, header has {expected}")]
    RowWidth {
        file: String,
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of loading one staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOutcome {
    /// Rows newly written to the table.
    pub inserted: usize,
    /// Rows ignored because their natural key was already present.
    pub duplicates: usize,
    /// The same file content had already been loaded by an earlier run.
    pub already_loaded: bool,
}

/// Full contents of a table, column-major friendly.
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableData {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

const LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS loaded_files (
    checksum TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    table_name TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

/// SQLite database wrapper.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file and make sure all tables exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create destination tables and the ledger if they are absent.
    pub fn migrate(&self) -> Result<(), StoreError> {
        for table in Table::ALL {
            self.conn.execute_batch(&table.create_sql())?;
        }
        self.conn.execute_batch(LEDGER_SQL)?;
        Ok(())
    }

    /// Column names of a table as the database knows them.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let cols = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if cols.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(cols)
    }

    /// Append the rows of a staged CSV to `table`.
    ///
    /// The header must name exactly the table's columns (order is free).
    /// The whole file is written in one transaction. An empty file has
    /// nothing to insert and is not an error.
    pub fn load_csv(&mut self, table: Table, csv_path: &Path) -> Result<LoadOutcome, StoreError> {
        let file_name = csv_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = fs::read(csv_path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::info!(table = %table, file = %file_name, "staged file is empty, nothing to insert");
            return Ok(LoadOutcome::default());
        }
        let checksum = blake3::hash(&bytes).to_hex().to_string();

        if self.is_loaded(&checksum)? {
            tracing::warn!(file = %file_name, "content already loaded by an earlier run, not inserting again");
            return Ok(LoadOutcome {
                already_loaded: true,
                ..LoadOutcome::default()
            });
        }

        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        let header: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        self.check_columns(table, &header, &file_name)?;

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() != header.len() {
                return Err(StoreError::RowWidth {
                    file: file_name,
                    row: i + 1,
                    found: record.len(),
                    expected: header.len(),
                });
            }
            rows.push(record.iter().map(parse_cell).collect::<Vec<Value>>());
        }

        let outcome = self.insert_rows(table, &header, &rows, &checksum, &file_name)?;
        tracing::info!(
            table = %table,
            file = %file_name,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "rows loaded"
        );
        Ok(outcome)
    }

    fn check_columns(&self, table: Table, header: &[String], file: &str) -> Result<(), StoreError> {
        let expected: BTreeSet<String> = self.table_columns(table.name())?.into_iter().collect();
        let actual: BTreeSet<String> = header.iter().cloned().collect();
        if expected == actual && actual.len() == header.len() {
            return Ok(());
        }
        Err(StoreError::SchemaMismatch {
            file: file.to_string(),
            table: table.name().to_string(),
            missing: expected.difference(&actual).cloned().collect(),
            unexpected: actual.difference(&expected).cloned().collect(),
        })
    }

    fn insert_rows(
        &mut self,
        table: Table,
        header: &[String],
        rows: &[Vec<Value>],
        checksum: &str,
        file_name: &str,
    ) -> Result<LoadOutcome, StoreError> {
        let cols: Vec<String> = header.iter().map(|c| format!("\"{c}\"")).collect();
        let placeholders: Vec<String> = (1..=header.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            table.name(),
            cols.join(", "),
            placeholders.join(", ")
        );

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                inserted += stmt.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.execute(
            "INSERT INTO loaded_files (checksum, file_name, table_name, row_count) VALUES (?1, ?2, ?3, ?4)",
            params![checksum, file_name, table.name(), inserted as i64],
        )?;
        tx.commit()?;

        Ok(LoadOutcome {
            inserted,
            duplicates: rows.len() - inserted,
            already_loaded: false,
        })
    }

    fn is_loaded(&self, checksum: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM loaded_files WHERE checksum = ?1",
                [checksum],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// `SELECT *` of a table. No pagination: tables are small.
    pub fn read_table(&self, table: &str) -> Result<TableData, StoreError> {
        let columns = self.table_columns(table)?;
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM \"{table}\""))?;
        let width = stmt.column_count();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(owned(row.get_ref(i)?));
            }
            rows.push(values);
        }
        tracing::info!(table, rows = rows.len(), "table read");
        Ok(TableData { columns, rows })
    }

    pub fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        // Validates the name before it is spliced into SQL.
        self.table_columns(table)?;
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Release the connection. Dropping the store also closes it, this
    /// variant reports close errors.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        tracing::info!("database connection closed");
        Ok(())
    }
}

/// Map a CSV cell to the value SQLite should receive. Column affinity on
/// the destination table takes care of the final storage class.
fn parse_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::Real(f);
        }
    }
    Value::Text(cell.to_string())
}

fn owned(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}
