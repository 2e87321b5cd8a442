//! 连接串后端：SQLite（rusqlite, bundled）
//!
//! DSN 形式：`sqlite:///rel.db`（相对项目目录）、`sqlite:////abs/path.db`（绝对路径）、
//! `sqlite://` 或 `sqlite:///:memory:`（内存库）。其他 scheme 没有内置驱动。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use crate::core::BackendError;
use crate::goals::sql::backend::{BackendKind, ColumnInfo, QueryOutput, SqlBackend};

/// DSN 解析结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

pub fn parse_sqlite_dsn(dsn: &str, cwd: &Path) -> Result<SqliteTarget, BackendError> {
    let dsn = dsn.trim();
    if dsn == ":memory:" {
        return Ok(SqliteTarget::Memory);
    }
    let Some(rest) = dsn.strip_prefix("sqlite://") else {
        let scheme = dsn.split("://").next().unwrap_or(dsn);
        return Err(BackendError::UnsupportedBackend(format!(
            "no built-in driver for '{}' (only sqlite:// is supported)",
            scheme
        )));
    };
    // 去掉 ?mode=... 之类的参数
    let rest = rest.split('?').next().unwrap_or_default();
    let Some(path) = rest.strip_prefix('/') else {
        return if rest.is_empty() {
            Ok(SqliteTarget::Memory)
        } else {
            Err(BackendError::MissingConfig(format!("Malformed sqlite DSN: {}", dsn)))
        };
    };
    if path.is_empty() || path == ":memory:" {
        Ok(SqliteTarget::Memory)
    } else if path.starts_with('/') {
        Ok(SqliteTarget::File(PathBuf::from(path)))
    } else {
        Ok(SqliteTarget::File(cwd.join(path)))
    }
}

pub struct SqliteBackend {
    conn: Option<Connection>,
}

impl SqliteBackend {
    pub fn open_dsn(dsn: &str, cwd: &Path) -> Result<Self, BackendError> {
        let conn = match parse_sqlite_dsn(dsn, cwd)? {
            SqliteTarget::Memory => Connection::open_in_memory(),
            SqliteTarget::File(path) => Connection::open(&path),
        }
        .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&self) -> Result<&Connection, BackendError> {
        self.conn
            .as_ref()
            .ok_or_else(|| BackendError::Execution("connection already closed".to_string()))
    }
}

fn to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

impl SqlBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ConnectionString
    }

    fn execute(&mut self, sql: &str) -> Result<QueryOutput, BackendError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            stmt.execute([])?;
            return Ok(QueryOutput::default());
        }
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(to_json(row.get_ref(i)?));
            }
            rows.push(cells);
        }
        Ok(QueryOutput { columns, rows })
    }

    fn explain(&mut self, sql: &str) -> Result<String, BackendError> {
        let out = self.execute(&format!("EXPLAIN QUERY PLAN {}", sql))?;
        Ok(out
            .rows
            .iter()
            .map(|row| row.iter().map(super::backend::cell_to_string).collect::<Vec<_>>().join(" | "))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn plan_type(&self) -> &'static str {
        "sqlite_plan"
    }

    fn describe_table(&mut self, table: &str) -> Result<(Vec<ColumnInfo>, BTreeMap<String, String>), BackendError> {
        let out = self.execute(&format!("PRAGMA table_info({})", table))?;
        if out.rows.is_empty() {
            return Err(BackendError::Execution(format!("no such table: {}", table)));
        }
        // table_info 列：cid, name, type, notnull, dflt_value, pk
        let columns = out
            .rows
            .iter()
            .map(|row| {
                let cell = |i: usize| row.get(i).map(super::backend::cell_to_string).unwrap_or_default();
                let notnull = row.get(3).and_then(Value::as_i64).unwrap_or(0);
                let mut info = ColumnInfo::new();
                info.insert("name".to_string(), cell(1));
                info.insert("type".to_string(), cell(2));
                info.insert("nullable".to_string(), (notnull == 0).to_string());
                info
            })
            .collect();
        Ok((columns, BTreeMap::new()))
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| BackendError::Execution(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> SqliteBackend {
        let mut db = SqliteBackend::open_dsn("sqlite://", Path::new(".")).unwrap();
        db.execute("CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL NOT NULL, note TEXT)")
            .unwrap();
        db.execute("INSERT INTO orders (amount, note) VALUES (9.5, 'a'), (3.0, NULL), (12.25, 'c')")
            .unwrap();
        db
    }

    #[test]
    fn test_parse_dsn() {
        let cwd = Path::new("/proj");
        assert_eq!(parse_sqlite_dsn("sqlite://", cwd).unwrap(), SqliteTarget::Memory);
        assert_eq!(parse_sqlite_dsn("sqlite:///:memory:", cwd).unwrap(), SqliteTarget::Memory);
        assert_eq!(parse_sqlite_dsn(":memory:", cwd).unwrap(), SqliteTarget::Memory);
        assert_eq!(
            parse_sqlite_dsn("sqlite:///data/app.db", cwd).unwrap(),
            SqliteTarget::File(PathBuf::from("/proj/data/app.db"))
        );
        assert_eq!(
            parse_sqlite_dsn("sqlite:////var/db/app.db", cwd).unwrap(),
            SqliteTarget::File(PathBuf::from("/var/db/app.db"))
        );
        assert!(matches!(
            parse_sqlite_dsn("postgresql://u@h/db", cwd),
            Err(BackendError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_execute_rows_and_columns() {
        let mut db = seeded();
        let out = db.execute("SELECT id, amount, note FROM orders ORDER BY id").unwrap();
        assert_eq!(out.columns, vec!["id", "amount", "note"]);
        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.rows[0][1], serde_json::json!(9.5));
        assert!(out.rows[1][2].is_null());
    }

    #[test]
    fn test_explain_describe_count() {
        let mut db = seeded();
        let plan = db.explain("SELECT * FROM orders WHERE id = 1").unwrap();
        assert!(!plan.is_empty());
        assert_eq!(db.plan_type(), "sqlite_plan");

        let (cols, props) = db.describe_table("orders").unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[1]["name"], "amount");
        assert_eq!(cols[1]["nullable"], "false");
        assert!(props.is_empty());
        assert_eq!(db.row_count("orders").unwrap(), 3);
        assert!(db.describe_table("missing").is_err());
    }

    #[test]
    fn test_relative_file_and_close() {
        let dir = TempDir::new().unwrap();
        let mut db = SqliteBackend::open_dsn("sqlite:///bench.db", dir.path()).unwrap();
        db.execute("CREATE TABLE t (x INTEGER)").unwrap();
        db.close().unwrap();
        assert!(dir.path().join("bench.db").exists());
        assert!(db.execute("SELECT 1").is_err());
    }

    #[test]
    fn test_syntax_error_is_execution() {
        let mut db = seeded();
        assert!(matches!(db.execute("SELEC nope"), Err(BackendError::Execution(_))));
    }
}
