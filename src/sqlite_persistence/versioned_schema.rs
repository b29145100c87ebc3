//! Declarative table definitions with create/validate support.
//!
//! A store declares an ordered list of [`VersionedSchema`]s. New databases are
//! created from the last one, existing databases are validated against the
//! schema matching their `user_version` and migrated forward.

use anyhow::{bail, Result};
use rusqlite::{params, Connection};

/// Offset added to the schema version stored in `PRAGMA user_version`, so that
/// databases not created by this crate are rejected instead of misread.
pub const BASE_DB_VERSION: usize = 40000;

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }

    fn from_sql(declared: &str) -> Option<&'static SqlType> {
        match declared {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            _ => None,
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

impl Column {
    fn definition(&self) -> String {
        let mut def = format!("{} {}", self.name, self.sql_type.as_sql());
        if self.is_primary_key {
            def.push_str(" PRIMARY KEY");
        }
        if self.non_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default_value) = self.default_value {
            def.push_str(&format!(" DEFAULT {}", default_value));
        }
        if let Some(fk) = self.foreign_key {
            def.push_str(&format!(
                " REFERENCES {}({}) ON DELETE {}",
                fk.foreign_table,
                fk.foreign_column,
                fk.on_delete.as_sql()
            ));
        }
        def
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// (index name, comma separated column list)
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

/// Column as reported by `PRAGMA table_info`.
struct ExistingColumn {
    name: String,
    sql_type: Option<&'static SqlType>,
    non_null: bool,
    default_value: Option<String>,
    is_primary_key: bool,
}

fn strip_wrapping_parentheses(s: &str) -> &str {
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition).collect();
        for unique in self.unique_constraints {
            parts.push(format!("UNIQUE ({})", unique.join(", ")));
        }
        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, parts.join(", ")),
            params![],
        )?;

        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, columns),
                params![],
            )?;
        }
        Ok(())
    }

    fn existing_columns(&self, conn: &Connection) -> Result<Vec<ExistingColumn>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let columns = stmt
            .query_map(params![], |row| {
                Ok(ExistingColumn {
                    name: row.get(1)?,
                    sql_type: SqlType::from_sql(&row.get::<_, String>(2)?),
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let existing = self.existing_columns(conn)?;
        if existing.len() != self.columns.len() {
            bail!(
                "Table {} has columns [{}], expected [{}]",
                self.name,
                existing
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in existing.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {}: expected column {}, found {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != Some(expected.sql_type) {
                bail!(
                    "Table {} column {}: expected type {:?}, found {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {}: NOT NULL mismatch (expected {})",
                    self.name,
                    expected.name,
                    expected.non_null
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {}: PRIMARY KEY mismatch (expected {})",
                    self.name,
                    expected.name,
                    expected.is_primary_key
                );
            }
            // SQLite may report defaults with or without wrapping parentheses
            let actual_default = actual.default_value.as_deref().map(strip_wrapping_parentheses);
            let expected_default = expected.default_value.map(strip_wrapping_parentheses);
            if actual_default != expected_default {
                bail!(
                    "Table {} column {}: default mismatch, expected {:?}, found {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, _) in self.indices {
            let found: Option<i32> = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 AND tbl_name = ?2",
                    params![index_name, self.name],
                    |row| row.get(0),
                )
                .ok();
            if found.is_none() {
                bail!("Table {} is missing index {}", self.name, index_name);
            }
        }
        Ok(())
    }

    fn validate_unique_constraints(&self, conn: &Connection) -> Result<()> {
        if self.unique_constraints.is_empty() {
            return Ok(());
        }

        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
        let unique_indices: Vec<String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .filter_map(|r| r.ok())
            .filter(|(_, unique)| *unique == 1)
            .map(|(name, _)| name)
            .collect();

        let mut indexed_column_sets = Vec::with_capacity(unique_indices.len());
        for index_name in &unique_indices {
            let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
            let mut columns: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .filter_map(|r| r.ok())
                .collect();
            columns.sort();
            indexed_column_sets.push(columns);
        }

        for expected in self.unique_constraints {
            let mut wanted: Vec<&str> = expected.to_vec();
            wanted.sort();
            let present = indexed_column_sets
                .iter()
                .any(|set| set.iter().map(String::as_str).eq(wanted.iter().copied()));
            if !present {
                bail!(
                    "Table {} is missing UNIQUE ({})",
                    self.name,
                    expected.join(", ")
                );
            }
        }
        Ok(())
    }

    fn validate_foreign_keys(&self, conn: &Connection) -> Result<()> {
        // PRAGMA foreign_key_list: id, seq, table, from, to, on_update, on_delete, match
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", self.name))?;
        let existing: Vec<(String, String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(3)?, row.get(2)?, row.get(4)?, row.get(6)?)))?
            .filter_map(|r| r.ok())
            .collect();

        for column in self.columns {
            let Some(fk) = column.foreign_key else {
                continue;
            };
            let present = existing.iter().any(|(from, table, to, on_delete)| {
                from == column.name
                    && table == fk.foreign_table
                    && to == fk.foreign_column
                    && on_delete == fk.on_delete.as_sql()
            });
            if !present {
                bail!(
                    "Table {} column {}: expected REFERENCES {}({}) ON DELETE {}",
                    self.name,
                    column.name,
                    fk.foreign_table,
                    fk.foreign_column,
                    fk.on_delete.as_sql()
                );
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate_columns(conn)?;
            table.validate_indices(conn)?;
            table.validate_unique_constraints(conn)?;
            table.validate_foreign_keys(conn)?;
        }
        Ok(())
    }
}

/// Reads `PRAGMA user_version` and converts it back to a schema index.
pub fn read_schema_version(conn: &Connection, schema_count: usize) -> Result<usize> {
    let raw: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let version = raw - BASE_DB_VERSION as i64;
    if version < 0 {
        bail!(
            "Database user_version {} predates base version {}",
            raw,
            BASE_DB_VERSION
        );
    }
    let version = version as usize;
    if version >= schema_count {
        bail!(
            "Database schema version {} is newer than supported ({})",
            version,
            schema_count - 1
        );
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER_TABLE: Table = Table {
        name: "owner",
        columns: &[
            sqlite_column!("id", &SqlType::Text, is_primary_key = true),
            sqlite_column!("name", &SqlType::Text, non_null = true),
            sqlite_column!(
                "created_at",
                &SqlType::Integer,
                default_value = Some(DEFAULT_TIMESTAMP)
            ),
        ],
        indices: &[("idx_owner_name", "name")],
        unique_constraints: &[],
    };

    const ITEM_TABLE: Table = Table {
        name: "item",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!(
                "owner_id",
                &SqlType::Text,
                non_null = true,
                foreign_key = Some(&ForeignKey {
                    foreign_table: "owner",
                    foreign_column: "id",
                    on_delete: ForeignKeyOnChange::Cascade,
                })
            ),
            sqlite_column!("label", &SqlType::Text),
            sqlite_column!("weight", &SqlType::Real),
        ],
        indices: &[],
        unique_constraints: &[&["owner_id", "label"]],
    };

    const SCHEMA: VersionedSchema = VersionedSchema {
        version: 0,
        tables: &[OWNER_TABLE, ITEM_TABLE],
        migration: None,
    };

    #[test]
    fn creates_and_validates_schema() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMA.create(&conn).unwrap();
        SCHEMA.validate(&conn).unwrap();
        assert_eq!(read_schema_version(&conn, 1).unwrap(), 0);
    }

    #[test]
    fn detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMA.create(&conn).unwrap();
        conn.execute("DROP INDEX idx_owner_name", []).unwrap();

        let err = SCHEMA.validate(&conn).unwrap_err();
        assert!(err.to_string().contains("idx_owner_name"));
    }

    #[test]
    fn detects_extra_column() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMA.create(&conn).unwrap();
        conn.execute("ALTER TABLE owner ADD COLUMN extra TEXT", [])
            .unwrap();

        assert!(SCHEMA.validate(&conn).is_err());
    }

    #[test]
    fn detects_missing_unique_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        OWNER_TABLE.create(&conn).unwrap();
        conn.execute(
            "CREATE TABLE item (id INTEGER PRIMARY KEY, owner_id TEXT NOT NULL REFERENCES owner(id) ON DELETE CASCADE, label TEXT, weight REAL)",
            [],
        )
        .unwrap();

        let err = SCHEMA.validate(&conn).unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn rejects_foreign_databases() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA user_version = 3", []).unwrap();
        assert!(read_schema_version(&conn, 1).is_err());

        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + 5),
            [],
        )
        .unwrap();
        assert!(read_schema_version(&conn, 1).is_err());
    }

    #[test]
    fn cascade_delete_is_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMA.create(&conn).unwrap();
        conn.execute("INSERT INTO owner (id, name) VALUES ('o1', 'Owner')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO item (owner_id, label, weight) VALUES ('o1', 'a', 1.5)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM owner WHERE id = 'o1'", []).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM item", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
