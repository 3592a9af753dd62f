//! Schema introspection.
//!
//! The catalog is read once at startup and is the only source of table and
//! column names that ever reach dynamically built SQL.

use sqlx::PgPool;
use std::collections::{BTreeMap, HashSet};

/// Tables owned by the change-tracking engine itself. They are never exposed
/// as restorable entity types.
pub const ENGINE_TABLES: &[&str] = &["change_log", "undo_log", "audit_logs", "_sqlx_migrations"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumns {
    name: String,
    columns: Vec<String>,
    lookup: HashSet<String>,
}

impl TableColumns {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        let lookup = columns.iter().cloned().collect();
        Self {
            name: name.into(),
            columns,
            lookup,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in ordinal order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.lookup.contains(column)
    }

    /// The catalog's own copy of `column`, if the table has it.
    pub fn column(&self, column: &str) -> Option<&str> {
        self.lookup.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableColumns>,
}

impl SchemaCatalog {
    /// Reads every base table of the current schema with its writable columns.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT c.table_name::text, c.column_name::text \
             FROM information_schema.columns c \
             JOIN information_schema.tables t \
               ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
             WHERE c.table_schema = current_schema() \
               AND t.table_type = 'BASE TABLE' \
               AND c.is_generated = 'NEVER' \
             ORDER BY c.table_name, c.ordinal_position",
        )
        .fetch_all(pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (table, column) in rows {
            grouped.entry(table).or_default().push(column);
        }
        let catalog = Self::from_tables(grouped);
        tracing::info!(tables = catalog.tables.len(), "Loaded schema catalog");
        Ok(catalog)
    }

    /// Builds a catalog from `(table, columns)` pairs, dropping engine tables.
    pub fn from_tables<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let tables = tables
            .into_iter()
            .filter(|(name, _)| !ENGINE_TABLES.contains(&name.as_str()))
            .map(|(name, columns)| (name.clone(), TableColumns::new(name, columns)))
            .collect();
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&TableColumns> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableColumns> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
