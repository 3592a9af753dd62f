//! Restore dispatcher.
//!
//! Business modules register a restorer for their entity type at startup; every
//! other table in the schema catalog is served by [`GenericRestorer`], which
//! upserts a snapshot column-by-column against the catalog's allow-list.
//!
//! All restorer methods take the caller's connection, so a restore runs inside
//! whatever transaction the caller opened.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ChangeError;
use crate::models::snapshot::{
    key_text, record_from_value, split_children, with_children, CanonicalRecord,
};
use crate::repositories::entity_rows;
use crate::repositories::schema::{SchemaCatalog, TableColumns};

/// Primary-key column used when an entity type has no mapping.
pub const DEFAULT_KEY_COLUMN: &str = "id";

/// Capability set a business module provides for its entity type.
#[async_trait]
pub trait EntityRestorer: Send + Sync {
    fn entity_type(&self) -> &str;

    /// Current persisted state; `NotFound` when the record does not exist.
    async fn snapshot(
        &self,
        conn: &mut PgConnection,
        entity_id: &str,
    ) -> Result<CanonicalRecord, ChangeError>;

    /// Makes the persisted state match `record`, creating the record if needed.
    async fn restore(
        &self,
        conn: &mut PgConnection,
        entity_id: &str,
        record: CanonicalRecord,
    ) -> Result<(), ChangeError>;

    /// Removes the record; `NotFound` when nothing was deleted.
    async fn delete(&self, conn: &mut PgConnection, entity_id: &str) -> Result<(), ChangeError>;
}

/// Entity types whose primary key is not [`DEFAULT_KEY_COLUMN`].
#[derive(Debug, Clone, Default)]
pub struct KeyColumns {
    overrides: HashMap<String, String>,
}

impl KeyColumns {
    pub fn insert(&mut self, entity_type: impl Into<String>, column: impl Into<String>) {
        self.overrides.insert(entity_type.into(), column.into());
    }

    pub fn key_for(&self, entity_type: &str) -> &str {
        self.overrides
            .get(entity_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_KEY_COLUMN)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.overrides.iter()
    }
}

/// Sets the key column of `record` to `entity_id`, or checks that it already is.
pub fn bind_key(
    record: &mut CanonicalRecord,
    key_column: &str,
    entity_id: &str,
) -> Result<(), ChangeError> {
    match record.get(key_column) {
        None | Some(Value::Null) => {
            record.insert(key_column.to_string(), Value::String(entity_id.to_string()));
            Ok(())
        }
        Some(value) => match key_text(value) {
            Some(existing) if existing == entity_id => Ok(()),
            Some(existing) => Err(ChangeError::validation(format!(
                "record key {} = {} does not match entity id {}",
                key_column, existing, entity_id
            ))),
            None => Err(ChangeError::validation(format!(
                "record key {} must be a string or number",
                key_column
            ))),
        },
    }
}

/// Schema-driven fallback for entity types without a dedicated restorer.
#[derive(Debug, Clone)]
pub struct GenericRestorer {
    table: TableColumns,
    key_column: String,
}

impl GenericRestorer {
    pub fn new(table: TableColumns, key_column: impl Into<String>) -> Self {
        Self {
            table,
            key_column: key_column.into(),
        }
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }
}

#[async_trait]
impl EntityRestorer for GenericRestorer {
    fn entity_type(&self) -> &str {
        self.table.name()
    }

    async fn snapshot(
        &self,
        conn: &mut PgConnection,
        entity_id: &str,
    ) -> Result<CanonicalRecord, ChangeError> {
        let row = entity_rows::fetch_row(conn, &self.table, &self.key_column, entity_id)
            .await?
            .ok_or_else(|| {
                ChangeError::not_found(format!("{} {} not found", self.table.name(), entity_id))
            })?;
        record_from_value(row)
    }

    async fn restore(
        &self,
        conn: &mut PgConnection,
        entity_id: &str,
        mut record: CanonicalRecord,
    ) -> Result<(), ChangeError> {
        if record.is_empty() {
            return Err(ChangeError::validation("snapshot must not be empty"));
        }
        bind_key(&mut record, &self.key_column, entity_id)?;
        entity_rows::upsert_row(conn, &self.table, &self.key_column, &record).await
    }

    async fn delete(&self, conn: &mut PgConnection, entity_id: &str) -> Result<(), ChangeError> {
        let deleted =
            entity_rows::delete_rows_by(conn, &self.table, &self.key_column, entity_id).await?;
        if deleted == 0 {
            return Err(ChangeError::not_found(format!(
                "{} {} not found",
                self.table.name(),
                entity_id
            )));
        }
        Ok(())
    }
}

/// Parent/child layout of an aggregate such as an order with line items.
#[derive(Debug, Clone, Copy)]
pub struct CompositeSpec {
    pub parent: &'static str,
    pub child: &'static str,
    /// Column of the child table referencing the parent key.
    pub foreign_key: &'static str,
    /// Child ordering inside the snapshot.
    pub order_by: &'static str,
}

/// Restorer for aggregates: parent row first, then the child collection is
/// replaced wholesale so it matches the snapshot exactly.
#[derive(Debug, Clone)]
pub struct CompositeRestorer {
    parent: TableColumns,
    parent_key: String,
    child: TableColumns,
    child_key: String,
    foreign_key: String,
    order_by: String,
}

impl CompositeRestorer {
    pub fn new(
        catalog: &SchemaCatalog,
        keys: &KeyColumns,
        spec: CompositeSpec,
    ) -> anyhow::Result<Self> {
        let parent = catalog
            .table(spec.parent)
            .ok_or_else(|| anyhow!("composite parent table {} not in schema", spec.parent))?;
        let child = catalog
            .table(spec.child)
            .ok_or_else(|| anyhow!("composite child table {} not in schema", spec.child))?;
        let parent_key = keys.key_for(spec.parent);
        let child_key = keys.key_for(spec.child);

        for (table, column) in [
            (parent, parent_key),
            (child, child_key),
            (child, spec.foreign_key),
            (child, spec.order_by),
        ] {
            if !table.has_column(column) {
                return Err(anyhow!("{} has no column {}", table.name(), column));
            }
        }

        Ok(Self {
            parent: parent.clone(),
            parent_key: parent_key.to_string(),
            child: child.clone(),
            child_key: child_key.to_string(),
            foreign_key: spec.foreign_key.to_string(),
            order_by: spec.order_by.to_string(),
        })
    }

    pub fn child_table(&self) -> &str {
        self.child.name()
    }
}

#[async_trait]
impl EntityRestorer for CompositeRestorer {
    fn entity_type(&self) -> &str {
        self.parent.name()
    }

    async fn snapshot(
        &self,
        conn: &mut PgConnection,
        entity_id: &str,
    ) -> Result<CanonicalRecord, ChangeError> {
        let row = entity_rows::fetch_row(conn, &self.parent, &self.parent_key, entity_id)
            .await?
            .ok_or_else(|| {
                ChangeError::not_found(format!("{} {} not found", self.parent.name(), entity_id))
            })?;
        let parent = record_from_value(row)?;
        let children = entity_rows::fetch_rows_by(
            conn,
            &self.child,
            &self.foreign_key,
            entity_id,
            &[self.order_by.as_str(), self.child_key.as_str()],
        )
        .await?;
        Ok(with_children(parent, children))
    }

    async fn restore(
        &self,
        conn: &mut PgConnection,
        entity_id: &str,
        record: CanonicalRecord,
    ) -> Result<(), ChangeError> {
        let (mut parent, children) = split_children(record)?;
        bind_key(&mut parent, &self.parent_key, entity_id)?;
        entity_rows::upsert_row(conn, &self.parent, &self.parent_key, &parent).await?;

        let Some(children) = children else {
            return Ok(());
        };

        let mut prepared = Vec::with_capacity(children.len());
        for (idx, mut child) in children.into_iter().enumerate() {
            bind_key(&mut child, &self.foreign_key, entity_id)
                .map_err(|e| e.context(format!("{} row {}", self.child.name(), idx)))?;
            if !child.contains_key(&self.child_key) {
                return Err(ChangeError::validation(format!(
                    "{} row {} is missing key column {}",
                    self.child.name(),
                    idx,
                    self.child_key
                )));
            }
            prepared.push(child);
        }

        entity_rows::delete_rows_by(conn, &self.child, &self.foreign_key, entity_id).await?;
        // Children were just cleared for this parent, so a key that still
        // exists belongs to another aggregate.
        for (idx, child) in prepared.iter().enumerate() {
            entity_rows::insert_row(conn, &self.child, &self.child_key, child)
                .await
                .map_err(|e| e.context(format!("{} row {}", self.child.name(), idx)))?;
        }
        tracing::debug!(
            entity_type = self.parent.name(),
            entity_id,
            children = prepared.len(),
            "Restored composite record"
        );
        Ok(())
    }

    async fn delete(&self, conn: &mut PgConnection, entity_id: &str) -> Result<(), ChangeError> {
        entity_rows::delete_rows_by(conn, &self.child, &self.foreign_key, entity_id).await?;
        let deleted =
            entity_rows::delete_rows_by(conn, &self.parent, &self.parent_key, entity_id).await?;
        if deleted == 0 {
            return Err(ChangeError::not_found(format!(
                "{} {} not found",
                self.parent.name(),
                entity_id
            )));
        }
        Ok(())
    }
}

/// Lookup from entity-type tag to the restorer that owns it.
pub struct RestoreRegistry {
    keys: KeyColumns,
    dedicated: HashMap<String, Arc<dyn EntityRestorer>>,
    generic: HashMap<String, Arc<dyn EntityRestorer>>,
}

impl RestoreRegistry {
    pub fn builder(catalog: SchemaCatalog) -> RestoreRegistryBuilder {
        RestoreRegistryBuilder {
            catalog,
            keys: KeyColumns::default(),
            dedicated: HashMap::new(),
        }
    }

    pub fn key_column(&self, entity_type: &str) -> &str {
        self.keys.key_for(entity_type)
    }

    pub fn is_dedicated(&self, entity_type: &str) -> bool {
        self.dedicated.contains_key(entity_type)
    }

    pub fn supports(&self, entity_type: &str) -> bool {
        self.dedicated.contains_key(entity_type) || self.generic.contains_key(entity_type)
    }

    /// Dedicated restorer if one is registered, otherwise the generic one.
    pub fn route(&self, entity_type: &str) -> Result<&dyn EntityRestorer, ChangeError> {
        self.dedicated
            .get(entity_type)
            .or_else(|| self.generic.get(entity_type))
            .map(|restorer| restorer.as_ref())
            .ok_or_else(|| {
                ChangeError::validation(format!("unknown entity type: {}", entity_type))
            })
    }

    pub async fn snapshot(
        &self,
        conn: &mut PgConnection,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<CanonicalRecord, ChangeError> {
        self.route(entity_type)?.snapshot(conn, entity_id).await
    }

    /// Like [`RestoreRegistry::snapshot`], but a missing record is `None`.
    pub async fn snapshot_optional(
        &self,
        conn: &mut PgConnection,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<CanonicalRecord>, ChangeError> {
        match self.snapshot(conn, entity_type, entity_id).await {
            Ok(record) => Ok(Some(record)),
            Err(ChangeError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn restore(
        &self,
        conn: &mut PgConnection,
        entity_type: &str,
        entity_id: &str,
        record: CanonicalRecord,
    ) -> Result<(), ChangeError> {
        self.route(entity_type)?
            .restore(conn, entity_id, record)
            .await
    }

    pub async fn delete(
        &self,
        conn: &mut PgConnection,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<(), ChangeError> {
        self.route(entity_type)?.delete(conn, entity_id).await
    }
}

pub struct RestoreRegistryBuilder {
    catalog: SchemaCatalog,
    keys: KeyColumns,
    dedicated: HashMap<String, Arc<dyn EntityRestorer>>,
}

impl RestoreRegistryBuilder {
    /// Declares a non-default primary key. Must precede registrations that use it.
    pub fn key_column(mut self, entity_type: &str, column: &str) -> Self {
        self.keys.insert(entity_type, column);
        self
    }

    pub fn register(mut self, restorer: Arc<dyn EntityRestorer>) -> Self {
        self.dedicated
            .insert(restorer.entity_type().to_string(), restorer);
        self
    }

    pub fn composite(self, spec: CompositeSpec) -> anyhow::Result<Self> {
        let restorer = CompositeRestorer::new(&self.catalog, &self.keys, spec)?;
        Ok(self.register(Arc::new(restorer)))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Checks the key map against the catalog and creates a generic restorer
    /// for every remaining table that has a usable key column.
    pub fn build(self) -> anyhow::Result<RestoreRegistry> {
        for (entity_type, column) in self.keys.iter() {
            let table = self
                .catalog
                .table(entity_type)
                .ok_or_else(|| anyhow!("key mapping for unknown table {}", entity_type))?;
            if !table.has_column(column) {
                return Err(anyhow!("{} has no key column {}", entity_type, column));
            }
        }

        let mut generic: HashMap<String, Arc<dyn EntityRestorer>> = HashMap::new();
        for table in self.catalog.tables() {
            if self.dedicated.contains_key(table.name()) {
                continue;
            }
            let key = self.keys.key_for(table.name());
            if !table.has_column(key) {
                tracing::warn!(
                    table = table.name(),
                    key,
                    "Table has no key column; not restorable"
                );
                continue;
            }
            generic.insert(
                table.name().to_string(),
                Arc::new(GenericRestorer::new(table.clone(), key)),
            );
        }

        tracing::info!(
            dedicated = self.dedicated.len(),
            generic = generic.len(),
            "Built restore registry"
        );
        Ok(RestoreRegistry {
            keys: self.keys,
            dedicated: self.dedicated,
            generic,
        })
    }
}
