//! Built-in business-module registrations.
//!
//! Each module contributes its key mappings and dedicated restorers to the
//! registry builder; every other catalog table falls through to the generic
//! restorer.

use crate::repositories::schema::SchemaCatalog;
use crate::services::restore::{CompositeSpec, RestoreRegistry, RestoreRegistryBuilder};

pub const PURCHASE_ORDERS: CompositeSpec = CompositeSpec {
    parent: "purchase_orders",
    child: "purchase_order_lines",
    foreign_key: "purchase_order_id",
    order_by: "line_no",
};

pub const QUOTES: CompositeSpec = CompositeSpec {
    parent: "quotes",
    child: "quote_lines",
    foreign_key: "quote_id",
    order_by: "line_no",
};

fn register_inventory(builder: RestoreRegistryBuilder) -> RestoreRegistryBuilder {
    builder
        .key_column("parts", "part_number")
        .key_column("serialized_units", "serial_number")
}

fn register_purchasing(builder: RestoreRegistryBuilder) -> anyhow::Result<RestoreRegistryBuilder> {
    builder.composite(PURCHASE_ORDERS)
}

fn register_sales(builder: RestoreRegistryBuilder) -> anyhow::Result<RestoreRegistryBuilder> {
    builder.composite(QUOTES)
}

/// Registry used by the server: built-in modules over the introspected schema.
pub fn build_registry(catalog: SchemaCatalog) -> anyhow::Result<RestoreRegistry> {
    let builder = register_inventory(RestoreRegistry::builder(catalog));
    let builder = register_purchasing(builder)?;
    let builder = register_sales(builder)?;
    builder.build()
}
