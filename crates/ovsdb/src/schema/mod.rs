use crate::update::{RowUpdate, TableUpdate, TableUpdates};
use crate::{Error, Result, Row};
use serde_json::Value;
use std::collections::BTreeMap;

mod column;
pub use column::{BaseType, ColumnType, RefType, UNLIMITED};

/// `ColumnSchema` names one column and its type. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnSchema {
            name: name.into(),
            column_type,
        }
    }

    /// Parse one member of a table's "columns" object.
    pub fn from_json(name: &str, node: &Value) -> Result<Self> {
        let Some(type_node) = node.get("type") else {
            return Err(Error::Parsing(format!(
                "column \"{name}\" lacks a \"type\" member"
            )));
        };
        Ok(ColumnSchema {
            name: name.to_string(),
            column_type: ColumnType::from_json(type_node)?,
        })
    }
}

/// `TableSchema` is a named collection of columns. Column names are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: BTreeMap<String, ColumnSchema>,
}

impl TableSchema {
    /// Parse one member of a schema's "tables" object.
    pub fn from_json(name: &str, node: &Value) -> Result<Self> {
        let Some(columns_node) = node.get("columns").and_then(Value::as_object) else {
            return Err(Error::Parsing(format!(
                "table \"{name}\" lacks a \"columns\" object"
            )));
        };
        let mut columns = BTreeMap::new();
        for (column_name, column_node) in columns_node {
            let parsed = ColumnSchema::from_json(column_name, column_node)?;
            columns.insert(column_name.clone(), parsed);
        }
        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    /// Column names, in their stable iteration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Decode a wire row against this table's columns. Columns the schema
    /// does not know are skipped: the server may be newer than our copy.
    pub fn row_from_json(&self, node: &Value) -> Result<Row> {
        let Some(object) = node.as_object() else {
            return Err(Error::Parsing(format!("row is not an object: {node}")));
        };
        let mut row = Row::new();
        for (column_name, value) in object {
            let Some(column) = self.columns.get(column_name) else {
                tracing::debug!(
                    table = %self.name,
                    column = %column_name,
                    "skipping column absent from the table schema"
                );
                continue;
            };
            row.insert(column_name.clone(), column.column_type.value_from_json(value)?);
        }
        Ok(row)
    }

    /// Decode this table's slice of a monitor notification:
    /// `{"<row-uuid>": {"old": {...}, "new": {...}}, ...}`.
    pub fn updates_from_json(&self, node: &Value) -> Result<TableUpdate> {
        let Some(object) = node.as_object() else {
            return Err(Error::Parsing(format!(
                "table update for \"{}\" is not an object: {node}",
                self.name
            )));
        };
        let mut rows = BTreeMap::new();
        for (row_uuid, row_node) in object {
            let uuid = uuid::Uuid::parse_str(row_uuid).map_err(|_| {
                Error::Parsing(format!("\"{row_uuid}\" is not a row UUID"))
            })?;
            let old = match row_node.get("old") {
                Some(old) => Some(self.row_from_json(old)?),
                None => None,
            };
            let new = match row_node.get("new") {
                Some(new) => Some(self.row_from_json(new)?),
                None => None,
            };
            if old.is_none() && new.is_none() {
                return Err(Error::Parsing(format!(
                    "row update {row_uuid} carries neither \"old\" nor \"new\""
                )));
            }
            rows.insert(uuid, RowUpdate { old, new });
        }
        Ok(TableUpdate { rows })
    }
}

/// `DatabaseSchema` is the parsed form of a server-advertised schema
/// document: a named, versioned set of tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    pub name: String,
    pub version: String,
    pub tables: BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// Parse a `get_schema` reply for the named database.
    pub fn from_json(name: &str, node: &Value) -> Result<Self> {
        let Some(tables_node) = node.get("tables").and_then(Value::as_object) else {
            return Err(Error::Parsing(format!(
                "schema for \"{name}\" lacks a \"tables\" object"
            )));
        };
        let version = node
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut tables = BTreeMap::new();
        for (table_name, table_node) in tables_node {
            tables.insert(
                table_name.clone(),
                TableSchema::from_json(table_name, table_node)?,
            );
        }
        Ok(DatabaseSchema {
            name: name.to_string(),
            version,
            tables,
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Servers do not advertise the `_uuid` and `_version` columns every row
    /// carries; add them to each table after parse.
    pub fn populate_internally_generated_columns(&mut self) {
        for table in self.tables.values_mut() {
            for name in ["_uuid", "_version"] {
                table
                    .columns
                    .entry(name.to_string())
                    .or_insert_with(|| ColumnSchema::new(name, ColumnType::scalar(BaseType::uuid())));
            }
        }
    }

    /// Decode a whole monitor notification or initial snapshot:
    /// `{"<table>": {"<row-uuid>": {"old"?, "new"?}}, ...}`.
    /// Tables the schema does not know are skipped with a debug log.
    pub fn table_updates_from_json(&self, node: &Value) -> Result<TableUpdates> {
        let Some(object) = node.as_object() else {
            return Err(Error::Parsing(format!(
                "table updates is not an object: {node}"
            )));
        };
        let mut tables = BTreeMap::new();
        for (table_name, updates_node) in object {
            let Some(table) = self.tables.get(table_name) else {
                tracing::debug!(
                    database = %self.name,
                    table = %table_name,
                    "skipping update for a table absent from the schema"
                );
                continue;
            };
            tables.insert(table_name.clone(), table.updates_from_json(updates_node)?);
        }
        Ok(TableUpdates { tables })
    }
}
