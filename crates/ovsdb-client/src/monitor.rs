use ovsdb::TableSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `MonitorHandle` is the opaque json-value binding a subscription to its
/// callback: generated here as a fresh UUID string, or supplied by the
/// caller when resuming a known subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorHandle(String);

impl MonitorHandle {
    pub fn generate() -> Self {
        MonitorHandle(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MonitorHandle {
    fn from(id: String) -> Self {
        MonitorHandle(id)
    }
}

impl From<&str> for MonitorHandle {
    fn from(id: &str) -> Self {
        MonitorHandle(id.to_string())
    }
}

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which row transitions a monitor reports. Absent members default to true
/// on the server (RFC 7047 §4.1.5).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MonitorSelect {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modify: Option<bool>,
}

/// Per-table monitor request: which columns to watch, and which transitions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<MonitorSelect>,
}

impl MonitorRequest {
    pub fn with_columns(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        MonitorRequest {
            columns: columns.into_iter().map(Into::into).collect(),
            select: None,
        }
    }

    /// Watch every column the table advertises, skipping the internally
    /// generated ones the server refuses to monitor.
    pub fn all_columns(table: &TableSchema) -> Self {
        Self::with_columns(
            table
                .column_names()
                .filter(|name| !name.starts_with('_')),
        )
    }

    pub fn select(mut self, select: MonitorSelect) -> Self {
        self.select = Some(select);
        self
    }
}
