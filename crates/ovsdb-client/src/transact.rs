use ovsdb::{Datum, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Comparison functions of a "where" clause (RFC 7047 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Function {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEquals,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = ">=")]
    GreaterThanOrEquals,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "includes")]
    Includes,
    #[serde(rename = "excludes")]
    Excludes,
}

/// Mutators of a "mutate" operation (RFC 7047 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mutator {
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Subtract,
    #[serde(rename = "*=")]
    Multiply,
    #[serde(rename = "/=")]
    Divide,
    #[serde(rename = "%=")]
    Remainder,
    #[serde(rename = "insert")]
    Insert,
    #[serde(rename = "delete")]
    Delete,
}

/// One `[column, function, value]` clause.
#[derive(Debug, Clone, Serialize)]
pub struct Condition(pub String, pub Function, pub Value);

impl Condition {
    pub fn new(column: impl Into<String>, function: Function, value: Datum) -> Self {
        Condition(column.into(), function, value.to_json())
    }

    /// Equality clause on a scalar column.
    pub fn equals(column: impl Into<String>, value: impl Into<Datum>) -> Self {
        Self::new(column, Function::Equals, value.into())
    }
}

/// One `[column, mutator, value]` triple of a "mutate" operation.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation(pub String, pub Mutator, pub Value);

impl Mutation {
    pub fn new(column: impl Into<String>, mutator: Mutator, value: Datum) -> Self {
        Mutation(column.into(), mutator, value.to_json())
    }
}

/// One operation of a transact batch (RFC 7047 §5.2).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Insert {
        table: String,
        row: Map<String, Value>,
        #[serde(rename = "uuid-name", skip_serializing_if = "Option::is_none")]
        uuid_name: Option<String>,
    },
    Select {
        table: String,
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
    },
    Update {
        table: String,
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        row: Map<String, Value>,
    },
    Mutate {
        table: String,
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
    },
    Wait {
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
        table: String,
        #[serde(rename = "where")]
        clauses: Vec<Condition>,
        columns: Vec<String>,
        until: Function,
        rows: Vec<Value>,
    },
    Commit {
        durable: bool,
    },
    Abort,
    Comment {
        comment: String,
    },
    Assert {
        lock: String,
    },
}

impl Operation {
    pub fn insert(table: impl Into<String>, row: &Row) -> Self {
        Operation::Insert {
            table: table.into(),
            row: encode_row(row),
            uuid_name: None,
        }
    }

    /// Insert naming the new row, so later operations in the same batch can
    /// reference it through `["named-uuid", name]`.
    pub fn insert_named(table: impl Into<String>, row: &Row, uuid_name: impl Into<String>) -> Self {
        Operation::Insert {
            table: table.into(),
            row: encode_row(row),
            uuid_name: Some(uuid_name.into()),
        }
    }

    pub fn select(table: impl Into<String>, clauses: Vec<Condition>) -> Self {
        Operation::Select {
            table: table.into(),
            clauses,
            columns: None,
        }
    }

    pub fn select_columns(
        table: impl Into<String>,
        clauses: Vec<Condition>,
        columns: Vec<String>,
    ) -> Self {
        Operation::Select {
            table: table.into(),
            clauses,
            columns: Some(columns),
        }
    }

    pub fn update(table: impl Into<String>, clauses: Vec<Condition>, row: &Row) -> Self {
        Operation::Update {
            table: table.into(),
            clauses,
            row: encode_row(row),
        }
    }

    pub fn mutate(
        table: impl Into<String>,
        clauses: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Operation::Mutate {
            table: table.into(),
            clauses,
            mutations,
        }
    }

    pub fn delete(table: impl Into<String>, clauses: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.into(),
            clauses,
        }
    }

    pub fn commit(durable: bool) -> Self {
        Operation::Commit { durable }
    }

    pub fn abort() -> Self {
        Operation::Abort
    }

    pub fn comment(comment: impl Into<String>) -> Self {
        Operation::Comment {
            comment: comment.into(),
        }
    }

    pub fn assert_lock(lock: impl Into<String>) -> Self {
        Operation::Assert { lock: lock.into() }
    }
}

fn encode_row(row: &Row) -> Map<String, Value> {
    row.iter()
        .map(|(name, datum)| (name.clone(), datum.to_json()))
        .collect()
}

/// `TransactBuilder` accumulates a batch of operations against one database
/// and renders the `transact` params array.
#[derive(Debug, Clone)]
pub struct TransactBuilder {
    database: String,
    operations: Vec<Operation>,
}

impl TransactBuilder {
    pub fn new(database: impl Into<String>) -> Self {
        TransactBuilder {
            database: database.into(),
            operations: Vec::new(),
        }
    }

    pub fn add(&mut self, operation: Operation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Render `[db-name, op1, op2, ...]`.
    pub fn build(&self) -> Value {
        let mut params = Vec::with_capacity(1 + self.operations.len());
        params.push(Value::String(self.database.clone()));
        params.extend(self.operations.iter().map(|operation| {
            serde_json::to_value(operation).expect("operations always serialize")
        }));
        Value::Array(params)
    }
}

/// Per-operation result slot of a transact reply. Exactly which members are
/// present depends on the operation; a failed slot carries `error`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "uuid_pair")]
    pub uuid: Option<uuid::Uuid>,
    #[serde(default)]
    pub rows: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl OperationResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// A result uuid arrives as the `["uuid", "<hex>"]` pair.
fn uuid_pair<'de, D>(deserializer: D) -> std::result::Result<Option<uuid::Uuid>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<(String, uuid::Uuid)>::deserialize(deserializer)? {
        None => Ok(None),
        Some((tag, uuid)) if tag == "uuid" => Ok(Some(uuid)),
        Some((tag, _)) => Err(serde::de::Error::custom(format!(
            "expected a [\"uuid\", ...] pair, not \"{tag}\""
        ))),
    }
}

/// Decode a transact reply into per-operation results. The array's length is
/// the operation count, plus any trailing server-inserted slot; null slots
/// (operations never attempted) decode to an empty result.
pub fn results_from_json(result: Value) -> crate::Result<Vec<OperationResult>> {
    let Value::Array(slots) = result else {
        return Err(crate::Error::OperationFailed(result));
    };
    slots
        .into_iter()
        .map(|slot| {
            if slot.is_null() {
                Ok(OperationResult::default())
            } else {
                serde_json::from_value(slot).map_err(Into::into)
            }
        })
        .collect()
}
