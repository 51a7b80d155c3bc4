//! Storage adapter: structured commands the CRUD engine issues, and the backends that run
//! them. Reads may go through the [`Store`] directly; every write goes through a
//! [`Transaction`].

mod memory;
mod postgres;

pub use memory::{MemoryStore, MemoryTransaction, Write};
pub use postgres::{PgStore, PgTransaction};

use crate::error::StoreError;
use crate::filter::Op;
use crate::registry::FieldKind;
use crate::registry::Record;
use async_trait::async_trait;
use serde_json::Value;

/// A column, optionally qualified by a join alias (None = the main table).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub table: Option<String>,
    pub name: String,
    pub kind: FieldKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Column {
            table: None,
            name: name.into(),
            kind,
        }
    }

    pub fn joined(alias: impl Into<String>, name: impl Into<String>, kind: FieldKind) -> Self {
        Column {
            table: Some(alias.into()),
            name: name.into(),
            kind,
        }
    }
}

/// What a predicate compares against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Column(Column),
    /// Text value of `key` inside a JSON document column.
    JsonKey { column: String, key: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cond {
    pub target: Target,
    pub op: Op,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Where {
    Match(Cond),
    AnyOf(Vec<Cond>),
}

/// `LEFT JOIN table AS alias ON alias.foreign_key = main.local_key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub local_key: String,
    pub foreign_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<Column>,
    pub joins: Vec<Join>,
    pub wheres: Vec<Where>,
    /// Ascending sort keys.
    pub order: Vec<Target>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn new(table: impl Into<String>, columns: Vec<Column>) -> Self {
        Select {
            table: table.into(),
            columns,
            ..Default::default()
        }
    }

    /// Add an exact-match condition on `column`.
    pub fn matching(mut self, column: Column, value: impl Into<String>) -> Self {
        self.wheres.push(Where::Match(Cond {
            target: Target::Column(column),
            op: Op::Eq,
            value: value.into(),
        }));
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Insert {
    pub table: String,
    /// Primary key column; duplicate keys are a constraint violation.
    pub key: Column,
    pub values: Vec<(Column, Value)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub table: String,
    pub key: (Column, Value),
    pub values: Vec<(Column, Value)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delete {
    pub table: String,
    pub key: (Column, Value),
}

/// One open storage transaction. Dropping without commit discards its writes.
#[async_trait]
pub trait Transaction: Send {
    async fn select(&mut self, q: &Select) -> Result<Vec<Record>, StoreError>;

    async fn count(&mut self, q: &Select) -> Result<u64, StoreError>;

    async fn insert(&mut self, q: &Insert) -> Result<u64, StoreError>;

    async fn update(&mut self, q: &Update) -> Result<u64, StoreError>;

    async fn delete(&mut self, q: &Delete) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A storage engine handle shared by all requests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    async fn select(&self, q: &Select) -> Result<Vec<Record>, StoreError>;

    /// Rows matching `q`'s conditions, ignoring limit and offset.
    async fn count(&self, q: &Select) -> Result<u64, StoreError>;
}

/// Text form of a stored value as used in comparisons (None for null).
pub(crate) fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
