//! Schema-less resources: per-site record types whose fields live in a JSON document.
//!
//! A [`ResourceType`] describes the fields (and their defaults) of a named resource; each
//! [`ResourceRecord`] stores its values under `data`. Filters use the same language as
//! entity lists, applied to `data ->> key`.

use crate::error::EngineError;
use crate::filter::{compile, Condition, FilterOptions, Predicate};
use crate::registry::{FieldKind, Record};
use crate::service::finish;
use crate::store::{Column, Cond, Insert, Select, Store, Target, Update, Where};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

pub const TYPE_TABLE: &str = "resource_type";
pub const RECORD_TABLE: &str = "resource_record";

const DATA: &str = "data";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: String,
    pub site_id: String,
    pub name: String,
    /// `{ field: { "default": ..., ...attributes } }`
    pub model: Value,
}

impl ResourceType {
    /// Default value of every model field (empty string when none is declared).
    pub fn field_defaults(&self) -> Result<Map<String, Value>, EngineError> {
        let model = self
            .model
            .as_object()
            .ok_or_else(|| EngineError::Validation(format!("resource '{}' model must be an object", self.name)))?;
        let mut out = Map::new();
        for (field, attr) in model {
            let attr = attr.as_object().ok_or_else(|| {
                EngineError::Validation(format!("resource '{}' field '{}' must be an object", self.name, field))
            })?;
            let default = attr.get("default").cloned().unwrap_or_else(|| Value::String(String::new()));
            out.insert(field.clone(), default);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub site_id: String,
    pub name: String,
    pub data: Value,
}

fn text(name: &str) -> Column {
    Column::new(name, FieldKind::Text)
}

fn json(name: &str) -> Column {
    Column::new(name, FieldKind::Json)
}

fn type_columns() -> Vec<Column> {
    vec![text("id"), text("site_id"), text("name"), json("model")]
}

fn record_columns() -> Vec<Column> {
    vec![text("id"), text("site_id"), text("name"), json(DATA)]
}

fn data_cond(p: Predicate) -> Cond {
    Cond {
        target: Target::JsonKey {
            column: DATA.to_string(),
            key: p.field,
        },
        op: p.op,
        value: p.value,
    }
}

/// Narrow `q` by a filter over the record's JSON document.
fn apply_data_filter(mut q: Select, filter: &FilterOptions) -> Result<Select, EngineError> {
    let compiled = compile(filter)?;
    for c in compiled.conditions {
        q.wheres.push(match c {
            Condition::Match(p) => Where::Match(data_cond(p)),
            Condition::AnyOf(ps) => Where::AnyOf(ps.into_iter().map(data_cond).collect()),
        });
    }
    q.order = compiled
        .order
        .into_iter()
        .map(|key| Target::JsonKey {
            column: DATA.to_string(),
            key,
        })
        .collect();
    q.limit = compiled.limit.or(q.limit);
    q.offset = compiled.offset;
    Ok(q)
}

/// Merge `defaults` under `data`: values already present win.
fn merge_defaults(data: Value, defaults: Map<String, Value>) -> Result<Value, EngineError> {
    let mut merged = match data {
        Value::Object(m) => m,
        Value::Null => Map::new(),
        _ => return Err(EngineError::Validation("resource data must be a JSON object".into())),
    };
    for (k, v) in defaults {
        merged.entry(k).or_insert(v);
    }
    Ok(Value::Object(merged))
}

/// Resource type registry (cached by `site:name`) and record access.
pub struct ResourceCatalog {
    store: Arc<dyn Store>,
    types: Mutex<HashMap<String, ResourceType>>,
}

impl ResourceCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ResourceCatalog {
            store,
            types: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(site_id: &str, name: &str) -> String {
        format!("{}:{}", site_id, name)
    }

    fn cached(&self, key: &str) -> Option<ResourceType> {
        self.types.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn remember(&self, key: String, rtype: ResourceType) {
        self.types.lock().unwrap_or_else(PoisonError::into_inner).insert(key, rtype);
    }

    /// Persist a new resource type for `site_id` and cache it.
    pub async fn register_type(&self, site_id: &str, name: &str, model: Value) -> Result<ResourceType, EngineError> {
        let rtype = ResourceType {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            name: name.to_string(),
            model,
        };
        rtype.field_defaults()?;
        let insert = Insert {
            table: TYPE_TABLE.to_string(),
            key: text("id"),
            values: vec![
                (text("id"), Value::String(rtype.id.clone())),
                (text("site_id"), Value::String(rtype.site_id.clone())),
                (text("name"), Value::String(rtype.name.clone())),
                (json("model"), rtype.model.clone()),
            ],
        };
        let mut tx = self.store.begin().await?;
        let res = tx.insert(&insert).await.map(|_| ()).map_err(EngineError::from);
        finish(tx, res).await?;
        tracing::debug!(site_id, name, "resource type registered");
        self.remember(Self::cache_key(site_id, name), rtype.clone());
        Ok(rtype)
    }

    /// Resource type from the cache, else from storage. Unregistered is `NotFound`.
    pub async fn find_type(&self, site_id: &str, name: &str) -> Result<ResourceType, EngineError> {
        let key = Self::cache_key(site_id, name);
        if let Some(found) = self.cached(&key) {
            return Ok(found);
        }
        let mut q = Select::new(TYPE_TABLE, type_columns())
            .matching(text("site_id"), site_id)
            .matching(text("name"), name);
        q.limit = Some(1);
        let row = self
            .store
            .select(&q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(format!("resource '{}' isn't registered", name)))?;
        let rtype: ResourceType = row.to_entity()?;
        self.remember(key, rtype.clone());
        Ok(rtype)
    }

    /// Store a new record of resource `name`; model defaults fill fields `data` lacks.
    pub async fn add(&self, site_id: &str, name: &str, data: Value) -> Result<ResourceRecord, EngineError> {
        let rtype = self.find_type(site_id, name).await?;
        let record = ResourceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            name: name.to_string(),
            data: merge_defaults(data, rtype.field_defaults()?)?,
        };
        let insert = Insert {
            table: RECORD_TABLE.to_string(),
            key: text("id"),
            values: vec![
                (text("id"), Value::String(record.id.clone())),
                (text("site_id"), Value::String(record.site_id.clone())),
                (text("name"), Value::String(record.name.clone())),
                (json(DATA), record.data.clone()),
            ],
        };
        let mut tx = self.store.begin().await?;
        let res = tx.insert(&insert).await.map(|_| ()).map_err(EngineError::from);
        finish(tx, res).await?;
        Ok(record)
    }

    pub async fn get(&self, site_id: &str, id: &str) -> Result<Option<ResourceRecord>, EngineError> {
        let mut q = Select::new(RECORD_TABLE, record_columns())
            .matching(text("site_id"), site_id)
            .matching(text("id"), id);
        q.limit = Some(1);
        self.first(&q).await
    }

    /// First record of `resource` matching `filter`.
    pub async fn get_by_field(
        &self,
        site_id: &str,
        resource: &str,
        filter: &FilterOptions,
    ) -> Result<Option<ResourceRecord>, EngineError> {
        let mut q = self.scoped(site_id, resource, filter)?;
        q.limit = Some(1);
        self.first(&q).await
    }

    pub async fn find(
        &self,
        site_id: &str,
        resource: &str,
        filter: &FilterOptions,
    ) -> Result<Vec<ResourceRecord>, EngineError> {
        let q = self.scoped(site_id, resource, filter)?;
        self.store
            .select(&q)
            .await?
            .iter()
            .map(Record::to_entity)
            .collect()
    }

    /// Replace a record's data. The record must belong to `site_id`.
    pub async fn update_data(&self, site_id: &str, id: &str, data: Value) -> Result<(), EngineError> {
        let owned = Select::new(RECORD_TABLE, vec![text("id")])
            .matching(text("site_id"), site_id)
            .matching(text("id"), id);
        let update = Update {
            table: RECORD_TABLE.to_string(),
            key: (text("id"), Value::String(id.to_string())),
            values: vec![(json(DATA), data)],
        };
        let mut tx = self.store.begin().await?;
        let res = match tx.count(&owned).await {
            Ok(0) => Err(EngineError::NotFound(format!("resource record {}", id))),
            Ok(_) => tx.update(&update).await.map(|_| ()).map_err(EngineError::from),
            Err(e) => Err(e.into()),
        };
        finish(tx, res).await
    }

    fn scoped(&self, site_id: &str, resource: &str, filter: &FilterOptions) -> Result<Select, EngineError> {
        let q = Select::new(RECORD_TABLE, record_columns())
            .matching(text("site_id"), site_id)
            .matching(text("name"), resource);
        apply_data_filter(q, filter)
    }

    async fn first(&self, q: &Select) -> Result<Option<ResourceRecord>, EngineError> {
        match self.store.select(q).await?.into_iter().next() {
            Some(row) => Ok(Some(row.to_entity()?)),
            None => Ok(None),
        }
    }
}
