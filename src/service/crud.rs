//! Generic CRUD over registered entities.
//!
//! Every operation resolves the entity through the registry, compiles filters to storage
//! conditions, and runs against the [`Store`]. Mutations take an optional transaction:
//! with `None` the call opens, commits (or rolls back) its own.

use super::password::hash_password;
use crate::error::EngineError;
use crate::filter::{compile, CompiledFilter, Condition, FilterOptions, Predicate, LIMIT};
use crate::registry::{EntityRegistry, EntityShape, Field, FieldKind, Record, PASSWORD_FIELD, PASSWORD_MASK};
use crate::store::{Column, Cond, Delete, Insert, Join, Select, Store, Target, Transaction, Update, Where};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct CrudEngine {
    store: Arc<dyn Store>,
    registry: Arc<EntityRegistry>,
}

/// Commit on success, roll back on failure. A rollback failure is logged and the original
/// error returned.
pub async fn finish<T>(tx: Box<dyn Transaction>, res: Result<T, EngineError>) -> Result<T, EngineError> {
    match res {
        Ok(v) => {
            tx.commit().await?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                tracing::error!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

impl CrudEngine {
    pub fn new(store: Arc<dyn Store>, registry: Arc<EntityRegistry>) -> Self {
        CrudEngine { store, registry }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn begin(&self) -> Result<Box<dyn Transaction>, EngineError> {
        Ok(self.store.begin().await?)
    }

    /// Single row where `field = value`; no rows is `Ok(None)`.
    pub async fn get(
        &self,
        name: &str,
        field: &str,
        value: &str,
        table: Option<&str>,
    ) -> Result<Option<Record>, EngineError> {
        let shape = self.registry.shape(name)?;
        let mut q = base_select(&shape, table);
        let column = resolve_column(&shape, field)?
            .ok_or_else(|| EngineError::Validation(format!("{} cannot be queried on {}", field, name)))?;
        q = q.matching(column, value);
        q.limit = Some(1);
        let row = self.store.select(&q).await?.into_iter().next();
        Ok(row.map(|r| shape.hydrate(r)))
    }

    /// Single row where `field` equals `value` exactly, and every condition of `filter` also
    /// holds. No rows is `NotFound`.
    pub async fn get_by(
        &self,
        name: &str,
        field: &str,
        value: &str,
        filter: &FilterOptions,
        table: Option<&str>,
    ) -> Result<Record, EngineError> {
        let shape = self.registry.shape(name)?;
        let column = resolve_column(&shape, field)?
            .ok_or_else(|| EngineError::Validation(format!("{} cannot be queried on {}", field, name)))?;
        let mut opts = filter.clone();
        opts.set(LIMIT, "1");
        let q = self.query(&shape, &opts, table)?.matching(column, value);
        self.store
            .select(&q)
            .await?
            .into_iter()
            .next()
            .map(|r| shape.hydrate(r))
            .ok_or_else(|| EngineError::NotFound(format!("{} where {} = {}", name, field, value)))
    }

    pub async fn list(
        &self,
        name: &str,
        filter: &FilterOptions,
        table: Option<&str>,
    ) -> Result<Vec<Record>, EngineError> {
        let shape = self.registry.shape(name)?;
        let q = self.query(&shape, filter, table)?;
        let rows = self.store.select(&q).await?;
        Ok(rows.into_iter().map(|r| shape.hydrate(r)).collect())
    }

    /// Rows plus the total number of matches, ignoring `$limit`/`$offset`.
    pub async fn list_and_count(
        &self,
        name: &str,
        filter: &FilterOptions,
        table: Option<&str>,
    ) -> Result<(Vec<Record>, u64), EngineError> {
        let shape = self.registry.shape(name)?;
        let q = self.query(&shape, filter, table)?;
        let rows = self.store.select(&q).await?;
        let count = self.store.count(&q).await?;
        Ok((rows.into_iter().map(|r| shape.hydrate(r)).collect(), count))
    }

    /// Read query for `shape` under `filter`, for callers that need to run it inside their
    /// own transaction.
    pub fn query(&self, shape: &EntityShape, filter: &FilterOptions, table: Option<&str>) -> Result<Select, EngineError> {
        let compiled = compile(filter)?;
        apply_filter(shape, base_select(shape, table), compiled)
    }

    /// Insert a record built from the fields of `form` the entity declares.
    ///
    /// Unless `use_id`, a fresh id is generated and written to both the record and `form`.
    pub async fn create(
        &self,
        tx: Option<&mut (dyn Transaction + '_)>,
        name: &str,
        form: &mut Record,
        use_id: bool,
    ) -> Result<(), EngineError> {
        let shape = self.registry.shape(name)?;
        let insert = insert_for(&shape, form, use_id)?;
        match tx {
            Some(tx) => {
                tx.insert(&insert).await?;
                Ok(())
            }
            None => {
                let mut own = self.begin().await?;
                let res = own.insert(&insert).await.map(|_| ()).map_err(EngineError::from);
                finish(own, res).await
            }
        }
    }

    /// Insert several records of possibly different types in one transaction, each with a
    /// fresh id written back to its form.
    pub async fn create_multiple(&self, items: &mut [(String, Record)]) -> Result<(), EngineError> {
        let mut inserts = Vec::with_capacity(items.len());
        for (name, form) in items.iter_mut() {
            let shape = self.registry.shape(name)?;
            inserts.push(insert_for(&shape, form, false)?);
        }
        let mut tx = self.begin().await?;
        let mut res = Ok(());
        for insert in &inserts {
            if let Err(e) = tx.insert(insert).await {
                res = Err(e.into());
                break;
            }
        }
        finish(tx, res).await
    }

    /// Update the allowed columns of the record identified by `form`'s primary key.
    /// Nothing allowed is a successful no-op.
    pub async fn save(
        &self,
        tx: Option<&mut (dyn Transaction + '_)>,
        name: &str,
        form: &Record,
        exclude: &[String],
    ) -> Result<(), EngineError> {
        let shape = self.registry.shape(name)?;
        let Some(update) = update_for(&shape, form, exclude)? else {
            tracing::debug!(entity = name, "no columns left to update");
            return Ok(());
        };
        match tx {
            Some(tx) => {
                tx.update(&update).await?;
                Ok(())
            }
            None => {
                let mut own = self.begin().await?;
                let res = own.update(&update).await.map(|_| ()).map_err(EngineError::from);
                finish(own, res).await
            }
        }
    }

    pub async fn delete(&self, tx: Option<&mut (dyn Transaction + '_)>, name: &str, id: &str) -> Result<(), EngineError> {
        if id.is_empty() {
            return Err(EngineError::Validation("id not supplied".into()));
        }
        let shape = self.registry.shape(name)?;
        let delete = Delete {
            table: shape.table.to_string(),
            key: (key_column(&shape), Value::String(id.to_string())),
        };
        let n = match tx {
            Some(tx) => tx.delete(&delete).await?,
            None => {
                let mut own = self.begin().await?;
                let res = own.delete(&delete).await.map_err(EngineError::from);
                finish(own, res).await?
            }
        };
        tracing::debug!(entity = name, id, rows = n, "deleted");
        Ok(())
    }
}

/// Columns `save` would write for `form`: every stored field not excluded, minus the
/// password when it is empty or masked (unchanged).
pub fn allowed_columns(shape: &EntityShape, form: &Record, exclude: &[String]) -> Vec<Field> {
    let password_unchanged = form
        .text(PASSWORD_FIELD)
        .map(|p| p.is_empty() || p == PASSWORD_MASK)
        .unwrap_or(true);
    shape
        .persisted_fields()
        .filter(|f| !exclude.iter().any(|x| x == f.name))
        .filter(|f| !(f.name == PASSWORD_FIELD && password_unchanged))
        .copied()
        .collect()
}

fn key_column(shape: &EntityShape) -> Column {
    let kind = shape.field(shape.primary_key).map(|f| f.kind).unwrap_or(FieldKind::Text);
    Column::new(shape.primary_key, kind)
}

/// Password value ready to store: hashed unless empty or masked.
fn stored_password(rec: &Record) -> Result<Option<String>, EngineError> {
    match rec.text(PASSWORD_FIELD) {
        Some(p) if !p.is_empty() && p != PASSWORD_MASK => Ok(Some(hash_password(&p)?)),
        _ => Ok(None),
    }
}

fn insert_for(shape: &EntityShape, form: &mut Record, use_id: bool) -> Result<Insert, EngineError> {
    let mut rec = shape.copy_compatible(form);
    let pk = shape.primary_key;
    if !use_id {
        let id = Value::String(uuid::Uuid::new_v4().to_string());
        rec.insert(pk.to_string(), id.clone());
        form.insert(pk.to_string(), id);
    } else if rec.text(pk).map(|s| s.is_empty()).unwrap_or(true) {
        return Err(EngineError::Validation(format!("{} required when creating with a given id", pk)));
    }
    if shape.has_password {
        if let Some(hash) = stored_password(&rec)? {
            rec.insert(PASSWORD_FIELD.to_string(), Value::String(hash));
        }
    }
    let values = shape
        .persisted_fields()
        .map(|f| {
            let v = rec.get(f.name).cloned().unwrap_or(Value::Null);
            (Column::new(f.name, f.kind), v)
        })
        .collect();
    Ok(Insert {
        table: shape.table.to_string(),
        key: key_column(shape),
        values,
    })
}

fn update_for(shape: &EntityShape, form: &Record, exclude: &[String]) -> Result<Option<Update>, EngineError> {
    let columns = allowed_columns(shape, form, exclude);
    if columns.is_empty() {
        return Ok(None);
    }
    let id = form
        .text(shape.primary_key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::Validation(format!("{} not supplied", shape.primary_key)))?;
    let mut rec = shape.copy_compatible(form);
    if let Some(hash) = stored_password(&rec)? {
        rec.insert(PASSWORD_FIELD.to_string(), Value::String(hash));
    }
    let values = columns
        .iter()
        .map(|f| (Column::new(f.name, f.kind), rec.get(f.name).cloned().unwrap_or(Value::Null)))
        .collect();
    Ok(Some(Update {
        table: shape.table.to_string(),
        key: (key_column(shape), Value::String(id)),
        values,
    }))
}

/// Projection of every stored field plus the columns the entity's joins supply.
fn base_select(shape: &EntityShape, table: Option<&str>) -> Select {
    let mut columns: Vec<Column> = shape.persisted_fields().map(|f| Column::new(f.name, f.kind)).collect();
    let mut joins = Vec::new();
    for j in &shape.query_shape.joins {
        joins.push(Join {
            table: j.table.to_string(),
            alias: j.alias.to_string(),
            local_key: j.local_key.to_string(),
            foreign_key: j.foreign_key.to_string(),
        });
        for col in j.columns {
            if shape.field(col).map(|f| f.persisted).unwrap_or(false) {
                continue;
            }
            let kind = shape.field(col).map(|f| f.kind).unwrap_or(FieldKind::Text);
            columns.push(Column::joined(j.alias, *col, kind));
        }
    }
    let mut q = Select::new(table.unwrap_or(shape.table), columns);
    q.joins = joins;
    q
}

/// Column a filter key names: a stored field, else a joined column. `Ok(None)` for keys the
/// entity drops before querying.
fn resolve_column(shape: &EntityShape, key: &str) -> Result<Option<Column>, EngineError> {
    if let Some(f) = shape.field(key).filter(|f| f.persisted) {
        return Ok(Some(Column::new(f.name, f.kind)));
    }
    if let Some(j) = shape.query_shape.join_for(key) {
        let kind = shape.field(key).map(|f| f.kind).unwrap_or(FieldKind::Text);
        return Ok(Some(Column::joined(j.alias, key, kind)));
    }
    if shape.query_shape.drop_filter_keys.iter().any(|k| *k == key) {
        return Ok(None);
    }
    Err(EngineError::Validation(format!("unknown field {} on {}", key, shape.name)))
}

fn cond(column: Column, p: Predicate) -> Cond {
    Cond {
        target: Target::Column(column),
        op: p.op,
        value: p.value,
    }
}

fn apply_filter(shape: &EntityShape, mut q: Select, filter: CompiledFilter) -> Result<Select, EngineError> {
    for c in filter.conditions {
        let field = c.predicates().first().map(|p| p.field.clone()).unwrap_or_default();
        if shape.query_shape.drop_filter_keys.iter().any(|k| *k == field) {
            tracing::debug!(entity = %shape.name, field, "filter key dropped");
            continue;
        }
        let Some(column) = resolve_column(shape, &field)? else {
            continue;
        };
        q.wheres.push(match c {
            Condition::Match(p) => Where::Match(cond(column, p)),
            Condition::AnyOf(ps) => Where::AnyOf(ps.into_iter().map(|p| cond(column.clone(), p)).collect()),
        });
    }
    for key in filter.order {
        if let Some(column) = resolve_column(shape, &key)? {
            q.order.push(Target::Column(column));
        }
    }
    q.limit = filter.limit;
    q.offset = filter.offset;
    Ok(q)
}
