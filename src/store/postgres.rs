//! PostgreSQL backend: renders commands through the SQL builder and runs them with sqlx.

use super::{Delete, Insert, Select, Store, Transaction, Update};
use crate::error::StoreError;
use crate::registry::Record;
use crate::sql::{render_count, render_delete, render_insert, render_select, render_update, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn bound(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.as_deref());
    }
    query
}

async fn fetch(conn: &mut PgConnection, q: QueryBuf) -> Result<Vec<Record>, StoreError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bound(&q).fetch_all(conn).await?;
    Ok(rows.iter().map(row_to_record).collect())
}

async fn fetch_count(conn: &mut PgConnection, q: QueryBuf) -> Result<u64, StoreError> {
    use sqlx::Row;
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bound(&q).fetch_one(conn).await?;
    let n: i64 = row.try_get("count")?;
    Ok(n.max(0) as u64)
}

async fn execute(conn: &mut PgConnection, q: QueryBuf) -> Result<u64, StoreError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    Ok(bound(&q).execute(conn).await?.rows_affected())
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn select(&self, q: &Select) -> Result<Vec<Record>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, render_select(q)).await
    }

    async fn count(&self, q: &Select) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_count(&mut conn, render_count(q)).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select(&mut self, q: &Select) -> Result<Vec<Record>, StoreError> {
        fetch(&mut self.tx, render_select(q)).await
    }

    async fn count(&mut self, q: &Select) -> Result<u64, StoreError> {
        fetch_count(&mut self.tx, render_count(q)).await
    }

    async fn insert(&mut self, q: &Insert) -> Result<u64, StoreError> {
        execute(&mut self.tx, render_insert(q)).await
    }

    async fn update(&mut self, q: &Update) -> Result<u64, StoreError> {
        execute(&mut self.tx, render_update(q)).await
    }

    async fn delete(&mut self, q: &Delete) -> Result<u64, StoreError> {
        execute(&mut self.tx, render_delete(q)).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::Column;
    use sqlx::Row;
    let mut rec = Record::new();
    for col in row.columns() {
        let name = col.name();
        rec.insert(name.to_string(), cell_to_value(row, name));
    }
    rec
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
