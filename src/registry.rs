//! Entity registry: maps an entity name to the runtime shape of a registered type.
//!
//! Concrete entities implement [`Entity`]; the registry erases them into an [`EntityShape`]
//! so the CRUD engine can work over records (JSON objects) whose layout is only known at
//! registration time.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock};

/// Name of the password-shaped field the engine hashes and masks.
pub const PASSWORD_FIELD: &str = "password";

/// Masking sentinel: returned in place of stored passwords; on save it means "unchanged".
pub const PASSWORD_MASK: &str = "***";

/// One runtime record: a JSON object keyed by column name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Record(Map::new())
    }

    /// Build from a JSON value; anything other than an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            _ => Err(EngineError::Validation("record must be a JSON object".into())),
        }
    }

    /// Serialize a typed value (usually an [`Entity`]) into a record.
    pub fn from_entity<T: Serialize>(item: &T) -> Result<Self, EngineError> {
        Self::from_value(serde_json::to_value(item)?)
    }

    /// Deserialize into a typed value.
    pub fn to_entity<T: serde::de::DeserializeOwned>(&self) -> Result<T, EngineError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Field as text: strings as-is, numbers and booleans rendered, null/missing as None.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Deref for Record {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Record {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        r.into_value()
    }
}

/// Storage kind of a field; drives parameter casts in SQL and comparisons in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Timestamp,
    Json,
}

impl FieldKind {
    /// PostgreSQL cast applied to bound text parameters (None for plain text).
    pub fn pg_cast(self) -> Option<&'static str> {
        match self {
            FieldKind::Text => None,
            FieldKind::Integer => Some("bigint"),
            FieldKind::Decimal => Some("numeric"),
            FieldKind::Boolean => Some("boolean"),
            FieldKind::Timestamp => Some("timestamptz"),
            FieldKind::Json => Some("jsonb"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// False for fields that are only filled by joins or hooks and never written.
    pub persisted: bool,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Field { name, kind, persisted: true }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub const fn int(name: &'static str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub const fn decimal(name: &'static str) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub const fn json(name: &'static str) -> Self {
        Self::new(name, FieldKind::Json)
    }

    /// Mark as not stored on the entity's own table.
    pub const fn computed(self) -> Self {
        Field { persisted: false, ..self }
    }
}

/// `LEFT JOIN table AS alias ON alias.foreign_key = main.local_key`, projecting `columns`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinSpec {
    pub table: &'static str,
    pub alias: &'static str,
    pub local_key: &'static str,
    pub foreign_key: &'static str,
    pub columns: &'static [&'static str],
}

/// Per-entity read augmentation: extra joined columns and filter keys that must not reach
/// the query. Filter keys naming a joined column are qualified to that join.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryShape {
    pub joins: Vec<JoinSpec>,
    pub drop_filter_keys: Vec<&'static str>,
}

impl QueryShape {
    /// Join that supplies `column`, if any.
    pub fn join_for(&self, column: &str) -> Option<&JoinSpec> {
        self.joins.iter().find(|j| j.columns.iter().any(|c| *c == column))
    }
}

/// Capability contract for a concrete entity type.
pub trait Entity: Default + Serialize + Send + Sync + 'static {
    fn table_name() -> &'static str;

    fn fields() -> &'static [Field];

    fn primary_key() -> &'static str {
        "id"
    }

    fn has_password() -> bool {
        Self::fields().iter().any(|f| f.name == PASSWORD_FIELD)
    }

    fn query_shape() -> QueryShape {
        QueryShape::default()
    }
}

/// Type-erased metadata of a registered entity.
#[derive(Clone, Debug)]
pub struct EntityShape {
    pub name: String,
    pub table: &'static str,
    pub fields: &'static [Field],
    pub primary_key: &'static str,
    pub has_password: bool,
    pub query_shape: QueryShape,
    zero: Record,
}

impl EntityShape {
    fn of<T: Entity>(name: &str) -> Result<Self, EngineError> {
        let mut zero = Record::from_entity(&T::default())?;
        for f in T::fields() {
            zero.entry(f.name.to_string()).or_insert(Value::Null);
        }
        Ok(EntityShape {
            name: name.to_string(),
            table: T::table_name(),
            fields: T::fields(),
            primary_key: T::primary_key(),
            has_password: T::has_password(),
            query_shape: T::query_shape(),
            zero,
        })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn persisted_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.persisted)
    }

    /// Zero-valued record of this type.
    pub fn zero_value(&self) -> Record {
        self.zero.clone()
    }

    /// Fill a stored row out to the full shape (zero values for absent fields).
    pub fn hydrate(&self, row: Record) -> Record {
        let mut out = self.zero_value();
        for (k, v) in row.0 {
            out.insert(k, v);
        }
        out
    }

    /// Fresh zero-valued record with every field of `form` this type also declares.
    pub fn copy_compatible(&self, form: &Record) -> Record {
        let mut out = self.zero_value();
        for f in self.fields {
            if let Some(v) = form.get(f.name) {
                out.insert(f.name.to_string(), v.clone());
            }
        }
        out
    }
}

/// Name → shape map. Populated at boot, read concurrently afterwards; late registration
/// is still guarded.
#[derive(Default)]
pub struct EntityRegistry {
    types: RwLock<HashMap<String, Arc<EntityShape>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`. The first registration wins; later ones are ignored and
    /// return `Ok(false)`.
    pub fn register<T: Entity>(&self, name: &str) -> Result<bool, EngineError> {
        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        if types.contains_key(name) {
            tracing::debug!(entity = name, "already registered, ignoring");
            return Ok(false);
        }
        let shape = EntityShape::of::<T>(name)?;
        types.insert(name.to_string(), Arc::new(shape));
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn shape(&self, name: &str) -> Result<Arc<EntityShape>, EngineError> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownType(name.to_string()))
    }

    /// Zero-valued instance of the named type.
    pub fn new_value(&self, name: &str) -> Result<Record, EngineError> {
        Ok(self.shape(name)?.zero_value())
    }

    /// Empty collection of the named type.
    pub fn new_slice(&self, name: &str) -> Result<Vec<Record>, EngineError> {
        self.shape(name)?;
        Ok(Vec::new())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Serialize)]
    struct Street {
        id: String,
        site_id: String,
        name: String,
    }

    impl Entity for Street {
        fn table_name() -> &'static str {
            "street"
        }

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[Field::text("id"), Field::text("site_id"), Field::text("name")];
            FIELDS
        }
    }

    #[derive(Default, Serialize)]
    struct Lane {
        id: i64,
    }

    impl Entity for Lane {
        fn table_name() -> &'static str {
            "lane"
        }

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[Field::int("id")];
            FIELDS
        }
    }

    #[test]
    fn unknown_names_fail_every_lookup() {
        let reg = EntityRegistry::new();
        assert!(matches!(reg.shape("Street"), Err(EngineError::UnknownType(n)) if n == "Street"));
        assert!(matches!(reg.new_value("Street"), Err(EngineError::UnknownType(_))));
        assert!(matches!(reg.new_slice("Street"), Err(EngineError::UnknownType(_))));
    }

    #[test]
    fn first_registration_wins() {
        let reg = EntityRegistry::new();
        assert!(reg.register::<Street>("Street").unwrap());
        assert!(!reg.register::<Lane>("Street").unwrap());
        let shape = reg.shape("Street").unwrap();
        assert_eq!(shape.table, "street");
        assert!(!shape.has_password);
    }

    #[test]
    fn new_value_is_zero_valued() {
        let reg = EntityRegistry::new();
        reg.register::<Street>("Street").unwrap();
        let v = reg.new_value("Street").unwrap();
        assert_eq!(v.get("name"), Some(&Value::String(String::new())));
        assert!(reg.new_slice("Street").unwrap().is_empty());
    }

    #[test]
    fn copy_compatible_drops_foreign_keys() {
        let reg = EntityRegistry::new();
        reg.register::<Street>("Street").unwrap();
        let shape = reg.shape("Street").unwrap();
        let mut form = Record::new();
        form.insert("name".into(), "Palm Avenue".into());
        form.insert("colour".into(), "green".into());
        let rec = shape.copy_compatible(&form);
        assert_eq!(rec.text("name").as_deref(), Some("Palm Avenue"));
        assert!(!rec.contains_key("colour"));
        assert_eq!(rec.text("id").as_deref(), Some(""));
    }
}
