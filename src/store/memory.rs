//! In-process store: tables of records behind a mutex, snapshot transactions, and a write
//! journal. Used by the test suites and for running the engine without PostgreSQL.

use super::{value_text, Cond, Delete, Insert, Select, Store, Target, Transaction, Update, Where};
use crate::error::StoreError;
use crate::filter::Op;
use crate::registry::{FieldKind, Record};
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A committed write, recorded in commit order.
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Insert { table: String, key: Value },
    Update { table: String, key: Value, columns: Vec<String> },
    Delete { table: String, key: Value },
}

type Tables = HashMap<String, Vec<Record>>;

#[derive(Default)]
struct State {
    tables: Tables,
    journal: Vec<Write>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert rows directly, bypassing transactions and the journal.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Record>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Committed writes since creation (or the last [`clear_journal`](Self::clear_journal)).
    pub fn journal(&self) -> Vec<Write> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tables = self.lock().tables.clone();
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            tables,
            pending: Vec::new(),
            journal: Vec::new(),
        }))
    }

    async fn select(&self, q: &Select) -> Result<Vec<Record>, StoreError> {
        let state = self.lock();
        run_select(&state.tables, q)
    }

    async fn count(&self, q: &Select) -> Result<u64, StoreError> {
        let state = self.lock();
        Ok(matching(&state.tables, q)?.len() as u64)
    }
}

/// A row-level write held by a transaction until commit.
enum Pending {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Pending {
    fn table(&self) -> &str {
        match self {
            Pending::Insert(q) => &q.table,
            Pending::Update(q) => &q.table,
            Pending::Delete(q) => &q.table,
        }
    }

    fn apply(&self, tables: &mut Tables) -> Result<u64, StoreError> {
        match self {
            Pending::Insert(q) => apply_insert(tables, q),
            Pending::Update(q) => Ok(apply_update(tables, q)),
            Pending::Delete(q) => Ok(apply_delete(tables, q)),
        }
    }
}

/// Reads see a private copy of the tables taken at `begin` plus this transaction's own
/// writes. Commit replays the writes, in order, against the live tables; if any replay
/// fails nothing is published.
pub struct MemoryTransaction {
    store: MemoryStore,
    tables: Tables,
    pending: Vec<Pending>,
    journal: Vec<Write>,
}

impl MemoryTransaction {
    fn record(&mut self, op: Pending) -> Result<u64, StoreError> {
        let n = op.apply(&mut self.tables)?;
        self.pending.push(op);
        Ok(n)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select(&mut self, q: &Select) -> Result<Vec<Record>, StoreError> {
        run_select(&self.tables, q)
    }

    async fn count(&mut self, q: &Select) -> Result<u64, StoreError> {
        Ok(matching(&self.tables, q)?.len() as u64)
    }

    async fn insert(&mut self, q: &Insert) -> Result<u64, StoreError> {
        let n = self.record(Pending::Insert(q.clone()))?;
        self.journal.push(Write::Insert {
            table: q.table.clone(),
            key: insert_key(q),
        });
        Ok(n)
    }

    async fn update(&mut self, q: &Update) -> Result<u64, StoreError> {
        let n = self.record(Pending::Update(q.clone()))?;
        self.journal.push(Write::Update {
            table: q.table.clone(),
            key: q.key.1.clone(),
            columns: q.values.iter().map(|(c, _)| c.name.clone()).collect(),
        });
        Ok(n)
    }

    async fn delete(&mut self, q: &Delete) -> Result<u64, StoreError> {
        let n = self.record(Pending::Delete(q.clone()))?;
        self.journal.push(Write::Delete {
            table: q.table.clone(),
            key: q.key.1.clone(),
        });
        Ok(n)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.store.lock();
        let mut staged = Tables::new();
        for op in &this.pending {
            if !staged.contains_key(op.table()) {
                let live = state.tables.get(op.table()).cloned().unwrap_or_default();
                staged.insert(op.table().to_string(), live);
            }
            op.apply(&mut staged)?;
        }
        state.tables.extend(staged);
        state.journal.extend(this.journal);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn insert_key(q: &Insert) -> Value {
    q.values
        .iter()
        .find(|(c, _)| c.name == q.key.name)
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Null)
}

fn apply_insert(tables: &mut Tables, q: &Insert) -> Result<u64, StoreError> {
    let key_text = value_text(&insert_key(q));
    let rows = tables.entry(q.table.clone()).or_default();
    if key_text.is_some() && rows.iter().any(|r| r.get(&q.key.name).and_then(value_text) == key_text) {
        return Err(StoreError::Backend(format!(
            "duplicate key value violates unique constraint on {}.{}",
            q.table, q.key.name
        )));
    }
    let mut row = Record::new();
    for (col, v) in &q.values {
        row.insert(col.name.clone(), v.clone());
    }
    rows.push(row);
    Ok(1)
}

fn apply_update(tables: &mut Tables, q: &Update) -> u64 {
    let key_text = value_text(&q.key.1);
    let mut n = 0;
    if let Some(rows) = tables.get_mut(&q.table) {
        for row in rows.iter_mut().filter(|r| r.get(&q.key.0.name).and_then(value_text) == key_text) {
            for (col, v) in &q.values {
                row.insert(col.name.clone(), v.clone());
            }
            n += 1;
        }
    }
    n
}

fn apply_delete(tables: &mut Tables, q: &Delete) -> u64 {
    let key_text = value_text(&q.key.1);
    match tables.get_mut(&q.table) {
        Some(rows) => {
            let before = rows.len();
            rows.retain(|r| r.get(&q.key.0.name).and_then(value_text) != key_text);
            (before - rows.len()) as u64
        }
        None => 0,
    }
}

/// A main-table row plus the rows its joins resolved to.
struct View<'a> {
    main: &'a Record,
    joined: HashMap<&'a str, Option<&'a Record>>,
}

impl<'a> View<'a> {
    fn lookup(&self, target: &Target) -> Option<Value> {
        match target {
            Target::Column(c) => match &c.table {
                None => self.main.get(&c.name).cloned(),
                Some(alias) => self
                    .joined
                    .get(alias.as_str())
                    .copied()
                    .flatten()
                    .and_then(|r| r.get(&c.name).cloned()),
            },
            Target::JsonKey { column, key } => self.main.get(column).and_then(|doc| doc.get(key)).cloned(),
        }
    }
}

fn matching<'a>(tables: &'a Tables, q: &'a Select) -> Result<Vec<View<'a>>, StoreError> {
    let rows: &[Record] = tables.get(&q.table).map(Vec::as_slice).unwrap_or(&[]);
    let mut out = Vec::new();
    for main in rows {
        let mut joined = HashMap::new();
        for j in &q.joins {
            let local = main.get(&j.local_key).and_then(value_text);
            let hit = tables.get(&j.table).and_then(|rs| {
                rs.iter()
                    .find(|r| local.is_some() && r.get(&j.foreign_key).and_then(value_text) == local)
            });
            joined.insert(j.alias.as_str(), hit);
        }
        let view = View { main, joined };
        let mut keep = true;
        for w in &q.wheres {
            let ok = match w {
                Where::Match(c) => eval(&view, c)?,
                Where::AnyOf(cs) => {
                    let mut any = false;
                    for c in cs {
                        if eval(&view, c)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
            };
            if !ok {
                keep = false;
                break;
            }
        }
        if keep {
            out.push(view);
        }
    }
    Ok(out)
}

fn run_select(tables: &Tables, q: &Select) -> Result<Vec<Record>, StoreError> {
    let mut views = matching(tables, q)?;
    if !q.order.is_empty() {
        views.sort_by(|a, b| {
            for key in &q.order {
                let ord = compare_values(a.lookup(key).as_ref(), b.lookup(key).as_ref());
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    let offset = q.offset.unwrap_or(0) as usize;
    let limit = q.limit.map(|n| n as usize).unwrap_or(usize::MAX);
    Ok(views
        .iter()
        .skip(offset)
        .take(limit)
        .map(|view| {
            let mut out = Record::new();
            for col in &q.columns {
                let v = view
                    .lookup(&Target::Column(col.clone()))
                    .unwrap_or(Value::Null);
                out.insert(col.name.clone(), v);
            }
            out
        })
        .collect())
}

fn eval(view: &View<'_>, c: &Cond) -> Result<bool, StoreError> {
    let Some(stored) = view.lookup(&c.target).as_ref().and_then(value_text) else {
        return Ok(false);
    };
    let kind = match &c.target {
        Target::Column(col) => col.kind,
        Target::JsonKey { .. } => FieldKind::Text,
    };
    if c.op == Op::ILike {
        return like(&stored, &c.value);
    }
    let ord = match kind {
        FieldKind::Boolean => match (stored.parse::<bool>(), c.value.parse::<bool>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => stored.cmp(&c.value),
        },
        _ => match (stored.parse::<f64>(), c.value.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => stored.as_str().cmp(c.value.as_str()),
        },
    };
    Ok(match c.op {
        Op::Eq => ord == Ordering::Equal,
        Op::Gt => ord == Ordering::Greater,
        Op::Ge => ord != Ordering::Less,
        Op::Lt => ord == Ordering::Less,
        Op::Le => ord != Ordering::Greater,
        Op::ILike => unreachable!("handled above"),
    })
}

/// SQL LIKE semantics, case-insensitive: `%` any run, `_` any single character.
fn like(text: &str, pattern: &str) -> Result<bool, StoreError> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    let re = RegexBuilder::new(&re)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| StoreError::Backend(format!("bad pattern: {}", e)))?;
    Ok(re.is_match(text))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.and_then(value_text);
    let b = b.and_then(value_text);
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.cmp(&b),
        },
    }
}
