//! Renders storage commands as parameterized PostgreSQL statements.
//!
//! Identifiers come from entity registrations only and are always quoted; every value is
//! bound as a text parameter and cast to the column's type on the server.

use super::params::to_param;
use crate::filter::Op;
use crate::registry::FieldKind;
use crate::store::{Column, Cond, Delete, Insert, Select, Target, Update, Where};

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `schema.table` or `table`, each part quoted.
fn qualified_table(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quoted(schema), quoted(name)),
        None => quoted(table),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl QueryBuf {
    fn push_param(&mut self, v: Option<String>) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Bind `v` and return its placeholder, cast for non-text kinds.
    fn placeholder(&mut self, v: Option<String>, kind: FieldKind) -> String {
        let n = self.push_param(v);
        match kind.pg_cast() {
            Some(cast) => format!("${}::{}", n, cast),
            None => format!("${}", n),
        }
    }
}

fn column_ref(c: &Column) -> String {
    format!("{}.{}", quoted(c.table.as_deref().unwrap_or(MAIN_ALIAS)), quoted(&c.name))
}

/// Projection: decimals come back as text so they survive the round trip exactly.
fn projection(c: &Column) -> String {
    let expr = column_ref(c);
    let expr = if c.kind == FieldKind::Decimal {
        format!("{}::text", expr)
    } else {
        expr
    };
    format!("{} AS {}", expr, quoted(&c.name))
}

fn target_expr(q: &mut QueryBuf, t: &Target) -> String {
    match t {
        Target::Column(c) => column_ref(c),
        Target::JsonKey { column, key } => {
            let n = q.push_param(Some(key.clone()));
            format!("{}.{} ->> ${}", quoted(MAIN_ALIAS), quoted(column), n)
        }
    }
}

fn condition(q: &mut QueryBuf, c: &Cond) -> String {
    let lhs = target_expr(q, &c.target);
    if c.op == Op::ILike {
        let ph = q.placeholder(Some(c.value.clone()), FieldKind::Text);
        return format!("{}::text ILIKE {}", lhs, ph);
    }
    let kind = match &c.target {
        Target::Column(col) => col.kind,
        Target::JsonKey { .. } => FieldKind::Text,
    };
    let ph = q.placeholder(Some(c.value.clone()), kind);
    format!("{} {} {}", lhs, c.op.sql(), ph)
}

fn from_clause(s: &Select) -> String {
    let mut out = format!("{} {}", qualified_table(&s.table), quoted(MAIN_ALIAS));
    for j in &s.joins {
        out.push_str(&format!(
            " LEFT JOIN {} {} ON {}.{} = {}.{}",
            qualified_table(&j.table),
            quoted(&j.alias),
            quoted(&j.alias),
            quoted(&j.foreign_key),
            quoted(MAIN_ALIAS),
            quoted(&j.local_key)
        ));
    }
    out
}

fn where_clause(q: &mut QueryBuf, wheres: &[Where]) -> String {
    let mut parts = Vec::new();
    for w in wheres {
        match w {
            Where::Match(c) => parts.push(condition(q, c)),
            Where::AnyOf(cs) if cs.is_empty() => parts.push("FALSE".to_string()),
            Where::AnyOf(cs) => {
                let alts: Vec<String> = cs.iter().map(|c| condition(q, c)).collect();
                parts.push(format!("({})", alts.join(" OR ")));
            }
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

pub fn render_select(s: &Select) -> QueryBuf {
    let mut q = QueryBuf::default();
    let cols: Vec<String> = s.columns.iter().map(projection).collect();
    let where_sql = where_clause(&mut q, &s.wheres);
    let order_sql = if s.order.is_empty() {
        String::new()
    } else {
        let keys: Vec<String> = s.order.iter().map(|t| format!("{} ASC", target_expr(&mut q, t))).collect();
        format!(" ORDER BY {}", keys.join(", "))
    };
    let limit_sql = s.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = s.offset.filter(|n| *n > 0).map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        cols.join(", "),
        from_clause(s),
        where_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    q
}

/// COUNT(*) over the same rows, ignoring order and paging.
pub fn render_count(s: &Select) -> QueryBuf {
    let mut q = QueryBuf::default();
    let where_sql = where_clause(&mut q, &s.wheres);
    q.sql = format!("SELECT COUNT(*) AS \"count\" FROM {}{}", from_clause(s), where_sql);
    q
}

pub fn render_insert(i: &Insert) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut cols = Vec::with_capacity(i.values.len());
    let mut placeholders = Vec::with_capacity(i.values.len());
    for (c, v) in &i.values {
        cols.push(quoted(&c.name));
        placeholders.push(q.placeholder(to_param(v, c.kind), c.kind));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table(&i.table),
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

pub fn render_update(u: &Update) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut sets = Vec::with_capacity(u.values.len());
    for (c, v) in &u.values {
        let ph = q.placeholder(to_param(v, c.kind), c.kind);
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    let (key, id) = &u.key;
    let id_ph = q.placeholder(to_param(id, key.kind), key.kind);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        qualified_table(&u.table),
        sets.join(", "),
        quoted(&key.name),
        id_ph
    );
    q
}

pub fn render_delete(d: &Delete) -> QueryBuf {
    let mut q = QueryBuf::default();
    let (key, id) = &d.key;
    let id_ph = q.placeholder(to_param(id, key.kind), key.kind);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        qualified_table(&d.table),
        quoted(&key.name),
        id_ph
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Join;
    use serde_json::json;

    fn col(name: &str, kind: FieldKind) -> Column {
        Column::new(name, kind)
    }

    #[test]
    fn select_with_join_conditions_and_paging() {
        let mut s = Select::new(
            "estate.resident",
            vec![
                col("id", FieldKind::Text),
                col("balance", FieldKind::Decimal),
                Column::joined("rs", "site_id", FieldKind::Text),
            ],
        );
        s.joins.push(Join {
            table: "residency".into(),
            alias: "rs".into(),
            local_key: "residency_id".into(),
            foreign_key: "id".into(),
        });
        s.wheres.push(Where::Match(Cond {
            target: Target::Column(col("age", FieldKind::Integer)),
            op: Op::Ge,
            value: "18".into(),
        }));
        s.wheres.push(Where::AnyOf(vec![
            Cond {
                target: Target::Column(col("name", FieldKind::Text)),
                op: Op::Eq,
                value: "a".into(),
            },
            Cond {
                target: Target::Column(col("name", FieldKind::Text)),
                op: Op::ILike,
                value: "b%".into(),
            },
        ]));
        s.order.push(Target::Column(col("name", FieldKind::Text)));
        s.limit = Some(5);
        s.offset = Some(10);
        let q = render_select(&s);
        assert_eq!(
            q.sql,
            "SELECT \"main\".\"id\" AS \"id\", \"main\".\"balance\"::text AS \"balance\", \"rs\".\"site_id\" AS \"site_id\" \
             FROM \"estate\".\"resident\" \"main\" LEFT JOIN \"residency\" \"rs\" ON \"rs\".\"id\" = \"main\".\"residency_id\" \
             WHERE \"main\".\"age\" >= $1::bigint AND (\"main\".\"name\" = $2 OR \"main\".\"name\"::text ILIKE $3) \
             ORDER BY \"main\".\"name\" ASC LIMIT 5 OFFSET 10"
        );
        assert_eq!(q.params, vec![Some("18".into()), Some("a".into()), Some("b%".into())]);
    }

    #[test]
    fn json_key_is_bound_not_inlined() {
        let mut s = Select::new("resource", vec![col("id", FieldKind::Text)]);
        s.wheres.push(Where::Match(Cond {
            target: Target::JsonKey {
                column: "data".into(),
                key: "o'brien".into(),
            },
            op: Op::Eq,
            value: "x".into(),
        }));
        let q = render_count(&s);
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"resource\" \"main\" WHERE \"main\".\"data\" ->> $1 = $2"
        );
        assert_eq!(q.params, vec![Some("o'brien".into()), Some("x".into())]);
    }

    #[test]
    fn writes_cast_typed_columns() {
        let id = col("id", FieldKind::Text);
        let q = render_insert(&Insert {
            table: "due".into(),
            key: id.clone(),
            values: vec![
                (id.clone(), json!("d1")),
                (col("amount", FieldKind::Decimal), json!(12.5)),
                (col("paid", FieldKind::Boolean), json!(false)),
                (col("note", FieldKind::Text), json!(null)),
            ],
        });
        assert_eq!(
            q.sql,
            "INSERT INTO \"due\" (\"id\", \"amount\", \"paid\", \"note\") VALUES ($1, $2::numeric, $3::boolean, $4)"
        );
        assert_eq!(q.params, vec![Some("d1".into()), Some("12.5".into()), Some("false".into()), None]);

        let q = render_update(&Update {
            table: "due".into(),
            key: (id.clone(), json!("d1")),
            values: vec![(col("paid", FieldKind::Boolean), json!(true))],
        });
        assert_eq!(q.sql, "UPDATE \"due\" SET \"paid\" = $1::boolean WHERE \"id\" = $2");

        let q = render_delete(&Delete {
            table: "due".into(),
            key: (id, json!("d1")),
        });
        assert_eq!(q.sql, "DELETE FROM \"due\" WHERE \"id\" = $1");
        assert_eq!(q.params, vec![Some("d1".into())]);
    }
}
