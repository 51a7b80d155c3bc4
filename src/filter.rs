//! Filter directive language: `key:value(,key:value)*`.
//!
//! Keys starting with `$` are directives (`$order`, `$limit`, `$offset`); every other key
//! names a field. Values may carry a comparison prefix (`>`, `>=`, `<`, `<=`) or a leading
//! or trailing `%` for a case-insensitive pattern, in which `__` stands for a literal comma.
//! A key given more than once matches any of its values.

use crate::error::EngineError;

pub const ORDER: &str = "$order";
pub const LIMIT: &str = "$limit";
pub const OFFSET: &str = "$offset";

/// Default separator between pairs.
pub const PAIR_SEP: &str = ",";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn first(&self) -> &str {
        match self {
            FilterValue::One(v) => v,
            FilterValue::Many(vs) => vs.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            FilterValue::One(v) => vec![v.as_str()],
            FilterValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Insertion-ordered option map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOptions {
    entries: Vec<(String, FilterValue)>,
}

impl FilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `s` with pair separator `sep`.
    pub fn parse(s: &str, sep: &str) -> Self {
        let mut opts = Self::new();
        opts.split(s, sep);
        opts
    }

    /// Add every `key:value` pair of `s`. Parts without a `:` are skipped; the value is
    /// everything after the first `:`.
    pub fn split(&mut self, s: &str, sep: &str) {
        for part in s.split(sep) {
            if let Some((key, value)) = part.split_once(':') {
                self.push(key, value);
            }
        }
    }

    /// Append a value. A repeated key turns into an ordered list.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => match existing {
                FilterValue::Many(vs) => vs.push(value),
                FilterValue::One(first) => {
                    let first = std::mem::take(first);
                    *existing = FilterValue::Many(vec![first, value]);
                }
            },
            None => self.entries.push((key, FilterValue::One(value))),
        }
    }

    /// Replace any value under `key`, keeping its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = FilterValue::One(value.into());
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<FilterValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// First value under `key`.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.get(key).map(FilterValue::first)
    }

    /// First value under `key` as an integer; missing or malformed is zero.
    pub fn int(&self, key: &str) -> i64 {
        self.string(key).and_then(|v| v.trim().parse().ok()).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every key is a directive.
    pub fn only_directives(&self) -> bool {
        self.entries.iter().all(|(k, _)| is_directive(k))
    }
}

pub fn is_directive(key: &str) -> bool {
    key.starts_with('$')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    /// Case-insensitive SQL LIKE pattern.
    ILike,
}

impl Op {
    pub fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::ILike => "ILIKE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    pub field: String,
    pub op: Op,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    Match(Predicate),
    /// One key given several values: any of them may match.
    AnyOf(Vec<Predicate>),
}

impl Condition {
    pub fn predicates(&self) -> &[Predicate] {
        match self {
            Condition::Match(p) => std::slice::from_ref(p),
            Condition::AnyOf(ps) => ps,
        }
    }

    pub fn predicates_mut(&mut self) -> &mut [Predicate] {
        match self {
            Condition::Match(p) => std::slice::from_mut(p),
            Condition::AnyOf(ps) => ps,
        }
    }
}

/// Filter compiled to storage-neutral predicates and paging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledFilter {
    pub conditions: Vec<Condition>,
    /// Ascending sort keys, in order.
    pub order: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Compile options in insertion order.
pub fn compile(opts: &FilterOptions) -> Result<CompiledFilter, EngineError> {
    let mut out = CompiledFilter::default();
    for (key, value) in opts.iter() {
        match key {
            ORDER => {
                for v in value.values() {
                    out.order
                        .extend(v.split('$').map(str::trim).filter(|c| !c.is_empty()).map(String::from));
                }
            }
            LIMIT => {
                for v in value.values() {
                    match v.trim().parse::<i64>() {
                        Ok(n) if n > 0 => out.limit = Some(n as u64),
                        _ => {}
                    }
                }
            }
            OFFSET => {
                for v in value.values() {
                    out.offset = Some(v.trim().parse::<i64>().unwrap_or(0).max(0) as u64);
                }
            }
            k if is_directive(k) => {
                return Err(EngineError::Validation(format!("unknown directive: {}", k)));
            }
            field => {
                let mut preds = value
                    .values()
                    .into_iter()
                    .map(|v| predicate(field, v))
                    .collect::<Result<Vec<_>, _>>()?;
                let cond = if preds.len() == 1 {
                    Condition::Match(preds.remove(0))
                } else {
                    Condition::AnyOf(preds)
                };
                out.conditions.push(cond);
            }
        }
    }
    Ok(out)
}

fn predicate(field: &str, raw: &str) -> Result<Predicate, EngineError> {
    if raw.is_empty() {
        return Err(EngineError::Validation(format!("empty filter value for {}", field)));
    }
    let (op, value) = if let Some(rest) = raw.strip_prefix(">=") {
        (Op::Ge, rest.to_string())
    } else if let Some(rest) = raw.strip_prefix("<=") {
        (Op::Le, rest.to_string())
    } else if let Some(rest) = raw.strip_prefix('>') {
        (Op::Gt, rest.to_string())
    } else if let Some(rest) = raw.strip_prefix('<') {
        (Op::Lt, rest.to_string())
    } else if raw.starts_with('%') || raw.ends_with('%') {
        (Op::ILike, raw.replace("__", ","))
    } else {
        (Op::Eq, raw.to_string())
    };
    if value.is_empty() {
        return Err(EngineError::Validation(format!(
            "missing operand after {} for {}",
            op.sql(),
            field
        )));
    }
    Ok(Predicate {
        field: field.to_string(),
        op,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(opts: &str) -> Predicate {
        let c = compile(&FilterOptions::parse(opts, PAIR_SEP)).unwrap();
        match c.conditions.into_iter().next() {
            Some(Condition::Match(p)) => p,
            other => panic!("expected single predicate, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_keys_collapse_in_order() {
        let opts = FilterOptions::parse("a:1,a:2,b:3", ",");
        assert_eq!(opts.get("a"), Some(&FilterValue::Many(vec!["1".into(), "2".into()])));
        assert_eq!(opts.get("b"), Some(&FilterValue::One("3".into())));
        let keys: Vec<&str> = opts.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn pairs_without_colon_are_skipped_and_values_keep_colons() {
        let opts = FilterOptions::parse("junk,time:10:30", ",");
        assert_eq!(opts.len(), 1);
        assert_eq!(opts.string("time"), Some("10:30"));
    }

    #[test]
    fn set_replaces_and_keeps_position() {
        let mut opts = FilterOptions::parse("$limit:20,name:x", ",");
        opts.set("$limit", "1");
        assert_eq!(opts.int("$limit"), 1);
        assert_eq!(opts.iter().next().map(|(k, _)| k), Some("$limit"));
    }

    #[test]
    fn comparison_prefixes() {
        assert_eq!(single("age:>=21").op, Op::Ge);
        assert_eq!(single("age:>=21").value, "21");
        assert_eq!(single("age:<=21").op, Op::Le);
        assert_eq!(single("age:>21").op, Op::Gt);
        assert_eq!(single("age:<21").op, Op::Lt);
        assert_eq!(single("age:21").op, Op::Eq);
    }

    #[test]
    fn like_pattern_unescapes_commas() {
        let p = single("name:%smith__jr%");
        assert_eq!(p.op, Op::ILike);
        assert_eq!(p.value, "%smith,jr%");
        assert_eq!(single("name:ada%").op, Op::ILike);
    }

    #[test]
    fn repeated_key_becomes_any_of() {
        let c = compile(&FilterOptions::parse("status:1,status:2", ",")).unwrap();
        assert_eq!(c.conditions.len(), 1);
        assert!(matches!(&c.conditions[0], Condition::AnyOf(ps) if ps.len() == 2));
    }

    #[test]
    fn directives_never_become_predicates() {
        let c = compile(&FilterOptions::parse("$order:name$age,$limit:5,$offset:0", ",")).unwrap();
        assert!(c.conditions.is_empty());
        assert_eq!(c.order, vec!["name", "age"]);
        assert_eq!(c.limit, Some(5));
        assert_eq!(c.offset, Some(0));
    }

    #[test]
    fn bad_limit_is_ignored_bad_offset_is_zero() {
        let c = compile(&FilterOptions::parse("$limit:0,$offset:x", ",")).unwrap();
        assert_eq!(c.limit, None);
        assert_eq!(c.offset, Some(0));
        let c = compile(&FilterOptions::parse("$limit:-3", ",")).unwrap();
        assert_eq!(c.limit, None);
    }

    #[test]
    fn empty_values_are_validation_errors() {
        assert!(matches!(
            compile(&FilterOptions::parse("name:", ",")),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            compile(&FilterOptions::parse("age:>=", ",")),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn unknown_directive_rejected() {
        assert!(matches!(
            compile(&FilterOptions::parse("$group:name", ",")),
            Err(EngineError::Validation(_))
        ));
    }
}
