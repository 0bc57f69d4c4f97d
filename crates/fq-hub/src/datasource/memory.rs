//! # In-Memory Document Store
//!
//! A [`DocumentStore`] over collections held in memory, seeded from a JSON
//! file shaped `{ "collection": [ { ...document... }, ... ] }`. It follows
//! Firestore's query semantics where they are observable:
//!
//! - a condition on a field the document lacks never matches (`!=` and
//!   `not-in` included);
//! - ordering on a field excludes documents that lack it;
//! - values of different types order by type first
//!   (null < bool < number < string < array < object);
//! - `limit` applies after ordering, and `isCount` counts what remains.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use fq_core::{Condition, Direction, QueryModel, StructuredQuery};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::frame::{Frame, FrameBuilder};
use super::parser;
use super::{ConnectionContext, DocumentStore, ExecError, ExecResult};

pub type Document = Map<String, Value>;

pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a store from `{ "collection": [documents] }`.
    pub fn from_json(seed: Value) -> Result<Self, String> {
        let Value::Object(seed) = seed else {
            return Err("seed data must be an object of collections".into());
        };

        let mut collections = BTreeMap::new();
        for (name, docs) in seed {
            let Value::Array(docs) = docs else {
                return Err(format!("collection '{}' must be an array", name));
            };
            let docs = docs
                .into_iter()
                .map(|doc| match doc {
                    Value::Object(map) => Ok(map),
                    _ => Err(format!("collection '{}' holds a non-object document", name)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            collections.insert(name, docs);
        }

        Ok(Self {
            collections: RwLock::new(collections),
        })
    }

    pub async fn load(path: &Path) -> Result<Self, String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("reading {}: {}", path.display(), e))?;
        let seed: Value = serde_json::from_str(&content)
            .map_err(|e| format!("parsing {}: {}", path.display(), e))?;
        Self::from_json(seed)
    }

    async fn run_structured(&self, query: &StructuredQuery) -> ExecResult<Vec<Frame>> {
        if query.collection_path.trim().is_empty() {
            return Ok(Vec::new());
        }

        let filters = query
            .conditions
            .iter()
            .map(Filter::compile)
            .collect::<ExecResult<Vec<_>>>()?;

        let collections = self.collections.read().await;
        let docs = collections
            .get(query.collection_path.trim_matches('/'))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut rows: Vec<&Document> = docs
            .iter()
            .filter(|doc| filters.iter().all(|f| f.matches(doc)))
            .filter(|doc| query.order_by.iter().all(|k| lookup(doc, &k.path).is_some()))
            .collect();

        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|key| {
                        let ord = compare_values(
                            lookup(a, &key.path).unwrap_or(&Value::Null),
                            lookup(b, &key.path).unwrap_or(&Value::Null),
                        );
                        match key.direction {
                            Direction::Ascending => ord,
                            Direction::Descending => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if query.limit > 0 {
            rows.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        }

        if query.is_count {
            return Ok(vec![Frame::count(rows.len())]);
        }

        let mut builder = FrameBuilder::new("response");
        for doc in rows {
            if query.select.is_empty() {
                builder.push_row(doc);
            } else {
                let projected: Document = query
                    .select
                    .iter()
                    .filter_map(|path| lookup(doc, path).map(|v| (path.clone(), v.clone())))
                    .collect();
                builder.push_row(&projected);
            }
        }
        Ok(vec![builder.finish()])
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn execute(&self, _ctx: &ConnectionContext, query: &QueryModel) -> ExecResult<Vec<Frame>> {
        match query {
            QueryModel::Structured(q) => self.run_structured(q).await,
            QueryModel::FreeForm(q) => {
                if q.query_text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let parsed = parser::parse(&q.query_text).map_err(ExecError::BadQuery)?;
                tracing::debug!(collection = %parsed.collection_path, "Parsed free-form query");
                self.run_structured(&parsed).await
            }
        }
    }

    async fn collections(&self, _ctx: &ConnectionContext) -> ExecResult<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }
}

// =============================================================================
// Filters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
}

struct Filter<'a> {
    path: &'a str,
    op: Op,
    value: Value,
}

impl<'a> Filter<'a> {
    fn compile(cond: &'a Condition) -> ExecResult<Self> {
        let op = match cond.operator.trim() {
            "==" | "=" => Op::Eq,
            "!=" => Op::Neq,
            "<" => Op::Lt,
            "<=" => Op::Lte,
            ">" => Op::Gt,
            ">=" => Op::Gte,
            "in" => Op::In,
            "not-in" => Op::NotIn,
            "array-contains" => Op::ArrayContains,
            "array-contains-any" => Op::ArrayContainsAny,
            other => {
                return Err(ExecError::BadQuery(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        };

        let value = parse_literal(&cond.value);
        if matches!(op, Op::In | Op::NotIn | Op::ArrayContainsAny) && !value.is_array() {
            return Err(ExecError::BadQuery(format!(
                "operator '{}' needs a list value, got '{}'",
                cond.operator, cond.value
            )));
        }

        Ok(Self {
            path: &cond.path,
            op,
            value,
        })
    }

    fn matches(&self, doc: &Document) -> bool {
        let Some(field) = lookup(doc, self.path) else {
            return false;
        };
        let target = &self.value;

        match self.op {
            Op::Eq => values_equal(field, target),
            Op::Neq => !values_equal(field, target),
            Op::Lt => ordered(field, target) == Some(Ordering::Less),
            Op::Lte => matches!(ordered(field, target), Some(Ordering::Less | Ordering::Equal)),
            Op::Gt => ordered(field, target) == Some(Ordering::Greater),
            Op::Gte => matches!(
                ordered(field, target),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Op::In => list(target).iter().any(|v| values_equal(field, v)),
            Op::NotIn => !list(target).iter().any(|v| values_equal(field, v)),
            Op::ArrayContains => list(field).iter().any(|v| values_equal(v, target)),
            Op::ArrayContainsAny => list(field)
                .iter()
                .any(|v| list(target).iter().any(|t| values_equal(v, t))),
        }
    }
}

/// Resolve a field path: an exact key first, then a dotted walk into maps.
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(path) {
        return Some(v);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Interpret a condition value carried as text.
fn parse_literal(s: &str) -> Value {
    let s = s.trim();
    if s.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Value>(s) {
            return v;
        }
    }
    // Only canonical numbers; `007` stays text and still compares numerically.
    let number = s
        .parse::<i64>()
        .map(Value::from)
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|n| serde_json::json!(n)))
        .filter(|n| n.to_string() == s);
    if let Some(n) = number {
        n
    } else if s == "true" {
        Value::Bool(true)
    } else if s == "false" {
        Value::Bool(false)
    } else if s == "null" {
        Value::Null
    } else {
        Value::String(s.to_string())
    }
}

fn list(v: &Value) -> &[Value] {
    v.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// Equality between a document value `field` and a query literal `target`.
///
/// A text field matches a number or bool literal only by its exact text, so
/// `"007"` does not equal `7`. A quoted number in the literal still matches a
/// numeric field.
fn values_equal(field: &Value, target: &Value) -> bool {
    match (field, target) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::Number(_) | Value::Bool(_)) => *x == target.to_string(),
        (Value::Number(n), Value::String(x)) => x.trim().parse::<f64>().ok() == n.as_f64(),
        (Value::Bool(v), Value::String(x)) => *x == v.to_string(),
        _ => field == target,
    }
}

/// Ordering between values of the same type, `None` across types.
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::Number(n)) => x.parse::<f64>().ok()?.partial_cmp(&n.as_f64()?),
        (Value::Number(n), Value::String(y)) => n.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        _ => None,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used by ORDER BY.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match type_rank(a).cmp(&type_rank(b)) {
        Ordering::Equal => ordered(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())),
        other => other,
    }
}
