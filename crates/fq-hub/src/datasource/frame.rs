//! # Data Frames
//!
//! Query results are returned column-wise. Documents in a collection do not
//! share a schema, so columns are discovered as rows arrive and each column's
//! type is decided by its first non-null value:
//!
//! | first value            | column kind | stored as                  |
//! |------------------------|-------------|----------------------------|
//! | boolean                | `bool`      | JSON bool                  |
//! | number                 | `number`    | JSON f64                   |
//! | RFC 3339 string        | `time`      | normalized RFC 3339 string |
//! | object / array         | `json`      | the JSON value itself      |
//! | anything else          | `string`    | string                     |
//!
//! Every column holds exactly one entry per row; a document without the
//! field, or with a value that does not fit the column, contributes `null`.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Number,
    Time,
    Json,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Frame {
    /// Single-cell frame holding a row count.
    pub fn count(n: usize) -> Self {
        Self {
            name: "response".into(),
            fields: vec![Field {
                name: "count".into(),
                kind: FieldKind::Number,
                values: vec![Value::from(n as f64)],
            }],
        }
    }

    pub fn row_count(&self) -> usize {
        self.fields.first().map_or(0, |f| f.values.len())
    }

    #[cfg(test)]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Accumulates documents into a [`Frame`].
pub struct FrameBuilder {
    name: String,
    columns: Vec<(String, Vec<Value>)>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl FrameBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            index: HashMap::new(),
            rows: 0,
        }
    }

    pub fn push_row(&mut self, row: &Map<String, Value>) {
        for (key, value) in row {
            let idx = match self.index.get(key) {
                Some(&idx) => idx,
                None => {
                    self.columns
                        .push((key.clone(), vec![Value::Null; self.rows]));
                    self.index.insert(key.clone(), self.columns.len() - 1);
                    self.columns.len() - 1
                }
            };
            self.columns[idx].1.push(value.clone());
        }
        self.rows += 1;
        for (_, values) in &mut self.columns {
            if values.len() < self.rows {
                values.push(Value::Null);
            }
        }
    }

    pub fn finish(self) -> Frame {
        let fields = self
            .columns
            .into_iter()
            .map(|(name, raw)| {
                let kind = raw
                    .iter()
                    .find(|v| !v.is_null())
                    .map_or(FieldKind::String, kind_of);
                let values = raw.into_iter().map(|v| coerce(kind, v)).collect();
                Field { name, kind, values }
            })
            .collect();
        Frame {
            name: self.name,
            fields,
        }
    }
}

fn kind_of(value: &Value) -> FieldKind {
    match value {
        Value::Bool(_) => FieldKind::Bool,
        Value::Number(_) => FieldKind::Number,
        Value::String(s) if parse_time(s).is_some() => FieldKind::Time,
        Value::Object(_) | Value::Array(_) => FieldKind::Json,
        _ => FieldKind::String,
    }
}

fn coerce(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Bool, Value::Bool(b)) => Value::Bool(b),
        (FieldKind::Number, Value::Number(n)) => n.as_f64().map_or(Value::Null, Value::from),
        (FieldKind::Number, Value::String(s)) => {
            s.trim().parse::<f64>().map_or(Value::Null, Value::from)
        }
        (FieldKind::Time, Value::String(s)) => parse_time(&s).map_or(Value::Null, |t| {
            Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }),
        (FieldKind::Json, v) => v,
        (FieldKind::String, Value::String(s)) => Value::String(s),
        (FieldKind::String, v) => Value::String(v.to_string()),
        _ => Value::Null,
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
