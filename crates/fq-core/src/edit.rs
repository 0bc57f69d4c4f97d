//! # Field Edits
//!
//! [`QueryModel::with_field_changed`] is the only way an editor changes a
//! model: it copies the current value, overwrites the addressed field and
//! returns the new model. The input is never mutated.
//!
//! Field paths use the persisted (camelCase) names:
//!
//! ```text
//! collectionPath | select | where | orderBy | limit | isCount   (structured)
//! query                                                           (free-form)
//! select.<i>
//! where.<i> | where.<i>.path | where.<i>.operator | where.<i>.value
//! orderBy.<i> | orderBy.<i>.path | orderBy.<i>.direction
//! ```
//!
//! An element index may equal the list length, which appends a default
//! element before applying the edit.

use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::wire::{parse_limit, scalar_to_string};
use crate::{Condition, Direction, FreeFormQuery, QueryModel, SortKey, StructuredQuery};

impl QueryModel {
    /// Build a new model equal to `self` except for `field_path`.
    pub fn with_field_changed(&self, field_path: &str, new_value: &Value) -> ModelResult<Self> {
        match self {
            QueryModel::Structured(q) => {
                let mut next = q.clone();
                apply_structured(&mut next, field_path, new_value)?;
                Ok(QueryModel::Structured(next))
            }
            QueryModel::FreeForm(q) => {
                let mut next = q.clone();
                apply_free_form(&mut next, field_path, new_value)?;
                Ok(QueryModel::FreeForm(next))
            }
        }
    }
}

/// Free function form of [`QueryModel::with_field_changed`].
pub fn with_field_changed(
    model: &QueryModel,
    field_path: &str,
    new_value: &Value,
) -> ModelResult<QueryModel> {
    model.with_field_changed(field_path, new_value)
}

fn apply_free_form(q: &mut FreeFormQuery, path: &str, value: &Value) -> ModelResult<()> {
    match path {
        "query" => {
            q.query_text = expect_string(path, value)?;
            Ok(())
        }
        _ => Err(ModelError::InvalidField {
            field: path.to_string(),
            variant: crate::Variant::FreeForm,
        }),
    }
}

fn apply_structured(q: &mut StructuredQuery, path: &str, value: &Value) -> ModelResult<()> {
    let mut segments = path.splitn(3, '.');
    let head = segments.next().unwrap_or_default();
    let index = segments.next();
    let sub = segments.next();

    match (head, index, sub) {
        ("collectionPath", None, None) => q.collection_path = expect_string(path, value)?,
        ("select", None, None) => q.select = expect_field_list(path, value)?,
        ("where", None, None) => q.conditions = decode(path, value)?,
        ("orderBy", None, None) => q.order_by = decode(path, value)?,
        ("limit", None, None) => q.limit = expect_limit(path, value)?,
        ("isCount", None, None) => {
            q.is_count = value
                .as_bool()
                .ok_or_else(|| ModelError::invalid_value(path, "expected a boolean"))?
        }
        ("select", Some(i), None) => {
            let slot = element(&mut q.select, path, i)?;
            *slot = expect_string(path, value)?;
        }
        ("where", Some(i), None) => {
            let slot = element(&mut q.conditions, path, i)?;
            *slot = decode(path, value)?;
        }
        ("where", Some(i), Some(sub)) => {
            let slot = element(&mut q.conditions, path, i)?;
            apply_condition(slot, path, sub, value)?;
        }
        ("orderBy", Some(i), None) => {
            let slot = element(&mut q.order_by, path, i)?;
            *slot = decode(path, value)?;
        }
        ("orderBy", Some(i), Some(sub)) => {
            let slot = element(&mut q.order_by, path, i)?;
            apply_sort_key(slot, path, sub, value)?;
        }
        _ => {
            return Err(ModelError::InvalidField {
                field: path.to_string(),
                variant: crate::Variant::Structured,
            })
        }
    }
    Ok(())
}

fn apply_condition(cond: &mut Condition, path: &str, sub: &str, value: &Value) -> ModelResult<()> {
    match sub {
        "path" => cond.path = expect_string(path, value)?,
        "operator" => cond.operator = expect_string(path, value)?,
        "value" => {
            cond.value = scalar_to_string(value)
                .ok_or_else(|| ModelError::invalid_value(path, "expected a scalar or a list"))?
        }
        _ => {
            return Err(ModelError::InvalidField {
                field: path.to_string(),
                variant: crate::Variant::Structured,
            })
        }
    }
    Ok(())
}

fn apply_sort_key(key: &mut SortKey, path: &str, sub: &str, value: &Value) -> ModelResult<()> {
    match sub {
        "path" => key.path = expect_string(path, value)?,
        "direction" => key.direction = decode::<Direction>(path, value)?,
        _ => {
            return Err(ModelError::InvalidField {
                field: path.to_string(),
                variant: crate::Variant::Structured,
            })
        }
    }
    Ok(())
}

/// Resolve `index` into a mutable slot, appending a default element when the
/// index is one past the end.
fn element<'a, T: Default>(list: &'a mut Vec<T>, path: &str, index: &str) -> ModelResult<&'a mut T> {
    let i: usize = index.parse().map_err(|_| ModelError::InvalidField {
        field: path.to_string(),
        variant: crate::Variant::Structured,
    })?;
    if i > list.len() {
        return Err(ModelError::IndexOutOfRange {
            field: path.to_string(),
            index: i,
            len: list.len(),
        });
    }
    if i == list.len() {
        list.push(T::default());
    }
    Ok(&mut list[i])
}

fn expect_string(path: &str, value: &Value) -> ModelResult<String> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| ModelError::invalid_value(path, "expected a string"))
}

/// A projection is a list of field paths, or a comma-separated string as
/// typed into a single input.
fn expect_field_list(path: &str, value: &Value) -> ModelResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(ToString::to_string)
            .collect()),
        Value::Null => Ok(Vec::new()),
        _ => decode(path, value),
    }
}

fn expect_limit(path: &str, value: &Value) -> ModelResult<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ModelError::invalid_value(path, format!("{} is not a non-negative integer", n))),
        Value::String(s) => parse_limit(s).map_err(|reason| ModelError::invalid_value(path, reason)),
        Value::Null => Ok(0),
        _ => Err(ModelError::invalid_value(path, "expected an integer")),
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, value: &Value) -> ModelResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| ModelError::invalid_value(path, e.to_string()))
}
