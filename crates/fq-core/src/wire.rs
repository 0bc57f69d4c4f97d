//! # Persisted JSON Format
//!
//! Saved panels and query requests carry a [`QueryModel`] as a flat JSON
//! object. Decoding goes through [`RawQueryModel`], which accepts every field
//! of both variants and then decides which variant is present:
//!
//! - only structured fields → [`QueryModel::Structured`]
//! - only `query` → [`QueryModel::FreeForm`]
//! - neither (a brand-new panel, `{}`) → empty free-form query
//! - both → [`ModelError::AmbiguousVariant`]
//!
//! Field names are camelCase; the PascalCase spellings written by older
//! backends are accepted as aliases. `limit` may be a number or a numeric
//! string.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    Condition, Direction, FreeFormQuery, ModelError, QueryModel, SortKey, StructuredQuery,
};

/// Flat on-the-wire shape of a [`QueryModel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQueryModel {
    #[serde(default, alias = "CollectionPath", skip_serializing_if = "Option::is_none")]
    pub collection_path: Option<String>,
    #[serde(default, alias = "Select", skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    #[serde(
        default,
        rename = "where",
        alias = "Where",
        skip_serializing_if = "Option::is_none"
    )]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default, alias = "OrderBy", skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<SortKey>>,
    #[serde(
        default,
        alias = "Limit",
        deserialize_with = "optional_limit",
        skip_serializing_if = "Option::is_none"
    )]
    pub limit: Option<u64>,
    #[serde(default, alias = "IsCount", skip_serializing_if = "Option::is_none")]
    pub is_count: Option<bool>,
    #[serde(default, alias = "Query", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl RawQueryModel {
    fn structured_fields(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        if self.collection_path.is_some() {
            present.push("collectionPath");
        }
        if self.select.is_some() {
            present.push("select");
        }
        if self.conditions.is_some() {
            present.push("where");
        }
        if self.order_by.is_some() {
            present.push("orderBy");
        }
        if self.limit.is_some() {
            present.push("limit");
        }
        if self.is_count.is_some() {
            present.push("isCount");
        }
        present
    }
}

impl TryFrom<RawQueryModel> for QueryModel {
    type Error = ModelError;

    fn try_from(raw: RawQueryModel) -> Result<Self, Self::Error> {
        let structured = raw.structured_fields();
        match (structured.is_empty(), raw.query) {
            (false, Some(_)) => Err(ModelError::AmbiguousVariant {
                structured: structured.join(", "),
            }),
            (true, query) => Ok(QueryModel::FreeForm(FreeFormQuery {
                query_text: query.unwrap_or_default(),
            })),
            (false, None) => Ok(QueryModel::Structured(StructuredQuery {
                collection_path: raw.collection_path.unwrap_or_default(),
                select: raw.select.unwrap_or_default(),
                conditions: raw.conditions.unwrap_or_default(),
                order_by: raw.order_by.unwrap_or_default(),
                limit: raw.limit.unwrap_or_default(),
                is_count: raw.is_count.unwrap_or_default(),
            })),
        }
    }
}

impl From<QueryModel> for RawQueryModel {
    fn from(model: QueryModel) -> Self {
        match model {
            QueryModel::Structured(q) => RawQueryModel {
                collection_path: Some(q.collection_path),
                select: Some(q.select),
                conditions: Some(q.conditions),
                order_by: Some(q.order_by),
                limit: Some(q.limit),
                is_count: Some(q.is_count),
                query: None,
            },
            QueryModel::FreeForm(q) => RawQueryModel {
                query: Some(q.query_text),
                ..RawQueryModel::default()
            },
        }
    }
}

/// Accepted spellings of a sort direction.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DirectionRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<DirectionRepr> for Direction {
    type Error = ModelError;

    fn try_from(repr: DirectionRepr) -> Result<Self, Self::Error> {
        match repr {
            DirectionRepr::Code(code) => {
                Direction::from_code(code).ok_or_else(|| ModelError::InvalidDirection(code.to_string()))
            }
            DirectionRepr::Name(name) => match name.trim().to_ascii_lowercase().as_str() {
                "1" | "asc" | "ascending" => Ok(Direction::Ascending),
                "2" | "desc" | "descending" => Ok(Direction::Descending),
                _ => Err(ModelError::InvalidDirection(name)),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Number(u64),
    Text(String),
}

/// Parse a limit given as text. Blank text means "no limit".
pub(crate) fn parse_limit(text: &str) -> Result<u64, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse::<u64>()
        .map_err(|_| format!("'{}' is not a non-negative integer", text))
}

fn optional_limit<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<LimitRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(LimitRepr::Number(n)) => Ok(Some(n)),
        Some(LimitRepr::Text(text)) => parse_limit(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Render a JSON scalar as the string form a condition value is carried in.
pub(crate) fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Array(_) => Some(value.to_string()),
        serde_json::Value::Object(_) => None,
    }
}

pub(crate) fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("condition value must be a scalar or a list"))
}
