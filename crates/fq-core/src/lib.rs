//! # fq-core: The Query Model of FireQuery
//!
//! A [`QueryModel`] describes what to fetch from a Firestore-style document
//! store. It is always exactly one of two shapes:
//!
//! - [`StructuredQuery`]: collection path, projection, filters, sort keys,
//!   limit and a count-only flag.
//! - [`FreeFormQuery`]: a single opaque query-language expression.
//!
//! Models are values. Every edit builds a new model through
//! [`QueryModel::with_field_changed`] and the previous one is discarded, so
//! downstream consumers only ever see "replace and notify".
//!
//! # Persisted Format
//!
//! | Variant    | JSON fields                                                      |
//! |------------|------------------------------------------------------------------|
//! | Structured | `collectionPath`, `select`, `where`, `orderBy`, `limit`, `isCount` |
//! | Free-form  | `query`                                                          |
//!
//! Fields of the inactive variant are never written, see [`wire`].

pub mod edit;
pub mod error;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::{ModelError, ModelResult};

/// A query against the document store, in exactly one editing mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "wire::RawQueryModel", into = "wire::RawQueryModel")]
pub enum QueryModel {
    Structured(StructuredQuery),
    FreeForm(FreeFormQuery),
}

/// Which of the two shapes a [`QueryModel`] currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Structured,
    FreeForm,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::FreeForm => write!(f, "free-form"),
        }
    }
}

/// Filter/sort/limit specification of a single collection query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredQuery {
    /// Collection id or slash-separated path to a collection.
    pub collection_path: String,
    /// Projected field paths. Empty selects every field.
    pub select: Vec<String>,
    /// Filter conditions, combined with AND.
    pub conditions: Vec<Condition>,
    /// Sort keys, most significant first.
    pub order_by: Vec<SortKey>,
    /// Maximum row count. `0` means no limit.
    pub limit: u64,
    /// Return a single row count instead of documents; overrides `select`.
    pub is_count: bool,
}

/// A single opaque query-language expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeFormQuery {
    pub query_text: String,
}

/// One `where` clause. The operator is an opaque token (`==`, `!=`, `in`, ...)
/// and the value is carried as its string representation; the execution
/// backend converts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, alias = "Path")]
    pub path: String,
    #[serde(default, alias = "Operator")]
    pub operator: String,
    #[serde(default, alias = "Value", deserialize_with = "wire::scalar_as_string")]
    pub value: String,
}

impl Condition {
    pub fn new(path: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// One `orderBy` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    #[serde(default, alias = "Path")]
    pub path: String,
    #[serde(default, alias = "Direction")]
    pub direction: Direction,
}

impl SortKey {
    pub fn new(path: impl Into<String>, direction: Direction) -> Self {
        Self {
            path: path.into(),
            direction,
        }
    }
}

/// Sort direction, persisted as the store's numeric code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "wire::DirectionRepr", into = "u8")]
pub enum Direction {
    #[default]
    Ascending = 1,
    Descending = 2,
}

impl Direction {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Ascending),
            2 => Some(Self::Descending),
            _ => None,
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction.code()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASC"),
            Self::Descending => write!(f, "DESC"),
        }
    }
}

impl Default for QueryModel {
    /// A fresh editor starts in free-form mode with no text.
    fn default() -> Self {
        Self::FreeForm(FreeFormQuery::default())
    }
}

impl QueryModel {
    /// Structured query over `collection_path` with everything else unset.
    pub fn structured(collection_path: impl Into<String>) -> Self {
        Self::Structured(StructuredQuery {
            collection_path: collection_path.into(),
            ..StructuredQuery::default()
        })
    }

    pub fn free_form(query_text: impl Into<String>) -> Self {
        Self::FreeForm(FreeFormQuery {
            query_text: query_text.into(),
        })
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Structured(_) => Variant::Structured,
            Self::FreeForm(_) => Variant::FreeForm,
        }
    }

    /// True iff the variant's minimum required field is non-empty.
    pub fn is_executable(&self) -> bool {
        match self {
            Self::Structured(q) => !q.collection_path.trim().is_empty(),
            Self::FreeForm(q) => !q.query_text.trim().is_empty(),
        }
    }

    /// Human-readable projection of the model. Free-form text is returned
    /// verbatim; structured queries render a display-only SQL-like line.
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeForm(q) => f.write_str(&q.query_text),
            Self::Structured(q) => q.fmt(f),
        }
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_count {
            write!(f, "SELECT COUNT(*)")?;
        } else if self.select.is_empty() {
            write!(f, "SELECT *")?;
        } else {
            write!(f, "SELECT {}", self.select.join(", "))?;
        }
        write!(f, " FROM {}", self.collection_path)?;

        for (i, cond) in self.conditions.iter().enumerate() {
            let keyword = if i == 0 { "WHERE" } else { "AND" };
            write!(
                f,
                " {} {} {} {}",
                keyword,
                cond.path,
                cond.operator,
                display_value(&cond.value)
            )?;
        }

        for (i, key) in self.order_by.iter().enumerate() {
            let keyword = if i == 0 { " ORDER BY" } else { "," };
            write!(f, "{} {} {}", keyword, key.path, key.direction)?;
        }

        if self.limit > 0 {
            write!(f, " LIMIT {}", self.limit)?;
        }
        Ok(())
    }
}

/// Literals that read unambiguously stay bare; everything else is quoted.
fn display_value(value: &str) -> String {
    let bare = value.parse::<f64>().is_ok()
        || matches!(value, "true" | "false" | "null")
        || (value.starts_with('[') && value.ends_with(']'));
    if bare {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_query() -> StructuredQuery {
        StructuredQuery {
            collection_path: "users".into(),
            select: vec!["name".into(), "age".into()],
            conditions: vec![
                Condition::new("age", ">", "30"),
                Condition::new("name", "==", "Janis"),
            ],
            order_by: vec![
                SortKey::new("age", Direction::Descending),
                SortKey::new("name", Direction::Ascending),
            ],
            limit: 10,
            is_count: false,
        }
    }

    #[test]
    fn test_free_form_display_is_verbatim() {
        let model = QueryModel::free_form("select * from users where `a.b` = 'x'");
        assert_eq!(
            model.to_display_string(),
            "select * from users where `a.b` = 'x'"
        );
    }

    #[test]
    fn test_structured_display() {
        let model = QueryModel::Structured(users_query());
        assert_eq!(
            model.to_display_string(),
            "SELECT name, age FROM users WHERE age > 30 AND name == \"Janis\" \
             ORDER BY age DESC, name ASC LIMIT 10"
        );
    }

    #[test]
    fn test_count_display_overrides_select() {
        let mut q = users_query();
        q.is_count = true;
        q.conditions.clear();
        q.order_by.clear();
        q.limit = 0;
        assert_eq!(
            QueryModel::Structured(q).to_display_string(),
            "SELECT COUNT(*) FROM users"
        );
    }

    #[test]
    fn test_is_executable() {
        assert!(QueryModel::structured("users").is_executable());
        assert!(!QueryModel::structured("").is_executable());
        assert!(!QueryModel::structured("   ").is_executable());
        assert!(QueryModel::free_form("select * from users").is_executable());
        assert!(!QueryModel::free_form("").is_executable());
        assert!(!QueryModel::default().is_executable());
    }

    #[test]
    fn test_direction_codes() {
        assert_eq!(Direction::Ascending.code(), 1);
        assert_eq!(Direction::Descending.code(), 2);
        assert_eq!(Direction::from_code(2), Some(Direction::Descending));
        assert_eq!(Direction::from_code(3), None);
    }

    #[test]
    fn test_equal_values_are_interchangeable() {
        let a = QueryModel::Structured(users_query());
        let b = QueryModel::Structured(users_query());
        assert_eq!(a, b);
        assert_ne!(a, QueryModel::free_form(a.to_display_string()));
    }
}
