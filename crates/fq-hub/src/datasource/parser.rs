//! # Free-Form Query Parser
//!
//! The in-memory store understands a small SQL-like dialect and turns it
//! into a [`StructuredQuery`]:
//!
//! ```text
//! SELECT * | COUNT(*) | field, `nested.field`, ...
//!   FROM collection/path
//!   [WHERE field op value AND ...]
//!   [ORDER BY field [ASC|DESC], ...]
//!   [LIMIT n]
//! ```
//!
//! Operators: `=`/`==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not-in`,
//! `array-contains`, `array-contains-any`. Keywords are case-insensitive.
//! This is the store's dialect; editors forward query text untouched.

use fq_core::{Condition, Direction, SortKey, StructuredQuery};

const CLAUSES: [&str; 4] = [" FROM ", " WHERE ", " ORDER BY ", " LIMIT "];

/// Parse a free-form query string.
pub fn parse(input: &str) -> Result<StructuredQuery, String> {
    let input = input.trim().trim_end_matches(';').trim();
    // ASCII uppercasing keeps byte offsets aligned with `input`.
    let upper = input.to_ascii_uppercase();

    if !upper.starts_with("SELECT ") {
        return Err(format!("expected SELECT, got '{}'", input));
    }
    let padded = format!(" {} ", upper);

    let projection = clause(input, &padded, " SELECT ")
        .ok_or_else(|| "missing projection".to_string())?;
    let collection = clause(input, &padded, " FROM ")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| "missing FROM clause".to_string())?;

    let mut query = StructuredQuery {
        collection_path: strip_quotes(collection).to_string(),
        ..StructuredQuery::default()
    };

    if projection.eq_ignore_ascii_case("COUNT(*)") {
        query.is_count = true;
    } else if projection != "*" {
        query.select = parse_fields(projection)?;
    }

    if let Some(where_str) = clause(input, &padded, " WHERE ") {
        query.conditions = parse_conditions(where_str)?;
    }

    if let Some(order_str) = clause(input, &padded, " ORDER BY ") {
        query.order_by = parse_order(order_str)?;
    }

    if let Some(limit_str) = clause(input, &padded, " LIMIT ") {
        query.limit = limit_str
            .parse::<u64>()
            .map_err(|_| format!("invalid LIMIT '{}'", limit_str))?;
    }

    Ok(query)
}

/// Text of the clause introduced by `keyword`, up to the next clause keyword.
///
/// `padded` is the uppercased input with one space added on each side, so
/// offsets in `padded` are one past offsets in `input`.
fn clause<'a>(input: &'a str, padded: &str, keyword: &str) -> Option<&'a str> {
    let quoted = quote_mask(padded);
    let start = find_unquoted(padded, keyword, &quoted, 0)? + keyword.len();
    let end = std::iter::once(" SELECT ")
        .chain(CLAUSES)
        .filter_map(|kw| find_unquoted(padded, kw, &quoted, start))
        .min()
        .unwrap_or(padded.len() - 1);
    // translate back to `input` offsets
    let (start, end) = (start - 1, end.saturating_sub(1).max(start - 1));
    Some(input.get(start..end.min(input.len()))?.trim())
}

fn parse_fields(s: &str) -> Result<Vec<String>, String> {
    s.split(',')
        .map(|f| {
            let f = strip_quotes(f.trim());
            if f.is_empty() || f.contains(char::is_whitespace) {
                Err(format!("unsupported projection '{}'", f))
            } else {
                Ok(f.to_string())
            }
        })
        .collect()
}

fn parse_conditions(s: &str) -> Result<Vec<Condition>, String> {
    let mut conditions = Vec::new();

    for part in split_and(s) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let lower = part.to_ascii_lowercase();
        let quoted = quote_mask(part);

        let symbolic = ["==", ">=", "<=", "!=", "=", ">", "<"]
            .into_iter()
            .filter_map(|op| find_unquoted(part, op, &quoted, 0).map(|pos| (pos, op)));
        let worded = [
            " array-contains-any ",
            " array-contains ",
            " not-in ",
            " in ",
        ]
        .into_iter()
        .filter_map(|op| find_unquoted(&lower, op, &quoted, 0).map(|pos| (pos, op)));

        // Earliest operator wins; on a tie the longer token, so `>=` is not read as `>`.
        let found = symbolic
            .chain(worded)
            .min_by_key(|(pos, op)| (*pos, std::cmp::Reverse(op.len())))
            .map(|(pos, op)| (pos, op.len(), op.trim()));

        let Some((pos, len, op)) = found else {
            return Err(format!("cannot parse condition '{}'", part));
        };

        let field = strip_quotes(part[..pos].trim());
        let value = strip_quotes(part[pos + len..].trim());
        if field.is_empty() {
            return Err(format!("missing field in condition '{}'", part));
        }
        let operator = if op == "=" { "==" } else { op };
        conditions.push(Condition::new(field, operator, value));
    }

    Ok(conditions)
}

fn parse_order(s: &str) -> Result<Vec<SortKey>, String> {
    s.split(',')
        .map(|item| {
            let mut words = item.split_whitespace();
            let path = words
                .next()
                .map(strip_quotes)
                .ok_or_else(|| "empty ORDER BY item".to_string())?;
            let direction = match words.next().map(|w| w.to_ascii_uppercase()) {
                None => Direction::Ascending,
                Some(w) if w == "ASC" => Direction::Ascending,
                Some(w) if w == "DESC" => Direction::Descending,
                Some(w) => return Err(format!("unknown sort direction '{}'", w)),
            };
            if words.next().is_some() {
                return Err(format!("unexpected text in ORDER BY '{}'", item.trim()));
            }
            Ok(SortKey::new(path, direction))
        })
        .collect()
}

fn split_and(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let upper = s.to_ascii_uppercase();
    let quoted = quote_mask(s);
    let pattern = " AND ";
    let mut last = 0;

    while let Some(absolute_pos) = find_unquoted(&upper, pattern, &quoted, last) {
        parts.push(&s[last..absolute_pos]);
        last = absolute_pos + pattern.len();
    }
    parts.push(&s[last..]);
    parts
}

/// Per byte of `s`, whether it sits inside a quoted literal or identifier.
/// Quote characters are ASCII, so the mask also fits any ASCII-cased copy.
fn quote_mask(s: &str) -> Vec<bool> {
    let mut open: Option<u8> = None;
    s.bytes()
        .map(|b| match open {
            Some(q) => {
                if b == q {
                    open = None;
                }
                true
            }
            None => {
                if matches!(b, b'`' | b'"' | b'\'') {
                    open = Some(b);
                }
                false
            }
        })
        .collect()
}

/// First match of `needle` at or after `from` that does not start inside quotes.
fn find_unquoted(haystack: &str, needle: &str, quoted: &[bool], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .match_indices(needle)
        .map(|(pos, _)| from + pos)
        .find(|&pos| !quoted.get(pos).copied().unwrap_or(false))
}

/// Remove one level of backticks or quotes.
fn strip_quotes(s: &str) -> &str {
    for q in ['`', '"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
