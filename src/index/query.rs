//! Query model understood by every index backend.
//!
//! Queries address one document type and combine filters with AND. Field
//! names are dotted paths into the JSON document (`payload.term`). A field
//! holding `null` counts as missing.

use std::cmp::Ordering;
use std::ops::Bound;

use serde_json::Value;

/// A single predicate over a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field equals value
    Eq { field: String, value: Value },
    /// field equals one of the values
    In { field: String, values: Vec<Value> },
    /// unsigned integer field within bounds
    Range {
        field: String,
        min: Bound<u64>,
        max: Bound<u64>,
    },
    /// string field starts with prefix
    Prefix { field: String, prefix: String },
    /// string field contains text, ignoring case
    Contains { field: String, text: String },
    /// field absent or null
    Missing { field: String },
    /// at least one of the filters matches
    Any(Vec<Filter>),
    /// the filter does not match
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, min: Bound<u64>, max: Bound<u64>) -> Self {
        Filter::Range {
            field: field.into(),
            min,
            max,
        }
    }

    /// `field <= value`
    pub fn at_most(field: impl Into<String>, value: u64) -> Self {
        Self::range(field, Bound::Unbounded, Bound::Included(value))
    }

    /// `field > value`
    pub fn after(field: impl Into<String>, value: u64) -> Self {
        Self::range(field, Bound::Excluded(value), Bound::Unbounded)
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn contains(field: impl Into<String>, text: impl Into<String>) -> Self {
        Filter::Contains {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Filter::Missing { field: field.into() }
    }

    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Any(filters.into_iter().collect())
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// evaluate against a document
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq { field, value } => lookup(doc, field) == Some(value),
            Filter::In { field, values } => {
                lookup(doc, field).is_some_and(|v| values.contains(v))
            }
            Filter::Range { field, min, max } => lookup(doc, field)
                .and_then(Value::as_u64)
                .is_some_and(|v| in_range(v, min, max)),
            Filter::Prefix { field, prefix } => lookup(doc, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Filter::Contains { field, text } => lookup(doc, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().contains(&text.to_lowercase())),
            Filter::Missing { field } => lookup(doc, field).is_none(),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Not(filter) => !filter.matches(doc),
        }
    }

    /// the same filter with every field path moved under `parent`
    pub fn nested(self, parent: &str) -> Filter {
        let under = |field: String| format!("{}.{}", parent, field);
        match self {
            Filter::Eq { field, value } => Filter::Eq { field: under(field), value },
            Filter::In { field, values } => Filter::In { field: under(field), values },
            Filter::Range { field, min, max } => Filter::Range { field: under(field), min, max },
            Filter::Prefix { field, prefix } => Filter::Prefix { field: under(field), prefix },
            Filter::Contains { field, text } => Filter::Contains { field: under(field), text },
            Filter::Missing { field } => Filter::Missing { field: under(field) },
            Filter::Any(filters) => Filter::Any(filters.into_iter().map(|f| f.nested(parent)).collect()),
            Filter::Not(filter) => Filter::Not(Box::new(filter.nested(parent))),
        }
    }
}

fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    let found = field.split('.').try_fold(doc, |value, segment| value.get(segment))?;
    (!found.is_null()).then_some(found)
}

fn in_range(value: u64, min: &Bound<u64>, max: &Bound<u64>) -> bool {
    let above = match min {
        Bound::Included(m) => value >= *m,
        Bound::Excluded(m) => value > *m,
        Bound::Unbounded => true,
    };
    let below = match max {
        Bound::Included(m) => value <= *m,
        Bound::Excluded(m) => value < *m,
        Bound::Unbounded => true,
    };
    above && below
}

/// Sort order for search results. Without one, hits come back by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

/// A search over one document type.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub doc_type: String,
    pub filters: Vec<Filter>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            filters: Vec::new(),
            sort: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }
}

/// A search result: the document and its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub key: String,
    pub doc: Value,
}

/// Filter, sort and truncate a stream of documents.
///
/// Hits are put in key order first, so backends that store documents in a
/// different order (git trees sort by file name) agree on unsorted results
/// and on ties.
pub(crate) fn execute<I>(query: &Query, docs: I) -> Vec<Hit>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut hits: Vec<Hit> = docs
        .into_iter()
        .filter(|(_, doc)| query.matches(doc))
        .map(|(key, doc)| Hit { key, doc })
        .collect();
    hits.sort_by(|a, b| a.key.cmp(&b.key));

    if let Some(sort) = &query.sort {
        hits.sort_by(|a, b| {
            let ord = compare_values(lookup(&a.doc, &sort.field), lookup(&b.doc, &sort.field));
            if sort.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some(limit) = query.limit {
        hits.truncate(limit);
    }
    hits
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn revision(created: u64, revised: Option<u64>) -> Value {
        json!({
            "branchPath": "MAIN/a",
            "created": created,
            "revised": revised,
            "payload": { "term": "Heart Attack", "active": true }
        })
    }

    #[test]
    fn test_eq_and_nested_fields() {
        let doc = revision(10, None);
        assert!(Filter::eq("branchPath", "MAIN/a").matches(&doc));
        assert!(Filter::eq("payload.active", true).matches(&doc));
        assert!(!Filter::eq("payload.active", false).matches(&doc));
        assert!(!Filter::eq("payload.missing", 1).matches(&doc));
    }

    #[test]
    fn test_range_bounds() {
        let doc = revision(10, Some(20));
        assert!(Filter::at_most("created", 10).matches(&doc));
        assert!(!Filter::at_most("created", 9).matches(&doc));
        assert!(Filter::after("revised", 19).matches(&doc));
        assert!(!Filter::after("revised", 20).matches(&doc));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let current = revision(10, None);
        let closed = revision(10, Some(20));
        let open_or_later = Filter::any([Filter::missing("revised"), Filter::after("revised", 15)]);

        assert!(Filter::missing("revised").matches(&current));
        assert!(open_or_later.matches(&current));
        assert!(open_or_later.matches(&closed));
        assert!(!Filter::any([Filter::missing("revised"), Filter::after("revised", 25)]).matches(&closed));
    }

    #[test]
    fn test_contains_ignores_case() {
        let doc = revision(10, None);
        assert!(Filter::contains("payload.term", "heart").matches(&doc));
        assert!(Filter::not(Filter::contains("payload.term", "lung")).matches(&doc));
        assert!(Filter::prefix("branchPath", "MAIN/").matches(&doc));
    }

    #[test]
    fn test_nested_rewrites_every_field() {
        let filter = Filter::any([Filter::eq("term", "x"), Filter::not(Filter::missing("active"))]).nested("payload");
        assert_eq!(
            filter,
            Filter::any([
                Filter::eq("payload.term", "x"),
                Filter::not(Filter::missing("payload.active")),
            ])
        );
    }

    #[test]
    fn test_execute_sorts_and_limits() {
        let docs = (1..=5u64).map(|i| (format!("k{}", i), json!({ "timestamp": i * 10 })));
        let query = Query::new("commit")
            .filter(Filter::range("timestamp", Bound::Included(20), Bound::Included(40)))
            .sort_by("timestamp", true)
            .limit(2);

        let hits = execute(&query, docs);
        let keys: Vec<_> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["k4", "k3"]);
    }
}
