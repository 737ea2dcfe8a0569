//! Query building blocks: predicates, sort directions, pagination and index specs.

use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

impl SortDirection {
    /// Key value used in sort and index documents.
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
}

impl ComparisonOp {
    pub const fn operator(self) -> &'static str {
        match self {
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Ne => "$ne",
        }
    }
}

/// Condition applied to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Bson),
    Compare(ComparisonOp, Bson),
}

impl Predicate {
    pub fn eq(value: impl Into<Bson>) -> Self {
        Self::Eq(value.into())
    }

    pub fn compare(op: ComparisonOp, value: impl Into<Bson>) -> Self {
        Self::Compare(op, value.into())
    }

    /// The value placed under the field name in a filter document.
    pub fn to_condition(&self) -> Bson {
        match self {
            Self::Eq(value) => value.clone(),
            Self::Compare(op, value) => Bson::Document(doc! { op.operator(): value.clone() }),
        }
    }
}

/// Logical AND of all `(field, predicate)` pairs.
///
/// Repeated fields cannot share one key in a filter document, so they fall
/// back to an explicit `$and`.
pub fn compound_filter(filters: &[(String, Predicate)]) -> Document {
    let mut filter = Document::new();
    let repeated = filters
        .iter()
        .enumerate()
        .any(|(i, (field, _))| filters[..i].iter().any(|(f, _)| f == field));

    if repeated {
        let clauses: Vec<Bson> = filters
            .iter()
            .map(|(field, predicate)| {
                Bson::Document(doc! { field.as_str(): predicate.to_condition() })
            })
            .collect();
        filter.insert("$and", clauses);
        return filter;
    }

    for (field, predicate) in filters {
        filter.insert(field.as_str(), predicate.to_condition());
    }
    filter
}

/// Inclusion projection for `fields`; `_id` is suppressed unless requested.
pub fn inclusion_projection<S: AsRef<str>>(fields: &[S]) -> Document {
    let mut projection = Document::new();
    for field in fields {
        projection.insert(field.as_ref(), 1);
    }
    if !projection.contains_key("_id") {
        projection.insert("_id", 0);
    }
    projection
}

/// Everything a find call needs. Built per operation and discarded after.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Vec<(String, SortDirection)>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl QuerySpec {
    pub fn filter(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.skip = Some(page.skip());
        self.limit = Some(page.limit());
        self
    }

    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }
        let mut sort = Document::new();
        for (field, direction) in &self.sort {
            sort.insert(field.as_str(), direction.as_i32());
        }
        Some(sort)
    }
}

/// One page of a scan. Both size and number are 1-based and non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    size: u64,
    number: u64,
}

impl Page {
    pub fn new(size: u64, number: u64) -> Result<Self> {
        if size == 0 {
            return Err(RunnerError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }
        if number == 0 {
            return Err(RunnerError::InvalidArgument(
                "page number must be at least 1".to_string(),
            ));
        }
        Ok(Self { size, number })
    }

    pub const fn number(&self) -> u64 {
        self.number
    }

    pub const fn skip(&self) -> u64 {
        self.size.saturating_mul(self.number - 1)
    }

    pub fn limit(&self) -> i64 {
        i64::try_from(self.size).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub field: String,
    #[serde(default = "default_index_direction")]
    pub direction: SortDirection,
}

const fn default_index_direction() -> SortDirection {
    SortDirection::Ascending
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSpec {
    pub fields: Vec<IndexField>,
}

impl IndexSpec {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, SortDirection)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(field, direction)| IndexField {
                    field: field.into(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn keys(&self) -> Document {
        let mut keys = Document::new();
        for f in &self.fields {
            keys.insert(f.field.as_str(), f.direction.as_i32());
        }
        keys
    }

    /// Whether an existing index key pattern covers the same fields in the same
    /// order and directions. Directions may come back as any numeric type.
    pub fn matches_keys(&self, keys: &Document) -> bool {
        keys.len() == self.fields.len()
            && self.fields.iter().zip(keys).all(|(f, (name, value))| {
                let direction = match value {
                    Bson::Int32(v) => f64::from(*v),
                    Bson::Int64(v) => *v as f64,
                    Bson::Double(v) => *v,
                    _ => return false,
                };
                f.field == *name && direction == f64::from(f.direction.as_i32())
            })
    }

    /// The name the server derives from the key pattern, e.g. `genre_1_price_-1`.
    pub fn default_name(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}_{}", f.field, f.direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }
}
