//! In-memory `BookCollection` for tests.
//!
//! Evaluates the part of the query and aggregation language the catalog
//! uses: equality and comparison filters, `$and`, sort, skip, limit,
//! projection, `$set`, and the `$match`, `$group`, `$sort`, `$limit`,
//! `$project` and `$count` stages.

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use std::cmp::Ordering;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crate::connection::{BookCollection, UpdateOutcome};
use crate::error::{Result, RunnerError};
use crate::query::{IndexSpec, QuerySpec};

#[derive(Default)]
pub struct MemoryCollection {
    documents: Mutex<Vec<Document>>,
    indexes: Mutex<Vec<(Document, String)>>,
    close_calls: AtomicUsize,
    fail_on: Option<&'static str>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: Mutex::new(documents),
            ..Default::default()
        }
    }

    /// Make `operation` fail with a connection error.
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    /// Pre-existing index stored under `name`, as if created by another client.
    pub fn with_index(self, keys: Document, name: &str) -> Self {
        self.indexes.lock().unwrap().push((keys, name.to_string()));
        self
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().unwrap().clone()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.lock().unwrap().len()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(AtomicOrdering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.fail_on == Some(operation) {
            return Err(RunnerError::Connection {
                operation,
                message: "connection reset by peer".to_string(),
            });
        }
        Ok(())
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (Bson::Null, _) => Some(Ordering::Less),
        (_, Bson::Null) => Some(Ordering::Greater),
        _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

fn equal(a: &Bson, b: &Bson) -> bool {
    a == b || compare(a, b) == Some(Ordering::Equal)
}

fn field(document: &Document, name: &str) -> Bson {
    document.get(name).cloned().unwrap_or(Bson::Null)
}

fn is_operator_document(value: &Bson) -> bool {
    matches!(value, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| {
        if key == "$and" {
            return match condition {
                Bson::Array(clauses) => clauses.iter().all(|clause| match clause {
                    Bson::Document(clause) => matches_filter(document, clause),
                    _ => false,
                }),
                _ => false,
            };
        }

        let value = field(document, key);
        match condition {
            Bson::Document(ops) if is_operator_document(condition) => {
                ops.iter().all(|(op, operand)| {
                    let ordering = compare(&value, operand);
                    match op.as_str() {
                        "$eq" => equal(&value, operand),
                        "$ne" => !equal(&value, operand),
                        "$gt" => value != Bson::Null && ordering == Some(Ordering::Greater),
                        "$gte" => value != Bson::Null && matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                        "$lt" => value != Bson::Null && ordering == Some(Ordering::Less),
                        "$lte" => value != Bson::Null && matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                        other => panic!("unsupported query operator {other}"),
                    }
                })
            }
            _ => equal(&value, condition),
        }
    })
}

fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|a, b| {
        for (key, direction) in sort {
            let ordering = compare(&field(a, key), &field(b, key)).unwrap_or(Ordering::Equal);
            let ordering = if as_f64(direction).unwrap_or(1.0) < 0.0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        other => as_f64(other).is_some_and(|v| v != 0.0),
    }
}

fn apply_projection(document: &Document, projection: &Document) -> Document {
    let keep_id = projection.get("_id").is_none_or(truthy);
    let inclusions: Vec<&String> = projection
        .iter()
        .filter(|(k, v)| k.as_str() != "_id" && truthy(v))
        .map(|(k, _)| k)
        .collect();

    document
        .iter()
        .filter(|(key, _)| {
            if key.as_str() == "_id" {
                keep_id
            } else if inclusions.is_empty() {
                projection.get(key.as_str()).is_none_or(truthy)
            } else {
                inclusions.contains(key)
            }
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn numeric_args(args: &Bson, document: &Document) -> Vec<Bson> {
    match args {
        Bson::Array(items) => items.iter().map(|item| eval(item, document)).collect(),
        single => vec![eval(single, document)],
    }
}

fn arithmetic(values: &[Bson], op: impl Fn(f64, f64) -> f64) -> Bson {
    let any_double = values.iter().any(|v| matches!(v, Bson::Double(_)));
    let Some(mut acc) = values.first().and_then(as_f64) else {
        return Bson::Null;
    };
    for value in &values[1..] {
        let Some(v) = as_f64(value) else {
            return Bson::Null;
        };
        acc = op(acc, v);
    }
    if any_double {
        Bson::Double(acc)
    } else {
        Bson::Int64(acc as i64)
    }
}

/// Evaluate an aggregation expression against `document`.
fn eval(expr: &Bson, document: &Document) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with('$') => field(document, &s[1..]),
        Bson::Document(d) if is_operator_document(expr) => {
            let (op, args) = d.iter().next().unwrap();
            let values = numeric_args(args, document);
            match op.as_str() {
                "$add" => arithmetic(&values, |a, b| a + b),
                "$subtract" => arithmetic(&values, |a, b| a - b),
                "$multiply" => arithmetic(&values, |a, b| a * b),
                "$mod" => arithmetic(&values, |a, b| a % b),
                "$divide" => match (as_f64(&values[0]), as_f64(&values[1])) {
                    (Some(a), Some(b)) => Bson::Double(a / b),
                    _ => Bson::Null,
                },
                "$floor" => match &values[0] {
                    Bson::Double(v) => Bson::Double(v.floor()),
                    other => other.clone(),
                },
                "$toInt" => as_f64(&values[0]).map_or(Bson::Null, |v| Bson::Int32(v as i32)),
                other => panic!("unsupported expression operator {other}"),
            }
        }
        Bson::Document(d) => Bson::Document(
            d.iter()
                .map(|(k, v)| (k.clone(), eval(v, document)))
                .collect(),
        ),
        literal => literal.clone(),
    }
}

enum Accumulator {
    Sum { total: f64, all_ints: bool },
    Avg { total: f64, count: u64 },
}

impl Accumulator {
    fn new(spec: &Bson) -> (Self, Bson) {
        let Bson::Document(spec) = spec else {
            panic!("accumulator must be a document");
        };
        let (op, expr) = spec.iter().next().unwrap();
        let acc = match op.as_str() {
            "$sum" => Self::Sum {
                total: 0.0,
                all_ints: true,
            },
            "$avg" => Self::Avg {
                total: 0.0,
                count: 0,
            },
            other => panic!("unsupported accumulator {other}"),
        };
        (acc, expr.clone())
    }

    fn add(&mut self, value: &Bson) {
        let Some(v) = as_f64(value) else {
            return;
        };
        match self {
            Self::Sum { total, all_ints } => {
                *total += v;
                *all_ints &= !matches!(value, Bson::Double(_));
            }
            Self::Avg { total, count } => {
                *total += v;
                *count += 1;
            }
        }
    }

    fn result(&self) -> Bson {
        match self {
            Self::Sum {
                total,
                all_ints: true,
            } => i32::try_from(*total as i64)
                .map_or(Bson::Int64(*total as i64), Bson::Int32),
            Self::Sum {
                total,
                all_ints: false,
            } => Bson::Double(*total),
            Self::Avg { count: 0, .. } => Bson::Null,
            Self::Avg { total, count } => Bson::Double(total / *count as f64),
        }
    }
}

fn group(documents: Vec<Document>, spec: &Document) -> Vec<Document> {
    let id_expr = spec.get("_id").cloned().unwrap_or(Bson::Null);
    let mut groups: Vec<(Bson, Vec<(String, Accumulator, Bson)>)> = Vec::new();

    for document in &documents {
        let key = eval(&id_expr, document);
        let position = match groups.iter().position(|(k, _)| equal(k, &key)) {
            Some(position) => position,
            None => {
                let accumulators = spec
                    .iter()
                    .filter(|(name, _)| name.as_str() != "_id")
                    .map(|(name, acc_spec)| {
                        let (acc, expr) = Accumulator::new(acc_spec);
                        (name.clone(), acc, expr)
                    })
                    .collect();
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };
        for (_, acc, expr) in &mut groups[position].1 {
            acc.add(&eval(expr, document));
        }
    }

    groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = doc! { "_id": key };
            for (name, acc, _) in accumulators {
                out.insert(name, acc.result());
            }
            out
        })
        .collect()
}

fn project_stage(document: &Document, spec: &Document) -> Document {
    let mut out = Document::new();
    if spec.get("_id").is_none_or(truthy) {
        if let Some(id) = document.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (key, value) in spec {
        if key == "_id" {
            if !matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Boolean(_)) {
                out.insert("_id", eval(value, document));
            }
            continue;
        }
        match value {
            Bson::Int32(_) | Bson::Int64(_) | Bson::Boolean(_) => {
                if truthy(value) {
                    if let Some(v) = document.get(key) {
                        out.insert(key.clone(), v.clone());
                    }
                }
            }
            expr => {
                out.insert(key.clone(), eval(expr, document));
            }
        }
    }
    out
}

fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
    for stage in pipeline {
        let Some((name, spec)) = stage.iter().next() else {
            continue;
        };
        documents = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => documents
                .into_iter()
                .filter(|d| matches_filter(d, filter))
                .collect(),
            ("$group", Bson::Document(spec)) => group(documents, spec),
            ("$sort", Bson::Document(sort)) => {
                sort_documents(&mut documents, sort);
                documents
            }
            ("$limit", limit) => {
                let limit = as_f64(limit).unwrap_or(0.0) as usize;
                documents.truncate(limit);
                documents
            }
            ("$project", Bson::Document(spec)) => documents
                .iter()
                .map(|d| project_stage(d, spec))
                .collect(),
            ("$count", Bson::String(label)) => {
                let mut counted = Document::new();
                counted.insert(label.as_str(), documents.len() as i32);
                vec![counted]
            }
            (other, _) => {
                return Err(RunnerError::Command {
                    operation: "aggregate",
                    message: format!("unsupported stage {other}"),
                });
            }
        };
    }
    Ok(documents)
}

#[async_trait]
impl BookCollection for MemoryCollection {
    fn namespace(&self) -> String {
        "memory.books".to_string()
    }

    async fn find(&self, spec: &QuerySpec) -> Result<Vec<Document>> {
        self.check("find")?;
        let mut found: Vec<Document> = self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|d| matches_filter(d, &spec.filter))
            .cloned()
            .collect();

        if let Some(sort) = spec.sort_document() {
            sort_documents(&mut found, &sort);
        }
        let skip = spec.skip.unwrap_or(0) as usize;
        let limit = spec.limit.map_or(usize::MAX, |l| l as usize);

        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| match &spec.projection {
                Some(projection) => apply_projection(&d, projection),
                None => d,
            })
            .collect())
    }

    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome> {
        self.check("update_one")?;
        let mut documents = self.documents.lock().unwrap();
        let Some(target) = documents.iter_mut().find(|d| matches_filter(d, &filter)) else {
            return Ok(UpdateOutcome {
                matched_count: 0,
                modified_count: 0,
            });
        };

        let set = update.get_document("$set").expect("only $set updates are supported");
        let mut modified = false;
        for (key, value) in set {
            if target.get(key) != Some(value) {
                target.insert(key.clone(), value.clone());
                modified = true;
            }
        }
        Ok(UpdateOutcome {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    async fn delete_one(&self, filter: Document) -> Result<u64> {
        self.check("delete_one")?;
        let mut documents = self.documents.lock().unwrap();
        match documents.iter().position(|d| matches_filter(d, &filter)) {
            Some(position) => {
                documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_many(&self, new_documents: Vec<Document>) -> Result<usize> {
        self.check("insert_many")?;
        let count = new_documents.len();
        let mut documents = self.documents.lock().unwrap();
        for mut document in new_documents {
            if !document.contains_key("_id") {
                let mut with_id = doc! { "_id": ObjectId::new() };
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                document = with_id;
            }
            documents.push(document);
        }
        Ok(count)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        self.check("aggregate")?;
        let documents = self.documents();
        run_pipeline(documents, &pipeline)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<String> {
        self.check("create_index")?;
        let mut indexes = self.indexes.lock().unwrap();
        if let Some((_, name)) = indexes.iter().find(|(k, _)| spec.matches_keys(k)) {
            return Ok(name.clone());
        }
        let name = spec.default_name();
        indexes.push((spec.keys(), name.clone()));
        Ok(name)
    }

    async fn explain(&self, filter: Document) -> Result<Document> {
        self.check("explain")?;
        let documents = self.documents.lock().unwrap();
        let returned = documents.iter().filter(|d| matches_filter(d, &filter)).count() as i32;
        let examined = documents.len() as i32;
        Ok(doc! {
            "queryPlanner": { "winningPlan": { "stage": "COLLSCAN" } },
            "executionStats": {
                "nReturned": returned,
                "totalKeysExamined": 0,
                "totalDocsExamined": examined,
                "executionTimeMillis": 0,
            },
        })
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, AtomicOrdering::SeqCst);
    }
}
