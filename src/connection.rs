//! Collection abstraction.
//! The runner talks to the books collection only through this trait.

use async_trait::async_trait;
use mongodb::bson::Document;

use crate::error::Result;
use crate::query::{IndexSpec, QuerySpec};

/// What a single-document update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The filter selected nothing. Valid, but often a caller mistake.
    NoMatch,
    /// A document matched but already held the requested value.
    Unchanged,
    Modified,
}

impl UpdateOutcome {
    pub const fn status(&self) -> UpdateStatus {
        if self.matched_count == 0 {
            UpdateStatus::NoMatch
        } else if self.modified_count == 0 {
            UpdateStatus::Unchanged
        } else {
            UpdateStatus::Modified
        }
    }
}

/// One open collection. Implementations must not retry; every failure is
/// surfaced to the caller as-is.
#[async_trait]
pub trait BookCollection: Send + Sync {
    /// `database.collection`, for log and report headers
    fn namespace(&self) -> String;

    async fn find(&self, spec: &QuerySpec) -> Result<Vec<Document>>;

    /// Apply `update` to at most one document matching `filter`.
    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateOutcome>;

    /// Delete at most one document matching `filter`; returns the deleted count.
    async fn delete_one(&self, filter: Document) -> Result<u64>;

    async fn insert_many(&self, documents: Vec<Document>) -> Result<usize>;

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>>;

    /// Create the index if missing and return its name.
    async fn create_index(&self, spec: &IndexSpec) -> Result<String>;

    /// Execution statistics for a find with `filter`.
    async fn explain(&self, filter: Document) -> Result<Document>;

    /// Release the underlying connection. Called exactly once per run.
    async fn close(&self);
}
