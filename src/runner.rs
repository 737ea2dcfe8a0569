//! Catalog operations over one books collection.

use mongodb::bson::{Bson, Document, doc};

use crate::config::ReportFields;
use crate::connection::{BookCollection, UpdateOutcome, UpdateStatus};
use crate::error::{Result, RunnerError};
use crate::pipelines::PipelineRegistry;
use crate::query::{
    ComparisonOp, IndexSpec, Page, Predicate, QuerySpec, SortDirection, compound_filter,
    inclusion_projection,
};

/// Issues queries, updates, aggregations and index commands against one
/// collection. Holds no state of its own between calls.
pub struct QueryRunner<'a> {
    collection: &'a dyn BookCollection,
    registry: &'a PipelineRegistry,
    fields: &'a ReportFields,
}

impl<'a> QueryRunner<'a> {
    pub fn new(
        collection: &'a dyn BookCollection,
        registry: &'a PipelineRegistry,
        fields: &'a ReportFields,
    ) -> Self {
        Self {
            collection,
            registry,
            fields,
        }
    }

    pub fn namespace(&self) -> String {
        self.collection.namespace()
    }

    pub async fn seed(&self, documents: Vec<Document>) -> Result<usize> {
        let inserted = self.collection.insert_many(documents).await?;
        tracing::info!("Inserted {} sample documents", inserted);
        Ok(inserted)
    }

    pub async fn find_by_field(&self, field: &str, value: impl Into<Bson>) -> Result<Vec<Document>> {
        self.find_compound(&[(field.to_string(), Predicate::eq(value))])
            .await
    }

    pub async fn find_by_comparison(
        &self,
        field: &str,
        op: ComparisonOp,
        value: impl Into<Bson>,
    ) -> Result<Vec<Document>> {
        self.find_compound(&[(field.to_string(), Predicate::compare(op, value))])
            .await
    }

    /// Set `field` to `new_value` on the first document matching `filter`.
    pub async fn update_field(
        &self,
        filter: Document,
        field: &str,
        new_value: impl Into<Bson>,
    ) -> Result<UpdateOutcome> {
        let new_value: Bson = new_value.into();
        let update = doc! { "$set": { field: new_value } };
        let outcome = self.collection.update_one(filter.clone(), update).await?;

        match outcome.status() {
            UpdateStatus::NoMatch => {
                tracing::warn!("Update of '{}' matched no document for {}", field, filter);
            }
            UpdateStatus::Unchanged => {
                tracing::info!("Update of '{}' left the document unchanged", field);
            }
            UpdateStatus::Modified => {
                tracing::info!("Updated '{}' on {} document", field, outcome.modified_count);
            }
        }
        Ok(outcome)
    }

    pub async fn delete_by_field(&self, field: &str, value: impl Into<Bson>) -> Result<u64> {
        let value: Bson = value.into();
        let filter = doc! { field: value };
        let deleted = self.collection.delete_one(filter.clone()).await?;
        if deleted == 0 {
            tracing::warn!("Delete matched no document for {}", filter);
        } else {
            tracing::info!("Deleted {} document", deleted);
        }
        Ok(deleted)
    }

    pub async fn find_compound(&self, filters: &[(String, Predicate)]) -> Result<Vec<Document>> {
        let spec = QuerySpec::filter(compound_filter(filters));
        self.collection.find(&spec).await
    }

    /// All documents, reduced to `fields` (`_id` only when asked for).
    pub async fn project<S: AsRef<str>>(&self, fields: &[S]) -> Result<Vec<Document>> {
        // An empty inclusion list would leave only `{_id: 0}`, which excludes
        // instead of includes
        if fields.is_empty() {
            return Err(RunnerError::InvalidArgument(
                "projection needs at least one field".to_string(),
            ));
        }
        let spec = QuerySpec::default().with_projection(inclusion_projection(fields));
        self.collection.find(&spec).await
    }

    pub async fn sorted_scan(&self, field: &str, direction: SortDirection) -> Result<Vec<Document>> {
        let spec = QuerySpec::default().with_sort(field, direction);
        self.collection.find(&spec).await
    }

    /// One page of the collection in natural order. A page past the end is empty.
    pub async fn paginate(&self, page_size: u64, page_number: u64) -> Result<Vec<Document>> {
        let page = Page::new(page_size, page_number)?;
        tracing::debug!(
            "Page {}: skip {} limit {}",
            page.number(),
            page.skip(),
            page.limit()
        );
        self.collection
            .find(&QuerySpec::default().with_page(page))
            .await
    }

    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        self.collection.aggregate(pipeline).await
    }

    /// Build the named template for the configured fields and aggregate it.
    pub async fn run_report(&self, name: &str) -> Result<Vec<Document>> {
        let pipeline = self.registry.build(name, self.fields)?;
        tracing::info!("Running report '{}' ({} stages)", name, pipeline.len());
        self.aggregate(pipeline).await
    }

    pub async fn ensure_index(&self, spec: &IndexSpec) -> Result<String> {
        let name = self.collection.create_index(spec).await?;
        tracing::info!("Index '{}' is in place", name);
        Ok(name)
    }

    pub async fn explain(&self, filter: Document) -> Result<Document> {
        self.collection.explain(filter).await
    }
}
