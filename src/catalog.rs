//! The fixed catalog: every step, in order, rendered as it completes.

use chrono::Local;
use mongodb::bson::doc;
use std::io::Write;
use std::time::Instant;

use crate::config::{CatalogConfig, ReportFields};
use crate::connection::BookCollection;
use crate::error::Result;
use crate::pipelines::PipelineRegistry;
use crate::query::{ComparisonOp, Predicate};
use crate::report::{ExplainSummary, Reporter};
use crate::runner::QueryRunner;
use crate::seed::sample_books;

/// Inputs for one run of the catalog.
pub struct CatalogRun<'a> {
    pub catalog: &'a CatalogConfig,
    pub fields: &'a ReportFields,
    pub registry: &'a PipelineRegistry,
    /// Insert the sample books before the first step
    pub seed: bool,
}

/// Run the catalog against `collection`, then close it whatever the outcome.
pub async fn run_scoped<W: Write>(
    collection: &dyn BookCollection,
    run: &CatalogRun<'_>,
    reporter: &mut Reporter<W>,
) -> Result<()> {
    let result = run_catalog(collection, run, reporter).await;
    collection.close().await;
    result
}

async fn run_catalog<W: Write>(
    collection: &dyn BookCollection,
    run: &CatalogRun<'_>,
    reporter: &mut Reporter<W>,
) -> Result<()> {
    let CatalogRun {
        catalog,
        fields,
        registry,
        seed,
    } = *run;
    let runner = QueryRunner::new(collection, registry, fields);
    let started = Instant::now();

    reporter.banner(&runner.namespace(), Local::now())?;

    reporter.section("Basic CRUD")?;
    if seed {
        let inserted = runner.seed(sample_books(fields)).await?;
        reporter.inserted("Insert sample books", inserted)?;
    }

    let found = runner.find_by_field(&fields.genre, catalog.genre.as_str()).await?;
    reporter.documents(
        &format!("Books where {} = '{}'", fields.genre, catalog.genre),
        &found,
    )?;

    let found = runner
        .find_by_comparison(&fields.published_year, ComparisonOp::Gt, catalog.published_after)
        .await?;
    reporter.documents(
        &format!(
            "Books where {} > {}",
            fields.published_year, catalog.published_after
        ),
        &found,
    )?;

    let outcome = runner
        .update_field(
            doc! { fields.title.as_str(): catalog.update_title.as_str() },
            &fields.price,
            catalog.update_price,
        )
        .await?;
    reporter.updated(
        &format!(
            "Set {} of '{}' to {}",
            fields.price, catalog.update_title, catalog.update_price
        ),
        &outcome,
    )?;

    let deleted = runner
        .delete_by_field(&fields.title, catalog.delete_title.as_str())
        .await?;
    reporter.deleted(&format!("Delete '{}'", catalog.delete_title), deleted)?;

    reporter.section("Advanced queries")?;
    let found = runner
        .find_compound(&[
            (fields.genre.clone(), Predicate::eq(catalog.genre.as_str())),
            (fields.in_stock.clone(), Predicate::eq(true)),
            (
                fields.price.clone(),
                Predicate::compare(ComparisonOp::Lt, catalog.max_price),
            ),
        ])
        .await?;
    reporter.documents(
        &format!(
            "In-stock '{}' books under {}",
            catalog.genre, catalog.max_price
        ),
        &found,
    )?;

    let projected = runner.project(&catalog.projection).await?;
    reporter.documents(
        &format!("Projection of {}", catalog.projection.join(", ")),
        &projected,
    )?;

    let sorted = runner
        .sorted_scan(&fields.published_year, catalog.sort_direction)
        .await?;
    reporter.documents(
        &format!(
            "All books by {} {}",
            fields.published_year,
            catalog.sort_direction.label()
        ),
        &sorted,
    )?;

    for &page in &catalog.pages {
        let documents = runner.paginate(catalog.page_size, page).await?;
        reporter.documents(
            &format!("Page {} (page size {})", page, catalog.page_size),
            &documents,
        )?;
    }

    reporter.section("Aggregation reports")?;
    for template in registry.templates() {
        let rows = runner.run_report(&template.name).await?;
        reporter.documents(
            &format!(
                "{} v{}: {}",
                template.name, template.version, template.description
            ),
            &rows,
        )?;
    }

    reporter.section("Indexes")?;
    for index in &catalog.indexes {
        let name = runner.ensure_index(index).await?;
        reporter.index(index, &name)?;
    }

    let stats = runner
        .explain(doc! { fields.genre.as_str(): catalog.genre.as_str() })
        .await?;
    reporter.explain(
        &format!("Explain find where {} = '{}'", fields.genre, catalog.genre),
        &ExplainSummary::from_explain(&stats),
    )?;

    reporter.finish(started.elapsed())?;
    tracing::info!("Catalog completed in {:.2?}", started.elapsed());
    Ok(())
}
