//! Console rendering of catalog results.

use chrono::{DateTime, Local};
use mongodb::bson::{Bson, Document};
use std::io::{self, Write};
use std::time::Duration;

use crate::connection::{UpdateOutcome, UpdateStatus};
use crate::query::IndexSpec;

/// Condensed view of an `explain` result with `executionStats` verbosity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainSummary {
    /// Winning plan stages from the root down, e.g. `FETCH > IXSCAN`
    pub plan: String,
    pub returned: i64,
    pub keys_examined: i64,
    pub docs_examined: i64,
    pub millis: i64,
}

fn number(document: &Document, key: &str) -> i64 {
    match document.get(key) {
        Some(Bson::Int32(v)) => i64::from(*v),
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}

impl ExplainSummary {
    pub fn from_explain(explain: &Document) -> Self {
        let winning_plan = explain
            .get_document("queryPlanner")
            .and_then(|planner| planner.get_document("winningPlan"))
            .ok();
        // Slot-based engine output nests the classic plan under `queryPlan`
        let winning_plan = winning_plan
            .and_then(|plan| plan.get_document("queryPlan").ok().or(Some(plan)));

        let mut stages = Vec::new();
        let mut current = winning_plan;
        while let Some(stage) = current {
            if let Ok(name) = stage.get_str("stage") {
                stages.push(name.to_string());
            }
            current = stage.get_document("inputStage").ok();
        }

        let stats = explain.get_document("executionStats").ok();
        let stat = |key: &str| stats.map_or(0, |s| number(s, key));

        Self {
            plan: if stages.is_empty() {
                "unknown".to_string()
            } else {
                stages.join(" > ")
            },
            returned: stat("nReturned"),
            keys_examined: stat("totalKeysExamined"),
            docs_examined: stat("totalDocsExamined"),
            millis: stat("executionTimeMillis"),
        }
    }
}

/// Writes one block per catalog step.
pub struct Reporter<W: Write> {
    out: W,
    step: usize,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, step: 0 }
    }

    #[allow(dead_code)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn heading(&mut self, title: &str) -> io::Result<()> {
        self.step += 1;
        writeln!(self.out, "[{}] {}", self.step, title)
    }

    pub fn banner(&mut self, namespace: &str, started_at: DateTime<Local>) -> io::Result<()> {
        writeln!(
            self.out,
            "Catalog run against {} started {}",
            namespace,
            started_at.format("%Y-%m-%d %H:%M:%S %Z")
        )?;
        writeln!(self.out)
    }

    pub fn section(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.out, "=== {title} ===")?;
        writeln!(self.out)
    }

    pub fn documents(&mut self, title: &str, documents: &[Document]) -> io::Result<()> {
        self.heading(title)?;
        if documents.is_empty() {
            writeln!(self.out, "  (no documents)")?;
        } else {
            for document in documents {
                let json = Bson::Document(document.clone()).into_relaxed_extjson();
                writeln!(self.out, "  {json}")?;
            }
            let plural = if documents.len() == 1 { "" } else { "s" };
            writeln!(self.out, "  {} document{}", documents.len(), plural)?;
        }
        writeln!(self.out)
    }

    pub fn inserted(&mut self, title: &str, count: usize) -> io::Result<()> {
        self.heading(title)?;
        writeln!(self.out, "  inserted: {count}")?;
        writeln!(self.out)
    }

    pub fn updated(&mut self, title: &str, outcome: &UpdateOutcome) -> io::Result<()> {
        self.heading(title)?;
        let note = match outcome.status() {
            UpdateStatus::NoMatch => " (no document matched the filter)",
            UpdateStatus::Unchanged => " (document already had this value)",
            UpdateStatus::Modified => "",
        };
        writeln!(
            self.out,
            "  matched: {}, modified: {}{}",
            outcome.matched_count, outcome.modified_count, note
        )?;
        writeln!(self.out)
    }

    pub fn deleted(&mut self, title: &str, count: u64) -> io::Result<()> {
        self.heading(title)?;
        let note = if count == 0 {
            " (no document matched the filter)"
        } else {
            ""
        };
        writeln!(self.out, "  deleted: {count}{note}")?;
        writeln!(self.out)
    }

    pub fn index(&mut self, spec: &IndexSpec, name: &str) -> io::Result<()> {
        self.heading(&format!("Ensure index on {}", spec.keys()))?;
        writeln!(self.out, "  index name: {name}")?;
        writeln!(self.out)
    }

    pub fn explain(&mut self, title: &str, summary: &ExplainSummary) -> io::Result<()> {
        self.heading(title)?;
        writeln!(self.out, "  plan: {}", summary.plan)?;
        writeln!(
            self.out,
            "  returned: {}, keys examined: {}, documents examined: {}, time: {} ms",
            summary.returned, summary.keys_examined, summary.docs_examined, summary.millis
        )?;
        writeln!(self.out)
    }

    pub fn finish(&mut self, elapsed: Duration) -> io::Result<()> {
        writeln!(
            self.out,
            "Completed {} operations in {:.2?}",
            self.step, elapsed
        )?;
        self.out.flush()
    }
}
