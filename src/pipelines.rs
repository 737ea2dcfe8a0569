//! Named, versioned aggregation templates.
//!
//! Built-in reports are parameterised by the configured field names; custom
//! reports come from configuration as JSON with `{{placeholder}}` tokens.

use mongodb::bson::{Document, doc};
use std::collections::{HashMap, HashSet};

use crate::config::{CustomReportConfig, ReportFields};
use crate::error::{Result, RunnerError};

/// Find all {{placeholder}} patterns in a template string
fn find_placeholders(template: &str) -> HashSet<String> {
    let mut placeholders = HashSet::new();
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
            i += 2;
            let start = i;
            while i + 1 < bytes.len() {
                if bytes[i] == b'}' && bytes[i + 1] == b'}' {
                    let name = &template[start..i];
                    if !name.is_empty() {
                        placeholders.insert(name.to_string());
                    }
                    i += 2;
                    break;
                }
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    placeholders
}

/// `value` escaped for use inside a JSON string literal, without the quotes.
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Substitute {{placeholder}} patterns; `Err` carries every missing name, sorted.
///
/// Values are escaped as JSON string content, so quotes and backslashes in a
/// field name cannot break the surrounding document.
fn substitute_placeholders(
    template: &str,
    values: &HashMap<String, String>,
) -> std::result::Result<String, Vec<String>> {
    let mut missing: Vec<String> = find_placeholders(template)
        .into_iter()
        .filter(|p| !values.contains_key(p))
        .collect();

    if !missing.is_empty() {
        missing.sort();
        return Err(missing);
    }

    let mut result = template.to_string();
    for (name, value) in values {
        let pattern = format!("{{{{{name}}}}}");
        result = result.replace(&pattern, &json_escape(value));
    }

    Ok(result)
}

fn field_ref(field: &str) -> String {
    format!("${field}")
}

fn avg_price_by_genre(fields: &ReportFields) -> Vec<Document> {
    vec![
        doc! {
            "$group": {
                "_id": field_ref(&fields.genre),
                "averagePrice": { "$avg": field_ref(&fields.price) },
                "count": { "$sum": 1 },
            }
        },
        doc! { "$sort": { "averagePrice": -1 } },
    ]
}

fn most_prolific_author(fields: &ReportFields) -> Vec<Document> {
    vec![
        doc! {
            "$group": {
                "_id": field_ref(&fields.author),
                "bookCount": { "$sum": 1 },
            }
        },
        doc! { "$sort": { "bookCount": -1 } },
        doc! { "$limit": 1 },
    ]
}

fn books_by_decade(fields: &ReportFields) -> Vec<Document> {
    let year = field_ref(&fields.published_year);
    vec![
        doc! {
            "$group": {
                "_id": {
                    "$toInt": {
                        "$multiply": [ { "$floor": { "$divide": [ year, 10 ] } }, 10 ]
                    }
                },
                "count": { "$sum": 1 },
            }
        },
        doc! { "$project": { "_id": 0, "decade": "$_id", "count": 1 } },
        doc! { "$sort": { "decade": 1 } },
    ]
}

#[derive(Debug, Clone)]
enum TemplateBody {
    Builtin(fn(&ReportFields) -> Vec<Document>),
    /// JSON text plus the report's own variables
    Custom {
        pipeline: String,
        variables: HashMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineTemplate {
    pub name: String,
    pub version: u32,
    pub description: String,
    body: TemplateBody,
}

impl PipelineTemplate {
    fn builtin(
        name: &str,
        version: u32,
        description: &str,
        build: fn(&ReportFields) -> Vec<Document>,
    ) -> Self {
        Self {
            name: name.to_string(),
            version,
            description: description.to_string(),
            body: TemplateBody::Builtin(build),
        }
    }

    pub const fn is_builtin(&self) -> bool {
        matches!(self.body, TemplateBody::Builtin(_))
    }

    /// Instantiate the pipeline for `fields`.
    pub fn build(&self, fields: &ReportFields) -> Result<Vec<Document>> {
        match &self.body {
            TemplateBody::Builtin(build) => Ok(build(fields)),
            TemplateBody::Custom {
                pipeline,
                variables,
            } => {
                let mut values = fields.placeholders();
                values.extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));

                let text = substitute_placeholders(pipeline, &values).map_err(|missing| {
                    RunnerError::Config(format!(
                        "report '{}' is missing variables: {}",
                        self.name,
                        missing.join(", ")
                    ))
                })?;

                serde_json::from_str(&text).map_err(|e| {
                    RunnerError::Config(format!(
                        "report '{}' is not a valid pipeline (expected a JSON array of stages): {e}",
                        self.name
                    ))
                })
            }
        }
    }
}

/// Lookup table of report templates, in registration order.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    templates: Vec<PipelineTemplate>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            templates: Vec::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.templates.extend([
            PipelineTemplate::builtin(
                "avg_price_by_genre",
                1,
                "Average price and number of books per genre",
                avg_price_by_genre,
            ),
            PipelineTemplate::builtin(
                "most_prolific_author",
                1,
                "Author with the most books",
                most_prolific_author,
            ),
            PipelineTemplate::builtin(
                "books_by_decade",
                1,
                "Number of books published per decade",
                books_by_decade,
            ),
        ]);
        registry
    }

    /// Register a configured report. Names are unique across the registry,
    /// and the template is checked to build before it is accepted.
    pub fn register_custom(
        &mut self,
        report: &CustomReportConfig,
        fields: &ReportFields,
    ) -> Result<()> {
        if self.get(&report.name).is_some() {
            return Err(RunnerError::Config(format!(
                "report name '{}' is already taken",
                report.name
            )));
        }

        let template = PipelineTemplate {
            name: report.name.clone(),
            version: 1,
            description: report.description.clone(),
            body: TemplateBody::Custom {
                pipeline: report.pipeline.clone(),
                variables: report.variables.clone(),
            },
        };
        template.build(fields)?;

        self.templates.push(template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PipelineTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn build(&self, name: &str, fields: &ReportFields) -> Result<Vec<Document>> {
        self.get(name)
            .ok_or_else(|| RunnerError::UnknownReport {
                name: name.to_string(),
                available: self.list_names().join(", "),
            })?
            .build(fields)
    }

    pub fn templates(&self) -> &[PipelineTemplate] {
        &self.templates
    }

    pub fn list_names(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.name.clone()).collect()
    }
}
