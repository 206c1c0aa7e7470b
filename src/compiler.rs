//! Query Compiler
//!
//! Turns a data question into one expression over `df`, in two stages:
//! 1. resolve the user's wording to exact field names (backend mapping,
//!    topped up by a local resolver),
//! 2. generate the expression from schema, sample, mapping and context.

use crate::dataset::Dataset;
use crate::error::PipelineError;
use crate::generation::{GenerationOptions, TextGenerator};
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SAMPLE_ROWS: usize = 3;

/// User term → exact field name
pub type FieldMapping = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub expression: String,
    pub mapping: FieldMapping,
}

pub struct QueryCompiler {
    generator: Arc<dyn TextGenerator>,
}

impl QueryCompiler {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn compile(
        &self,
        question: &str,
        context_text: &str,
        last_result: Option<&Value>,
        dataset: &Dataset,
    ) -> Result<CompiledQuery> {
        let fields = dataset.field_names();
        let mapping = self.resolve_fields(question, &fields).await;

        let prompt = expression_prompt(question, context_text, last_result, dataset, &mapping);
        let options = GenerationOptions {
            max_output_tokens: 256,
            temperature: 0.1,
            ..GenerationOptions::default()
        };
        let reply = self.generator.generate(&prompt, &options).await?;
        let expression = normalize_expression(&reply);

        if expression.is_empty() {
            return Err(PipelineError::Generation(
                "backend returned an empty expression".to_string(),
            ));
        }

        info!(expression = %expression, "Generated expression");
        Ok(CompiledQuery {
            expression,
            mapping,
        })
    }

    async fn resolve_fields(&self, question: &str, fields: &[String]) -> FieldMapping {
        let prompt = mapping_prompt(question, fields);
        let options = GenerationOptions {
            max_output_tokens: 200,
            temperature: 0.0,
            ..GenerationOptions::default()
        };

        let mut mapping = match self.generator.generate(&prompt, &options).await {
            Ok(reply) => parse_mapping(&reply, fields),
            Err(e) => {
                warn!(error = %e, "Field mapping generation failed, using local resolver only");
                FieldMapping::new()
            }
        };

        for (term, field) in local_mapping(question, fields) {
            mapping.entry(term).or_insert(field);
        }
        debug!(?mapping, "Resolved field references");
        mapping
    }
}

fn mapping_prompt(question: &str, fields: &[String]) -> String {
    format!(
        r#"User question: "{question}"

Table fields: {fields}

Task: identify every field reference in the user's question and map it to the EXACT field name.

Consider these variations:
1. Singular vs plural forms (e.g., "sale" -> "Sales")
2. Case differences (e.g., "department" -> "Department")
3. Synonyms or related terms (e.g., "workers" -> "EmployeeID")
4. Misspellings or typos (e.g., "performence" -> "Performance")

Return a JSON object with mappings from user terms to field names.
Example: {{"sale": "Sales", "workers": "EmployeeID"}}

Return only the JSON object, nothing else."#,
        question = question,
        fields = fields.join(", "),
    )
}

fn expression_prompt(
    question: &str,
    context_text: &str,
    last_result: Option<&Value>,
    dataset: &Dataset,
    mapping: &FieldMapping,
) -> String {
    let (rows, cols) = dataset.shape();
    let dtypes = dataset
        .dtypes()
        .into_iter()
        .map(|(name, dtype)| format!("{}: {}", name, dtype))
        .collect::<Vec<_>>()
        .join(", ");
    let previous = last_result
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string());
    let mapping_json = serde_json::to_string(mapping).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"Table Analysis Task:

Table 'df' specifications:
- Dimensions: {rows} rows x {cols} columns
- Fields and types: {dtypes}
- Sample data (first {sample_rows} rows):
{sample}

Previous context:
{context}
Previous result: {previous}

User question: "{question}"

Field mapping: {mapping}

Instructions:
1. Return EXACTLY ONE pandas-style expression over 'df'; no assignments, no statements, no imports
2. Use only: column access df['Field'], boolean filters combined with & and |, .loc/.iloc,
   head, tail, sort_values, nlargest, nsmallest, groupby, drop_duplicates, dropna, reset_index,
   sum, mean, median, min, max, std, count, nunique, size, agg, idxmax, idxmin, value_counts,
   unique, tolist, round, abs, isin, between, isna, notna, fillna, .str.contains/startswith/endswith/lower/upper,
   len, and shape
3. Use the EXACT field names from the table, never the user's variations
4. Do not refer to variables or results from earlier turns; recompute from df
5. Handle missing values appropriately

Generate ONLY the expression, without explanations or comments."#,
        rows = rows,
        cols = cols,
        dtypes = dtypes,
        sample_rows = SAMPLE_ROWS,
        sample = dataset.head_text(SAMPLE_ROWS),
        context = context_text,
        previous = previous,
        question = question,
        mapping = mapping_json,
    )
}

/// Remove markdown code fences and wrapping backticks
pub fn strip_fences(reply: &str) -> String {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // drop the language tag on the opening fence line
        text = match rest.find('\n') {
            Some(newline) if !rest[..newline].trim().contains(' ') => &rest[newline + 1..],
            _ => rest,
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim().trim_matches('`').trim().to_string()
}

pub fn normalize_expression(reply: &str) -> String {
    strip_fences(reply)
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// Keep only mappings whose target is an exact field name
fn parse_mapping(reply: &str, fields: &[String]) -> FieldMapping {
    match serde_json::from_str::<serde_json::Map<String, Value>>(&strip_fences(reply)) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(term, target)| match target {
                Value::String(field) if fields.contains(&field) => Some((term, field)),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Field mapping reply was not a JSON object");
            FieldMapping::new()
        }
    }
}

/// Case, singular/plural and one-typo matches between question words and fields
pub fn local_mapping(question: &str, fields: &[String]) -> FieldMapping {
    let mut mapping = FieldMapping::new();
    let words = question
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 1);

    for word in words {
        let lowered = word.to_lowercase();
        let best = fields.iter().find(|field| {
            let target = field.to_lowercase();
            lowered == target
                || singular(&lowered) == singular(&target)
                || (lowered.len() >= 5 && edit_distance(&lowered, &target) <= 1)
        });
        if let Some(field) = best {
            if word != field.as_str() {
                mapping.insert(word.to_string(), field.clone());
            }
        }
    }
    mapping
}

fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if word.ends_with("ses") || word.ends_with("xes") {
        word[..word.len() - 2].to_string()
    } else if word.ends_with('s') && !word.ends_with("ss") && word.len() > 3 {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}
