//! Query Classifier
//!
//! Decides whether a question targets the dataset (DATA_QUERY) or is general
//! dialogue (GENERAL). The backend makes the call; anything other than an
//! exact label, and any backend failure, resolves to GENERAL.

use crate::dataset::Dataset;
use crate::generation::{GenerationOptions, TextGenerator};
use crate::models::QueryType;
use std::sync::Arc;
use tracing::{info, warn};

/// Sample rows shown to the classifier
const SAMPLE_ROWS: usize = 2;

pub struct QueryClassifier {
    generator: Arc<dyn TextGenerator>,
}

impl QueryClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// `context_text` should already be bounded to the last few pairs
    pub async fn classify(&self, question: &str, context_text: &str, dataset: &Dataset) -> QueryType {
        let prompt = build_prompt(question, context_text, dataset);
        let options = GenerationOptions {
            max_output_tokens: 10,
            temperature: 0.0,
            ..GenerationOptions::default()
        };

        let query_type = match self.generator.generate(&prompt, &options).await {
            Ok(reply) => QueryType::from_label(&reply).unwrap_or_else(|| {
                warn!(reply = %reply, "Ambiguous classification, defaulting to GENERAL");
                QueryType::General
            }),
            Err(e) => {
                warn!(error = %e, "Classification failed, defaulting to GENERAL");
                QueryType::General
            }
        };

        info!(query_type = %query_type, "Query classified");
        query_type
    }
}

fn build_prompt(question: &str, context_text: &str, dataset: &Dataset) -> String {
    format!(
        r#"Task: Classify the user's query as either DATA_QUERY or GENERAL.

Available data in the system:
- Table with fields: {fields}
- Sample data (first {rows} rows):
{sample}

Previous conversation context:
{context}

User query: "{question}"

Classification instructions:
1. DATA_QUERY: only if the query explicitly requests information from the table, or is clearly a follow-up to a previous data-related question
2. GENERAL: if the query is a general knowledge question, a greeting or casual conversation, or is about something unrelated to the table contents
3. When in doubt or if the query is ambiguous, classify as GENERAL

Examples:
- "What is machine learning?" -> GENERAL
- "What's the average salary?" -> DATA_QUERY
- "Tell me about natural language processing" -> GENERAL
- "How many employees are in the IT department?" -> DATA_QUERY

Respond with ONLY one of these exact strings: DATA_QUERY or GENERAL"#,
        fields = dataset.field_names().join(", "),
        rows = SAMPLE_ROWS,
        sample = dataset.head_text(SAMPLE_ROWS),
        context = context_text,
        question = question,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{fallback_frame, DatasetOrigin};
    use crate::error::PipelineError;
    use crate::generation::ScriptedGenerator;
    use async_trait::async_trait;

    fn dataset() -> Dataset {
        Dataset::new(fallback_frame(), DatasetOrigin::Memory)
    }

    async fn classify_with(reply: &str) -> QueryType {
        let generator = Arc::new(ScriptedGenerator::new().otherwise(reply));
        QueryClassifier::new(generator)
            .classify("What's the average salary?", "", &dataset())
            .await
    }

    #[tokio::test]
    async fn test_exact_labels() {
        assert_eq!(classify_with("DATA_QUERY").await, QueryType::DataQuery);
        assert_eq!(classify_with("  GENERAL\n").await, QueryType::General);
    }

    #[tokio::test]
    async fn test_unexpected_output_defaults_to_general() {
        for reply in ["DATA_ANALYSIS", "data_query", "It is a DATA_QUERY", "\"DATA_QUERY\""] {
            assert_eq!(classify_with(reply).await, QueryType::General, "reply: {}", reply);
        }
    }

    struct Failing;

    #[async_trait]
    impl TextGenerator for Failing {
        async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> crate::Result<String> {
            Err(PipelineError::Generation("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_defaults_to_general() {
        let classifier = QueryClassifier::new(Arc::new(Failing));
        assert_eq!(
            classifier.classify("How many rows?", "", &dataset()).await,
            QueryType::General
        );
    }

    #[tokio::test]
    async fn test_prompt_carries_schema_sample_and_context() {
        let generator = Arc::new(ScriptedGenerator::new().otherwise("GENERAL"));
        QueryClassifier::new(generator.clone())
            .classify("And the highest?", "User: avg salary?\nSystem: 72500", &dataset())
            .await;

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("EmployeeID, Department, Salary, Experience, Performance"));
        assert!(prompt.contains("Employee_2"));
        assert!(!prompt.contains("Employee_3"));
        assert!(prompt.contains("System: 72500"));
    }
}
