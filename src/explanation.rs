//! Explanation Composer
//!
//! Turns a shaped result into a direct, human-sounding answer. The verbosity
//! tier is chosen per question, independently of the conversational path.

use crate::generation::{GenerationOptions, TextGenerator};
use crate::models::QueryResult;
use crate::verbosity::{self, Verbosity};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ExplanationComposer {
    generator: Arc<dyn TextGenerator>,
}

impl ExplanationComposer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Falls back to the plain result rendering if generation fails
    pub async fn explain(&self, question: &str, result: &QueryResult) -> String {
        let rendered = result.render();
        let tier = verbosity::choose(self.generator.as_ref(), question).await;
        let prompt = build_prompt(question, &rendered, tier);
        let options = GenerationOptions {
            max_output_tokens: tier.max_output_tokens(),
            ..GenerationOptions::default()
        };

        match self.generator.generate(&prompt, &options).await {
            Ok(answer) if !answer.trim().is_empty() => {
                info!(tier = ?tier, "Explanation generated");
                answer.trim().to_string()
            }
            Ok(_) => {
                warn!("Empty explanation, returning raw result");
                rendered
            }
            Err(e) => {
                warn!(error = %e, "Explanation generation failed, returning raw result");
                rendered
            }
        }
    }
}

fn length_guidance(tier: Verbosity) -> &'static str {
    match tier {
        Verbosity::Brief => "Keep your answer to 1-2 short sentences.",
        Verbosity::Medium => "Keep your answer to 3-4 sentences.",
        Verbosity::Detailed => "Provide a thorough answer of 5-6 sentences.",
    }
}

fn build_prompt(question: &str, rendered: &str, tier: Verbosity) -> String {
    format!(
        r#"Question: {question}
Data result: {rendered}

Answer the question directly as if you already knew the information.
Rules:
- State the answer plainly and include the actual number or values from the result
- Do not describe how the answer was calculated
- Do not mention tables, dataframes, columns, fields, or code
- Do not mention limitations of the data or analysis
- {length}

Answer:"#,
        question = question,
        rendered = rendered,
        length = length_guidance(tier),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;
    use serde_json::json;

    #[tokio::test]
    async fn test_explanation_uses_result_and_tier() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .reply("Determine if this query requires", "MEDIUM")
                .reply("Data result:", "The average salary is 72,500."),
        );
        let composer = ExplanationComposer::new(generator.clone());

        let answer = composer
            .explain("What's the average salary?", &QueryResult::Scalar(json!(72500.0)))
            .await;
        assert_eq!(answer, "The average salary is 72,500.");

        let prompts = generator.prompts();
        assert!(prompts[1].contains("Data result: 72500.0"));
        assert!(prompts[1].contains("3-4 sentences"));
    }

    #[tokio::test]
    async fn test_falls_back_to_rendered_result() {
        let generator = Arc::new(ScriptedGenerator::new());
        let composer = ExplanationComposer::new(generator);

        let answer = composer
            .explain("How many?", &QueryResult::Scalar(json!(10)))
            .await;
        assert_eq!(answer, "10");
    }
}
