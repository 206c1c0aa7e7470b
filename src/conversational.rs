//! Conversational Responder
//!
//! Handles GENERAL questions with two sequential calls: one to pick a
//! verbosity tier, one to answer under that tier's budget. The answer is
//! cleaned of echoed tier labels. Never fails: any error becomes a fixed
//! apology.

use crate::generation::{GenerationOptions, TextGenerator};
use crate::verbosity::{self, Verbosity};
use regex::{Regex, RegexBuilder};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

pub const APOLOGY: &str = "I'm sorry, I couldn't process your question properly. Please try again.";

pub struct ConversationalResponder {
    generator: Arc<dyn TextGenerator>,
}

impl ConversationalResponder {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn respond(&self, question: &str, context_text: &str) -> String {
        let tier = verbosity::choose(self.generator.as_ref(), question).await;
        let prompt = build_prompt(question, context_text, tier);
        let options = GenerationOptions::conversational(tier.max_output_tokens());

        match self.generator.generate(&prompt, &options).await {
            Ok(raw) => {
                let answer = strip_tier_labels(&raw, tier);
                if answer.is_empty() {
                    warn!("Conversational reply was empty after cleanup");
                    return APOLOGY.to_string();
                }
                info!(tier = ?tier, words = answer.split_whitespace().count(), "Conversational answer generated");
                answer
            }
            Err(e) => {
                warn!(error = %e, "Conversational generation failed");
                APOLOGY.to_string()
            }
        }
    }
}

fn build_prompt(question: &str, context_text: &str, tier: Verbosity) -> String {
    format!(
        r#"You are an assistant for a data analysis application responding to a general query.

Previous conversation context:
{context}

User query: "{question}"

IMPORTANT INSTRUCTIONS:
1. Response length: {length}
2. Format: provide ONLY ONE natural conversational response with no labels or prefixes
3. DO NOT output multiple versions of your response
4. DO NOT prefix your response with "BRIEF:", "MEDIUM:", or "DETAILED:"
5. DO NOT mention anything about response length or formatting in your answer
6. Answer conversationally as if you're having a normal discussion
7. Do not mention the dataset unless the question is ambiguous and specifically about it

Your response:"#,
        context = context_text,
        question = question,
        length = tier.instruction(),
    )
}

fn leading_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(BRIEF|MEDIUM|DETAILED):\s*").expect("Invalid tier label regex")
    })
}

/// Remove echoed tier labels; when several labelled sections come back,
/// keep only the one for `tier`, else the first paragraph.
pub fn strip_tier_labels(raw: &str, tier: Verbosity) -> String {
    let text = leading_label().replace(raw.trim(), "").to_string();

    let lowered = text.to_uppercase();
    if !["BRIEF:", "MEDIUM:", "DETAILED:"]
        .iter()
        .any(|label| lowered.contains(label))
    {
        return text.trim().to_string();
    }

    let section = RegexBuilder::new(&format!(
        r"({}:.*?)(?:BRIEF:|MEDIUM:|DETAILED:|$)",
        tier.label()
    ))
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .build()
    .ok()
    .and_then(|re| re.captures(&text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()));

    match section {
        Some(section) => leading_label().replace(&section, "").trim().to_string(),
        None => text.split("\n\n").next().unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;

    #[test]
    fn test_strips_leading_label() {
        assert_eq!(
            strip_tier_labels("Brief: Machine learning lets computers learn from data.", Verbosity::Brief),
            "Machine learning lets computers learn from data."
        );
    }

    #[test]
    fn test_extracts_matching_section() {
        let raw = "BRIEF: Short answer.\n\nMEDIUM: A longer answer with more words.\n\nDETAILED: Very long.";
        assert_eq!(
            strip_tier_labels(raw, Verbosity::Medium),
            "A longer answer with more words."
        );
    }

    #[test]
    fn test_falls_back_to_first_paragraph() {
        let raw = "Intro paragraph here.\n\nMEDIUM: Other text.";
        assert_eq!(strip_tier_labels(raw, Verbosity::Brief), "Intro paragraph here.");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_tier_labels("  Hello there!  ", Verbosity::Brief), "Hello there!");
    }

    #[tokio::test]
    async fn test_respond_uses_tier_budget() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .reply("Determine if this query requires", "DETAILED")
                .reply("Your response:", "DETAILED: Machine learning is a field of AI."),
        );
        let responder = ConversationalResponder::new(generator.clone());

        let answer = responder.respond("What is machine learning?", "").await;
        assert_eq!(answer, "Machine learning is a field of AI.");

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Maximum 250 words"));
    }

    #[tokio::test]
    async fn test_respond_apologises_on_failure() {
        let generator = Arc::new(ScriptedGenerator::new().reply("Determine if this query requires", "BRIEF"));
        let responder = ConversationalResponder::new(generator);
        assert_eq!(responder.respond("Hi", "").await, APOLOGY);
    }
}
