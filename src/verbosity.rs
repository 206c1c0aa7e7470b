//! Verbosity tiers
//!
//! Both the conversational responder and the explanation composer pick a
//! tier per question before generating, then generate under its budget.

use crate::generation::{GenerationOptions, TextGenerator};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verbosity {
    Brief,
    Medium,
    Detailed,
}

impl Verbosity {
    /// Parse a backend reply; anything unexpected is BRIEF
    pub fn parse(reply: &str) -> Self {
        match reply.trim().to_uppercase().as_str() {
            "BRIEF" => Verbosity::Brief,
            "MEDIUM" => Verbosity::Medium,
            "DETAILED" => Verbosity::Detailed,
            other => {
                warn!(reply = %other, "Unexpected verbosity tier, defaulting to BRIEF");
                Verbosity::Brief
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verbosity::Brief => "BRIEF",
            Verbosity::Medium => "MEDIUM",
            Verbosity::Detailed => "DETAILED",
        }
    }

    pub fn max_words(&self) -> usize {
        match self {
            Verbosity::Brief => 50,
            Verbosity::Medium => 100,
            Verbosity::Detailed => 250,
        }
    }

    pub fn max_output_tokens(&self) -> u32 {
        match self {
            Verbosity::Brief => 75,
            Verbosity::Medium => 150,
            Verbosity::Detailed => 300,
        }
    }

    /// Length instruction placed in conversational prompts
    pub fn instruction(&self) -> String {
        let shape = match self {
            Verbosity::Brief => "Provide a brief, concise response of 1-2 sentences only.",
            Verbosity::Medium => "Provide a moderately detailed response of 3-5 sentences only.",
            Verbosity::Detailed => {
                "Provide a comprehensive, detailed response with thorough information."
            }
        };
        format!("{} Maximum {} words.", shape, self.max_words())
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn tier_prompt(question: &str) -> String {
    format!(
        r#"Analyze this question: "{question}"

Determine if this query requires:
1. A brief, direct answer (1-2 sentences)
2. A medium-length answer (3-5 sentences)
3. A detailed, comprehensive response (multiple paragraphs)

Return ONLY one of these options without explanation: "BRIEF", "MEDIUM", or "DETAILED""#
    )
}

/// Ask the backend for a tier; generation failures also resolve to BRIEF
pub async fn choose(generator: &dyn TextGenerator, question: &str) -> Verbosity {
    let options = GenerationOptions {
        max_output_tokens: 10,
        ..GenerationOptions::default()
    };
    let tier = match generator.generate(&tier_prompt(question), &options).await {
        Ok(reply) => Verbosity::parse(reply.trim_matches('"')),
        Err(e) => {
            warn!(error = %e, "Verbosity selection failed, defaulting to BRIEF");
            Verbosity::Brief
        }
    };
    info!(tier = ?tier, "Verbosity tier selected");
    tier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;

    #[test]
    fn test_parse_defaults_to_brief() {
        assert_eq!(Verbosity::parse(" detailed\n"), Verbosity::Detailed);
        assert_eq!(Verbosity::parse("MEDIUM"), Verbosity::Medium);
        assert_eq!(Verbosity::parse("LONG"), Verbosity::Brief);
        assert_eq!(Verbosity::parse(""), Verbosity::Brief);
    }

    #[test]
    fn test_budgets() {
        assert_eq!(Verbosity::Brief.max_output_tokens(), 75);
        assert_eq!(Verbosity::Detailed.max_words(), 250);
        assert!(Verbosity::Medium.instruction().contains("Maximum 100 words"));
    }

    #[tokio::test]
    async fn test_choose_strips_quotes() {
        let generator = ScriptedGenerator::new().reply("Determine if this query requires", "\"MEDIUM\"");
        assert_eq!(choose(&generator, "Compare departments").await, Verbosity::Medium);
    }

    #[tokio::test]
    async fn test_choose_on_failure_is_brief() {
        let generator = ScriptedGenerator::new();
        assert_eq!(choose(&generator, "anything").await, Verbosity::Brief);
    }
}
