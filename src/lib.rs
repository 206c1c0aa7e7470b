//! Tabular Query Orchestrator
//!
//! Answers natural-language questions about a tabular dataset:
//! - Classifies each question as a data query or general dialogue
//! - Compiles data questions into one restricted expression over `df`
//! - Rejects unsafe expressions, evaluates the rest in a sandboxed interpreter
//! - Explains results in plain language at an adaptive length
//! - Keeps durable, per-session conversation memory with TTL maintenance
//!
//! PIPELINE:
//! QUESTION → CLASSIFY → (RESPOND) | (COMPILE → FILTER → EXECUTE → EXPLAIN) → RECORD

pub mod agent;
pub mod api;
pub mod classifier;
pub mod compiler;
pub mod config;
pub mod conversational;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod explanation;
pub mod gemini;
pub mod generation;
pub mod maintenance;
pub mod memory;
pub mod models;
pub mod safety;
pub mod verbosity;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use models::*;
