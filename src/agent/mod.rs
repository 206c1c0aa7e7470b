//! Main orchestrator - routes each question through the pipeline
//!
//! QUESTION → CLASSIFY → (RESPOND) | (COMPILE → FILTER → EXECUTE → EXPLAIN) → RECORD

use crate::classifier::QueryClassifier;
use crate::compiler::QueryCompiler;
use crate::config::Settings;
use crate::conversational::ConversationalResponder;
use crate::dataset::{Dataset, DatasetOrigin, DatasetProvider};
use crate::error::PipelineError;
use crate::execution::ExecutionEngine;
use crate::explanation::ExplanationComposer;
use crate::generation::{GenerationPool, TextGenerator};
use crate::maintenance::{MaintenanceReport, SessionMaintenance};
use crate::memory::{
    export, AssistantReply, BackupReport, ConversationContext, Export, ExportFormat,
    FileSessionStore, ListQuery, Metadata, Session, SessionStore, SessionSummary,
};
use crate::models::{DebugInfo, QueryResponse, QueryType, ResponseSource};
use crate::safety;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Pairs of recent conversation fed into every prompt
const CONTEXT_PAIRS: usize = 3;

pub const REFUSAL: &str = "I cannot process this query as it might involve unsafe operations.";

/// One page of `list_sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub origin: DatasetOrigin,
    pub rows: usize,
    pub columns: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub sessions_count: usize,
    pub session_ids: Vec<String>,
    pub persisted_sessions_count: usize,
    pub dataset: DatasetInfo,
    pub system_time: DateTime<Utc>,
}

/// Assistant side of a data turn plus its debug trail
struct DataOutcome {
    reply: AssistantReply,
    source: ResponseSource,
    debug: DebugInfo,
}

impl DataOutcome {
    fn failed(answer: String, expression: Option<String>) -> Self {
        Self {
            reply: AssistantReply::failed(&answer),
            source: ResponseSource::Error,
            debug: DebugInfo {
                expression,
                raw_result: None,
            },
        }
    }
}

pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn SessionStore>,
    dataset: Arc<DatasetProvider>,
    classifier: QueryClassifier,
    responder: ConversationalResponder,
    compiler: QueryCompiler,
    engine: ExecutionEngine,
    composer: ExplanationComposer,
    maintenance: Arc<SessionMaintenance>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        store: Arc<dyn SessionStore>,
        dataset: Arc<DatasetProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let pool: Arc<dyn TextGenerator> =
            Arc::new(GenerationPool::new(generator, settings.generation_workers));
        let maintenance = Arc::new(SessionMaintenance::new(
            Arc::clone(&store),
            settings.idle_timeout(),
            settings.retention(),
            settings.maintenance_cadence(),
        ));

        Self {
            classifier: QueryClassifier::new(Arc::clone(&pool)),
            responder: ConversationalResponder::new(Arc::clone(&pool)),
            compiler: QueryCompiler::new(Arc::clone(&pool)),
            composer: ExplanationComposer::new(pool),
            engine: ExecutionEngine::new(),
            settings,
            store,
            dataset,
            maintenance,
        }
    }

    /// File-backed store and CSV dataset at the configured paths
    pub fn from_settings(settings: Settings, generator: Arc<dyn TextGenerator>) -> Result<Self> {
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::open(&settings.storage_dir)?);
        let dataset = Arc::new(DatasetProvider::new(settings.dataset_path.clone()));
        Ok(Self::new(settings, store, dataset, generator))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn maintenance(&self) -> Arc<SessionMaintenance> {
        Arc::clone(&self.maintenance)
    }

    // =============================
    // Query pipeline
    // =============================

    pub async fn submit_query(&self, question: &str, session_id: Option<&str>) -> Result<QueryResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidInput("Query cannot be empty".to_string()));
        }
        let session_id = match session_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        self.maintenance.on_request();

        let mut context =
            ConversationContext::load(self.store.as_ref(), &session_id, self.settings.max_history)?;
        let context_text = context.recent_text(CONTEXT_PAIRS);
        let dataset = self.dataset.get();

        let query_type = self.classifier.classify(question, &context_text, &dataset).await;
        info!(
            session_id = %session_id,
            query_type = %query_type,
            question = %question.chars().take(50).collect::<String>(),
            "Processing query"
        );

        let (answer, source, debug) = match query_type {
            QueryType::General => {
                let answer = self.responder.respond(question, &context_text).await;
                context.add_turn(question, AssistantReply::conversation(&answer));
                (answer, ResponseSource::Conversation, None)
            }
            QueryType::DataQuery => {
                let last_result = context.context().last_result.clone();
                let outcome = self
                    .answer_data_question(question, &context_text, last_result.as_ref(), &dataset)
                    .await;
                let answer = outcome.reply.text.clone();
                context.add_turn(question, outcome.reply);
                (answer, outcome.source, Some(outcome.debug))
            }
        };

        context.persist(self.store.as_ref())?;

        Ok(QueryResponse {
            answer,
            source,
            session_id,
            debug: if self.settings.development { debug } else { None },
        })
    }

    async fn answer_data_question(
        &self,
        question: &str,
        context_text: &str,
        last_result: Option<&Value>,
        dataset: &Dataset,
    ) -> DataOutcome {
        let compiled = match self
            .compiler
            .compile(question, context_text, last_result, dataset)
            .await
        {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(error = %e, "Query compilation failed");
                return DataOutcome::failed(format!("Error processing query: {}", e), None);
            }
        };
        let expression = compiled.expression;

        if let Err(e) = safety::check(&expression) {
            info!(reason = %e, "Refusing generated expression");
            return DataOutcome::failed(REFUSAL.to_string(), Some(expression));
        }

        match self.engine.execute(&expression, dataset) {
            Ok(result) => {
                let answer = self.composer.explain(question, &result).await;
                let raw = result.to_json();
                DataOutcome {
                    reply: AssistantReply::data(&answer, raw.clone()),
                    source: ResponseSource::Dataframe,
                    debug: DebugInfo {
                        expression: Some(expression),
                        raw_result: Some(raw),
                    },
                }
            }
            Err(e) => {
                warn!(expression = %expression, error = %e, "Expression execution failed");
                DataOutcome::failed(
                    format!(
                        "I couldn't process that query correctly. The specific error was: {}",
                        e
                    ),
                    Some(expression),
                )
            }
        }
    }

    // =============================
    // Session management
    // =============================

    pub fn init_session(&self) -> Result<String> {
        let session = self.store.get_or_create(&Uuid::new_v4().to_string())?;
        Ok(session.id)
    }

    pub fn list_sessions(&self, query: ListQuery) -> Result<SessionPage> {
        let (sessions, total) = self.store.list(&query)?;
        Ok(SessionPage {
            sessions,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.store
            .get(id)?
            .ok_or_else(|| PipelineError::SessionNotFound(id.to_string()))
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        if self.store.delete(id)? {
            Ok(())
        } else {
            Err(PipelineError::SessionNotFound(id.to_string()))
        }
    }

    pub fn clear_session(&self, id: &str) -> Result<()> {
        self.store.clear(id)?;
        info!(session_id = %id, "Session history cleared");
        Ok(())
    }

    pub fn update_metadata(
        &self,
        id: &str,
        title: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Metadata> {
        self.store.update_metadata(id, title, tags)
    }

    pub fn export_session(&self, id: &str, format: &str) -> Result<Export> {
        let format: ExportFormat = format.parse()?;
        export(&self.get_session(id)?, format)
    }

    pub fn import_session(&self, record: Value) -> Result<String> {
        self.store.import(record, self.settings.max_history)
    }

    pub fn backup_sessions(&self, destination: Option<PathBuf>) -> Result<BackupReport> {
        let root = destination.unwrap_or_else(|| self.settings.backup_root());
        self.store.backup(&root)
    }

    pub fn cleanup(&self, max_age_days: Option<i64>) -> Result<MaintenanceReport> {
        if matches!(max_age_days, Some(days) if days < 0) {
            return Err(PipelineError::InvalidInput(
                "max_age_days must not be negative".to_string(),
            ));
        }
        self.maintenance.run(max_age_days)
    }

    pub fn debug_info(&self) -> Result<DebugSnapshot> {
        let session_ids = self.store.cached_ids();
        let dataset = self.dataset.get();
        let (rows, columns) = dataset.shape();

        Ok(DebugSnapshot {
            sessions_count: session_ids.len(),
            session_ids,
            persisted_sessions_count: self.store.sessions()?.len(),
            dataset: DatasetInfo {
                origin: dataset.origin(),
                rows,
                columns,
                fingerprint: dataset.fingerprint().to_string(),
            },
            system_time: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fallback_frame;
    use crate::generation::ScriptedGenerator;
    use crate::memory::InMemorySessionStore;
    use serde_json::json;
    use std::fs;
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::TempDir;

    fn explain_by_echo(prompt: &str) -> String {
        let value = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Data result: "))
            .unwrap_or("nothing");
        format!("The answer is {}.", value)
    }

    fn data_generator(expression: &str) -> ScriptedGenerator {
        ScriptedGenerator::new()
            .reply("Classify the user's query", "DATA_QUERY")
            .reply("Determine if this query requires", "BRIEF")
            .reply("map it to the EXACT field name", r#"{"salary": "Salary"}"#)
            .reply("Table Analysis Task", expression)
            .on("Data result:", explain_by_echo)
    }

    fn orchestrator_with(
        generator: Arc<ScriptedGenerator>,
        store: Arc<dyn SessionStore>,
    ) -> Orchestrator {
        let settings = Settings {
            development: true,
            ..Settings::default()
        };
        let dataset = Arc::new(DatasetProvider::from_frame(fallback_frame()));
        Orchestrator::new(settings, store, dataset, generator)
    }

    fn in_memory(generator: Arc<ScriptedGenerator>) -> (Orchestrator, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        (orchestrator_with(generator, Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn test_data_query_answer_contains_computed_mean() {
        let generator = Arc::new(data_generator("df['Salary'].mean()"));
        let (orchestrator, store) = in_memory(generator);

        let response = orchestrator
            .submit_query("What's the average salary?", Some("scenario-a"))
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Dataframe);
        assert!(response.answer.contains("72500"), "answer: {}", response.answer);
        let debug = response.debug.unwrap();
        assert_eq!(debug.expression.as_deref(), Some("df['Salary'].mean()"));
        assert_eq!(debug.raw_result, Some(json!(72500.0)));

        let session = store.get("scenario-a").unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.context.last_result, Some(json!(72500.0)));
        assert_eq!(session.metadata.title, "What's the average salary?");
    }

    #[tokio::test]
    async fn test_general_question_skips_dataset_path() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .reply("Classify the user's query", "GENERAL")
                .reply("Determine if this query requires", "BRIEF")
                .reply(
                    "Your response:",
                    "Machine learning lets computers learn patterns from examples.",
                ),
        );
        let (orchestrator, store) = in_memory(Arc::clone(&generator));

        let response = orchestrator
            .submit_query("What is machine learning?", Some("scenario-b"))
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Conversation);
        assert!(response.debug.is_none());
        assert!(!response.answer.to_lowercase().contains("dataset"));
        assert!(!generator
            .prompts()
            .iter()
            .any(|p| p.contains("Table Analysis Task")));

        let session = store.get("scenario-b").unwrap().unwrap();
        assert_eq!(session.messages[1].source, Some(ResponseSource::Conversation));
        assert!(session.context.last_result.is_none());
    }

    #[tokio::test]
    async fn test_unsafe_expression_is_refused_without_execution() {
        let generator = Arc::new(data_generator("__import__('os').system('ls')"));
        let (orchestrator, store) = in_memory(Arc::clone(&generator));

        let response = orchestrator
            .submit_query("Delete everything in the salary table", Some("scenario-c"))
            .await
            .unwrap();

        assert_eq!(response.answer, REFUSAL);
        assert_eq!(response.source, ResponseSource::Error);
        assert!(response.debug.unwrap().raw_result.is_none());
        assert!(!generator.prompts().iter().any(|p| p.contains("Data result:")));

        let session = store.get("scenario-c").unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].is_error, Some(true));
        assert_eq!(session.messages[1].source, Some(ResponseSource::Dataframe));
    }

    #[tokio::test]
    async fn test_history_keeps_last_ten_pairs() {
        let generator = Arc::new(data_generator("df['Salary'].max()"));
        let (orchestrator, store) = in_memory(generator);

        for i in 0..11 {
            orchestrator
                .submit_query(&format!("Highest salary, attempt {}?", i), Some("scenario-d"))
                .await
                .unwrap();
        }

        let session = store.get("scenario-d").unwrap().unwrap();
        assert_eq!(session.messages.len(), 20);
        assert_eq!(session.messages[0].text, "Highest salary, attempt 1?");
        assert_eq!(session.messages[19].text, "The answer is 90000.");
        assert_eq!(session.metadata.title, "Highest salary, attempt 0?");
    }

    #[tokio::test]
    async fn test_cleanup_with_zero_days_recreates_fresh_session() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::open(dir.path()).unwrap());
        let generator = Arc::new(data_generator("df['Salary'].mean()"));
        let orchestrator = orchestrator_with(generator, Arc::clone(&store));

        orchestrator
            .submit_query("What's the average salary?", Some("scenario-e"))
            .await
            .unwrap();

        let record = fs::File::options()
            .write(true)
            .open(dir.path().join("scenario-e.json"))
            .unwrap();
        record
            .set_modified(SystemTime::now() - StdDuration::from_secs(3 * 86_400))
            .unwrap();

        let report = orchestrator.cleanup(Some(0)).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!dir.path().join("scenario-e.json").exists());

        let fresh = store.get_or_create("scenario-e").unwrap();
        assert!(fresh.messages.is_empty());
        assert!(fresh.context.last_result.is_none());
    }

    #[tokio::test]
    async fn test_execution_error_is_reported_and_recorded() {
        let generator = Arc::new(data_generator("df['Bonus'].mean()"));
        let (orchestrator, store) = in_memory(generator);

        let response = orchestrator
            .submit_query("What's the average bonus?", Some("exec-error"))
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Error);
        assert!(response
            .answer
            .starts_with("I couldn't process that query correctly. The specific error was: "));
        assert!(response.answer.contains("Bonus"));

        let session = store.get("exec-error").unwrap().unwrap();
        assert_eq!(session.messages[1].is_error, Some(true));
    }

    #[tokio::test]
    async fn test_compile_failure_message() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .reply("Classify the user's query", "DATA_QUERY")
                .reply("map it to the EXACT field name", "{}"),
        );
        let (orchestrator, _store) = in_memory(generator);

        let response = orchestrator
            .submit_query("Average salary?", Some("compile-error"))
            .await
            .unwrap();
        assert!(response.answer.starts_with("Error processing query: "));
        assert_eq!(response.source, ResponseSource::Error);
    }

    #[tokio::test]
    async fn test_empty_question_rejected_and_missing_id_generated() {
        let generator = Arc::new(data_generator("len(df)"));
        let (orchestrator, store) = in_memory(generator);

        assert!(matches!(
            orchestrator.submit_query("   ", None).await,
            Err(PipelineError::InvalidInput(_))
        ));

        let response = orchestrator.submit_query("How many salary rows?", None).await.unwrap();
        assert!(Uuid::parse_str(&response.session_id).is_ok());
        assert!(store.exists(&response.session_id).unwrap());
    }

    #[tokio::test]
    async fn test_session_management_not_found_paths() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (orchestrator, _store) = in_memory(generator);

        assert!(matches!(
            orchestrator.get_session("nope"),
            Err(PipelineError::SessionNotFound(_))
        ));
        assert!(matches!(
            orchestrator.delete_session("nope"),
            Err(PipelineError::SessionNotFound(_))
        ));

        let id = orchestrator.init_session().unwrap();
        assert!(matches!(
            orchestrator.export_session(&id, "pdf"),
            Err(PipelineError::InvalidInput(_))
        ));
        assert_eq!(orchestrator.export_session(&id, "txt").unwrap().file_name, format!("{}.txt", id));
        orchestrator.delete_session(&id).unwrap();
        assert!(matches!(
            orchestrator.cleanup(Some(-1)),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            orchestrator.cleanup(Some(i64::MAX)),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_debug_info_reports_dataset() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (orchestrator, _store) = in_memory(generator);
        orchestrator.init_session().unwrap();

        let snapshot = orchestrator.debug_info().unwrap();
        assert_eq!(snapshot.persisted_sessions_count, 1);
        assert_eq!(snapshot.dataset.rows, 10);
        assert_eq!(snapshot.dataset.fingerprint.len(), 64);
    }
}
