//! One question in, one report out.
//!
//! Stages run strictly in order: recall (when available), generation,
//! extraction, execution. The first failing stage stops the run; everything
//! produced before it stays on the report.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::db::{self, ConnectionSettings, DatabaseError, ResultSet};
use crate::extract::extract_statement;
use crate::llm::LlmManager;
use crate::prompt::PromptTemplate;
use crate::recall::{RecallOutcome, SimilarityRecall};

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    EmptyQuestion,
    Upstream { message: String },
    ExtractionFailed,
    Database {
        #[serde(flatten)]
        error: DatabaseError,
        hint: Option<String>,
    },
}

impl Failure {
    /// Text shown to the user.
    pub fn message(&self) -> String {
        match self {
            Failure::EmptyQuestion => "Please enter a question.".to_string(),
            Failure::Upstream { message } => {
                format!("No response generated from the model: {}", message)
            }
            Failure::ExtractionFailed => {
                "Could not extract a SQL query from the model response.".to_string()
            }
            Failure::Database { error, hint } => match hint {
                Some(hint) => format!("{} ({})", error, hint),
                None => error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AskReport {
    pub question: String,
    /// Absent when recall is disabled or was unavailable for this run.
    pub recall: Option<RecallOutcome>,
    pub recall_warning: Option<String>,
    pub reply: Option<String>,
    pub statement: Option<String>,
    pub result: Option<ResultSet>,
    pub failure: Option<Failure>,
    pub elapsed_ms: u64,
}

impl AskReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.result.is_some()
    }
}

pub struct Assistant {
    prompt: Arc<PromptTemplate>,
    llm: LlmManager,
    recall: Option<SimilarityRecall>,
    top_k: usize,
    database: ConnectionSettings,
}

impl Assistant {
    pub fn new(
        prompt: Arc<PromptTemplate>,
        llm: LlmManager,
        recall: Option<SimilarityRecall>,
        top_k: usize,
        database: ConnectionSettings,
    ) -> Self {
        Self {
            prompt,
            llm,
            recall,
            top_k,
            database,
        }
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }

    pub fn recall(&self) -> Option<&SimilarityRecall> {
        self.recall.as_ref()
    }

    pub fn database(&self) -> &ConnectionSettings {
        &self.database
    }

    pub async fn ask(&self, question: &str) -> AskReport {
        let started = Instant::now();
        let mut report = AskReport {
            question: question.trim().to_string(),
            ..AskReport::default()
        };

        self.run(&mut report).await;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        match &report.failure {
            None => info!("Answered question in {}ms", report.elapsed_ms),
            Some(failure) => warn!("Question stopped early: {}", failure.message()),
        }
        report
    }

    async fn run(&self, report: &mut AskReport) {
        if report.question.is_empty() {
            report.failure = Some(Failure::EmptyQuestion);
            return;
        }
        info!("Answering question: {}", report.question);

        if let Some(recall) = &self.recall {
            match recall.recall(&report.question, self.top_k).await {
                Ok(outcome) => {
                    if outcome == RecallOutcome::NoData {
                        report.recall_warning = Some("No embeddings found in the vector store.".to_string());
                    }
                    report.recall = Some(outcome);
                }
                Err(e) => {
                    warn!("Similarity recall failed: {}", e);
                    report.recall_warning = Some(e.to_string());
                }
            }
        }

        let reply = match self.llm.generate(&report.question, self.prompt.as_str()).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Error generating response from model: {}", e);
                report.failure = Some(Failure::Upstream {
                    message: e.to_string(),
                });
                return;
            }
        };

        let extracted = match extract_statement(&reply) {
            Ok(statement) => Some(statement.to_string()),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };
        report.reply = Some(reply);

        let Some(statement) = extracted else {
            report.failure = Some(Failure::ExtractionFailed);
            return;
        };
        info!("Extracted SQL: {}", statement);

        let outcome = db::execute_query(&statement, &self.database).await;
        report.statement = Some(statement);

        match outcome {
            Ok(result) => {
                info!("Query returned {} rows", result.len());
                report.result = Some(result);
            }
            Err(error) => {
                let hint = error.hint().map(str::to_string);
                report.failure = Some(Failure::Database { error, hint });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Backend;
    use crate::llm::{LlmError, SqlGenerator};
    use crate::prompt::few_shot_examples;
    use crate::recall::testing::{FixedEmbedder, MemoryStore, record};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a fixed text and remembers what it was sent.
    struct ScriptedGenerator {
        reply: Result<String, String>,
        seen: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl SqlGenerator for ScriptedGenerator {
        async fn generate(&self, question: &str, instructions: &str) -> Result<String, LlmError> {
            self.seen
                .lock()
                .unwrap()
                .push((question.to_string(), instructions.to_string()));
            self.reply.clone().map_err(LlmError::ConnectionError)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: ConnectionSettings,
    }

    fn film_database() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sakila.duckdb");
        let conn = duckdb::Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE film(title VARCHAR); INSERT INTO film VALUES ('Alpha');")
            .unwrap();
        drop(conn);

        Fixture {
            _dir: dir,
            settings: ConnectionSettings {
                backend: Backend::DuckDb,
                host: String::new(),
                port: None,
                user: String::new(),
                password: String::new(),
                database: path.to_string_lossy().to_string(),
            },
        }
    }

    fn assistant(
        reply: Result<&str, &str>,
        recall: Option<SimilarityRecall>,
        fixture: &Fixture,
    ) -> (Assistant, Arc<Mutex<Vec<(String, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let generator = ScriptedGenerator {
            reply: reply.map(str::to_string).map_err(str::to_string),
            seen: Arc::clone(&seen),
        };
        let prompt = Arc::new(PromptTemplate::build(&few_shot_examples()).unwrap());
        let assistant = Assistant::new(
            prompt,
            LlmManager::with_generator(Box::new(generator), "scripted"),
            recall,
            3,
            fixture.settings.clone(),
        );
        (assistant, seen)
    }

    #[tokio::test]
    async fn happy_path_returns_rows() {
        let fixture = film_database();
        let (assistant, seen) = assistant(
            Ok("Sure:\n```sql\nSELECT title FROM film;\n```"),
            None,
            &fixture,
        );

        let report = assistant.ask("  List all the film titles.  ").await;

        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(report.statement.as_deref(), Some("SELECT title FROM film;"));
        assert_eq!(
            serde_json::to_value(&report.result.unwrap().rows).unwrap(),
            json!([{"title": "Alpha"}])
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "List all the film titles.");
        assert_eq!(seen[0].1, assistant.prompt().as_str());
    }

    #[tokio::test]
    async fn same_question_twice_is_identical() {
        let fixture = film_database();
        let (assistant, _) = assistant(Ok("SELECT title FROM film;"), None, &fixture);

        let first = assistant.ask("List all the film titles.").await;
        let second = assistant.ask("List all the film titles.").await;

        assert_eq!(first.statement, second.statement);
        assert_eq!(first.result, second.result);
    }

    #[tokio::test]
    async fn empty_question_stops_before_generation() {
        let fixture = film_database();
        let (assistant, seen) = assistant(Ok("SELECT 1;"), None, &fixture);

        let report = assistant.ask("   ").await;

        assert_eq!(report.failure, Some(Failure::EmptyQuestion));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_halts_pipeline() {
        let fixture = film_database();
        let (assistant, _) = assistant(Err("quota exceeded"), None, &fixture);

        let report = assistant.ask("List all the film titles.").await;

        assert!(matches!(report.failure, Some(Failure::Upstream { .. })));
        assert!(report.reply.is_none());
        assert!(report.statement.is_none());
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn unextractable_reply_is_kept_for_display() {
        let fixture = film_database();
        let (assistant, _) = assistant(Ok("I am not able to help with that."), None, &fixture);

        let report = assistant.ask("What's the weather?").await;

        assert_eq!(report.failure, Some(Failure::ExtractionFailed));
        assert_eq!(report.reply.as_deref(), Some("I am not able to help with that."));
        assert!(report.statement.is_none());
    }

    #[tokio::test]
    async fn zero_rows_differs_from_database_error() {
        let fixture = film_database();

        let (empty, _) = assistant(Ok("SELECT title FROM film WHERE title = 'Zed';"), None, &fixture);
        let report = empty.ask("Any film called Zed?").await;
        assert!(report.succeeded());
        assert!(report.result.unwrap().is_empty());

        let (broken, _) = assistant(Ok("SELECT title FROM films;"), None, &fixture);
        let report = broken.ask("List all the film titles.").await;
        assert!(matches!(report.failure, Some(Failure::Database { .. })));
        assert_eq!(report.statement.as_deref(), Some("SELECT title FROM films;"));
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn recall_results_are_reported_but_not_sent() {
        let fixture = film_database();
        let embedder = FixedEmbedder {
            vectors: vec![("List all the film titles.".to_string(), vec![1.0, 0.0])],
            dimension: 2,
        };
        let store = MemoryStore::default();
        store
            .records
            .lock()
            .await
            .push(record("1", "Show film names", "SELECT title FROM film;", &[1.0, 0.0]));
        let recall = SimilarityRecall::new(Arc::new(embedder), Arc::new(store));

        let (assistant, seen) = assistant(Ok("SELECT title FROM film;"), Some(recall), &fixture);
        let report = assistant.ask("List all the film titles.").await;

        let matches = report.recall.as_ref().unwrap().matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].record.question, "Show film names");
        assert!(report.recall_warning.is_none());
        assert!(!seen.lock().unwrap()[0].1.contains("Show film names"));
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn empty_recall_store_is_only_a_warning() {
        let fixture = film_database();
        let recall = SimilarityRecall::new(
            Arc::new(FixedEmbedder {
                vectors: Vec::new(),
                dimension: 2,
            }),
            Arc::new(MemoryStore::default()),
        );

        let (assistant, _) = assistant(Ok("SELECT title FROM film;"), Some(recall), &fixture);
        let report = assistant.ask("List all the film titles.").await;

        assert_eq!(report.recall, Some(RecallOutcome::NoData));
        assert!(report.recall_warning.is_some());
        assert!(report.succeeded());
    }

    #[test]
    fn failures_serialize_with_kind() {
        let failure = Failure::Database {
            error: DatabaseError::new(Some("1049".to_string()), "Unknown database 'sakila1'"),
            hint: Some("Database does not exist".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({
                "kind": "database",
                "code": "1049",
                "message": "Unknown database 'sakila1'",
                "hint": "Database does not exist"
            })
        );
        assert_eq!(
            serde_json::to_value(Failure::ExtractionFailed).unwrap(),
            json!({"kind": "extraction_failed"})
        );
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn ask_future_can_move_across_threads() {
        let fixture = film_database();
        let (assistant, _) = assistant(Ok("SELECT title FROM film;"), None, &fixture);
        assert_send(assistant.ask("List all the film titles."));
    }
}
