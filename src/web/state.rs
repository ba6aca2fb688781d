use crate::config::AppConfig;
use crate::llm::LlmManager;
use crate::pipeline::Assistant;
use crate::prompt::{PromptTemplate, few_shot_examples};
use crate::recall::chroma::ChromaClient;
use crate::recall::{SimilarityRecall, embedder};
use crate::web::templates::init_templates;
use minijinja::Environment;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Whether similarity recall can be used for this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RecallStatus {
    Disabled,
    Available(String),
    Unavailable(String),
}

impl fmt::Display for RecallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecallStatus::Disabled => write!(f, "disabled"),
            RecallStatus::Available(collection) => write!(f, "using collection '{}'", collection),
            RecallStatus::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub assistant: Assistant,
    pub template_env: Environment<'static>,
    pub recall_status: RecallStatus,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        assistant: Assistant,
        recall_status: RecallStatus,
    ) -> Result<Self, minijinja::Error> {
        Ok(Self {
            config,
            assistant,
            template_env: init_templates()?,
            recall_status,
            startup_time: chrono::Utc::now(),
        })
    }

    /// Builds everything a request needs from configuration, once.
    pub async fn initialize(
        config: AppConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!("Building schema prompt");
        let prompt = Arc::new(PromptTemplate::build(&few_shot_examples())?);

        info!("Initializing LLM manager with backend: {}", config.llm.backend);
        let llm = LlmManager::new(&config.llm)?;

        let (recall, recall_status) = connect_recall(&config).await;

        let assistant = Assistant::new(
            prompt,
            llm,
            recall,
            config.recall.top_k,
            config.database.connection_settings(),
        );

        Ok(Self::new(config, assistant, recall_status)?)
    }
}

/// Checks the vector store once; a failure leaves recall off for the session.
async fn connect_recall(config: &AppConfig) -> (Option<SimilarityRecall>, RecallStatus) {
    if !config.recall.enabled {
        info!("Similarity recall disabled");
        return (None, RecallStatus::Disabled);
    }

    let embedder = match embedder::from_config(&config.embedding) {
        Ok(embedder) => embedder,
        Err(e) => {
            error!("Failed to set up embedding model: {}", e);
            return (None, RecallStatus::Unavailable(e.to_string()));
        }
    };

    match ChromaClient::connect(&config.vector_store).await {
        Ok(collection) => {
            info!("Connected to Chroma at {}", config.vector_store.url);
            let status = RecallStatus::Available(collection.name().to_string());
            let recall = SimilarityRecall::new(Arc::from(embedder), Arc::new(collection));
            (Some(recall), status)
        }
        Err(e) => {
            error!("Failed to connect to Chroma: {}", e);
            warn!("Please make sure the Chroma server is running; continuing without recall");
            (None, RecallStatus::Unavailable(e.to_string()))
        }
    }
}
