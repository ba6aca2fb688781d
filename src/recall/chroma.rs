use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{EmbeddingStore, RecallError, SimilarQuestionRecord};
use crate::config::VectorStoreConfig;

const QUESTION_KEY: &str = "question";
const SQL_QUERY_KEY: &str = "sql_query";

pub struct ChromaClient {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    database: String,
}

/// Handle on one collection, as returned by `get_or_create_collection`.
pub struct ChromaCollection {
    client: reqwest::Client,
    collection_url: String,
    name: String,
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct GetRequest {
    include: Vec<&'static str>,
}

#[derive(Deserialize, Debug, Default)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    embeddings: Option<Vec<Option<Vec<f32>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<HashMap<String, Value>>>>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
}

#[derive(Serialize)]
struct AddRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    metadatas: Vec<HashMap<String, Value>>,
    documents: Vec<String>,
}

impl ChromaClient {
    pub fn new(base_url: &str, tenant: &str, database: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: tenant.to_string(),
            database: database.to_string(),
        }
    }

    /// Checks the server is up and opens the configured collection.
    pub async fn connect(config: &VectorStoreConfig) -> Result<ChromaCollection, RecallError> {
        let client = Self::new(&config.url, &config.tenant, &config.database);
        client.heartbeat().await?;
        client.get_or_create_collection(&config.collection).await
    }

    pub async fn heartbeat(&self) -> Result<(), RecallError> {
        let response = self
            .client
            .get(format!("{}/api/v2/heartbeat", self.base_url))
            .send()
            .await
            .map_err(|e| RecallError::Connectivity(format!("{}: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(RecallError::Connectivity(format!(
                "{} heartbeat returned {}",
                self.base_url,
                response.status()
            )));
        }
        Ok(())
    }

    pub async fn get_or_create_collection(
        &self,
        name: &str,
    ) -> Result<ChromaCollection, RecallError> {
        let response = self
            .client
            .post(self.collections_url())
            .json(&CreateCollectionRequest {
                name,
                get_or_create: true,
            })
            .send()
            .await
            .map_err(|e| RecallError::Connectivity(e.to_string()))?;

        let collection: CollectionResponse = checked_json(response).await?;
        info!("Using Chroma collection '{}' ({})", collection.name, collection.id);

        Ok(ChromaCollection {
            client: self.client.clone(),
            collection_url: format!("{}/{}", self.collections_url(), collection.id),
            name: collection.name,
        })
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }
}

impl ChromaCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.collection_url, action)
    }
}

#[async_trait]
impl EmbeddingStore for ChromaCollection {
    async fn fetch_all(&self) -> Result<Vec<SimilarQuestionRecord>, RecallError> {
        let response = self
            .client
            .post(self.endpoint("get"))
            .json(&GetRequest {
                include: vec!["embeddings", "metadatas", "documents"],
            })
            .send()
            .await
            .map_err(|e| RecallError::Store(e.to_string()))?;

        let body: GetResponse = checked_json(response).await?;
        Ok(records_from(body))
    }

    async fn append(&self, record: SimilarQuestionRecord) -> Result<(), RecallError> {
        let mut metadata = HashMap::new();
        metadata.insert(QUESTION_KEY.to_string(), Value::from(record.question.clone()));
        metadata.insert(SQL_QUERY_KEY.to_string(), Value::from(record.sql_query.clone()));

        let request = AddRequest {
            ids: vec![record.id],
            embeddings: vec![record.embedding],
            metadatas: vec![metadata],
            documents: vec![record.question],
        };

        let response = self
            .client
            .post(self.endpoint("add"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RecallError::Store(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::Store(format!("add returned {}: {}", status, body)));
        }
        Ok(())
    }
}

async fn checked_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RecallError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RecallError::Store(format!("Chroma returned {}: {}", status, body)));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| RecallError::Store(format!("Failed to parse Chroma response: {}", e)))
}

/// Zips Chroma's parallel arrays into records, dropping entries without an embedding.
fn records_from(body: GetResponse) -> Vec<SimilarQuestionRecord> {
    let embeddings = body.embeddings.unwrap_or_default();
    let metadatas = body.metadatas.unwrap_or_default();
    let documents = body.documents.unwrap_or_default();

    let mut records = Vec::with_capacity(body.ids.len());
    for (offset, id) in body.ids.into_iter().enumerate() {
        let Some(embedding) = embeddings.get(offset).cloned().flatten() else {
            warn!("Chroma record {} has no embedding, skipping", id);
            continue;
        };

        let metadata = metadatas.get(offset).cloned().flatten().unwrap_or_default();
        let document = documents.get(offset).cloned().flatten();

        let question = metadata
            .get(QUESTION_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(document)
            .unwrap_or_default();
        let sql_query = metadata
            .get(SQL_QUERY_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        records.push(SimilarQuestionRecord {
            id,
            question,
            sql_query,
            embedding,
        });
    }

    debug!("Fetched {} records from Chroma", records.len());
    records
}
