//! # Firestore Datasource
//!
//! The execution side of the query editor. A [`Datasource`] pairs the
//! connection settings of one data source instance with a [`DocumentStore`]
//! that actually runs queries, and answers the two requests a dashboard
//! makes of it:
//!
//! - **QueryData**: run a batch of queries, each tagged with a `refId`, and
//!   return one [`DataResponse`] per `refId`. A failing query only fails its
//!   own entry.
//! - **CheckHealth**: validate the settings and list the store's collections.
//!
//! Nothing here retries. A failed execution is reported and forgotten.

pub mod frame;
pub mod memory;
pub mod parser;

use std::collections::BTreeMap;
use std::sync::Arc;

use fq_core::QueryModel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use frame::Frame;

// =============================================================================
// Connection Settings
// =============================================================================

/// Everything needed to reach one Firestore project.
///
/// Only the datasource looks inside; editors pass it around untouched.
#[derive(Clone, Default)]
pub struct ConnectionContext {
    pub project_id: String,
    /// Service-account key, as the JSON document downloaded from the console.
    pub service_account: Option<String>,
    /// When set, credentials are not required (local emulator).
    pub emulator_host: Option<String>,
}

impl ConnectionContext {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_service_account(mut self, json: impl Into<String>) -> Self {
        self.service_account = Some(json.into());
        self
    }

    pub fn with_emulator(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    /// Check the settings the way a client constructor would.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.project_id.trim().is_empty() {
            return Err(SettingsError::MissingProjectId);
        }
        match self.service_account.as_deref() {
            Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::Object(_)) => Ok(()),
                Ok(_) => Err(SettingsError::InvalidCredential(
                    "expected a JSON object".into(),
                )),
                Err(e) => Err(SettingsError::InvalidCredential(e.to_string())),
            },
            None if self.emulator_host.is_some() => Ok(()),
            None => Err(SettingsError::MissingCredential),
        }
    }

    /// Short SHA-256 fingerprint of the credential, safe to log.
    pub fn credential_fingerprint(&self) -> Option<String> {
        self.service_account.as_deref().map(|raw| {
            let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
            digest[..12].to_string()
        })
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("project_id", &self.project_id)
            .field("service_account", &self.credential_fingerprint())
            .field("emulator_host", &self.emulator_host)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("project Id is required")]
    MissingProjectId,

    #[error("service account is required unless an emulator host is configured")]
    MissingCredential,

    #[error("invalid service account, it is expected to be a JSON: {0}")]
    InvalidCredential(String),
}

// =============================================================================
// Execution
// =============================================================================

/// Result type for query execution
pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The query cannot be run as written.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// The data source settings are unusable.
    #[error("invalid data source configuration: {0}")]
    Settings(#[from] SettingsError),
}

impl ExecError {
    /// HTTP-style status reported alongside a failed query.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadQuery(_) | Self::Settings(_) => 400,
        }
    }
}

/// The backend that runs queries against documents.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run `query`. A query that is not executable yields no frames.
    async fn execute(&self, ctx: &ConnectionContext, query: &QueryModel) -> ExecResult<Vec<Frame>>;

    /// Names of the top-level collections, sorted.
    async fn collections(&self, ctx: &ConnectionContext) -> ExecResult<Vec<String>>;
}

// =============================================================================
// Requests & Responses
// =============================================================================

/// One query of a batch. The model's fields sit next to `refId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(rename = "refId")]
    pub ref_id: String,
    #[serde(flatten)]
    pub model: QueryModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDataRequest {
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl DataResponse {
    pub fn from_error(err: &ExecError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(err.to_string()),
            status: Some(err.status()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDataResponse {
    pub results: BTreeMap<String, DataResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub message: String,
}

// =============================================================================
// Datasource
// =============================================================================

pub struct Datasource {
    context: ConnectionContext,
    store: Arc<dyn DocumentStore>,
}

impl Datasource {
    pub fn new(context: ConnectionContext, store: Arc<dyn DocumentStore>) -> Self {
        Self { context, store }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Run a single model.
    pub async fn execute(&self, model: &QueryModel) -> ExecResult<Vec<Frame>> {
        self.context.validate()?;
        let frames = self.store.execute(&self.context, model).await?;
        tracing::debug!(
            variant = %model.variant(),
            rows = frames.iter().map(Frame::row_count).sum::<usize>(),
            "Query executed"
        );
        Ok(frames)
    }

    /// Run a batch of queries, one response per `refId`.
    pub async fn query_data(&self, req: QueryDataRequest) -> QueryDataResponse {
        tracing::debug!(num_queries = req.queries.len(), "QueryData called");

        let mut response = QueryDataResponse::default();
        for query in req.queries {
            let result = match self.execute(&query.model).await {
                Ok(frames) => DataResponse {
                    frames,
                    ..DataResponse::default()
                },
                Err(e) => {
                    tracing::warn!(ref_id = %query.ref_id, "Query failed: {}", e);
                    DataResponse::from_error(&e)
                }
            };
            response.results.insert(query.ref_id, result);
        }
        response
    }

    pub async fn collections(&self) -> ExecResult<Vec<String>> {
        self.context.validate()?;
        self.store.collections(&self.context).await
    }

    pub async fn check_health(&self) -> HealthResult {
        tracing::debug!("CheckHealth called");

        let outcome = match self.collections().await {
            Ok(collections) => {
                tracing::debug!("First collection: {:?}", collections.first());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                Err(e)
            }
        };

        match outcome {
            Ok(()) => HealthResult {
                status: HealthStatus::Ok,
                message: "Data source is working".into(),
            },
            Err(e) => HealthResult {
                status: HealthStatus::Error,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use serde_json::json;

    fn users_store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::from_json(json!({
                "users": [
                    { "id": 1, "name": "Eleanora", "age": 31 },
                    { "id": 2, "name": "Janis", "age": 27 },
                ],
            }))
            .unwrap(),
        )
    }

    fn emulator() -> ConnectionContext {
        ConnectionContext::new("test").with_emulator("localhost:8765")
    }

    #[test]
    fn test_settings_validation() {
        assert_eq!(
            ConnectionContext::default().validate(),
            Err(SettingsError::MissingProjectId)
        );
        assert_eq!(
            ConnectionContext::new("test").validate(),
            Err(SettingsError::MissingCredential)
        );
        assert!(matches!(
            ConnectionContext::new("test")
                .with_service_account("test")
                .validate(),
            Err(SettingsError::InvalidCredential(_))
        ));
        assert!(matches!(
            ConnectionContext::new("test")
                .with_service_account("[1]")
                .validate(),
            Err(SettingsError::InvalidCredential(_))
        ));
        assert!(ConnectionContext::new("test")
            .with_service_account(r#"{"type": "service_account"}"#)
            .validate()
            .is_ok());
        assert!(emulator().validate().is_ok());
    }

    #[test]
    fn test_debug_never_prints_credential() {
        let ctx = ConnectionContext::new("test")
            .with_service_account(r#"{"private_key": "SECRET"}"#);
        let printed = format!("{:?}", ctx);
        assert!(!printed.contains("SECRET"));
        assert!(printed.contains(&ctx.credential_fingerprint().unwrap()));
    }

    #[tokio::test]
    async fn test_check_health() {
        let ok = Datasource::new(emulator(), users_store()).check_health().await;
        assert_eq!(ok.status, HealthStatus::Ok);
        assert_eq!(ok.message, "Data source is working");

        let bad = Datasource::new(ConnectionContext::default(), users_store())
            .check_health()
            .await;
        assert_eq!(bad.status, HealthStatus::Error);
        assert!(bad.message.contains("project Id is required"));
    }

    #[tokio::test]
    async fn test_query_data_answers_every_ref_id() {
        let ds = Datasource::new(emulator(), users_store());
        let req: QueryDataRequest = serde_json::from_value(json!({
            "queries": [
                { "refId": "A", "query": "select * from users" },
                { "refId": "B", "collectionPath": "users", "isCount": true },
                { "refId": "C", "query": "delete everything" },
                { "refId": "D", "collectionPath": "" },
            ],
        }))
        .unwrap();

        let resp = ds.query_data(req).await;
        assert_eq!(resp.results.len(), 4);

        let a = &resp.results["A"];
        assert!(a.error.is_none());
        assert_eq!(a.frames.len(), 1);
        assert_eq!(a.frames[0].row_count(), 2);
        assert_eq!(a.frames[0].fields.len(), 3);

        let b = &resp.results["B"];
        assert_eq!(b.frames[0].fields[0].name, "count");
        assert_eq!(b.frames[0].fields[0].values, vec![json!(2.0)]);

        let c = &resp.results["C"];
        assert_eq!(c.status, Some(400));
        assert!(c.frames.is_empty());

        // not executable: no frames, no error
        let d = &resp.results["D"];
        assert!(d.error.is_none());
        assert!(d.frames.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_each_query() {
        let ds = Datasource::new(ConnectionContext::new("test"), users_store());
        let resp = ds
            .query_data(QueryDataRequest {
                queries: vec![DataQuery {
                    ref_id: "A".into(),
                    model: QueryModel::structured("users"),
                }],
            })
            .await;
        let a = &resp.results["A"];
        assert_eq!(a.status, Some(400));
        assert!(a.error.as_deref().unwrap().contains("configuration"));
    }

    #[test]
    fn test_data_query_wire_shape() {
        let q = DataQuery {
            ref_id: "A".into(),
            model: QueryModel::free_form("select * from users"),
        };
        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            json!({ "refId": "A", "query": "select * from users" })
        );
    }
}
