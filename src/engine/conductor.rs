use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    EngineError, StartWorkflowRequest, TaskQueue, WebhookConfig, WebhookGateway, WorkflowEngine,
};
use crate::task::{Task, TaskResult};
use crate::workflow::{TaskDef, WorkflowDef};

pub const DEFAULT_SERVER_URL: &str = "https://developer.orkescloud.com/api";
const AUTH_HEADER: &str = "X-Authorization";

/// Application key pair exchanged for an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key_id: String,
    pub key_secret: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    key_id: &'a str,
    key_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// HTTP client for a Conductor-compatible server.
pub struct ConductorClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    token: RwLock<Option<String>>,
}

impl ConductorClient {
    pub fn new(credentials: Option<Credentials>) -> Result<Self, EngineError> {
        Self::with_base_url(DEFAULT_SERVER_URL, credentials)
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Cached access token, fetched on first use.
    async fn token(&self) -> Result<Option<String>, EngineError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        if let Some(token) = self.token.read().await.clone() {
            return Ok(Some(token));
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.clone() {
            return Ok(Some(token));
        }
        debug!(key_id = %credentials.key_id, "requesting access token");
        let response = self
            .client
            .post(self.url("token"))
            .json(&TokenRequest {
                key_id: &credentials.key_id,
                key_secret: &credentials.key_secret,
            })
            .send()
            .await?;
        let body: TokenResponse = check(response).await?.json().await?;
        *cached = Some(body.token.clone());
        Ok(Some(body.token))
    }

    /// Drop the cached token if it is still the one the server rejected.
    async fn invalidate(&self, rejected: &str) {
        let mut cached = self.token.write().await;
        if cached.as_deref() == Some(rejected) {
            *cached = None;
        }
    }

    /// Send with the access token. A 401/403 answer to a cached token
    /// refreshes it and repeats the request once.
    async fn send(&self, request: RequestBuilder) -> Result<Response, EngineError> {
        let retry = request.try_clone();
        let token = self.token().await?;
        let response = authorized(request, token.as_deref()).send().await?;

        let (Some(rejected), Some(retry)) = (token, retry) else {
            return check(response).await;
        };
        if !is_auth_failure(response.status()) {
            return check(response).await;
        }
        warn!(status = %response.status(), "access token rejected, requesting a new one");
        self.invalidate(&rejected).await;
        let token = self.token().await?;
        check(authorized(retry, token.as_deref()).send().await?).await
    }
}

fn authorized(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.header(AUTH_HEADER, token),
        None => request,
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Map non-success responses onto [`EngineError`].
async fn check(response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(match status {
        StatusCode::BAD_REQUEST => EngineError::Validation(message),
        StatusCode::NOT_FOUND => EngineError::NotFound(message),
        _ => EngineError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

fn is_conflict(err: &EngineError) -> bool {
    matches!(err, EngineError::Api { status: 409, .. })
}

#[async_trait]
impl WorkflowEngine for ConductorClient {
    async fn register_task_definitions(&self, defs: &[TaskDef]) -> Result<(), EngineError> {
        self.send(self.client.post(self.url("metadata/taskdefs")).json(defs))
            .await?;
        Ok(())
    }

    async fn update_task_definition(&self, def: &TaskDef) -> Result<(), EngineError> {
        self.send(self.client.put(self.url("metadata/taskdefs")).json(def))
            .await?;
        Ok(())
    }

    async fn register_workflow_definition(
        &self,
        def: &WorkflowDef,
        overwrite: bool,
    ) -> Result<(), EngineError> {
        let request = if overwrite {
            self.client
                .put(self.url("metadata/workflow"))
                .json(std::slice::from_ref(def))
        } else {
            self.client.post(self.url("metadata/workflow")).json(def)
        };
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(err) if is_conflict(&err) => Err(EngineError::VersionConflict {
                name: def.name.clone(),
                version: def.version,
            }),
            Err(err) => Err(err),
        }
    }

    async fn start_workflow_run(
        &self,
        request: &StartWorkflowRequest,
    ) -> Result<String, EngineError> {
        let response = self
            .send(self.client.post(self.url("workflow")).json(request))
            .await?;
        let run_id = response.text().await?;
        Ok(run_id.trim().trim_matches('"').to_string())
    }

    async fn terminate_workflow_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
        self.send(
            self.client
                .delete(self.url(&format!("workflow/{run_id}")))
                .query(&[("reason", reason)]),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookGateway for ConductorClient {
    async fn create_webhook(&self, config: &WebhookConfig) -> Result<(), EngineError> {
        match self
            .send(self.client.post(self.url("metadata/webhook")).json(config))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_conflict(&err) => {
                Err(EngineError::AlreadyExists(format!("webhook {}", config.id)))
            }
            Err(err) => Err(err),
        }
    }

    async fn update_webhook(&self, id: &str, config: &WebhookConfig) -> Result<(), EngineError> {
        self.send(
            self.client
                .put(self.url(&format!("metadata/webhook/{id}")))
                .json(config),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for ConductorClient {
    async fn poll_task(
        &self,
        task_type: &str,
        worker_id: &str,
    ) -> Result<Option<Task>, EngineError> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("tasks/poll/{task_type}")))
                    .query(&[("workerid", worker_id)]),
            )
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn update_task(&self, result: &TaskResult) -> Result<(), EngineError> {
        self.send(self.client.post(self.url("tasks")).json(result))
            .await?;
        Ok(())
    }
}
