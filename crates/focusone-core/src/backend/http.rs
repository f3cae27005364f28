//! HTTP implementation of [`RecordBackend`].
//!
//! Every response is wrapped in an envelope `{statusCode, message, data}`; a
//! 2xx transport carrying a `statusCode` other than 200 is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::RecordBackend;
use crate::error::BackendError;
use crate::record::NewRecord;
use crate::storage::BackendConfig;

const PROJECT_TAG_HEADER: &str = "project-tag";

/// Env var consulted when the config carries no token.
pub const TOKEN_ENV: &str = "FOCUSONE_TOKEN";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "statusCode")]
    status_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

pub struct HttpBackend {
    base_url: Url,
    token: Option<String>,
    project_tag: String,
    http_client: Client,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        project_tag: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: Url::parse(&base)?,
            token: token.filter(|t| !t.is_empty()),
            project_tag: project_tag.into(),
            http_client,
        })
    }

    /// Build from config, falling back to `FOCUSONE_TOKEN` for the token.
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok());
        Self::new(
            &config.base_url,
            token,
            config.project_tag.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BackendError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        debug!(%method, %url, "backend request");

        let mut request = self
            .http_client
            .request(method, url)
            .header(PROJECT_TAG_HEADER, &self.project_tag);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = resp.json().await?;
        if envelope.status_code != 200 {
            return Err(BackendError::Rejected {
                code: envelope.status_code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl RecordBackend for HttpBackend {
    async fn create_record(&self, record: &NewRecord) -> Result<String, BackendError> {
        let data = self
            .call(Method::POST, "record/add", Some(json!(record)))
            .await?;
        match &data["id"] {
            Value::String(id) => Ok(id.clone()),
            Value::Number(id) => Ok(id.to_string()),
            _ => Err(BackendError::MissingField("id")),
        }
    }

    async fn report_elapsed(&self, record_id: &str, minutes: u32) -> Result<(), BackendError> {
        self.call(
            Method::POST,
            &format!("record/update/{record_id}"),
            Some(json!({ "actual_min": minutes })),
        )
        .await
        .map(drop)
    }

    async fn pause_record(&self, record_id: &str) -> Result<(), BackendError> {
        self.call(Method::POST, &format!("record/pause/{record_id}"), None)
            .await
            .map(drop)
    }

    async fn complete_record(&self, record_id: &str) -> Result<(), BackendError> {
        self.call(Method::POST, &format!("record/complete/{record_id}"), None)
            .await
            .map(drop)
    }

    async fn fail_record(&self, record_id: &str, reason: &str) -> Result<(), BackendError> {
        self.call(
            Method::POST,
            &format!("record/fail/{record_id}"),
            Some(json!({ "reason": reason })),
        )
        .await
        .map(drop)
    }

    async fn fetch_balance(&self) -> Result<i64, BackendError> {
        let data = self.call(Method::GET, "benefit", None).await?;
        data["balance"]
            .as_i64()
            .ok_or(BackendError::MissingField("balance"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BlockMode;
    use mockito::Matcher;

    fn backend(server: &mockito::ServerGuard) -> HttpBackend {
        HttpBackend::new(
            &server.url(),
            Some("secret".into()),
            "focusone",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn record() -> NewRecord {
        NewRecord {
            title: "Deep work".into(),
            plan_id: "p1".into(),
            start_min: 540,
            total_min: 60,
            apps: vec!["com.example.mail".into()],
            mode: BlockMode::Shield,
            base_amount: 0,
            bet_amount: 2,
        }
    }

    #[tokio::test]
    async fn create_record_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/record/add")
            .match_header("authorization", "Bearer secret")
            .match_header("project-tag", "focusone")
            .match_body(Matcher::PartialJson(json!({
                "plan_id": "p1",
                "total_min": 60,
                "mode": "shield",
                "bet_amount": 2
            })))
            .with_status(200)
            .with_body(r#"{"statusCode":200,"message":"ok","data":{"id":"rec-1"}}"#)
            .create_async()
            .await;

        let id = backend(&server).create_record(&record()).await.unwrap();
        assert_eq!(id, "rec-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn report_elapsed_posts_actual_minutes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/record/update/rec-1")
            .match_body(Matcher::Json(json!({ "actual_min": 7 })))
            .with_body(r#"{"statusCode":200,"data":null}"#)
            .create_async()
            .await;

        backend(&server).report_elapsed("rec-1", 7).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn envelope_rejection_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/record/fail/rec-1")
            .with_body(r#"{"statusCode":400,"message":"already closed"}"#)
            .create_async()
            .await;

        let err = backend(&server)
            .fail_record("rec-1", "user_exit")
            .await
            .unwrap_err();
        match err {
            BackendError::Rejected { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "already closed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_status_errors_keep_the_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/record/pause/rec-1")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = backend(&server).pause_record("rec-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, BackendError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn balance_comes_from_benefit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/benefit")
            .with_body(r#"{"statusCode":200,"data":{"balance":41,"rank":"bronze"}}"#)
            .create_async()
            .await;

        assert_eq!(backend(&server).fetch_balance().await.unwrap(), 41);
    }

    #[tokio::test]
    async fn missing_id_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/record/add")
            .with_body(r#"{"statusCode":200,"data":{}}"#)
            .create_async()
            .await;

        let err = backend(&server).create_record(&record()).await.unwrap_err();
        assert!(matches!(err, BackendError::MissingField("id")));
    }
}
