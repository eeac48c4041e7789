//! HTTP client for the triage backend.
//!
//! Thin wrapper over `reqwest` covering the four endpoints the client needs:
//! health, agent roster, start analysis and fetch results.

use crate::models::{
    AgentDescriptor, AgentRosterResponse, AnalysisRequest, AnalysisResponse, HealthStatus,
    ResultsResponse,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors returned by [`ApiClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Cannot connect to server at {0}. Please check your connection.")]
    Connect(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Non-success status; `message` comes from the error payload.
    #[error("{message} (HTTP {status})")]
    Server { status: u16, message: String },

    #[error("Failed to parse server response: {0}")]
    Decode(String),

    #[error("{0}")]
    Request(String),
}

/// Configuration for the API client.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// Client for the backend's JSON API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ApiClientConfig,
    http_client: reqwest::Client,
}

impl ApiClient {
    pub fn new(mut config: ApiClientConfig) -> Result<Self, ApiError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// `GET /health`
    pub async fn health_check(&self) -> Result<HealthStatus, ApiError> {
        self.get("/health").await
    }

    /// `GET /api/agents/status`, mapped to a roster.
    pub async fn agent_roster(&self) -> Result<Vec<AgentDescriptor>, ApiError> {
        let response: AgentRosterResponse = self.get("/api/agents/status").await?;
        Ok(response.agents.into_iter().map(AgentDescriptor::from).collect())
    }

    /// `POST /api/analyze`
    pub async fn start_analysis(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, ApiError> {
        info!(
            "Starting analysis for {} ({} symptoms)",
            request.patient_id,
            request.symptoms.len()
        );
        let url = self.url("/api/analyze");
        let builder = self.http_client.post(&url).json(request);
        self.send(builder).await
    }

    /// `GET /api/results/{patient_id}`
    pub async fn get_results(&self, patient_id: &str) -> Result<ResultsResponse, ApiError> {
        self.get(&format!("/api/results/{}", patient_id)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        self.send(self.http_client.get(&url)).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder
            .header("X-Request-Time", Utc::now().to_rfc3339())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(self.config.timeout_seconds)
                } else if e.is_connect() {
                    ApiError::Connect(self.config.base_url.clone())
                } else {
                    ApiError::Request(format!("Failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        debug!("{} {}", status, response.url());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            ["error", "message"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| "Server error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(ApiClientConfig {
            base_url: format!("{}/", server.uri()),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            patient_id: "patient_1".to_string(),
            symptoms: vec!["chest pain".to_string()],
            vitals: None,
        }
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error": "bad input"}"#), "bad input");
        assert_eq!(error_message(r#"{"message": "try later"}"#), "try later");
        assert_eq!(
            error_message(r#"{"error": "first", "message": "second"}"#),
            "first"
        );
        assert_eq!(error_message("<html>oops</html>"), "Server error");
        assert_eq!(error_message(""), "Server error");
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = ApiClient::new(ApiClientConfig {
            base_url: "http://localhost:5000/".to_string(),
            timeout_seconds: 30,
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000");
    }

    #[tokio::test]
    async fn test_start_analysis_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .and(header_exists("X-Request-Time"))
            .and(body_json(serde_json::json!({
                "patient_id": "patient_1",
                "symptoms": ["chest pain"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "started",
                "analysis_id": "patient_1_1700000000",
                "estimated_time": "30-45 seconds",
                "patient_id": "patient_1",
                "message": "AI specialists are reviewing your case now."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).start_analysis(&request()).await.unwrap();
        assert_eq!(response.analysis_id, "patient_1_1700000000");
        assert_eq!(response.estimated_time, "30-45 seconds");
    }

    #[tokio::test]
    async fn test_start_analysis_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"error": "LLM service unavailable"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).start_analysis(&request()).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Server {
                status: 500,
                message: "LLM service unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(ApiClientConfig {
            base_url: format!("http://{}", addr),
            timeout_seconds: 5,
        })
        .unwrap();

        let err = client.health_check().await.unwrap_err();
        assert!(matches!(err, ApiError::Connect(_)));
        assert!(err.to_string().contains("Cannot connect to server"));
    }

    #[tokio::test]
    async fn test_get_results_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/results/unknown"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "No results found for patient"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_results("unknown").await.unwrap_err();
        assert!(err.to_string().contains("No results found for patient"));
    }

    #[tokio::test]
    async fn test_agent_roster() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agents/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "agents": [
                    {"id": "safety", "name": "Emergency Triage AI", "status": "ready"},
                    {"id": "cardiology", "name": "Heart Specialist AI", "status": "ready"}
                ],
                "llm_service": "operational"
            })))
            .mount(&server)
            .await;

        let roster = client_for(&server).agent_roster().await.unwrap();
        assert_eq!(
            roster,
            vec![
                AgentDescriptor::new("safety", "Emergency Triage AI"),
                AgentDescriptor::new("cardiology", "Heart Specialist AI"),
            ]
        );
    }

    #[tokio::test]
    async fn test_health_check_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "healthy",
                "timestamp": "2024-01-01T00:00:00",
                "services": {"llm": "operational", "websocket": "operational"}
            })))
            .mount(&server)
            .await;

        let health = client_for(&server).health_check().await.unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.services.get("llm").map(String::as_str), Some("operational"));
    }
}
