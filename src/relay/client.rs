use super::error::{RelayError, Result};
use super::types::{
    ActiveModelResponse, ApiEnvelope, CommandContext, CommandRequest, ExecuteResponse,
    GenericResponse, InterpretResponse, ModelsResponse, SetActiveModelRequest, SuggestionsRequest,
    SuggestionsResponse, UploadProgress, UploadResponse,
};
use super::validation::validate_audio_file;
use crate::shared::config::{ApiConfig, UploadConfig};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Typed client for the audio processing API.
///
/// # Examples
///
/// ```no_run
/// use audio_chat::relay::ApiClient;
/// use audio_chat::shared::config::{ApiConfig, UploadConfig};
///
/// # async fn example() -> audio_chat::relay::Result<()> {
/// let client = ApiClient::new(&ApiConfig::default(), UploadConfig::default())?;
/// let models = client.list_models().await?;
/// println!("{} models available", models.models.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    upload: UploadConfig,
}

impl ApiClient {
    pub fn new(api: &ApiConfig, upload: UploadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            upload,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_envelope<T>(&self, response: Response) -> Result<T>
    where
        T: DeserializeOwned + ApiEnvelope,
    {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = error_text(&text);
            error!("API returned error {}: {}", status, body);
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: T = response.json().await?;
        if !parsed.success() {
            let message = parsed
                .failure_message()
                .unwrap_or_else(|| "The server reported a failure".to_string());
            debug!("API reported failure: {}", message);
            return Err(RelayError::Api(message));
        }

        Ok(parsed)
    }

    async fn get<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned + ApiEnvelope,
    {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        self.read_envelope(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned + ApiEnvelope,
    {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self.client.post(&url).json(body).send().await?;
        self.read_envelope(response).await
    }

    /// Validate and upload an audio file as multipart field `audio_file`.
    ///
    /// Validation failures return before any request is made. `progress` is
    /// invoked as each chunk of the body is handed to the transport.
    pub async fn upload_audio(
        &self,
        path: &Path,
        mime_override: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResponse> {
        let size = tokio::fs::metadata(path).await?.len();
        let validated = validate_audio_file(path, size, mime_override, &self.upload)?;

        let data = Bytes::from(tokio::fs::read(path).await?);
        let total = data.len() as u64;
        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(UPLOAD_CHUNK_BYTES)
            .map(|start| data.slice(start..(start + UPLOAD_CHUNK_BYTES).min(data.len())))
            .collect();

        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(progress) = &progress {
                progress(UploadProgress { sent, total });
            }
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(validated.file_name.clone())
            .mime_str(&validated.mime_type)?;
        let form = Form::new().part("audio_file", part);

        info!(
            "Uploading {} ({} bytes, {})",
            validated.file_name, total, validated.mime_type
        );

        let url = self.url("/api/audio/upload");
        let response = self.client.post(&url).multipart(form).send().await?;
        let uploaded: UploadResponse = self.read_envelope(response).await?;

        info!("Uploaded {} as {}", validated.file_name, uploaded.file_id);
        Ok(uploaded)
    }

    pub async fn execute_command(
        &self,
        command: &str,
        file_id: &str,
        context: &CommandContext,
    ) -> Result<ExecuteResponse> {
        self.post_json(
            "/api/audio/command/execute",
            &CommandRequest {
                command,
                file_id,
                context,
            },
        )
        .await
    }

    pub async fn interpret_command(
        &self,
        command: &str,
        file_id: &str,
        context: &CommandContext,
    ) -> Result<InterpretResponse> {
        self.post_json(
            "/api/audio/command/interpret",
            &CommandRequest {
                command,
                file_id,
                context,
            },
        )
        .await
    }

    pub async fn command_suggestions(
        &self,
        partial_command: &str,
        file_id: Option<&str>,
        context: &CommandContext,
    ) -> Result<Vec<String>> {
        let response: SuggestionsResponse = self
            .post_json(
                "/api/audio/command/suggestions",
                &SuggestionsRequest {
                    partial_command,
                    file_id,
                    context,
                },
            )
            .await?;
        Ok(response.suggestions)
    }

    pub async fn list_models(&self) -> Result<ModelsResponse> {
        self.get("/api/llm/models").await
    }

    pub async fn active_model(&self) -> Result<ActiveModelResponse> {
        self.get("/api/llm/active-model").await
    }

    pub async fn set_active_model(&self, model_id: &str) -> Result<ActiveModelResponse> {
        info!("Switching active model to {}", model_id);
        self.post_json("/api/llm/active-model", &SetActiveModelRequest { model_id })
            .await
    }

    pub async fn model_metrics(&self) -> Result<GenericResponse> {
        self.get("/api/llm/model-metrics").await
    }

    pub async fn connection_status(&self) -> Result<GenericResponse> {
        self.get("/api/llm/connection-status").await
    }

    pub async fn usage_stats(&self) -> Result<GenericResponse> {
        self.get("/api/llm/usage-stats").await
    }
}

/// Pull `error`/`message` out of a JSON error body, else return the raw text.
fn error_text(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        let api = ApiConfig {
            base_url: format!("{}/", server.uri()),
            timeout_secs: 5,
        };
        ApiClient::new(&api, UploadConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audio/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "file_id": "f-123",
                "metadata": {"duration": 2.5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("take.wav");
        std::fs::write(&file, vec![7u8; 200 * 1024]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |p: UploadProgress| sink.lock().unwrap().push(p));

        let response = client_for(&server)
            .upload_audio(&file, None, Some(progress))
            .await
            .unwrap();
        assert_eq!(response.file_id, "f-123");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(
            seen.last(),
            Some(&UploadProgress {
                sent: 200 * 1024,
                total: 200 * 1024
            })
        );
        assert!(seen.windows(2).all(|w| w[0].sent < w[1].sent));
    }

    #[tokio::test]
    async fn test_invalid_upload_never_hits_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "not audio").unwrap();

        let err = client_for(&server)
            .upload_audio(&file, None, None)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_execute_sends_command_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audio/command/execute"))
            .and(body_json(json!({
                "command": "normalize to -14 LUFS",
                "file_id": "f-1",
                "context": {"session_id": "s1", "previous_commands": []}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Normalized",
                "output_file": "out.wav",
                "processing_time": 1.5
            })))
            .mount(&server)
            .await;

        let context = CommandContext {
            session_id: Some("s1".to_string()),
            previous_commands: Vec::new(),
        };
        let response = client_for(&server)
            .execute_command("normalize to -14 LUFS", "f-1", &context)
            .await
            .unwrap();
        assert_eq!(response.output_file.as_deref(), Some("out.wav"));
    }

    #[tokio::test]
    async fn test_success_false_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audio/command/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "Unknown command"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .execute_command("dance", "f-1", &CommandContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Api(ref m) if m == "Unknown command"));
    }

    #[tokio::test]
    async fn test_http_status_error_extracts_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/llm/models"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({"error": "LLM offline"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).list_models().await.unwrap_err();
        match err {
            RelayError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "LLM offline");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_llm_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/llm/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "models": [{"id": "llama3", "name": "Llama 3", "provider": "ollama"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/llm/active-model"))
            .and(body_json(json!({"model_id": "llama3"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "model_id": "llama3"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/llm/connection-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "connected": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let models = client.list_models().await.unwrap();
        assert_eq!(models.models[0].provider.as_deref(), Some("ollama"));

        let active = client.set_active_model("llama3").await.unwrap();
        assert_eq!(active.active_id(), Some("llama3"));

        let status = client.connection_status().await.unwrap();
        assert_eq!(status.data.get("connected"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_llm_read_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/llm/active-model"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "model": {"id": "mistral", "name": "Mistral 7B"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/llm/model-metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "metrics": {"avg_latency_ms": 420}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/llm/usage-stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "total_requests": 17
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let active = client.active_model().await.unwrap();
        assert_eq!(active.active_id(), Some("mistral"));
        assert_eq!(
            active.model.as_ref().map(|m| m.display_name()),
            Some("Mistral 7B")
        );

        let metrics = client.model_metrics().await.unwrap();
        assert_eq!(
            metrics.data.get("metrics"),
            Some(&json!({"avg_latency_ms": 420}))
        );

        let usage = client.usage_stats().await.unwrap();
        assert_eq!(usage.data.get("total_requests"), Some(&json!(17)));
    }

    #[tokio::test]
    async fn test_suggestions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audio/command/suggestions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "suggestions": ["normalize to -14 LUFS", "normalize peaks"]
            })))
            .mount(&server)
            .await;

        let suggestions = client_for(&server)
            .command_suggestions("norm", None, &CommandContext::default())
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 2);
    }

    #[test]
    fn test_error_text() {
        assert_eq!(error_text(r#"{"message":"bad"}"#), "bad");
        assert_eq!(error_text("  plain failure \n"), "plain failure");
    }
}
