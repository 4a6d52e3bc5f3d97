use super::client::{ApiClient, ProgressCallback};
use super::types::{CommandContext, ExecuteResponse, InterpretResponse, UploadResponse};
use crate::shared::models::{Message, Sender, SessionUpdate};
use crate::shared::store::SessionStore;
use std::path::Path;
use tracing::{info, warn};

const PLACEHOLDER_TEXT: &str = "Processing...";
const CONTEXT_COMMANDS: usize = 5;

/// Runs API calls on behalf of a chat session and records the outcome as
/// messages in that session's timeline. Failures become bot messages; nothing
/// is retried.
pub struct ChatRelay {
    client: ApiClient,
}

impl ChatRelay {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Upload a file and attach its server id to the session.
    pub async fn upload(
        &self,
        store: &mut SessionStore,
        session_id: &str,
        path: &Path,
        mime_override: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Option<UploadResponse> {
        store.get_session(session_id)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        match self.client.upload_audio(path, mime_override, progress).await {
            Ok(uploaded) => {
                if let Some(session) = store.get_session(session_id) {
                    let mut metadata = session.metadata.clone();
                    metadata.file_id = Some(uploaded.file_id.clone());
                    store.update_session(
                        session_id,
                        SessionUpdate {
                            metadata: Some(metadata),
                            ..Default::default()
                        },
                    );
                }
                store.add_message(
                    session_id,
                    Message::bot(format!(
                        "File '{}' uploaded successfully. You can now give editing commands.",
                        file_name
                    )),
                );
                Some(uploaded)
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", file_name, e);
                let text = if e.is_validation() {
                    format!("Cannot upload '{}': {}", file_name, e)
                } else {
                    format!("Upload failed: {}", e)
                };
                store.add_message(session_id, Message::bot(text));
                None
            }
        }
    }

    /// Send a natural-language command for the session's uploaded file.
    ///
    /// The command is appended as a user message, followed by a placeholder
    /// that is replaced in place with the outcome.
    pub async fn execute(
        &self,
        store: &mut SessionStore,
        session_id: &str,
        command: &str,
    ) -> Option<ExecuteResponse> {
        let (file_id, context) = self.prepare(store, session_id, command)?;

        let placeholder = Message::bot(PLACEHOLDER_TEXT);
        let placeholder_id = placeholder.id.clone();
        store.add_message(session_id, placeholder);

        match self.client.execute_command(command, &file_id, &context).await {
            Ok(response) => {
                info!("Command executed for session {}", session_id);
                store.replace_message(session_id, &placeholder_id, &format_execution(&response));
                Some(response)
            }
            Err(e) => {
                warn!("Command failed for session {}: {}", session_id, e);
                store.replace_message(session_id, &placeholder_id, &format!("Error: {}", e));
                None
            }
        }
    }

    /// Ask the server how it would understand `command` without running it.
    pub async fn interpret(
        &self,
        store: &mut SessionStore,
        session_id: &str,
        command: &str,
    ) -> Option<InterpretResponse> {
        let (file_id, context) = self.prepare(store, session_id, command)?;

        match self.client.interpret_command(command, &file_id, &context).await {
            Ok(response) => {
                store.add_message(session_id, Message::bot(format_interpretation(&response)));
                Some(response)
            }
            Err(e) => {
                warn!("Interpretation failed for session {}: {}", session_id, e);
                store.add_message(session_id, Message::bot(format!("Error: {}", e)));
                None
            }
        }
    }

    /// Autocomplete candidates. Errors yield an empty list and leave the timeline alone.
    pub async fn suggestions(
        &self,
        store: &SessionStore,
        session_id: &str,
        partial_command: &str,
    ) -> Vec<String> {
        let Some(session) = store.get_session(session_id) else {
            return Vec::new();
        };
        let context = command_context(store, session_id);

        match self
            .client
            .command_suggestions(partial_command, session.metadata.file_id.as_deref(), &context)
            .await
        {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!("Suggestions unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Record the user's command and resolve the file it targets.
    fn prepare(
        &self,
        store: &mut SessionStore,
        session_id: &str,
        command: &str,
    ) -> Option<(String, CommandContext)> {
        let file_id = store.get_session(session_id)?.metadata.file_id.clone();
        let context = command_context(store, session_id);

        store.add_message(session_id, Message::user(command));

        match file_id {
            Some(file_id) => Some((file_id, context)),
            None => {
                store.add_message(
                    session_id,
                    Message::bot("Please upload an audio file before sending commands."),
                );
                None
            }
        }
    }
}

fn command_context(store: &SessionStore, session_id: &str) -> CommandContext {
    let previous_commands = store
        .get_session(session_id)
        .map(|session| {
            let commands: Vec<String> = session
                .messages
                .iter()
                .filter(|m| m.sender == Sender::User)
                .map(|m| m.text.clone())
                .collect();
            let skip = commands.len().saturating_sub(CONTEXT_COMMANDS);
            commands.into_iter().skip(skip).collect()
        })
        .unwrap_or_default();

    CommandContext {
        session_id: Some(session_id.to_string()),
        previous_commands,
    }
}

pub fn format_execution(response: &ExecuteResponse) -> String {
    let mut text = response
        .message
        .clone()
        .unwrap_or_else(|| "Command executed successfully.".to_string());

    if let Some(output_file) = &response.output_file {
        text.push_str(&format!("\nOutput: {}", output_file));
    }
    if let Some(seconds) = response.processing_time {
        text.push_str(&format!("\nProcessing time: {:.2}s", seconds));
    }
    text
}

pub fn format_interpretation(response: &InterpretResponse) -> String {
    let interpretation = &response.interpretation;
    let mut lines = Vec::new();

    if interpretation.valid {
        lines.push(format!(
            "Understood as '{}' ({:.0}% confidence)",
            interpretation.command_type,
            interpretation.confidence * 100.0
        ));
        for parameter in &interpretation.parameters {
            lines.push(format!("  - {}", parameter));
        }
    } else {
        lines.push("The command could not be understood.".to_string());
    }

    for warning in &interpretation.warnings {
        lines.push(format!("Warning: {}", warning));
    }
    for error in &interpretation.errors {
        lines.push(format!("Error: {}", error));
    }
    if !interpretation.suggestions.is_empty() {
        lines.push(format!(
            "Try: {}",
            interpretation.suggestions.join(" | ")
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::config::{ApiConfig, UploadConfig};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay_for(server: &MockServer) -> ChatRelay {
        let api = ApiConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        };
        ChatRelay::new(ApiClient::new(&api, UploadConfig::default()).unwrap())
    }

    fn texts(store: &SessionStore, id: &str) -> Vec<(Sender, String)> {
        store
            .get_session(id)
            .unwrap()
            .messages
            .iter()
            .map(|m| (m.sender, m.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_upload_then_execute() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audio/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "file_id": "f-9"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/audio/command/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Trimmed silence",
                "processing_time": 0.5
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("voice.mp3");
        std::fs::write(&file, b"ID3 fake mp3").unwrap();

        let relay = relay_for(&server);
        let mut store = SessionStore::in_memory();
        let id = store.create_session("edit");

        assert!(relay.upload(&mut store, &id, &file, None, None).await.is_some());
        assert_eq!(
            store.get_session(&id).unwrap().metadata.file_id.as_deref(),
            Some("f-9")
        );

        let response = relay.execute(&mut store, &id, "trim silence").await;
        assert!(response.is_some());

        let timeline = texts(&store, &id);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[1], (Sender::User, "trim silence".to_string()));
        assert_eq!(timeline[2].0, Sender::Bot);
        assert!(timeline[2].1.starts_with("Trimmed silence"));
        assert!(timeline[2].1.contains("0.50s"));
    }

    #[tokio::test]
    async fn test_network_failure_becomes_bot_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/audio/command/execute"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let relay = relay_for(&server);
        let mut store = SessionStore::in_memory();
        let id = store.create_session("edit");
        let mut metadata = store.get_session(&id).unwrap().metadata.clone();
        metadata.file_id = Some("f-1".to_string());
        store.update_session(
            &id,
            SessionUpdate {
                metadata: Some(metadata),
                ..Default::default()
            },
        );

        assert!(relay.execute(&mut store, &id, "reverse it").await.is_none());
        let timeline = texts(&store, &id);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[1].0, Sender::Bot);
        assert!(timeline[1].1.contains("500"));
        assert!(timeline[1].1.contains("boom"));
        assert!(!timeline.iter().any(|(_, t)| t == PLACEHOLDER_TEXT));
    }

    #[tokio::test]
    async fn test_command_without_upload_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let relay = relay_for(&server);
        let mut store = SessionStore::in_memory();
        let id = store.create_session("edit");

        assert!(relay.interpret(&mut store, &id, "louder").await.is_none());
        let timeline = texts(&store, &id);
        assert_eq!(timeline.len(), 2);
        assert!(timeline[1].1.contains("upload an audio file"));
    }

    #[tokio::test]
    async fn test_rejected_file_is_reported() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("slides.pdf");
        std::fs::write(&file, b"%PDF").unwrap();

        let relay = relay_for(&server);
        let mut store = SessionStore::in_memory();
        let id = store.create_session("edit");

        assert!(relay.upload(&mut store, &id, &file, None, None).await.is_none());
        let timeline = texts(&store, &id);
        assert_eq!(timeline.len(), 1);
        assert!(timeline[0].1.starts_with("Cannot upload 'slides.pdf'"));
        assert!(store.get_session(&id).unwrap().metadata.file_id.is_none());
    }

    #[test]
    fn test_context_keeps_last_commands() {
        let mut store = SessionStore::in_memory();
        let id = store.create_session("ctx");
        for i in 0..7 {
            store.add_message(&id, Message::user(format!("cmd {i}")));
            store.add_message(&id, Message::bot("ok"));
        }

        let context = command_context(&store, &id);
        assert_eq!(context.previous_commands.len(), 5);
        assert_eq!(context.previous_commands[0], "cmd 2");
        assert_eq!(context.previous_commands[4], "cmd 6");
    }

    #[test]
    fn test_format_interpretation() {
        let response: InterpretResponse = serde_json::from_value(json!({
            "success": true,
            "interpretation": {
                "valid": false,
                "errors": ["no target level"],
                "suggestions": ["normalize to -14 LUFS"]
            }
        }))
        .unwrap();

        let text = format_interpretation(&response);
        assert!(text.starts_with("The command could not be understood."));
        assert!(text.contains("Error: no target level"));
        assert!(text.contains("Try: normalize to -14 LUFS"));
    }
}
