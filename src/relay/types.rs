use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context sent along with every audio command.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CommandContext {
    pub session_id: Option<String>,
    /// Earlier user commands in the session, oldest first
    pub previous_commands: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommandRequest<'a> {
    pub command: &'a str,
    pub file_id: &'a str,
    pub context: &'a CommandContext,
}

#[derive(Debug, Serialize)]
pub(crate) struct SuggestionsRequest<'a> {
    pub partial_command: &'a str,
    pub file_id: Option<&'a str>,
    pub context: &'a CommandContext,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetActiveModelRequest<'a> {
    pub model_id: &'a str,
}

/// Fields every API response may carry.
pub(crate) trait ApiEnvelope {
    fn success(&self) -> bool;
    fn failure_message(&self) -> Option<String>;
}

macro_rules! api_envelope {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ApiEnvelope for $ty {
                fn success(&self) -> bool {
                    self.success
                }

                fn failure_message(&self) -> Option<String> {
                    self.error.clone().or_else(|| self.message.clone())
                }
            }
        )*
    };
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Interpretation {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub command_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterpretResponse {
    pub success: bool,
    #[serde(default)]
    pub interpretation: Interpretation,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionsResponse {
    pub success: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ModelInfo {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    pub success: bool,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveModelResponse {
    pub success: bool,
    #[serde(default)]
    pub model: Option<ModelInfo>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActiveModelResponse {
    pub fn active_id(&self) -> Option<&str> {
        self.model_id
            .as_deref()
            .or_else(|| self.model.as_ref().map(|m| m.id.as_str()))
    }
}

/// Responses whose payload shape is owned by the server (metrics, status, usage).
#[derive(Debug, Clone, Deserialize)]
pub struct GenericResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

api_envelope!(
    UploadResponse,
    ExecuteResponse,
    InterpretResponse,
    SuggestionsResponse,
    ModelsResponse,
    ActiveModelResponse,
    GenericResponse,
);

/// Bytes handed to the transport so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.sent as f64 * 100.0 / self.total as f64
        }
    }
}
