use super::error::{RelayError, Result};
use crate::shared::config::UploadConfig;
use std::path::Path;
use tracing::warn;

/// MIME type for a known audio extension.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let mime = match extension.to_ascii_lowercase().as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        _ => return None,
    };
    Some(mime)
}

/// A file that passed the client-side checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAudio {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Check extension, MIME type and size before an upload is attempted.
///
/// `mime_override` replaces the type derived from the extension, mirroring a
/// browser-supplied `File.type`.
pub fn validate_audio_file(
    path: &Path,
    size: u64,
    mime_override: Option<&str>,
    config: &UploadConfig,
) -> Result<ValidatedAudio> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| RelayError::Validation(format!("Not a file: {}", path.display())))?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if !config
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        warn!("Rejected upload {}: extension {:?}", file_name, extension);
        return Err(RelayError::Validation(format!(
            "Unsupported file type '.{}'. Allowed: {}",
            extension,
            config.allowed_extensions.join(", ")
        )));
    }

    let mime_type = match mime_override {
        Some(mime) => mime.to_string(),
        None => mime_for_extension(&extension)
            .unwrap_or("application/octet-stream")
            .to_string(),
    };

    // Parameters such as `;codecs=opus` do not affect the check.
    let essence = mime_type.split(';').next().unwrap_or("").trim();
    if !config
        .allowed_mime_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    {
        warn!("Rejected upload {}: MIME type {}", file_name, mime_type);
        return Err(RelayError::Validation(format!(
            "Unsupported audio format '{}'",
            mime_type
        )));
    }

    let max = config.max_file_size_bytes();
    if size > max {
        warn!(
            "Rejected upload {}: {} bytes (max: {} bytes)",
            file_name, size, max
        );
        return Err(RelayError::Validation(format!(
            "File is too large ({:.1} MB). Maximum size is {} MB",
            size as f64 / (1024.0 * 1024.0),
            config.max_file_size_mb
        )));
    }

    Ok(ValidatedAudio {
        file_name,
        mime_type,
        size,
    })
}
