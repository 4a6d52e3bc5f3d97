pub mod client;
pub mod error;
pub mod timeline;
pub mod types;
pub mod validation;

pub use client::{ApiClient, ProgressCallback};
pub use error::{RelayError, Result};
pub use timeline::ChatRelay;
pub use types::*;
pub use validation::{ValidatedAudio, mime_for_extension, validate_audio_file};
