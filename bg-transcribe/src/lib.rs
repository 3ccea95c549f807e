//! Media-to-text extraction for inbound chat content.
//!
//! Pure HTTP client; callers decide what to do with failures, usually by
//! wrapping the transcriber in [`FallbackTranscriber`].

mod error;
mod fallback;
mod openai;
mod traits;
mod types;

pub use error::{Result, TranscribeError};
pub use fallback::{DEFAULT_FALLBACK_TEXT, DisabledTranscriber, FallbackTranscriber};
pub use openai::OpenAiTranscriber;
pub use traits::ContentTranscriber;
pub use types::MediaRef;
