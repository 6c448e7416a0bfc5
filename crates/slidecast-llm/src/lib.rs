//! Gemini client for the slidecast pipeline.
//!
//! `LlmClient` routes text requests through middleware to a registered
//! `ProviderAdapter` (Gemini in practice). `GeminiMedia` covers the
//! non-text endpoints: images, Veo clips and speech.

mod client;
mod gemini;
pub mod media;
mod types;

pub use client::*;
pub use gemini::{api_key_from_env, GeminiAdapter, DEFAULT_TEXT_MODEL};
pub use media::{encode_wav, wav_duration, GeminiMedia};
pub use types::*;
