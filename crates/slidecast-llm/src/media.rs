//! Gemini media generation: still images, Veo video clips and speech.
//!
//! Every call writes its artifact to a caller-chosen path and returns where it
//! landed. Speech comes back as raw 16-bit PCM and is wrapped in a WAV header
//! here so downstream tools can read the duration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use serde_json::json;

use slidecast_types::{AudioTrack, SlidecastError};

use crate::gemini::{
    api_key_from_env, first_candidate, post_json, read_json, transport_error, DEFAULT_BASE_URL,
    PROVIDER,
};

/// Gemini TTS returns mono 16-bit PCM at this rate unless the mime type says otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// GeminiMedia
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiMedia {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    pub image_model: String,
    pub video_model: String,
    pub speech_model: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl GeminiMedia {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            video_model: "veo-3.1-generate-preview".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
        }
    }

    pub fn from_env() -> Result<Self, SlidecastError> {
        Ok(Self::new(api_key_from_env()?))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    /// Generate a square still image and write it to `dest`.
    ///
    /// The file extension is replaced to match the returned mime type.
    pub async fn generate_image(
        &self,
        prompt: &str,
        dest: &Path,
    ) -> Result<PathBuf, SlidecastError> {
        let body = image_request_body(prompt);
        let url = self.model_url(&self.image_model, "generateContent");
        let reply = post_json(&self.client, &url, &body).await?;

        let (mime, data) = extract_inline_data(&reply)?;
        let path = dest.with_extension(extension_for_mime(&mime));
        write_file(&path, &data).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Image written");
        Ok(path)
    }

    /// Start a Veo generation, poll it to completion and download the clip to `dest`.
    pub async fn generate_video(
        &self,
        prompt: &str,
        dest: &Path,
    ) -> Result<PathBuf, SlidecastError> {
        let url = self.model_url(&self.video_model, "predictLongRunning");
        let body = json!({ "instances": [{ "prompt": prompt }] });
        let started = post_json(&self.client, &url, &body).await?;

        let operation = started["name"]
            .as_str()
            .ok_or_else(|| provider_error("Video operation has no name"))?
            .to_string();
        tracing::info!(operation = %operation, "Video generation started");

        let mut polls = 0;
        let finished = loop {
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            let status_url = format!("{}/{}?key={}", self.base_url, operation, self.api_key);
            let resp = self
                .client
                .get(&status_url)
                .send()
                .await
                .map_err(transport_error)?;
            let status = read_json(resp).await?;

            if status["done"].as_bool().unwrap_or(false) {
                break status;
            }
            if polls >= self.max_polls {
                return Err(SlidecastError::RequestTimeout {
                    provider: PROVIDER.into(),
                    timeout_ms: self.poll_interval.as_millis() as u64 * u64::from(polls),
                });
            }
            tracing::debug!(operation = %operation, polls, "Video generation still running");
        };

        let uri = video_uri(&finished)?;
        let resp = self
            .client
            .get(&uri)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(SlidecastError::ProviderError {
                provider: PROVIDER.into(),
                status: resp.status().as_u16(),
                message: "Failed to download generated video".into(),
                retryable: resp.status().is_server_error(),
            });
        }
        let bytes = resp.bytes().await.map_err(transport_error)?;

        let path = dest.with_extension("mp4");
        write_file(&path, &bytes).await?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "Video written");
        Ok(path)
    }

    /// Synthesize `text` with a prebuilt voice and write a WAV file to `dest`.
    pub async fn synthesize_speech(
        &self,
        text: &str,
        voice: &str,
        dest: &Path,
    ) -> Result<AudioTrack, SlidecastError> {
        let body = speech_request_body(text, voice);
        let url = self.model_url(&self.speech_model, "generateContent");
        let reply = post_json(&self.client, &url, &body).await?;

        let (mime, pcm) = extract_inline_data(&reply)?;
        let sample_rate = sample_rate_from_mime(&mime).unwrap_or(DEFAULT_SAMPLE_RATE);

        let path = dest.with_extension("wav");
        let wav = encode_wav(&pcm, sample_rate, 1);
        write_file(&path, &wav).await?;

        Ok(AudioTrack {
            duration_secs: pcm_duration(pcm.len(), sample_rate, 1),
            path,
        })
    }
}

// ---------------------------------------------------------------------------
// Request bodies and response parsing
// ---------------------------------------------------------------------------

fn image_request_body(prompt: &str) -> serde_json::Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": "1:1" }
        }
    })
}

fn speech_request_body(text: &str, voice: &str) -> serde_json::Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": text }] }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            }
        }
    })
}

/// First inline-data part of the first candidate, decoded.
fn extract_inline_data(reply: &serde_json::Value) -> Result<(String, Vec<u8>), SlidecastError> {
    let candidate = first_candidate(reply)?;
    let part = candidate["content"]["parts"]
        .as_array()
        .and_then(|parts| parts.iter().find(|p| p.get("inlineData").is_some()))
        .ok_or_else(|| provider_error("Response contains no inline media"))?;

    let inline = &part["inlineData"];
    let mime = inline["mimeType"].as_str().unwrap_or("application/octet-stream");
    let encoded = inline["data"]
        .as_str()
        .ok_or_else(|| provider_error("Inline media has no data"))?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| provider_error(&format!("Inline media is not valid base64: {e}")))?;
    Ok((mime.to_string(), data))
}

fn video_uri(operation: &serde_json::Value) -> Result<String, SlidecastError> {
    if let Some(message) = operation["error"]["message"].as_str() {
        return Err(provider_error(&format!("Video generation failed: {message}")));
    }
    operation["response"]["generateVideoResponse"]["generatedSamples"][0]["video"]["uri"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| provider_error("Video operation completed without a result"))
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// Parses `rate=NNNN` out of mime types like `audio/L16;codec=pcm;rate=24000`.
fn sample_rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.parse().ok())
}

fn provider_error(message: &str) -> SlidecastError {
    SlidecastError::ProviderError {
        provider: PROVIDER.into(),
        status: 0,
        message: message.to_string(),
        retryable: false,
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), SlidecastError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WAV helpers
// ---------------------------------------------------------------------------

const BITS_PER_SAMPLE: u16 = 16;

fn pcm_duration(bytes: usize, sample_rate: u32, channels: u16) -> f64 {
    let frame = usize::from(channels) * usize::from(BITS_PER_SAMPLE / 8);
    if sample_rate == 0 || frame == 0 {
        return 0.0;
    }
    (bytes / frame) as f64 / f64::from(sample_rate)
}

/// Wrap 16-bit little-endian PCM in a canonical 44-byte RIFF/WAVE header.
pub fn encode_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Duration in seconds of a PCM WAV file, read from its `fmt ` and `data` chunks.
pub fn wav_duration(path: &Path) -> Result<f64, SlidecastError> {
    let bytes = std::fs::read(path)?;
    parse_wav_duration(&bytes).ok_or_else(|| {
        SlidecastError::Other(format!("{} is not a readable WAV file", path.display()))
    })
}

fn parse_wav_duration(bytes: &[u8]) -> Option<f64> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut byte_rate = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().ok()?) as usize;
        let body = offset + 8;
        match id {
            b"fmt " if body + 12 <= bytes.len() => {
                byte_rate = Some(u32::from_le_bytes(bytes[body + 8..body + 12].try_into().ok()?));
            }
            b"data" => {
                let rate = byte_rate.filter(|r| *r > 0)?;
                let available = size.min(bytes.len() - body);
                return Some(available as f64 / f64::from(rate));
            }
            _ => {}
        }
        // Chunks are word-aligned.
        offset = body + size + (size % 2);
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
