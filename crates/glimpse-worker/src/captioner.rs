//! OpenAI-compatible captioning client.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use image::ImageOutputFormat;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::{CaptionOutcome, Captioner};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Longest image edge sent to the service.
pub const MAX_IMAGE_EDGE: u32 = 512;

const CAPTION_MAX_TOKENS: u32 = 300;

/// Replace `$datetime` with the current UTC time.
pub fn expand_prompt(template: &str, now: DateTime<Utc>) -> String {
    template.replace("$datetime", &now.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Chat-completions request.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

/// Chat-completions response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Captioner backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpCaptioner {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl HttpCaptioner {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: CAPTION_MAX_TOKENS,
        })
    }

    /// Build from config; fails when no API key is configured.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let api_key = config
            .llm_api_key
            .clone()
            .ok_or_else(|| WorkerError::configuration_invalid("GLIMPSE_LLM_API_KEY not set"))?;
        Self::new(
            config.llm_url.clone(),
            api_key,
            config.llm_model.clone(),
            config.caption_timeout,
        )
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn build_request(&self, prompt: &str, frames: &[PathBuf]) -> ChatRequest {
        let mut content = vec![ContentPart::Text {
            text: prompt.to_string(),
        }];
        for frame in frames {
            match encode_image(frame.clone()).await {
                Ok(data) => content.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{data}"),
                        detail: "low",
                    },
                }),
                Err(e) => warn!("Skipping unreadable frame {}: {}", frame.display(), e),
            }
        }
        ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
        }
    }

    async fn send(&self, request: &ChatRequest) -> WorkerResult<String> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(WorkerError::rate_limited(format!("{} returned 429", self.url)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::transient_io(format!(
                "captioning returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(clean_caption(&text))
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn caption(&self, prompt: &str, frames: &[PathBuf]) -> CaptionOutcome {
        let request = self.build_request(prompt, frames).await;
        debug!("Requesting caption with {} images", request.messages[0].content.len() - 1);
        match self.send(&request).await {
            Ok(text) if text.is_empty() => CaptionOutcome::Failed("empty response".to_string()),
            Ok(text) => CaptionOutcome::Text(text),
            Err(WorkerError::RateLimited(_)) => CaptionOutcome::RateLimited,
            Err(e) => CaptionOutcome::Failed(e.to_string()),
        }
    }
}

/// Collapse paragraph breaks into tabs and trim.
fn clean_caption(text: &str) -> String {
    text.replace("\n\n", "\t").trim().to_string()
}

/// Downscale a frame to [`MAX_IMAGE_EDGE`] and encode it as base64 JPEG.
async fn encode_image(path: PathBuf) -> WorkerResult<String> {
    tokio::task::spawn_blocking(move || encode_image_blocking(&path))
        .await
        .map_err(|e| WorkerError::transient_io(format!("image task: {e}")))?
}

fn encode_image_blocking(path: &Path) -> WorkerResult<String> {
    let img = image::open(path)
        .map_err(|e| WorkerError::transient_io(format!("{}: {e}", path.display())))?;
    let rgb = image::DynamicImage::ImageRgb8(img.thumbnail(MAX_IMAGE_EDGE, MAX_IMAGE_EDGE).to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageOutputFormat::Jpeg(85))
        .map_err(|e| WorkerError::transient_io(format!("jpeg encode: {e}")))?;
    Ok(STANDARD.encode(buf.into_inner()))
}
