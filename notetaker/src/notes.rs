use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::NotesConfig;
use crate::error::{Error, Result};
use crate::types::TranscriptSegment;

/// Schema tag for the current notes payload version.
const NOTES_SCHEMA: &str = "notes.v1";

/// Content item with an optional timestamp reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_seconds: Option<f64>,
}

/// Semantic chapter of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Emotional tone at one point of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentPoint {
    pub timestamp_seconds: i64,
    /// "positive", "negative", or "neutral".
    pub sentiment: String,
    /// -100 (very negative) to +100 (very positive).
    pub intensity: i32,
    pub description: String,
}

/// Recurring theme with frequency information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub theme: String,
    pub frequency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_moments: Option<Vec<String>>,
}

/// What the model is asked to produce: notes content without metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotesContent {
    pub summary: String,
    pub key_points: Vec<TimestampedItem>,
    pub detailed_notes: String,
    pub takeaways: Vec<TimestampedItem>,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotes: Option<Vec<TimestampedItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_timeline: Option<Vec<SentimentPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<Theme>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actionable_insights: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapters: Option<Vec<Chapter>>,
}

/// Versioned notes payload as persisted: validated content plus
/// generation metadata. The pipeline passes this through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotesPayload {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(flatten)]
    pub content: NotesContent,
    pub model_used: String,
    pub processing_time_ms: u64,
    pub generated_at: String,
}

fn default_schema() -> String {
    NOTES_SCHEMA.to_string()
}

/// Structured note generation from a transcript.
#[async_trait]
pub trait NoteGenerator: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        segments: &[TranscriptSegment],
    ) -> Result<NotesPayload>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// Builds a timestamped prompt when segments are available, asks for JSON
/// matching `NotesContent`, and validates the reply. Transport failures
/// and replies that fail validation are both retried, up to the configured
/// attempt count.
pub struct ChatApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_attempts: u32,
}

impl ChatApi {
    pub fn new(config: NotesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            model: config.model,
            max_attempts: config.max_attempts.max(1),
        })
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, "sending note generation request");

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text_truncated: String = text.chars().take(1000).collect();
            return Err(Error::NoteGeneration(format!(
                "note generation request failed with status {status}: {text_truncated}"
            )));
        }

        let completion: ChatResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::NoteGeneration("empty notes returned".into()))
    }
}

#[async_trait]
impl NoteGenerator for ChatApi {
    async fn generate(
        &self,
        text: &str,
        segments: &[TranscriptSegment],
    ) -> Result<NotesPayload> {
        if text.trim().is_empty() {
            return Err(Error::NoteGeneration(
                "cannot generate notes from empty transcript".into(),
            ));
        }

        let prompt = build_prompt(text, segments);
        let started = Instant::now();

        let mut last_error = Error::NoteGeneration("no attempts made".into());
        for attempt in 1..=self.max_attempts {
            match self.request(&prompt).await {
                Ok(content) => match parse_notes_content(&content) {
                    Ok(notes) => {
                        return Ok(NotesPayload {
                            schema: NOTES_SCHEMA.to_string(),
                            content: notes,
                            model_used: self.model.clone(),
                            processing_time_ms: started.elapsed().as_millis() as u64,
                            generated_at: Utc::now().to_rfc3339(),
                        });
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "notes reply failed validation");
                        last_error = e;
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "note generation request failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Parse a chat reply into notes content, tolerating markdown code fences.
fn parse_notes_content(reply: &str) -> Result<NotesContent> {
    let json = strip_code_fences(reply);
    serde_json::from_str(json)
        .map_err(|e| Error::NoteGeneration(format!("notes reply is not valid JSON: {e}")))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Build the note-generation prompt. With segments, each transcript line
/// carries its time range so the model can attach timestamp references.
fn build_prompt(text: &str, segments: &[TranscriptSegment]) -> String {
    let (formatted_transcript, timestamp_instruction) = if segments.is_empty() {
        (
            text.to_string(),
            "Note: Timestamp data is not available for this transcript.\n\
             For key_points, takeaways, and quotes, set timestamp_seconds to null."
                .to_string(),
        )
    } else {
        let lines: Vec<String> = segments
            .iter()
            .map(|s| format!("[{:.1}s - {:.1}s] {}", s.start, s.end, s.text))
            .collect();
        (
            lines.join("\n"),
            "IMPORTANT: For key_points, takeaways, and quotes, you MUST include timestamp references.\n\
             Use the timestamp from the segment where the content appears (look for [X.Xs - Y.Ys] markers).\n\
             For each item, include the timestamp_seconds field with the start time of the relevant segment."
                .to_string(),
        )
    };

    format!(
        "Generate comprehensive, structured notes from the following transcript.\n\
         \n\
         {timestamp_instruction}\n\
         \n\
         Respond with a single JSON object (no prose, no code fences) with these fields:\n\
         - summary: executive summary, 2-3 sentences\n\
         - key_points: main points, list of objects with 'content' and 'timestamp_seconds'\n\
         - detailed_notes: important details and context\n\
         - takeaways: main takeaways and insights, list of objects with 'content' and 'timestamp_seconds'\n\
         - tags: main topics covered, max 4 plain strings\n\
         - quotes: notable quotes with timestamps, if any, list of objects\n\
         - questions: questions raised or to follow up on, if any, plain strings\n\
         - participants: authors, specialists, or participants mentioned, if any, plain strings\n\
         - chapters: 5-10 semantic chapters based on topic transitions, each with 'title',\n\
           'start_seconds', 'end_seconds', and an optional 1-sentence 'description'\n\
         - sentiment_timeline: 5-8 moments where emotional intensity shifts, each with\n\
           'timestamp_seconds' (integer), 'sentiment' ('positive', 'negative', or 'neutral'),\n\
           'intensity' (-100 to +100), and 'description'\n\
         - themes: 3-6 recurring themes, each with 'theme', 'frequency', and optional 'key_moments'\n\
         - actionable_insights: 3-5 clinical, professional, or educational recommendations, plain strings\n\
         \n\
         Transcript:\n\
         {formatted_transcript}"
    )
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}
