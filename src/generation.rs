//! Language-model capability: grounded prompt assembly and streamed
//! generation.
//!
//! The [`Generator`] trait pushes output fragments into a channel as they
//! arrive; the orchestrator forwards and accumulates them. The concrete
//! provider speaks the Ollama `/api/generate` NDJSON streaming protocol.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::conversation::{HistoryEntry, Sender};
use crate::error::{Error, Result};

/// System instruction constraining answers strictly to the retrieved context.
/// Always the first element presented to the model.
pub const SYSTEM_INSTRUCTION: &str = "You are a document-based assistant. \
Use ONLY the information provided in the context. \
If the answer is not found in the context, reply strictly: \
\"I don't know based on the provided document.\"";

/// A grounded prompt: fixed instruction, retrieved chunks in rank order,
/// prior turns in chronological order, then the new question.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub context: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub question: String,
}

impl Prompt {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(SYSTEM_INSTRUCTION);
        out.push_str("\n\nContext:\n");
        for chunk in &self.context {
            out.push_str(chunk);
            out.push('\n');
        }
        if !self.history.is_empty() {
            out.push_str("\nConversation so far:\n");
            for entry in &self.history {
                let who = match entry.sender {
                    Sender::User => "User",
                    Sender::Bot => "Assistant",
                };
                out.push_str(who);
                out.push_str(": ");
                out.push_str(&entry.text);
                out.push('\n');
            }
        }
        out.push_str("\nQuestion:\n");
        out.push_str(&self.question);
        out
    }
}

/// Streamed text generation. Fragments are pushed into `out` in order as they
/// arrive; returning `Ok` means the stream terminated normally.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, out: mpsc::Sender<String>) -> Result<()>;
}

/// Generator backed by an Ollama-compatible server.
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    temperature: f64,
    timeout_secs: u64,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, out: mpsc::Sender<String>) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::GenerationProvider(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            "options": { "temperature": self.temperature },
        });

        let mut response = client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::GenerationProvider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::GenerationProvider(format!(
                "API error {}: {}",
                status, body_text
            )));
        }

        // One JSON object per line; a chunk may carry a partial line.
        let mut buf = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::GenerationProvider(e.to_string()))?
        {
            buf.extend_from_slice(&chunk);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if forward_line(&line, &out).await? {
                    return Ok(());
                }
            }
        }
        if !buf.is_empty() {
            forward_line(&buf, &out).await?;
        }

        Ok(())
    }
}

/// Parse one NDJSON line and forward its fragment. Returns `true` on the
/// end-of-stream marker.
async fn forward_line(line: &[u8], out: &mpsc::Sender<String>) -> Result<bool> {
    let trimmed = String::from_utf8_lossy(line);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| Error::GenerationProvider(format!("malformed stream line: {}", e)))?;

    if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
        return Err(Error::GenerationProvider(err.to_string()));
    }

    if let Some(fragment) = value.get("response").and_then(|r| r.as_str()) {
        if !fragment.is_empty() {
            // Receiver dropped means the consumer went away; stop quietly.
            let _ = out.send(fragment.to_string()).await;
        }
    }

    Ok(value.get("done").and_then(|d| d.as_bool()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_starts_with_the_instruction() {
        let prompt = Prompt {
            context: vec!["The sky is blue.".to_string()],
            history: vec![],
            question: "what color is the sky?".to_string(),
        };
        let rendered = prompt.render();
        assert!(rendered.starts_with(SYSTEM_INSTRUCTION));
        assert!(rendered.contains("The sky is blue."));
        assert!(rendered.ends_with("what color is the sky?"));
    }

    #[test]
    fn prompt_keeps_context_rank_order_and_history_order() {
        let prompt = Prompt {
            context: vec!["first chunk".to_string(), "second chunk".to_string()],
            history: vec![
                HistoryEntry {
                    sender: Sender::User,
                    text: "earlier question".to_string(),
                },
                HistoryEntry {
                    sender: Sender::Bot,
                    text: "earlier answer".to_string(),
                },
            ],
            question: "new question".to_string(),
        };
        let rendered = prompt.render();
        let first = rendered.find("first chunk").unwrap();
        let second = rendered.find("second chunk").unwrap();
        assert!(first < second);
        let q_user = rendered.find("User: earlier question").unwrap();
        let a_bot = rendered.find("Assistant: earlier answer").unwrap();
        assert!(second < q_user && q_user < a_bot);
    }

    #[tokio::test]
    async fn forward_line_extracts_fragments_and_done() {
        let (tx, mut rx) = mpsc::channel(8);
        let done = forward_line(br#"{"response": "The ", "done": false}"#, &tx)
            .await
            .unwrap();
        assert!(!done);
        assert_eq!(rx.recv().await.unwrap(), "The ");

        let done = forward_line(br#"{"response": "", "done": true}"#, &tx)
            .await
            .unwrap();
        assert!(done);
    }

    #[tokio::test]
    async fn forward_line_surfaces_provider_errors() {
        let (tx, _rx) = mpsc::channel(8);
        let err = forward_line(br#"{"error": "model not found"}"#, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GenerationProvider(_)));
    }
}
