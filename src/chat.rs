//! Retrieval-augmented chat orchestration.
//!
//! One linear flow per request: ensure the thread exists, persist the user's
//! message durably, retrieve grounding context, assemble the prompt, stream
//! model output to the caller while accumulating it, and persist the full
//! reply when the stream ends. A stream that terminates abnormally still
//! persists whatever was accumulated; the user's input is never rolled back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::conversation::{ConversationStore, HistoryEntry, Sender};
use crate::error::{Error, Result};
use crate::generation::{Generator, Prompt};
use crate::retrieve::Retriever;

/// Fixed reply emitted when no build has succeeded yet.
pub const KNOWLEDGE_BASE_NOT_BUILT: &str =
    "Knowledge base not built yet. Please upload a document first.";

/// How many prior turns are loaded into the prompt.
const HISTORY_LIMIT: i64 = 50;

/// One element of the answer stream. Channel close is end-of-stream; an
/// `Error` marker is the last event of an abnormally terminated stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Token(String),
    Error(String),
}

#[derive(Clone)]
pub struct ChatEngine {
    store: ConversationStore,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
}

impl ChatEngine {
    pub fn new(
        store: ConversationStore,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            store,
            retriever,
            generator,
        }
    }

    /// Answer `message` in `thread_id`, streaming text fragments.
    ///
    /// The user message is persisted before this returns, so a later failure
    /// never loses it. Returns `Err` only for pre-stream store failures;
    /// everything after that surfaces on the stream itself.
    pub async fn stream_answer(
        &self,
        message: &str,
        thread_id: &str,
    ) -> Result<mpsc::Receiver<AnswerEvent>> {
        self.store.get_or_create_thread(thread_id).await?;

        // Prior turns only; the new question is added to the prompt separately.
        let history = self.store.list_messages(thread_id, HISTORY_LIMIT, 0).await?;
        self.store
            .append_message(thread_id, Sender::User, message)
            .await?;

        let (tx, rx) = mpsc::channel(32);
        let engine = self.clone();
        let message = message.to_string();
        let thread_id = thread_id.to_string();
        tokio::spawn(async move {
            engine.run_exchange(&message, &thread_id, history, tx).await;
        });

        Ok(rx)
    }

    async fn run_exchange(
        &self,
        message: &str,
        thread_id: &str,
        history: Vec<HistoryEntry>,
        tx: mpsc::Sender<AnswerEvent>,
    ) {
        let hits = match self.retriever.retrieve(message).await {
            Ok(hits) => hits,
            Err(Error::IndexUnavailable) => {
                // Short-circuit: no model call, fixed reply, still persisted.
                let _ = tx
                    .send(AnswerEvent::Token(KNOWLEDGE_BASE_NOT_BUILT.to_string()))
                    .await;
                self.persist_reply(thread_id, KNOWLEDGE_BASE_NOT_BUILT).await;
                return;
            }
            Err(e) => {
                warn!(thread_id, error = %e, "retrieval failed");
                let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
                return;
            }
        };

        let prompt = Prompt {
            context: hits.into_iter().map(|h| h.text).collect(),
            history,
            question: message.to_string(),
        }
        .render();

        let (gen_tx, mut gen_rx) = mpsc::channel(32);
        let generator = Arc::clone(&self.generator);
        let generation =
            tokio::spawn(async move { generator.generate(&prompt, gen_tx).await });

        // Forward fragments immediately while accumulating the full reply.
        let mut full_reply = String::new();
        while let Some(fragment) = gen_rx.recv().await {
            full_reply.push_str(&fragment);
            let _ = tx.send(AnswerEvent::Token(fragment)).await;
        }

        let outcome = match generation.await {
            Ok(result) => result,
            Err(e) => Err(Error::GenerationProvider(format!("generation task: {}", e))),
        };

        if let Err(e) = outcome {
            warn!(thread_id, error = %e, "generation stream terminated abnormally");
            let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
            // Keep the partial reply rather than discarding it.
            if full_reply.is_empty() {
                return;
            }
        }

        self.persist_reply(thread_id, &full_reply).await;
    }

    async fn persist_reply(&self, thread_id: &str, text: &str) {
        if let Err(e) = self.store.append_message(thread_id, Sender::Bot, text).await {
            warn!(thread_id, error = %e, "failed to persist bot reply");
        }
    }
}
