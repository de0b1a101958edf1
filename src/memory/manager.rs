use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::llm::ChatMessage;
use crate::memory::generator::ResponseGenerator;
use crate::memory::store::MemoryStore;
use crate::memory::types::{MemoryRecord, ModelVariant, Turn};

pub const DEFAULT_PERSONA: &str = include_str!("../../prompts/persona.md");
pub const MAX_TURNS: u32 = 10;
pub const MAX_SHORT_TERM_MESSAGES: usize = 20;

pub(crate) const SUMMARY_INSTRUCTION: &str = "You maintain the long-term memory of a chat companion. \
Merge the existing summary and the new conversation below into a single coherent paragraph. \
Keep facts about the user, their plans and running jokes; drop small talk. \
Write in the language of the conversation. Return only the summary text.";

#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// Completed exchanges that trigger summarization.
    pub max_turns: u32,
    /// Hard cap on the short-term window, independent of summarization.
    pub max_short_term_messages: usize,
    pub summarization: bool,
    pub persona: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_turns: MAX_TURNS,
            max_short_term_messages: MAX_SHORT_TERM_MESSAGES,
            summarization: true,
            persona: DEFAULT_PERSONA.trim().to_string(),
        }
    }
}

/// One async mutex per participant id.
#[derive(Default)]
struct KeyedLocks {
    slots: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

/// Runs the memory lifecycle around each exchange: load, compress when the
/// window is full, build the prompt, generate, append, persist.
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    generator: Arc<ResponseGenerator>,
    settings: MemorySettings,
    locks: KeyedLocks,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        generator: Arc<ResponseGenerator>,
        settings: MemorySettings,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
            locks: KeyedLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn generator(&self) -> &ResponseGenerator {
        &self.generator
    }

    /// Handle one inbound message and return the reply text.
    ///
    /// Exchanges for the same participant are serialized; different
    /// participants proceed in parallel. Only a failed save is an error: the
    /// backend degrading is absorbed into fallback text.
    pub async fn handle_message(
        &self,
        participant_id: &str,
        incoming_text: &str,
        variant: ModelVariant,
    ) -> anyhow::Result<String> {
        let _guard = self.locks.acquire(participant_id).await;

        let mut record = self.store.get(participant_id).await?;
        self.maybe_summarize(&mut record).await;

        let messages = self.build_prompt(&record, incoming_text);
        let reply = self.generator.generate(messages, variant).await;

        record.short_term.push(Turn::user(incoming_text));
        record.short_term.push(Turn::assistant(reply.clone()));
        record.turn_count += 1;
        enforce_cap(&mut record.short_term, self.settings.max_short_term_messages);

        self.store
            .save(
                participant_id,
                &record.short_term,
                &record.long_term_summary,
                record.turn_count,
            )
            .await?;

        tracing::debug!(
            participant_id,
            turn_count = record.turn_count,
            window = record.short_term.len(),
            variant = variant.as_str(),
            "exchange recorded"
        );
        Ok(reply)
    }

    /// Compress the window into the long-term summary once it is full.
    ///
    /// Failure leaves the record untouched so the next exchange tries again.
    async fn maybe_summarize(&self, record: &mut MemoryRecord) {
        if !self.settings.summarization || record.turn_count < self.settings.max_turns {
            return;
        }

        if record.short_term.is_empty() {
            // Nothing to fold in (e.g. the log was unreadable); just restart the count.
            record.turn_count = 0;
            return;
        }

        let request = summary_request(&record.long_term_summary, &record.short_term);
        match self
            .generator
            .try_generate(request, ModelVariant::Default)
            .await
        {
            Ok(summary) => {
                tracing::info!(
                    participant_id = %record.participant_id,
                    retired = record.short_term.len(),
                    "short-term memory summarized"
                );
                record.long_term_summary = summary;
                record.short_term.clear();
                record.turn_count = 0;
            }
            Err(e) => {
                tracing::warn!(
                    participant_id = %record.participant_id,
                    turn_count = record.turn_count,
                    error = %e,
                    "summarization failed, keeping the window for a later retry"
                );
            }
        }
    }

    /// Persona (+ prior summary), the short-term window, then the new message.
    pub fn build_prompt(&self, record: &MemoryRecord, incoming_text: &str) -> Vec<ChatMessage> {
        let mut system = self.settings.persona.clone();
        if !record.long_term_summary.trim().is_empty() {
            system.push_str("\n\n[Prior summarized context]\n");
            system.push_str(record.long_term_summary.trim());
        }

        let mut messages = Vec::with_capacity(record.short_term.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(record.short_term.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(incoming_text));
        messages
    }
}

fn summary_request(summary: &str, window: &[Turn]) -> Vec<ChatMessage> {
    let previous = if summary.trim().is_empty() {
        "(none yet)"
    } else {
        summary.trim()
    };
    vec![
        ChatMessage::system(SUMMARY_INSTRUCTION),
        ChatMessage::user(format!(
            "Existing summary:\n{}\n\nConversation:\n{}",
            previous,
            render_transcript(window)
        )),
    ]
}

fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn enforce_cap(turns: &mut Vec<Turn>, max: usize) {
    if turns.len() > max {
        let excess = turns.len() - max;
        turns.drain(..excess);
    }
}
