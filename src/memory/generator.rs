use std::sync::Arc;
use std::time::Duration;

use crate::llm::{BackendError, BackendRequest, ChatMessage, ChatRole, GenerativeBackend};
use crate::memory::types::ModelVariant;

/// In-character apology sent when the backend cannot produce a reply.
pub const REPLY_FALLBACK: &str =
    "ごめん、いま頭がフリーズしてて返事できなかったｗ ちょっと時間おいてもう一回送ってみて！";

/// Sent when the relay itself failed (e.g. memory could not be saved).
pub const INTERNAL_FALLBACK: &str =
    "ごめん、こっちの調子が悪いみたい。少ししてからもう一回話しかけてね。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Reply,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNames {
    pub default: String,
    pub premium: String,
}

impl ModelNames {
    pub fn for_variant(&self, variant: ModelVariant) -> &str {
        match variant {
            ModelVariant::Default => &self.default,
            ModelVariant::Premium => &self.premium,
        }
    }
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            default: crate::llm::DEFAULT_MODEL.to_string(),
            premium: crate::llm::PREMIUM_MODEL.to_string(),
        }
    }
}

/// Adapts internal message lists to a [`GenerativeBackend`] call.
pub struct ResponseGenerator {
    backend: Arc<dyn GenerativeBackend>,
    models: ModelNames,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(backend: Arc<dyn GenerativeBackend>, models: ModelNames, timeout: Duration) -> Self {
        Self {
            backend,
            models,
            timeout,
        }
    }

    pub fn model_for(&self, variant: ModelVariant) -> &str {
        self.models.for_variant(variant)
    }

    /// One backend call. Errors come back as values; nothing here panics or
    /// hangs past the configured timeout.
    pub async fn try_generate(
        &self,
        messages: Vec<ChatMessage>,
        variant: ModelVariant,
    ) -> Result<String, BackendError> {
        let request = split_system_instruction(messages, self.model_for(variant));

        let text = tokio::time::timeout(self.timeout, self.backend.generate_content(request))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        let text = text.trim();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    /// Like [`try_generate`](Self::try_generate) but always yields text.
    pub async fn generate(&self, messages: Vec<ChatMessage>, variant: ModelVariant) -> String {
        match self.try_generate(messages, variant).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    model = self.model_for(variant),
                    error = %e,
                    "generation failed, sending fallback reply"
                );
                self.fallback(FallbackKind::Reply).to_string()
            }
        }
    }

    pub fn fallback(&self, kind: FallbackKind) -> &'static str {
        match kind {
            FallbackKind::Reply => REPLY_FALLBACK,
            FallbackKind::Internal => INTERNAL_FALLBACK,
        }
    }
}

/// A leading system message becomes the system instruction; everything after
/// it stays in order.
fn split_system_instruction(mut messages: Vec<ChatMessage>, model: &str) -> BackendRequest {
    let system_instruction = match messages.first() {
        Some(m) if m.role == ChatRole::System => Some(messages.remove(0).text),
        _ => None,
    };
    BackendRequest {
        model: model.to_string(),
        system_instruction,
        contents: messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::llm::fake::FnBackend;
    use crate::memory::types::Turn;

    fn generator(backend: Arc<FnBackend>) -> ResponseGenerator {
        ResponseGenerator::new(backend, ModelNames::default(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn leading_system_message_becomes_instruction() {
        let backend = Arc::new(FnBackend::new(|_| Ok("  hey there \n".into())));
        let gen = generator(backend.clone());

        let text = gen
            .try_generate(
                vec![
                    ChatMessage::system("persona"),
                    ChatMessage::from(&Turn::assistant("earlier")),
                    ChatMessage::user("hi"),
                ],
                ModelVariant::Premium,
            )
            .await
            .unwrap();
        assert_eq!(text, "hey there");

        let reqs = backend.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].model, crate::llm::PREMIUM_MODEL);
        assert_eq!(reqs[0].system_instruction.as_deref(), Some("persona"));
        assert_eq!(reqs[0].contents.len(), 2);
        assert_eq!(reqs[0].contents[0].role, ChatRole::Model);
    }

    #[tokio::test]
    async fn backend_error_yields_reply_fallback() {
        let backend = Arc::new(FnBackend::new(|_| {
            Err(BackendError::Http {
                status: 500,
                body: "boom".into(),
            })
        }));
        let gen = generator(backend);

        let text = gen
            .generate(vec![ChatMessage::user("hi")], ModelVariant::Default)
            .await;
        assert_eq!(text, REPLY_FALLBACK);
        assert!(!text.is_empty());
        assert!(!text.contains("boom"));
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let gen = generator(Arc::new(FnBackend::new(|_| Ok("   ".into()))));
        let err = gen
            .try_generate(vec![ChatMessage::user("hi")], ModelVariant::Default)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::EmptyResponse);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let backend = Arc::new(FnBackend::echo().with_delay(Duration::from_millis(200)));
        let gen = ResponseGenerator::new(backend, ModelNames::default(), Duration::from_millis(20));

        let err = gen
            .try_generate(vec![ChatMessage::user("hi")], ModelVariant::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
        assert_eq!(
            gen.generate(vec![ChatMessage::user("hi")], ModelVariant::Default)
                .await,
            REPLY_FALLBACK
        );
    }

    #[test]
    fn fallbacks_differ_by_kind() {
        let gen = generator(Arc::new(FnBackend::echo()));
        assert_ne!(
            gen.fallback(FallbackKind::Reply),
            gen.fallback(FallbackKind::Internal)
        );
    }
}
