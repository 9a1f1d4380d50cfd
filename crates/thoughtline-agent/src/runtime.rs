use std::sync::Arc;

use thoughtline_conversations::{Conversation, ConversationError, ConversationStore};
use thoughtline_core::ChatMessage;
use tracing::{debug, info};

use crate::exchange::{ExchangeError, ExchangeOutcome, Orchestrator, Updates};
use crate::provider::{ChatRequest, ChatSettings, Message};

/// Titles derived from the first prompt are cut to this many characters.
const AUTO_TITLE_CHARS: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

/// Binds the orchestrator to persisted conversations: one call per user
/// prompt, history in, finished messages out.
pub struct ChatRuntime {
    orchestrator: Orchestrator,
    store: Arc<ConversationStore>,
}

impl ChatRuntime {
    pub fn new(orchestrator: Orchestrator, store: Arc<ConversationStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Cancel the running exchange of a conversation, if any.
    pub fn stop(&self, conversation_id: &str) -> bool {
        self.orchestrator.stop(conversation_id)
    }

    /// Start an untitled conversation; the first prompt names it.
    pub fn new_conversation(&self) -> Result<Conversation, RuntimeError> {
        Ok(self.store.create("")?)
    }

    /// Send `prompt` in the context of a stored conversation.
    ///
    /// The user message is persisted before anything is sent; the assistant
    /// message is persisted whenever the exchange produced text, including a
    /// stopped or failed one.
    pub async fn send_prompt(
        &self,
        conversation_id: &str,
        prompt: &str,
        settings: &ChatSettings,
        updates: Updates,
    ) -> Result<ExchangeOutcome, RuntimeError> {
        let conversation = self
            .store
            .get(conversation_id)?
            .ok_or_else(|| ConversationError::NotFound {
                id: conversation_id.to_string(),
            })?;

        // Stored reasoning is never re-sent; only answer text goes upstream.
        let mut history: Vec<Message> = self
            .store
            .messages(conversation_id)?
            .iter()
            .map(Message::from)
            .collect();
        history.push(Message::user(prompt));
        let request = ChatRequest::new(settings.clone(), history);

        Orchestrator::validate(&request)?;
        // Claimed before anything is written, so a concurrent send for the
        // same conversation fails with Busy and leaves the store untouched.
        let slot = self.orchestrator.begin(conversation_id)?;

        self.store
            .append_message(conversation_id, &ChatMessage::user(prompt))?;
        if conversation.title.trim().is_empty() {
            self.store
                .rename(conversation_id, &auto_title(prompt))?;
        }
        debug!(
            conversation = %conversation_id,
            turns = request.messages.len(),
            model = %settings.model,
            "sending prompt"
        );

        let outcome = self.orchestrator.run_in(slot, request, updates).await;

        if let Some(message) = &outcome.message {
            self.store.append_message(conversation_id, message)?;
            info!(conversation = %conversation_id, chars = message.content.len(), "assistant message saved");
        }
        Ok(outcome)
    }
}

fn auto_title(prompt: &str) -> String {
    let line = prompt.trim().lines().next().unwrap_or_default();
    let mut title: String = line.chars().take(AUTO_TITLE_CHARS).collect();
    if line.chars().count() > AUTO_TITLE_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::transport::{ByteStream, Transport};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use thoughtline_core::{ProviderKind, ProxyRequest, Role};
    use thoughtline_stream::TagSet;

    /// Replies to every request with the same body and records what was sent.
    struct EchoTransport {
        body: &'static str,
        seen: Mutex<Vec<ProxyRequest>>,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn open(&self, req: &ProxyRequest) -> Result<ByteStream, ProviderError> {
            self.seen.lock().unwrap().push(req.clone());
            let chunk: Result<Bytes, ProviderError> = Ok(Bytes::from(self.body));
            Ok(Box::pin(futures_util::stream::iter(vec![chunk])))
        }
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            provider: ProviderKind::OpenAi,
            base_url: "https://api.example.com".to_string(),
            api_key: "sk-test".to_string(),
            model: "m".to_string(),
            system: None,
            max_tokens: 64,
            include_usage: false,
        }
    }

    fn runtime(body: &'static str) -> (ChatRuntime, Arc<EchoTransport>) {
        let transport = Arc::new(EchoTransport {
            body,
            seen: Mutex::new(Vec::new()),
        });
        let store = Arc::new(ConversationStore::in_memory().unwrap());
        let orchestrator = Orchestrator::new(transport.clone(), TagSet::default());
        (ChatRuntime::new(orchestrator, store), transport)
    }

    const REPLY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"<think>plan</think>Done.\"}}]}\n\ndata: [DONE]\n\n";

    #[tokio::test]
    async fn persists_both_turns_and_names_conversation() {
        let (rt, _) = runtime(REPLY);
        let conv = rt.new_conversation().unwrap();

        let outcome = rt
            .send_prompt(&conv.id, "Summarise the plan", &settings(), Updates::none())
            .await
            .unwrap();
        assert!(outcome.is_success());

        let messages = rt.store().messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "Done.");
        assert_eq!(messages[1].thinking.as_deref(), Some("plan"));

        let conv = rt.store().get(&conv.id).unwrap().unwrap();
        assert_eq!(conv.title, "Summarise the plan");
    }

    #[tokio::test]
    async fn history_is_resent_without_thinking() {
        let (rt, transport) = runtime(REPLY);
        let conv = rt.new_conversation().unwrap();

        rt.send_prompt(&conv.id, "first", &settings(), Updates::none())
            .await
            .unwrap();
        rt.send_prompt(&conv.id, "second", &settings(), Updates::none())
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        let messages = seen[1].body["messages"].as_array().unwrap().clone();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Done.");
        assert_eq!(messages[2]["content"], "second");
    }

    #[tokio::test]
    async fn unknown_conversation_is_rejected() {
        let (rt, transport) = runtime(REPLY);
        let err = rt
            .send_prompt("missing", "hi", &settings(), Updates::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Conversation(ConversationError::NotFound { .. })
        ));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_settings_persist_nothing() {
        let (rt, _) = runtime(REPLY);
        let conv = rt.new_conversation().unwrap();
        let mut s = settings();
        s.model.clear();

        let err = rt
            .send_prompt(&conv.id, "hi", &s, Updates::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Exchange(ExchangeError::Validation { field: "model", .. })
        ));
        assert!(rt.store().messages(&conv.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn busy_conversation_persists_nothing() {
        let (rt, transport) = runtime(REPLY);
        let conv = rt.new_conversation().unwrap();

        let held = rt.orchestrator.begin(&conv.id).unwrap();
        let err = rt
            .send_prompt(&conv.id, "hi", &settings(), Updates::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Exchange(ExchangeError::Busy(_))));
        assert!(rt.store().messages(&conv.id).unwrap().is_empty());
        assert_eq!(rt.store().get(&conv.id).unwrap().unwrap().title, "");
        assert!(transport.seen.lock().unwrap().is_empty());

        drop(held);
        rt.send_prompt(&conv.id, "hi", &settings(), Updates::none())
            .await
            .unwrap();
        assert_eq!(rt.store().messages(&conv.id).unwrap().len(), 2);
    }

    #[test]
    fn auto_title_truncates() {
        assert_eq!(auto_title("  short\nsecond line"), "short");
        let long = "x".repeat(60);
        let title = auto_title(&long);
        assert_eq!(title.chars().count(), AUTO_TITLE_CHARS + 1);
        assert!(title.ends_with('…'));
    }
}
