//! Terminal front end for the orchestrator and the conversation store.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use thoughtline_agent::{
    ChatRuntime, ChatSettings, ExchangeState, ExchangeUpdate, Orchestrator, ProxyTransport, Updates,
};
use thoughtline_conversations::{ConversationExport, ConversationStore};
use thoughtline_core::{ProviderKind, ThoughtlineConfig};
use thoughtline_stream::TagSet;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Per-invocation overrides of the `[client]` config section.
#[derive(Debug, Default)]
pub struct ChatOverrides {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

pub fn settings_for(config: &ThoughtlineConfig, overrides: ChatOverrides) -> anyhow::Result<ChatSettings> {
    let mut settings = ChatSettings::from_config(&config.client);
    if let Some(p) = overrides.provider {
        settings.provider = ProviderKind::parse(&p)
            .with_context(|| format!("unknown provider '{p}' (expected openai or anthropic)"))?;
    }
    if let Some(url) = overrides.base_url {
        settings.base_url = url;
    }
    if let Some(model) = overrides.model {
        settings.model = model;
    }
    Ok(settings)
}

pub async fn run_chat(
    config: &ThoughtlineConfig,
    prompt: String,
    conversation: Option<String>,
    overrides: ChatOverrides,
) -> anyhow::Result<()> {
    let settings = settings_for(config, overrides)?;
    let tags = TagSet::from_config(&config.thinking).context("invalid [thinking] tags")?;
    let transport = Arc::new(ProxyTransport::new(&config.client.proxy_url));
    info!(endpoint = %transport.endpoint(), provider = %settings.provider, "chat via gateway");

    let store = Arc::new(ConversationStore::open(&config.database.path)?);
    let runtime = Arc::new(ChatRuntime::new(Orchestrator::new(transport, tags), store));

    let conversation_id = match conversation {
        Some(id) => id,
        None => runtime.new_conversation()?.id,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_updates(rx));

    let stopper = {
        let runtime = Arc::clone(&runtime);
        let id = conversation_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                runtime.stop(&id);
            }
        })
    };

    let result = runtime
        .send_prompt(&conversation_id, &prompt, &settings, Updates::new(tx))
        .await;
    stopper.abort();
    // The sender was moved into the exchange; the printer drains and exits.
    let _ = printer.await;

    let outcome = result?;
    if let Some(err) = &outcome.error {
        warn!(code = err.code(), "exchange ended with error");
        eprintln!("\n[{}] {}", err.code(), err);
    }
    if let Some(total) = outcome.usage.total() {
        eprintln!("\n[tokens: {total}]");
    }
    eprintln!("[conversation: {conversation_id}]");
    Ok(())
}

/// Reasoning goes to stderr and the answer to stdout, so piping the
/// command keeps only the answer.
async fn print_updates(mut rx: mpsc::UnboundedReceiver<ExchangeUpdate>) {
    let mut in_thinking = false;
    while let Some(update) = rx.recv().await {
        match update {
            ExchangeUpdate::Thinking(text) => {
                if !in_thinking {
                    eprint!("[thinking] ");
                    in_thinking = true;
                }
                eprint!("{text}");
                let _ = std::io::stderr().flush();
            }
            ExchangeUpdate::Content(text) => {
                if in_thinking {
                    eprintln!();
                    in_thinking = false;
                }
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            ExchangeUpdate::Retrying { reason } => {
                eprintln!("\n[retrying without usage reporting: {reason}]");
                in_thinking = false;
            }
            ExchangeUpdate::State(ExchangeState::Aborting) => eprintln!("\n[stopped]"),
            ExchangeUpdate::State(_) | ExchangeUpdate::Usage(_) => {}
        }
    }
    println!();
}

pub fn list_conversations(config: &ThoughtlineConfig, limit: usize) -> anyhow::Result<()> {
    let store = ConversationStore::open(&config.database.path)?;
    let conversations = store.list(limit)?;
    if conversations.is_empty() {
        println!("no conversations");
        return Ok(());
    }
    for c in conversations {
        let title = if c.title.is_empty() { "(untitled)" } else { c.title.as_str() };
        println!("{}  {:>4} msgs  {}  {}", c.id, c.message_count, c.updated_at, title);
    }
    Ok(())
}

pub fn export_conversation(
    config: &ThoughtlineConfig,
    id: &str,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let store = ConversationStore::open(&config.database.path)?;
    let export = store.export(id)?;
    let json = serde_json::to_string_pretty(&export)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {path}"))?;
            eprintln!("exported {} messages to {path}", export.messages.len());
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn import_conversation(config: &ThoughtlineConfig, file: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    let export: ConversationExport =
        serde_json::from_str(&raw).with_context(|| format!("{file} is not a conversation export"))?;
    let store = ConversationStore::open(&config.database.path)?;
    let conversation = store.import(&export)?;
    println!("{}", conversation.id);
    Ok(())
}
