//! Exchange orchestration: provider request bodies, the proxy transport,
//! the streaming state machine and the conversation-bound runtime.

pub mod exchange;
pub mod provider;
pub mod runtime;
pub mod transport;

pub use exchange::{
    ExchangeError, ExchangeOutcome, ExchangeSlot, ExchangeState, ExchangeUpdate, Orchestrator,
    Updates,
};
pub use provider::{ChatRequest, ChatSettings, Message, ProviderError};
pub use runtime::{ChatRuntime, RuntimeError};
pub use transport::{ProxyTransport, Transport};
