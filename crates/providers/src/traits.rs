use tron_domain::capability::LlmCapabilities;
use tron_domain::error::Result;
use tron_domain::stream::{BoxStream, StreamEvent};
use tron_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / auth types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the Turn Runner hands a provider for a single streaming call.
/// The provider is given the full rendered context, not just the new turn —
/// it is a stateless request/response collaborator, not a session owner.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Generation knobs the Turn Runner forwards from [`tron_domain::config::RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub thinking_enabled: bool,
    pub reasoning_effort: Option<String>,
}

/// Credentials used to authenticate a `switch_model` call. Intentionally
/// opaque here — concrete adapters interpret the variant they understand.
#[derive(Debug, Clone)]
pub enum ProviderAuth {
    ApiKey(String),
    None,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The runtime's view of an LLM provider: `{ id, model, stream }` plus an
/// optional in-place model switch. Providers own retry policy internally
/// and signal retries to the caller via `StreamEvent::Retry` rather than
/// failing the whole call — the Stream Processor just observes the
/// alphabet, it never drives provider-specific backoff.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// A unique identifier for this provider instance (e.g. "anthropic-prod").
    fn id(&self) -> &str;

    /// The model currently bound to this provider instance.
    fn model(&self) -> &str;

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> &LlmCapabilities;

    /// Stream a response for the given context. Returns the stream
    /// alphabet events directly — the caller (Stream Processor) assembles
    /// them into a finalized message.
    async fn stream(
        &self,
        context: StreamContext,
        options: StreamOptions,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Rebind this provider instance to a new model/credential pair,
    /// preserving the instance's identity. Returns an error for providers
    /// that don't support in-place switching (the caller then constructs a
    /// fresh provider instead).
    async fn switch_model(&self, _new_model: &str, _new_auth: ProviderAuth) -> Result<()> {
        Err(tron_domain::error::Error::Other(
            "this provider does not support in-place model switching".into(),
        ))
    }
}
