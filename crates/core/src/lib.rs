//! Session core runtime: turn loop, tool execution, context management, and
//! the durable event log, built on [`tron_domain`]'s data model and
//! [`tron_providers`]'s streaming contract.

pub mod agent;
pub mod cancel;
pub mod compaction;
pub mod context;
pub mod event_emitter;
pub mod event_log;
pub mod runtime;
pub mod session;
pub mod stream_processor;
pub mod tools;
pub mod turn;

pub use agent::{AgentOrchestrator, QueryResult, SpawnOutcome, SubagentOutcome, SubagentStatus, WaitMode, WaitResult};
pub use cancel::{CancelMap, CancelToken};
pub use compaction::{compact, partition_for_compaction, preview_compaction, CompactionPreview, SummarizeOutput, Summarizer};
pub use context::{ContextManager, DetailedContextSnapshot, MessageSummary, ProcessedToolResult, TurnAdmission};
pub use event_emitter::{CoreEvent, EventEmitter, ListenerId};
pub use event_log::{DurableLog, EventLog};
pub use session::{ActiveSession, ModelSwitchOutcome, SessionController};
pub use stream_processor::{process_stream, NullObserver, StreamObserver, StreamProcessorError, TurnOutcome};
pub use tools::{
    ExecutionContract, Hook, HookAction, HookContext, HookType, Tool, ToolExecutionContext, ToolExecutionResponse, ToolExecutor, ToolOutcome,
    ToolRegistry,
};
pub use turn::{run_until_done, TurnResult, TurnRunner};
