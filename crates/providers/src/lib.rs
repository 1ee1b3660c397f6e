//! Provider interface and registry for the session core runtime.
//!
//! This crate defines the minimal streaming contract the Turn Runner uses to
//! talk to an LLM: `{ id, model, stream, switch_model }`. It does not ship
//! concrete vendor adapters — those live in the host application and are
//! registered into a [`ProviderRegistry`] at startup.

pub mod registry;
pub mod traits;
pub mod util;

pub use registry::ProviderRegistry;
pub use traits::{LlmProvider, ProviderAuth, StreamContext, StreamOptions};
