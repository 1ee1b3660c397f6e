//! Provider registry.
//!
//! Holds already-constructed [`LlmProvider`] instances and the role->model
//! mapping from [`tron_domain::config::LlmConfig`]. Unlike a vendor-specific
//! gateway, this crate does not instantiate HTTP adapters itself — concrete
//! providers (real or, in tests, an in-memory fake) are built by the host
//! application and registered here.

use crate::traits::LlmProvider;
use tron_domain::config::{LlmConfig, LlmStartupPolicy};
use tron_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Holds all registered LLM providers and role assignments.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
    startup_policy: LlmStartupPolicy,
}

impl ProviderRegistry {
    /// Build an empty registry carrying the role->model mapping from config.
    /// Providers themselves are added afterward via [`Self::register`].
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut roles = HashMap::new();
        for (role_name, role_cfg) in &config.roles {
            roles.insert(role_name.clone(), role_cfg.model.clone());
        }
        Self {
            providers: HashMap::new(),
            roles,
            startup_policy: config.startup_policy,
        }
    }

    /// Register a constructed provider instance under its own id.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.id().to_string();
        tracing::info!(provider_id = %id, "registered LLM provider");
        self.providers.insert(id, provider);
    }

    /// Confirm the registry satisfies its startup policy. Called once after
    /// all registration is complete.
    pub fn check_startup_policy(&self) -> Result<()> {
        if self.providers.is_empty() && self.startup_policy == LlmStartupPolicy::RequireOne {
            return Err(Error::Config(
                "no LLM providers registered (startup_policy = require_one)".into(),
            ));
        }
        Ok(())
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Get the provider assigned to a given role (e.g. "executor", "summarizer").
    /// The role config stores "provider_id/model_name"; the provider id is
    /// the segment before the first '/'.
    pub fn for_role(&self, role: &str) -> Option<Arc<dyn LlmProvider>> {
        let model_spec = self.roles.get(role)?;
        let provider_id = model_spec.split('/').next().unwrap_or(model_spec);
        self.providers.get(provider_id).cloned()
    }

    /// Get the model name assigned to a given role.
    pub fn model_for_role(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
