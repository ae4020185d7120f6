//! Prompt manager

use serde_json::Value;

use crate::protocol::Prompt;
use crate::{Error, Result};

use super::store::{Capability, CapabilityStore, ListChangedCallback};

impl Capability for Prompt {
    type Descriptor = Prompt;

    fn key(&self) -> &str {
        &self.name
    }
    fn service_key(&self) -> &str {
        &self.service_id
    }
    fn descriptor(&self) -> Prompt {
        self.clone()
    }
}

/// Registry of prompt templates keyed by name
pub struct PromptManager {
    store: CapabilityStore<Prompt>,
}

impl PromptManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { store: CapabilityStore::new("prompt") }
    }

    /// O(1) lookup by prompt name.
    #[must_use]
    pub fn get_prompt(&self, name: &str) -> Option<Prompt> {
        self.store.get(name)
    }

    /// Insert or overwrite a prompt. Fires the list-changed callback once.
    pub fn add_prompt(&self, prompt: Prompt) {
        self.store.add(prompt);
    }

    /// Remove a prompt by name; no-op when absent.
    pub fn remove_prompt(&self, name: &str) -> bool {
        self.store.remove(name)
    }

    /// Snapshot of all prompts (defensive copy).
    #[must_use]
    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.store.list()
    }

    /// Remove every prompt owned by `service_id`.
    pub fn clear_prompts_for_service(&self, service_id: &str) -> usize {
        self.store.clear_for_service(service_id)
    }

    /// Number of prompts owned by `service_id`. O(1).
    #[must_use]
    pub fn prompt_count_for_service(&self, service_id: &str) -> usize {
        self.store.count_for_service(service_id)
    }

    /// Total number of registered prompts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when no prompts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the single list-changed callback.
    pub fn on_list_changed(&self, callback: ListChangedCallback) {
        self.store.set_on_changed(callback);
    }

    /// Render a prompt's messages with the supplied arguments. Missing
    /// required arguments fail before any substitution happens.
    pub fn render(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, Value>,
    ) -> Result<Vec<(String, String)>> {
        let prompt = self
            .get_prompt(name)
            .ok_or_else(|| Error::Registry(format!("prompt \"{name}\" not found")))?;

        for arg in &prompt.arguments {
            if arg.required && !arguments.contains_key(&arg.name) {
                return Err(Error::Registry(format!(
                    "prompt \"{name}\" requires argument \"{}\"",
                    arg.name
                )));
            }
        }

        Ok(prompt
            .messages
            .iter()
            .map(|m| (m.role.clone(), m.render(arguments)))
            .collect())
    }
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}
