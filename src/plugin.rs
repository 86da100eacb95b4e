//! Plugins against a fixed set of capabilities.
//!
//! A plugin implements [`Plugin`] and is handed a [`PluginContext`] on
//! activation. The context exposes two capabilities: the note
//! [`Repository`] and a [`PluginStorage`] namespaced to the plugin's id.
//! Plugins are registered in a [`PluginRegistry`]; one plugin failing to
//! activate never prevents the others from running.

use crate::domain::Note;
use crate::error::{Failure, MarginError, MarginResult};
use crate::repository::Repository;
use crate::storage::{KeyValueStore, validate_key};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique id; also the namespace of the plugin's storage.
    fn id(&self) -> &str;

    async fn activate(&self, context: &PluginContext) -> MarginResult<()>;

    async fn deactivate(&self) -> MarginResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct PluginContext {
    pub notes: Arc<dyn Repository<Note>>,
    pub storage: PluginStorage,
}

/// Key-value storage private to one plugin.
///
/// Keys are stored as `plugin:{id}:{key}` so plugins cannot read each
/// other's data or the note domains.
#[derive(Clone)]
pub struct PluginStorage {
    plugin_id: String,
    store: Arc<dyn KeyValueStore>,
}

impl PluginStorage {
    pub fn new(plugin_id: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        PluginStorage {
            plugin_id: plugin_id.into(),
            store,
        }
    }

    fn namespaced(&self, key: &str) -> MarginResult<String> {
        validate_key(key)?;
        Ok(format!("{}{key}", self.prefix()))
    }

    fn prefix(&self) -> String {
        format!("plugin:{}:", self.plugin_id)
    }

    pub async fn get(&self, key: &str) -> MarginResult<Option<String>> {
        self.store.get(&self.namespaced(key)?).await
    }

    pub async fn set(&self, key: &str, value: &str) -> MarginResult<()> {
        self.store.set(&self.namespaced(key)?, value).await
    }

    pub async fn remove(&self, key: &str) -> MarginResult<bool> {
        self.store.remove(&self.namespaced(key)?).await
    }

    /// The plugin's own keys, without the namespace prefix.
    pub async fn keys(&self) -> MarginResult<Vec<String>> {
        let prefix = self.prefix();
        let keys = self.store.keys_with_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    active: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin; ids must be valid storage keys and unique.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> MarginResult<()> {
        let id = plugin.id().to_string();
        validate_key(&id)
            .map_err(|_| MarginError::Validation(format!("invalid plugin id '{id}'")))?;

        if self.plugins.iter().any(|existing| existing.id() == id) {
            return Err(MarginError::Validation(format!(
                "plugin '{id}' is already registered"
            )));
        }

        self.plugins.push(plugin);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Ids of plugins that activated successfully, in activation order.
    pub fn active(&self) -> &[String] {
        &self.active
    }

    /// Activates every registered plugin not yet active. Returns the failures
    /// keyed by plugin id.
    pub async fn activate_all(
        &mut self,
        notes: Arc<dyn Repository<Note>>,
        store: Arc<dyn KeyValueStore>,
    ) -> Vec<(String, Failure)> {
        let mut failures = Vec::new();

        for plugin in &self.plugins {
            let id = plugin.id().to_string();
            if self.active.contains(&id) {
                continue;
            }

            let context = PluginContext {
                notes: notes.clone(),
                storage: PluginStorage::new(&id, store.clone()),
            };
            match plugin.activate(&context).await {
                Ok(()) => {
                    tracing::info!(plugin = %id, "plugin activated");
                    self.active.push(id);
                }
                Err(e) => {
                    tracing::warn!(plugin = %id, error = %e, "plugin failed to activate");
                    failures.push((id, Failure::from(&e)));
                }
            }
        }

        failures
    }

    /// Deactivates active plugins in reverse activation order.
    pub async fn deactivate_all(&mut self) {
        while let Some(id) = self.active.pop() {
            let Some(plugin) = self.plugins.iter().find(|plugin| plugin.id() == id) else {
                continue;
            };
            if let Err(e) = plugin.deactivate().await {
                tracing::warn!(plugin = %id, error = %e, "plugin failed to deactivate");
            }
        }
    }
}
