use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;

/// A module receives the direct envelopes addressed to its id.
#[async_trait]
pub trait ModuleHandler {
    /// Id the module is registered under.
    fn module_id(&self) -> &str;

    /// Handle an envelope that reached this node.
    async fn handle(&self, envelope: Envelope) -> Result<()>;
}

/// Shared module trait object.
pub type SharedModuleHandler = Arc<dyn ModuleHandler + Send + Sync>;

/// Modules of a node, keyed by id.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, SharedModuleHandler>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Each id can only be taken once.
    pub fn register(&self, module: SharedModuleHandler) -> Result<()> {
        let id = module.module_id().to_string();
        if self.modules.contains_key(&id) {
            return Err(Error::ModuleAlreadyRegistered(id));
        }
        tracing::debug!("register module {}", id);
        self.modules.insert(id, module);
        Ok(())
    }

    /// Get a module by id.
    pub fn get(&self, id: &str) -> Option<SharedModuleHandler> {
        self.modules.get(id).map(|m| m.value().clone())
    }

    /// Ids of all registered modules.
    pub fn ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.key().clone()).collect()
    }

    /// Hand a direct envelope to its module.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let Some((id, _)) = envelope.module() else {
            return Err(Error::UnknownModule("relayed".to_string()));
        };
        let module = self
            .get(id)
            .ok_or_else(|| Error::UnknownModule(id.to_string()))?;
        module.handle(envelope).await
    }
}
