//! LLM Registry & Router
//!
//! Maps role keys to gateway instances. Construction fails closed on
//! individual entries (skip with a warning) but succeeds as long as at
//! least one entry is usable.
//!
//! Resolution order for a request `(node, subrole)`:
//! 1. `node_llm["{node}.{subrole}"]`
//! 2. `node_llm["{node}"]`
//! 3. legacy alias (`generate_and_review_parallel` for
//!    `generate_and_review_by_chapter`), same two lookups
//! 4. `node_llm["default"]`
//! 5. the registry's `default` entry
//! 6. the first entry (last resort)

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::gateway::{GeminiGateway, LlmGateway, OpenAiGateway};
use courseforge_core::config::{LlmEntry, PipelineConfig, ProviderKind};

/// Legacy node name kept for configs written against the old scheduler
const LEGACY_GENERATE_NODE: &str = "generate_and_review_parallel";
const GENERATE_NODE: &str = "generate_and_review_by_chapter";

/// Role-key router over named gateways
pub struct LlmRegistry {
    gateways: HashMap<String, Arc<dyn LlmGateway>>,
    node_llm: HashMap<String, String>,
    /// Entry names in deterministic (sorted) order, for the last-resort fallback
    order: Vec<String>,
}

impl LlmRegistry {
    /// Build the registry from config; bad entries are skipped with a warning
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut registry = Self {
            gateways: HashMap::new(),
            node_llm: config.node_llm.clone(),
            order: Vec::new(),
        };

        let mut names: Vec<&String> = config.llms.keys().collect();
        names.sort();

        for name in names {
            let entry = &config.llms[name];
            match build_gateway(name, entry) {
                Ok(gateway) => registry.insert(name, gateway),
                Err(e) => warn!("skipping llm entry '{}': {}", name, e),
            }
        }

        if registry.gateways.is_empty() {
            return Err(anyhow!("no usable llm entries in configuration"));
        }
        Ok(registry)
    }

    /// Insert a gateway under a name (also used by tests to install stubs)
    pub fn insert(&mut self, name: &str, gateway: Arc<dyn LlmGateway>) {
        if !self.gateways.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.gateways.insert(name.to_string(), gateway);
    }

    /// Registry with no entries; callers must `insert` before resolving
    pub fn empty(node_llm: HashMap<String, String>) -> Self {
        Self {
            gateways: HashMap::new(),
            node_llm,
            order: Vec::new(),
        }
    }

    /// Resolve the gateway for a `(node, subrole)` role key
    pub fn resolve(&self, node: &str, subrole: &str) -> Result<Arc<dyn LlmGateway>> {
        let mut keys = vec![format!("{}.{}", node, subrole), node.to_string()];
        if node == GENERATE_NODE {
            keys.push(format!("{}.{}", LEGACY_GENERATE_NODE, subrole));
            keys.push(LEGACY_GENERATE_NODE.to_string());
        }
        keys.push("default".to_string());

        for key in &keys {
            if let Some(entry_name) = self.node_llm.get(key) {
                if let Some(gateway) = self.gateways.get(entry_name) {
                    debug!("resolved role '{}.{}' via '{}' -> '{}'", node, subrole, key, entry_name);
                    return Ok(Arc::clone(gateway));
                }
            }
        }

        // Registry-level defaults
        if let Some(gateway) = self.gateways.get("default") {
            return Ok(Arc::clone(gateway));
        }
        self.order
            .first()
            .and_then(|name| self.gateways.get(name))
            .map(Arc::clone)
            .ok_or_else(|| anyhow!("llm registry has no entries"))
    }
}

fn build_gateway(name: &str, entry: &LlmEntry) -> Result<Arc<dyn LlmGateway>> {
    if entry.model.trim().is_empty() {
        return Err(anyhow!("empty model name"));
    }
    match entry.provider {
        ProviderKind::Openai => Ok(Arc::new(OpenAiGateway::from_entry(name, entry))),
        ProviderKind::Gemini => {
            let gateway = GeminiGateway::from_entry(name, entry)
                .map_err(|e| anyhow!("gemini entry rejected: {}", e))?;
            Ok(Arc::new(gateway))
        }
    }
}
