use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Once, RwLock};

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::contract::{ToolCategory, ToolContract, ToolMeta};
use crate::tools::{
    FilterItemsTool, ForeachTool, IfBranchTool, LogTool, ParallelTool, SwitchBranchTool, Tool,
};

/// Central catalog of available tools.
///
/// Registration is rare and serialized; lookups dominate and take only read
/// locks. Contracts are generated from a tool's metadata on first request
/// and cached. There is no unregister.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    contracts: RwLock<HashMap<String, Arc<ToolContract>>>,
    init: Once,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// An empty registry. Call [`ToolRegistry::initialize`] to install the
    /// built-in tools, or register everything by hand (tests do).
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            contracts: RwLock::new(HashMap::new()),
            init: Once::new(),
        }
    }

    /// A registry with the built-in tools installed.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.initialize();
        registry
    }

    /// Install the built-in tools: the flow primitives, `filter_items`, and
    /// `log`. Idempotent and serialized; safe to call from any thread.
    pub fn initialize(&self) {
        self.init.call_once(|| {
            self.register(Arc::new(IfBranchTool::new()));
            self.register(Arc::new(SwitchBranchTool::new()));
            self.register(Arc::new(ParallelTool::new()));
            self.register(Arc::new(ForeachTool::new()));
            self.register(Arc::new(FilterItemsTool::new()));
            self.register(Arc::new(LogTool::new()));
            log::info!("Tool registry initialized with {} tools", self.len());
        });
    }

    /// Register a tool under its declared name, replacing (with a warning)
    /// any existing entry.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.meta().name.clone();
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if tools.contains_key(&name) {
            log::warn!("Overwriting tool registration: {name}");
            self.contracts
                .write()
                .expect("contract cache lock poisoned")
                .remove(&name);
        }
        tools.insert(name.clone(), tool);
        log::debug!("Registered tool: {name}");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn meta(&self, name: &str) -> Option<ToolMeta> {
        self.get(name).map(|tool| tool.meta().clone())
    }

    /// The formal contract for a tool, generated on first request.
    pub fn contract(&self, name: &str) -> Option<Arc<ToolContract>> {
        if let Some(contract) = self
            .contracts
            .read()
            .expect("contract cache lock poisoned")
            .get(name)
        {
            return Some(contract.clone());
        }

        let tool = self.get(name)?;
        let contract = Arc::new(ToolContract::from_meta(tool.meta()));
        self.contracts
            .write()
            .expect("contract cache lock poisoned")
            .insert(name.to_string(), contract.clone());
        Some(contract)
    }

    pub fn list_all(&self) -> Vec<ToolMeta> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .map(|tool| tool.meta().clone())
            .collect()
    }

    pub fn list_contracts(&self) -> Vec<Arc<ToolContract>> {
        self.names()
            .iter()
            .filter_map(|name| self.contract(name))
            .collect()
    }

    pub fn list_by_category(&self, category: ToolCategory) -> Vec<ToolMeta> {
        self.list_all()
            .into_iter()
            .filter(|meta| meta.category == category)
            .collect()
    }

    pub fn list_by_tag(&self, tag: &str) -> Vec<ToolMeta> {
        self.list_all()
            .into_iter()
            .filter(|meta| meta.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Registered tool names, sorted for stable output in error details and
    /// prompts.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Tool names grouped by category.
    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for meta in self.list_all() {
            categories
                .entry(meta.category.as_str().to_string())
                .or_default()
                .push(meta.name);
        }
        for names in categories.values_mut() {
            names.sort();
        }
        categories
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Catalog projection for API responses.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "tools": self
                .names()
                .iter()
                .filter_map(|name| self.meta(name))
                .collect::<Vec<_>>(),
            "categories": self.categories(),
            "total": self.len(),
        })
    }
}

static GLOBAL: Lazy<Arc<ToolRegistry>> = Lazy::new(|| Arc::new(ToolRegistry::with_builtins()));

/// The process-wide registry with built-in tools installed.
pub fn global() -> Arc<ToolRegistry> {
    GLOBAL.clone()
}
