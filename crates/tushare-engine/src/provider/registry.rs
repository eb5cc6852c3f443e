//! Registry of provider functions computed on the client.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::pro_bar::ProBar;
use super::Provider;
use crate::engine::result_set::ResultSet;
use crate::error::ProviderError;

/// A function built on top of the Pro endpoint.
#[async_trait]
pub trait ProviderFunction: Send + Sync {
    /// Code the function is registered under.
    fn name(&self) -> &'static str;

    /// Execute against the Pro endpoint `pro`.
    async fn call(&self, pro: &dyn Provider, params: &Map<String, Value>) -> Result<ResultSet, ProviderError>;
}

/// Registry of client-side functions.
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ProviderFunction>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry with every built-in function.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ProBar);
        registry
    }

    pub fn register<F: ProviderFunction + 'static>(&mut self, function: F) {
        let name = function.name().to_string();
        self.functions.insert(name, Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderFunction>> {
        self.functions.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = FunctionRegistry::with_defaults();
        assert_eq!(registry.get("pro_bar").map(|f| f.name().to_string()), Some("pro_bar".to_string()));
        assert!(registry.get("daily").is_none());
    }
}
