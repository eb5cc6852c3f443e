//! Provider boundary.
//!
//! The engine sees the data provider as a named, synchronous call taking
//! a flat parameter map and returning a [`ResultSet`]. [`TushareProvider`]
//! implements it over the Pro HTTP endpoint plus a small registry of
//! functions computed client-side.

pub mod client;
pub mod pro_bar;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::engine::result_set::ResultSet;
use crate::error::ProviderError;

pub use client::ProClient;
pub use pro_bar::ProBar;
pub use registry::{FunctionRegistry, ProviderFunction};

/// A provider call by code.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(&self, api_code: &str, params: &Map<String, Value>) -> Result<ResultSet, ProviderError>;
}

/// Opens a provider for one run.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Provider>, ProviderError>;
}

/// The Tushare provider.
///
/// Every code is forwarded to the Pro endpoint except the few functions
/// the official client computes locally, which are looked up in a
/// secondary registry first. `pro_bar` is the one such function today.
pub struct TushareProvider {
    pro: Arc<dyn Provider>,
    functions: FunctionRegistry,
}

impl TushareProvider {
    pub fn new(pro: Arc<dyn Provider>, functions: FunctionRegistry) -> Self {
        Self { pro, functions }
    }
}

#[async_trait]
impl Provider for TushareProvider {
    async fn call(&self, api_code: &str, params: &Map<String, Value>) -> Result<ResultSet, ProviderError> {
        match self.functions.get(api_code) {
            Some(function) => {
                tracing::debug!(api_code, "Dispatching to client-side function");
                function.call(self.pro.as_ref(), params).await
            }
            None => self.pro.call(api_code, params).await,
        }
    }
}

/// Opens a [`TushareProvider`] with one HTTP client per run.
pub struct TushareProviderFactory {
    config: EngineConfig,
}

impl TushareProviderFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProviderFactory for TushareProviderFactory {
    async fn open(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        let token = self.config.token.trim();
        if token.is_empty() {
            return Err(ProviderError::MissingToken);
        }
        let client = ProClient::new(
            &self.config.api_url,
            token,
            Duration::from_secs(self.config.timeout_secs),
        )?;
        Ok(Arc::new(TushareProvider::new(
            Arc::new(client),
            FunctionRegistry::with_defaults(),
        )))
    }
}
