//! Bridge registry: names of external adapters mapped to their URLs.

use crate::error::TaskError;
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;

/// Looks up external adapters by name.
#[async_trait]
pub trait BridgeRegistry: Send + Sync {
    async fn find_bridge(&self, name: &str) -> Result<Url, TaskError>;
}

/// Fixed in-memory bridge table.
#[derive(Debug, Clone, Default)]
pub struct StaticBridgeRegistry {
    bridges: HashMap<String, Url>,
}

impl StaticBridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add a bridge.
    pub fn with_bridge(mut self, name: impl Into<String>, url: Url) -> Self {
        self.bridges.insert(name.into(), url);
        self
    }

    /// Add a bridge from a URL string.
    pub fn insert(&mut self, name: impl Into<String>, url: &str) -> Result<(), TaskError> {
        let url = Url::parse(url)
            .map_err(|e| TaskError::BadInput(format!("invalid bridge url '{url}': {e}")))?;
        self.bridges.insert(name.into(), url);
        Ok(())
    }

    /// Parse a `name=url` pair.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), TaskError> {
        let (name, url) = pair
            .split_once('=')
            .ok_or_else(|| TaskError::BadInput(format!("expected name=url, got '{pair}'")))?;
        self.insert(name.trim(), url.trim())
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

#[async_trait]
impl BridgeRegistry for StaticBridgeRegistry {
    async fn find_bridge(&self, name: &str) -> Result<Url, TaskError> {
        self.bridges
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::BridgeNotFound(name.to_owned()))
    }
}
