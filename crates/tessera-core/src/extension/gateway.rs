//! Inter-extension API gateway.
//!
//! Extensions publish named endpoints here and call each other's endpoints
//! by `(extension_id, name)` without holding a reference to one another.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::contract::ExtResult;
use crate::error::{Error, Result};

/// Type-erased API endpoint.
pub type ApiHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ExtResult<Value>> + Send + Sync>;

/// Wrap a closure as an [`ApiHandler`].
pub fn api_handler<F, Fut>(f: F) -> ApiHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExtResult<Value>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Registry of endpoints keyed by owning extension.
#[derive(Default)]
pub struct ApiGateway {
    apis: DashMap<String, HashMap<String, ApiHandler>>,
}

impl ApiGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an endpoint. The last registration wins.
    pub fn register(&self, extension_id: &str, name: &str, handler: ApiHandler) {
        let replaced = self
            .apis
            .entry(extension_id.to_string())
            .or_default()
            .insert(name.to_string(), handler)
            .is_some();
        tracing::debug!(
            extension_id = %extension_id,
            api = %name,
            replaced,
            "API registered"
        );
    }

    /// Invoke `target`'s endpoint `name`.
    pub async fn call(&self, target: &str, name: &str, args: Value) -> Result<Value> {
        // Clone the handler out so no map shard stays locked across the await.
        let handler = self
            .apis
            .get(target)
            .and_then(|apis| apis.get(name).cloned())
            .ok_or_else(|| Error::ApiNotFound {
                target: target.to_string(),
                name: name.to_string(),
            })?;

        handler(args).await.map_err(|e| Error::ApiFailed {
            target: target.to_string(),
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    pub fn contains(&self, target: &str, name: &str) -> bool {
        self.apis
            .get(target)
            .map(|apis| apis.contains_key(name))
            .unwrap_or(false)
    }

    /// Endpoint names registered by one extension, sorted.
    pub fn list(&self, extension_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .apis
            .get(extension_id)
            .map(|apis| apis.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Drop every endpoint of one extension. Returns how many were removed.
    pub fn clear(&self, extension_id: &str) -> usize {
        self.apis
            .remove(extension_id)
            .map(|(_, apis)| apis.len())
            .unwrap_or(0)
    }
}
