//! Caching destination resolver
//!
//! Queue URLs never change for the lifetime of a queue, so a successful lookup
//! is cached for the process lifetime. Failed lookups are not cached: a queue
//! created later resolves on the next attempt.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{is_destination_url, DestinationResolver, Result};

pub struct CachingDestinationResolver {
    inner: Arc<dyn DestinationResolver>,
    cache: DashMap<String, String>,
}

impl CachingDestinationResolver {
    pub fn new(inner: Arc<dyn DestinationResolver>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate(&self, logical_name: &str) {
        self.cache.remove(logical_name);
    }
}

#[async_trait]
impl DestinationResolver for CachingDestinationResolver {
    async fn resolve(&self, logical_name: &str) -> Result<String> {
        if is_destination_url(logical_name) {
            return Ok(logical_name.to_string());
        }

        if let Some(destination) = self.cache.get(logical_name) {
            return Ok(destination.clone());
        }

        let destination = self.inner.resolve(logical_name).await?;
        debug!(queue = %logical_name, destination = %destination, "Resolved queue destination");
        self.cache.insert(logical_name.to_string(), destination.clone());
        Ok(destination)
    }
}
